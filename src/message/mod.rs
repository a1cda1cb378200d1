//! Lazily materialised messages.
//!
//! A `MessageDescriptor` holds the parts of one message fetched so far. Each
//! part is either unfetched or fetched, and once fetched it never changes.
//! `MessageView` is the read-only facade predicates and actions see; its
//! accessors fetch missing parts through the session on first use.

pub mod headers;

use std::cell::OnceCell;
use std::fmt;

use chrono::{DateTime, FixedOffset};

use crate::error::StoreError;
use crate::session::RetrievalSession;
use crate::store::{FetchItem, FetchedParts, Flag};

pub use self::headers::Headers;

// ── Descriptor ──────────────────────────────────────────────────────

/// Fetched parts of one message, keyed by its uid.
#[derive(Debug)]
pub struct MessageDescriptor {
    uid: u32,
    header: OnceCell<Vec<u8>>,
    internal_date: OnceCell<DateTime<FixedOffset>>,
    flags: OnceCell<Vec<Flag>>,
}

impl MessageDescriptor {
    /// Build a descriptor from a scan response. The uid must be present.
    pub fn from_parts(parts: FetchedParts) -> Result<Self, StoreError> {
        let uid = parts.uid.ok_or_else(|| StoreError::ProtocolInconsistency {
            uid: 0,
            detail: "fetch response carried no UID".into(),
        })?;
        let descriptor = Self {
            uid,
            header: OnceCell::new(),
            internal_date: OnceCell::new(),
            flags: OnceCell::new(),
        };
        descriptor.merge(parts);
        Ok(descriptor)
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    /// Whether the part behind `item` has been fetched.
    pub fn is_fetched(&self, item: FetchItem) -> bool {
        match item.cache_key() {
            FetchItem::Uid => true,
            FetchItem::Header | FetchItem::HeaderPeek => self.header.get().is_some(),
            FetchItem::InternalDate => self.internal_date.get().is_some(),
            FetchItem::Flags => self.flags.get().is_some(),
        }
    }

    /// Fill unfetched parts from `parts`. Parts already fetched are kept.
    pub fn merge(&self, parts: FetchedParts) {
        if let Some(header) = parts.header {
            let _ = self.header.set(header);
        }
        if let Some(date) = parts.internal_date {
            let _ = self.internal_date.set(date);
        }
        if let Some(flags) = parts.flags {
            let _ = self.flags.set(flags);
        }
    }

    pub fn header(&self) -> Option<&[u8]> {
        self.header.get().map(Vec::as_slice)
    }

    pub fn internal_date(&self) -> Option<&DateTime<FixedOffset>> {
        self.internal_date.get()
    }

    pub fn flags(&self) -> Option<&[Flag]> {
        self.flags.get().map(Vec::as_slice)
    }
}

// ── Part store ──────────────────────────────────────────────────────

/// A descriptor bound to the session that can complete it.
pub struct MessagePartStore {
    session: RetrievalSession,
    descriptor: MessageDescriptor,
}

impl MessagePartStore {
    pub fn new(session: RetrievalSession, descriptor: MessageDescriptor) -> Self {
        Self {
            session,
            descriptor,
        }
    }

    pub fn uid(&self) -> u32 {
        self.descriptor.uid()
    }

    pub fn descriptor(&self) -> &MessageDescriptor {
        &self.descriptor
    }

    /// Header block, fetched without marking the message seen.
    pub fn header(&self) -> Result<&[u8], StoreError> {
        self.session.fetch_part(&self.descriptor, FetchItem::HeaderPeek)?;
        self.descriptor.header().ok_or_else(|| self.missing(FetchItem::Header))
    }

    pub fn internal_date(&self) -> Result<&DateTime<FixedOffset>, StoreError> {
        self.session.fetch_part(&self.descriptor, FetchItem::InternalDate)?;
        self.descriptor
            .internal_date()
            .ok_or_else(|| self.missing(FetchItem::InternalDate))
    }

    pub fn flags(&self) -> Result<&[Flag], StoreError> {
        self.session.fetch_part(&self.descriptor, FetchItem::Flags)?;
        self.descriptor.flags().ok_or_else(|| self.missing(FetchItem::Flags))
    }

    fn missing(&self, item: FetchItem) -> StoreError {
        StoreError::ProtocolInconsistency {
            uid: self.uid(),
            detail: format!("{item} missing after fetch"),
        }
    }
}

// ── View ────────────────────────────────────────────────────────────

/// Read-only view of one message for the duration of one rule pass.
pub struct MessageView {
    parts: MessagePartStore,
    headers: OnceCell<Headers>,
}

impl MessageView {
    pub fn new(session: RetrievalSession, descriptor: MessageDescriptor) -> Self {
        Self {
            parts: MessagePartStore::new(session, descriptor),
            headers: OnceCell::new(),
        }
    }

    pub fn uid(&self) -> u32 {
        self.parts.uid()
    }

    pub fn parts(&self) -> &MessagePartStore {
        &self.parts
    }

    /// Parsed header block, fetched and parsed on first use.
    pub fn headers(&self) -> Result<&Headers, StoreError> {
        if let Some(headers) = self.headers.get() {
            return Ok(headers);
        }
        let parsed = Headers::parse(self.parts.header()?);
        Ok(self.headers.get_or_init(|| parsed))
    }

    /// Decoded `Subject`, if present.
    pub fn subject(&self) -> Result<Option<String>, StoreError> {
        Ok(self.headers()?.subject().map(str::to_string))
    }

    /// `From` header as written.
    pub fn from(&self) -> Result<Option<String>, StoreError> {
        Ok(self.headers()?.get("From"))
    }

    /// Bare address from the `From` header.
    pub fn sender_address(&self) -> Result<Option<String>, StoreError> {
        Ok(self.headers()?.sender_address().map(str::to_string))
    }

    pub fn is_list_message(&self) -> Result<bool, StoreError> {
        Ok(self.headers()?.contains("List-Id"))
    }

    /// Mailing-list identifier from `List-Id`, if the message has one.
    pub fn list_id(&self) -> Result<Option<String>, StoreError> {
        Ok(self.headers()?.list_id().map(str::to_string))
    }

    /// Arrival date recorded by the server.
    pub fn date(&self) -> Result<DateTime<FixedOffset>, StoreError> {
        self.parts.internal_date().copied()
    }

    pub fn flags(&self) -> Result<&[Flag], StoreError> {
        self.parts.flags()
    }

    /// Quoted subject, for logs.
    pub fn repr(&self) -> String {
        match self.subject() {
            Ok(Some(subject)) => format!("{subject:?}"),
            Ok(None) => "(no subject)".to_string(),
            Err(_) => format!("<uid {}>", self.uid()),
        }
    }
}

impl fmt::Debug for MessageView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageView")
            .field("uid", &self.uid())
            .field("descriptor", self.parts.descriptor())
            .finish()
    }
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;
    use crate::store::MemoryStore;

    #[test]
    fn descriptor_requires_uid() {
        assert!(MessageDescriptor::from_parts(FetchedParts::default()).is_err());
    }

    #[test]
    fn merge_keeps_first_value() {
        let descriptor = MessageDescriptor::from_parts(FetchedParts {
            uid: Some(4),
            flags: Some(vec![Flag::Seen]),
            ..Default::default()
        })
        .unwrap();
        descriptor.merge(FetchedParts {
            flags: Some(vec![Flag::Draft]),
            ..Default::default()
        });
        assert_eq!(descriptor.flags(), Some(&[Flag::Seen][..]));
        assert!(!descriptor.is_fetched(FetchItem::Header));
        assert!(descriptor.is_fetched(FetchItem::Uid));
    }

    #[test]
    fn accessors_read_headers() {
        let view = view_with_headers(
            "Subject: Weekly report\r\nFrom: Bob <bob@example.com>\r\nList-Id: Team <team.example.com>\r\n\r\n",
        );
        assert_eq!(view.subject().unwrap().as_deref(), Some("Weekly report"));
        assert_eq!(view.from().unwrap().as_deref(), Some("Bob <bob@example.com>"));
        assert_eq!(
            view.sender_address().unwrap().as_deref(),
            Some("bob@example.com")
        );
        assert!(view.is_list_message().unwrap());
        assert_eq!(view.list_id().unwrap().as_deref(), Some("team.example.com"));
        assert_eq!(view.repr(), "\"Weekly report\"");
    }

    #[test]
    fn subject_decodes_encoded_words() {
        let view = view_with_headers("Subject: =?UTF-8?Q?H=C3=AAllo?=\r\n\r\n");
        assert_eq!(view.subject().unwrap().as_deref(), Some("Hêllo"));
    }

    #[test]
    fn missing_headers_are_none() {
        let view = view_with_headers("X-Other: 1\r\n\r\n");
        assert_eq!(view.list_id().unwrap(), None);
        assert!(!view.is_list_message().unwrap());
        assert_eq!(view.repr(), "(no subject)");
    }

    #[test]
    fn view_fetches_missing_parts_lazily() {
        let store = MemoryStore::new();
        let date = DateTime::parse_from_rfc3339("2026-04-01T10:00:00+02:00").unwrap();
        store.append("INBOX", "Subject: lazy\r\n\r\n", date, vec![Flag::Answered]);
        let session = RetrievalSession::new(store.clone());
        session.select_mailbox("INBOX").unwrap();

        let descriptor = MessageDescriptor::from_parts(FetchedParts {
            uid: Some(1),
            ..Default::default()
        })
        .unwrap();
        let view = MessageView::new(session, descriptor);

        assert_eq!(view.subject().unwrap().as_deref(), Some("lazy"));
        assert_eq!(view.date().unwrap(), date);
        assert_eq!(view.flags().unwrap(), &[Flag::Answered]);
        // Header peek must not have marked the message seen.
        assert_eq!(store.messages("INBOX")[0].flags, vec![Flag::Answered]);

        let fetches = store.calls().iter().filter(|c| c.operation == "fetch").count();
        view.headers().unwrap();
        view.flags().unwrap();
        assert_eq!(
            store.calls().iter().filter(|c| c.operation == "fetch").count(),
            fetches
        );
    }
}
