//! Parsed header block of one message.
//!
//! Only the header block is ever fetched. It is parsed once with
//! `mail-parser` and every header lookup is answered from that parse.

use mail_parser::{HeaderForm, HeaderValue, Message, MessageParser};

/// Header fields of one message, parsed by `mail-parser`.
#[derive(Debug, Default)]
pub struct Headers {
    parsed: Option<Message<'static>>,
}

impl Headers {
    /// Parse a raw RFC 5322 header block.
    pub fn parse(raw: &[u8]) -> Self {
        Self {
            parsed: MessageParser::default().parse(raw).map(Message::into_owned),
        }
    }

    /// The underlying parse, if the block held any header at all.
    pub fn message(&self) -> Option<&Message<'static>> {
        self.parsed.as_ref()
    }

    /// First value of `name` as written, unfolded. Names compare case-insensitively.
    pub fn get(&self, name: &str) -> Option<String> {
        let message = self.parsed.as_ref()?;
        let values = message.header_as(name.to_string(), HeaderForm::Raw);
        let first = values.first()?;
        Some(first.as_text().map(unfold).unwrap_or_default())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// `Subject`, with encoded words decoded.
    pub fn subject(&self) -> Option<&str> {
        self.parsed.as_ref()?.subject()
    }

    /// Bare address of the first `From` mailbox.
    pub fn sender_address(&self) -> Option<&str> {
        self.parsed.as_ref()?.from()?.first()?.address()
    }

    /// List identifier from `List-Id`: the address part when there is one.
    ///
    /// `List-Id: Some description <some.list.id>` yields `some.list.id`, and a
    /// bare identifier is returned as is.
    pub fn list_id(&self) -> Option<&str> {
        match self.parsed.as_ref()?.list_id() {
            HeaderValue::Address(address) => {
                let addr = address.first()?;
                addr.address().or(addr.name())
            }
            HeaderValue::Text(text) => Some(&**text),
            _ => None,
        }
    }
}

fn unfold(value: &str) -> String {
    value
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    const RAW: &str = "From: Alice <alice@example.com>\r\n\
        Subject: A long\r\n subject line\r\n\
        X-Launchpad-Message-Rationale: subscriber\r\n\
        X-Empty:\r\n\
        Received: one\r\n\
        Received: two\r\n\
        \r\n\
        Body-Looking: ignored\r\n";

    fn parse(raw: &str) -> Headers {
        Headers::parse(raw.as_bytes())
    }

    #[test]
    fn unfolds_values() {
        let headers = parse(RAW);
        assert_eq!(headers.get("subject").as_deref(), Some("A long subject line"));
        assert_eq!(headers.subject(), Some("A long subject line"));
        assert_eq!(headers.get("From").as_deref(), Some("Alice <alice@example.com>"));
        assert_eq!(headers.sender_address(), Some("alice@example.com"));
    }

    #[test]
    fn stops_at_blank_line() {
        assert!(!parse(RAW).contains("Body-Looking"));
    }

    #[test]
    fn lookups_are_case_insensitive_and_first_wins() {
        let headers = parse(RAW);
        assert_eq!(headers.get("RECEIVED").as_deref(), Some("one"));
        assert_eq!(
            headers.get("x-launchpad-message-rationale").as_deref(),
            Some("subscriber")
        );
    }

    #[test]
    fn empty_value_is_still_present() {
        let headers = parse(RAW);
        assert!(headers.contains("X-Empty"));
        assert_eq!(headers.get("X-Empty").as_deref(), Some(""));
        assert!(!headers.contains("X-Missing"));
    }

    #[test]
    fn list_id_from_description() {
        let headers = parse("List-Id: Some list description <some.list.id>\r\n\r\n");
        assert_eq!(headers.list_id(), Some("some.list.id"));
    }

    #[test]
    fn bare_list_id() {
        let headers = parse("List-Id: mail.asana.com\r\n\r\n");
        assert_eq!(headers.list_id(), Some("mail.asana.com"));
    }

    #[test]
    fn list_ids_with_different_descriptions_are_equal() {
        let a = parse("List-Id: some description <list.id>\r\n\r\n");
        let b = parse("List-Id: some other description <list.id>\r\n\r\n");
        assert_eq!(a.list_id(), b.list_id());
    }

    #[test]
    fn empty_block_has_nothing() {
        let headers = parse("");
        assert!(headers.get("Subject").is_none());
        assert!(headers.list_id().is_none());
    }
}
