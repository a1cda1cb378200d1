//! In-memory `MailStore`.
//!
//! Holds folders and messages in process memory and records every request it
//! receives, together with the addressing mode it arrived under. Clones share
//! the same mailbox, so a caller can hand one clone to a session and keep
//! another to inspect the result.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use chrono::{DateTime, FixedOffset};

use crate::error::StoreError;
use crate::session::chunk::ChunkRange;
use crate::store::{
    AddressingMode, FetchItem, FetchResponse, FetchedParts, Flag, FlagChange, MailStore,
};

/// One message held by a `MemoryStore`.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredMail {
    pub uid: u32,
    pub header: Vec<u8>,
    pub internal_date: DateTime<FixedOffset>,
    pub flags: Vec<Flag>,
    pub labels: Vec<String>,
}

/// A request received by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreCall {
    /// Operation name, e.g. `fetch`, `copy`, `create_folder`.
    pub operation: &'static str,
    /// Addressing mode, for operations that address messages.
    pub mode: Option<AddressingMode>,
    /// Sequence set or folder argument, rendered as text.
    pub target: String,
}

#[derive(Debug, Default)]
struct Folder {
    messages: Vec<StoredMail>,
    next_uid: u32,
    subscribed: bool,
}

#[derive(Debug, Default)]
struct State {
    folders: BTreeMap<String, Folder>,
    selected: Option<String>,
    calls: Vec<StoreCall>,
    /// Number of upcoming fetches answered with an empty response.
    empty_fetches: u32,
    /// Folder names `create_folder` refuses.
    refused: Vec<String>,
}

/// Shared-state in-memory mail store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    state: Rc<RefCell<State>>,
}

impl MemoryStore {
    /// Create a store holding an empty `INBOX`.
    pub fn new() -> Self {
        let store = Self::default();
        store.add_folder("INBOX");
        store
    }

    /// Create a folder if it does not exist.
    pub fn add_folder(&self, folder: &str) {
        self.state
            .borrow_mut()
            .folders
            .entry(folder.to_string())
            .or_insert_with(|| Folder {
                next_uid: 1,
                subscribed: true,
                ..Default::default()
            });
    }

    /// Append a message to `folder`, creating the folder if needed. Returns its uid.
    pub fn append(
        &self,
        folder: &str,
        header: &str,
        internal_date: DateTime<FixedOffset>,
        flags: Vec<Flag>,
    ) -> u32 {
        self.add_folder(folder);
        let mut state = self.state.borrow_mut();
        let Some(target) = state.folders.get_mut(folder) else {
            return 0;
        };
        let uid = target.next_uid;
        target.next_uid += 1;
        target.messages.push(StoredMail {
            uid,
            header: header.as_bytes().to_vec(),
            internal_date,
            flags,
            labels: Vec::new(),
        });
        uid
    }

    /// Answer the next `count` fetches with an empty response.
    pub fn fail_next_fetches(&self, count: u32) {
        self.state.borrow_mut().empty_fetches = count;
    }

    /// Make `create_folder` fail for `folder`.
    pub fn refuse_folder(&self, folder: &str) {
        self.state.borrow_mut().refused.push(folder.to_string());
    }

    /// Messages currently in `folder`, in sequence order.
    pub fn messages(&self, folder: &str) -> Vec<StoredMail> {
        self.state
            .borrow()
            .folders
            .get(folder)
            .map(|f| f.messages.clone())
            .unwrap_or_default()
    }

    /// Whether `folder` exists.
    pub fn has_folder(&self, folder: &str) -> bool {
        self.state.borrow().folders.contains_key(folder)
    }

    /// Every request received so far, oldest first.
    pub fn calls(&self) -> Vec<StoreCall> {
        self.state.borrow().calls.clone()
    }

    fn record(&self, operation: &'static str, mode: Option<AddressingMode>, target: String) {
        self.state.borrow_mut().calls.push(StoreCall {
            operation,
            mode,
            target,
        });
    }

    /// Run `f` over the selected folder's messages addressed by `range`.
    ///
    /// `f` receives the response key (sequence number or uid) for each message.
    fn with_selected<T>(
        &self,
        mode: AddressingMode,
        range: &ChunkRange,
        mut f: impl FnMut(u32, &mut StoredMail) -> Option<T>,
    ) -> Result<Vec<T>, StoreError> {
        let mut state = self.state.borrow_mut();
        let State {
            folders, selected, ..
        } = &mut *state;
        let folder = selected
            .as_ref()
            .and_then(|name| folders.get_mut(name))
            .ok_or(StoreError::NoMailboxSelected)?;

        let highest = match mode {
            AddressingMode::Positional => folder.messages.len() as u32,
            AddressingMode::StableId => folder.messages.last().map_or(0, |m| m.uid),
        };
        let mut out = Vec::new();
        for (index, mail) in folder.messages.iter_mut().enumerate() {
            let key = match mode {
                AddressingMode::Positional => index as u32 + 1,
                AddressingMode::StableId => mail.uid,
            };
            if range.contains(key, highest)
                && let Some(value) = f(key, mail)
            {
                out.push(value);
            }
        }
        Ok(out)
    }

    fn folder_names(&self, directory: &str, pattern: &str, subscribed_only: bool) -> Vec<String> {
        let prefix = directory.trim_end_matches('/');
        self.state
            .borrow()
            .folders
            .iter()
            .filter(|(_, folder)| !subscribed_only || folder.subscribed)
            .map(|(name, _)| name)
            .filter(|name| prefix.is_empty() || name.starts_with(&format!("{prefix}/")))
            .filter(|name| {
                let rest = if prefix.is_empty() {
                    name.as_str()
                } else {
                    &name[prefix.len() + 1..]
                };
                wildcard_match(pattern, rest)
            })
            .cloned()
            .collect()
    }
}

/// IMAP LIST wildcard match: `*` matches anything, `%` anything but a hierarchy delimiter.
fn wildcard_match(pattern: &str, name: &str) -> bool {
    match pattern.chars().next() {
        None => name.is_empty(),
        Some('*') => (0..=name.len())
            .filter(|i| name.is_char_boundary(*i))
            .any(|i| wildcard_match(&pattern[1..], &name[i..])),
        Some('%') => (0..=name.len())
            .filter(|i| name.is_char_boundary(*i))
            .take_while(|i| !name[..*i].contains('/'))
            .any(|i| wildcard_match(&pattern[1..], &name[i..])),
        Some(c) => name
            .strip_prefix(c)
            .is_some_and(|rest| wildcard_match(&pattern[c.len_utf8()..], rest)),
    }
}

fn apply_change<T: PartialEq + Clone>(current: &mut Vec<T>, change: FlagChange, values: &[T]) {
    match change {
        FlagChange::Add => {
            for value in values {
                if !current.contains(value) {
                    current.push(value.clone());
                }
            }
        }
        FlagChange::Remove => current.retain(|v| !values.contains(v)),
        FlagChange::Set => *current = values.to_vec(),
    }
}

impl MailStore for MemoryStore {
    fn select_folder(&mut self, folder: &str) -> Result<u32, StoreError> {
        self.record("select_folder", None, folder.to_string());
        let mut state = self.state.borrow_mut();
        let count = state
            .folders
            .get(folder)
            .map(|f| f.messages.len() as u32)
            .ok_or_else(|| StoreError::FolderSelect {
                folder: folder.to_string(),
                reason: "no such folder".into(),
            })?;
        state.selected = Some(folder.to_string());
        Ok(count)
    }

    fn fetch(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        items: &[FetchItem],
    ) -> Result<FetchResponse, StoreError> {
        self.record("fetch", Some(mode), range.to_string());
        {
            let mut state = self.state.borrow_mut();
            if state.empty_fetches > 0 {
                state.empty_fetches -= 1;
                return Ok(FetchResponse::new());
            }
        }

        let entries = self.with_selected(mode, range, |key, mail| {
            let mut parts = FetchedParts::default();
            for item in items {
                match item.cache_key() {
                    FetchItem::Uid => parts.uid = Some(mail.uid),
                    FetchItem::Header | FetchItem::HeaderPeek => {
                        parts.header = Some(mail.header.clone());
                        if *item == FetchItem::Header && !mail.flags.contains(&Flag::Seen) {
                            mail.flags.push(Flag::Seen);
                        }
                    }
                    FetchItem::InternalDate => parts.internal_date = Some(mail.internal_date),
                    FetchItem::Flags => parts.flags = Some(mail.flags.clone()),
                }
            }
            // Servers always report the uid on uid-addressed fetches.
            if mode == AddressingMode::StableId {
                parts.uid = Some(mail.uid);
            }
            Some((key, parts))
        })?;
        Ok(entries.into_iter().collect())
    }

    fn copy(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        folder: &str,
    ) -> Result<(), StoreError> {
        self.record("copy", Some(mode), format!("{range} {folder}"));
        let copies = self.with_selected(mode, range, |_, mail| Some(mail.clone()))?;
        let mut state = self.state.borrow_mut();
        let target = state
            .folders
            .get_mut(folder)
            .ok_or_else(|| StoreError::Backend(format!("[TRYCREATE] no folder {folder}")))?;
        for mut mail in copies {
            mail.uid = target.next_uid;
            target.next_uid += 1;
            target.messages.push(mail);
        }
        Ok(())
    }

    fn delete_messages(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<(), StoreError> {
        self.record("delete_messages", Some(mode), range.to_string());
        self.with_selected(mode, range, |_, mail| {
            apply_change(&mut mail.flags, FlagChange::Add, &[Flag::Deleted]);
            Some(())
        })?;
        Ok(())
    }

    fn get_flags(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<HashMap<u32, Vec<Flag>>, StoreError> {
        self.record("get_flags", Some(mode), range.to_string());
        let flags = self.with_selected(mode, range, |key, mail| Some((key, mail.flags.clone())))?;
        Ok(flags.into_iter().collect())
    }

    fn store_flags(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        change: FlagChange,
        flags: &[Flag],
    ) -> Result<(), StoreError> {
        self.record("store_flags", Some(mode), range.to_string());
        self.with_selected(mode, range, |_, mail| {
            apply_change(&mut mail.flags, change, flags);
            Some(())
        })?;
        Ok(())
    }

    fn get_labels(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<HashMap<u32, Vec<String>>, StoreError> {
        self.record("get_labels", Some(mode), range.to_string());
        let labels =
            self.with_selected(mode, range, |key, mail| Some((key, mail.labels.clone())))?;
        Ok(labels.into_iter().collect())
    }

    fn store_labels(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        change: FlagChange,
        labels: &[String],
    ) -> Result<(), StoreError> {
        self.record("store_labels", Some(mode), range.to_string());
        self.with_selected(mode, range, |_, mail| {
            apply_change(&mut mail.labels, change, labels);
            Some(())
        })?;
        Ok(())
    }

    fn folder_exists(&mut self, folder: &str) -> Result<bool, StoreError> {
        self.record("folder_exists", None, folder.to_string());
        Ok(self.has_folder(folder))
    }

    fn create_folder(&mut self, folder: &str) -> Result<(), StoreError> {
        self.record("create_folder", None, folder.to_string());
        if self.has_folder(folder) {
            return Err(StoreError::Backend(format!("folder {folder} already exists")));
        }
        if self.state.borrow().refused.iter().any(|f| f == folder) {
            return Err(StoreError::Backend(format!("cannot create {folder}")));
        }
        self.add_folder(folder);
        Ok(())
    }

    fn delete_folder(&mut self, folder: &str) -> Result<(), StoreError> {
        self.record("delete_folder", None, folder.to_string());
        let mut state = self.state.borrow_mut();
        if state.selected.as_deref() == Some(folder) {
            return Err(StoreError::Backend(format!("folder {folder} is selected")));
        }
        state
            .folders
            .remove(folder)
            .map(|_| ())
            .ok_or_else(|| StoreError::Backend(format!("no folder {folder}")))
    }

    fn rename_folder(&mut self, from: &str, to: &str) -> Result<(), StoreError> {
        self.record("rename_folder", None, format!("{from} {to}"));
        let mut state = self.state.borrow_mut();
        if state.folders.contains_key(to) {
            return Err(StoreError::Backend(format!("folder {to} already exists")));
        }
        let folder = state
            .folders
            .remove(from)
            .ok_or_else(|| StoreError::Backend(format!("no folder {from}")))?;
        state.folders.insert(to.to_string(), folder);
        if state.selected.as_deref() == Some(from) {
            state.selected = Some(to.to_string());
        }
        Ok(())
    }

    fn list_folders(&mut self, directory: &str, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.record("list_folders", None, format!("{directory} {pattern}"));
        Ok(self.folder_names(directory, pattern, false))
    }

    fn list_subscribed_folders(
        &mut self,
        directory: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.record("list_subscribed_folders", None, format!("{directory} {pattern}"));
        Ok(self.folder_names(directory, pattern, true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-01-05T09:30:00+01:00").unwrap()
    }

    fn store_with(count: u32) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..count {
            store.append("INBOX", &format!("Subject: message {i}\r\n\r\n"), date(), vec![]);
        }
        store
    }

    #[test]
    fn select_reports_message_count() {
        let mut store = store_with(3);
        assert_eq!(store.select_folder("INBOX").unwrap(), 3);
        assert!(matches!(
            store.select_folder("Missing"),
            Err(StoreError::FolderSelect { .. })
        ));
    }

    #[test]
    fn positional_fetch_keys_by_sequence_number() {
        let mut store = store_with(3);
        store.select_folder("INBOX").unwrap();
        let data = store
            .fetch(
                AddressingMode::Positional,
                &ChunkRange::Open(2),
                &[FetchItem::Uid],
            )
            .unwrap();
        let mut keys: Vec<u32> = data.keys().copied().collect();
        keys.sort_unstable();
        assert_eq!(keys, vec![2, 3]);
    }

    #[test]
    fn peek_does_not_mark_seen() {
        let mut store = store_with(1);
        store.select_folder("INBOX").unwrap();
        store
            .fetch(
                AddressingMode::Positional,
                &ChunkRange::Single(1),
                &[FetchItem::HeaderPeek],
            )
            .unwrap();
        assert!(store.messages("INBOX")[0].flags.is_empty());

        store
            .fetch(
                AddressingMode::Positional,
                &ChunkRange::Single(1),
                &[FetchItem::Header],
            )
            .unwrap();
        assert_eq!(store.messages("INBOX")[0].flags, vec![Flag::Seen]);
    }

    #[test]
    fn copy_requires_existing_folder() {
        let mut store = store_with(1);
        store.select_folder("INBOX").unwrap();
        assert!(store
            .copy(AddressingMode::StableId, &ChunkRange::Single(1), "Archive")
            .is_err());
        store.create_folder("Archive").unwrap();
        store
            .copy(AddressingMode::StableId, &ChunkRange::Single(1), "Archive")
            .unwrap();
        assert_eq!(store.messages("Archive").len(), 1);
    }

    #[test]
    fn empty_fetches_are_injectable() {
        let mut store = store_with(1);
        store.select_folder("INBOX").unwrap();
        store.fail_next_fetches(1);
        let range = ChunkRange::Single(1);
        assert!(store
            .fetch(AddressingMode::StableId, &range, &[FetchItem::Flags])
            .unwrap()
            .is_empty());
        assert_eq!(
            store
                .fetch(AddressingMode::StableId, &range, &[FetchItem::Flags])
                .unwrap()
                .len(),
            1
        );
    }

    #[test]
    fn list_folders_honours_wildcards() {
        let mut store = MemoryStore::new();
        store.add_folder("Lists");
        store.add_folder("Lists/rust");
        store.add_folder("Lists/rust/announce");
        assert_eq!(
            store.list_folders("Lists", "%").unwrap(),
            vec!["Lists/rust".to_string()]
        );
        assert_eq!(store.list_folders("", "*").unwrap().len(), 4);
    }

    #[test]
    fn calls_record_addressing_mode() {
        let mut store = store_with(1);
        store.select_folder("INBOX").unwrap();
        store
            .delete_messages(AddressingMode::StableId, &ChunkRange::Single(1))
            .unwrap();
        let last = store.calls().pop().unwrap();
        assert_eq!(last.operation, "delete_messages");
        assert_eq!(last.mode, Some(AddressingMode::StableId));
        assert_eq!(store.messages("INBOX")[0].flags, vec![Flag::Deleted]);
    }
}
