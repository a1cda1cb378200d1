//! Restricted capability surface handed to actions.
//!
//! Actions are user-supplied, so they get a fixed set of mutating operations
//! and nothing else: no connection lifecycle, no folder selection, no scanning.
//! Every operation runs under uid addressing regardless of the mode the
//! session is in when it is called, and restores that mode afterwards.

use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::StoreError;
use crate::session::RetrievalSession;
use crate::session::chunk::ChunkRange;
use crate::store::{AddressingMode, Flag, FlagChange, MailStore};

/// Operations available to actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AddFlags,
    AddGmailLabels,
    Copy,
    CreateFolder,
    DeleteFolder,
    DeleteMessages,
    FolderExists,
    GetFlags,
    GetGmailLabels,
    ListFolders,
    ListSubFolders,
    RemoveFlags,
    RemoveGmailLabels,
    RenameFolder,
    SetFlags,
    SetGmailLabels,
}

impl Operation {
    pub const ALL: [Operation; 16] = [
        Operation::AddFlags,
        Operation::AddGmailLabels,
        Operation::Copy,
        Operation::CreateFolder,
        Operation::DeleteFolder,
        Operation::DeleteMessages,
        Operation::FolderExists,
        Operation::GetFlags,
        Operation::GetGmailLabels,
        Operation::ListFolders,
        Operation::ListSubFolders,
        Operation::RemoveFlags,
        Operation::RemoveGmailLabels,
        Operation::RenameFolder,
        Operation::SetFlags,
        Operation::SetGmailLabels,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::AddFlags => "add_flags",
            Self::AddGmailLabels => "add_gmail_labels",
            Self::Copy => "copy",
            Self::CreateFolder => "create_folder",
            Self::DeleteFolder => "delete_folder",
            Self::DeleteMessages => "delete_messages",
            Self::FolderExists => "folder_exists",
            Self::GetFlags => "get_flags",
            Self::GetGmailLabels => "get_gmail_labels",
            Self::ListFolders => "list_folders",
            Self::ListSubFolders => "list_sub_folders",
            Self::RemoveFlags => "remove_flags",
            Self::RemoveGmailLabels => "remove_gmail_labels",
            Self::RenameFolder => "rename_folder",
            Self::SetFlags => "set_flags",
            Self::SetGmailLabels => "set_gmail_labels",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Operation {
    type Err = StoreError;

    /// Resolve an operation by name. Anything off the allow-list is rejected.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| StoreError::UnsupportedOperation {
                operation: s.to_string(),
            })
    }
}

/// Mutating access to the mail store, always addressed by uid.
#[derive(Clone)]
pub struct MutationGateway {
    session: RetrievalSession,
}

impl MutationGateway {
    pub(crate) fn new(session: RetrievalSession) -> Self {
        Self { session }
    }

    fn run<T>(
        &self,
        operation: Operation,
        f: impl FnOnce(&mut dyn MailStore, AddressingMode) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let _uid_mode = self.session.scoped(AddressingMode::StableId);
        debug!(operation = %operation, "Gateway call");
        self.session.with_store(f)
    }

    // ── Flags ───────────────────────────────────────────────────────

    pub fn add_flags(&self, uid: u32, flags: &[Flag]) -> Result<(), StoreError> {
        self.run(Operation::AddFlags, |store, mode| {
            store.store_flags(mode, &ChunkRange::Single(uid), FlagChange::Add, flags)
        })
    }

    pub fn remove_flags(&self, uid: u32, flags: &[Flag]) -> Result<(), StoreError> {
        self.run(Operation::RemoveFlags, |store, mode| {
            store.store_flags(mode, &ChunkRange::Single(uid), FlagChange::Remove, flags)
        })
    }

    pub fn set_flags(&self, uid: u32, flags: &[Flag]) -> Result<(), StoreError> {
        self.run(Operation::SetFlags, |store, mode| {
            store.store_flags(mode, &ChunkRange::Single(uid), FlagChange::Set, flags)
        })
    }

    pub fn get_flags(&self, uid: u32) -> Result<Vec<Flag>, StoreError> {
        self.run(Operation::GetFlags, |store, mode| {
            let mut flags = store.get_flags(mode, &ChunkRange::Single(uid))?;
            Ok(flags.remove(&uid).unwrap_or_default())
        })
    }

    // ── Gmail labels ────────────────────────────────────────────────

    pub fn add_gmail_labels(&self, uid: u32, labels: &[String]) -> Result<(), StoreError> {
        self.run(Operation::AddGmailLabels, |store, mode| {
            store.store_labels(mode, &ChunkRange::Single(uid), FlagChange::Add, labels)
        })
    }

    pub fn remove_gmail_labels(&self, uid: u32, labels: &[String]) -> Result<(), StoreError> {
        self.run(Operation::RemoveGmailLabels, |store, mode| {
            store.store_labels(mode, &ChunkRange::Single(uid), FlagChange::Remove, labels)
        })
    }

    pub fn set_gmail_labels(&self, uid: u32, labels: &[String]) -> Result<(), StoreError> {
        self.run(Operation::SetGmailLabels, |store, mode| {
            store.store_labels(mode, &ChunkRange::Single(uid), FlagChange::Set, labels)
        })
    }

    pub fn get_gmail_labels(&self, uid: u32) -> Result<Vec<String>, StoreError> {
        self.run(Operation::GetGmailLabels, |store, mode| {
            let mut labels = store.get_labels(mode, &ChunkRange::Single(uid))?;
            Ok(labels.remove(&uid).unwrap_or_default())
        })
    }

    // ── Messages ────────────────────────────────────────────────────

    /// Copy a message into `folder`. The folder must already exist.
    pub fn copy(&self, uid: u32, folder: &str) -> Result<(), StoreError> {
        self.run(Operation::Copy, |store, mode| {
            store.copy(mode, &ChunkRange::Single(uid), folder)
        })
    }

    /// Mark a message deleted.
    pub fn delete_messages(&self, uid: u32) -> Result<(), StoreError> {
        self.run(Operation::DeleteMessages, |store, mode| {
            store.delete_messages(mode, &ChunkRange::Single(uid))
        })
    }

    // ── Folders ─────────────────────────────────────────────────────

    pub fn folder_exists(&self, folder: &str) -> Result<bool, StoreError> {
        self.run(Operation::FolderExists, |store, _| store.folder_exists(folder))
    }

    pub fn create_folder(&self, folder: &str) -> Result<(), StoreError> {
        self.run(Operation::CreateFolder, |store, _| store.create_folder(folder))
    }

    pub fn delete_folder(&self, folder: &str) -> Result<(), StoreError> {
        self.run(Operation::DeleteFolder, |store, _| store.delete_folder(folder))
    }

    pub fn rename_folder(&self, from: &str, to: &str) -> Result<(), StoreError> {
        self.run(Operation::RenameFolder, |store, _| store.rename_folder(from, to))
    }

    pub fn list_folders(&self, directory: &str, pattern: &str) -> Result<Vec<String>, StoreError> {
        self.run(Operation::ListFolders, |store, _| {
            store.list_folders(directory, pattern)
        })
    }

    pub fn list_sub_folders(
        &self,
        directory: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        self.run(Operation::ListSubFolders, |store, _| {
            store.list_subscribed_folders(directory, pattern)
        })
    }

    // ── By name ─────────────────────────────────────────────────────

    /// Apply a flag or label operation named at runtime, e.g. from a rules file.
    ///
    /// Names outside the allow-list, and allowed operations that do not take
    /// a flag list, fail with `UnsupportedOperation`.
    pub fn store_by_name(&self, operation: &str, uid: u32, values: &[String]) -> Result<(), StoreError> {
        let op: Operation = operation.parse()?;
        let flags = || values.iter().filter_map(|v| v.parse().ok()).collect::<Vec<Flag>>();
        match op {
            Operation::AddFlags => self.add_flags(uid, &flags()),
            Operation::RemoveFlags => self.remove_flags(uid, &flags()),
            Operation::SetFlags => self.set_flags(uid, &flags()),
            Operation::AddGmailLabels => self.add_gmail_labels(uid, values),
            Operation::RemoveGmailLabels => self.remove_gmail_labels(uid, values),
            Operation::SetGmailLabels => self.set_gmail_labels(uid, values),
            other => Err(StoreError::UnsupportedOperation {
                operation: format!("{other} (takes no flag list)"),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use chrono::DateTime;

    fn session_with_message() -> (MemoryStore, RetrievalSession) {
        let store = MemoryStore::new();
        store.append(
            "INBOX",
            "Subject: hi\r\n\r\n",
            DateTime::parse_from_rfc3339("2026-02-01T08:00:00+00:00").unwrap(),
            vec![],
        );
        let session = RetrievalSession::new(store.clone());
        session.select_mailbox("INBOX").unwrap();
        (store, session)
    }

    #[test]
    fn every_allowed_name_resolves() {
        for op in Operation::ALL {
            assert_eq!(op.name().parse::<Operation>().unwrap(), op);
        }
    }

    #[test]
    fn names_off_the_allow_list_are_rejected() {
        for name in ["logout", "select_folder", "fetch", "expunge", "search"] {
            let err = name.parse::<Operation>().unwrap_err();
            assert!(matches!(err, StoreError::UnsupportedOperation { .. }));
        }
    }

    #[test]
    fn operations_run_under_uid_addressing() {
        let (store, session) = session_with_message();
        let gateway = session.gateway();
        assert_eq!(session.addressing(), AddressingMode::Positional);

        gateway.add_flags(1, &[Flag::Flagged]).unwrap();
        assert_eq!(session.addressing(), AddressingMode::Positional);

        let call = store.calls().pop().unwrap();
        assert_eq!(call.operation, "store_flags");
        assert_eq!(call.mode, Some(AddressingMode::StableId));
        assert_eq!(gateway.get_flags(1).unwrap(), vec![Flag::Flagged]);
    }

    #[test]
    fn folder_operations() {
        let (_store, session) = session_with_message();
        let gateway = session.gateway();
        assert!(!gateway.folder_exists("Archive").unwrap());
        gateway.create_folder("Archive").unwrap();
        assert!(gateway.folder_exists("Archive").unwrap());
        gateway.rename_folder("Archive", "Old").unwrap();
        assert_eq!(
            gateway.list_folders("", "*").unwrap(),
            vec!["INBOX".to_string(), "Old".to_string()]
        );
        gateway.delete_folder("Old").unwrap();
        assert_eq!(gateway.list_sub_folders("", "*").unwrap(), vec!["INBOX".to_string()]);
    }

    #[test]
    fn labels_round_through_the_store() {
        let (_store, session) = session_with_message();
        let gateway = session.gateway();
        gateway
            .add_gmail_labels(1, &["Receipts".to_string(), "2026".to_string()])
            .unwrap();
        gateway.remove_gmail_labels(1, &["2026".to_string()]).unwrap();
        assert_eq!(gateway.get_gmail_labels(1).unwrap(), vec!["Receipts".to_string()]);
    }

    #[test]
    fn store_by_name_checks_the_allow_list() {
        let (store, session) = session_with_message();
        let gateway = session.gateway();

        gateway
            .store_by_name("add_flags", 1, &["seen".to_string()])
            .unwrap();
        assert_eq!(store.messages("INBOX")[0].flags, vec![Flag::Seen]);

        assert!(matches!(
            gateway.store_by_name("logout", 1, &[]),
            Err(StoreError::UnsupportedOperation { .. })
        ));
        assert!(matches!(
            gateway.store_by_name("copy", 1, &[]),
            Err(StoreError::UnsupportedOperation { .. })
        ));
    }
}
