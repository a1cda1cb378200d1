//! `MailStore` over a live IMAP session.
//!
//! Blocking. Callers on an async runtime run the whole filtering pass inside
//! `tokio::task::spawn_blocking`.

use std::collections::HashMap;

use imap::{ClientBuilder, ConnectionMode};
use secrecy::ExposeSecret;
use tracing::{debug, info};

use crate::config::Credentials;
use crate::error::StoreError;
use crate::session::chunk::ChunkRange;
use crate::store::{
    AddressingMode, FetchItem, FetchResponse, FetchedParts, Flag, FlagChange, MailStore,
};

type Session = imap::Session<imap::Connection>;

/// A logged-in IMAP session.
pub struct ImapStore {
    session: Session,
    host: String,
}

fn backend(e: imap::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn convert_flag(flag: &imap::types::Flag<'_>) -> Flag {
    use imap::types::Flag as Imap;
    match flag {
        Imap::Seen => Flag::Seen,
        Imap::Answered => Flag::Answered,
        Imap::Flagged => Flag::Flagged,
        Imap::Deleted => Flag::Deleted,
        Imap::Draft => Flag::Draft,
        Imap::Recent => Flag::Recent,
        Imap::MayCreate => Flag::Custom("\\*".into()),
        Imap::Custom(name) => Flag::Custom(name.to_string()),
        _ => Flag::Custom(format!("{flag:?}")),
    }
}

/// `FLAGS` / `X-GM-LABELS` store command for a change.
fn store_query(attribute: &str, change: FlagChange, values: &[String]) -> String {
    let sign = match change {
        FlagChange::Add => "+",
        FlagChange::Remove => "-",
        FlagChange::Set => "",
    };
    format!("{sign}{attribute}.SILENT ({})", values.join(" "))
}

fn quote(label: &str) -> String {
    format!("\"{}\"", label.replace('\\', "\\\\").replace('"', "\\\""))
}

impl ImapStore {
    /// Connect and log in.
    pub fn connect(credentials: &Credentials) -> Result<Self, StoreError> {
        let connectivity = |reason: String| StoreError::Connectivity {
            host: credentials.host.clone(),
            reason,
        };
        let mode = if credentials.use_ssl {
            ConnectionMode::Tls
        } else {
            ConnectionMode::Plaintext
        };
        let client = ClientBuilder::new(credentials.host.as_str(), credentials.port)
            .tls_kind(imap::TlsKind::Native)
            .mode(mode)
            .connect()
            .map_err(|e| connectivity(e.to_string()))?;
        let session = client
            .login(&credentials.username, credentials.password.expose_secret())
            .map_err(|e| connectivity(e.0.to_string()))?;
        info!(host = %credentials.host, user = %credentials.username, "Logged in");
        Ok(Self {
            session,
            host: credentials.host.clone(),
        })
    }

    fn query(items: &[FetchItem]) -> String {
        let names: Vec<&str> = items.iter().map(|item| item.as_imap()).collect();
        format!("({})", names.join(" "))
    }
}

impl Drop for ImapStore {
    fn drop(&mut self) {
        if let Err(e) = self.session.logout() {
            debug!(host = %self.host, error = %e, "Logout failed");
        }
    }
}

impl MailStore for ImapStore {
    fn select_folder(&mut self, folder: &str) -> Result<u32, StoreError> {
        let mailbox = self
            .session
            .select(folder)
            .map_err(|e| StoreError::FolderSelect {
                folder: folder.to_string(),
                reason: e.to_string(),
            })?;
        Ok(mailbox.exists)
    }

    fn fetch(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        items: &[FetchItem],
    ) -> Result<FetchResponse, StoreError> {
        let query = Self::query(items);
        let fetches = match mode {
            AddressingMode::Positional => self.session.fetch(range.to_string(), &query),
            AddressingMode::StableId => self.session.uid_fetch(range.to_string(), &query),
        }
        .map_err(backend)?;

        let mut response = FetchResponse::new();
        for fetch in fetches.iter() {
            let key = match mode {
                AddressingMode::Positional => fetch.message,
                AddressingMode::StableId => match fetch.uid {
                    Some(uid) => uid,
                    None => continue,
                },
            };
            let mut parts = FetchedParts {
                uid: fetch.uid,
                ..Default::default()
            };
            for item in items {
                match item.cache_key() {
                    FetchItem::Uid => {}
                    FetchItem::Header | FetchItem::HeaderPeek => {
                        parts.header = fetch.header().map(<[u8]>::to_vec);
                    }
                    FetchItem::InternalDate => parts.internal_date = fetch.internal_date(),
                    FetchItem::Flags => {
                        parts.flags = Some(fetch.flags().iter().map(convert_flag).collect());
                    }
                }
            }
            response.insert(key, parts);
        }
        Ok(response)
    }

    fn copy(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        folder: &str,
    ) -> Result<(), StoreError> {
        match mode {
            AddressingMode::Positional => self.session.copy(range.to_string(), folder),
            AddressingMode::StableId => self.session.uid_copy(range.to_string(), folder),
        }
        .map_err(backend)
    }

    fn delete_messages(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<(), StoreError> {
        self.store_flags(mode, range, FlagChange::Add, &[Flag::Deleted])
    }

    fn get_flags(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<HashMap<u32, Vec<Flag>>, StoreError> {
        let response = self.fetch(mode, range, &[FetchItem::Flags])?;
        Ok(response
            .into_iter()
            .map(|(key, parts)| (key, parts.flags.unwrap_or_default()))
            .collect())
    }

    fn store_flags(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        change: FlagChange,
        flags: &[Flag],
    ) -> Result<(), StoreError> {
        let names: Vec<String> = flags.iter().map(Flag::to_string).collect();
        let query = store_query("FLAGS", change, &names);
        match mode {
            AddressingMode::Positional => self.session.store(range.to_string(), &query),
            AddressingMode::StableId => self.session.uid_store(range.to_string(), &query),
        }
        .map(|_| ())
        .map_err(backend)
    }

    fn get_labels(
        &mut self,
        _mode: AddressingMode,
        _range: &ChunkRange,
    ) -> Result<HashMap<u32, Vec<String>>, StoreError> {
        // TODO: parse X-GM-LABELS from fetch responses once the imap crate exposes them.
        Err(StoreError::Backend(
            "reading Gmail labels is not supported by this server connection".into(),
        ))
    }

    fn store_labels(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        change: FlagChange,
        labels: &[String],
    ) -> Result<(), StoreError> {
        let quoted: Vec<String> = labels.iter().map(|l| quote(l)).collect();
        let query = store_query("X-GM-LABELS", change, &quoted);
        match mode {
            AddressingMode::Positional => self.session.store(range.to_string(), &query),
            AddressingMode::StableId => self.session.uid_store(range.to_string(), &query),
        }
        .map(|_| ())
        .map_err(backend)
    }

    fn folder_exists(&mut self, folder: &str) -> Result<bool, StoreError> {
        let names = self.session.list(Some(""), Some(folder)).map_err(backend)?;
        Ok(!names.is_empty())
    }

    fn create_folder(&mut self, folder: &str) -> Result<(), StoreError> {
        self.session.create(folder).map_err(backend)
    }

    fn delete_folder(&mut self, folder: &str) -> Result<(), StoreError> {
        self.session.delete(folder).map_err(backend)
    }

    fn rename_folder(&mut self, from: &str, to: &str) -> Result<(), StoreError> {
        self.session.rename(from, to).map_err(backend)
    }

    fn list_folders(&mut self, directory: &str, pattern: &str) -> Result<Vec<String>, StoreError> {
        let names = self
            .session
            .list(Some(directory), Some(pattern))
            .map_err(backend)?;
        Ok(names.iter().map(|name| name.name().to_string()).collect())
    }

    fn list_subscribed_folders(
        &mut self,
        directory: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError> {
        let names = self
            .session
            .lsub(Some(directory), Some(pattern))
            .map_err(backend)?;
        Ok(names.iter().map(|name| name.name().to_string()).collect())
    }
}
