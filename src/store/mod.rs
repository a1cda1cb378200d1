//! Mail store abstraction: the stateful mailbox protocol the pipeline consumes.
//!
//! The pipeline never speaks a wire protocol itself. It talks to a `MailStore`,
//! which exposes folder selection, batch fetch, and the small set of mutating
//! operations actions are allowed to use. Every message-addressing call takes
//! the `AddressingMode` it must be interpreted under.

pub mod imap;
pub mod memory;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};

use crate::error::StoreError;
use crate::session::chunk::ChunkRange;

pub use self::imap::ImapStore;
pub use self::memory::MemoryStore;

// ── Addressing ──────────────────────────────────────────────────────

/// How message numbers in a request are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressingMode {
    /// Transient sequence numbers, valid for the current selection only.
    Positional,
    /// Unique ids, stable across sessions.
    StableId,
}

impl fmt::Display for AddressingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Positional => f.write_str("positional"),
            Self::StableId => f.write_str("uid"),
        }
    }
}

// ── Fetch items ─────────────────────────────────────────────────────

/// A named, independently fetchable part of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FetchItem {
    Uid,
    /// Header block, read by marking the message seen.
    Header,
    /// Header block, read without marking the message seen.
    HeaderPeek,
    InternalDate,
    Flags,
}

impl FetchItem {
    /// Items requested for every message during a bulk scan.
    pub const SCAN: [FetchItem; 4] = [
        FetchItem::Uid,
        FetchItem::HeaderPeek,
        FetchItem::InternalDate,
        FetchItem::Flags,
    ];

    /// The item a response for this request is filed under.
    ///
    /// A peek returns the same data as the plain part, so both share one slot.
    pub fn cache_key(self) -> FetchItem {
        match self {
            Self::HeaderPeek => Self::Header,
            other => other,
        }
    }

    /// IMAP fetch attribute name.
    pub fn as_imap(self) -> &'static str {
        match self {
            Self::Uid => "UID",
            Self::Header => "BODY[HEADER]",
            Self::HeaderPeek => "BODY.PEEK[HEADER]",
            Self::InternalDate => "INTERNALDATE",
            Self::Flags => "FLAGS",
        }
    }
}

impl fmt::Display for FetchItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap())
    }
}

/// Parts of one message returned by a fetch. Unrequested parts stay `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchedParts {
    pub uid: Option<u32>,
    pub header: Option<Vec<u8>>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub flags: Option<Vec<Flag>>,
}

/// Fetch response keyed by message number (sequence number or uid, per the
/// request's addressing). Iteration order carries no meaning.
pub type FetchResponse = HashMap<u32, FetchedParts>;

// ── Flags ───────────────────────────────────────────────────────────

/// A message flag.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Flag {
    Answered,
    Deleted,
    Draft,
    Flagged,
    Recent,
    Seen,
    /// Keyword or server-specific flag, stored verbatim.
    Custom(String),
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Answered => f.write_str("\\Answered"),
            Self::Deleted => f.write_str("\\Deleted"),
            Self::Draft => f.write_str("\\Draft"),
            Self::Flagged => f.write_str("\\Flagged"),
            Self::Recent => f.write_str("\\Recent"),
            Self::Seen => f.write_str("\\Seen"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

impl FromStr for Flag {
    type Err = std::convert::Infallible;

    /// Accepts system flags with or without the leading backslash, in any case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bare = s.strip_prefix('\\').unwrap_or(s);
        let flag = match bare.to_ascii_lowercase().as_str() {
            "answered" => Self::Answered,
            "deleted" => Self::Deleted,
            "draft" => Self::Draft,
            "flagged" => Self::Flagged,
            "recent" => Self::Recent,
            "seen" => Self::Seen,
            _ => Self::Custom(s.to_string()),
        };
        Ok(flag)
    }
}

/// How a flag or label list is applied to a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagChange {
    Add,
    Remove,
    Set,
}

// ── Store trait ─────────────────────────────────────────────────────

/// A selected-folder session against a remote mail store.
///
/// Implementations are single-threaded and stateful: `select_folder` changes
/// which folder later calls refer to.
pub trait MailStore {
    /// Select a folder, returning how many messages it holds.
    fn select_folder(&mut self, folder: &str) -> Result<u32, StoreError>;

    /// Fetch `items` for every message in `range`.
    fn fetch(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        items: &[FetchItem],
    ) -> Result<FetchResponse, StoreError>;

    /// Copy messages into `folder`.
    fn copy(&mut self, mode: AddressingMode, range: &ChunkRange, folder: &str)
    -> Result<(), StoreError>;

    /// Mark messages deleted.
    fn delete_messages(&mut self, mode: AddressingMode, range: &ChunkRange)
    -> Result<(), StoreError>;

    fn get_flags(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<HashMap<u32, Vec<Flag>>, StoreError>;

    fn store_flags(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        change: FlagChange,
        flags: &[Flag],
    ) -> Result<(), StoreError>;

    /// Gmail labels (`X-GM-LABELS`).
    fn get_labels(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
    ) -> Result<HashMap<u32, Vec<String>>, StoreError>;

    fn store_labels(
        &mut self,
        mode: AddressingMode,
        range: &ChunkRange,
        change: FlagChange,
        labels: &[String],
    ) -> Result<(), StoreError>;

    fn folder_exists(&mut self, folder: &str) -> Result<bool, StoreError>;

    fn create_folder(&mut self, folder: &str) -> Result<(), StoreError>;

    fn delete_folder(&mut self, folder: &str) -> Result<(), StoreError>;

    fn rename_folder(&mut self, from: &str, to: &str) -> Result<(), StoreError>;

    /// Folders under `directory` matching `pattern` (IMAP LIST wildcards).
    fn list_folders(&mut self, directory: &str, pattern: &str) -> Result<Vec<String>, StoreError>;

    /// Subscribed folders under `directory` matching `pattern` (IMAP LSUB).
    fn list_subscribed_folders(
        &mut self,
        directory: &str,
        pattern: &str,
    ) -> Result<Vec<String>, StoreError>;
}
