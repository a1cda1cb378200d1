//! Retrieval session, the single point of contact with the mail store.
//!
//! Flow for one run:
//! 1. `select_mailbox()`: select the folder, remember its message count
//! 2. `scan_all()`: lazy, chunked, positional scan yielding `MessageView`s
//! 3. `MessageView` accessors call back into `fetch_part()` for parts the
//!    scan did not bring in, addressed by uid
//! 4. Actions mutate through the `MutationGateway`, always addressed by uid
//!
//! The session owns the addressing mode. Every change to it goes through a
//! `ModeGuard`, which restores the previous mode when dropped, so nested
//! scopes unwind in order on success, early return, and error alike.
//!
//! A session is `!Send`: the addressing mode is shared mutable
//! state and scoped changes are not safe across concurrent callers.

pub mod chunk;
pub mod gateway;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::rc::Rc;

use tracing::{debug, info, warn};

use crate::error::StoreError;
use crate::message::{MessageDescriptor, MessageView};
use crate::session::chunk::{ChunkPlan, ChunkRange, optimal_chunk_size, plan_chunks};
use crate::session::gateway::MutationGateway;
use crate::store::{AddressingMode, FetchItem, FetchedParts, MailStore};

/// Attempts made by `fetch_part` before an empty response is treated as an error.
///
/// Some servers intermittently answer a single-message uid fetch with no data.
/// The cause is undiagnosed; three attempts has been enough in practice.
pub const PART_FETCH_ATTEMPTS: u32 = 3;

struct SessionInner {
    store: RefCell<Box<dyn MailStore>>,
    mode: Cell<AddressingMode>,
    folder: RefCell<Option<String>>,
    total: Cell<Option<u32>>,
}

/// Handle to a mail store session. Clones share the same session.
#[derive(Clone)]
pub struct RetrievalSession {
    inner: Rc<SessionInner>,
}

impl RetrievalSession {
    /// Wrap a connected store. The session starts in positional addressing.
    pub fn new(store: impl MailStore + 'static) -> Self {
        Self {
            inner: Rc::new(SessionInner {
                store: RefCell::new(Box::new(store)),
                mode: Cell::new(AddressingMode::Positional),
                folder: RefCell::new(None),
                total: Cell::new(None),
            }),
        }
    }

    /// Current addressing mode.
    pub fn addressing(&self) -> AddressingMode {
        self.inner.mode.get()
    }

    /// Switch to `mode` until the returned guard is dropped.
    pub fn scoped(&self, mode: AddressingMode) -> ModeGuard {
        let previous = self.inner.mode.replace(mode);
        ModeGuard {
            inner: Rc::clone(&self.inner),
            previous,
        }
    }

    /// Capability surface handed to actions.
    pub fn gateway(&self) -> MutationGateway {
        MutationGateway::new(self.clone())
    }

    /// Name of the selected folder, if any.
    pub fn selected_folder(&self) -> Option<String> {
        self.inner.folder.borrow().clone()
    }

    /// Select `folder` and return how many messages it holds.
    pub fn select_mailbox(&self, folder: &str) -> Result<u32, StoreError> {
        let total = self
            .inner
            .store
            .borrow_mut()
            .select_folder(folder)
            .map_err(|e| match e {
                StoreError::FolderSelect { .. } => e,
                other => StoreError::FolderSelect {
                    folder: folder.to_string(),
                    reason: other.to_string(),
                },
            })?;
        *self.inner.folder.borrow_mut() = Some(folder.to_string());
        self.inner.total.set(Some(total));
        Ok(total)
    }

    /// Lazily scan every message in the selected folder.
    ///
    /// Nothing is fetched until the first call to `next()`. Each call to
    /// `scan_all` starts over and re-issues every request.
    pub fn scan_all(&self) -> Result<Scan, StoreError> {
        let total = self.inner.total.get().ok_or(StoreError::NoMailboxSelected)?;
        Ok(self.scan_with_chunk_size(total, optimal_chunk_size(total)))
    }

    /// `scan_all` with an explicit chunk size.
    pub fn scan_with_chunk_size(&self, total: u32, chunk_size: u32) -> Scan {
        let folder = self.selected_folder().unwrap_or_default();
        info!(folder = %folder, total, chunk_size, "Scanning folder");
        Scan {
            session: self.clone(),
            plan: plan_chunks(total, chunk_size),
            pending: VecDeque::new(),
            mode: None,
            total,
            yielded: 0,
            done: false,
        }
    }

    /// Run `f` against the store under the current addressing mode.
    pub(crate) fn with_store<T>(
        &self,
        f: impl FnOnce(&mut dyn MailStore, AddressingMode) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mode = self.addressing();
        let mut store = self.inner.store.borrow_mut();
        f(store.as_mut(), mode)
    }

    /// Make sure `item` is present in `descriptor`, fetching it by uid if not.
    pub fn fetch_part(
        &self,
        descriptor: &MessageDescriptor,
        item: FetchItem,
    ) -> Result<(), StoreError> {
        if descriptor.is_fetched(item.cache_key()) {
            return Ok(());
        }

        let _uid_mode = self.scoped(AddressingMode::StableId);
        let uid = descriptor.uid();
        let range = ChunkRange::Single(uid);

        for attempt in 1..=PART_FETCH_ATTEMPTS {
            let mut data = self.with_store(|store, mode| store.fetch(mode, &range, &[item]))?;
            if data.is_empty() {
                warn!(uid, item = %item, attempt, "Empty fetch response, retrying");
                continue;
            }
            let parts = data
                .remove(&uid)
                .ok_or_else(|| StoreError::ProtocolInconsistency {
                    uid,
                    detail: format!(
                        "server answered for {:?} instead",
                        data.keys().collect::<Vec<_>>()
                    ),
                })?;
            descriptor.merge(parts);
            if !descriptor.is_fetched(item.cache_key()) {
                return Err(StoreError::ProtocolInconsistency {
                    uid,
                    detail: format!("server omitted {item}"),
                });
            }
            debug!(uid, item = %item, "Fetched message part");
            return Ok(());
        }

        Err(StoreError::ProtocolInconsistency {
            uid,
            detail: format!("no data for {item} after {PART_FETCH_ATTEMPTS} attempts"),
        })
    }
}

/// Scoped addressing-mode change. Restores the previous mode on drop.
#[must_use = "the addressing mode reverts as soon as the guard is dropped"]
pub struct ModeGuard {
    inner: Rc<SessionInner>,
    previous: AddressingMode,
}

impl ModeGuard {
    /// Mode that will be restored.
    pub fn previous(&self) -> AddressingMode {
        self.previous
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        self.inner.mode.set(self.previous);
    }
}

// ── Scan ────────────────────────────────────────────────────────────

/// Lazy, one-shot scan over a folder.
///
/// Holds positional addressing from the first `next()` until the scan is
/// dropped. Yields an error at most once, then ends.
pub struct Scan {
    session: RetrievalSession,
    plan: ChunkPlan,
    pending: VecDeque<FetchedParts>,
    mode: Option<ModeGuard>,
    total: u32,
    yielded: u32,
    done: bool,
}

impl Scan {
    fn fetch_next_chunk(&mut self) -> Result<bool, StoreError> {
        let Some(chunk) = self.plan.next() else {
            return Ok(false);
        };
        info!(chunk = %chunk, "Fetching chunk");
        let data = self
            .session
            .with_store(|store, mode| store.fetch(mode, &chunk, &FetchItem::SCAN))?;
        self.pending.extend(data.into_values());
        Ok(true)
    }
}

impl Iterator for Scan {
    type Item = Result<MessageView, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if self.mode.is_none() {
            self.mode = Some(self.session.scoped(AddressingMode::Positional));
        }

        while self.pending.is_empty() {
            match self.fetch_next_chunk() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    self.mode = None;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    self.mode = None;
                    return Some(Err(e));
                }
            }
        }

        let parts = self.pending.pop_front()?;
        debug!(index = self.yielded, total = self.total, "Processing message");
        self.yielded += 1;
        Some(
            MessageDescriptor::from_parts(parts)
                .map(|descriptor| MessageView::new(self.session.clone(), descriptor)),
        )
    }
}
