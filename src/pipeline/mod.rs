//! Rule evaluation pipeline.
//!
//! One run over a folder flows through:
//! 1. `RetrievalSession::scan_all()`: lazy, chunked scan of the folder
//! 2. `RuleEngine::process()`: first matching rule runs its actions
//! 3. Actions mutate through the `MutationGateway`
//!
//! An action failure is logged and the scan moves on to the next message.
//! A store failure while scanning or testing ends the run.

pub mod actions;
pub mod loader;
pub mod predicates;
pub mod rules;

use tracing::{error, info};

use crate::error::Error;
use crate::session::RetrievalSession;

use self::rules::{Outcome, RuleEngine};

/// Tally of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    /// Messages the rules were run against.
    pub scanned: u32,
    /// Messages a rule matched and fully processed.
    pub matched: u32,
    /// Messages whose actions stopped on an error.
    pub failed: u32,
}

/// Run `engine` over every message in the session's selected folder.
pub fn run_scan(session: &RetrievalSession, engine: &RuleEngine) -> crate::Result<ScanSummary> {
    let mut summary = ScanSummary::default();

    for message in session.scan_all()? {
        let message = message?;
        summary.scanned += 1;
        match engine.process(&message) {
            Ok(Outcome::Matched { .. }) => summary.matched += 1,
            Ok(Outcome::Unmatched) => {}
            Err(Error::Action(e)) => {
                summary.failed += 1;
                error!(uid = message.uid(), subject = %message.repr(), error = %e, "Action failed");
            }
            Err(e) => return Err(e),
        }
    }

    info!(
        scanned = summary.scanned,
        matched = summary.matched,
        failed = summary.failed,
        "Scan finished"
    );
    Ok(summary)
}
