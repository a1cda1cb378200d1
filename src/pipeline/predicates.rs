//! Message tests.
//!
//! Every predicate answers one question about a `MessageView`. Answering may
//! trigger a lazy fetch, which is why `matches` returns a `Result`. Composite
//! predicates evaluate left to right and short-circuit, so evaluation order
//! decides which parts get fetched but never the answer.

use std::fmt;
use std::sync::Arc;

use caseless::default_case_fold_str;
use chrono::{DateTime, Duration, Utc};
use regex::Regex;
use unicode_normalization::UnicodeNormalization;

use crate::error::StoreError;
use crate::message::MessageView;
use crate::store::Flag;

/// A test run against a message. New variants only need to implement this.
pub trait Predicate: fmt::Debug {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError>;
}

/// Boxed predicate as stored in rules.
pub type BoxPredicate = Box<dyn Predicate>;

// ── Clock ───────────────────────────────────────────────────────────

/// Source of "now" for time-based predicates.
pub trait Clock: fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock stopped at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub DateTime<Utc>);

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        self.0
    }
}

// ── Composites ──────────────────────────────────────────────────────

/// True when every sub-predicate is true. An empty `And` never matches.
#[derive(Debug, Default)]
pub struct And(pub Vec<BoxPredicate>);

impl Predicate for And {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        if self.0.is_empty() {
            return Ok(false);
        }
        for test in &self.0 {
            if !test.matches(message)? {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

/// True when any sub-predicate is true. An empty `Or` never matches.
#[derive(Debug, Default)]
pub struct Or(pub Vec<BoxPredicate>);

impl Predicate for Or {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        for test in &self.0 {
            if test.matches(message)? {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[derive(Debug)]
pub struct Not(pub BoxPredicate);

impl Predicate for Not {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        Ok(!self.0.matches(message)?)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Always;

impl Predicate for Always {
    fn matches(&self, _message: &MessageView) -> Result<bool, StoreError> {
        Ok(true)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Never;

impl Predicate for Never {
    fn matches(&self, _message: &MessageView) -> Result<bool, StoreError> {
        Ok(false)
    }
}

// ── Header tests ────────────────────────────────────────────────────

/// Header `name` is present and, when `value` is given, equal to it.
///
/// An empty `value` is treated like no value: presence alone matches.
#[derive(Debug, Clone)]
pub struct MatchesHeader {
    pub name: String,
    pub value: Option<String>,
}

impl MatchesHeader {
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    pub fn equals(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: Some(value.into()),
        }
    }
}

impl Predicate for MatchesHeader {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        let expected = self.value.as_deref().filter(|v| !v.is_empty());
        Ok(match (message.headers()?.get(&self.name), expected) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
        })
    }
}

/// Header `name` is present and its value matches a regex.
#[derive(Debug, Clone)]
pub struct HeaderMatches {
    pub name: String,
    pub pattern: Regex,
}

impl HeaderMatches {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            name: name.into(),
            pattern: Regex::new(pattern)?,
        })
    }
}

impl Predicate for HeaderMatches {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        Ok(message
            .headers()?
            .get(&self.name)
            .is_some_and(|value| self.pattern.is_match(&value)))
    }
}

/// Substring test on the decoded subject.
///
/// Case-insensitive matching applies NFKD and then full Unicode case folding
/// to both sides, so `"Buße"` finds `"BUSSE"`.
#[derive(Debug, Clone)]
pub struct SubjectContains {
    text: String,
    case_sensitive: bool,
    folded: String,
}

impl SubjectContains {
    pub fn new(text: impl Into<String>, case_sensitive: bool) -> Self {
        let text = text.into();
        let folded = fold(&text);
        Self {
            text,
            case_sensitive,
            folded,
        }
    }

    pub fn case_sensitive(text: impl Into<String>) -> Self {
        Self::new(text, true)
    }

    pub fn case_insensitive(text: impl Into<String>) -> Self {
        Self::new(text, false)
    }
}

fn fold(text: &str) -> String {
    default_case_fold_str(&text.nfkd().collect::<String>())
}

impl Predicate for SubjectContains {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        let Some(subject) = message.subject()? else {
            return Ok(false);
        };
        Ok(if self.case_sensitive {
            subject.contains(&self.text)
        } else {
            fold(&subject).contains(&self.folded)
        })
    }
}

/// Message belongs to the mailing list with this identifier.
#[derive(Debug, Clone)]
pub struct ListId(pub String);

impl Predicate for ListId {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        Ok(message.list_id()?.is_some_and(|id| id == self.0))
    }
}

// ── State tests ─────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct HasFlag(pub Flag);

impl HasFlag {
    pub fn answered() -> Self {
        Self(Flag::Answered)
    }

    pub fn deleted() -> Self {
        Self(Flag::Deleted)
    }

    pub fn draft() -> Self {
        Self(Flag::Draft)
    }

    pub fn flagged() -> Self {
        Self(Flag::Flagged)
    }

    pub fn recent() -> Self {
        Self(Flag::Recent)
    }

    pub fn seen() -> Self {
        Self(Flag::Seen)
    }
}

impl Predicate for HasFlag {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        Ok(message.flags()?.contains(&self.0))
    }
}

/// Arrived more than `age` before now.
#[derive(Debug, Clone)]
pub struct MessageOlderThan {
    age: Duration,
    clock: Arc<dyn Clock + Send + Sync>,
}

impl MessageOlderThan {
    pub fn new(age: Duration) -> Self {
        Self::with_clock(age, Arc::new(SystemClock))
    }

    pub fn with_clock(age: Duration, clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { age, clock }
    }

    pub fn age(&self) -> Duration {
        self.age
    }
}

impl Predicate for MessageOlderThan {
    fn matches(&self, message: &MessageView) -> Result<bool, StoreError> {
        let arrived = message.date()?.with_timezone(&Utc);
        // An age too large to add to the arrival date never elapses.
        Ok(arrived
            .checked_add_signed(self.age)
            .is_some_and(|expires| expires < self.clock.now()))
    }
}
