//! Rules file loading.
//!
//! The rules file is TOML with a top-level `rules` array. Each entry is either
//! a table with `test` and `actions` keys, or an array whose first item is the
//! test and whose remaining items are actions:
//!
//! ```toml
//! [[rules]]
//! name = "newsletters"
//! test = { list_id = "news.example.com" }
//! actions = [{ move = "Lists/News" }]
//! ```
//!
//! or, in the array form:
//!
//! ```toml
//! rules = [[{ has_flag = "deleted" }, "delete"]]
//! ```
//!
//! Everything is validated here, before any connection is made.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Duration;
use serde::Deserialize;
use toml::{Table, Value};
use tracing::info;

use crate::error::RuleLoadError;
use crate::pipeline::actions::{BoxAction, DeleteMessage, LogMessage, Move, StoreFlags};
use crate::pipeline::predicates::{
    Always, And, BoxPredicate, Clock, HasFlag, HeaderMatches, ListId, MatchesHeader,
    MessageOlderThan, Never, Not, Or, SubjectContains, SystemClock,
};
use crate::pipeline::rules::{Rule, RuleSet};

/// File name of the rules file inside the configuration directory.
pub const RULES_FILE_NAME: &str = "rules.toml";

/// Written when no rules file exists yet.
pub const DEFAULT_RULES: &str = r#"# Sample mailsift rules file. Edit this file to set up your filtering rules.
#
# Rules are tried in order for every message. The first rule whose test
# matches has all of its actions run, and no later rule is looked at.
#
# Tests:
#   "always", "never"
#   { and = [...] }, { or = [...] }, { not = <test> }
#   { header = { name = "X-Launchpad-Message-Rationale", value = "subscriber" } }  (an empty value only checks presence)
#   { header_matches = { name = "From", pattern = "@example\\.com>$" } }
#   { subject_contains = { text = "invoice", case_sensitive = false } }
#   { list_id = "list.example.com" }
#   { has_flag = "seen" }
#   { older_than = "30d" }  or  { older_than = { days = 1, hours = 12 } }
#
# Actions:
#   "delete"
#   { move = "Folder/Name" }
#   { log = "matched {}" }   ({} is the quoted subject; {uid}, {subject}, {from} also work)
#   { store = { op = "add_flags", flags = ["\\Seen"] } }

[[rules]]
name = "test email"
test = { subject_contains = { text = "test email" } }
actions = [{ move = "Junk" }]
"#;

// ── Definitions ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum PredicateDef {
    And(Vec<PredicateDef>),
    Or(Vec<PredicateDef>),
    Not(Box<PredicateDef>),
    Header {
        name: String,
        #[serde(default)]
        value: Option<String>,
    },
    HeaderMatches {
        name: String,
        pattern: String,
    },
    SubjectContains {
        text: String,
        #[serde(default)]
        case_sensitive: bool,
    },
    ListId(String),
    HasFlag(String),
    OlderThan(AgeDef),
    Always,
    Never,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AgeDef {
    Text(String),
    Parts {
        #[serde(default)]
        days: i64,
        #[serde(default)]
        hours: i64,
        #[serde(default)]
        minutes: i64,
        #[serde(default)]
        seconds: i64,
    },
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "snake_case", deny_unknown_fields)]
enum ActionDef {
    Move(String),
    Delete,
    Log(String),
    Store { op: String, flags: Vec<String> },
}

// ── Loading ─────────────────────────────────────────────────────────

/// Builds `RuleSet`s from rules files.
#[derive(Debug, Clone)]
pub struct RuleLoader {
    clock: Arc<dyn Clock + Send + Sync>,
}

impl Default for RuleLoader {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl RuleLoader {
    /// Loader whose time-based tests read "now" from `clock`.
    pub fn new(clock: Arc<dyn Clock + Send + Sync>) -> Self {
        Self { clock }
    }

    /// Load the rules file at `path`.
    ///
    /// A missing file is replaced by `DEFAULT_RULES` and reported as
    /// `RuleLoadError::NotFound`, so the user gets a chance to edit it first.
    pub fn load(&self, path: &Path) -> Result<RuleSet, RuleLoadError> {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                write_default_rules_file(path)?;
                return Err(RuleLoadError::NotFound {
                    path: path.to_path_buf(),
                });
            }
            Err(e) => return Err(e.into()),
        };
        let rules = self.parse(&text, path)?;
        info!(path = %path.display(), rules = rules.len(), "Loaded rules");
        Ok(rules)
    }

    /// Parse rules from TOML text. `origin` is only used in error messages.
    pub fn parse(&self, text: &str, origin: &Path) -> Result<RuleSet, RuleLoadError> {
        let document: Table = text.parse().map_err(|e: toml::de::Error| RuleLoadError::Parse {
            path: origin.to_path_buf(),
            reason: e.to_string(),
        })?;
        let entries = match document.get("rules") {
            None => return Err(RuleLoadError::MissingRules),
            Some(Value::Array(entries)) => entries,
            Some(_) => return Err(RuleLoadError::RulesNotIterable),
        };

        let mut rules = Vec::with_capacity(entries.len());
        for (index, entry) in entries.iter().enumerate() {
            rules.push(self.rule(index, entry)?);
        }
        Ok(RuleSet::new(rules))
    }

    fn rule(&self, index: usize, entry: &Value) -> Result<Rule, RuleLoadError> {
        let fallback = format!("#{}", index + 1);
        let invalid = |rule: &str, reason: &str| RuleLoadError::InvalidRule {
            rule: rule.to_string(),
            reason: reason.to_string(),
        };

        let (name, test, actions): (String, &Value, Vec<&Value>) = match entry {
            Value::Table(table) => {
                let name = table
                    .get("name")
                    .and_then(Value::as_str)
                    .map_or(fallback, str::to_string);
                let test = table
                    .get("test")
                    .ok_or_else(|| invalid(&name, "has no 'test'"))?;
                let actions = match table.get("actions") {
                    Some(Value::Array(actions)) => actions.iter().collect(),
                    Some(_) => return Err(invalid(&name, "'actions' must be an array")),
                    None => return Err(invalid(&name, "has no 'actions'")),
                };
                (name, test, actions)
            }
            Value::Array(items) if items.len() >= 2 => {
                (fallback, &items[0], items[1..].iter().collect())
            }
            Value::Array(_) => {
                return Err(invalid(&fallback, "must be an array with at least two items"));
            }
            _ => return Err(invalid(&fallback, "must be a table or an array")),
        };

        let test = test
            .clone()
            .try_into::<PredicateDef>()
            .map_err(|e| RuleLoadError::InvalidTest {
                rule: name.clone(),
                reason: e.to_string(),
            })
            .and_then(|def| {
                self.predicate(def).map_err(|reason| RuleLoadError::InvalidTest {
                    rule: name.clone(),
                    reason,
                })
            })?;

        let actions = actions
            .into_iter()
            .map(|value| {
                value
                    .clone()
                    .try_into::<ActionDef>()
                    .map(build_action)
                    .map_err(|e| RuleLoadError::InvalidAction {
                        rule: name.clone(),
                        reason: e.to_string(),
                    })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Rule::new(name, test, actions)
    }

    fn predicate(&self, def: PredicateDef) -> Result<BoxPredicate, String> {
        let all = |defs: Vec<PredicateDef>| {
            defs.into_iter()
                .map(|d| self.predicate(d))
                .collect::<Result<Vec<_>, _>>()
        };
        let predicate: BoxPredicate = match def {
            PredicateDef::And(defs) => Box::new(And(all(defs)?)),
            PredicateDef::Or(defs) => Box::new(Or(all(defs)?)),
            PredicateDef::Not(def) => Box::new(Not(self.predicate(*def)?)),
            PredicateDef::Header { name, value } => Box::new(MatchesHeader { name, value }),
            PredicateDef::HeaderMatches { name, pattern } => Box::new(
                HeaderMatches::new(name, &pattern).map_err(|e| format!("bad pattern: {e}"))?,
            ),
            PredicateDef::SubjectContains {
                text,
                case_sensitive,
            } => Box::new(SubjectContains::new(text, case_sensitive)),
            PredicateDef::ListId(id) => Box::new(ListId(id)),
            PredicateDef::HasFlag(flag) => {
                Box::new(HasFlag(flag.parse().unwrap_or_else(|never| match never {})))
            }
            PredicateDef::OlderThan(age) => Box::new(MessageOlderThan::with_clock(
                parse_age(&age)?,
                Arc::clone(&self.clock),
            )),
            PredicateDef::Always => Box::new(Always),
            PredicateDef::Never => Box::new(Never),
        };
        Ok(predicate)
    }
}

fn build_action(def: ActionDef) -> BoxAction {
    match def {
        ActionDef::Move(folder) => Box::new(Move::new(folder)),
        ActionDef::Delete => Box::new(DeleteMessage),
        ActionDef::Log(template) => Box::new(LogMessage::new(template)),
        ActionDef::Store { op, flags } => Box::new(StoreFlags::new(op, flags)),
    }
}

/// Parse an age such as `"7d"`, `"1d12h"` or `"90m"`.
///
/// Ages that do not fit in a `Duration` are rejected.
fn parse_age(def: &AgeDef) -> Result<Duration, String> {
    let too_large = || "age is too large".to_string();
    let age = match def {
        AgeDef::Parts {
            days,
            hours,
            minutes,
            seconds,
        } => [
            Duration::try_days(*days),
            Duration::try_hours(*hours),
            Duration::try_minutes(*minutes),
            Duration::try_seconds(*seconds),
        ]
        .into_iter()
        .try_fold(Duration::zero(), |total, part| total.checked_add(&part?))
        .ok_or_else(too_large)?,
        AgeDef::Text(text) => {
            let mut total = Duration::zero();
            let mut digits = String::new();
            for c in text.trim().chars() {
                if c.is_ascii_digit() {
                    digits.push(c);
                    continue;
                }
                if digits.is_empty() {
                    return Err(format!("bad age '{text}': expected a number before '{c}'"));
                }
                let n: i64 = digits.parse().map_err(|_| too_large())?;
                digits.clear();
                let part = match c {
                    'w' => Duration::try_weeks(n),
                    'd' => Duration::try_days(n),
                    'h' => Duration::try_hours(n),
                    'm' => Duration::try_minutes(n),
                    's' => Duration::try_seconds(n),
                    _ => return Err(format!("bad age '{text}': unknown unit '{c}'")),
                };
                total = part
                    .and_then(|part| total.checked_add(&part))
                    .ok_or_else(too_large)?;
            }
            if !digits.is_empty() || text.trim().is_empty() {
                return Err(format!("bad age '{text}': expected e.g. 7d, 12h, 1d6h"));
            }
            total
        }
    };
    if age < Duration::zero() {
        return Err("age must not be negative".into());
    }
    Ok(age)
}

/// Rules file path inside `config_dir`.
pub fn rules_path_in(config_dir: &Path) -> PathBuf {
    config_dir.join(RULES_FILE_NAME)
}

/// Write `DEFAULT_RULES` to `path`, creating parent directories.
pub fn write_default_rules_file(path: &Path) -> Result<(), RuleLoadError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, DEFAULT_RULES)?;
    info!(path = %path.display(), "Wrote default rules file");
    Ok(())
}
