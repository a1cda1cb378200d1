//! Ordered rules and the first-match-wins engine.
//!
//! For each message the engine walks the rules in declared order. The first
//! rule whose test matches has all of its actions run in order, and nothing
//! after it is looked at. A message no rule matches is left untouched.

use tracing::debug;

use crate::error::{Error, RuleLoadError};
use crate::message::MessageView;
use crate::pipeline::actions::BoxAction;
use crate::pipeline::predicates::BoxPredicate;
use crate::session::gateway::MutationGateway;

/// A test and the actions to run when it matches.
#[derive(Debug)]
pub struct Rule {
    name: String,
    test: BoxPredicate,
    actions: Vec<BoxAction>,
}

impl Rule {
    /// Build a rule. A rule must carry at least one action.
    pub fn new(
        name: impl Into<String>,
        test: BoxPredicate,
        actions: Vec<BoxAction>,
    ) -> Result<Self, RuleLoadError> {
        let name = name.into();
        if actions.is_empty() {
            return Err(RuleLoadError::InvalidRule {
                rule: name,
                reason: "must have a test and at least one action".into(),
            });
        }
        Ok(Self {
            name,
            test,
            actions,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn test(&self) -> &BoxPredicate {
        &self.test
    }

    pub fn actions(&self) -> &[BoxAction] {
        &self.actions
    }
}

/// Rules in evaluation order.
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Rule> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl<'a> IntoIterator for &'a RuleSet {
    type Item = &'a Rule;
    type IntoIter = std::slice::Iter<'a, Rule>;

    fn into_iter(self) -> Self::IntoIter {
        self.rules.iter()
    }
}

/// What happened to one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// No rule matched; the message was left alone.
    Unmatched,
    /// Rule `rule` (by position) matched and all of its actions ran.
    Matched { rule: usize, name: String },
}

/// Applies a `RuleSet` to messages.
pub struct RuleEngine {
    rules: RuleSet,
    gateway: MutationGateway,
}

impl RuleEngine {
    pub fn new(rules: RuleSet, gateway: MutationGateway) -> Self {
        Self { rules, gateway }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Run the first matching rule against `message`.
    ///
    /// A store error while testing comes back as `Error::Store`. An action
    /// failure stops the rule's remaining actions and comes back as
    /// `Error::Action`.
    pub fn process(&self, message: &MessageView) -> crate::Result<Outcome> {
        for (index, rule) in self.rules.iter().enumerate() {
            if !rule.test.matches(message)? {
                continue;
            }
            debug!(uid = message.uid(), rule = %rule.name, "Rule matched");
            for action in &rule.actions {
                debug!(uid = message.uid(), rule = %rule.name, action = ?action, "Running action");
                action.process(&self.gateway, message).map_err(Error::Action)?;
            }
            return Ok(Outcome::Matched {
                rule: index,
                name: rule.name.clone(),
            });
        }
        Ok(Outcome::Unmatched)
    }
}

#[cfg(test)]
mod tests {
    use std::cell::RefCell;
    use std::fmt;
    use std::rc::Rc;

    use super::*;
    use crate::error::{ActionError, StoreError};
    use crate::message::testing::view_with_headers;
    use crate::pipeline::actions::Action;
    use crate::pipeline::predicates::{Always, Never, Predicate};
    use crate::session::RetrievalSession;
    use crate::store::MemoryStore;

    /// Records its label when run.
    struct Record {
        label: &'static str,
        log: Rc<RefCell<Vec<&'static str>>>,
        fail: bool,
    }

    impl fmt::Debug for Record {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "Record({})", self.label)
        }
    }

    impl Action for Record {
        fn process(&self, _: &MutationGateway, _: &MessageView) -> Result<(), ActionError> {
            self.log.borrow_mut().push(self.label);
            if self.fail {
                return Err(ActionError::Store(StoreError::Backend("boom".into())));
            }
            Ok(())
        }
    }

    /// Counts evaluations.
    #[derive(Debug)]
    struct Counting(Rc<RefCell<u32>>);

    impl Predicate for Counting {
        fn matches(&self, _: &MessageView) -> Result<bool, StoreError> {
            *self.0.borrow_mut() += 1;
            Ok(true)
        }
    }

    fn record(log: &Rc<RefCell<Vec<&'static str>>>, label: &'static str) -> BoxAction {
        Box::new(Record {
            label,
            log: Rc::clone(log),
            fail: false,
        })
    }

    fn make_engine(rules: Vec<Rule>) -> RuleEngine {
        let session = RetrievalSession::new(MemoryStore::new());
        RuleEngine::new(RuleSet::new(rules), session.gateway())
    }

    #[test]
    fn rule_without_actions_is_rejected() {
        let err = Rule::new("empty", Box::new(Always), vec![]).unwrap_err();
        assert!(matches!(err, RuleLoadError::InvalidRule { .. }));
    }

    #[test]
    fn first_match_wins() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let later = Rc::new(RefCell::new(0));
        let engine = make_engine(vec![
            Rule::new("never", Box::new(Never), vec![record(&log, "A1")]).unwrap(),
            Rule::new("always", Box::new(Always), vec![record(&log, "A2"), record(&log, "A2b")])
                .unwrap(),
            Rule::new(
                "later",
                Box::new(Counting(Rc::clone(&later))),
                vec![record(&log, "A3")],
            )
            .unwrap(),
        ]);

        let outcome = engine.process(&view_with_headers("\r\n")).unwrap();
        assert_eq!(
            outcome,
            Outcome::Matched {
                rule: 1,
                name: "always".into()
            }
        );
        assert_eq!(*log.borrow(), vec!["A2", "A2b"]);
        assert_eq!(*later.borrow(), 0);
    }

    #[test]
    fn unmatched_message_is_left_alone() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let engine = make_engine(vec![
            Rule::new("never", Box::new(Never), vec![record(&log, "A1")]).unwrap(),
        ]);
        assert_eq!(
            engine.process(&view_with_headers("\r\n")).unwrap(),
            Outcome::Unmatched
        );
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn failing_action_stops_the_rest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let failing = Box::new(Record {
            label: "fails",
            log: Rc::clone(&log),
            fail: true,
        });
        let engine = make_engine(vec![
            Rule::new("always", Box::new(Always), vec![failing, record(&log, "after")]).unwrap(),
        ]);

        let err = engine.process(&view_with_headers("\r\n")).unwrap_err();
        assert!(matches!(err, Error::Action(_)));
        assert_eq!(*log.borrow(), vec!["fails"]);
    }

    #[test]
    fn empty_rule_set_matches_nothing() {
        let engine = make_engine(vec![]);
        assert!(engine.rules().is_empty());
        assert_eq!(
            engine.process(&view_with_headers("\r\n")).unwrap(),
            Outcome::Unmatched
        );
    }
}
