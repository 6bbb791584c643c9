use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::args::Args;
use crate::error::Result;
use crate::interaction::{self, CallRecord, InteractionKind};
use crate::value::Value;

/// The condition half of a stub rule: a partial interaction pattern.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Condition {
    pub kind: InteractionKind,
    pub args: Args,
    pub ignore_extra_args: bool,
    pub is_entered: Option<bool>,
}

impl Condition {
    /// Checks a recorded interaction against this pattern.
    ///
    /// Kind must match exactly. `is_entered` compares against the entry
    /// depth captured in the record. Arguments compare exactly, or as
    /// prefix-and-subset when `ignore_extra_args` is set. Matchers embedded
    /// in the expected arguments delegate equality to their predicates.
    pub fn matches(&self, record: &CallRecord) -> bool {
        if self.kind != record.kind() {
            return false;
        }
        match self.is_entered {
            Some(true) if record.entered() == 0 => return false,
            Some(false) if record.entered() > 0 => return false,
            _ => {}
        }
        if self.ignore_extra_args {
            self.args.is_prefix_of(record.args())
        } else {
            self.args == *record.args()
        }
    }

    /// Renders the condition the way listings show interactions.
    pub fn render(&self, name: &str) -> String {
        interaction::render(name, self.kind, &self.args)
    }
}

/// A synchronous stub action, invoked with the bound call arguments.
pub(crate) type Action = Arc<dyn Fn(Args) -> Result<Value> + Send + Sync>;

/// An asynchronous stub action; only installable on async spies.
pub(crate) type AsyncAction =
    Arc<dyn Fn(Args) -> Pin<Box<dyn Future<Output = Result<Value>> + Send>> + Send + Sync>;

/// The action half of a stub rule.
#[derive(Clone)]
pub(crate) enum Behavior {
    /// Answer the interaction with a value.
    Return(Value),
    /// Fail the interaction with `Error::Raised`.
    Raise(Value),
    /// Invoke a callable with the interaction's arguments.
    Do(Action),
    /// Invoke an async callable; resolved at await time.
    DoAsync(AsyncAction),
    /// Answer with a synthesised context manager entering to the value.
    EnterWith(Value),
}

impl fmt::Debug for Behavior {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Behavior::Return(value) => write!(f, "Return({value})"),
            Behavior::Raise(value) => write!(f, "Raise({value})"),
            Behavior::Do(_) => write!(f, "Do(..)"),
            Behavior::DoAsync(_) => write!(f, "DoAsync(..)"),
            Behavior::EnterWith(value) => write!(f, "EnterWith({value})"),
        }
    }
}

/// A stub rule: condition, action, and a remaining-use count.
///
/// `remaining` of `None` means unbounded; a rule at zero is skipped by
/// lookup but kept in the store so diagnostics can still list it.
#[derive(Debug, Clone)]
pub(crate) struct Rule {
    pub condition: Condition,
    pub behavior: Behavior,
    pub remaining: Option<u32>,
}

impl Rule {
    fn exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

/// Picks the behavior for a recorded interaction and consumes one use.
///
/// Rules are scanned newest-first so a later `when` refines an earlier one.
/// The scan runs in two passes: rules that constrain `is_entered` win over
/// rules that leave it unspecified, regardless of installation order.
pub(crate) fn use_behavior(rules: &mut [Rule], record: &CallRecord) -> Option<Behavior> {
    for pass_specified in [true, false] {
        for rule in rules.iter_mut().rev() {
            if rule.condition.is_entered.is_some() != pass_specified || rule.exhausted() {
                continue;
            }
            if rule.condition.matches(record) {
                if let Some(remaining) = rule.remaining.as_mut() {
                    *remaining -= 1;
                }
                tracing::trace!(
                    target: "decoy",
                    condition = %rule.condition.render(record.spy_name()),
                    "stub rule matched"
                );
                return Some(rule.behavior.clone());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interaction::SpyId;
    use crate::{args, matchers};
    use std::sync::Arc as StdArc;

    fn make_record(args: Args, entered: u32) -> CallRecord {
        CallRecord::new(
            SpyId::new(0),
            StdArc::from("m"),
            InteractionKind::Call,
            args,
            entered,
            1,
        )
    }

    fn make_condition(args: Args) -> Condition {
        Condition {
            kind: InteractionKind::Call,
            args,
            ignore_extra_args: false,
            is_entered: None,
        }
    }

    fn make_rule(args: Args, value: i64) -> Rule {
        Rule {
            condition: make_condition(args),
            behavior: Behavior::Return(Value::Int(value)),
            remaining: None,
        }
    }

    fn returned(behavior: Option<Behavior>) -> Option<Value> {
        match behavior {
            Some(Behavior::Return(value)) => Some(value),
            _ => None,
        }
    }

    #[test]
    fn kind_must_match() {
        let condition = make_condition(args![]);
        let get = CallRecord::new(
            SpyId::new(0),
            StdArc::from("m"),
            InteractionKind::Get,
            args![],
            0,
            1,
        );
        assert!(!condition.matches(&get));
        assert!(condition.matches(&make_record(args![], 0)));
    }

    #[test]
    fn exact_matching_requires_equal_arguments() {
        let condition = make_condition(args![1; "k" => 2]);
        assert!(condition.matches(&make_record(args![1; "k" => 2], 0)));
        assert!(!condition.matches(&make_record(args![1], 0)));
        assert!(!condition.matches(&make_record(args![1; "k" => 2, "extra" => 3], 0)));
    }

    #[test]
    fn ignore_extra_args_matches_prefixes() {
        let condition = Condition {
            ignore_extra_args: true,
            ..make_condition(args![1])
        };
        assert!(condition.matches(&make_record(args![1, 2; "k" => 3], 0)));
        assert!(!condition.matches(&make_record(args![2], 0)));
    }

    #[test]
    fn matchers_participate_in_conditions() {
        let condition = make_condition(args![matchers::any()]);
        assert!(condition.matches(&make_record(args!["anything"], 0)));
        assert!(!condition.matches(&make_record(args![], 0)));
    }

    #[test]
    fn is_entered_checks_recorded_depth() {
        let inside = Condition {
            is_entered: Some(true),
            ..make_condition(args![])
        };
        let outside = Condition {
            is_entered: Some(false),
            ..make_condition(args![])
        };
        assert!(inside.matches(&make_record(args![], 1)));
        assert!(!inside.matches(&make_record(args![], 0)));
        assert!(outside.matches(&make_record(args![], 0)));
        assert!(!outside.matches(&make_record(args![], 2)));
    }

    #[test]
    fn newest_matching_rule_wins() {
        let mut rules = vec![make_rule(args![1], 10), make_rule(args![1], 20)];
        let behavior = use_behavior(&mut rules, &make_record(args![1], 0));
        assert_eq!(returned(behavior), Some(Value::Int(20)));
    }

    #[test]
    fn exhausted_rules_are_skipped() {
        let mut rules = vec![
            make_rule(args![1], 10),
            Rule {
                remaining: Some(1),
                ..make_rule(args![1], 20)
            },
        ];

        let first = use_behavior(&mut rules, &make_record(args![1], 0));
        assert_eq!(returned(first), Some(Value::Int(20)));

        // The one-shot rule is spent; the older unbounded rule shows through.
        let second = use_behavior(&mut rules, &make_record(args![1], 0));
        assert_eq!(returned(second), Some(Value::Int(10)));
    }

    #[test]
    fn no_match_returns_none() {
        let mut rules = vec![make_rule(args![1], 10)];
        assert!(use_behavior(&mut rules, &make_record(args![2], 0)).is_none());
    }

    #[test]
    fn entered_specific_rules_beat_unspecified_ones() {
        let mut rules = vec![
            Rule {
                condition: Condition {
                    is_entered: Some(true),
                    ..make_condition(args![])
                },
                behavior: Behavior::Return(Value::Int(1)),
                remaining: None,
            },
            // Installed later, but leaves is_entered unspecified.
            make_rule(args![], 2),
        ];

        let inside = use_behavior(&mut rules, &make_record(args![], 1));
        assert_eq!(returned(inside), Some(Value::Int(1)));

        let outside = use_behavior(&mut rules, &make_record(args![], 0));
        assert_eq!(returned(outside), Some(Value::Int(2)));
    }
}
