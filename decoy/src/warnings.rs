//! Non-fatal misuse diagnostics.
//!
//! Warnings never interrupt control flow: they are emitted through
//! `tracing::warn!` the moment they are raised and buffered on the container
//! until [`reset`](crate::Decoy::reset) drains them, so a test fixture can
//! surface them through its framework's native reporting.

use std::fmt;

use crate::error::count;
use crate::interaction::InteractionKind;
use crate::state::{RecordRole, State};

/// A buffered misuse diagnostic.
#[derive(Debug, Clone, PartialEq)]
pub enum Warning {
    /// A spy has stub rules, but was called with arguments matching none of
    /// them. Checked at reset time.
    MiscalledStub {
        mock: String,
        rehearsals: Vec<String>,
        calls: Vec<String>,
    },
    /// A `verify` condition duplicates an installed `when` rule: the stub
    /// already proves the interaction, so the verification is a misuse.
    RedundantVerify { mock: String, rehearsal: String },
    /// A call did not bind to the spy's signature (non-strict containers
    /// record the call unbound and carry on).
    IncorrectCall { mock: String, reason: String },
    /// A capturing matcher was used in a `when` rehearsal; captors belong in
    /// `verify`, where their captured values are actually retrievable.
    CapturedInStub { mock: String, rehearsal: String },
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::MiscalledStub {
                rehearsals, calls, ..
            } => {
                writeln!(f, "Stub was called but no matching rehearsal found.")?;
                write!(f, "Found {}:", count(rehearsals.len(), "rehearsal"))?;
                for (i, rehearsal) in rehearsals.iter().enumerate() {
                    write!(f, "\n{}.\t{}", i + 1, rehearsal)?;
                }
                write!(f, "\nFound {}:", count(calls.len(), "call"))?;
                for (i, call) in calls.iter().enumerate() {
                    write!(f, "\n{}.\t{}", i + 1, call)?;
                }
                Ok(())
            }
            Warning::RedundantVerify { rehearsal, .. } => {
                writeln!(
                    f,
                    "The same rehearsal was used in both a `when` and a `verify`."
                )?;
                writeln!(f, "This is redundant and probably a misuse of the mock.")?;
                write!(f, "\t{rehearsal}")
            }
            Warning::IncorrectCall { mock, reason } => {
                write!(
                    f,
                    "Call to mock '{mock}' does not match its signature: {reason}"
                )
            }
            Warning::CapturedInStub { rehearsal, .. } => {
                writeln!(f, "A captor was used in a `when` rehearsal.")?;
                writeln!(
                    f,
                    "Captors belong in `verify`; values captured by stubs are never retrieved."
                )?;
                write!(f, "\t{rehearsal}")
            }
        }
    }
}

/// Reset-time check: for every spy with stub rules, flag the calls that
/// matched none of them. Rehearsal records are excluded; exhausted rules
/// still count as rehearsals so the listing reflects what the test set up.
pub(crate) fn check_miscalled_stubs(state: &State) -> Vec<Warning> {
    let mut warnings = Vec::new();

    for id in state.spy_ids() {
        let spy = state.spy(id);
        if spy.rules.is_empty() {
            continue;
        }

        let calls: Vec<&crate::interaction::CallRecord> = state
            .entries()
            .iter()
            .filter(|entry| entry.role == RecordRole::Test)
            .filter(|entry| entry.record.spy() == id)
            .filter(|entry| entry.record.kind() == InteractionKind::Call)
            .map(|entry| &entry.record)
            .collect();

        let unmatched: Vec<String> = calls
            .iter()
            .filter(|record| !spy.rules.iter().any(|rule| rule.condition.matches(record)))
            .map(ToString::to_string)
            .collect();

        if !unmatched.is_empty() {
            warnings.push(Warning::MiscalledStub {
                mock: spy.name.to_string(),
                rehearsals: spy
                    .rules
                    .iter()
                    .map(|rule| rule.condition.render(&spy.name))
                    .collect(),
                calls: unmatched,
            });
        }
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, Decoy, Spec};

    #[test]
    fn miscalled_stub_is_reported_at_reset() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        decoy
            .when(&m)
            .unwrap()
            .called_with(args![1])
            .then_return(2)
            .unwrap();
        m.call(args![9]).unwrap();

        let warnings = decoy.reset();
        let miscalled = warnings
            .iter()
            .find(|w| matches!(w, Warning::MiscalledStub { .. }))
            .expect("expected a miscalled-stub warning");

        let message = miscalled.to_string();
        assert!(message.contains("no matching rehearsal found"), "{message}");
        assert!(message.contains("m(1)"), "{message}");
        assert!(message.contains("m(9)"), "{message}");
    }

    #[test]
    fn matching_calls_raise_no_warning() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        decoy
            .when(&m)
            .unwrap()
            .called_with(args![1])
            .then_return(2)
            .unwrap();
        m.call(args![1]).unwrap();

        assert!(decoy.reset().is_empty());
    }

    #[test]
    fn spies_without_rules_are_not_checked() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        m.call(args![9]).unwrap();

        assert!(decoy.reset().is_empty());
    }

    #[test]
    fn display_shapes_match_the_diagnostics() {
        let warning = Warning::MiscalledStub {
            mock: "m".to_owned(),
            rehearsals: vec!["m(1)".to_owned()],
            calls: vec!["m(9)".to_owned(), "m(8)".to_owned()],
        };
        let message = warning.to_string();
        assert!(message.contains("Found 1 rehearsal:"), "{message}");
        assert!(message.contains("Found 2 calls:"), "{message}");

        let warning = Warning::RedundantVerify {
            mock: "m".to_owned(),
            rehearsal: "m(1)".to_owned(),
        };
        assert!(warning.to_string().contains("redundant"), "{warning}");
    }
}
