use std::cell::RefCell;

use crate::args::Args;
use crate::error::{Error, Result, VerifyFailure};
use crate::interaction::{CallRecord, InteractionKind};
use crate::spy::Spy;
use crate::state::{lock, RecordRole};
use crate::stub::Condition;
use crate::value::Value;
use crate::warnings::Warning;

thread_local! {
    static ORDER_SCOPES: RefCell<Vec<OrderScope>> = const { RefCell::new(Vec::new()) };
}

#[derive(Debug, Clone, Copy)]
struct OrderScope {
    decoy: u64,
    anchor: u64,
}

/// Checker returned by [`Decoy::verify`](crate::Decoy::verify).
///
/// Configure the expected interaction, then let a finisher perform the
/// assertion against the interaction log:
///
/// ```
/// use decoy::{args, Decoy, Spec};
///
/// # fn main() -> decoy::Result {
/// let decoy = Decoy::new();
/// let save = decoy.mock(Spec::function("save").param("id"))?;
///
/// save.call(args!["a"])?;
/// save.call(args!["a"])?;
///
/// decoy.verify(&save)?.times(2).called_with(args!["a"])?;
/// assert!(decoy.verify(&save)?.called_with(args!["b"]).is_err());
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Verify {
    spy: Spy,
    times: Option<u32>,
    ignore_extra_args: bool,
    is_entered: Option<bool>,
    condition: Option<(InteractionKind, Args)>,
}

impl Verify {
    pub(crate) fn for_mock(spy: Spy) -> Self {
        let ignore_extra_args = spy.ignore_extra_args;
        Self {
            spy,
            times: None,
            ignore_extra_args,
            is_entered: None,
            condition: None,
        }
    }

    pub(crate) fn from_record(spy: Spy, kind: InteractionKind, args: Args) -> Self {
        let ignore_extra_args = spy.ignore_extra_args;
        Self {
            spy,
            times: None,
            ignore_extra_args,
            is_entered: None,
            condition: Some((kind, args)),
        }
    }

    /// Demand exactly this many matching calls instead of at least one.
    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    /// Match calls with extra arguments beyond the rehearsed ones.
    pub fn ignoring_extra_args(mut self) -> Self {
        self.ignore_extra_args = true;
        self
    }

    /// Only count calls made while the spy was (not) entered.
    pub fn while_entered(mut self, entered: bool) -> Self {
        self.is_entered = Some(entered);
        self
    }

    /// Assert the spy was called with exactly these arguments.
    pub fn called_with(mut self, args: Args) -> Result {
        let kind = match self.condition.take() {
            Some((kind, _)) => kind,
            None => InteractionKind::Call,
        };
        let args = self.spy.canonicalize_condition(args, self.ignore_extra_args);
        self.run(kind, args)
    }

    /// Assert the attribute was assigned this value. Target the attribute's
    /// child spy: `decoy.verify(&db.child("count"))?.set(1)`.
    pub fn set(self, value: impl Into<Value>) -> Result {
        let mut args = Args::new();
        args.push(value);
        self.run(InteractionKind::Set, args)
    }

    /// Assert the attribute was deleted.
    pub fn deleted(self) -> Result {
        self.run(InteractionKind::Delete, Args::new())
    }

    /// Assert the rehearsed interaction occurred. Only available when the
    /// rehearsal was a real call drained from the last-call channel.
    pub fn occurred(mut self) -> Result {
        let (kind, args) = self.condition.take().ok_or(Error::MissingRehearsal)?;
        self.run(kind, args)
    }

    fn run(self, kind: InteractionKind, args: Args) -> Result {
        let condition = Condition {
            kind,
            args,
            ignore_extra_args: self.ignore_extra_args,
            is_entered: self.is_entered,
        };

        let candidates: Vec<CallRecord> = {
            let mut state = lock(&self.spy.shared);

            let redundant = state
                .spy(self.spy.id)
                .rules
                .iter()
                .any(|rule| rule.condition == condition);
            if redundant {
                state.warn(Warning::RedundantVerify {
                    mock: self.spy.name().to_owned(),
                    rehearsal: condition.render(self.spy.name()),
                });
            }

            let target = self.spy.id;
            let within: Vec<CallRecord> = state
                .entries()
                .iter()
                .filter(|entry| entry.role == RecordRole::Test)
                .filter(|entry| entry.record.kind() == condition.kind)
                .map(|entry| entry.record.clone())
                .collect();
            within
                .into_iter()
                .filter(|record| state.is_within(record.spy(), target))
                .collect()
        };

        let anchor = current_anchor(self.spy.decoy);
        match anchor {
            None => self.check_unordered(&condition, &candidates),
            Some(anchor) => self.check_ordered(&condition, &candidates, anchor),
        }
    }

    fn check_unordered(&self, condition: &Condition, candidates: &[CallRecord]) -> Result {
        let matched = candidates
            .iter()
            .filter(|record| condition.matches(record))
            .count();
        let passed = match self.times {
            Some(times) => matched == times as usize,
            None => matched >= 1,
        };

        if passed {
            Ok(())
        } else {
            Err(self.failure(condition, candidates, false))
        }
    }

    /// Inside a `verify_order` scope, the match must begin strictly after
    /// the anchor left by the previous verification; passing advances the
    /// anchor to the last record this verification consumed.
    fn check_ordered(
        &self,
        condition: &Condition,
        candidates: &[CallRecord],
        anchor: u64,
    ) -> Result {
        let needed = self.times.unwrap_or(1) as usize;
        if needed == 0 {
            return Ok(());
        }

        let matches: Vec<&CallRecord> = candidates
            .iter()
            .filter(|record| record.sequence() > anchor)
            .filter(|record| condition.matches(record))
            .collect();

        if matches.len() >= needed {
            advance_anchor(self.spy.decoy, matches[needed - 1].sequence());
            Ok(())
        } else {
            Err(self.failure(condition, candidates, true))
        }
    }

    fn failure(&self, condition: &Condition, candidates: &[CallRecord], ordered: bool) -> Error {
        Error::verification(VerifyFailure {
            expected: condition.render(self.spy.name()),
            times: self.times,
            ordered,
            found: candidates.iter().map(ToString::to_string).collect(),
        })
    }
}

/// Scope handle returned by [`Decoy::verify_order`](crate::Decoy::verify_order).
///
/// While the guard lives, verifications against the same container on this
/// thread must match in increasing sequence order. Dropping the guard closes
/// the scope and restores any outer one.
#[must_use = "ordered verification lasts while the guard is alive"]
#[derive(Debug)]
pub struct OrderGuard {
    decoy: u64,
}

impl OrderGuard {
    pub(crate) fn open(decoy: u64) -> Self {
        ORDER_SCOPES.with(|scopes| {
            scopes.borrow_mut().push(OrderScope { decoy, anchor: 0 });
        });
        Self { decoy }
    }
}

impl Drop for OrderGuard {
    fn drop(&mut self) {
        ORDER_SCOPES.with(|scopes| {
            let mut scopes = scopes.borrow_mut();
            if let Some(index) = scopes.iter().rposition(|s| s.decoy == self.decoy) {
                scopes.remove(index);
            }
        });
    }
}

fn current_anchor(decoy: u64) -> Option<u64> {
    ORDER_SCOPES.with(|scopes| {
        scopes
            .borrow()
            .iter()
            .rev()
            .find(|scope| scope.decoy == decoy)
            .map(|scope| scope.anchor)
    })
}

fn advance_anchor(decoy: u64, anchor: u64) {
    ORDER_SCOPES.with(|scopes| {
        let mut scopes = scopes.borrow_mut();
        if let Some(scope) = scopes.iter_mut().rev().find(|scope| scope.decoy == decoy) {
            scope.anchor = anchor;
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, matchers, Decoy, Spec};

    #[test]
    fn passes_when_a_matching_call_exists() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        m.call(args![1]).unwrap();

        assert!(decoy.verify(&m).unwrap().called_with(args![1]).is_ok());
        let error = decoy.verify(&m).unwrap().called_with(args![2]).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("Expected at least 1 call:"), "{message}");
        assert!(message.contains("m(2)"), "{message}");
        assert!(message.contains("m(1)"), "{message}");
    }

    #[test]
    fn times_demands_an_exact_count() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m")).unwrap();

        m.call(args![]).unwrap();
        m.call(args![]).unwrap();

        assert!(decoy.verify(&m).unwrap().times(2).called_with(args![]).is_ok());
        assert!(decoy.verify(&m).unwrap().times(1).called_with(args![]).is_err());
        assert!(decoy.verify(&m).unwrap().times(3).called_with(args![]).is_err());
    }

    #[test]
    fn times_zero_asserts_never_called() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        m.call(args![1]).unwrap();

        assert!(decoy.verify(&m).unwrap().times(0).called_with(args![2]).is_ok());
        assert!(decoy.verify(&m).unwrap().times(0).called_with(args![1]).is_err());
    }

    #[test]
    fn rehearsal_form_verifies_the_drained_call() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        m.call(args![1]).unwrap();

        // The rehearsal itself is re-tagged and must not satisfy the check.
        assert!(decoy.verify(m.call(args![2])).unwrap().occurred().is_err());
        assert!(decoy.verify(m.call(args![1])).unwrap().occurred().is_ok());
    }

    #[test]
    fn occurred_requires_a_channel_rehearsal() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m")).unwrap();

        let result = decoy.verify(&m).unwrap().occurred();
        assert_eq!(result.unwrap_err(), Error::MissingRehearsal);
    }

    #[test]
    fn attribute_sets_and_deletes_are_verifiable() {
        let decoy = Decoy::new();
        let db = decoy.mock(Spec::class("Database")).unwrap();

        db.set("count", 42).unwrap();
        db.delete("count").unwrap();

        assert!(decoy.verify(&db.child("count")).unwrap().set(42).is_ok());
        assert!(decoy.verify(&db.child("count")).unwrap().set(41).is_err());
        assert!(decoy.verify(&db.child("count")).unwrap().deleted().is_ok());
    }

    #[test]
    fn parent_verification_sees_child_records() {
        let decoy = Decoy::new();
        let db = decoy
            .mock(Spec::class("Database").method("exists", crate::Signature::new().param("id")))
            .unwrap();

        db.child("exists").call(args!["some-id"]).unwrap();

        assert!(decoy
            .verify(&db)
            .unwrap()
            .called_with(args!["some-id"])
            .is_ok());
    }

    #[test]
    fn ordered_verification_follows_the_log() {
        let decoy = Decoy::new();
        let a = decoy.mock(Spec::function("a")).unwrap();
        let b = decoy.mock(Spec::function("b")).unwrap();
        let c = decoy.mock(Spec::function("c")).unwrap();

        a.call(args![]).unwrap();
        b.call(args![]).unwrap();
        c.call(args![]).unwrap();

        {
            let _order = decoy.verify_order();
            assert!(decoy.verify(&a).unwrap().called_with(args![]).is_ok());
            assert!(decoy.verify(&c).unwrap().called_with(args![]).is_ok());
        }

        {
            let _order = decoy.verify_order();
            assert!(decoy.verify(&c).unwrap().called_with(args![]).is_ok());
            let error = decoy.verify(&a).unwrap().called_with(args![]).unwrap_err();
            assert!(error.to_string().contains("Expected call in order:"));
        }
    }

    #[test]
    fn order_scope_closes_on_drop() {
        let decoy = Decoy::new();
        let a = decoy.mock(Spec::function("a")).unwrap();

        a.call(args![]).unwrap();
        {
            let _order = decoy.verify_order();
            assert!(decoy.verify(&a).unwrap().called_with(args![]).is_ok());
        }
        // Outside the scope, order no longer constrains.
        assert!(decoy.verify(&a).unwrap().called_with(args![]).is_ok());
        assert!(decoy.verify(&a).unwrap().called_with(args![]).is_ok());
    }

    #[test]
    fn ordered_times_consumes_consecutive_matches() {
        let decoy = Decoy::new();
        let a = decoy.mock(Spec::function("a")).unwrap();
        let b = decoy.mock(Spec::function("b")).unwrap();

        a.call(args![]).unwrap();
        a.call(args![]).unwrap();
        b.call(args![]).unwrap();

        let _order = decoy.verify_order();
        assert!(decoy.verify(&a).unwrap().times(2).called_with(args![]).is_ok());
        assert!(decoy.verify(&b).unwrap().called_with(args![]).is_ok());
    }

    #[test]
    fn redundant_verify_is_flagged() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        decoy
            .when(&m)
            .unwrap()
            .called_with(args![1])
            .then_return(2)
            .unwrap();
        m.call(args![1]).unwrap();

        assert!(decoy.verify(&m).unwrap().called_with(args![1]).is_ok());
        assert!(decoy
            .warnings()
            .iter()
            .any(|w| matches!(w, Warning::RedundantVerify { .. })));
    }

    #[test]
    fn captors_capture_during_verification() {
        let decoy = Decoy::new();
        let log = decoy.mock(Spec::function("log").param("msg")).unwrap();
        let captor = matchers::Captor::new();

        log.call(args!["hello"]).unwrap();
        decoy
            .verify(&log)
            .unwrap()
            .called_with(args![captor.clone()])
            .unwrap();

        assert_eq!(captor.value().unwrap(), Value::from("hello"));
    }

    #[test]
    fn entered_filter_limits_matches() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::name("resource")).unwrap();

        m.call(args![]).unwrap();
        {
            let _guard = m.enter();
            m.call(args![]).unwrap();
        }

        assert!(decoy
            .verify(&m)
            .unwrap()
            .while_entered(true)
            .times(1)
            .called_with(args![])
            .is_ok());
        assert!(decoy
            .verify(&m)
            .unwrap()
            .while_entered(false)
            .times(1)
            .called_with(args![])
            .is_ok());
    }
}
