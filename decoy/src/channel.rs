//! The thread-local last-call channel.
//!
//! Every spy interaction, after being appended to the interaction log,
//! overwrites this thread's slot with a pointer to the fresh record.
//! `when`/`verify` drain the slot to reinterpret the interaction as a
//! rehearsal. Thread locality is what keeps parallel test workers sharing
//! process memory from seeing each other's rehearsals.

use std::cell::Cell;

use crate::interaction::SpyId;

/// Pointer to the most recent interaction on this thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct LastCall {
    /// Container instance the record belongs to.
    pub decoy: u64,
    /// Spy that was interacted with.
    pub spy: SpyId,
    /// Sequence number of the record in its container's log.
    pub sequence: u64,
}

thread_local! {
    static SLOT: Cell<Option<LastCall>> = const { Cell::new(None) };
}

/// Publishes a fresh record, overwriting any unread value. Unread values
/// are calls made outside a rehearsal context and are expected to be lost.
pub(crate) fn publish(last_call: LastCall) {
    SLOT.with(|slot| slot.set(Some(last_call)));
}

/// Drains the slot: returns the pending value and clears it.
pub(crate) fn take() -> Option<LastCall> {
    SLOT.with(Cell::take)
}

/// Clears the slot if its pending value belongs to the given container.
///
/// Used by `reset` so a stale rehearsal cannot leak into the next test on
/// this thread, without disturbing other containers' pending rehearsals.
pub(crate) fn clear_for(decoy: u64) {
    SLOT.with(|slot| {
        if slot.get().is_some_and(|pending| pending.decoy == decoy) {
            slot.set(None);
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_last_call(decoy: u64, sequence: u64) -> LastCall {
        LastCall {
            decoy,
            spy: SpyId::new(0),
            sequence,
        }
    }

    #[test]
    fn take_drains_the_slot() {
        publish(make_last_call(1, 10));
        assert_eq!(take(), Some(make_last_call(1, 10)));
        assert_eq!(take(), None);
    }

    #[test]
    fn publish_overwrites_unread_values() {
        publish(make_last_call(1, 10));
        publish(make_last_call(1, 11));
        assert_eq!(take(), Some(make_last_call(1, 11)));
    }

    #[test]
    fn clear_for_only_touches_the_owning_container() {
        publish(make_last_call(1, 10));
        clear_for(2);
        assert_eq!(take(), Some(make_last_call(1, 10)));

        publish(make_last_call(1, 11));
        clear_for(1);
        assert_eq!(take(), None);
    }

    #[test]
    fn slots_are_thread_local() {
        publish(make_last_call(1, 10));

        let other = std::thread::spawn(|| take());
        assert_eq!(other.join().unwrap(), None);

        assert_eq!(take(), Some(make_last_call(1, 10)));
    }
}
