use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::args::Args;
use crate::channel::{self, LastCall};
use crate::decoy::DecoyConfig;
use crate::interaction::{CallRecord, InteractionKind, SpyId};
use crate::spec::Spec;
use crate::stub::Rule;
use crate::value::Value;
use crate::warnings::Warning;

static NEXT_DECOY_ID: AtomicU64 = AtomicU64::new(1);

/// Everything a container owns, behind one mutex.
///
/// Spies live in an arena indexed by [`SpyId`]; parent/child relationships
/// are indices, not references, so handles can point back at the state
/// without forming reference cycles. Writes are short and uncontended:
/// tests are not a contended workload.
pub(crate) struct State {
    pub decoy_id: u64,
    pub config: DecoyConfig,
    spies: Vec<SpyData>,
    log: Vec<LogEntry>,
    next_sequence: u64,
    warnings: Vec<Warning>,
}

/// Arena entry for one spy.
pub(crate) struct SpyData {
    pub name: Arc<str>,
    pub spec: Arc<Spec>,
    pub is_async: bool,
    pub ignore_extra_args: bool,
    pub parent: Option<SpyId>,
    /// Per-attribute slot: cached child spy and/or a user-stored value.
    pub slots: BTreeMap<String, AttrSlot>,
    /// Context-manager entry depth; never goes negative.
    pub entered: u32,
    /// The spy's stub store, ordered by installation.
    pub rules: Vec<Rule>,
}

/// Tagged attribute slot: the cached child and the shadowing stored value.
#[derive(Default)]
pub(crate) struct AttrSlot {
    pub child: Option<SpyId>,
    pub stored: Option<Value>,
}

/// How a log entry has been interpreted.
///
/// Records start as plain test interactions; `when`/`verify` re-tag the
/// entries they consume, which removes them from verification matching and
/// miscalled-stub analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordRole {
    Test,
    WhenRehearsal,
    VerifyRehearsal,
}

pub(crate) struct LogEntry {
    pub record: CallRecord,
    pub role: RecordRole,
}

pub(crate) type Shared = Arc<Mutex<State>>;

/// Locks the shared state, recovering from poisoning: a panicking test must
/// not cascade into every later interaction on the same container.
pub(crate) fn lock(shared: &Shared) -> MutexGuard<'_, State> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

impl State {
    pub fn new(config: DecoyConfig) -> Shared {
        Arc::new(Mutex::new(State {
            decoy_id: NEXT_DECOY_ID.fetch_add(1, Ordering::Relaxed),
            config,
            spies: Vec::new(),
            log: Vec::new(),
            next_sequence: 0,
            warnings: Vec::new(),
        }))
    }

    pub fn add_spy(&mut self, data: SpyData) -> SpyId {
        let id = SpyId::new(self.spies.len());
        self.spies.push(data);
        id
    }

    pub fn spy(&self, id: SpyId) -> &SpyData {
        &self.spies[id.index()]
    }

    pub fn spy_mut(&mut self, id: SpyId) -> &mut SpyData {
        &mut self.spies[id.index()]
    }

    /// Returns the cached child spy for `parent.attr`, creating it from the
    /// parent's spec on first access.
    pub fn ensure_child(&mut self, parent: SpyId, attr: &str) -> SpyId {
        if let Some(child) = self
            .spies[parent.index()]
            .slots
            .get(attr)
            .and_then(|slot| slot.child)
        {
            return child;
        }

        let parent_data = &self.spies[parent.index()];
        let child_spec = parent_data.spec.child_spec(attr);
        let child_data = SpyData {
            name: Arc::from(format!("{}.{attr}", parent_data.name)),
            is_async: child_spec.is_async(),
            ignore_extra_args: parent_data.ignore_extra_args,
            spec: Arc::new(child_spec),
            parent: Some(parent),
            slots: BTreeMap::new(),
            entered: 0,
            rules: Vec::new(),
        };
        let child = self.add_spy(child_data);
        self.spies[parent.index()]
            .slots
            .entry(attr.to_owned())
            .or_default()
            .child = Some(child);

        child
    }

    /// Appends a record to the interaction log and publishes it on this
    /// thread's last-call channel. The allocated sequence number is strictly
    /// greater than every previous record's.
    pub fn record(&mut self, spy: SpyId, kind: InteractionKind, args: Args) -> CallRecord {
        self.next_sequence += 1;
        let data = &self.spies[spy.index()];
        let record = CallRecord::new(
            spy,
            Arc::clone(&data.name),
            kind,
            args,
            data.entered,
            self.next_sequence,
        );
        tracing::trace!(target: "decoy", interaction = %record, sequence = record.sequence(), "recorded");

        self.log.push(LogEntry {
            record: record.clone(),
            role: RecordRole::Test,
        });
        channel::publish(LastCall {
            decoy: self.decoy_id,
            spy,
            sequence: record.sequence(),
        });

        record
    }

    pub fn entry_mut(&mut self, sequence: u64) -> Option<&mut LogEntry> {
        self.log
            .iter_mut()
            .find(|entry| entry.record.sequence() == sequence)
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.log
    }

    /// Returns true if `id` is `root` or a descendant of it.
    pub fn is_within(&self, id: SpyId, root: SpyId) -> bool {
        let mut current = Some(id);
        while let Some(spy) = current {
            if spy == root {
                return true;
            }
            current = self.spies[spy.index()].parent;
        }
        false
    }

    /// Buffers a warning and emits it through the logging facility.
    pub fn warn(&mut self, warning: Warning) {
        tracing::warn!(target: "decoy", "{warning}");
        self.warnings.push(warning);
    }

    pub fn drain_warnings(&mut self) -> Vec<Warning> {
        std::mem::take(&mut self.warnings)
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn spy_ids(&self) -> impl Iterator<Item = SpyId> + '_ {
        (0..self.spies.len()).map(SpyId::new)
    }

    /// Clears the log, every stub store, stored attribute values, and entry
    /// counters. Cached children keep their identity so handles held by the
    /// test stay valid; they simply behave as on a fresh container.
    pub fn clear(&mut self) {
        self.log.clear();
        for spy in &mut self.spies {
            spy.rules.clear();
            spy.entered = 0;
            for slot in spy.slots.values_mut() {
                slot.stored = None;
            }
        }
        channel::clear_for(self.decoy_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::args;

    fn make_state() -> Shared {
        State::new(DecoyConfig::default())
    }

    fn add_function_spy(state: &Shared, name: &str) -> SpyId {
        lock(state).add_spy(SpyData {
            name: Arc::from(name),
            spec: Arc::new(Spec::name(name)),
            is_async: false,
            ignore_extra_args: false,
            parent: None,
            slots: BTreeMap::new(),
            entered: 0,
            rules: Vec::new(),
        })
    }

    #[test]
    fn sequence_numbers_strictly_increase() {
        let shared = make_state();
        let spy = add_function_spy(&shared, "m");

        let mut state = lock(&shared);
        let first = state.record(spy, InteractionKind::Call, args![]);
        let second = state.record(spy, InteractionKind::Call, args![]);
        assert!(second.sequence() > first.sequence());
    }

    #[test]
    fn records_are_published_on_the_channel() {
        let shared = make_state();
        let spy = add_function_spy(&shared, "m");

        let record = lock(&shared).record(spy, InteractionKind::Call, args![1]);
        let pending = channel::take().expect("channel should hold the record");
        assert_eq!(pending.spy, spy);
        assert_eq!(pending.sequence, record.sequence());
    }

    #[test]
    fn children_are_cached_by_attribute() {
        let shared = make_state();
        let parent = add_function_spy(&shared, "db");

        let mut state = lock(&shared);
        let first = state.ensure_child(parent, "exists");
        let second = state.ensure_child(parent, "exists");
        let other = state.ensure_child(parent, "insert");

        assert_eq!(first, second);
        assert_ne!(first, other);
        assert_eq!(&*state.spy(first).name, "db.exists");
        assert!(state.is_within(first, parent));
        assert!(!state.is_within(parent, first));
    }

    #[test]
    fn clear_resets_interactions_but_keeps_children() {
        let shared = make_state();
        let parent = add_function_spy(&shared, "db");

        let mut state = lock(&shared);
        let child = state.ensure_child(parent, "exists");
        state.record(child, InteractionKind::Call, args![]);
        state.spy_mut(child).entered = 2;
        state
            .spy_mut(parent)
            .slots
            .get_mut("exists")
            .expect("slot exists")
            .stored = Some(Value::Int(1));

        state.clear();

        assert!(state.entries().is_empty());
        assert_eq!(state.spy(child).entered, 0);
        assert!(state.spy(parent).slots["exists"].stored.is_none());
        assert_eq!(state.ensure_child(parent, "exists"), child);
        assert_eq!(channel::take(), None);
    }
}
