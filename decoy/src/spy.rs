use std::fmt;
use std::future::Future;
use std::ops::Deref;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::args::Args;
use crate::error::{Error, Result};
use crate::interaction::{CallRecord, InteractionKind, SpyId};
use crate::spec::Spec;
use crate::state::{lock, Shared, SpyData};
use crate::stub::{self, Behavior};
use crate::value::Value;
use crate::warnings::Warning;

/// A live test double: a cheap-to-clone handle to a spy owned by its
/// [`Decoy`](crate::Decoy) container.
///
/// Every interaction — calls, attribute reads and writes, context entry —
/// is recorded in the container's interaction log and answered from the
/// spy's stub store. An interaction performed inside
/// [`when`](crate::Decoy::when) or [`verify`](crate::Decoy::verify) is a
/// *rehearsal*: the same recording machinery runs, and the surrounding call
/// reinterprets the freshest record as a condition pattern.
///
/// ```
/// use decoy::{args, Decoy, Spec, Value};
///
/// # fn main() -> decoy::Result {
/// let decoy = Decoy::new();
/// let add = decoy.mock(Spec::function("add").param("a").param("b"))?;
///
/// decoy.when(&add)?.called_with(args![1, 2]).then_return(3)?;
///
/// assert_eq!(add.call(args![1, 2])?, Value::Int(3));
/// assert_eq!(add.call(args![2, 1])?, Value::Nil);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct Spy {
    pub(crate) shared: Shared,
    pub(crate) decoy: u64,
    pub(crate) id: SpyId,
    pub(crate) name: Arc<str>,
    pub(crate) is_async: bool,
    pub(crate) ignore_extra_args: bool,
    spec: Arc<Spec>,
}

impl Spy {
    pub(crate) fn from_data(shared: &Shared, decoy: u64, id: SpyId, data: &SpyData) -> Self {
        Self {
            shared: Arc::clone(shared),
            decoy,
            id,
            name: Arc::clone(&data.name),
            is_async: data.is_async,
            ignore_extra_args: data.ignore_extra_args,
            spec: Arc::clone(&data.spec),
        }
    }

    /// Returns the spy's full display name, e.g. `Database.exists`.
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the spy's id within its container.
    #[inline]
    pub fn id(&self) -> SpyId {
        self.id
    }

    /// Returns whether calls must go through [`call_async`](Self::call_async).
    #[inline]
    pub fn is_async(&self) -> bool {
        self.is_async
    }

    /// Calls the spy synchronously.
    ///
    /// The call is bound to the spec's signature, recorded, and answered by
    /// the newest matching stub rule: its value, its raised error
    /// ([`Error::Raised`]), its action's result, or a synthesised context
    /// manager. Unstubbed calls return [`Value::Nil`].
    pub fn call(&self, args: Args) -> Result<Value> {
        if self.is_async {
            return Err(Error::async_mismatch(
                &*self.name,
                "asynchronous mock must be called with `call_async`",
            ));
        }
        let args = self.bind(args)?;
        let behavior = {
            let mut state = lock(&self.shared);
            let record = state.record(self.id, InteractionKind::Call, args.clone());
            stub::use_behavior(&mut state.spy_mut(self.id).rules, &record)
        };
        self.run_sync_behavior(behavior, args)
    }

    /// Calls the spy asynchronously.
    ///
    /// The record is published immediately; the stub action is resolved when
    /// the returned future is awaited. This placement is what lets
    /// `when(spy.call_async(..).await)` behave identically to the sync form:
    /// by the time `when` drains the channel, the record is already there.
    pub fn call_async(&self, args: Args) -> SpyFuture {
        if !self.is_async {
            return SpyFuture::ready(Err(Error::async_mismatch(
                &*self.name,
                "synchronous mock must be called with `call`",
            )));
        }
        let args = match self.bind(args) {
            Ok(args) => args,
            Err(error) => return SpyFuture::ready(Err(error)),
        };
        let record = lock(&self.shared).record(self.id, InteractionKind::Call, args);
        SpyFuture::resolve(self.clone(), record)
    }

    /// Returns the child spy for an attribute, creating and caching it on
    /// first access. Navigation does not record an interaction.
    pub fn child(&self, attr: &str) -> Spy {
        let mut state = lock(&self.shared);
        let id = state.ensure_child(self.id, attr);
        Spy::from_data(&self.shared, state.decoy_id, id, state.spy(id))
    }

    /// Reads an attribute through the recording path.
    ///
    /// A value stored by [`set`](Self::set) wins; otherwise the newest
    /// matching `get` stub answers; otherwise the cached child spy is
    /// returned as [`Value::Spy`].
    pub fn get(&self, attr: &str) -> Result<Value> {
        let (child, behavior, stored) = {
            let mut state = lock(&self.shared);
            let child_id = state.ensure_child(self.id, attr);
            let record = state.record(child_id, InteractionKind::Get, Args::new());
            let stored = state
                .spy(self.id)
                .slots
                .get(attr)
                .and_then(|slot| slot.stored.clone());
            let behavior = if stored.is_none() {
                stub::use_behavior(&mut state.spy_mut(child_id).rules, &record)
            } else {
                None
            };
            let child = Spy::from_data(&self.shared, state.decoy_id, child_id, state.spy(child_id));
            (child, behavior, stored)
        };

        if let Some(value) = stored {
            return Ok(value);
        }
        match behavior {
            None => Ok(Value::Spy(child)),
            matched => child.run_sync_behavior(matched, Args::new()),
        }
    }

    /// Assigns an attribute: records `set` against the child spy, stores the
    /// value (shadowing the child until [`delete`](Self::delete)), and runs
    /// any matching `set` stub's side effects.
    pub fn set(&self, attr: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let (child, behavior, args) = {
            let mut state = lock(&self.shared);
            let child_id = state.ensure_child(self.id, attr);
            let mut args = Args::new();
            args.push(value.clone());
            let record = state.record(child_id, InteractionKind::Set, args.clone());
            let behavior = stub::use_behavior(&mut state.spy_mut(child_id).rules, &record);
            state
                .spy_mut(self.id)
                .slots
                .entry(attr.to_owned())
                .or_default()
                .stored = Some(value);
            let child = Spy::from_data(&self.shared, state.decoy_id, child_id, state.spy(child_id));
            (child, behavior, args)
        };

        match behavior {
            None => Ok(()),
            matched => child.run_sync_behavior(matched, args).map(|_| ()),
        }
    }

    /// Deletes an attribute: records `delete`, clears the stored value so
    /// the child spy shows through again, and runs any matching `delete`
    /// stub's side effects.
    pub fn delete(&self, attr: &str) -> Result<()> {
        let (child, behavior) = {
            let mut state = lock(&self.shared);
            let child_id = state.ensure_child(self.id, attr);
            let record = state.record(child_id, InteractionKind::Delete, Args::new());
            let behavior = stub::use_behavior(&mut state.spy_mut(child_id).rules, &record);
            if let Some(slot) = state.spy_mut(self.id).slots.get_mut(attr) {
                slot.stored = None;
            }
            let child = Spy::from_data(&self.shared, state.decoy_id, child_id, state.spy(child_id));
            (child, behavior)
        };

        match behavior {
            None => Ok(()),
            matched => child.run_sync_behavior(matched, Args::new()).map(|_| ()),
        }
    }

    /// Enters the spy as a context manager, incrementing its entry counter.
    ///
    /// The guard records the matching `exit` and decrements the counter when
    /// dropped. Calls made while a guard is alive satisfy
    /// `while_entered(true)` conditions.
    pub fn enter(&self) -> SpyGuard {
        let mut state = lock(&self.shared);
        state.spy_mut(self.id).entered += 1;
        state.record(self.id, InteractionKind::Enter, Args::new());
        SpyGuard { spy: self.clone() }
    }

    /// Canonicalises rehearsed condition arguments the same way real calls
    /// are bound, so `called_with(args![1; "b" => 2])` matches a recorded
    /// `m(1, 2)`. Arguments that do not bind are kept as written: a partial
    /// pattern is legitimate under `ignore_extra_args`, and is flagged as an
    /// incorrect call otherwise.
    pub(crate) fn canonicalize_condition(&self, args: Args, ignore_extra_args: bool) -> Args {
        let Some(signature) = self.spec.signature() else {
            return args;
        };
        match signature.bind(&args) {
            Ok(bound) => bound,
            Err(reason) => {
                if !ignore_extra_args {
                    lock(&self.shared).warn(Warning::IncorrectCall {
                        mock: self.name.to_string(),
                        reason,
                    });
                }
                args
            }
        }
    }

    fn bind(&self, args: Args) -> Result<Args> {
        let Some(signature) = self.spec.signature() else {
            return Ok(args);
        };
        match signature.bind(&args) {
            Ok(bound) => Ok(bound),
            Err(reason) => {
                let mut state = lock(&self.shared);
                if state.config.strict_signatures() {
                    Err(Error::SignatureMismatch {
                        mock: self.name.to_string(),
                        reason,
                    })
                } else {
                    state.warn(Warning::IncorrectCall {
                        mock: self.name.to_string(),
                        reason,
                    });
                    Ok(args)
                }
            }
        }
    }

    fn run_sync_behavior(&self, behavior: Option<Behavior>, args: Args) -> Result<Value> {
        match behavior {
            None => Ok(Value::Nil),
            Some(Behavior::Return(value)) => Ok(value),
            Some(Behavior::Raise(value)) => Err(Error::Raised(value)),
            Some(Behavior::Do(action)) => action(args),
            Some(Behavior::DoAsync(_)) => Err(Error::async_mismatch(
                &*self.name,
                "asynchronous action configured for a synchronous interaction",
            )),
            Some(Behavior::EnterWith(value)) => {
                Ok(Value::Context(ContextValue::new(self.clone(), value)))
            }
        }
    }

    fn record_exit(&self) {
        let mut state = lock(&self.shared);
        state.record(self.id, InteractionKind::Exit, Args::new());
        let data = state.spy_mut(self.id);
        data.entered = data.entered.saturating_sub(1);
    }
}

impl PartialEq for Spy {
    fn eq(&self, other: &Self) -> bool {
        self.decoy == other.decoy && self.id == other.id
    }
}

impl Eq for Spy {}

impl fmt::Debug for Spy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Spy")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("is_async", &self.is_async)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for Spy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<mock '{}'>", self.name)
    }
}

/// Guard for a spy entered with [`Spy::enter`]. Exiting is dropping.
#[must_use = "the guard exits the mock when dropped"]
#[derive(Debug)]
pub struct SpyGuard {
    spy: Spy,
}

impl Drop for SpyGuard {
    fn drop(&mut self) {
        self.spy.record_exit();
    }
}

/// The synthesised context manager produced by an enter-with stub.
///
/// Entering records `enter` on the owning spy, increments its entry
/// counter, and exposes the configured value; dropping the guard records
/// `exit` and decrements.
#[derive(Debug, Clone)]
pub struct ContextValue {
    spy: Spy,
    value: Box<Value>,
}

impl ContextValue {
    pub(crate) fn new(spy: Spy, value: Value) -> Self {
        Self {
            spy,
            value: Box::new(value),
        }
    }

    /// Returns the value the context enters with.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Enters the context.
    pub fn enter(&self) -> ContextGuard {
        let mut state = lock(&self.spy.shared);
        state.spy_mut(self.spy.id).entered += 1;
        state.record(self.spy.id, InteractionKind::Enter, Args::new());
        drop(state);
        ContextGuard {
            spy: self.spy.clone(),
            value: (*self.value).clone(),
        }
    }
}

impl PartialEq for ContextValue {
    fn eq(&self, other: &Self) -> bool {
        self.spy == other.spy && self.value == other.value
    }
}

/// Guard for an entered [`ContextValue`]; derefs to the configured value.
#[must_use = "the guard exits the context when dropped"]
#[derive(Debug)]
pub struct ContextGuard {
    spy: Spy,
    value: Value,
}

impl Deref for ContextGuard {
    type Target = Value;

    fn deref(&self) -> &Value {
        &self.value
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        self.spy.record_exit();
    }
}

/// The future returned by [`Spy::call_async`].
///
/// The call was recorded when the future was created; awaiting resolves the
/// stub action. In between, the last-call channel for the calling thread
/// holds the record, which is what rehearsals rely on.
pub struct SpyFuture {
    state: FutureState,
}

enum FutureState {
    Ready(Option<Result<Value>>),
    Resolve(Option<(Spy, CallRecord)>),
    Awaiting(Pin<Box<dyn Future<Output = Result<Value>> + Send>>),
}

impl SpyFuture {
    fn ready(result: Result<Value>) -> Self {
        Self {
            state: FutureState::Ready(Some(result)),
        }
    }

    fn resolve(spy: Spy, record: CallRecord) -> Self {
        Self {
            state: FutureState::Resolve(Some((spy, record))),
        }
    }
}

impl Future for SpyFuture {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                FutureState::Ready(slot) => {
                    let result = slot.take().expect("SpyFuture polled after completion");
                    return Poll::Ready(result);
                }
                FutureState::Resolve(slot) => {
                    let (spy, record) = slot.take().expect("SpyFuture polled after completion");
                    let behavior = {
                        let mut state = lock(&spy.shared);
                        stub::use_behavior(&mut state.spy_mut(spy.id).rules, &record)
                    };
                    match behavior {
                        Some(Behavior::DoAsync(action)) => {
                            this.state = FutureState::Awaiting(action(record.args().clone()));
                        }
                        other => {
                            return Poll::Ready(
                                spy.run_sync_behavior(other, record.args().clone()),
                            );
                        }
                    }
                }
                FutureState::Awaiting(future) => return future.as_mut().poll(cx),
            }
        }
    }
}

impl fmt::Debug for SpyFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &self.state {
            FutureState::Ready(_) => "ready",
            FutureState::Resolve(_) => "resolve",
            FutureState::Awaiting(_) => "awaiting",
        };
        f.debug_struct("SpyFuture").field("state", &state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{args, Decoy, InteractionKind, Spec};

    #[test]
    fn unstubbed_calls_return_nil_and_are_recorded() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a")).unwrap();

        assert_eq!(m.call(args![1]).unwrap(), Value::Nil);

        let log = decoy.interactions();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].kind(), InteractionKind::Call);
        assert_eq!(log[0].args(), &args![1]);
    }

    #[test]
    fn calls_are_canonicalised_against_the_signature() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m").param("a").param("b")).unwrap();

        m.call(args![1; "b" => 2]).unwrap();

        let log = decoy.interactions();
        assert_eq!(log[0].args(), &args![1, 2]);
    }

    #[test]
    fn children_are_cached_and_identical() {
        let decoy = Decoy::new();
        let db = decoy.mock(Spec::class("Database")).unwrap();

        let first = db.child("exists");
        let second = db.child("exists");
        assert_eq!(first, second);
        assert_eq!(first.name(), "Database.exists");
        assert_ne!(first, db.child("insert"));
    }

    #[test]
    fn stored_values_shadow_children_until_delete() {
        let decoy = Decoy::new();
        let db = decoy.mock(Spec::class("Database")).unwrap();
        let child = db.child("count");

        assert_eq!(db.get("count").unwrap(), Value::Spy(child.clone()));

        db.set("count", 42).unwrap();
        assert_eq!(db.get("count").unwrap(), Value::Int(42));

        db.delete("count").unwrap();
        assert_eq!(db.get("count").unwrap(), Value::Spy(child));
    }

    #[test]
    fn attribute_interactions_record_against_the_child() {
        let decoy = Decoy::new();
        let db = decoy.mock(Spec::class("Database")).unwrap();

        db.set("count", 1).unwrap();
        db.delete("count").unwrap();

        let log = decoy.interactions();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].kind(), InteractionKind::Set);
        assert_eq!(log[0].spy_name(), "Database.count");
        assert_eq!(log[0].args(), &args![1]);
        assert_eq!(log[1].kind(), InteractionKind::Delete);
    }

    #[test]
    fn enter_guard_tracks_depth_and_records_exit() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::name("resource")).unwrap();

        {
            let _guard = m.enter();
            m.call(args![]).unwrap();
        }
        m.call(args![]).unwrap();

        let log = decoy.interactions();
        let kinds: Vec<InteractionKind> = log.iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                InteractionKind::Enter,
                InteractionKind::Call,
                InteractionKind::Exit,
                InteractionKind::Call,
            ]
        );
        // The call inside the guard saw depth 1; the one after saw 0.
        assert_eq!(log[1].entered(), 1);
        assert_eq!(log[3].entered(), 0);
    }

    #[test]
    fn sync_call_on_async_mock_is_a_mismatch() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("fetch").asynchronous()).unwrap();

        assert!(matches!(
            m.call(args![]),
            Err(Error::AsyncMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn async_call_on_sync_mock_is_a_mismatch() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("m")).unwrap();

        assert!(matches!(
            m.call_async(args![]).await,
            Err(Error::AsyncMismatch { .. })
        ));
    }

    #[tokio::test]
    async fn async_calls_record_at_call_time() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::function("fetch").param("id").asynchronous()).unwrap();

        let future = m.call_async(args!["x"]);
        // Recorded before the await.
        assert_eq!(decoy.interactions().len(), 1);

        assert_eq!(future.await.unwrap(), Value::Nil);
        assert_eq!(decoy.interactions().len(), 1);
    }

    #[test]
    fn context_value_enters_to_the_configured_value() {
        let decoy = Decoy::new();
        let m = decoy.mock(Spec::name("session")).unwrap();
        let ctx = ContextValue::new(m.clone(), Value::Int(5));

        {
            let guard = ctx.enter();
            assert_eq!(*guard, Value::Int(5));
        }

        let kinds: Vec<InteractionKind> =
            decoy.interactions().iter().map(|r| r.kind()).collect();
        assert_eq!(kinds, vec![InteractionKind::Enter, InteractionKind::Exit]);
    }
}
