use std::future::Future;
use std::sync::Arc;

use crate::args::Args;
use crate::channel;
use crate::error::{Error, Result};
use crate::interaction::InteractionKind;
use crate::spy::Spy;
use crate::state::{lock, RecordRole, Shared};
use crate::stub::{Behavior, Condition, Rule};
use crate::value::Value;
use crate::warnings::Warning;

/// How a rehearsal reached `when`/`verify`.
///
/// Either form of the API converts into this: passing a spy handle asks the
/// builder for an explicit condition, while passing the result of a real
/// call consumes the thread's last-call channel.
pub enum Rehearsal {
    /// `when(&spy)` — condition supplied by `called_with`/`get`/`set`/`delete`.
    Mock(Spy),
    /// `when(spy.call(..))` — condition drained from the last-call channel.
    LastCall,
}

/// Conversion accepted by [`Decoy::when`](crate::Decoy::when) and
/// [`Decoy::verify`](crate::Decoy::verify).
pub trait IntoRehearsal {
    fn into_rehearsal(self) -> Rehearsal;
}

impl IntoRehearsal for &Spy {
    fn into_rehearsal(self) -> Rehearsal {
        Rehearsal::Mock(self.clone())
    }
}

impl IntoRehearsal for Spy {
    fn into_rehearsal(self) -> Rehearsal {
        Rehearsal::Mock(self)
    }
}

impl IntoRehearsal for Value {
    fn into_rehearsal(self) -> Rehearsal {
        Rehearsal::LastCall
    }
}

impl IntoRehearsal for Result<Value> {
    fn into_rehearsal(self) -> Rehearsal {
        Rehearsal::LastCall
    }
}

/// Drains this thread's last-call channel and re-tags the log entry as a
/// rehearsal, returning what the condition needs. Fails when the channel is
/// empty, holds another container's record, or points at an entry already
/// consumed as a rehearsal.
pub(crate) fn consume_rehearsal(
    shared: &Shared,
    decoy_id: u64,
    role: RecordRole,
) -> Result<(Spy, InteractionKind, Args)> {
    let pending = channel::take().ok_or(Error::MissingRehearsal)?;
    if pending.decoy != decoy_id {
        return Err(Error::MissingRehearsal);
    }

    let mut state = lock(shared);
    let record = {
        let entry = state
            .entry_mut(pending.sequence)
            .ok_or(Error::MissingRehearsal)?;
        if entry.role != RecordRole::Test {
            return Err(Error::MissingRehearsal);
        }
        entry.role = role;
        entry.record.clone()
    };
    let spy = Spy::from_data(shared, state.decoy_id, record.spy(), state.spy(record.spy()));

    Ok((spy, record.kind(), record.args().clone()))
}

/// Builder returned by [`Decoy::when`](crate::Decoy::when).
///
/// Configure the condition with [`called_with`](Self::called_with),
/// [`get`](Self::get), [`set`](Self::set), or [`delete`](Self::delete) —
/// or, when the rehearsal was a real call, go straight to a `then_*`
/// terminal. Modifiers apply to the installed rule's condition:
///
/// ```
/// use decoy::{args, Decoy, Spec, Value};
///
/// # fn main() -> decoy::Result {
/// let decoy = Decoy::new();
/// let m = decoy.mock(Spec::function("check").param("id").param("flag"))?;
///
/// decoy
///     .when(&m)?
///     .ignoring_extra_args()
///     .called_with(args!["a"])
///     .then_return(true)?;
///
/// assert_eq!(m.call(args!["a", "ignored"])?, Value::Bool(true));
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct When {
    spy: Spy,
    times: Option<u32>,
    ignore_extra_args: bool,
    is_entered: Option<bool>,
    condition: Option<(InteractionKind, Args)>,
}

impl When {
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

    /// Match calls with extra arguments beyond the rehearsed ones.
    pub fn ignoring_extra_args(mut self) -> Self {
        self.ignore_extra_args = true;
        self
    }

    /// Restrict the rule to calls made while the spy is (not) entered.
    pub fn while_entered(mut self, entered: bool) -> Self {
        self.is_entered = Some(entered);
        self
    }

    /// Cap how many times the installed rule may answer.
    pub fn times(mut self, times: u32) -> Self {
        self.times = Some(times);
        self
    }

    /// Expect a call with exactly these arguments (replacing the rehearsed
    /// arguments, if the rehearsal was a real call).
    pub fn called_with(mut self, args: Args) -> Stub {
        let kind = match self.condition.take() {
            Some((kind, _)) => kind,
            None => InteractionKind::Call,
        };
        let args = self.spy.canonicalize_condition(args, self.ignore_extra_args);
        self.into_stub(kind, args)
    }

    /// Expect an attribute read. Target the attribute's child spy:
    /// `decoy.when(&db.child("count"))?.get()`.
    pub fn get(self) -> Stub {
        self.into_stub(InteractionKind::Get, Args::new())
    }

    /// Expect the attribute to be assigned this value.
    pub fn set(self, value: impl Into<Value>) -> SideEffectStub {
        let mut args = Args::new();
        args.push(value);
        SideEffectStub {
            inner: self.into_stub(InteractionKind::Set, args),
        }
    }

    /// Expect the attribute to be deleted.
    pub fn delete(self) -> SideEffectStub {
        SideEffectStub {
            inner: self.into_stub(InteractionKind::Delete, Args::new()),
        }
    }

    /// Configure the rehearsed call to return a value.
    pub fn then_return(self, value: impl Into<Value>) -> Result<Stub> {
        self.rehearsed()?.then_return(value)
    }

    /// Configure the rehearsed call to return each value once, in order.
    pub fn then_return_each<V>(self, values: impl IntoIterator<Item = V>) -> Result<Stub>
    where
        V: Into<Value>,
    {
        self.rehearsed()?.then_return_each(values)
    }

    /// Configure the rehearsed call to fail with [`Error::Raised`].
    pub fn then_raise(self, value: impl Into<Value>) -> Result<Stub> {
        self.rehearsed()?.then_raise(value)
    }

    /// Configure the rehearsed call to invoke an action.
    pub fn then_do<F>(self, action: F) -> Result<Stub>
    where
        F: Fn(Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.rehearsed()?.then_do(action)
    }

    /// Configure the rehearsed call to invoke an async action.
    pub fn then_do_async<F, Fut>(self, action: F) -> Result<Stub>
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        self.rehearsed()?.then_do_async(action)
    }

    /// Configure the rehearsed call to produce a context manager entering
    /// with the value.
    pub fn then_enter_with(self, value: impl Into<Value>) -> Result<Stub> {
        self.rehearsed()?.then_enter_with(value)
    }

    fn rehearsed(mut self) -> Result<Stub> {
        let (kind, args) = self.condition.take().ok_or(Error::MissingRehearsal)?;
        Ok(self.into_stub(kind, args))
    }

    fn into_stub(self, kind: InteractionKind, args: Args) -> Stub {
        Stub {
            spy: self.spy,
            times: self.times,
            ignore_extra_args: self.ignore_extra_args,
            is_entered: self.is_entered,
            kind,
            args,
        }
    }
}

/// A stub with its condition fixed, ready for `then_*` terminals.
///
/// Each terminal appends rules to the spy's store; the newest matching rule
/// answers calls, so repeated configuration refines earlier stubs.
#[derive(Debug)]
pub struct Stub {
    spy: Spy,
    times: Option<u32>,
    ignore_extra_args: bool,
    is_entered: Option<bool>,
    kind: InteractionKind,
    args: Args,
}

impl Stub {
    /// Answer matching calls with `value`, indefinitely (or up to the
    /// `times` cap).
    pub fn then_return(self, value: impl Into<Value>) -> Result<Self> {
        self.install(vec![Behavior::Return(value.into())], false)?;
        Ok(self)
    }

    /// Answer matching calls with each value once, in order; afterwards the
    /// default result returns.
    pub fn then_return_each<V>(self, values: impl IntoIterator<Item = V>) -> Result<Self>
    where
        V: Into<Value>,
    {
        let behaviors = values
            .into_iter()
            .map(|value| Behavior::Return(value.into()))
            .collect();
        self.install(behaviors, true)?;
        Ok(self)
    }

    /// Fail matching calls with [`Error::Raised`] carrying `value`.
    pub fn then_raise(self, value: impl Into<Value>) -> Result<Self> {
        self.install(vec![Behavior::Raise(value.into())], false)?;
        Ok(self)
    }

    /// Invoke `action` with the bound arguments of each matching call and
    /// answer with its result. The action's own error propagates untouched.
    pub fn then_do<F>(self, action: F) -> Result<Self>
    where
        F: Fn(Args) -> Result<Value> + Send + Sync + 'static,
    {
        self.install(vec![Behavior::Do(Arc::new(action))], false)?;
        Ok(self)
    }

    /// Invoke an async action, resolved when the call is awaited.
    ///
    /// Fails with [`Error::AsyncMismatch`] when the spy is synchronous: the
    /// action could never be awaited.
    pub fn then_do_async<F, Fut>(self, action: F) -> Result<Self>
    where
        F: Fn(Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value>> + Send + 'static,
    {
        if !self.spy.is_async {
            return Err(Error::async_mismatch(
                self.spy.name(),
                "asynchronous action configured for a synchronous mock",
            ));
        }
        let action = Arc::new(move |args: Args| {
            Box::pin(action(args)) as std::pin::Pin<Box<dyn Future<Output = Result<Value>> + Send>>
        });
        self.install(vec![Behavior::DoAsync(action)], false)?;
        Ok(self)
    }

    /// Answer matching calls with a context manager entering with `value`.
    pub fn then_enter_with(self, value: impl Into<Value>) -> Result<Self> {
        self.install(vec![Behavior::EnterWith(value.into())], false)?;
        Ok(self)
    }

    fn install(&self, behaviors: Vec<Behavior>, each_once: bool) -> Result<()> {
        let condition = Condition {
            kind: self.kind,
            args: self.args.clone(),
            ignore_extra_args: self.ignore_extra_args,
            is_entered: self.is_entered,
        };
        let mut state = lock(&self.spy.shared);

        if condition.args.contains_captor() {
            state.warn(Warning::CapturedInStub {
                mock: self.spy.name().to_owned(),
                rehearsal: condition.render(self.spy.name()),
            });
        }

        // Multi-value sequences install newest-last-wins style: reversed, so
        // the first value sits newest in the store and answers first.
        for behavior in behaviors.into_iter().rev() {
            let remaining = if each_once { Some(1) } else { self.times };
            state.spy_mut(self.spy.id).rules.push(Rule {
                condition: condition.clone(),
                behavior,
                remaining,
            });
        }

        Ok(())
    }
}

/// A stub for side-effecting interactions (`set`/`delete`): these have no
/// value to return, so only raising and actions are configurable.
#[derive(Debug)]
pub struct SideEffectStub {
    inner: Stub,
}

impl SideEffectStub {
    /// Fail matching interactions with [`Error::Raised`] carrying `value`.
    pub fn then_raise(self, value: impl Into<Value>) -> Result<Self> {
        Ok(Self {
            inner: self.inner.then_raise(value)?,
        })
    }

    /// Invoke `action` on each matching interaction (for `set`, the assigned
    /// value arrives as the single positional argument).
    pub fn then_do<F>(self, action: F) -> Result<Self>
    where
        F: Fn(Args) -> Result<Value> + Send + Sync + 'static,
    {
        Ok(Self {
            inner: self.inner.then_do(action)?,
        })
    }
}
