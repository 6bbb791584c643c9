use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::interaction::CallRecord;
use crate::spec::Spec;
use crate::spy::Spy;
use crate::state::{lock, RecordRole, Shared, SpyData, State};
use crate::verify::{OrderGuard, Verify};
use crate::warnings::{check_miscalled_stubs, Warning};
use crate::when::{consume_rehearsal, IntoRehearsal, Rehearsal, When};

/// Configuration for a [`Decoy`] container.
///
/// ```
/// use decoy::DecoyConfig;
///
/// let config = DecoyConfig::default().with_strict_signatures(true);
/// assert!(config.strict_signatures());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecoyConfig {
    /// When set, a call that does not bind to its spy's signature is the
    /// fatal [`Error::SignatureMismatch`](crate::Error::SignatureMismatch)
    /// instead of a buffered warning.
    strict_signatures: bool,
}

impl DecoyConfig {
    /// Turn signature-mismatch diagnostics fatal.
    pub fn with_strict_signatures(mut self, strict: bool) -> Self {
        self.strict_signatures = strict;
        self
    }

    /// Returns whether signature mismatches are fatal.
    pub fn strict_signatures(&self) -> bool {
        self.strict_signatures
    }
}

/// Mock factory and state container.
///
/// Create one per test, configure stubs with [`when`](Self::when), check
/// side effects with [`verify`](Self::verify), and call
/// [`reset`](Self::reset) at teardown to run the final diagnostics.
///
/// ```
/// use decoy::{args, Decoy, Spec, Value};
///
/// # fn main() -> decoy::Result {
/// let decoy = Decoy::new();
/// let db = decoy.mock(
///     Spec::class("Database")
///         .method("exists", decoy::Signature::new().param("id"))
///         .method("remove", decoy::Signature::new().param("id")),
/// )?;
///
/// decoy.when(&db.child("exists"))?.called_with(args!["some-id"]).then_return(true)?;
///
/// // ... exercise the code under test ...
/// assert_eq!(db.child("exists").call(args!["some-id"])?, Value::Bool(true));
/// db.child("remove").call(args!["some-id"])?;
///
/// // Verify the command; the stubbed query needs no verification.
/// decoy.verify(&db.child("remove"))?.called_with(args!["some-id"])?;
/// let warnings = decoy.reset();
/// assert!(warnings.is_empty());
/// # Ok(())
/// # }
/// ```
pub struct Decoy {
    shared: Shared,
}

impl Decoy {
    /// Creates a container with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DecoyConfig::default())
    }

    /// Creates a container with an explicit configuration.
    pub fn with_config(config: DecoyConfig) -> Self {
        Self {
            shared: State::new(config),
        }
    }

    /// Creates a spy conforming to `spec`.
    ///
    /// Fails with [`Error::MockSpecInvalid`] when the spec contradicts
    /// itself (empty name, duplicate parameters or attributes, an
    /// asynchronous class, parameters on a bare spec).
    pub fn mock(&self, spec: Spec) -> Result<Spy> {
        spec.validate().map_err(Error::MockSpecInvalid)?;

        let name: Arc<str> = Arc::from(spec.display_name());
        let is_async = spec.is_async();
        let ignore_extra_args = spec.ignore_extra_args();

        let mut state = lock(&self.shared);
        let id = state.add_spy(SpyData {
            name,
            spec: Arc::new(spec),
            is_async,
            ignore_extra_args,
            parent: None,
            slots: BTreeMap::new(),
            entered: 0,
            rules: Vec::new(),
        });
        Ok(Spy::from_data(&self.shared, state.decoy_id, id, state.spy(id)))
    }

    /// Opens a stub configuration from a rehearsal.
    ///
    /// Pass a spy handle and describe the interaction with
    /// `called_with`/`get`/`set`/`delete`, or pass the result of a real
    /// rehearsal call to reuse its recorded arguments:
    ///
    /// ```
    /// # use decoy::{args, Decoy, Spec};
    /// # fn main() -> decoy::Result {
    /// # let decoy = Decoy::new();
    /// # let m = decoy.mock(Spec::function("m").param("a"))?;
    /// decoy.when(&m)?.called_with(args![1]).then_return(2)?;
    /// decoy.when(m.call(args![1]))?.then_return(3)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn when(&self, target: impl IntoRehearsal) -> Result<When> {
        match target.into_rehearsal() {
            Rehearsal::Mock(spy) => {
                self.check_owns(&spy)?;
                Ok(When::for_mock(spy))
            }
            Rehearsal::LastCall => {
                let (spy, kind, args) =
                    consume_rehearsal(&self.shared, self.id(), RecordRole::WhenRehearsal)?;
                Ok(When::from_record(spy, kind, args))
            }
        }
    }

    /// Opens a verification against the interaction log.
    ///
    /// The checker's finisher (`called_with`, `set`, `deleted`, `occurred`)
    /// performs the assertion; a mismatch is the fatal
    /// [`Error::VerificationFailed`].
    pub fn verify(&self, target: impl IntoRehearsal) -> Result<Verify> {
        match target.into_rehearsal() {
            Rehearsal::Mock(spy) => {
                self.check_owns(&spy)?;
                Ok(Verify::for_mock(spy))
            }
            Rehearsal::LastCall => {
                let (spy, kind, args) =
                    consume_rehearsal(&self.shared, self.id(), RecordRole::VerifyRehearsal)?;
                Ok(Verify::from_record(spy, kind, args))
            }
        }
    }

    /// Opens an ordered-verification scope on the calling thread.
    ///
    /// While the returned guard lives, verifications must match in
    /// increasing sequence order:
    ///
    /// ```
    /// # use decoy::{args, Decoy, Spec};
    /// # fn main() -> decoy::Result {
    /// # let decoy = Decoy::new();
    /// # let first = decoy.mock(Spec::function("first"))?;
    /// # let second = decoy.mock(Spec::function("second"))?;
    /// first.call(args![])?;
    /// second.call(args![])?;
    ///
    /// let _order = decoy.verify_order();
    /// decoy.verify(&first)?.called_with(args![])?;
    /// decoy.verify(&second)?.called_with(args![])?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn verify_order(&self) -> OrderGuard {
        OrderGuard::open(self.id())
    }

    /// Clears all recorded interactions, stub stores, stored attribute
    /// values, and this thread's pending rehearsal; runs the final
    /// diagnostics; and returns every buffered warning so a fixture can
    /// surface them natively. Spies stay usable and behave as on a fresh
    /// container.
    pub fn reset(&self) -> Vec<Warning> {
        let mut state = lock(&self.shared);
        let checked = check_miscalled_stubs(&state);
        let mut warnings = state.drain_warnings();
        warnings.extend(checked);
        state.clear();
        warnings
    }

    /// Returns the buffered warnings without draining them.
    pub fn warnings(&self) -> Vec<Warning> {
        lock(&self.shared).warnings().to_vec()
    }

    /// Returns a snapshot of the interaction log, in sequence order.
    pub fn interactions(&self) -> Vec<CallRecord> {
        lock(&self.shared)
            .entries()
            .iter()
            .map(|entry| entry.record.clone())
            .collect()
    }

    fn id(&self) -> u64 {
        lock(&self.shared).decoy_id
    }

    fn check_owns(&self, spy: &Spy) -> Result<()> {
        if spy.decoy != self.id() {
            return Err(Error::MockSpecInvalid(format!(
                "mock '{}' belongs to a different Decoy container",
                spy.name()
            )));
        }
        Ok(())
    }
}

impl Default for Decoy {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Decoy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.shared);
        f.debug_struct("Decoy")
            .field("id", &state.decoy_id)
            .field("interactions", &state.entries().len())
            .finish_non_exhaustive()
    }
}
