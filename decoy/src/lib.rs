//! # Decoy
//!
//! Rehearsal-driven test doubles for Rust.
//!
//! Decoy builds spies that stand in for real dependencies during tests.
//! Stubs are configured by *rehearsing* the interaction you expect — the
//! same interaction the code under test will perform — and verification
//! replays the same pattern against an ordered log of everything that
//! actually happened. No separate expectation DSL: a rehearsal is an
//! ordinary call against the mock.
//!
//! ## Quick Start
//!
//! ```rust
//! use decoy::{args, Decoy, Signature, Spec, Value};
//!
//! fn main() -> decoy::Result {
//!     let decoy = Decoy::new();
//!
//!     // Build a spy from a declared shape.
//!     let db = decoy.mock(
//!         Spec::class("Database")
//!             .method("exists", Signature::new().param("id"))
//!             .method("remove", Signature::new().param("id")),
//!     )?;
//!
//!     // Stub: when `exists("some-id")` is called, return true.
//!     decoy
//!         .when(&db.child("exists"))?
//!         .called_with(args!["some-id"])
//!         .then_return(true)?;
//!
//!     // The code under test queries the spy, then issues a command...
//!     let exists = db.child("exists").call(args!["some-id"])?;
//!     assert_eq!(exists, Value::Bool(true));
//!     db.child("remove").call(args!["some-id"])?;
//!
//!     // ...and the test verifies the command afterwards. The stubbed query
//!     // already proves itself; verifying it too would be redundant.
//!     decoy.verify(&db.child("remove"))?.called_with(args!["some-id"])?;
//!
//!     // Teardown: surface pending diagnostics.
//!     assert!(decoy.reset().is_empty());
//!     Ok(())
//! }
//! ```
//!
//! ## Core Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`Decoy`] | Mock factory and state container; one per test |
//! | [`Spec`] | Declared shape of a mockable surface (function, class, bare name) |
//! | [`Spy`] | Live test double; records calls, attribute access, and context entry |
//! | [`When`] | Stub builder: condition plus a `then_*` action |
//! | [`Verify`] | Checker matching rehearsals against the interaction log |
//! | [`Value`] / [`Args`] | Dynamic values and argument bundles with matcher-aware equality |
//! | [`matchers`] | Predicate stand-ins for arguments, including the capturing [`Captor`] |
//! | [`Warning`] | Buffered misuse diagnostics, drained by [`Decoy::reset`] |
//!
//! ## Rehearsals
//!
//! Both stubbing and verification accept two forms:
//!
//! - **Mock form** — pass the spy handle and describe the interaction:
//!   `decoy.when(&spy)?.called_with(args![1]).then_return(2)?`.
//! - **Call form** — pass the result of a real call; the interaction just
//!   recorded on this thread becomes the condition:
//!   `decoy.when(spy.call(args![1]))?.then_return(2)?`.
//!
//! The call form works because every interaction is published on a
//! thread-local last-call channel after it is logged; `when` and `verify`
//! drain that channel and re-tag the record as a rehearsal. Rehearsals on
//! other threads or other containers are invisible, which keeps parallel
//! test workers from bleeding into each other.
//!
//! ## Async
//!
//! Spies marked asynchronous return a future from
//! [`call_async`](Spy::call_async). The call is recorded immediately and
//! the stub action resolves at await time, so
//! `decoy.when(spy.call_async(args![..]).await)?` rehearses exactly like
//! the sync form.
//!
//! ## Opinionated diagnostics
//!
//! Verification mismatches are hard errors carrying a listing of the
//! rehearsed and actual calls. Misuse that does not invalidate the test —
//! a stubbed spy called with unmatched arguments, a `verify` duplicating a
//! `when`, a call that does not bind to the declared signature — is
//! buffered as a [`Warning`] and emitted through `tracing`.

mod args;
mod channel;
mod decoy;
mod error;
mod interaction;
pub mod matchers;
mod spec;
mod spy;
mod state;
mod stub;
mod value;
mod verify;
mod warnings;
mod when;

pub use crate::args::Args;
pub use crate::decoy::{Decoy, DecoyConfig};
pub use crate::error::{Error, Result, VerifyFailure};
pub use crate::interaction::{CallRecord, InteractionKind, SpyId};
pub use crate::matchers::{Captor, ValueMatcher};
pub use crate::spec::{Signature, Spec};
pub use crate::spy::{ContextGuard, ContextValue, Spy, SpyFuture, SpyGuard};
pub use crate::value::{Value, ValueKind};
pub use crate::verify::{OrderGuard, Verify};
pub use crate::warnings::Warning;
pub use crate::when::{IntoRehearsal, Rehearsal, SideEffectStub, Stub, When};
