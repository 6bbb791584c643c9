use std::fmt;

use crate::value::Value;

/// The single error type for all Decoy operations.
///
/// Every fallible Decoy API returns `decoy::Result<T>` (alias for
/// `Result<T, decoy::Error>`). Verification failures, rehearsal misuse, and
/// stub-configured raises all surface through this one enum so callers only
/// need to handle one error type. Non-fatal misuse is reported as a
/// [`Warning`](crate::Warning) instead and never interrupts control flow.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// A `verify` found the wrong number of matching calls. The payload
    /// renders the rehearsal and the actual-call listing.
    #[error("{0}")]
    VerificationFailed(Box<VerifyFailure>),

    /// `when`/`verify` was used without a rehearsal: the last-call channel
    /// was empty, or no expected interaction was configured before `then_*`.
    #[error(
        "No rehearsal found. Rehearse a call inside `when`/`verify`, or configure \
         the expected interaction with `called_with`, `get`, `set`, or `delete`."
    )]
    MissingRehearsal,

    /// `mock` received a contradictory specification.
    #[error("Invalid mock specification: {0}")]
    MockSpecInvalid(String),

    /// A synchronous surface was used asynchronously, or vice versa.
    #[error("Async mismatch on mock '{mock}': {detail}")]
    AsyncMismatch { mock: String, detail: String },

    /// A call did not bind to the spy's signature. Fatal only when the
    /// container was built with strict signatures.
    #[error("Call to mock '{mock}' does not match its signature: {reason}")]
    SignatureMismatch { mock: String, reason: String },

    /// A stub configured with `then_raise` answered the call.
    #[error("Mock raised: {0}")]
    Raised(Value),

    /// A captor was read before it captured anything.
    #[error("No value captured by captor.")]
    NoValueCaptured,

    /// A matcher could not be constructed, e.g. from a bad regex pattern.
    #[error("Invalid matcher: {0}")]
    InvalidMatcher(String),
}

impl Error {
    pub(crate) fn verification(failure: VerifyFailure) -> Self {
        Error::VerificationFailed(Box::new(failure))
    }

    pub(crate) fn async_mismatch(mock: impl Into<String>, detail: impl Into<String>) -> Self {
        Error::AsyncMismatch {
            mock: mock.into(),
            detail: detail.into(),
        }
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::VerificationFailed(a), Self::VerificationFailed(b)) => a == b,
            (Self::MissingRehearsal, Self::MissingRehearsal) => true,
            (Self::MockSpecInvalid(a), Self::MockSpecInvalid(b)) => a == b,
            (
                Self::AsyncMismatch { mock: a, detail: b },
                Self::AsyncMismatch { mock: c, detail: d },
            ) => a == c && b == d,
            (
                Self::SignatureMismatch { mock: a, reason: b },
                Self::SignatureMismatch { mock: c, reason: d },
            ) => a == c && b == d,
            (Self::Raised(a), Self::Raised(b)) => a == b,
            (Self::NoValueCaptured, Self::NoValueCaptured) => true,
            (Self::InvalidMatcher(a), Self::InvalidMatcher(b)) => a == b,
            _ => false,
        }
    }
}

/// The rendered payload of a [`Error::VerificationFailed`].
///
/// Lists the rehearsed interaction and every call that was considered, in
/// the shape the original diagnostics use:
///
/// ```text
/// Expected exactly 2 calls:
/// 1.  add(1, 2)
/// Found 3 calls:
/// 1.  add(1, 2)
/// 2.  add(3, 4)
/// 3.  add(1, 2)
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VerifyFailure {
    /// The rendered rehearsal, e.g. `add(1, 2)`.
    pub expected: String,
    /// The exact call count demanded, if one was.
    pub times: Option<u32>,
    /// Whether the failure happened inside an ordered verification scope.
    pub ordered: bool,
    /// Rendered records considered during matching, in log order.
    pub found: Vec<String>,
}

impl fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let heading = match (self.ordered, self.times) {
            (true, _) => "Expected call in order:".to_owned(),
            (false, Some(times)) => {
                format!("Expected exactly {}:", count(times as usize, "call"))
            }
            (false, None) => "Expected at least 1 call:".to_owned(),
        };
        writeln!(f, "{heading}")?;
        writeln!(f, "1.\t{}", self.expected)?;

        if self.found.is_empty() {
            write!(f, "Found 0 calls.")
        } else {
            write!(f, "Found {}:", count(self.found.len(), "call"))?;
            for (i, call) in self.found.iter().enumerate() {
                write!(f, "\n{}.\t{}", i + 1, call)?;
            }
            Ok(())
        }
    }
}

/// Pluralises a noun for diagnostics: `count(1, "call")` is `1 call`.
pub(crate) fn count(n: usize, noun: &str) -> String {
    if n == 1 {
        format!("{n} {noun}")
    } else {
        format!("{n} {noun}s")
    }
}

/// Convenience alias for `Result<T, decoy::Error>`.
pub type Result<T = ()> = std::result::Result<T, Error>;
