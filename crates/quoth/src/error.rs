//! Error kinds and the internal failure channel.
//!
//! Two failure modes exist at runtime, mirroring the split the evaluator
//! contract requires:
//!
//! * **Abrupt failure** — `RunError::Fail`, carried through `RunResult` with
//!   `?`. The trampoline converts an abrupt failure into an unwind that no
//!   ordinary catch intercepts (only `rescue` does).
//! * **Raised error** — an error *value* in a frame's `out` slot with the
//!   `RAISED` cell flag. Assignment-side operations tolerate it; any step
//!   that would consume it as ordinary input promotes it to an abrupt
//!   failure.
//!
//! Halt is its own variant so resource/catch machinery can't swallow it.

use std::fmt;

use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can fail abruptly.
pub(crate) type RunResult<T> = Result<T, RunError>;

/// Classification of runtime errors.
///
/// The string form is the kebab-case id used in rendered messages
/// (e.g. `UnboundWord` -> "unbound-word").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "kebab-case")]
pub enum ErrorKind {
    // --- scanner ---
    /// Malformed source text; raised by the scanner before evaluation.
    Syntax,

    // --- binding ---
    /// A word with no binding was evaluated.
    UnboundWord,
    /// A word resolved to a variable that holds no usable value.
    UnsetVariable,
    /// A binding points at a context whose frame has already exited.
    InaccessibleContext,

    // --- argument ---
    /// A fulfilled argument failed its parameter's type constraint.
    TypeMismatch,
    /// The feed ended before a required argument could be fulfilled.
    MissingArgument,
    /// A spec block declared the same parameter name twice.
    DuplicateParameter,
    /// A path invoked an action with a refinement it does not declare.
    UnknownRefinement,
    /// A spec block item was not recognized.
    BadSpec,

    // --- evaluation ---
    /// A null cell appeared in an expression slot.
    BadNull,
    /// An enfix operation found no completed value to its left.
    NoLeftValue,
    /// A deferring enfix operator appeared where its left operand is
    /// still ambiguous (mid-fulfillment or against a comma barrier).
    AmbiguousInfix,
    /// An isotope was used where a stable value is required.
    BadIsotope,
    /// A void result was used where a value is required.
    NeedsValue,
    /// A path ended in a slash with nothing after it to apply to.
    PathApplyIncomplete,
    /// A set-group evaluated to something that cannot be assigned.
    BadSetTarget,
    /// A pick/poke step could not traverse the value it was given.
    BadPick,
    /// A value that is not an action was invoked.
    NotAnAction,
    /// A multi-return destructure had more targets than the pack has slots.
    PackTooShort,
    /// A condition slot held a value with no truthiness (void/unset).
    BadCondition,

    // --- math ---
    /// Division by zero.
    ZeroDivide,
    /// Integer overflow.
    Overflow,

    // --- resource ---
    /// Frame depth exceeded the configured bound.
    StackOverflow,
    /// Series allocation count exceeded the configured bound.
    AllocationLimit,
    /// Estimated heap memory exceeded the configured bound.
    MemoryLimit,
    /// The evaluator step budget was exhausted.
    BudgetExceeded,
    /// A mutation was attempted on a frozen series.
    FrozenSeries,
    /// A length-changing mutation was attempted on a held series.
    SeriesHeld,
    /// A write was attempted through a protected cell.
    Protected,

    // --- user requested ---
    /// Failure raised from script code via `fail`.
    UserError,
    /// The evaluation was halted from the outside.
    Halted,

    // --- host ---
    /// The engine was used after shutdown, or a handle was stale.
    BadHandle,
    /// A host-supplied value could not be represented as a cell.
    BadHostValue,

    /// A throw reached the root frame without a matching catch.
    UncaughtThrow,

    /// An invariant the core relies on was violated; always a bug.
    Internal,
}

/// A rendered runtime error.
///
/// This is the public error type: `kind` gives the machine-readable class,
/// `message` the human-readable detail, and `near` a molded excerpt of the
/// source position when one was available.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    /// Machine-readable classification.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Molded excerpt of where evaluation was when the error arose.
    pub near: Option<String>,
}

impl Error {
    /// Creates an error with no source excerpt.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            near: None,
        }
    }

    /// Attaches a molded source excerpt.
    #[must_use]
    pub(crate) fn with_near(mut self, near: String) -> Self {
        self.near = Some(near);
        self
    }

    /// Shorthand for an internal invariant violation.
    pub(crate) fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "** {} error: {}", self.kind, self.message)?;
        if let Some(near) = &self.near {
            write!(f, "\n** near: {near}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

/// Internal failure channel threaded through `RunResult`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum RunError {
    /// An abrupt failure carrying a rendered error.
    Fail(Box<Error>),
    /// A halt request; unwinds everything and only the root reports it.
    Halt,
}

impl RunError {
    /// Creates an abrupt failure.
    pub fn fail(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Fail(Box::new(Error::new(kind, message)))
    }

    /// An internal invariant violation; always a bug.
    pub fn internal_fail(message: impl Into<String>) -> Self {
        Self::fail(ErrorKind::Internal, message)
    }

    /// Converts into the public error type.
    pub fn into_error(self) -> Error {
        match self {
            Self::Fail(e) => *e,
            Self::Halt => Error::new(ErrorKind::Halted, "halted by request"),
        }
    }
}

impl From<Error> for RunError {
    fn from(e: Error) -> Self {
        Self::Fail(Box::new(e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_renders_kebab_case() {
        assert_eq!(ErrorKind::UnboundWord.to_string(), "unbound-word");
        assert_eq!(ErrorKind::ZeroDivide.to_string(), "zero-divide");
    }

    #[test]
    fn display_includes_near() {
        let err = Error::new(ErrorKind::TypeMismatch, "wanted integer!").with_near("[x + 1]".to_owned());
        let text = err.to_string();
        assert!(text.contains("type-mismatch"));
        assert!(text.contains("near: [x + 1]"));
    }
}
