//! Error taxonomy of the cursor runtime.
//!
//! Budgeted operations distinguish three non-value outcomes, carried by
//! [`Interrupt`]:
//!  - [`Interrupt::More`]: the budget ran out (or the sabotage flag tripped)
//!    at a resumable point. The cursor saved its call state; re-invoking the
//!    same operation with the same arguments resumes exactly where it left
//!    off.
//!  - [`Interrupt::No`]: terminal empty outcome (end of iteration, nothing
//!    found).
//!  - [`Interrupt::Fail`]: a hard [`Error`]. These propagate unchanged; the
//!    runtime never retries them.
//!
//! The "already satisfied" outcome of `restrict` is not an error at all and
//! is modeled by [`crate::iter::Restriction::Unchanged`].

use thiserror::Error;

/// Hard failures of the cursor runtime.
#[derive(Debug, Error)]
pub enum EngineError {
    /// A morph target turned out to hold more ids than its shape allows.
    /// The morph is abandoned and the originating cursor kept.
    #[error("too many matches for the attempted cursor rewrite")]
    TooManyMatches,

    /// The request deadline fired; the whole request is beyond saving.
    #[error("request too hard: deadline exceeded")]
    TooHard,

    /// A thawed cursor's state is self-inconsistent.
    #[error("bad cursor: {0}")]
    BadCursor(String),

    /// A cursor string failed to parse.
    #[error("cursor syntax: {0}")]
    Lexical(String),

    /// The primitive store reported a failure.
    #[error("store: {0}")]
    Store(String),
}

/// Non-value outcome of a budgeted cursor operation.
#[derive(Debug)]
pub enum Interrupt {
    /// Out of budget at a resumable point; call again to continue.
    More,
    /// No (further) result; terminal for this operation.
    No,
    /// Hard failure.
    Fail(EngineError),
}

impl Interrupt {
    pub fn is_more(&self) -> bool {
        matches!(self, Interrupt::More)
    }

    pub fn is_no(&self) -> bool {
        matches!(self, Interrupt::No)
    }
}

impl From<EngineError> for Interrupt {
    fn from(e: EngineError) -> Self {
        Interrupt::Fail(e)
    }
}

/// Result of a budgeted operation: a value, or an [`Interrupt`].
pub type Budgeted<T> = Result<T, Interrupt>;

/// Shorthand for constructing a lexical error with context.
pub(crate) fn lexical(context: &str, detail: impl std::fmt::Display) -> EngineError {
    EngineError::Lexical(format!("{context}: {detail}"))
}
