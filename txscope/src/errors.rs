use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;
use std::sync::Arc;

/// Outcome reported by a resource coordinator that could not guarantee a uniform
/// commit or rollback across every enlisted resource.
///
/// The numeric state values are stable and exposed through [`TxError::outcome_state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeuristicOutcome {
    /// The coordinator cannot tell what happened.
    Unknown,
    /// All resources committed, although the coordinator decided heuristically.
    Committed,
    /// All resources rolled back.
    RolledBack,
    /// Some resources committed while others rolled back.
    Mixed,
}

impl HeuristicOutcome {
    /// Returns the numeric outcome state (`0` unknown, `1` committed, `2` rolled back, `3` mixed).
    pub fn state(&self) -> i32 {
        match self {
            HeuristicOutcome::Unknown => 0,
            HeuristicOutcome::Committed => 1,
            HeuristicOutcome::RolledBack => 2,
            HeuristicOutcome::Mixed => 3,
        }
    }

    /// Maps a numeric outcome state back to the enum. Unrecognized values map to `Unknown`.
    pub fn from_state(state: i32) -> Self {
        match state {
            1 => HeuristicOutcome::Committed,
            2 => HeuristicOutcome::RolledBack,
            3 => HeuristicOutcome::Mixed,
            _ => HeuristicOutcome::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HeuristicOutcome::Unknown => "unknown",
            HeuristicOutcome::Committed => "committed",
            HeuristicOutcome::RolledBack => "rolled back",
            HeuristicOutcome::Mixed => "mixed",
        }
    }
}

impl Display for HeuristicOutcome {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error kinds for transaction coordination.
///
/// Every failure surfaced by the core carries exactly one kind. None of them are retried
/// by the core; retrying is left to whoever wraps the [`TransactionTemplate`](crate::template::TransactionTemplate).
///
/// # Examples
///
/// ```rust
/// use txscope::errors::{ErrorKind, TxError, TxResult};
///
/// fn example() -> TxResult<()> {
///     Err(TxError::new("Transaction is already completed", ErrorKind::IllegalTransactionState))
/// }
/// assert_eq!(*example().unwrap_err().kind(), ErrorKind::IllegalTransactionState);
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Propagation and lifecycle errors
    /// Propagation conflict, or commit/rollback on a completed status
    IllegalTransactionState,
    /// Commit was requested but the transaction had been marked rollback-only
    UnexpectedRollback,
    /// The coordinator reported a non-uniform outcome
    HeuristicCompletion(HeuristicOutcome),
    /// Infrastructure failure during begin/commit/rollback
    TransactionSystem,
    /// Nested propagation requested against a resource without savepoints
    NestedTransactionNotSupported,
    /// The underlying resource transaction could not be started
    CannotCreateTransaction,

    // Definition errors
    /// Timeout below the `-1` default marker
    InvalidTimeout,

    // Resource driver errors, translated by the manager
    /// Deadline of the transaction has passed
    TransactionTimedOut,
    /// Write attempted inside a read-only transaction
    ReadOnlyViolation,
    /// Raw failure reported by a resource driver
    ResourceFailure,

    // Unit-of-work errors
    /// Failure raised by application code running inside a transaction
    ApplicationFailure,
    /// Foreign error type escaping a unit of work that declares `TxResult`
    UndeclaredFailure,

    // Generic errors
    /// Operation not valid in the current state (e.g. frozen configuration)
    InvalidOperation,
    /// Generic IO error
    IOError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::IllegalTransactionState => write!(f, "Illegal transaction state"),
            ErrorKind::UnexpectedRollback => write!(f, "Unexpected rollback"),
            ErrorKind::HeuristicCompletion(outcome) => {
                write!(f, "Heuristic completion ({})", outcome)
            }
            ErrorKind::TransactionSystem => write!(f, "Transaction system error"),
            ErrorKind::NestedTransactionNotSupported => {
                write!(f, "Nested transaction not supported")
            }
            ErrorKind::CannotCreateTransaction => write!(f, "Cannot create transaction"),
            ErrorKind::InvalidTimeout => write!(f, "Invalid timeout"),
            ErrorKind::TransactionTimedOut => write!(f, "Transaction timed out"),
            ErrorKind::ReadOnlyViolation => write!(f, "Read-only violation"),
            ErrorKind::ResourceFailure => write!(f, "Resource failure"),
            ErrorKind::ApplicationFailure => write!(f, "Application failure"),
            ErrorKind::UndeclaredFailure => write!(f, "Undeclared failure"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::IOError => write!(f, "IO error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type of the coordination core.
///
/// `TxError` carries a message, a kind, an optional cause and, for
/// [`ErrorKind::TransactionSystem`] errors raised while handling a failed unit of work,
/// the application error that triggered the rollback. Both are preserved so the caller
/// sees why the rollback could not complete as well as what started it.
///
/// # Examples
///
/// ```rust
/// use txscope::errors::{ErrorKind, TxError};
///
/// let cause = TxError::new("connection reset", ErrorKind::ResourceFailure);
/// let err = TxError::new_with_cause("Could not commit transaction", ErrorKind::TransactionSystem, cause);
/// assert!(err.cause().is_some());
/// ```
#[derive(Clone)]
pub struct TxError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<TxError>>,
    application_error: Option<Box<TxError>>,
    backtrace: Arc<Backtrace>,
}

impl TxError {
    /// Creates a new `TxError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        TxError {
            message: message.to_string(),
            error_kind,
            cause: None,
            application_error: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Creates a new `TxError` with a cause error.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: TxError) -> Self {
        TxError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            application_error: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Creates a heuristic completion error for the given outcome.
    ///
    /// The message always names the outcome, e.g. `"Heuristic completion: outcome state is mixed"`.
    pub fn heuristic(outcome: HeuristicOutcome, cause: Option<TxError>) -> Self {
        let message = format!("Heuristic completion: outcome state is {}", outcome);
        TxError {
            message,
            error_kind: ErrorKind::HeuristicCompletion(outcome),
            cause: cause.map(Box::new),
            application_error: None,
            backtrace: Arc::new(Backtrace::new()),
        }
    }

    /// Converts a foreign error into an [`ErrorKind::ApplicationFailure`], keeping the
    /// message of every error in its source chain.
    pub fn from_foreign(err: &(dyn Error + 'static)) -> Self {
        let mut message = err.to_string();
        let mut source = err.source();
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        TxError::new(&message, ErrorKind::ApplicationFailure)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&TxError> {
        self.cause.as_deref()
    }

    /// The application error that was being handled when this error occurred, if any.
    pub fn application_error(&self) -> Option<&TxError> {
        self.application_error.as_deref()
    }

    /// Attaches the application error that was being handled when this error occurred.
    ///
    /// The first attached application error wins; later calls keep it.
    pub fn with_application_error(mut self, application_error: TxError) -> Self {
        if self.application_error.is_none() {
            self.application_error = Some(Box::new(application_error));
        } else {
            log::warn!(
                "Application error already attached to '{}', ignoring '{}'",
                self.message,
                application_error
            );
        }
        self
    }

    /// Numeric heuristic outcome state, for heuristic completion errors.
    pub fn outcome_state(&self) -> Option<i32> {
        match &self.error_kind {
            ErrorKind::HeuristicCompletion(outcome) => Some(outcome.state()),
            _ => None,
        }
    }

    pub fn is_heuristic(&self) -> bool {
        matches!(self.error_kind, ErrorKind::HeuristicCompletion(_))
    }
}

impl Display for TxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for TxError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} [{}]", self.message, self.error_kind)?;
        if let Some(app) = &self.application_error {
            write!(f, "\nWhile handling application error: {}", app)?;
        }
        match &self.cause {
            Some(cause) => write!(f, "\nCaused by: {:?}", cause),
            None => write!(f, "\n{:?}", self.backtrace),
        }
    }
}

impl Error for TxError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

/// A result type alias for coordination operations.
pub type TxResult<T> = Result<T, TxError>;

impl From<std::io::Error> for TxError {
    fn from(err: std::io::Error) -> Self {
        TxError::new(&format!("IO error: {}", err), ErrorKind::IOError)
    }
}

impl From<String> for TxError {
    fn from(msg: String) -> Self {
        TxError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for TxError {
    fn from(msg: &str) -> Self {
        TxError::new(msg, ErrorKind::InternalError)
    }
}
