use crate::context::TransactionContext;
use crate::definition::TransactionDefinition;
use crate::errors::{ErrorKind, TxError, TxResult};
use crate::manager::TransactionManager;
use crate::status::TransactionStatus;
use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};

/// Runs units of work inside managed transactions.
///
/// # Purpose
/// The template gets a status for its definition, runs the work, and commits when the work
/// succeeds. When the work fails or panics, the transaction is rolled back and the
/// failure is returned (or the panic resumed) unchanged.
///
/// # Failure handling
/// - work returns `Err` ⇒ rollback, then the work's error
/// - work panics ⇒ rollback, then the panic resumes
/// - the rollback itself fails ⇒ the rollback error is returned instead; a
///   `TransactionSystem` rollback error carries the work's failure as its
///   [`application_error`](TxError::application_error)
/// - commit fails ⇒ the commit error is returned unchanged
///
/// # Examples
///
/// ```rust
/// use txscope::context::TransactionContext;
/// use txscope::manager::TransactionManager;
/// use txscope::resource::InMemoryResource;
/// use txscope::template::TransactionTemplate;
///
/// let resource = InMemoryResource::new("ledger");
/// let manager = TransactionManager::builder(resource.driver()).build().unwrap();
/// let template = TransactionTemplate::new(manager);
/// let mut ctx = TransactionContext::new();
///
/// let total = template
///     .execute(&mut ctx, |ctx, _status| {
///         resource.put(ctx, "balance", "42")?;
///         Ok(42)
///     })
///     .unwrap();
/// assert_eq!(total, 42);
/// assert_eq!(resource.committed("balance"), Some("42".to_string()));
/// ```
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    manager: TransactionManager,
    definition: TransactionDefinition,
}

impl TransactionTemplate {
    /// Creates a template using the default definition.
    pub fn new(manager: TransactionManager) -> Self {
        TransactionTemplate {
            manager,
            definition: TransactionDefinition::default(),
        }
    }

    pub fn with_definition(manager: TransactionManager, definition: TransactionDefinition) -> Self {
        TransactionTemplate { manager, definition }
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    /// Runs `work` in a transaction and returns its result.
    pub fn execute<T, F>(&self, ctx: &mut TransactionContext, work: F) -> TxResult<T>
    where
        F: FnOnce(&mut TransactionContext, &mut TransactionStatus) -> TxResult<T>,
    {
        let mut status = self.manager.get_transaction(ctx, Some(&self.definition))?;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *ctx, &mut status)));

        match outcome {
            Ok(Ok(value)) => {
                self.manager.commit(ctx, &mut status)?;
                Ok(value)
            }
            Ok(Err(error)) => {
                self.rollback_on_failure(ctx, &mut status, &error)?;
                Err(error)
            }
            Err(payload) => {
                let failure = panic_failure(payload.as_ref());
                self.rollback_on_failure(ctx, &mut status, &failure)?;
                panic::resume_unwind(payload)
            }
        }
    }

    /// Runs `work` whose error type is not a [`TxError`].
    ///
    /// A work error rolls the transaction back and is reported as
    /// [`ErrorKind::UndeclaredFailure`] with the original error's messages attached as
    /// the cause.
    pub fn execute_fallible<T, E, F>(&self, ctx: &mut TransactionContext, work: F) -> TxResult<T>
    where
        E: Error + 'static,
        F: FnOnce(&mut TransactionContext, &mut TransactionStatus) -> Result<T, E>,
    {
        self.execute(ctx, |ctx, status| {
            work(ctx, status).map_err(|e| {
                TxError::new_with_cause(
                    "Transaction callback failed with undeclared error",
                    ErrorKind::UndeclaredFailure,
                    TxError::from_foreign(&e),
                )
            })
        })
    }

    /// Runs `work` that produces no value.
    pub fn execute_without_result<F>(&self, ctx: &mut TransactionContext, work: F) -> TxResult<()>
    where
        F: FnOnce(&mut TransactionContext, &mut TransactionStatus) -> TxResult<()>,
    {
        self.execute(ctx, work)
    }

    fn rollback_on_failure(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
        failure: &TxError,
    ) -> TxResult<()> {
        log::debug!("Initiating transaction rollback on application failure: {}", failure);
        match self.manager.rollback(ctx, status) {
            Ok(()) => Ok(()),
            Err(rollback_error) => {
                log::error!("Application failure overridden by rollback failure: {}", failure);
                if *rollback_error.kind() == ErrorKind::TransactionSystem {
                    Err(rollback_error.with_application_error(failure.clone()))
                } else {
                    Err(rollback_error)
                }
            }
        }
    }
}

fn panic_failure(payload: &(dyn Any + Send)) -> TxError {
    let message = if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    };
    TxError::new(
        &format!("Transaction callback panicked: {}", message),
        ErrorKind::ApplicationFailure,
    )
}
