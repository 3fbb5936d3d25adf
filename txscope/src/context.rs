//! Per-execution-context transaction state.

use crate::definition::Isolation;
use crate::errors::{ErrorKind, TxError, TxResult};
use crate::resource::{ResourceHandle, ResourceHolder};
use crate::synchronization::{SharedSynchronization, SynchronizationRegistry};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use uuid::Uuid;

/// State of one logical execution context.
///
/// # Purpose
/// A `TransactionContext` holds everything a transaction manager needs to know about the
/// work currently running: the resource transactions bound per resource key, the active
/// synchronization scope and metadata describing the current transaction.
///
/// # Usage
/// Create one context per logical execution context (request, job, thread) and pass it
/// `&mut` through every call that begins, joins or completes a transaction. Nested calls
/// see whatever the outer calls bound. Contexts are never shared between concurrently
/// running work.
///
/// # Examples
///
/// ```rust
/// use std::sync::Arc;
/// use txscope::context::TransactionContext;
/// use txscope::synchronization::TransactionSynchronization;
///
/// struct Audit;
/// impl TransactionSynchronization for Audit {}
///
/// let mut ctx = TransactionContext::new();
/// assert!(ctx.register_synchronization(Arc::new(Audit)).is_err());
///
/// ctx.init_synchronization().unwrap();
/// ctx.register_synchronization(Arc::new(Audit)).unwrap();
/// assert_eq!(ctx.synchronizations().unwrap().len(), 1);
/// ```
pub struct TransactionContext {
    id: String,
    resources: HashMap<String, ResourceHolder>,
    synchronizations: Option<SynchronizationRegistry>,
    current_transaction_name: Option<String>,
    current_transaction_read_only: bool,
    current_transaction_isolation: Option<Isolation>,
    actual_transaction_active: bool,
}

impl Default for TransactionContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionContext {
    pub fn new() -> Self {
        TransactionContext {
            id: Uuid::new_v4().to_string(),
            resources: HashMap::new(),
            synchronizations: None,
            current_transaction_name: None,
            current_transaction_read_only: false,
            current_transaction_isolation: None,
            actual_transaction_active: false,
        }
    }

    /// Unique identifier of this context, used in log output.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn has_resource(&self, key: &str) -> bool {
        self.resources.contains_key(key)
    }

    pub fn resource(&self, key: &str) -> Option<&ResourceHolder> {
        self.resources.get(key)
    }

    /// Handle of the resource transaction bound under `key`, if any.
    pub fn resource_handle(&self, key: &str) -> Option<ResourceHandle> {
        self.resources.get(key).map(|holder| holder.handle().clone())
    }

    /// Binds a resource holder under `key`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` if a holder is already bound under `key`.
    pub fn bind_resource(&mut self, key: &str, holder: ResourceHolder) -> TxResult<()> {
        if let Some(existing) = self.resources.get(key) {
            log::error!(
                "Already value [{:?}] for key '{}' bound in context {}",
                existing,
                key,
                self.id
            );
            return Err(TxError::new(
                &format!("Already value [{}] for key '{}' bound to context", existing.handle(), key),
                ErrorKind::IllegalTransactionState,
            ));
        }
        log::trace!("Bound resource {} for key '{}' in context {}", holder.handle(), key, self.id);
        self.resources.insert(key.to_string(), holder);
        Ok(())
    }

    /// Unbinds the holder bound under `key`.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` if nothing is bound under `key`.
    pub fn unbind_resource(&mut self, key: &str) -> TxResult<ResourceHolder> {
        match self.resources.remove(key) {
            Some(holder) => {
                log::trace!("Unbound resource {} for key '{}' from context {}", holder.handle(), key, self.id);
                Ok(holder)
            }
            None => {
                log::error!("No value for key '{}' bound in context {}", key, self.id);
                Err(TxError::new(
                    &format!("No value for key '{}' bound to context", key),
                    ErrorKind::IllegalTransactionState,
                ))
            }
        }
    }

    /// Unbinds the holder bound under `key`, if there is one.
    pub fn unbind_resource_if_possible(&mut self, key: &str) -> Option<ResourceHolder> {
        self.resources.remove(key)
    }

    pub fn is_synchronization_active(&self) -> bool {
        self.synchronizations.is_some()
    }

    /// Opens a synchronization scope.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` if a scope is already active.
    pub fn init_synchronization(&mut self) -> TxResult<()> {
        if self.synchronizations.is_some() {
            log::error!("Cannot activate transaction synchronization - already active");
            return Err(TxError::new(
                "Cannot activate transaction synchronization - already active",
                ErrorKind::IllegalTransactionState,
            ));
        }
        log::trace!("Initializing transaction synchronization in context {}", self.id);
        self.synchronizations = Some(SynchronizationRegistry::new());
        Ok(())
    }

    /// Registers a synchronization with the active scope.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` if no scope is active.
    pub fn register_synchronization(&mut self, synchronization: SharedSynchronization) -> TxResult<()> {
        match self.synchronizations.as_mut() {
            Some(registry) => {
                registry.register(synchronization);
                Ok(())
            }
            None => Err(synchronization_not_active()),
        }
    }

    /// Ordered snapshot of the registered synchronizations.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` if no scope is active.
    pub fn synchronizations(&self) -> TxResult<Vec<SharedSynchronization>> {
        match &self.synchronizations {
            Some(registry) => Ok(registry.ordered()),
            None => Err(synchronization_not_active()),
        }
    }

    /// Closes the active synchronization scope.
    ///
    /// # Errors
    ///
    /// Returns `IllegalTransactionState` if no scope is active.
    pub fn clear_synchronization(&mut self) -> TxResult<()> {
        if self.synchronizations.take().is_none() {
            log::error!("Cannot deactivate transaction synchronization - not active");
            return Err(TxError::new(
                "Cannot deactivate transaction synchronization - not active",
                ErrorKind::IllegalTransactionState,
            ));
        }
        log::trace!("Clearing transaction synchronization in context {}", self.id);
        Ok(())
    }

    pub fn current_transaction_name(&self) -> Option<&str> {
        self.current_transaction_name.as_deref()
    }

    pub fn is_current_transaction_read_only(&self) -> bool {
        self.current_transaction_read_only
    }

    /// Isolation of the current transaction, `None` when it uses the resource default.
    pub fn current_transaction_isolation(&self) -> Option<Isolation> {
        self.current_transaction_isolation
    }

    /// Whether an actual resource transaction is active, as opposed to a scope that only
    /// carries synchronizations.
    pub fn is_actual_transaction_active(&self) -> bool {
        self.actual_transaction_active
    }

    pub(crate) fn set_current_transaction_name(&mut self, name: Option<String>) {
        self.current_transaction_name = name;
    }

    pub(crate) fn set_current_transaction_read_only(&mut self, read_only: bool) {
        self.current_transaction_read_only = read_only;
    }

    pub(crate) fn set_current_transaction_isolation(&mut self, isolation: Option<Isolation>) {
        self.current_transaction_isolation = isolation;
    }

    pub(crate) fn set_actual_transaction_active(&mut self, active: bool) {
        self.actual_transaction_active = active;
    }

    /// Snapshot of the registered synchronizations, empty when no scope is active.
    pub(crate) fn synchronization_snapshot(&self) -> Vec<SharedSynchronization> {
        self.synchronizations
            .as_ref()
            .map(|registry| registry.ordered())
            .unwrap_or_default()
    }

    /// Drops the synchronization scope, if any, keeping the transaction metadata.
    pub(crate) fn close_synchronization_scope(&mut self) {
        self.synchronizations = None;
    }

    /// Drops the synchronization scope and resets all transaction metadata.
    ///
    /// Bound resources are left untouched.
    pub fn clear(&mut self) {
        self.synchronizations = None;
        self.current_transaction_name = None;
        self.current_transaction_read_only = false;
        self.current_transaction_isolation = None;
        self.actual_transaction_active = false;
    }
}

fn synchronization_not_active() -> TxError {
    TxError::new(
        "Transaction synchronization is not active",
        ErrorKind::IllegalTransactionState,
    )
}

impl Debug for TransactionContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("resources", &self.resources)
            .field("synchronizations", &self.synchronizations)
            .field("current_transaction_name", &self.current_transaction_name)
            .field("current_transaction_read_only", &self.current_transaction_read_only)
            .field("current_transaction_isolation", &self.current_transaction_isolation)
            .field("actual_transaction_active", &self.actual_transaction_active)
            .finish()
    }
}
