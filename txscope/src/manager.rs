//! The transaction manager: propagation decisions, commit and rollback sequencing,
//! suspension and resumption of outer transactions.

use crate::context::TransactionContext;
use crate::definition::{Isolation, Propagation, TransactionDefinition, TIMEOUT_DEFAULT};
use crate::errors::{ErrorKind, TxError, TxResult};
use crate::manager_builder::TransactionManagerBuilder;
use crate::manager_config::{SynchronizationPolicy, TransactionManagerConfig};
use crate::resource::{ResourceDriver, ResourceHandle, ResourceHolder};
use crate::status::TransactionStatus;
use crate::suspension::SuspendedResourcesHolder;
use crate::synchronization::{
    invoke_after_completion, trigger_after_commit, trigger_before_commit,
    trigger_before_completion, SharedSynchronization, SynchronizationStatus,
};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// Coordinates transaction boundaries for one resource driver.
///
/// # Purpose
/// `TransactionManager` decides, for each unit of work, whether to begin a new resource
/// transaction, join the current one, create a savepoint, or run without a transaction. It
/// sequences synchronization callbacks around commit and rollback and restores any
/// suspended outer transaction once an inner one completes.
///
/// # Usage
/// Every call takes the caller's [`TransactionContext`]; the manager itself holds no
/// per-context state and can be cloned and shared freely.
///
/// ```rust
/// use txscope::context::TransactionContext;
/// use txscope::definition::{Propagation, TransactionDefinition};
/// use txscope::manager::TransactionManager;
/// use txscope::resource::InMemoryResource;
///
/// let resource = InMemoryResource::new("inventory");
/// let manager = TransactionManager::builder(resource.driver()).build().unwrap();
/// let mut ctx = TransactionContext::new();
///
/// let mut outer = manager.get_transaction(&mut ctx, None).unwrap();
/// let mut inner = manager
///     .get_transaction(&mut ctx, Some(&TransactionDefinition::with_propagation(Propagation::Required)))
///     .unwrap();
/// assert!(outer.is_new_transaction());
/// assert!(!inner.is_new_transaction());
///
/// manager.commit(&mut ctx, &mut inner).unwrap();
/// manager.commit(&mut ctx, &mut outer).unwrap();
/// ```
///
/// # Thread Safety
/// The manager is `Send + Sync`. Contexts and statuses are not shared between threads.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

impl TransactionManager {
    pub fn builder(driver: ResourceDriver) -> TransactionManagerBuilder {
        TransactionManagerBuilder::new(driver)
    }

    pub(crate) fn new(driver: ResourceDriver, config: TransactionManagerConfig) -> Self {
        TransactionManager {
            inner: Arc::new(TransactionManagerInner { driver, config }),
        }
    }
}

impl Deref for TransactionManager {
    type Target = TransactionManagerInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Debug for TransactionManager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("driver", &self.inner.driver)
            .field("config", &self.inner.config)
            .finish()
    }
}

#[doc(hidden)]
pub struct TransactionManagerInner {
    driver: ResourceDriver,
    config: TransactionManagerConfig,
}

impl TransactionManagerInner {
    pub fn driver(&self) -> &ResourceDriver {
        &self.driver
    }

    pub fn config(&self) -> &TransactionManagerConfig {
        &self.config
    }

    /// Returns a status for a unit of work described by `definition`, applying its
    /// propagation to whatever transaction is active in `ctx`.
    ///
    /// A missing definition means the default definition (`Required`).
    ///
    /// # Errors
    ///
    /// - `IllegalTransactionState` on a propagation conflict (`Mandatory` without, or
    ///   `Never` with, an existing transaction) or a failed join validation
    /// - `NestedTransactionNotSupported` when `Nested` cannot be honored
    /// - `InvalidTimeout` for a timeout below `-1`
    /// - `CannotCreateTransaction` when the driver fails to begin
    pub fn get_transaction(
        &self,
        ctx: &mut TransactionContext,
        definition: Option<&TransactionDefinition>,
    ) -> TxResult<TransactionStatus> {
        let default_definition;
        let definition = match definition {
            Some(definition) => definition,
            None => {
                default_definition = TransactionDefinition::default();
                &default_definition
            }
        };

        if let Some(existing) = self.existing_transaction(ctx) {
            return self.handle_existing_transaction(ctx, definition, existing);
        }

        if definition.timeout() < TIMEOUT_DEFAULT {
            log::error!("Invalid transaction timeout {}", definition.timeout());
            return Err(TxError::new(
                &format!("Invalid transaction timeout: {}", definition.timeout()),
                ErrorKind::InvalidTimeout,
            ));
        }

        match definition.propagation() {
            Propagation::Mandatory => {
                log::error!("No existing transaction found for transaction marked with propagation 'mandatory'");
                Err(TxError::new(
                    "No existing transaction found for transaction marked with propagation 'mandatory'",
                    ErrorKind::IllegalTransactionState,
                ))
            }
            Propagation::Required | Propagation::RequiresNew | Propagation::Nested => {
                let suspended = self.suspend(ctx, None)?;
                log::debug!(
                    "Creating new transaction with name [{}]: {}",
                    definition.name().unwrap_or(""),
                    definition
                );
                self.start_transaction(ctx, definition, suspended)
            }
            Propagation::Supports | Propagation::NotSupported | Propagation::Never => {
                if definition.isolation() != Isolation::Default {
                    log::warn!(
                        "Custom isolation level specified but no actual transaction initiated; \
                         isolation level will effectively be ignored: {}",
                        definition
                    );
                }
                let new_synchronization =
                    self.config.synchronization_policy() == SynchronizationPolicy::Always;
                self.prepare_transaction_status(ctx, definition, None, true, new_synchronization, None)
            }
        }
    }

    /// Commits the unit of work represented by `status`.
    ///
    /// A status marked rollback-only is rolled back instead. If the shared transaction was
    /// marked rollback-only by a participant, it is rolled back and the owner receives
    /// `UnexpectedRollback`.
    ///
    /// # Errors
    ///
    /// - `IllegalTransactionState` if the status is already completed
    /// - `UnexpectedRollback` if the transaction was rolled back instead of committed
    /// - `HeuristicCompletion` or `TransactionSystem` if the driver commit fails
    /// - whatever a `before_commit` or `after_commit` callback returned
    pub fn commit(&self, ctx: &mut TransactionContext, status: &mut TransactionStatus) -> TxResult<()> {
        if status.is_completed() {
            return Err(already_completed());
        }

        if status.is_local_rollback_only() {
            log::debug!("Transactional code has requested rollback");
            return self.process_rollback(ctx, status, false);
        }

        if status.is_global_rollback_only() {
            log::debug!("Global transaction is marked as rollback-only but transactional code requested commit");
            return self.process_rollback(ctx, status, true);
        }

        self.process_commit(ctx, status)
    }

    /// Rolls back the unit of work represented by `status`.
    ///
    /// A participant does not roll back the shared transaction itself; it marks it
    /// rollback-only so the owner rolls it back.
    ///
    /// # Errors
    ///
    /// - `IllegalTransactionState` if the status is already completed
    /// - `TransactionSystem` if the driver rollback fails
    pub fn rollback(&self, ctx: &mut TransactionContext, status: &mut TransactionStatus) -> TxResult<()> {
        if status.is_completed() {
            return Err(already_completed());
        }
        self.process_rollback(ctx, status, false)
    }

    fn existing_transaction(&self, ctx: &TransactionContext) -> Option<ResourceHolder> {
        ctx.resource(&self.driver.resource_key())
            .filter(|holder| holder.is_transaction_active())
            .cloned()
    }

    fn handle_existing_transaction(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        existing: ResourceHolder,
    ) -> TxResult<TransactionStatus> {
        match definition.propagation() {
            Propagation::Never => {
                log::error!("Existing transaction found for transaction marked with propagation 'never'");
                Err(TxError::new(
                    "Existing transaction found for transaction marked with propagation 'never'",
                    ErrorKind::IllegalTransactionState,
                ))
            }
            Propagation::NotSupported => {
                log::debug!("Suspending current transaction {}", existing.handle());
                let suspended = self.suspend(ctx, Some(existing))?;
                let new_synchronization =
                    self.config.synchronization_policy() == SynchronizationPolicy::Always;
                self.prepare_transaction_status(ctx, definition, None, false, new_synchronization, suspended)
            }
            Propagation::RequiresNew => {
                log::debug!(
                    "Suspending current transaction {}, creating new transaction with name [{}]",
                    existing.handle(),
                    definition.name().unwrap_or("")
                );
                let suspended = self.suspend(ctx, Some(existing))?;
                self.start_transaction(ctx, definition, suspended)
            }
            Propagation::Nested => self.handle_nested(ctx, definition, existing),
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                self.join(ctx, definition, existing)
            }
        }
    }

    fn handle_nested(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        existing: ResourceHolder,
    ) -> TxResult<TransactionStatus> {
        if !self.config.is_nested_transaction_allowed() {
            log::error!("Nested transaction requested but nested transactions are disabled");
            return Err(TxError::new(
                "Transaction manager does not allow nested transactions - \
                 enable 'nested_transaction_allowed' to use propagation 'nested'",
                ErrorKind::NestedTransactionNotSupported,
            ));
        }

        if self.driver.supports_savepoints() {
            log::debug!("Creating nested transaction with name [{}]", definition.name().unwrap_or(""));
            let mut status =
                self.prepare_transaction_status(ctx, definition, Some(existing), false, false, None)?;
            status.create_and_hold_savepoint()?;
            return Ok(status);
        }

        if self.config.is_strict_nested() {
            log::error!(
                "Resource '{}' does not support savepoints, cannot honor propagation 'nested'",
                self.driver.resource_key()
            );
            return Err(TxError::new(
                &format!(
                    "Resource '{}' does not support savepoints - cannot create nested transaction",
                    self.driver.resource_key()
                ),
                ErrorKind::NestedTransactionNotSupported,
            ));
        }

        log::debug!(
            "Resource '{}' does not support savepoints, joining existing transaction instead",
            self.driver.resource_key()
        );
        self.join(ctx, definition, existing)
    }

    fn join(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        existing: ResourceHolder,
    ) -> TxResult<TransactionStatus> {
        log::debug!("Participating in existing transaction {}", existing.handle());
        if self.config.is_validate_existing_transaction() {
            self.validate_existing_transaction(ctx, definition)?;
        }
        let new_synchronization =
            self.config.synchronization_policy() != SynchronizationPolicy::Never;
        self.prepare_transaction_status(ctx, definition, Some(existing), false, new_synchronization, None)
    }

    fn validate_existing_transaction(
        &self,
        ctx: &TransactionContext,
        definition: &TransactionDefinition,
    ) -> TxResult<()> {
        if definition.isolation() != Isolation::Default
            && ctx.current_transaction_isolation() != Some(definition.isolation())
        {
            let current = ctx
                .current_transaction_isolation()
                .map(|it| it.to_string())
                .unwrap_or_else(|| "(unknown)".to_string());
            log::error!("Isolation mismatch joining transaction: requested {}, active {}", definition.isolation(), current);
            return Err(TxError::new(
                &format!(
                    "Participating transaction with definition [{}] specifies isolation level \
                     which is incompatible with existing transaction: {}",
                    definition, current
                ),
                ErrorKind::IllegalTransactionState,
            ));
        }
        if !definition.is_read_only() && ctx.is_current_transaction_read_only() {
            log::error!("Read-write definition joining read-only transaction: {}", definition);
            return Err(TxError::new(
                &format!(
                    "Participating transaction with definition [{}] is not marked as read-only \
                     but existing transaction is",
                    definition
                ),
                ErrorKind::IllegalTransactionState,
            ));
        }
        Ok(())
    }

    fn start_transaction(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> TxResult<TransactionStatus> {
        let holder = match self.do_begin(ctx, definition) {
            Ok(holder) => holder,
            Err(error) => return Err(self.resume_after_begin_failure(ctx, suspended, error)),
        };

        let new_synchronization =
            self.config.synchronization_policy() != SynchronizationPolicy::Never;
        self.prepare_transaction_status(ctx, definition, Some(holder), true, new_synchronization, suspended)
    }

    fn do_begin(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
    ) -> TxResult<ResourceHolder> {
        let timeout = self.effective_timeout(definition);
        let key = self.driver.resource_key();
        let handle = self
            .driver
            .begin(definition.isolation(), timeout, definition.is_read_only())
            .map_err(|e| {
                log::error!("Could not begin transaction on resource '{}': {}", key, e);
                match e.kind() {
                    ErrorKind::CannotCreateTransaction => e,
                    _ => TxError::new_with_cause(
                        &format!("Could not begin transaction on resource '{}'", key),
                        ErrorKind::CannotCreateTransaction,
                        e,
                    ),
                }
            })?;
        log::debug!("Began resource transaction {} on '{}'", handle, key);

        let holder = ResourceHolder::new(handle);
        holder.set_transaction_active(true);
        if let Err(e) = ctx.bind_resource(&key, holder.clone()) {
            if let Err(rollback_error) = self.driver.rollback(holder.handle()) {
                log::error!("Could not roll back unbound transaction {}: {}", holder.handle(), rollback_error);
            }
            return Err(e);
        }
        Ok(holder)
    }

    fn effective_timeout(&self, definition: &TransactionDefinition) -> i32 {
        if definition.timeout() != TIMEOUT_DEFAULT {
            definition.timeout()
        } else {
            self.config.default_timeout()
        }
    }

    fn resume_after_begin_failure(
        &self,
        ctx: &mut TransactionContext,
        suspended: Option<SuspendedResourcesHolder>,
        begin_error: TxError,
    ) -> TxError {
        match self.resume(ctx, suspended) {
            Ok(()) => begin_error,
            Err(resume_error) => {
                log::error!(
                    "Inner transaction begin failure overridden by outer transaction resume failure: {}",
                    begin_error
                );
                resume_error
            }
        }
    }

    fn prepare_transaction_status(
        &self,
        ctx: &mut TransactionContext,
        definition: &TransactionDefinition,
        transaction: Option<ResourceHolder>,
        new_transaction: bool,
        new_synchronization: bool,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> TxResult<TransactionStatus> {
        let actual_new_synchronization = new_synchronization && !ctx.is_synchronization_active();
        let status = TransactionStatus::new(
            transaction,
            self.driver.clone(),
            definition.name().map(|it| it.to_string()),
            new_transaction,
            actual_new_synchronization,
            definition.is_read_only(),
            suspended,
        );

        if status.is_new_synchronization() {
            ctx.set_actual_transaction_active(status.has_transaction());
            ctx.set_current_transaction_isolation(match definition.isolation() {
                Isolation::Default => None,
                isolation => Some(isolation),
            });
            ctx.set_current_transaction_read_only(definition.is_read_only());
            ctx.set_current_transaction_name(definition.name().map(|it| it.to_string()));
            ctx.init_synchronization()?;
        }
        Ok(status)
    }

    fn suspend(
        &self,
        ctx: &mut TransactionContext,
        transaction: Option<ResourceHolder>,
    ) -> TxResult<Option<SuspendedResourcesHolder>> {
        if ctx.is_synchronization_active() {
            let suspended_synchronizations = self.suspend_synchronizations(ctx)?;
            let suspended_resource = match transaction {
                Some(_) => match self.unbind_transaction(ctx) {
                    Ok(holder) => Some(holder),
                    Err(e) => {
                        if let Err(resume_error) =
                            self.resume_synchronizations(ctx, suspended_synchronizations)
                        {
                            log::error!("Could not restore synchronizations after failed suspend: {}", resume_error);
                        }
                        return Err(e);
                    }
                },
                None => None,
            };

            let holder = SuspendedResourcesHolder {
                suspended_resource,
                suspended_synchronizations: Some(suspended_synchronizations),
                name: ctx.current_transaction_name().map(|it| it.to_string()),
                read_only: ctx.is_current_transaction_read_only(),
                isolation: ctx.current_transaction_isolation(),
                was_active: ctx.is_actual_transaction_active(),
            };
            ctx.clear();
            Ok(Some(holder))
        } else if transaction.is_some() {
            let holder = self.unbind_transaction(ctx)?;
            Ok(Some(SuspendedResourcesHolder::from_resource(holder)))
        } else {
            Ok(None)
        }
    }

    fn suspend_synchronizations(
        &self,
        ctx: &mut TransactionContext,
    ) -> TxResult<Vec<SharedSynchronization>> {
        let synchronizations = ctx.synchronizations()?;
        for (index, synchronization) in synchronizations.iter().enumerate() {
            if let Err(e) = synchronization.suspend() {
                // the scope stays active, so the ones already suspended go back to work
                for suspended in &synchronizations[..index] {
                    if let Err(resume_error) = suspended.resume() {
                        log::error!("Could not resume synchronization after failed suspend: {}", resume_error);
                    }
                }
                return Err(e);
            }
        }
        ctx.clear_synchronization()?;
        log::trace!("Suspended {} synchronizations in context {}", synchronizations.len(), ctx.id());
        Ok(synchronizations)
    }

    fn unbind_transaction(&self, ctx: &mut TransactionContext) -> TxResult<ResourceHolder> {
        let holder = ctx.unbind_resource(&self.driver.resource_key())?;
        log::debug!("Suspended resource transaction {}", holder.handle());
        Ok(holder)
    }

    fn resume(
        &self,
        ctx: &mut TransactionContext,
        suspended: Option<SuspendedResourcesHolder>,
    ) -> TxResult<()> {
        let Some(suspended) = suspended else {
            return Ok(());
        };

        if let Some(holder) = suspended.suspended_resource {
            log::debug!("Resuming suspended resource transaction {}", holder.handle());
            ctx.bind_resource(&self.driver.resource_key(), holder)?;
        }

        if let Some(synchronizations) = suspended.suspended_synchronizations {
            ctx.set_actual_transaction_active(suspended.was_active);
            ctx.set_current_transaction_isolation(suspended.isolation);
            ctx.set_current_transaction_read_only(suspended.read_only);
            ctx.set_current_transaction_name(suspended.name);
            self.resume_synchronizations(ctx, synchronizations)?;
        }
        Ok(())
    }

    fn resume_synchronizations(
        &self,
        ctx: &mut TransactionContext,
        synchronizations: Vec<SharedSynchronization>,
    ) -> TxResult<()> {
        ctx.init_synchronization()?;
        let count = synchronizations.len();
        for synchronization in synchronizations {
            synchronization.resume()?;
            ctx.register_synchronization(synchronization)?;
        }
        log::trace!("Resumed {} synchronizations in context {}", count, ctx.id());
        Ok(())
    }

    fn process_commit(&self, ctx: &mut TransactionContext, status: &mut TransactionStatus) -> TxResult<()> {
        let result = self.commit_and_notify(ctx, status);
        let cleanup = self.cleanup_after_completion(ctx, status);
        result.and(cleanup)
    }

    fn commit_and_notify(&self, ctx: &mut TransactionContext, status: &mut TransactionStatus) -> TxResult<()> {
        if let Err(error) = trigger_before_commit(&self.synchronizations(ctx, status), status.is_read_only()) {
            log::debug!("before_commit callback failed, rolling back: {}", error);
            trigger_before_completion(&self.synchronizations(ctx, status));
            return Err(self.rollback_on_commit_failure(ctx, status, error));
        }
        trigger_before_completion(&self.synchronizations(ctx, status));

        let mut unexpected_rollback = false;
        let commit_result = if status.has_savepoint() {
            log::debug!("Releasing transaction savepoint");
            unexpected_rollback = status.is_global_rollback_only();
            status.release_held_savepoint()
        } else if status.is_new_transaction() {
            log::debug!("Initiating transaction commit");
            unexpected_rollback = status.is_global_rollback_only();
            self.do_commit(status)
        } else {
            if self.config.is_fail_early_on_global_rollback_only() {
                unexpected_rollback = status.is_global_rollback_only();
            }
            Ok(())
        };

        if let Err(error) = commit_result {
            if *error.kind() == ErrorKind::UnexpectedRollback {
                self.trigger_after_completion(ctx, status, SynchronizationStatus::RolledBack);
                return Err(error);
            }
            if self.config.is_rollback_on_commit_failure() {
                return Err(self.rollback_on_commit_failure(ctx, status, error));
            }
            self.trigger_after_completion(ctx, status, SynchronizationStatus::Unknown);
            return Err(error);
        }

        if unexpected_rollback {
            self.trigger_after_completion(ctx, status, SynchronizationStatus::RolledBack);
            return Err(TxError::new(
                "Transaction silently rolled back because it has been marked as rollback-only",
                ErrorKind::UnexpectedRollback,
            ));
        }

        let after_commit = trigger_after_commit(&self.synchronizations(ctx, status));
        if let Err(e) = &after_commit {
            log::error!("TransactionSynchronization.after_commit failed: {}", e);
        }
        self.trigger_after_completion(ctx, status, SynchronizationStatus::Committed);
        after_commit
    }

    fn do_commit(&self, status: &TransactionStatus) -> TxResult<()> {
        let Some(handle) = status.handle() else {
            return Ok(());
        };
        self.driver
            .commit(handle)
            .map_err(|e| translate_completion_error(e, "commit", handle))
    }

    fn do_rollback(&self, status: &TransactionStatus) -> TxResult<()> {
        let Some(handle) = status.handle() else {
            return Ok(());
        };
        self.driver
            .rollback(handle)
            .map_err(|e| translate_completion_error(e, "roll back", handle))
    }

    fn do_set_rollback_only(&self, status: &TransactionStatus) {
        if let Some(holder) = status.transaction() {
            log::debug!("Setting resource transaction {} rollback-only", holder.handle());
            holder.set_rollback_only();
        }
    }

    fn rollback_on_commit_failure(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
        error: TxError,
    ) -> TxError {
        let rollback_result = if status.is_new_transaction() {
            log::debug!("Initiating transaction rollback after commit failure");
            self.do_rollback(status)
        } else {
            if status.has_transaction() && self.config.is_global_rollback_on_participation_failure() {
                log::debug!("Marking existing transaction as rollback-only after commit failure");
                self.do_set_rollback_only(status);
            }
            Ok(())
        };

        match rollback_result {
            Ok(()) => {
                self.trigger_after_completion(ctx, status, SynchronizationStatus::RolledBack);
                error
            }
            Err(rollback_error) => {
                log::error!("Commit failure overridden by rollback failure: {}", error);
                self.trigger_after_completion(ctx, status, SynchronizationStatus::Unknown);
                rollback_error
            }
        }
    }

    fn process_rollback(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
        unexpected: bool,
    ) -> TxResult<()> {
        let result = self.rollback_and_notify(ctx, status, unexpected);
        let cleanup = self.cleanup_after_completion(ctx, status);
        result.and(cleanup)
    }

    fn rollback_and_notify(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
        unexpected: bool,
    ) -> TxResult<()> {
        let mut unexpected_rollback = unexpected;
        trigger_before_completion(&self.synchronizations(ctx, status));

        let rollback_result = if status.has_savepoint() {
            log::debug!("Rolling back transaction to savepoint");
            status.rollback_to_held_savepoint()
        } else if status.is_new_transaction() {
            log::debug!("Initiating transaction rollback");
            self.do_rollback(status)
        } else {
            if status.has_transaction() {
                if status.is_local_rollback_only()
                    || self.config.is_global_rollback_on_participation_failure()
                {
                    log::debug!("Participating transaction failed - marking existing transaction as rollback-only");
                    self.do_set_rollback_only(status);
                } else {
                    log::debug!("Participating transaction failed - letting transaction originator decide on rollback");
                }
            } else {
                log::debug!("Should roll back transaction but cannot - no transaction available");
            }
            if !self.config.is_fail_early_on_global_rollback_only() {
                unexpected_rollback = false;
            }
            Ok(())
        };

        if let Err(error) = rollback_result {
            self.trigger_after_completion(ctx, status, SynchronizationStatus::Unknown);
            return Err(error);
        }
        self.trigger_after_completion(ctx, status, SynchronizationStatus::RolledBack);

        if unexpected_rollback {
            return Err(TxError::new(
                "Transaction rolled back because it has been marked as rollback-only",
                ErrorKind::UnexpectedRollback,
            ));
        }
        Ok(())
    }

    /// Synchronizations to notify for `status`: only a status that opened the scope
    /// drives its callbacks.
    fn synchronizations(
        &self,
        ctx: &TransactionContext,
        status: &TransactionStatus,
    ) -> Vec<SharedSynchronization> {
        if status.is_new_synchronization() {
            ctx.synchronization_snapshot()
        } else {
            Vec::new()
        }
    }

    fn trigger_after_completion(
        &self,
        ctx: &mut TransactionContext,
        status: &TransactionStatus,
        completion_status: SynchronizationStatus,
    ) {
        if !status.is_new_synchronization() {
            return;
        }
        let synchronizations = ctx.synchronization_snapshot();
        ctx.close_synchronization_scope();
        if !status.has_transaction() || status.is_new_transaction() {
            invoke_after_completion(&synchronizations, completion_status);
        } else if !synchronizations.is_empty() {
            log::debug!(
                "Cannot register after-completion callbacks with the existing transaction - \
                 invoking them immediately with outcome status 'unknown'"
            );
            invoke_after_completion(&synchronizations, SynchronizationStatus::Unknown);
        }
    }

    fn cleanup_after_completion(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
    ) -> TxResult<()> {
        status.set_completed();
        if status.is_new_synchronization() {
            ctx.clear();
        }
        if status.is_new_transaction() {
            self.release_transaction(ctx, status);
        }
        if let Some(suspended) = status.take_suspended_resources() {
            log::debug!("Resuming suspended transaction after completion of inner transaction");
            self.resume(ctx, Some(suspended))?;
        }
        Ok(())
    }

    fn release_transaction(&self, ctx: &mut TransactionContext, status: &TransactionStatus) {
        let Some(holder) = status.transaction() else {
            return;
        };
        let key = self.driver.resource_key();
        if ctx.resource(&key).is_some_and(|bound| bound.same_as(holder)) {
            ctx.unbind_resource_if_possible(&key);
        }
        holder.set_transaction_active(false);
        if let Err(e) = self.driver.release(holder.handle()) {
            log::error!("Could not release resource transaction {}: {}", holder.handle(), e);
        }
    }
}

fn translate_completion_error(error: TxError, action: &str, handle: &ResourceHandle) -> TxError {
    log::error!("Could not {} resource transaction {}: {}", action, handle, error);
    match error.kind() {
        ErrorKind::HeuristicCompletion(_)
        | ErrorKind::TransactionSystem
        | ErrorKind::TransactionTimedOut
        | ErrorKind::UnexpectedRollback => error,
        _ => TxError::new_with_cause(
            &format!("Could not {} resource transaction {}", action, handle),
            ErrorKind::TransactionSystem,
            error,
        ),
    }
}

fn already_completed() -> TxError {
    log::error!("Transaction is already completed");
    TxError::new(
        "Transaction is already completed - do not call commit or rollback more than once per transaction",
        ErrorKind::IllegalTransactionState,
    )
}
