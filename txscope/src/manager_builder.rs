use crate::errors::{TxError, TxResult};
use crate::manager::TransactionManager;
use crate::manager_config::{SynchronizationPolicy, TransactionManagerConfig};
use crate::resource::ResourceDriver;

/// Builder for a [`TransactionManager`].
///
/// Configuration errors are captured as they happen and returned from
/// [`build`](Self::build), so settings can be chained without intermediate checks. Only
/// the first error is kept.
///
/// # Examples
///
/// ```rust
/// use txscope::manager::TransactionManager;
/// use txscope::manager_config::SynchronizationPolicy;
/// use txscope::resource::InMemoryResource;
///
/// let manager = TransactionManager::builder(InMemoryResource::new("orders").driver())
///     .synchronization_policy(SynchronizationPolicy::OnActualTransaction)
///     .default_timeout(30)
///     .strict_nested(false)
///     .build()
///     .unwrap();
/// assert_eq!(manager.config().default_timeout(), 30);
/// ```
pub struct TransactionManagerBuilder {
    error: Option<TxError>,
    driver: ResourceDriver,
    config: TransactionManagerConfig,
}

impl TransactionManagerBuilder {
    pub fn new(driver: ResourceDriver) -> Self {
        TransactionManagerBuilder {
            error: None,
            driver,
            config: TransactionManagerConfig::new(),
        }
    }

    pub fn synchronization_policy(mut self, policy: SynchronizationPolicy) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_synchronization_policy(policy) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn nested_transaction_allowed(mut self, allowed: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_nested_transaction_allowed(allowed) {
                self.error = Some(e);
            }
        }
        self
    }

    /// With `strict == false`, `Nested` on a resource without savepoints joins the
    /// existing transaction instead of failing.
    pub fn strict_nested(mut self, strict: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_strict_nested(strict) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn validate_existing_transaction(mut self, validate: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_validate_existing_transaction(validate) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn global_rollback_on_participation_failure(mut self, enabled: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self
                .config
                .set_global_rollback_on_participation_failure(enabled)
            {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn fail_early_on_global_rollback_only(mut self, enabled: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_fail_early_on_global_rollback_only(enabled) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn rollback_on_commit_failure(mut self, enabled: bool) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_rollback_on_commit_failure(enabled) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Sets the timeout in seconds applied when a definition asks for the default.
    /// Values below `-1` are reported by [`build`](Self::build).
    pub fn default_timeout(mut self, timeout: i32) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.config.set_default_timeout(timeout) {
                self.error = Some(e);
            }
        }
        self
    }

    /// Freezes the configuration and creates the manager.
    pub fn build(self) -> TxResult<TransactionManager> {
        if let Some(error) = self.error {
            return Err(error);
        }
        self.config.freeze();
        log::debug!(
            "Created transaction manager for resource '{}' with {:?}",
            self.driver.resource_key(),
            self.config
        );
        Ok(TransactionManager::new(self.driver, self.config))
    }
}
