//! Configuration of a transaction manager.

use crate::definition::TIMEOUT_DEFAULT;
use crate::errors::{ErrorKind, TxError, TxResult};
use std::fmt::{Debug, Display, Formatter};
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;

/// When a transaction manager opens a synchronization scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum SynchronizationPolicy {
    /// Open a scope for every status, including the "empty" ones created by
    /// `Supports`, `NotSupported` and `Never` without a transaction.
    #[default]
    Always,
    /// Open a scope only for statuses backed by an actual resource transaction.
    OnActualTransaction,
    /// Never open a scope.
    Never,
}

impl SynchronizationPolicy {
    fn to_u8(self) -> u8 {
        match self {
            SynchronizationPolicy::Always => 0,
            SynchronizationPolicy::OnActualTransaction => 1,
            SynchronizationPolicy::Never => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => SynchronizationPolicy::OnActualTransaction,
            2 => SynchronizationPolicy::Never,
            _ => SynchronizationPolicy::Always,
        }
    }
}

impl Display for SynchronizationPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SynchronizationPolicy::Always => write!(f, "always"),
            SynchronizationPolicy::OnActualTransaction => write!(f, "on_actual_transaction"),
            SynchronizationPolicy::Never => write!(f, "never"),
        }
    }
}

/// Settings of a [`TransactionManager`](crate::manager::TransactionManager).
///
/// Settings can be changed until the manager is built; afterwards the configuration is
/// frozen and every setter fails with [`ErrorKind::InvalidOperation`].
///
/// | Setting | Default |
/// |---|---|
/// | `synchronization_policy` | `Always` |
/// | `nested_transaction_allowed` | `true` |
/// | `strict_nested` | `true` |
/// | `validate_existing_transaction` | `false` |
/// | `global_rollback_on_participation_failure` | `true` |
/// | `fail_early_on_global_rollback_only` | `false` |
/// | `rollback_on_commit_failure` | `false` |
/// | `default_timeout` | `-1` |
#[derive(Clone)]
pub struct TransactionManagerConfig {
    inner: Arc<TransactionManagerConfigInner>,
}

impl Default for TransactionManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransactionManagerConfig {
    pub fn new() -> Self {
        TransactionManagerConfig {
            inner: Arc::new(TransactionManagerConfigInner::new()),
        }
    }

    pub fn synchronization_policy(&self) -> SynchronizationPolicy {
        SynchronizationPolicy::from_u8(self.inner.synchronization_policy.load(Ordering::Relaxed))
    }

    pub fn set_synchronization_policy(&self, policy: SynchronizationPolicy) -> TxResult<()> {
        self.inner.check_mutable("synchronization_policy")?;
        self.inner
            .synchronization_policy
            .store(policy.to_u8(), Ordering::Relaxed);
        Ok(())
    }

    /// Whether `Nested` propagation is honored at all.
    pub fn is_nested_transaction_allowed(&self) -> bool {
        self.inner.nested_transaction_allowed.load(Ordering::Relaxed)
    }

    pub fn set_nested_transaction_allowed(&self, allowed: bool) -> TxResult<()> {
        self.inner.check_mutable("nested_transaction_allowed")?;
        self.inner.nested_transaction_allowed.store(allowed, Ordering::Relaxed);
        Ok(())
    }

    /// Whether `Nested` on a resource without savepoints fails (`true`) or joins (`false`).
    pub fn is_strict_nested(&self) -> bool {
        self.inner.strict_nested.load(Ordering::Relaxed)
    }

    pub fn set_strict_nested(&self, strict: bool) -> TxResult<()> {
        self.inner.check_mutable("strict_nested")?;
        self.inner.strict_nested.store(strict, Ordering::Relaxed);
        Ok(())
    }

    /// Whether joining a transaction checks the definition's isolation and read-only flag
    /// against the existing transaction.
    pub fn is_validate_existing_transaction(&self) -> bool {
        self.inner.validate_existing_transaction.load(Ordering::Relaxed)
    }

    pub fn set_validate_existing_transaction(&self, validate: bool) -> TxResult<()> {
        self.inner.check_mutable("validate_existing_transaction")?;
        self.inner
            .validate_existing_transaction
            .store(validate, Ordering::Relaxed);
        Ok(())
    }

    /// Whether a failed participant marks the whole transaction rollback-only.
    pub fn is_global_rollback_on_participation_failure(&self) -> bool {
        self.inner
            .global_rollback_on_participation_failure
            .load(Ordering::Relaxed)
    }

    pub fn set_global_rollback_on_participation_failure(&self, enabled: bool) -> TxResult<()> {
        self.inner
            .check_mutable("global_rollback_on_participation_failure")?;
        self.inner
            .global_rollback_on_participation_failure
            .store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Whether participants report `UnexpectedRollback` as soon as the transaction is
    /// globally rollback-only, instead of leaving it to the owner.
    pub fn is_fail_early_on_global_rollback_only(&self) -> bool {
        self.inner
            .fail_early_on_global_rollback_only
            .load(Ordering::Relaxed)
    }

    pub fn set_fail_early_on_global_rollback_only(&self, enabled: bool) -> TxResult<()> {
        self.inner.check_mutable("fail_early_on_global_rollback_only")?;
        self.inner
            .fail_early_on_global_rollback_only
            .store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Whether a failed commit is followed by a rollback.
    pub fn is_rollback_on_commit_failure(&self) -> bool {
        self.inner.rollback_on_commit_failure.load(Ordering::Relaxed)
    }

    pub fn set_rollback_on_commit_failure(&self, enabled: bool) -> TxResult<()> {
        self.inner.check_mutable("rollback_on_commit_failure")?;
        self.inner
            .rollback_on_commit_failure
            .store(enabled, Ordering::Relaxed);
        Ok(())
    }

    /// Timeout in seconds used when a definition asks for the default.
    pub fn default_timeout(&self) -> i32 {
        self.inner.default_timeout.load(Ordering::Relaxed)
    }

    pub fn set_default_timeout(&self, timeout: i32) -> TxResult<()> {
        self.inner.check_mutable("default_timeout")?;
        if timeout < TIMEOUT_DEFAULT {
            log::error!("Invalid default timeout {}", timeout);
            return Err(TxError::new(
                &format!("Invalid default timeout: {}", timeout),
                ErrorKind::InvalidTimeout,
            ));
        }
        self.inner.default_timeout.store(timeout, Ordering::Relaxed);
        Ok(())
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.load(Ordering::Relaxed)
    }

    pub(crate) fn freeze(&self) {
        self.inner.frozen.store(true, Ordering::Relaxed);
    }
}

impl Debug for TransactionManagerConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManagerConfig")
            .field("synchronization_policy", &self.synchronization_policy())
            .field("nested_transaction_allowed", &self.is_nested_transaction_allowed())
            .field("strict_nested", &self.is_strict_nested())
            .field("validate_existing_transaction", &self.is_validate_existing_transaction())
            .field(
                "global_rollback_on_participation_failure",
                &self.is_global_rollback_on_participation_failure(),
            )
            .field(
                "fail_early_on_global_rollback_only",
                &self.is_fail_early_on_global_rollback_only(),
            )
            .field("rollback_on_commit_failure", &self.is_rollback_on_commit_failure())
            .field("default_timeout", &self.default_timeout())
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

struct TransactionManagerConfigInner {
    frozen: AtomicBool,
    synchronization_policy: AtomicU8,
    nested_transaction_allowed: AtomicBool,
    strict_nested: AtomicBool,
    validate_existing_transaction: AtomicBool,
    global_rollback_on_participation_failure: AtomicBool,
    fail_early_on_global_rollback_only: AtomicBool,
    rollback_on_commit_failure: AtomicBool,
    default_timeout: AtomicI32,
}

impl TransactionManagerConfigInner {
    fn new() -> Self {
        TransactionManagerConfigInner {
            frozen: AtomicBool::from(false),
            synchronization_policy: AtomicU8::from(SynchronizationPolicy::Always.to_u8()),
            nested_transaction_allowed: AtomicBool::from(true),
            strict_nested: AtomicBool::from(true),
            validate_existing_transaction: AtomicBool::from(false),
            global_rollback_on_participation_failure: AtomicBool::from(true),
            fail_early_on_global_rollback_only: AtomicBool::from(false),
            rollback_on_commit_failure: AtomicBool::from(false),
            default_timeout: AtomicI32::from(TIMEOUT_DEFAULT),
        }
    }

    fn check_mutable(&self, setting: &str) -> TxResult<()> {
        if self.frozen.load(Ordering::Relaxed) {
            log::error!("Setting '{}' cannot be changed after initialization", setting);
            return Err(TxError::new(
                &format!("Setting '{}' cannot be changed after initialization", setting),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }
}
