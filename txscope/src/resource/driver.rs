use crate::definition::Isolation;
use crate::errors::{ErrorKind, TxError, TxResult};
use std::fmt::{Debug, Display, Formatter};
use std::ops::Deref;
use std::sync::Arc;
use uuid::Uuid;

/// Opaque identifier of one underlying resource transaction.
///
/// Handles are produced by [`ResourceDriverProvider::begin`] and compared by value: two
/// statuses participating in the same resource transaction hold equal handles.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceHandle {
    id: String,
}

impl ResourceHandle {
    pub fn new(id: &str) -> Self {
        ResourceHandle { id: id.to_string() }
    }

    /// Creates a handle with a random UUID identifier.
    pub fn generate() -> Self {
        ResourceHandle {
            id: Uuid::new_v4().to_string(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl Display for ResourceHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// A restorable marker inside an active resource transaction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Savepoint {
    name: String,
}

impl Savepoint {
    pub fn new(name: &str) -> Self {
        Savepoint {
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Display for Savepoint {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Contract every resource-aware transaction driver must satisfy.
///
/// # Purpose
/// A driver owns the actual begin/commit/rollback primitives of one kind of resource
/// (a database connection pool, a messaging session, an in-memory store). The
/// [`TransactionManager`](crate::manager::TransactionManager) decides *when* to call them;
/// the driver decides *how*.
///
/// # Capabilities
/// Savepoint support is an explicit capability: [`supports_savepoints`](Self::supports_savepoints)
/// must return `true` before the savepoint methods are called. The default savepoint
/// methods fail with [`ErrorKind::NestedTransactionNotSupported`].
///
/// # Errors
/// Commit may report a heuristic outcome by returning a [`TxError::heuristic`] error.
/// Any other error is wrapped by the manager into [`ErrorKind::TransactionSystem`].
///
/// # Thread Safety
/// Implementers must be `Send + Sync`; one driver instance serves many execution contexts.
pub trait ResourceDriverProvider: Send + Sync {
    /// Key under which this driver's transactions are bound in a
    /// [`TransactionContext`](crate::context::TransactionContext).
    fn resource_key(&self) -> String;

    /// Starts a new resource transaction.
    ///
    /// `timeout_seconds` is `-1` for the resource default. Timeout and read-only are hints;
    /// a driver that cannot honor them ignores them.
    fn begin(
        &self,
        isolation: Isolation,
        timeout_seconds: i32,
        read_only: bool,
    ) -> TxResult<ResourceHandle>;

    /// Commits the resource transaction.
    fn commit(&self, handle: &ResourceHandle) -> TxResult<()>;

    /// Rolls back the resource transaction.
    fn rollback(&self, handle: &ResourceHandle) -> TxResult<()>;

    /// Whether this driver can create savepoints.
    fn supports_savepoints(&self) -> bool {
        false
    }

    fn create_savepoint(&self, handle: &ResourceHandle) -> TxResult<Savepoint> {
        Err(savepoints_not_supported(self.resource_key(), handle))
    }

    fn rollback_to_savepoint(&self, handle: &ResourceHandle, _savepoint: &Savepoint) -> TxResult<()> {
        Err(savepoints_not_supported(self.resource_key(), handle))
    }

    fn release_savepoint(&self, handle: &ResourceHandle, _savepoint: &Savepoint) -> TxResult<()> {
        Err(savepoints_not_supported(self.resource_key(), handle))
    }

    /// Whether the resource itself has marked the transaction rollback-only.
    fn is_rollback_only(&self, _handle: &ResourceHandle) -> bool {
        false
    }

    /// Flushes buffered work to the resource, if the resource buffers at all.
    fn flush(&self, _handle: &ResourceHandle) -> TxResult<()> {
        Ok(())
    }

    /// Releases whatever the driver holds for a finished transaction.
    fn release(&self, _handle: &ResourceHandle) -> TxResult<()> {
        Ok(())
    }
}

fn savepoints_not_supported(resource_key: String, handle: &ResourceHandle) -> TxError {
    TxError::new(
        &format!(
            "Transaction object [{}] of resource '{}' does not support savepoints",
            handle, resource_key
        ),
        ErrorKind::NestedTransactionNotSupported,
    )
}

/// Shared handle to a resource driver.
///
/// Cloning is cheap; all clones refer to the same driver.
#[derive(Clone)]
pub struct ResourceDriver {
    inner: Arc<dyn ResourceDriverProvider>,
}

impl ResourceDriver {
    pub fn new<T: ResourceDriverProvider + 'static>(inner: T) -> Self {
        ResourceDriver {
            inner: Arc::new(inner),
        }
    }

    /// Wraps an already shared driver, e.g. one the caller keeps a typed reference to.
    pub fn from_arc(inner: Arc<dyn ResourceDriverProvider>) -> Self {
        ResourceDriver { inner }
    }
}

impl Deref for ResourceDriver {
    type Target = Arc<dyn ResourceDriverProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Debug for ResourceDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResourceDriver")
            .field("resource_key", &self.inner.resource_key())
            .field("supports_savepoints", &self.inner.supports_savepoints())
            .finish()
    }
}
