use crate::definition::Isolation;
use crate::resource::ResourceHolder;
use crate::synchronization::SharedSynchronization;
use std::fmt::{Debug, Formatter};

/// Snapshot of the transaction state that was active before a suspension.
///
/// Created when a transaction is suspended and consumed exactly once when it is resumed.
/// The holder is moved into the inner [`TransactionStatus`](crate::status::TransactionStatus)
/// and taken back out when that status completes.
pub struct SuspendedResourcesHolder {
    pub(crate) suspended_resource: Option<ResourceHolder>,
    pub(crate) suspended_synchronizations: Option<Vec<SharedSynchronization>>,
    pub(crate) name: Option<String>,
    pub(crate) read_only: bool,
    pub(crate) isolation: Option<Isolation>,
    pub(crate) was_active: bool,
}

impl SuspendedResourcesHolder {
    /// Holder for a suspended resource transaction when no synchronization scope was active.
    pub(crate) fn from_resource(suspended_resource: ResourceHolder) -> Self {
        SuspendedResourcesHolder {
            suspended_resource: Some(suspended_resource),
            suspended_synchronizations: None,
            name: None,
            read_only: false,
            isolation: None,
            was_active: false,
        }
    }

    pub fn suspended_resource(&self) -> Option<&ResourceHolder> {
        self.suspended_resource.as_ref()
    }

    /// Number of synchronizations detached from the suspended scope.
    pub fn suspended_synchronization_count(&self) -> usize {
        self.suspended_synchronizations
            .as_ref()
            .map(|it| it.len())
            .unwrap_or(0)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn isolation(&self) -> Option<Isolation> {
        self.isolation
    }

    pub fn was_active(&self) -> bool {
        self.was_active
    }
}

impl Debug for SuspendedResourcesHolder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuspendedResourcesHolder")
            .field("suspended_resource", &self.suspended_resource)
            .field("suspended_synchronizations", &self.suspended_synchronization_count())
            .field("name", &self.name)
            .field("read_only", &self.read_only)
            .field("isolation", &self.isolation)
            .field("was_active", &self.was_active)
            .finish()
    }
}
