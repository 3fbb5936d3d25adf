//! Fixture factory functions for benchmarks

use std::sync::atomic::{AtomicU64, Ordering};
use txscope::errors::TxResult;
use txscope::manager::TransactionManager;
use txscope::manager_builder::TransactionManagerBuilder;
use txscope::resource::InMemoryResource;
use txscope::template::TransactionTemplate;
use uuid::Uuid;

/// Counter for unique resource keys within a run
static RESOURCE_COUNTER: AtomicU64 = AtomicU64::new(0);

fn unique_resource_key() -> String {
    let counter = RESOURCE_COUNTER.fetch_add(1, Ordering::SeqCst);
    format!("bench_{}_{}", counter, Uuid::new_v4())
}

/// Context holding a resource and the manager coordinating it
pub struct BenchContext {
    resource: InMemoryResource,
    manager: TransactionManager,
}

impl BenchContext {
    pub fn resource(&self) -> &InMemoryResource {
        &self.resource
    }

    pub fn manager(&self) -> &TransactionManager {
        &self.manager
    }

    /// A template with the default definition
    pub fn template(&self) -> TransactionTemplate {
        TransactionTemplate::new(self.manager.clone())
    }
}

impl Drop for BenchContext {
    fn drop(&mut self) {
        let open = self.resource.active_transactions();
        if open != 0 {
            log::warn!("Benchmark left {} transaction(s) open on '{}'", open, self.resource.key());
        }
    }
}

/// Create a context with a savepoint-capable resource and a default manager
pub fn create_bench_context() -> TxResult<BenchContext> {
    create_bench_context_with(|builder| builder)
}

/// Create a context whose manager is configured by `configure`
pub fn create_bench_context_with<F>(configure: F) -> TxResult<BenchContext>
where
    F: FnOnce(TransactionManagerBuilder) -> TransactionManagerBuilder,
{
    let resource = InMemoryResource::new(&unique_resource_key());
    let manager = configure(TransactionManager::builder(resource.driver())).build()?;
    Ok(BenchContext { resource, manager })
}
