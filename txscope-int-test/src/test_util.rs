use parking_lot::Mutex;
use std::backtrace::Backtrace;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use txscope::context::TransactionContext;
use txscope::definition::Isolation;
use txscope::errors::{ErrorKind, TxError, TxResult};
use txscope::manager::TransactionManager;
use txscope::manager_builder::TransactionManagerBuilder;
use txscope::resource::{
    InMemoryResource, ResourceDriver, ResourceDriverProvider, ResourceHandle, Savepoint,
};
use txscope::synchronization::{SynchronizationStatus, TransactionSynchronization};

/// Runs a test between a setup and a teardown step.
///
/// `after` runs whether or not the test succeeded. A failure in any step, or a panic,
/// fails the test with the step that failed and the captured backtrace.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> TxResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> TxResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> TxResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let start_time = Instant::now();

    let result = std::panic::catch_unwind(|| {
        let backtrace = Backtrace::capture();
        match before() {
            Ok(ctx) => match test(ctx.clone()) {
                Ok(_) => match after(ctx) {
                    Ok(_) => Ok(()),
                    Err(e) => Err((format!("After run failed: {:?}", e), backtrace.to_string())),
                },
                Err(e) => {
                    let _ = after(ctx);
                    Err((format!("Test failed: {:?}", e), backtrace.to_string()))
                }
            },
            Err(e) => Err((format!("Before run failed: {:?}", e), backtrace.to_string())),
        }
    });

    let elapsed = start_time.elapsed();
    let (error, backtrace) = match result {
        Ok(Ok(_)) => return,
        Ok(Err((e, bt))) => (e, bt),
        Err(panic_err) => {
            let message = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            (format!("Panic: {}", message), Backtrace::capture().to_string())
        }
    };

    eprintln!("\n==================== TEST FAILED ====================");
    eprintln!("Failed after {:?}", elapsed);
    eprintln!("Error: {}", error);
    if !backtrace.is_empty() && !backtrace.contains("disabled") {
        eprintln!("\nBacktrace:\n{}", backtrace);
    }
    eprintln!("=====================================================\n");

    panic!("Test failed: {}", error);
}

/// Shared fixture of an integration test: a recording driver and a manager on top of it.
#[derive(Clone)]
pub struct TestContext {
    driver: RecordingDriver,
    manager: TransactionManager,
}

impl TestContext {
    pub fn new(driver: RecordingDriver, manager: TransactionManager) -> Self {
        Self { driver, manager }
    }

    pub fn driver(&self) -> &RecordingDriver {
        &self.driver
    }

    pub fn resource(&self) -> &InMemoryResource {
        self.driver.resource()
    }

    pub fn manager(&self) -> TransactionManager {
        self.manager.clone()
    }

    /// A fresh execution context.
    pub fn execution_context(&self) -> TransactionContext {
        TransactionContext::new()
    }
}

pub fn random_key() -> String {
    format!("resource-{}", uuid::Uuid::new_v4())
}

/// Test context with a savepoint-capable driver and a default manager.
pub fn create_test_context() -> TxResult<TestContext> {
    create_test_context_with(RecordingDriver::new(&random_key()), |builder| builder)
}

/// Test context with a driver that cannot create savepoints.
pub fn create_test_context_without_savepoints() -> TxResult<TestContext> {
    create_test_context_with(RecordingDriver::without_savepoints(&random_key()), |builder| builder)
}

/// Test context whose manager is configured by `configure`.
pub fn create_test_context_with<F>(driver: RecordingDriver, configure: F) -> TxResult<TestContext>
where
    F: FnOnce(TransactionManagerBuilder) -> TransactionManagerBuilder,
{
    let manager = configure(TransactionManager::builder(driver.driver())).build()?;
    Ok(TestContext::new(driver, manager))
}

/// Fails if the test left a resource transaction open.
pub fn cleanup(ctx: TestContext) -> TxResult<()> {
    let open = ctx.resource().active_transactions();
    if open != 0 {
        return Err(TxError::new(
            &format!("{} resource transaction(s) left open", open),
            ErrorKind::IllegalTransactionState,
        ));
    }
    Ok(())
}

/// A driver call observed by [`RecordingDriver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverEvent {
    Begin {
        isolation: Isolation,
        timeout: i32,
        read_only: bool,
    },
    Commit,
    Rollback,
    CreateSavepoint,
    RollbackToSavepoint,
    ReleaseSavepoint,
    Release,
}

/// Resource driver that records every call and can be scripted to fail.
///
/// Actual transactional behavior is delegated to an [`InMemoryResource`], so data written
/// in tests is observable through [`resource`](Self::resource).
#[derive(Clone)]
pub struct RecordingDriver {
    inner: Arc<RecordingDriverInner>,
}

struct RecordingDriverInner {
    resource: InMemoryResource,
    events: Mutex<Vec<DriverEvent>>,
    commit_failure: Mutex<Option<TxError>>,
    fail_begin: AtomicBool,
    fail_rollback: AtomicBool,
    rollback_only: AtomicBool,
}

impl RecordingDriver {
    pub fn new(key: &str) -> Self {
        Self::wrap(InMemoryResource::new(key))
    }

    pub fn without_savepoints(key: &str) -> Self {
        Self::wrap(InMemoryResource::without_savepoints(key))
    }

    fn wrap(resource: InMemoryResource) -> Self {
        RecordingDriver {
            inner: Arc::new(RecordingDriverInner {
                resource,
                events: Mutex::new(Vec::new()),
                commit_failure: Mutex::new(None),
                fail_begin: AtomicBool::new(false),
                fail_rollback: AtomicBool::new(false),
                rollback_only: AtomicBool::new(false),
            }),
        }
    }

    pub fn driver(&self) -> ResourceDriver {
        ResourceDriver::new(self.clone())
    }

    pub fn resource(&self) -> &InMemoryResource {
        &self.inner.resource
    }

    pub fn events(&self) -> Vec<DriverEvent> {
        self.inner.events.lock().clone()
    }

    /// Recorded events without the `Begin` parameters, for compact assertions.
    pub fn event_names(&self) -> Vec<&'static str> {
        self.inner
            .events
            .lock()
            .iter()
            .map(|event| match event {
                DriverEvent::Begin { .. } => "begin",
                DriverEvent::Commit => "commit",
                DriverEvent::Rollback => "rollback",
                DriverEvent::CreateSavepoint => "create_savepoint",
                DriverEvent::RollbackToSavepoint => "rollback_to_savepoint",
                DriverEvent::ReleaseSavepoint => "release_savepoint",
                DriverEvent::Release => "release",
            })
            .collect()
    }

    pub fn count(&self, name: &str) -> usize {
        self.event_names().into_iter().filter(|it| *it == name).count()
    }

    pub fn clear_events(&self) {
        self.inner.events.lock().clear();
    }

    /// Makes the next commit fail with `error`; the in-memory transaction stays open.
    pub fn fail_next_commit(&self, error: TxError) {
        *self.inner.commit_failure.lock() = Some(error);
    }

    pub fn fail_begin(&self, fail: bool) {
        self.inner.fail_begin.store(fail, Ordering::SeqCst);
    }

    pub fn fail_rollback(&self, fail: bool) {
        self.inner.fail_rollback.store(fail, Ordering::SeqCst);
    }

    /// Makes the resource report every transaction as rollback-only.
    pub fn report_rollback_only(&self, rollback_only: bool) {
        self.inner.rollback_only.store(rollback_only, Ordering::SeqCst);
    }

    fn record(&self, event: DriverEvent) {
        log::trace!("Driver event: {:?}", event);
        self.inner.events.lock().push(event);
    }
}

impl ResourceDriverProvider for RecordingDriver {
    fn resource_key(&self) -> String {
        self.inner.resource.resource_key()
    }

    fn begin(&self, isolation: Isolation, timeout_seconds: i32, read_only: bool) -> TxResult<ResourceHandle> {
        self.record(DriverEvent::Begin {
            isolation,
            timeout: timeout_seconds,
            read_only,
        });
        if self.inner.fail_begin.load(Ordering::SeqCst) {
            return Err(TxError::new("connection refused", ErrorKind::ResourceFailure));
        }
        self.inner.resource.begin(isolation, timeout_seconds, read_only)
    }

    fn commit(&self, handle: &ResourceHandle) -> TxResult<()> {
        self.record(DriverEvent::Commit);
        if let Some(error) = self.inner.commit_failure.lock().take() {
            // the scripted failure leaves the in-memory transaction to rollback or release
            return Err(error);
        }
        self.inner.resource.commit(handle)
    }

    fn rollback(&self, handle: &ResourceHandle) -> TxResult<()> {
        self.record(DriverEvent::Rollback);
        if self.inner.fail_rollback.load(Ordering::SeqCst) {
            return Err(TxError::new("connection lost during rollback", ErrorKind::ResourceFailure));
        }
        self.inner.resource.rollback(handle)
    }

    fn supports_savepoints(&self) -> bool {
        self.inner.resource.supports_savepoints()
    }

    fn create_savepoint(&self, handle: &ResourceHandle) -> TxResult<Savepoint> {
        self.record(DriverEvent::CreateSavepoint);
        self.inner.resource.create_savepoint(handle)
    }

    fn rollback_to_savepoint(&self, handle: &ResourceHandle, savepoint: &Savepoint) -> TxResult<()> {
        self.record(DriverEvent::RollbackToSavepoint);
        self.inner.resource.rollback_to_savepoint(handle, savepoint)
    }

    fn release_savepoint(&self, handle: &ResourceHandle, savepoint: &Savepoint) -> TxResult<()> {
        self.record(DriverEvent::ReleaseSavepoint);
        self.inner.resource.release_savepoint(handle, savepoint)
    }

    fn is_rollback_only(&self, _handle: &ResourceHandle) -> bool {
        self.inner.rollback_only.load(Ordering::SeqCst)
    }

    fn release(&self, handle: &ResourceHandle) -> TxResult<()> {
        self.record(DriverEvent::Release);
        self.inner.resource.release(handle)
    }
}

/// Log of synchronization callbacks shared between recorders.
pub type CallbackLog = Arc<Mutex<Vec<String>>>;

pub fn callback_log() -> CallbackLog {
    Arc::new(Mutex::new(Vec::new()))
}

/// Synchronization that appends `event:name` entries to a shared log.
pub struct RecordingSynchronization {
    name: String,
    order: Option<i32>,
    log: CallbackLog,
    fail_suspend: bool,
    fail_before_commit: bool,
    fail_after_commit: bool,
    fail_after_completion: bool,
}

impl RecordingSynchronization {
    pub fn new(name: &str, order: Option<i32>, log: &CallbackLog) -> Self {
        RecordingSynchronization {
            name: name.to_string(),
            order,
            log: log.clone(),
            fail_suspend: false,
            fail_before_commit: false,
            fail_after_commit: false,
            fail_after_completion: false,
        }
    }

    pub fn failing_suspend(mut self) -> Self {
        self.fail_suspend = true;
        self
    }

    pub fn failing_before_commit(mut self) -> Self {
        self.fail_before_commit = true;
        self
    }

    pub fn failing_after_commit(mut self) -> Self {
        self.fail_after_commit = true;
        self
    }

    pub fn failing_after_completion(mut self) -> Self {
        self.fail_after_completion = true;
        self
    }

    pub fn shared(self) -> Arc<dyn TransactionSynchronization> {
        Arc::new(self)
    }

    fn push(&self, event: &str) {
        self.log.lock().push(format!("{}:{}", event, self.name));
    }

    fn failure(&self, event: &str) -> TxError {
        TxError::new(
            &format!("{} failed in {}", event, self.name),
            ErrorKind::ApplicationFailure,
        )
    }
}

impl TransactionSynchronization for RecordingSynchronization {
    fn order(&self) -> Option<i32> {
        self.order
    }

    fn suspend(&self) -> TxResult<()> {
        self.push("suspend");
        if self.fail_suspend {
            return Err(self.failure("suspend"));
        }
        Ok(())
    }

    fn resume(&self) -> TxResult<()> {
        self.push("resume");
        Ok(())
    }

    fn flush(&self) -> TxResult<()> {
        self.push("flush");
        Ok(())
    }

    fn before_commit(&self, read_only: bool) -> TxResult<()> {
        self.push(if read_only { "before_commit_read_only" } else { "before_commit" });
        if self.fail_before_commit {
            return Err(self.failure("before_commit"));
        }
        Ok(())
    }

    fn before_completion(&self) -> TxResult<()> {
        self.push("before_completion");
        Ok(())
    }

    fn after_commit(&self) -> TxResult<()> {
        self.push("after_commit");
        if self.fail_after_commit {
            return Err(self.failure("after_commit"));
        }
        Ok(())
    }

    fn after_completion(&self, status: SynchronizationStatus) -> TxResult<()> {
        let event = match status {
            SynchronizationStatus::Committed => "after_completion_committed",
            SynchronizationStatus::RolledBack => "after_completion_rolled_back",
            SynchronizationStatus::Unknown => "after_completion_unknown",
        };
        self.push(event);
        if self.fail_after_completion {
            return Err(self.failure("after_completion"));
        }
        Ok(())
    }
}
