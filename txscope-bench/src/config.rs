//! Benchmark configuration

use txscope::definition::Propagation;

/// How the inner unit of work of a benchmark relates to the outer transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InnerScope {
    /// Joins the outer transaction
    Join,
    /// Suspends the outer transaction and starts a new one
    Suspend,
    /// Runs in a savepoint of the outer transaction
    Savepoint,
}

impl InnerScope {
    pub fn propagation(&self) -> Propagation {
        match self {
            InnerScope::Join => Propagation::Required,
            InnerScope::Suspend => Propagation::RequiresNew,
            InnerScope::Savepoint => Propagation::Nested,
        }
    }

    pub fn all() -> [InnerScope; 3] {
        [InnerScope::Join, InnerScope::Suspend, InnerScope::Savepoint]
    }
}

impl std::fmt::Display for InnerScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InnerScope::Join => write!(f, "join"),
            InnerScope::Suspend => write!(f, "suspend"),
            InnerScope::Savepoint => write!(f, "savepoint"),
        }
    }
}

/// Configuration for benchmark runs
#[derive(Debug, Clone)]
pub struct BenchmarkConfig {
    /// Transactions per measured iteration
    pub transaction_counts: Vec<usize>,
    /// Depths of nested units of work
    pub nesting_depths: Vec<usize>,
    /// Writes performed by each unit of work
    pub writes_per_unit: usize,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            transaction_counts: vec![10, 100, 1_000],
            nesting_depths: vec![1, 4, 16],
            writes_per_unit: 5,
        }
    }
}

impl BenchmarkConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Quick config with smaller counts for fast testing
    pub fn quick() -> Self {
        Self {
            transaction_counts: vec![10, 100],
            nesting_depths: vec![1, 4],
            ..Default::default()
        }
    }
}
