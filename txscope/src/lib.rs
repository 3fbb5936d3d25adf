#![allow(
    clippy::too_many_arguments,
    clippy::new_without_default,
)]
//! # txscope - Transaction Boundary Coordination
//!
//! txscope lets independently written units of work declare how they take part in a
//! transaction (join the current one, demand a new one, run outside one, nest inside one)
//! and guarantees correct commit, rollback and resume semantics however deeply those units
//! are nested.
//!
//! ## Key Features
//!
//! - **Propagation**: `Required`, `Supports`, `Mandatory`, `RequiresNew`, `NotSupported`,
//!   `Never` and `Nested` behaviors
//! - **Suspension**: outer transactions and their callbacks are detached while an inner
//!   transaction runs and restored afterwards
//! - **Savepoints**: nested transactions on resources that support them
//! - **Synchronizations**: ordered lifecycle callbacks around commit and rollback
//! - **Rollback-only**: a failed participant dooms the shared transaction and the owner
//!   learns about it through `UnexpectedRollback`
//! - **Heuristic outcomes**: partial commit failures surface with their outcome state
//! - **Pluggable resources**: any [`ResourceDriverProvider`](resource::ResourceDriverProvider),
//!   with a transactional in-memory store included
//!
//! ## Quick Start
//!
//! ```rust
//! use txscope::context::TransactionContext;
//! use txscope::definition::{Propagation, TransactionDefinition};
//! use txscope::manager::TransactionManager;
//! use txscope::resource::InMemoryResource;
//! use txscope::template::TransactionTemplate;
//!
//! # fn main() -> txscope::errors::TxResult<()> {
//! let accounts = InMemoryResource::new("accounts");
//! let manager = TransactionManager::builder(accounts.driver()).build()?;
//! let mut ctx = TransactionContext::new();
//!
//! let audit = TransactionTemplate::with_definition(
//!     manager.clone(),
//!     TransactionDefinition::with_propagation(Propagation::RequiresNew),
//! );
//!
//! TransactionTemplate::new(manager).execute(&mut ctx, |ctx, _status| {
//!     accounts.put(ctx, "alice", "90")?;
//!     // runs and commits independently of the outer transaction
//!     audit.execute(ctx, |ctx, _status| accounts.put(ctx, "audit:1", "alice -10"))?;
//!     accounts.put(ctx, "bob", "110")
//! })?;
//!
//! assert_eq!(accounts.committed("bob"), Some("110".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! ## Execution Context
//!
//! There is no thread-local state. Every operation takes a `&mut`
//! [`TransactionContext`](context::TransactionContext) that holds the bound resource
//! transaction and the synchronization scope of one logical execution context. Managers,
//! drivers and templates are cheap to clone and safe to share across threads.
//!
//! ## Module Organization
//!
//! - [`context`] - Per-execution-context binding of resources and synchronizations
//! - [`definition`] - Propagation, isolation, timeout and read-only settings
//! - [`errors`] - Error types and result definitions
//! - [`interceptor`] - Call-site keyed resolution and caching of definitions
//! - [`manager`] - The transaction manager
//! - [`manager_builder`] - Builder for transaction managers
//! - [`manager_config`] - Transaction manager settings
//! - [`resource`] - Resource driver contract, bound holders and the in-memory store
//! - [`status`] - Per-transaction status handed to callers
//! - [`suspension`] - Snapshot of a suspended transaction
//! - [`synchronization`] - Lifecycle callbacks
//! - [`template`] - Closure-based transaction demarcation

pub mod context;
pub mod definition;
pub mod errors;
pub mod interceptor;
pub mod manager;
pub mod manager_builder;
pub mod manager_config;
pub mod resource;
pub mod status;
pub mod suspension;
pub mod synchronization;
pub mod template;

pub use context::TransactionContext;
pub use definition::{Isolation, Propagation, TransactionDefinition};
pub use errors::{ErrorKind, HeuristicOutcome, TxError, TxResult};
pub use manager::TransactionManager;
pub use status::TransactionStatus;
pub use template::TransactionTemplate;
