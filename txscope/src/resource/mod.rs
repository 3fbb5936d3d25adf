//! Resource driver contract and the built-in in-memory resource.
//!
//! The core never talks to a database or messaging session itself. It orchestrates a
//! [`ResourceDriver`], which owns the real begin/commit/rollback primitives, and keeps the
//! currently bound resource transaction in a [`ResourceHolder`] inside the
//! [`TransactionContext`](crate::context::TransactionContext).

mod driver;
mod holder;
pub mod memory;

pub use driver::{ResourceDriver, ResourceDriverProvider, ResourceHandle, Savepoint};
pub use holder::ResourceHolder;
pub use memory::InMemoryResource;
