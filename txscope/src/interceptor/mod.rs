//! Resolution of the transaction definition that applies to a call.
//!
//! How definitions get attached to operations is up to the application; this module only
//! resolves and caches them per [`CallSite`].

mod call_site;
mod definition_source;

pub use call_site::CallSite;
pub use definition_source::{CachingDefinitionSource, DefinitionSource, MapDefinitionSource};
