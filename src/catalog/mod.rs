//! Read-only access to reference tables.
//!
//! The master-data store is an external collaborator; resolution steps only
//! see it through the [`ReferenceCatalog`] trait. An in-memory backend is
//! provided for embedded use, tests and the command-line runner.

mod memory;
mod traits;

pub use memory::InMemoryCatalog;
pub use traits::{validate_table_name, ReferenceCatalog};
