//! Domain entities
//!
//! - Newtypes for resource identifiers and content hashes
//! - Resource entries (the metadata tree)
//! - Cache entries (blob bookkeeping)
//! - Change lists and directory fetch descriptors fed to the loader
//! - The `FileError` code set

pub mod cache_entry;
pub mod change_list;
pub mod errors;
pub mod newtypes;
pub mod resource_entry;

pub use cache_entry::FileCacheEntry;
pub use change_list::{ChangeList, DirectoryFetchInfo, ResourceChange};
pub use errors::{DomainError, FileError, FileResult};
pub use newtypes::{ContentHash, ResourceId};
pub use resource_entry::ResourceEntry;
