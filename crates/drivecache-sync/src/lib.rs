//! drivecache sync - loading, fetching and uploading
//!
//! Provides:
//! - On-demand loading of the remote tree into the metadata store
//! - Background fetches of pinned files and uploads of dirty files
//! - The filesystem facade that ties the layers together
//!
//! ## Modules
//!
//! - [`change_list_loader`] - Full, delta and single-directory loads with request coalescing
//! - [`sync_client`] - Delayed, cancellable fetch/upload tasks driven by cache pin events
//! - [`update_operation`] - Upload of one dirty file and the matching metadata/cache update
//! - [`file_system`] - Path-based facade used by the daemon

pub mod change_list_loader;
pub mod file_system;
pub mod sync_client;
pub mod update_operation;

pub use change_list_loader::{ChangeListLoader, LoaderEvent};
pub use file_system::{AvailableSpace, FileSystem};
pub use sync_client::{SyncClient, SyncType};
pub use update_operation::{ClientContext, UpdateOperation};
