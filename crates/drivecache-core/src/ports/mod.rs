//! Port definitions
//!
//! - [`IDriveService`] - the remote store (about resource, listings, change log, content)
//! - [`IFreeDiskSpaceGetter`] - free space query consulted before every cache write

pub mod disk_space;
pub mod drive_service;

pub use disk_space::IFreeDiskSpaceGetter;
pub use drive_service::{AboutResource, IDriveService, RemoteEntry, ResourceList, ServiceError};
