//! drivecache core - domain types, ports and configuration
//!
//! This crate holds everything the other layers agree on:
//! - **Domain types** - `ResourceEntry`, `FileCacheEntry`, `ChangeList`, `DirectoryFetchInfo`
//! - **Error codes** - `FileError`, the result channel of every cache/metadata operation
//! - **Port definitions** - `IDriveService` (remote store) and `IFreeDiskSpaceGetter`
//! - **Path utilities** - the well-known `drive`, `drive/root` and `drive/other` tree and title escaping
//! - **Configuration** - YAML configuration with validation and layered overrides
//!
//! # Architecture
//!
//! The crate follows the ports & adapters pattern. Nothing here touches the
//! disk or the network; adapter crates implement the port traits and the
//! sync crate orchestrates them.

pub mod config;
pub mod domain;
pub mod ports;
pub mod util;
