//! drivecache remote - remote service adapters
//!
//! Implementations of [`IDriveService`](drivecache_core::ports::IDriveService):
//!
//! - [`client`] - HTTP client for a Drive v2 style JSON API
//! - [`fake`] - In-memory service with a canned tree and request counters,
//!   used by the tests of every layer above this one
//! - [`resources`] - Wire types of the JSON API and their conversion into
//!   port-level DTOs

pub mod client;
pub mod fake;
pub mod resources;

pub use client::DriveApiClient;
pub use fake::FakeDriveService;
