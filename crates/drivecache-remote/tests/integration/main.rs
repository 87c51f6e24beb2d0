//! Integration tests for drivecache-remote
//!
//! Uses wiremock to simulate the Drive API and verifies end-to-end behavior
//! of the DriveApiClient: about resource, listings with pagination, the
//! change log, content transfer and error mapping.

mod common;

mod test_content;
mod test_errors;
mod test_listing;
