#![doc = include_str!("../README.md")]
#![deny(unused_crate_dependencies)]

pub mod registry;
pub mod setup;

pub use registry::SqliteRegistry;

pub use setup::setup_database;
#[cfg(any(test, feature = "test-utils"))]
pub use setup::setup_test_database;

// Linked for the bundled SQLite build only
use libsqlite3_sys as _;
