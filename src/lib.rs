//! plugin-store - install, update and remove wheel-packaged plugins
//!
//! Plugins are listed in a remote JSON catalog and published as wheels on a
//! PyPI-style simple index. This library exposes the store engine for both the CLI
//! binary and integration testing.

pub mod catalog;
pub mod config;
pub mod error;
pub mod index_url;
pub mod installer;
pub mod registry;
pub mod requirement;
pub mod simple_index;
pub mod staging;
pub mod store;
pub mod version;
pub mod wheel;

pub use error::{Outcome, StoreError, UpdateReport};
pub use store::{ListOutcome, ListQuery, PluginPage, PluginRow, SortField, StoreManager};
