//! SQLite persistence for kindle graphs.
//!
//! [`Store`] implements [`kindle_core::GraphStore`] so an engine ticks
//! directly against the database, and doubles as an [`kindle_core::EventSink`]
//! that logs tick events. [`Instance`] ties a store to its directory and
//! TOML engine configuration.

pub mod config;
pub mod error;
pub mod events;
pub mod instance;
pub mod json_bridge;
pub mod schema;
pub mod store;

pub use config::{load_config, load_or_default, parse_config, to_toml_string, write_config};
pub use error::{Result, StoreError};
pub use instance::{
    DEFAULT_INSTANCE, Instance, default_base_dir, instance_dir, list_instances, sanitize_name,
};
pub use store::Store;
