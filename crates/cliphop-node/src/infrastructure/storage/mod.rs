//! Storage infrastructure: configuration file persistence.
//!
//! The `config` sub-module reads the node's TOML configuration from the
//! platform-appropriate directory, falling back to defaults on first run,
//! and can write the current settings back to disk.

pub mod config;
