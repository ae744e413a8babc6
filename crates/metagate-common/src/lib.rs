//! Metagate Common - Shared types and utilities
//!
//! This crate provides the common types, error definitions and
//! configuration structures used across all Metagate components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, GcConfig, LifecycleConfig, MigrationConfig, RestoreConfig};
pub use error::{Error, Result};
pub use types::*;
