//! Shared types, error model, and job configuration for pyramerge.
//!
//! This crate is the foundation depended on by all other pyramerge crates.
//! It provides:
//! - [`PyramergeError`] — the unified error type
//! - Domain types ([`SlabIdentity`], [`SlabKind`], [`TileLimits`])
//! - Job configuration ([`JobConfig`] and its blocks)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    DatasourceConfig, EXAMPLE_MERGE_JOB, EXAMPLE_TRANSFER_JOB, JobConfig, JobKind, ProcessConfig,
    PyramidConfig, SourceConfig, TransferFromConfig, TransferToConfig,
};
pub use error::{PyramergeError, Result};
pub use types::{SlabIdentity, SlabKind, TileLimits};
