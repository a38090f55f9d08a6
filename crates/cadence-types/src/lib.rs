//! Shared domain types for Cadence.
//!
//! This crate contains the core domain types used across the Cadence
//! workflow engine: workflow definitions, execution records, lifecycle
//! events, configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod workflow;
