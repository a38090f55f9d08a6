//! Observability setup shared by Cadence binaries.

pub mod tracing_setup;
