//! Workflow engine core.
//!
//! - `binder` -- `${path}` substitution into step and action configs
//! - `condition` -- guard expression parser and evaluator
//! - `dag` -- dependency ordering and cycle detection
//! - `definition` -- YAML/JSON parsing, validation, filesystem load/save
//! - `retry` -- retry decisions and backoff delays
//! - `step_runner` -- handlers for the six step types, timeouts, retries
//! - `actions` -- `on_success` / `on_failure` action dispatch
//! - `registry` -- validated definition store
//! - `scheduler` -- admission and per-execution driver tasks
//! - `builtin` -- workflows seeded into new engines
//! - `engine` -- the `WorkflowEngine` facade

pub mod actions;
pub mod binder;
pub mod builtin;
pub mod condition;
pub mod dag;
pub mod definition;
pub mod engine;
pub mod registry;
pub mod retry;
pub mod scheduler;
pub mod step_runner;

#[cfg(test)]
pub(crate) mod testing;
