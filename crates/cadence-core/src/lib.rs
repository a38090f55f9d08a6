//! Workflow engine core for Cadence.
//!
//! This crate holds everything that runs a workflow: the variable binder,
//! guard evaluator, dependency resolver, step runner, action dispatcher,
//! definition registry, execution scheduler, and the `WorkflowEngine` facade
//! that ties them together. Outbound effects go through the collaborator
//! traits in [`collaborator`]; nothing here talks to a network or database.

pub mod collaborator;
pub mod event;
pub mod workflow;

pub use workflow::engine::WorkflowEngine;
