//! Engine logic and repository trait definitions for duraflow.
//!
//! This crate defines the "ports" (the [`repository::WorkflowStore`] trait)
//! that the infrastructure layer implements, plus the engine itself: the
//! duration parser, the step executor with its memoize/resume/retry
//! protocol, and the workflow runner. It depends only on `duraflow-types` --
//! never on `duraflow-infra` or any database crate.

pub mod duration;
pub mod repository;
pub mod workflow;
