//! Shared domain types for duraflow.
//!
//! This crate contains the persisted entities of the workflow engine --
//! workflow instances, steps, step attempts, durable sleeps -- and their
//! associated status and error types.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, uuid, chrono,
//! thiserror.

pub mod config;
pub mod error;
pub mod workflow;
