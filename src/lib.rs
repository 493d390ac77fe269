//! `onhm-runner` library crate.
//!
//! The binary (`onhm`) is a thin wrapper around this library so that:
//!
//! - the controller can be driven with in-memory collaborators in tests
//! - the series reader is usable from verification and post-processing tools
//! - deployment wiring (`app`) stays separate from the pipeline logic

pub mod app;
pub mod checkpoint;
pub mod cli;
pub mod collab;
pub mod config;
pub mod domain;
pub mod error;
pub mod io;
pub mod plan;
pub mod report;
