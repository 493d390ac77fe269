//! Domain types used throughout the controller.
//!
//! This module defines:
//!
//! - series file layouts and the in-memory `TimeSeries`
//! - pull/engine date windows
//! - run outcomes and pipeline stages

pub mod types;

pub use types::*;
