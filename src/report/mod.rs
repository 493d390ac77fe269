//! Reporting utilities: terminal summaries of plans and runs.

pub mod format;

pub use format::*;
