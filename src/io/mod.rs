//! Input/output helpers.
//!
//! - tabular series read/write for engine inputs and outputs (`series`)

pub mod series;

pub use series::*;
