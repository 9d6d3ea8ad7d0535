//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the observable, histograms and parameters (`Observable`, `Histogram`, `Parameter`)
//! - fit outputs (`FitResult`, `FittedParameter`)
//! - run configuration (`FitConfig`, `FitFlags`, `MinimizerSettings`)

pub mod types;

pub use types::*;
