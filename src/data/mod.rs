//! Synthetic data sources.
//!
//! - toy tag-and-probe samples for demos and end-to-end tests (`sample`)

pub mod sample;

pub use sample::*;
