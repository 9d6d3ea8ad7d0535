//! Input/output helpers.
//!
//! - histogram files and per-bin preprocessing (`histogram`)
//! - run settings (`settings`)
//! - result exports (JSON) (`export`)

pub mod export;
pub mod histogram;
pub mod settings;

pub use export::*;
pub use histogram::*;
pub use settings::*;
