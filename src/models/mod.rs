//! Model composition for the tag-and-probe fit.
//!
//! - `registry`: named store of the observable, data, parameters, shapes and models
//! - `spec`: the declarative specification language
//! - `shape`: line shapes and their normalized evaluation
//! - `model`: extended sums of shapes
//! - `builder`: assembles `pdfPass` / `pdfFail` from a specification list
//! - `presets`: ready-made specification lists

pub mod builder;
pub mod model;
pub mod presets;
pub mod registry;
pub mod shape;
pub mod spec;

pub use builder::*;
pub use model::*;
pub use presets::*;
pub use registry::*;
pub use shape::*;
pub use spec::*;
