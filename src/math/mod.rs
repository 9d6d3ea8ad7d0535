//! Numerical utilities: histogram interpolation and covariance inversion.

pub mod interp;
pub mod linalg;

pub use interp::*;
pub use linalg::*;
