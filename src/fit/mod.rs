//! Fitting of the pass and fail models.
//!
//! Responsibilities:
//!
//! - build the extended binned likelihood of a channel (`likelihood`)
//! - minimize it with Minuit-style status, covariance and Minos errors (`minimizer`)
//! - run the constrained pass-then-fail sequence (`fitter`)

pub mod fitter;
pub mod likelihood;
pub mod minimizer;

pub use fitter::*;
pub use likelihood::*;
pub use minimizer::*;
