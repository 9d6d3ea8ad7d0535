//! `tnp-fit` library crate.
//!
//! The binary (`tnp`) is a thin wrapper around this library so that:
//!
//! - the fit pipeline is testable without spawning processes
//! - the model builder and fitter can be driven from other tools
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod data;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod report;
