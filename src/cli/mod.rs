//! Command-line parsing for the tag-and-probe fitter.
//!
//! Argument parsing and command dispatch stay separate from the fitting code;
//! `app::fit_config_from_args` turns these structs into a `FitConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::models::ModelPreset;

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "tnp", version, about = "Tag-and-probe efficiency fitter")]
pub struct Cli {
    /// Log fit progress (overridden by RUST_LOG).
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the pass and fail histograms of one or more bins.
    Fit(FitArgs),
    /// Generate a synthetic sample and fit it.
    Demo(DemoArgs),
}

/// Switches shared by `fit` and `demo`; each one overrides the settings file.
#[derive(Debug, Args, Clone)]
pub struct ModelArgs {
    /// Settings file (JSON). Missing fields take their defaults.
    #[arg(short, long, value_name = "JSON")]
    pub settings: Option<PathBuf>,

    /// Model preset, used when the settings carry no explicit model.
    #[arg(long, value_enum)]
    pub preset: Option<ModelPreset>,

    /// Fit simulation truth: no background, edge shape frozen.
    #[arg(long)]
    pub truth: bool,

    /// Weighted simulation: correct errors with the sum of squared weights.
    #[arg(long)]
    pub mc: bool,

    /// Run Minos for asymmetric errors.
    #[arg(long)]
    pub minos: bool,

    /// Fix the fail width to the fitted pass width.
    #[arg(long)]
    pub fix_sigma: bool,

    /// Add the auxiliary Gaussian to the fail model.
    #[arg(long = "add-gaus")]
    pub add_gaussian: bool,

    /// Lower edge of the fit range.
    #[arg(long)]
    pub fit_min: Option<f64>,

    /// Upper edge of the fit range.
    #[arg(long)]
    pub fit_max: Option<f64>,

    /// Cache bins used to normalize and convolve the densities.
    #[arg(long)]
    pub cache_bins: Option<usize>,

    /// Minimizer strategy (0, 1 or 2).
    #[arg(long)]
    pub strategy: Option<u8>,

    /// Print each fit's parameter listing.
    #[arg(long)]
    pub details: bool,
}

#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Histogram file (JSON) holding `<bin>_Pass`, `<bin>_Fail` and truth templates.
    #[arg(short, long, value_name = "JSON")]
    pub input: PathBuf,

    /// Bins to fit; all bins in the file when omitted.
    #[arg(short, long = "bin")]
    pub bins: Vec<String>,

    /// Directory receiving one `<bin>.json` result per bin.
    #[arg(long, value_name = "DIR")]
    pub export: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(Debug, Args, Clone)]
pub struct DemoArgs {
    /// Generated efficiency.
    #[arg(long, default_value_t = 0.9)]
    pub efficiency: f64,

    /// Signal probes.
    #[arg(short = 'n', long, default_value_t = 5000)]
    pub events: usize,

    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Also write the generated histograms to this file.
    #[arg(long, value_name = "JSON")]
    pub write_histograms: Option<PathBuf>,

    /// Write the fit result (JSON) to this file.
    #[arg(long, value_name = "JSON")]
    pub export: Option<PathBuf>,

    #[command(flatten)]
    pub model: ModelArgs,
}
