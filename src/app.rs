//! Top-level application orchestration.
//!
//! `src/main.rs` stays tiny; this module is the real main that:
//! - loads `.env` and sets up logging
//! - parses CLI arguments and merges them into the settings file
//! - runs the per-bin fit pipeline
//! - prints reports and writes optional exports

use std::fs;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Command, DemoArgs, FitArgs, ModelArgs};
use crate::data::{generate_sample, SampleConfig};
use crate::domain::{FitConfig, Strategy};
use crate::error::FitError;
use crate::io::{bin_names, read_histogram_file, write_histogram_file, write_run_json, Settings};
use crate::report::{format_fit_result, format_report};

pub mod pipeline;

use pipeline::RunOutput;

/// Entry point for the `tnp` binary.
pub fn run() -> Result<(), FitError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Command::Fit(args) => handle_fit(args),
        Command::Demo(args) => handle_demo(args),
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)))
        .with_writer(std::io::stderr)
        .init();
}

fn handle_fit(args: FitArgs) -> Result<(), FitError> {
    let file = read_histogram_file(&args.input)?;
    let bins = if args.bins.is_empty() {
        bin_names(&file)
    } else {
        args.bins.clone()
    };
    if bins.is_empty() {
        return Err(FitError::config(format!(
            "no '<bin>_Pass' histograms in '{}'",
            args.input.display()
        )));
    }

    let settings = settings_from_args(&args.model)?;
    let mut configs = Vec::with_capacity(bins.len());
    for bin in &bins {
        let mut config = settings.to_fit_config(bin)?;
        config.export = args
            .export
            .as_ref()
            .map(|dir| dir.join(format!("{bin}.json")));
        configs.push(config);
    }
    if let Some(dir) = &args.export {
        fs::create_dir_all(dir)
            .map_err(|e| FitError::io(format!("failed to create '{}'", dir.display()), e))?;
    }
    info!(bins = configs.len(), input = %args.input.display(), "fitting");

    let mut first_error = None;
    for (config, result) in configs.iter().zip(pipeline::run_bins(&configs, &file)) {
        match result {
            Ok(out) => present(config, &out, args.model.details)?,
            Err(e) => {
                error!(bin = %config.bin_name, "{e}");
                first_error.get_or_insert(e);
            }
        }
    }
    match first_error {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

fn handle_demo(args: DemoArgs) -> Result<(), FitError> {
    let sample_config = SampleConfig {
        efficiency: args.efficiency,
        signal_events: args.events,
        seed: args.seed,
        ..SampleConfig::default()
    };
    let sample = generate_sample(&sample_config)?;
    if let Some(path) = &args.write_histograms {
        write_histogram_file(path, &sample.histograms)?;
        info!(path = %path.display(), "sample written");
    }

    let mut config = fit_config_from_args(&args.model, &sample_config.bin_name)?;
    config.export = args.export.clone();
    let out = pipeline::run_bin(&config, &sample.histograms)?;
    println!(
        "* generated eff = {:1.4} ({} pass / {} fail)",
        sample.generated_efficiency(),
        sample.signal_pass,
        sample.signal_fail
    );
    present(&config, &out, args.model.details)
}

fn present(config: &FitConfig, out: &RunOutput, details: bool) -> Result<(), FitError> {
    println!("=== {} ===", config.bin_name);
    print!("{}", format_report(&out.report));
    if details {
        print!("{}", format_fit_result(&out.fits.pass));
        print!("{}", format_fit_result(&out.fits.fail));
    }
    if let Some(path) = &config.export {
        write_run_json(path, &out.fits, &out.report)?;
    }
    Ok(())
}

/// Settings file (or defaults) with the CLI switches applied on top.
pub fn settings_from_args(args: &ModelArgs) -> Result<Settings, FitError> {
    let mut settings = match &args.settings {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(preset) = args.preset {
        settings.preset = preset;
        settings.model = None;
    }
    settings.truth_mode |= args.truth;
    settings.monte_carlo |= args.mc;
    settings.use_minos |= args.minos;
    settings.fix_sigma_fail_to_pass |= args.fix_sigma;
    settings.add_gaussian |= args.add_gaussian;
    if let Some(lo) = args.fit_min {
        settings.fit_range.0 = lo;
    }
    if let Some(hi) = args.fit_max {
        settings.fit_range.1 = hi;
    }
    if let Some(bins) = args.cache_bins {
        settings.cache_bins = bins;
    }
    if let Some(level) = args.strategy {
        settings.minimizer.strategy = Strategy::try_from(level).map_err(FitError::Config)?;
    }
    Ok(settings)
}

pub fn fit_config_from_args(args: &ModelArgs, bin_name: &str) -> Result<FitConfig, FitError> {
    settings_from_args(args)?.to_fit_config(bin_name)
}
