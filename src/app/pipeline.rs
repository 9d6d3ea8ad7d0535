//! Shared fit pipeline for one tag-and-probe bin.
//!
//! histograms -> registry -> model build -> constrained fit -> efficiency -> diagnostics
//!
//! The CLI front-end only decides where the histograms come from and how the
//! output is presented.

use std::path::Path;

use rayon::prelude::*;
use tracing::{info, info_span};

use crate::domain::{Channel, FitConfig, Observable};
use crate::error::FitError;
use crate::fit::{ChannelFits, ConstrainedFitter};
use crate::io::histogram::{load_bin, read_histogram_file, BinData, HistogramFile};
use crate::models::{build_models, parse_specs, BuildOptions, Registry};
use crate::report::{collect_diagnostics, efficiency, DiagnosticsReport, Efficiency, Yield};

/// All computed outputs of one bin.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub fits: ChannelFits,
    pub efficiency: Efficiency,
    pub report: DiagnosticsReport,
    /// Final state of every parameter and shape.
    pub registry: Registry,
}

/// Fits one bin's pass and fail histograms under a fixed configuration.
#[derive(Debug, Clone)]
pub struct TnpFitter {
    config: FitConfig,
}

impl TnpFitter {
    pub fn new(config: FitConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FitConfig {
        &self.config
    }

    pub fn run(&self, data: &BinData) -> Result<RunOutput, FitError> {
        let config = &self.config;
        let _span = info_span!("bin", name = %config.bin_name).entered();

        let spec = &config.observable;
        let mut registry = Registry::new(Observable::new(&spec.name, spec.min, spec.max)?);
        for channel in Channel::ALL {
            registry.add_histogram(&channel.data_name(), data.data(channel).clone())?;
            if let Some(truth) = data.truth(channel) {
                registry.add_histogram(&channel.truth_name(), truth.clone())?;
            }
        }

        let instructions = parse_specs(&config.model)?;
        let options = BuildOptions {
            cache_bins: config.cache_bins,
            interpolation_order: config.interpolation_order,
            add_gaussian: config.add_gaussian,
        };
        let models = build_models(&mut registry, &instructions, data.totals, options)?;

        let fitter = ConstrainedFitter::new(config.fit_range, config.minimizer)
            .with_fixed_sigma(config.fix_sigma_fail_to_pass);
        let fits = fitter.fit(&mut registry, models, config.flags)?;

        let efficiency = efficiency(
            signal_yield(&registry, Channel::Pass)?,
            signal_yield(&registry, Channel::Fail)?,
        )?;
        info!(
            efficiency = efficiency.value,
            error = efficiency.error,
            "efficiency computed"
        );
        let report = collect_diagnostics(&config.bin_name, &registry, &fits, efficiency);

        Ok(RunOutput {
            fits,
            efficiency,
            report,
            registry,
        })
    }
}

fn signal_yield(registry: &Registry, channel: Channel) -> Result<Yield, FitError> {
    let id = registry.require_param(&channel.signal_yield_name())?;
    let p = registry.parameter(id);
    Ok(Yield::new(p.value(), p.error()))
}

/// Fit one named bin out of an already loaded histogram file.
pub fn run_bin(config: &FitConfig, file: &HistogramFile) -> Result<RunOutput, FitError> {
    let data = load_bin(file, &config.bin_name, config.validity_window)?;
    TnpFitter::new(config.clone()).run(&data)
}

/// Fit several bins of one file in parallel; results keep the order of `configs`.
pub fn run_bins(configs: &[FitConfig], file: &HistogramFile) -> Vec<Result<RunOutput, FitError>> {
    configs.par_iter().map(|config| run_bin(config, file)).collect()
}

/// Read a histogram file and fit one bin of it.
pub fn run_file(config: &FitConfig, path: &Path) -> Result<RunOutput, FitError> {
    let file = read_histogram_file(path)?;
    run_bin(config, &file)
}
