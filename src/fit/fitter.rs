//! The constrained two-step fit of one bin.
//!
//! Given the registry produced by the model builder, [`ConstrainedFitter::fit`]:
//!
//! - optionally applies the truth-mode constraints (no background)
//! - narrows the observable's active range and `fitMassRange` to the fit window
//! - fits `pdfPass` to `hPass`
//! - copies the fitted pass width into the fail width and bounds it to
//!   `[0.8 w, 3.0 w]` (or fixes it)
//! - fits `pdfFail` to `hFail`
//!
//! Non-convergence never aborts the run; it shows up in `FitResult::status`.

use tracing::{debug, info, warn};

use crate::domain::{
    Channel, FitFlags, FitResult, FittedParameter, MinimizerSettings, FIT_RANGE_NAME,
};
use crate::error::{CompositionError, FitError};
use crate::fit::likelihood::BinnedLikelihood;
use crate::fit::minimizer::{FreeParameter, Minimizer};
use crate::models::{ChannelModels, Coefficient, ModelId, ParamId, Registry};

/// Edge-shape parameters frozen in truth mode when present.
const TRUTH_FROZEN: [&str; 6] = ["acmsP", "betaP", "gammaP", "acmsF", "betaF", "gammaF"];
/// Second-Gaussian ratios pinned to zero in truth mode when present.
const TRUTH_ZEROED: [&str; 2] = ["sosP", "sosF"];

/// Lower and upper factors applied to the pass width to bound the fail width.
pub const WIDTH_BOUNDS: (f64, f64) = (0.8, 3.0);

/// Results of the pass and fail fits.
#[derive(Debug, Clone)]
pub struct ChannelFits {
    pub pass: FitResult,
    pub fail: FitResult,
}

impl ChannelFits {
    pub fn get(&self, channel: Channel) -> &FitResult {
        match channel {
            Channel::Pass => &self.pass,
            Channel::Fail => &self.fail,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConstrainedFitter {
    pub fit_range: (f64, f64),
    pub fix_sigma_fail_to_pass: bool,
    pub minimizer: MinimizerSettings,
}

impl ConstrainedFitter {
    pub fn new(fit_range: (f64, f64), minimizer: MinimizerSettings) -> Self {
        Self {
            fit_range,
            fix_sigma_fail_to_pass: false,
            minimizer,
        }
    }

    pub fn with_fixed_sigma(mut self, fixed: bool) -> Self {
        self.fix_sigma_fail_to_pass = fixed;
        self
    }

    pub fn fit(
        &self,
        registry: &mut Registry,
        models: ChannelModels,
        flags: FitFlags,
    ) -> Result<ChannelFits, FitError> {
        if flags.truth_mode {
            apply_truth_constraints(registry)?;
        }

        let (lo, hi) = self.fit_range;
        let observable = registry.observable_mut();
        observable.set_range(lo, hi)?;
        observable.set_named_range(FIT_RANGE_NAME, lo, hi)?;

        let pass_model = models.get(Channel::Pass);
        let pass = fit_channel(registry, pass_model, Channel::Pass, flags, self.minimizer)?;
        let width = propagate_width(registry, self.fix_sigma_fail_to_pass)?;
        debug!(width, fixed = self.fix_sigma_fail_to_pass, "fail width set from pass fit");
        let fail_model = models.get(Channel::Fail);
        let fail = fit_channel(registry, fail_model, Channel::Fail, flags, self.minimizer)?;

        Ok(ChannelFits { pass, fail })
    }
}

/// Remove the background and freeze the edge shape for simulation truth fits.
pub fn apply_truth_constraints(registry: &mut Registry) -> Result<(), CompositionError> {
    for channel in Channel::ALL {
        let id = registry.require_param(&channel.background_yield_name())?;
        registry.parameter_mut(id).pin(0.0);
    }
    for name in TRUTH_ZEROED {
        match registry.param_mut(name) {
            Some(p) => p.pin(0.0),
            None => debug!(name, "not in the model, nothing to pin"),
        }
    }
    for name in TRUTH_FROZEN {
        match registry.param_mut(name) {
            Some(p) => p.set_constant(true),
            None => debug!(name, "not in the model, nothing to freeze"),
        }
    }
    Ok(())
}

/// Copy the fitted pass width into the fail width; returns the width.
///
/// The bounds are reset before the value is assigned so the copy is exact.
pub fn propagate_width(registry: &mut Registry, force_equal: bool) -> Result<f64, CompositionError> {
    let pass = registry.require_param(&Channel::Pass.width_name())?;
    let fail = registry.require_param(&Channel::Fail.width_name())?;
    let w = registry.parameter(pass).value();
    let sigma_fail = registry.parameter_mut(fail);
    sigma_fail.set_range(WIDTH_BOUNDS.0 * w, WIDTH_BOUNDS.1 * w);
    sigma_fail.set_value(w);
    if force_equal {
        sigma_fail.set_constant(true);
    }
    Ok(w)
}

/// Pin every yield of `model` to zero, totals of fraction pairs included.
fn pin_yields(registry: &mut Registry, model: ModelId) {
    let ids: Vec<ParamId> = registry
        .model(model)
        .components
        .iter()
        .map(|c| match c.coefficient {
            Coefficient::Yield(id) => id,
            Coefficient::Fraction { total, .. } | Coefficient::Complement { total, .. } => total,
        })
        .collect();
    for id in ids {
        let p = registry.parameter_mut(id);
        p.pin(0.0);
        p.set_error(0.0);
    }
}

/// Fit one channel's model to its dataset and write the results back.
///
/// A channel with nothing observed inside the fit range is not fitted: its
/// yields are pinned to zero and the result is flagged `skipped`.
pub fn fit_channel(
    registry: &mut Registry,
    model: ModelId,
    channel: Channel,
    flags: FitFlags,
    settings: MinimizerSettings,
) -> Result<FitResult, FitError> {
    let data = registry.require_histogram(&channel.data_name())?;
    let observed = BinnedLikelihood::new(registry, model, data).observed();
    let empty = observed <= 0.0;
    if empty {
        pin_yields(registry, model);
    }

    let ids = registry.model_parameters(model);
    let (free, fixed): (Vec<ParamId>, Vec<ParamId>) = ids.into_iter().partition(|id| {
        let p = registry.parameter(*id);
        !p.is_constant() && p.max() > p.min()
    });
    let const_params = fixed
        .iter()
        .map(|id| {
            let p = registry.parameter(*id);
            (p.name.clone(), p.value())
        })
        .collect();

    let free_params: Vec<FreeParameter> = free
        .iter()
        .map(|id| {
            let p = registry.parameter(*id);
            FreeParameter::new(p.name.clone(), p.value(), p.min(), p.max())
        })
        .collect();

    if empty {
        warn!(%channel, observed, "no data in the fit range, fit skipped");
        return Ok(FitResult {
            channel,
            status: 0,
            edm: 0.0,
            min_nll: 0.0,
            n_calls: 0,
            skipped: true,
            float_params: free_params
                .iter()
                .map(|p| FittedParameter {
                    name: p.name.clone(),
                    initial: p.start,
                    value: p.start,
                    error: 0.0,
                    minos: None,
                })
                .collect(),
            const_params,
            covariance: None,
        });
    }

    let minimizer = Minimizer::new(settings);
    let mut minimum = {
        let likelihood = BinnedLikelihood::new(registry, model, data);
        let base = registry.values();
        let with = |x: &[f64]| {
            let mut v = base.clone();
            for (id, value) in free.iter().zip(x) {
                v[id.index()] = *value;
            }
            v
        };
        let nll = |x: &[f64]| likelihood.nll(&with(x));

        let mut minimum = minimizer.minimize(&nll, &free_params);
        if flags.monte_carlo {
            let nll_w2 = |x: &[f64]| likelihood.nll_sumw2(&with(x));
            minimizer.correct_sumw2(&nll_w2, &free_params, &mut minimum);
        }
        if flags.use_minos {
            minimizer.minos(&nll, &free_params, &mut minimum);
        }
        minimum
    };

    let mut float_params = Vec::with_capacity(free.len());
    for (k, id) in free.iter().enumerate() {
        let p = registry.parameter_mut(*id);
        p.set_value(minimum.values[k]);
        p.set_error(minimum.errors[k]);
        p.set_asym_error(minimum.minos[k]);
        float_params.push(FittedParameter {
            name: p.name.clone(),
            initial: free_params[k].start,
            value: p.value(),
            error: p.error(),
            minos: p.asym_error(),
        });
    }

    let n = free.len();
    let covariance = minimum
        .covariance
        .take()
        .map(|c| (0..n).flat_map(|i| (0..n).map(move |j| (i, j))).map(|ij| c[ij]).collect());

    let result = FitResult {
        channel,
        status: minimum.status,
        edm: minimum.edm,
        min_nll: minimum.fval,
        n_calls: minimum.n_calls,
        skipped: false,
        float_params,
        const_params,
        covariance,
    };
    if !result.converged() {
        warn!(%channel, status = result.status, edm = result.edm, "fit did not converge cleanly");
    }
    info!(
        %channel,
        status = result.status,
        nll = result.min_nll,
        edm = result.edm,
        calls = result.n_calls,
        floated = n,
        "fit done"
    );
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Histogram, Observable, Parameter};
    use crate::models::{Component, Model, Shape, ShapeKind};
    use statrs::distribution::{ContinuousCDF, Normal};

    fn settings() -> MinimizerSettings {
        MinimizerSettings {
            tolerance: 0.01,
            ..MinimizerSettings::default()
        }
    }

    fn flat_pass_model(hist: Histogram) -> (Registry, ModelId) {
        let mut x = Observable::new("x", 0.0, 10.0).unwrap();
        x.set_cache_bins(100).unwrap();
        let mut reg = Registry::new(x);
        let n = reg.add_parameter(Parameter::floating("nBkgP", 40.0, 0.0, 200.0)).unwrap();
        let shape = reg
            .add_shape(Shape {
                name: "bkgPass".to_string(),
                kind: ShapeKind::Polynomial {
                    coefficients: Vec::new(),
                },
            })
            .unwrap();
        let model = reg
            .add_model(Model {
                name: "pdfPass".to_string(),
                components: vec![Component {
                    shape,
                    coefficient: Coefficient::Yield(n),
                }],
            })
            .unwrap();
        reg.add_histogram("hPass", hist).unwrap();
        (reg, model)
    }

    #[test]
    fn counting_fit_recovers_poisson_yield() {
        let (mut reg, model) = flat_pass_model(Histogram::uniform(0.0, 10.0, vec![5.0; 10]));
        let flags = FitFlags {
            use_minos: true,
            ..FitFlags::default()
        };
        let result = fit_channel(&mut reg, model, Channel::Pass, flags, settings()).unwrap();
        assert_eq!(result.status, 0);
        let n = result.float_param("nBkgP").unwrap();
        assert!((n.value - 50.0).abs() < 0.1, "{}", n.value);
        assert!((n.error - 50f64.sqrt()).abs() < 0.05, "{}", n.error);
        let (lo, hi) = n.minos.unwrap();
        assert!(lo < 0.0 && hi > 0.0);
        assert!(hi > -lo, "Poisson errors are wider upwards: {lo} {hi}");
        assert_eq!(reg.param("nBkgP").unwrap().value(), n.value);
    }

    #[test]
    fn sumw2_correction_uses_squared_weights() {
        let hist = Histogram::uniform(0.0, 10.0, vec![5.0; 10]).with_sumw2(vec![10.0; 10]);
        let (mut reg, model) = flat_pass_model(hist);
        let flags = FitFlags {
            monte_carlo: true,
            ..FitFlags::default()
        };
        let result = fit_channel(&mut reg, model, Channel::Pass, flags, settings()).unwrap();
        let n = result.float_param("nBkgP").unwrap();
        assert!((n.error - 10.0).abs() < 0.1, "{}", n.error);
    }

    #[test]
    fn empty_dataset_is_skipped() {
        let (mut reg, model) = flat_pass_model(Histogram::uniform(0.0, 10.0, vec![0.0; 10]));
        let result =
            fit_channel(&mut reg, model, Channel::Pass, FitFlags::default(), settings()).unwrap();
        assert!(result.skipped);
        assert_eq!(result.status, 0);
        assert!(result.float_params.is_empty());
        assert_eq!(result.const_params, vec![("nBkgP".to_string(), 0.0)]);
        let n = reg.param("nBkgP").unwrap();
        assert_eq!(n.value(), 0.0);
        assert!(n.is_constant());
    }

    #[test]
    fn data_only_outside_the_range_counts_as_empty() {
        let mut contents = vec![0.0; 10];
        contents[0] = 100.0;
        let (mut reg, model) = flat_pass_model(Histogram::uniform(0.0, 10.0, contents));
        reg.observable_mut().set_range(2.0, 10.0).unwrap();

        let result =
            fit_channel(&mut reg, model, Channel::Pass, FitFlags::default(), settings()).unwrap();

        assert!(result.skipped);
        assert!(result.float_param("nBkgP").is_none());
        let n = reg.param("nBkgP").unwrap();
        assert_eq!(n.value(), 0.0);
        assert_eq!(n.error(), 0.0);
        assert!(n.is_constant());
    }

    /// Gaussian-only pass and fail models over [50, 130], each with one yield.
    fn gaussian_pair(width_pass: f64, width_fail: f64) -> (Registry, ChannelModels) {
        let mut x = Observable::new("x", 50.0, 130.0).unwrap();
        x.set_cache_bins(800).unwrap();
        let mut reg = Registry::new(x);
        let mut models = Vec::new();
        let setup = [(Channel::Pass, width_pass, 900.0), (Channel::Fail, width_fail, 100.0)];
        for (channel, width, events) in setup {
            let mean = reg
                .add_parameter(Parameter::floating(format!("mean{}", channel.suffix()), 90.0, 85.0, 95.0))
                .unwrap();
            let sigma = reg
                .add_parameter(Parameter::floating(channel.width_name(), 1.0, 0.5, 5.0))
                .unwrap();
            let n = reg
                .add_parameter(Parameter::floating(
                    channel.signal_yield_name(),
                    0.5 * events,
                    0.5,
                    1.5 * events,
                ))
                .unwrap();
            let shape = reg
                .add_shape(Shape {
                    name: channel.signal_name(),
                    kind: ShapeKind::Gaussian { mean, sigma },
                })
                .unwrap();
            models.push(
                reg.add_model(Model {
                    name: channel.model_name(),
                    components: vec![Component {
                        shape,
                        coefficient: Coefficient::Yield(n),
                    }],
                })
                .unwrap(),
            );

            let normal = Normal::new(91.0, width).unwrap();
            let counts = (0..80)
                .map(|i| {
                    let lo = 50.0 + i as f64;
                    events * (normal.cdf(lo + 1.0) - normal.cdf(lo))
                })
                .collect();
            reg.add_histogram(&channel.data_name(), Histogram::uniform(50.0, 130.0, counts))
                .unwrap();
        }
        let models = ChannelModels {
            pass: models[0],
            fail: models[1],
        };
        (reg, models)
    }

    #[test]
    fn fit_narrows_both_ranges_and_seeds_the_fail_width() {
        let (mut reg, models) = gaussian_pair(2.5, 3.0);
        let fits = ConstrainedFitter::new((60.0, 120.0), settings())
            .fit(&mut reg, models, FitFlags::default())
            .unwrap();

        assert_eq!(reg.observable().range(), (60.0, 120.0));
        assert_eq!(reg.observable().named_range(FIT_RANGE_NAME), Some((60.0, 120.0)));
        assert!(fits.pass.converged() && fits.fail.converged());

        let sigma_p = fits.pass.float_param("sigmaP").unwrap().value;
        assert!((sigma_p - 2.5).abs() < 0.1, "sigmaP = {sigma_p}");
        let sigma_f = fits.fail.float_param("sigmaF").unwrap();
        assert_eq!(sigma_f.initial, sigma_p);
        assert!((sigma_f.value - 3.0).abs() < 0.15, "sigmaF = {}", sigma_f.value);
        assert_eq!(reg.param("sigmaF").unwrap().min(), 0.8 * sigma_p);
    }

    #[test]
    fn fixed_sigma_keeps_the_fail_width_at_the_pass_width() {
        let (mut reg, models) = gaussian_pair(2.5, 3.0);
        let fits = ConstrainedFitter::new((60.0, 120.0), settings())
            .with_fixed_sigma(true)
            .fit(&mut reg, models, FitFlags::default())
            .unwrap();

        let sigma_p = fits.pass.float_param("sigmaP").unwrap().value;
        assert!(fits.fail.float_param("sigmaF").is_none());
        assert!(fits.fail.const_params.contains(&("sigmaF".to_string(), sigma_p)));
        let sigma_f = reg.param("sigmaF").unwrap();
        assert!(sigma_f.is_constant());
        assert_eq!(sigma_f.value(), sigma_p);
    }

    #[test]
    fn truth_mode_pins_backgrounds_and_freezes_edges() {
        let mut reg = Registry::new(Observable::new("x", 50.0, 130.0).unwrap());
        for name in ["nBkgP", "nBkgF"] {
            reg.add_parameter(Parameter::floating(name, 10.0, 0.5, 150.0)).unwrap();
        }
        reg.add_parameter(Parameter::floating("sosP", 1.0, 0.1, 2.0)).unwrap();
        reg.add_parameter(Parameter::floating("acmsP", 60.0, 50.0, 80.0)).unwrap();

        apply_truth_constraints(&mut reg).unwrap();
        for name in ["nBkgP", "nBkgF", "sosP"] {
            let p = reg.param(name).unwrap();
            assert_eq!(p.value(), 0.0, "{name}");
            assert!(p.is_constant(), "{name}");
        }
        let acms = reg.param("acmsP").unwrap();
        assert!(acms.is_constant());
        assert_eq!(acms.value(), 60.0);
    }

    #[test]
    fn truth_mode_requires_background_yields() {
        let mut reg = Registry::new(Observable::new("x", 50.0, 130.0).unwrap());
        reg.add_parameter(Parameter::floating("nBkgP", 10.0, 0.5, 150.0)).unwrap();
        assert_eq!(
            apply_truth_constraints(&mut reg),
            Err(CompositionError::Undefined("nBkgF".to_string()))
        );
    }

    #[test]
    fn width_propagation_bounds_then_copies() {
        let mut reg = Registry::new(Observable::new("x", 50.0, 130.0).unwrap());
        reg.add_parameter(Parameter::floating("sigmaP", 2.0, 0.5, 5.0)).unwrap();
        reg.add_parameter(Parameter::floating("sigmaF", 0.9, 0.5, 1.0)).unwrap();

        let w = propagate_width(&mut reg, false).unwrap();
        assert_eq!(w, 2.0);
        let sigma_f = reg.param("sigmaF").unwrap();
        assert_eq!(sigma_f.value(), 2.0);
        assert_eq!(sigma_f.min(), 0.8 * 2.0);
        assert_eq!(sigma_f.max(), 3.0 * 2.0);
        assert!(!sigma_f.is_constant());

        propagate_width(&mut reg, true).unwrap();
        assert!(reg.param("sigmaF").unwrap().is_constant());
    }

    #[test]
    fn width_propagation_requires_both_widths() {
        let mut reg = Registry::new(Observable::new("x", 50.0, 130.0).unwrap());
        reg.add_parameter(Parameter::floating("sigmaP", 2.0, 0.5, 5.0)).unwrap();
        assert_eq!(
            propagate_width(&mut reg, false),
            Err(CompositionError::Undefined("sigmaF".to_string()))
        );
    }
}
