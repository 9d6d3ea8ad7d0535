//! Assembles the pass and fail models of one bin.
//!
//! The build runs in order:
//!
//! 1. compile the specification instructions into the registry
//! 2. set the observable's cache binning
//! 3. register the empirical truth shapes `sigPhysPass` / `sigPhysFail`
//! 4. convolve them with the user's resolution shapes into `sigPass` / `sigFail`
//! 5. create the yields `nSigP`, `nBkgP`, `nSigF`, `nBkgF` from the raw data integrals
//! 6. `pdfPass = nSigP·sigPass + nBkgP·bkgPass`
//! 7. `pdfFail`, optionally with the auxiliary Gaussian `sigGaussFail`
//!
//! All steps run on a staged copy of the registry, which replaces the caller's
//! registry only once every step has succeeded.

use tracing::debug;

use crate::domain::{Channel, Parameter, DEFAULT_CACHE_BINS, DEFAULT_INTERPOLATION_ORDER};
use crate::error::{CompositionError, FitError};
use crate::models::model::{Coefficient, Component, Model};
use crate::models::registry::{ModelId, ParamId, Registry};
use crate::models::shape::{Shape, ShapeKind};
use crate::models::spec::{Instruction, ParameterSpec, ShapeSpec, ShapeSpecKind};

/// Name of the signal fraction used with the auxiliary fail Gaussian.
pub const SIGNAL_FRACTION_NAME: &str = "sigFracF";
/// Name of the auxiliary fail Gaussian, defined by the specification list.
pub const AUX_GAUSSIAN_NAME: &str = "sigGaussFail";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOptions {
    pub cache_bins: usize,
    pub interpolation_order: usize,
    pub add_gaussian: bool,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self {
            cache_bins: DEFAULT_CACHE_BINS,
            interpolation_order: DEFAULT_INTERPOLATION_ORDER,
            add_gaussian: false,
        }
    }
}

/// Raw data integrals, taken before the validity window is applied.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelTotals {
    pub pass: f64,
    pub fail: f64,
}

impl ChannelTotals {
    pub fn get(&self, channel: Channel) -> f64 {
        match channel {
            Channel::Pass => self.pass,
            Channel::Fail => self.fail,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelModels {
    pub pass: ModelId,
    pub fail: ModelId,
}

impl ChannelModels {
    pub fn get(&self, channel: Channel) -> ModelId {
        match channel {
            Channel::Pass => self.pass,
            Channel::Fail => self.fail,
        }
    }
}

/// Run the full build against `registry`, leaving it untouched on error.
pub fn build_models(
    registry: &mut Registry,
    instructions: &[Instruction],
    totals: ChannelTotals,
    options: BuildOptions,
) -> Result<ChannelModels, FitError> {
    let mut staged = registry.clone();
    let models = build_in_place(&mut staged, instructions, totals, options)?;
    *registry = staged;
    Ok(models)
}

fn build_in_place(
    reg: &mut Registry,
    instructions: &[Instruction],
    totals: ChannelTotals,
    options: BuildOptions,
) -> Result<ChannelModels, FitError> {
    compile(reg, instructions)?;
    reg.observable_mut().set_cache_bins(options.cache_bins)?;

    for channel in Channel::ALL {
        let data = reg.require_histogram(&channel.truth_name())?;
        let physics = reg.add_shape(Shape {
            name: channel.physics_name(),
            kind: ShapeKind::Histogram {
                data,
                order: options.interpolation_order,
            },
        })?;
        let resolution = reg.require_shape(&channel.resolution_name())?;
        reg.add_shape(Shape {
            name: channel.signal_name(),
            kind: ShapeKind::Convolution {
                physics,
                resolution,
            },
        })?;
    }

    for channel in Channel::ALL {
        let total = totals.get(channel);
        reg.add_parameter(yield_parameter(channel.signal_yield_name(), total, 0.9))?;
        reg.add_parameter(yield_parameter(channel.background_yield_name(), total, 0.1))?;
    }

    let pass = Channel::Pass;
    let components = vec![
        yield_component(reg, pass.signal_name(), pass.signal_yield_name())?,
        yield_component(reg, pass.background_name(), pass.background_yield_name())?,
    ];
    let pass = reg.add_model(Model {
        name: pass.model_name(),
        components,
    })?;

    let fail = fail_model(reg, options.add_gaussian)?;
    let fail = reg.add_model(fail)?;

    debug!(
        parameters = reg.parameters().len(),
        shapes = reg.shapes().len(),
        add_gaussian = options.add_gaussian,
        "models built"
    );
    Ok(ChannelModels { pass, fail })
}

fn fail_model(reg: &mut Registry, add_gaussian: bool) -> Result<Model, CompositionError> {
    let fail = Channel::Fail;
    let background = yield_component(reg, fail.background_name(), fail.background_yield_name())?;
    if !add_gaussian {
        let signal = yield_component(reg, fail.signal_name(), fail.signal_yield_name())?;
        return Ok(Model {
            name: fail.model_name(),
            components: vec![signal, background],
        });
    }

    let signal = reg.require_shape(&fail.signal_name())?;
    let aux = reg.require_shape(AUX_GAUSSIAN_NAME)?;
    let total = reg.require_param(&fail.signal_yield_name())?;
    let fraction = match reg.lookup(SIGNAL_FRACTION_NAME) {
        Some(_) => reg.require_param(SIGNAL_FRACTION_NAME)?,
        None => reg.add_parameter(Parameter::floating(SIGNAL_FRACTION_NAME, 0.9, 0.0, 1.0))?,
    };
    Ok(Model {
        name: fail.model_name(),
        components: vec![
            Component {
                shape: signal,
                coefficient: Coefficient::Fraction { fraction, total },
            },
            background,
            Component {
                shape: aux,
                coefficient: Coefficient::Complement { fraction, total },
            },
        ],
    })
}

fn yield_component(
    reg: &Registry,
    shape: String,
    yield_name: String,
) -> Result<Component, CompositionError> {
    Ok(Component {
        shape: reg.require_shape(&shape)?,
        coefficient: Coefficient::Yield(reg.require_param(&yield_name)?),
    })
}

/// Yield starting at `fraction · total` within `[0.5, 1.5 · total]`.
///
/// An empty channel gets a yield pinned at zero. When `1.5 · total` does not
/// exceed the usual floor of 0.5 the floor drops to zero.
pub fn yield_parameter(name: String, total: f64, fraction: f64) -> Parameter {
    if total <= 0.0 {
        let mut p = Parameter::floating(name, 0.0, 0.0, 0.0);
        p.set_constant(true);
        return p;
    }
    let max = 1.5 * total;
    let min = if max > 0.5 { 0.5 } else { 0.0 };
    Parameter::floating(name, fraction * total, min, max)
}

/// Compile instructions into the registry in order.
pub fn compile(reg: &mut Registry, instructions: &[Instruction]) -> Result<(), CompositionError> {
    for instruction in instructions {
        match instruction {
            Instruction::Parameter(spec) => {
                reg.add_parameter(parameter_from_spec(spec))?;
            }
            Instruction::Shape(spec) => {
                let shape = shape_from_spec(reg, spec)?;
                reg.add_shape(shape)?;
            }
        }
    }
    Ok(())
}

fn parameter_from_spec(spec: &ParameterSpec) -> Parameter {
    match spec.bounds {
        Some((lo, hi)) => Parameter::floating(spec.name.clone(), spec.value, lo, hi),
        None => Parameter::constant(spec.name.clone(), spec.value),
    }
}

fn shape_from_spec(reg: &Registry, spec: &ShapeSpec) -> Result<Shape, CompositionError> {
    if spec.observable != reg.observable().name {
        return Err(CompositionError::Undefined(spec.observable.clone()));
    }
    let p = |name: &String| -> Result<ParamId, CompositionError> { reg.require_param(name) };
    let list = |names: &[String]| -> Result<Vec<ParamId>, CompositionError> {
        names.iter().map(|n| reg.require_param(n)).collect()
    };

    let kind = match &spec.kind {
        ShapeSpecKind::Gaussian { mean, sigma } => ShapeKind::Gaussian {
            mean: p(mean)?,
            sigma: p(sigma)?,
        },
        ShapeSpecKind::CrystalBallGauss {
            mean,
            sigma,
            alpha,
            n,
            sigma2,
            sos,
        } => ShapeKind::CrystalBallGauss {
            mean: p(mean)?,
            sigma: p(sigma)?,
            alpha: p(alpha)?,
            n: p(n)?,
            sigma2: p(sigma2)?,
            sos: p(sos)?,
        },
        ShapeSpecKind::Chebychev { coefficients } => ShapeKind::Chebychev {
            coefficients: list(coefficients)?,
        },
        ShapeSpecKind::Polynomial { coefficients } => ShapeKind::Polynomial {
            coefficients: list(coefficients)?,
        },
        ShapeSpecKind::Exponential { slope } => ShapeKind::Exponential { slope: p(slope)? },
        ShapeSpecKind::CmsShape {
            alpha,
            beta,
            gamma,
            peak,
        } => ShapeKind::CmsShape {
            alpha: p(alpha)?,
            beta: p(beta)?,
            gamma: p(gamma)?,
            peak: p(peak)?,
        },
        ShapeSpecKind::Histogram { data, order } => ShapeKind::Histogram {
            data: reg.require_histogram(data)?,
            order: *order,
        },
        ShapeSpecKind::Convolution {
            physics,
            resolution,
        } => ShapeKind::Convolution {
            physics: reg.require_shape(physics)?,
            resolution: reg.require_shape(resolution)?,
        },
    };
    Ok(Shape {
        name: spec.name.clone(),
        kind,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Histogram, Observable};
    use crate::models::spec::parse_specs;

    const NOMINAL: [&str; 8] = [
        "meanP[0,-5,5]",
        "sigmaP[1,0.5,5]",
        "meanF[0,-5,5]",
        "sigmaF[1,0.5,5]",
        "Gaussian::sigResPass(x, meanP, sigmaP)",
        "Gaussian::sigResFail(x, meanF, sigmaF)",
        "Exponential::bkgPass(x, cP[-0.02,-1,1])",
        "Exponential::bkgFail(x, cF[-0.02,-1,1])",
    ];

    fn registry() -> Registry {
        let mut reg = Registry::new(Observable::new("x", 50.0, 130.0).unwrap());
        for channel in Channel::ALL {
            reg.add_histogram(&channel.truth_name(), Histogram::uniform(50.0, 130.0, vec![5.0; 80]))
                .unwrap();
        }
        reg
    }

    fn options(add_gaussian: bool) -> BuildOptions {
        BuildOptions {
            cache_bins: 200,
            interpolation_order: 3,
            add_gaussian,
        }
    }

    const TOTALS: ChannelTotals = ChannelTotals {
        pass: 900.0,
        fail: 100.0,
    };

    #[test]
    fn builds_two_component_models() {
        let mut reg = registry();
        let instructions = parse_specs(&NOMINAL).unwrap();
        let models = build_models(&mut reg, &instructions, TOTALS, options(false)).unwrap();

        assert_eq!(reg.model(models.pass).components.len(), 2);
        assert_eq!(reg.model(models.fail).components.len(), 2);
        assert!(matches!(
            reg.shape(reg.require_shape("sigPass").unwrap()).kind,
            ShapeKind::Convolution { .. }
        ));
        assert_eq!(reg.observable().cache_bins(), 200);

        let n_sig = reg.param("nSigP").unwrap();
        assert_eq!((n_sig.value(), n_sig.min(), n_sig.max()), (810.0, 0.5, 1350.0));
        let n_bkg = reg.param("nBkgF").unwrap();
        assert_eq!((n_bkg.value(), n_bkg.min(), n_bkg.max()), (10.0, 0.5, 150.0));
    }

    #[test]
    fn auxiliary_gaussian_adds_a_fraction() {
        let mut reg = registry();
        let mut lines = NOMINAL.to_vec();
        lines.push("Gaussian::sigGaussFail(x, meanGF[80,70,100], sigmaGF[15,5,125])");
        let instructions = parse_specs(&lines).unwrap();
        let models = build_models(&mut reg, &instructions, TOTALS, options(true)).unwrap();

        let fail = reg.model(models.fail);
        assert_eq!(fail.components.len(), 3);
        let frac = reg.param(SIGNAL_FRACTION_NAME).unwrap();
        assert_eq!((frac.value(), frac.min(), frac.max()), (0.9, 0.0, 1.0));
        let values = reg.values();
        assert!((fail.expected_total(&values) - 100.0).abs() < 1e-9);
    }

    #[test]
    fn predefined_signal_fraction_is_reused() {
        let mut reg = registry();
        let mut lines = NOMINAL.to_vec();
        lines.push("sigFracF[0.7,0.5,1]");
        lines.push("Gaussian::sigGaussFail(x, meanGF[80,70,100], sigmaGF[15,5,125])");
        let instructions = parse_specs(&lines).unwrap();
        build_models(&mut reg, &instructions, TOTALS, options(true)).unwrap();
        assert_eq!(reg.param(SIGNAL_FRACTION_NAME).unwrap().value(), 0.7);
    }

    #[test]
    fn missing_resolution_fails_and_leaves_registry_unchanged() {
        let mut reg = registry();
        let lines: Vec<&str> = NOMINAL
            .iter()
            .copied()
            .filter(|l| !l.contains("sigResPass"))
            .collect();
        let instructions = parse_specs(&lines).unwrap();
        let err = build_models(&mut reg, &instructions, TOTALS, options(false)).unwrap_err();
        assert!(matches!(
            err,
            FitError::Composition(CompositionError::Undefined(ref name)) if name == "sigResPass"
        ));
        assert!(reg.param("meanP").is_none());
        assert!(reg.lookup("sigPhysPass").is_none());
    }

    #[test]
    fn duplicate_definition_is_reported() {
        let mut reg = registry();
        let mut lines = NOMINAL.to_vec();
        lines.push("meanP[1]");
        let instructions = parse_specs(&lines).unwrap();
        let err = build_models(&mut reg, &instructions, TOTALS, options(false)).unwrap_err();
        assert!(matches!(
            err,
            FitError::Composition(CompositionError::Duplicate(ref name)) if name == "meanP"
        ));
    }

    #[test]
    fn wrong_observable_is_undefined() {
        let mut reg = registry();
        let instructions = parse_specs(&["m[0,-1,1]", "s[1,0.5,2]", "Gaussian::g(mass, m, s)"]).unwrap();
        assert_eq!(
            compile(&mut reg, &instructions),
            Err(CompositionError::Undefined("mass".to_string()))
        );
    }

    #[test]
    fn yield_bounds_for_small_and_empty_channels() {
        let empty = yield_parameter("nSigP".to_string(), 0.0, 0.9);
        assert_eq!((empty.value(), empty.min(), empty.max()), (0.0, 0.0, 0.0));
        assert!(empty.is_constant());

        let tiny = yield_parameter("nSigP".to_string(), 0.2, 0.9);
        assert_eq!(tiny.min(), 0.0);
        assert!((tiny.max() - 0.3).abs() < 1e-15);
        assert!((tiny.value() - 0.18).abs() < 1e-15);
    }
}
