//! Line shapes and their evaluation.
//!
//! A [`Shape`] only stores handles into the [`Registry`]. Evaluation goes through a
//! [`ShapeEvaluator`], which pairs the registry with a vector of parameter values so
//! the minimizer can try candidate points without touching the registry.
//!
//! Every density is normalized over the observable's active range by the midpoint
//! rule on the observable's cache grid. Convolutions are computed on the same grid
//! and linearly interpolated in between.

use rayon::prelude::*;
use statrs::function::erf::erfc;

use crate::math::{interpolate_density, interpolate_uniform};
use crate::models::registry::{HistId, ParamId, Registry, ShapeId};

/// Resolution samples below this fraction of the peak are dropped from the kernel.
const KERNEL_CUTOFF: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub name: String,
    pub kind: ShapeKind,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ShapeKind {
    /// Empirical density interpolated from a registered histogram.
    Histogram { data: HistId, order: usize },
    Gaussian { mean: ParamId, sigma: ParamId },
    /// Crystal-ball core with a low-side power-law tail, plus `sos` times a
    /// second Gaussian of width `sigma2` on the same mean.
    CrystalBallGauss {
        mean: ParamId,
        sigma: ParamId,
        alpha: ParamId,
        n: ParamId,
        sigma2: ParamId,
        sos: ParamId,
    },
    /// `1 + Σ a_i T_{i+1}(x')`, with `x'` the active range mapped to `[-1, 1]`.
    Chebychev { coefficients: Vec<ParamId> },
    /// `1 + Σ a_i x^{i+1}`.
    Polynomial { coefficients: Vec<ParamId> },
    Exponential { slope: ParamId },
    /// Falling background with a turn-on edge: `erfc((α - x)β) · exp(-(x - peak)γ)`.
    CmsShape {
        alpha: ParamId,
        beta: ParamId,
        gamma: ParamId,
        peak: ParamId,
    },
    Convolution { physics: ShapeId, resolution: ShapeId },
}

impl ShapeKind {
    pub fn label(&self) -> &'static str {
        match self {
            ShapeKind::Histogram { .. } => "HistPdf",
            ShapeKind::Gaussian { .. } => "Gaussian",
            ShapeKind::CrystalBallGauss { .. } => "RooCBExGaussShape",
            ShapeKind::Chebychev { .. } => "Chebychev",
            ShapeKind::Polynomial { .. } => "Polynomial",
            ShapeKind::Exponential { .. } => "Exponential",
            ShapeKind::CmsShape { .. } => "RooCMSShape",
            ShapeKind::Convolution { .. } => "FCONV",
        }
    }

    /// Parameters referenced directly by this shape (not through children).
    pub fn parameters(&self) -> Vec<ParamId> {
        match self {
            ShapeKind::Histogram { .. } | ShapeKind::Convolution { .. } => Vec::new(),
            ShapeKind::Gaussian { mean, sigma } => vec![*mean, *sigma],
            ShapeKind::CrystalBallGauss {
                mean,
                sigma,
                alpha,
                n,
                sigma2,
                sos,
            } => vec![*mean, *sigma, *alpha, *n, *sigma2, *sos],
            ShapeKind::Chebychev { coefficients } | ShapeKind::Polynomial { coefficients } => {
                coefficients.clone()
            }
            ShapeKind::Exponential { slope } => vec![*slope],
            ShapeKind::CmsShape {
                alpha,
                beta,
                gamma,
                peak,
            } => vec![*alpha, *beta, *gamma, *peak],
        }
    }

    pub fn children(&self) -> Vec<ShapeId> {
        match self {
            ShapeKind::Convolution {
                physics,
                resolution,
            } => vec![*physics, *resolution],
            _ => Vec::new(),
        }
    }
}

/// Evaluates shapes of one registry at one point in parameter space.
pub struct ShapeEvaluator<'a> {
    registry: &'a Registry,
    values: &'a [f64],
    range: (f64, f64),
    grid: Vec<f64>,
    step: f64,
}

impl<'a> ShapeEvaluator<'a> {
    /// `values` is indexed by [`ParamId::index`], see [`Registry::values`].
    pub fn new(registry: &'a Registry, values: &'a [f64]) -> Self {
        let observable = registry.observable();
        let (grid, step) = observable.cache_grid();
        Self {
            registry,
            values,
            range: observable.range(),
            grid,
            step,
        }
    }

    fn p(&self, id: ParamId) -> f64 {
        self.values[id.index()]
    }

    /// Normalized density of `shape` at each of `xs`.
    ///
    /// A shape whose integral over the active range is not positive evaluates to
    /// zero everywhere.
    pub fn normalized(&self, shape: ShapeId, xs: &[f64]) -> Vec<f64> {
        let on_grid = self.on_grid(shape);
        let norm: f64 = on_grid.iter().sum::<f64>() * self.step;
        if !(norm.is_finite() && norm > 0.0) {
            return vec![0.0; xs.len()];
        }
        match &self.registry.shape(shape).kind {
            ShapeKind::Convolution { .. } => xs
                .iter()
                .map(|&x| interpolate_uniform(&on_grid, self.grid[0], self.step, x) / norm)
                .collect(),
            _ => xs.iter().map(|&x| self.raw(shape, x) / norm).collect(),
        }
    }

    /// Unnormalized values on the cache grid.
    fn on_grid(&self, shape: ShapeId) -> Vec<f64> {
        match &self.registry.shape(shape).kind {
            ShapeKind::Convolution {
                physics,
                resolution,
            } => self.convolve(*physics, *resolution),
            _ => self.sample(shape, &self.grid),
        }
    }

    fn sample(&self, shape: ShapeId, xs: &[f64]) -> Vec<f64> {
        match &self.registry.shape(shape).kind {
            ShapeKind::Convolution {
                physics,
                resolution,
            } => {
                let conv = self.convolve(*physics, *resolution);
                xs.iter()
                    .map(|&x| interpolate_uniform(&conv, self.grid[0], self.step, x))
                    .collect()
            }
            _ => xs.iter().map(|&x| self.raw(shape, x)).collect(),
        }
    }

    /// Discrete convolution of `physics` with `resolution` on the cache grid.
    fn convolve(&self, physics: ShapeId, resolution: ShapeId) -> Vec<f64> {
        let n = self.grid.len();
        let phys = self.sample(physics, &self.grid);

        // Kernel over offsets -(n-1)Δ ..= (n-1)Δ; index n-1 is offset zero.
        let offsets: Vec<f64> = (0..2 * n - 1)
            .map(|m| (m as f64 - (n - 1) as f64) * self.step)
            .collect();
        let kernel = self.sample(resolution, &offsets);
        let peak = kernel.iter().fold(0.0_f64, |acc, v| acc.max(*v));
        if !(peak > 0.0) {
            return vec![0.0; n];
        }
        let cut = peak * KERNEL_CUTOFF;
        let first = kernel.iter().position(|v| *v >= cut).unwrap_or(0);
        let last = kernel.iter().rposition(|v| *v >= cut).unwrap_or(kernel.len() - 1);

        let step = self.step;
        (0..n)
            .into_par_iter()
            .map(|k| {
                let mut acc = 0.0;
                for m in first..=last {
                    // y_k - offset_m = grid[k - (m - (n - 1))]
                    let j = k as isize + (n - 1) as isize - m as isize;
                    if j >= 0 && (j as usize) < n {
                        acc += kernel[m] * phys[j as usize];
                    }
                }
                acc * step
            })
            .collect()
    }

    /// Unnormalized, non-negative value of a non-convolution shape at `x`.
    fn raw(&self, shape: ShapeId, x: f64) -> f64 {
        let value = match &self.registry.shape(shape).kind {
            ShapeKind::Histogram { data, order } => {
                interpolate_density(self.registry.histogram(*data), x, *order)
            }
            ShapeKind::Gaussian { mean, sigma } => gaussian(x, self.p(*mean), self.p(*sigma)),
            ShapeKind::CrystalBallGauss {
                mean,
                sigma,
                alpha,
                n,
                sigma2,
                sos,
            } => {
                let m = self.p(*mean);
                crystal_ball(x, m, self.p(*sigma), self.p(*alpha), self.p(*n))
                    + self.p(*sos) * gaussian(x, m, self.p(*sigma2))
            }
            ShapeKind::Chebychev { coefficients } => {
                let (lo, hi) = self.range;
                let u = (2.0 * x - (lo + hi)) / (hi - lo);
                let coefs: Vec<f64> = coefficients.iter().map(|c| self.p(*c)).collect();
                chebychev(u, &coefs)
            }
            ShapeKind::Polynomial { coefficients } => {
                let mut total = 1.0;
                let mut power = 1.0;
                for c in coefficients {
                    power *= x;
                    total += self.p(*c) * power;
                }
                total
            }
            // Shifted to the range start so steep slopes stay finite; the
            // constant factor cancels in the normalization.
            ShapeKind::Exponential { slope } => (self.p(*slope) * (x - self.range.0)).exp(),
            ShapeKind::CmsShape {
                alpha,
                beta,
                gamma,
                peak,
            } => cms_shape(
                x,
                self.p(*alpha),
                self.p(*beta),
                self.p(*gamma),
                self.p(*peak),
            ),
            ShapeKind::Convolution { .. } => {
                return self.sample(shape, &[x]).first().copied().unwrap_or(0.0);
            }
        };
        if value.is_finite() { value.max(0.0) } else { 0.0 }
    }
}

pub fn gaussian(x: f64, mean: f64, sigma: f64) -> f64 {
    if !(sigma > 0.0) {
        return 0.0;
    }
    let t = (x - mean) / sigma;
    (-0.5 * t * t).exp()
}

/// Crystal-ball line shape with its tail on the low side for `alpha > 0`.
pub fn crystal_ball(x: f64, mean: f64, sigma: f64, alpha: f64, n: f64) -> f64 {
    if !(sigma > 0.0) {
        return 0.0;
    }
    let mut t = (x - mean) / sigma;
    if alpha < 0.0 {
        t = -t;
    }
    let a = alpha.abs();
    if t >= -a || !(n > 0.0) {
        return (-0.5 * t * t).exp();
    }
    let norm = (n / a).powf(n) * (-0.5 * a * a).exp();
    let b = n / a - a;
    norm / (b - t).powf(n)
}

/// `1 + Σ a_i T_{i+1}(u)` via the three-term recurrence.
pub fn chebychev(u: f64, coefs: &[f64]) -> f64 {
    let mut total = 1.0;
    let (mut prev, mut curr) = (1.0, u);
    for &c in coefs {
        total += c * curr;
        let next = 2.0 * u * curr - prev;
        prev = curr;
        curr = next;
    }
    total
}

pub fn cms_shape(x: f64, alpha: f64, beta: f64, gamma: f64, peak: f64) -> f64 {
    let u = (x - peak) * gamma;
    let falling = if u < -70.0 {
        1e20
    } else if u > 70.0 {
        0.0
    } else {
        (-u).exp()
    };
    erfc((alpha - x) * beta) * falling
}
