//! Bounded damped-Newton minimizer with Minuit-style outputs.
//!
//! Parameters with limits are optimized in Minuit's internal coordinates:
//!
//! - two limits: `ext = lo + (hi - lo)(sin u + 1)/2`
//! - lower limit only: `ext = lo - 1 + sqrt(u² + 1)`
//! - upper limit only: `ext = hi + 1 - sqrt(u² + 1)`
//!
//! Gradients and Hessians are central finite differences in `u`, with all the
//! displaced points evaluated in parallel. The outputs mirror Minuit2: a status
//! code, the estimated distance to minimum (EDM), a covariance mapped back to
//! external coordinates and, on request, Minos errors.

use std::sync::atomic::{AtomicUsize, Ordering};

use nalgebra::{DMatrix, DVector};
use rayon::prelude::*;
use tracing::{debug, trace};

use crate::domain::{MinimizerSettings, Strategy};
use crate::math::{damped_newton_step, invert_symmetric, solve_svd};

/// Error definition of a negative log-likelihood.
pub const UP: f64 = 0.5;

pub const STATUS_OK: i32 = 0;
pub const STATUS_FORCED_POSITIVE: i32 = 1;
pub const STATUS_EDM_ABOVE_MAX: i32 = 3;
pub const STATUS_CALL_LIMIT: i32 = 4;

/// Keeps start values off the exact limits, where the sine map is flat.
const LIMIT_MARGIN: f64 = 1e-6;
const MAX_DAMPING_TRIES: usize = 30;
const MINOS_ITERATIONS: usize = 12;

/// A floated parameter handed to the minimizer.
#[derive(Debug, Clone, PartialEq)]
pub struct FreeParameter {
    pub name: String,
    pub start: f64,
    pub lo: f64,
    pub hi: f64,
}

impl FreeParameter {
    pub fn new(name: impl Into<String>, start: f64, lo: f64, hi: f64) -> Self {
        Self {
            name: name.into(),
            start,
            lo,
            hi,
        }
    }

    fn to_internal(&self, ext: f64) -> f64 {
        match (self.lo.is_finite(), self.hi.is_finite()) {
            (true, true) => {
                let s = 2.0 * (ext - self.lo) / (self.hi - self.lo) - 1.0;
                s.clamp(-1.0 + LIMIT_MARGIN, 1.0 - LIMIT_MARGIN).asin()
            }
            (true, false) => {
                let d = (ext - self.lo).max(LIMIT_MARGIN) + 1.0;
                (d * d - 1.0).sqrt()
            }
            (false, true) => {
                let d = (self.hi - ext).max(LIMIT_MARGIN) + 1.0;
                (d * d - 1.0).sqrt()
            }
            (false, false) => ext,
        }
    }

    fn to_external(&self, u: f64) -> f64 {
        match (self.lo.is_finite(), self.hi.is_finite()) {
            (true, true) => self.lo + 0.5 * (self.hi - self.lo) * (u.sin() + 1.0),
            (true, false) => self.lo - 1.0 + (u * u + 1.0).sqrt(),
            (false, true) => self.hi + 1.0 - (u * u + 1.0).sqrt(),
            (false, false) => u,
        }
    }

    /// `d ext / d u`
    fn jacobian(&self, u: f64) -> f64 {
        match (self.lo.is_finite(), self.hi.is_finite()) {
            (true, true) => 0.5 * (self.hi - self.lo) * u.cos(),
            (true, false) => u / (u * u + 1.0).sqrt(),
            (false, true) => -u / (u * u + 1.0).sqrt(),
            (false, false) => 1.0,
        }
    }
}

/// Result of one minimization.
#[derive(Debug, Clone)]
pub struct Minimum {
    /// External parameter values at the minimum.
    pub values: Vec<f64>,
    pub errors: Vec<f64>,
    /// External covariance; `None` when the Hessian could not be inverted.
    pub covariance: Option<DMatrix<f64>>,
    /// Minos `(lower, upper)` errors, filled by [`Minimizer::minos`].
    pub minos: Vec<Option<(f64, f64)>>,
    pub fval: f64,
    pub edm: f64,
    pub status: i32,
    pub n_calls: usize,
    internal: Vec<f64>,
    internal_covariance: Option<DMatrix<f64>>,
}

impl Minimum {
    fn set_internal_covariance(&mut self, params: &[FreeParameter], cov: DMatrix<f64>) {
        let jac: Vec<f64> = params
            .iter()
            .zip(&self.internal)
            .map(|(p, &u)| p.jacobian(u))
            .collect();
        let n = params.len();
        let ext = DMatrix::from_fn(n, n, |i, j| jac[i] * cov[(i, j)] * jac[j]);
        self.errors = (0..n).map(|i| ext[(i, i)].max(0.0).sqrt()).collect();
        self.covariance = Some(ext);
        self.internal_covariance = Some(cov);
    }
}

/// Finite-difference settings derived from the strategy level.
#[derive(Debug, Clone, Copy)]
struct Plan {
    step: f64,
    max_iterations: usize,
}

impl Plan {
    fn new(settings: &MinimizerSettings) -> Self {
        match settings.strategy {
            Strategy::Fast => Plan {
                step: 1e-3,
                max_iterations: settings.max_iterations,
            },
            Strategy::Balanced => Plan {
                step: 1e-4,
                max_iterations: settings.max_iterations,
            },
            Strategy::HighPrecision => Plan {
                step: 1e-5,
                max_iterations: settings.max_iterations * 2,
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct Minimizer {
    settings: MinimizerSettings,
}

impl Minimizer {
    pub fn new(settings: MinimizerSettings) -> Self {
        Self { settings }
    }

    fn edm_max(&self) -> f64 {
        0.002 * self.settings.tolerance * UP
    }

    /// Minimize `f` over `params`, starting from their `start` values.
    pub fn minimize<F>(&self, f: &F, params: &[FreeParameter]) -> Minimum
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let plan = Plan::new(&self.settings);
        let calls = AtomicUsize::new(0);
        let objective = |u: &[f64]| {
            calls.fetch_add(1, Ordering::Relaxed);
            let v = f(&external(params, u));
            if v.is_nan() { f64::INFINITY } else { v }
        };

        let mut u: Vec<f64> = params.iter().map(|p| p.to_internal(p.start)).collect();
        let mut fval = objective(&u);
        let edm_max = self.edm_max();

        if params.is_empty() {
            return Minimum {
                values: Vec::new(),
                errors: Vec::new(),
                covariance: None,
                minos: Vec::new(),
                fval,
                edm: 0.0,
                status: STATUS_OK,
                n_calls: calls.load(Ordering::Relaxed),
                internal: u,
                internal_covariance: None,
            };
        }

        let mut lambda = 1e-3;
        let mut status = STATUS_CALL_LIMIT;
        let mut derivs = derivatives(&objective, &u, fval, plan.step);
        let mut edm = estimated_distance(&derivs.1, &derivs.0);

        for iteration in 0..plan.max_iterations {
            trace!(iteration, fval, edm, lambda, "newton iteration");
            if edm < edm_max {
                status = STATUS_OK;
                break;
            }

            let mut improved = false;
            for _ in 0..MAX_DAMPING_TRIES {
                let Some(delta) = damped_newton_step(&derivs.1, &derivs.0, lambda) else {
                    lambda *= 10.0;
                    continue;
                };
                let candidate: Vec<f64> = u.iter().zip(delta.iter()).map(|(a, d)| a + d).collect();
                let f_new = objective(&candidate);
                if f_new < fval {
                    u = candidate;
                    fval = f_new;
                    lambda = (lambda * 0.1).max(1e-12);
                    improved = true;
                    break;
                }
                lambda *= 10.0;
            }
            if !improved {
                status = STATUS_EDM_ABOVE_MAX;
                break;
            }
            derivs = derivatives(&objective, &u, fval, plan.step);
            edm = estimated_distance(&derivs.1, &derivs.0);
        }
        // A final check catches convergence on the last allowed iteration.
        if status == STATUS_CALL_LIMIT && edm < edm_max && plan.max_iterations > 0 {
            status = STATUS_OK;
        }

        let mut minimum = Minimum {
            values: external(params, &u),
            errors: vec![0.0; params.len()],
            covariance: None,
            minos: vec![None; params.len()],
            fval,
            edm,
            status,
            n_calls: 0,
            internal: u,
            internal_covariance: None,
        };

        match invert_symmetric(&derivs.1) {
            Some(inv) => {
                if inv.forced_positive && minimum.status == STATUS_OK {
                    minimum.status = STATUS_FORCED_POSITIVE;
                }
                minimum.set_internal_covariance(params, inv.inverse);
            }
            None => {
                if minimum.status == STATUS_OK {
                    minimum.status = STATUS_FORCED_POSITIVE;
                }
            }
        }
        minimum.n_calls = calls.load(Ordering::Relaxed);
        debug!(
            status = minimum.status,
            fval = minimum.fval,
            edm = minimum.edm,
            calls = minimum.n_calls,
            "minimization finished"
        );
        minimum
    }

    /// Replace the covariance by `V · H_w2 · V`, with `H_w2` the Hessian of the
    /// squared-weight objective `g` at the minimum.
    pub fn correct_sumw2<G>(&self, g: &G, params: &[FreeParameter], minimum: &mut Minimum)
    where
        G: Fn(&[f64]) -> f64 + Sync,
    {
        let Some(v) = minimum.internal_covariance.clone() else {
            return;
        };
        let plan = Plan::new(&self.settings);
        let objective = |u: &[f64]| g(&external(params, u));
        let g0 = objective(&minimum.internal);
        let (_, h_w2) = derivatives(&objective, &minimum.internal, g0, plan.step);
        let corrected = &v * h_w2 * &v;
        minimum.set_internal_covariance(params, corrected);
    }

    /// Asymmetric errors from profiling `f` around the minimum.
    pub fn minos<F>(&self, f: &F, params: &[FreeParameter], minimum: &mut Minimum)
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        for i in 0..params.len() {
            let sigma = minimum.errors[i];
            if !(sigma > 0.0) {
                continue;
            }
            let lower = self.minos_side(f, params, minimum, i, -1.0);
            let upper = self.minos_side(f, params, minimum, i, 1.0);
            minimum.minos[i] = Some((-lower, upper));
        }
    }

    /// Distance from the minimum, in direction `sign`, where the profiled
    /// objective rises by `UP`. Stops at the parameter limit.
    fn minos_side<F>(
        &self,
        f: &F,
        params: &[FreeParameter],
        minimum: &Minimum,
        i: usize,
        sign: f64,
    ) -> f64
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let center = minimum.values[i];
        let limit = if sign > 0.0 {
            params[i].hi - center
        } else {
            center - params[i].lo
        };
        let mut t = minimum.errors[i].min(limit);
        for _ in 0..MINOS_ITERATIONS {
            let rise = self.profile(f, params, minimum, i, center + sign * t) - minimum.fval;
            if t >= limit && rise < UP {
                return limit;
            }
            if (rise - UP).abs() < 1e-3 * UP {
                break;
            }
            let next = if rise > 0.0 {
                t * (UP / rise).sqrt()
            } else {
                2.0 * t
            };
            t = next.min(limit);
        }
        t
    }

    /// Minimum of `f` over all parameters but `i`, which is fixed at `value`.
    fn profile<F>(&self, f: &F, params: &[FreeParameter], minimum: &Minimum, i: usize, value: f64) -> f64
    where
        F: Fn(&[f64]) -> f64 + Sync,
    {
        let others: Vec<FreeParameter> = params
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .map(|(j, p)| FreeParameter::new(p.name.clone(), minimum.values[j], p.lo, p.hi))
            .collect();
        let full = |rest: &[f64]| {
            let mut x = Vec::with_capacity(params.len());
            x.extend_from_slice(&rest[..i]);
            x.push(value);
            x.extend_from_slice(&rest[i..]);
            f(&x)
        };
        let inner = Minimizer::new(MinimizerSettings {
            strategy: Strategy::Fast,
            ..self.settings
        });
        inner.minimize(&full, &others).fval
    }
}

fn external(params: &[FreeParameter], u: &[f64]) -> Vec<f64> {
    params.iter().zip(u).map(|(p, &v)| p.to_external(v)).collect()
}

/// `½ gᵀ H⁻¹ g`, infinite when no solve is possible.
fn estimated_distance(h: &DMatrix<f64>, g: &DVector<f64>) -> f64 {
    if let Some(inv) = invert_symmetric(h) {
        return 0.5 * g.dot(&(&inv.inverse * g)).abs();
    }
    match solve_svd(h, g) {
        Some(x) => 0.5 * g.dot(&x).abs(),
        None => f64::INFINITY,
    }
}

/// Central-difference gradient and Hessian at `u`, where `f(u) = f0`.
fn derivatives<F>(f: &F, u: &[f64], f0: f64, step: f64) -> (DVector<f64>, DMatrix<f64>)
where
    F: Fn(&[f64]) -> f64 + Sync,
{
    let n = u.len();
    let h: Vec<f64> = u.iter().map(|v| step * v.abs().max(1.0)).collect();

    // Displacements as (index, sign) pairs; one entry for axis points, two for
    // the diagonal corners of each off-diagonal pair.
    let mut moves: Vec<Vec<(usize, f64)>> = Vec::with_capacity(2 * n + 2 * n * n);
    for i in 0..n {
        moves.push(vec![(i, 1.0)]);
        moves.push(vec![(i, -1.0)]);
    }
    for i in 0..n {
        for j in (i + 1)..n {
            for (si, sj) in [(1.0, 1.0), (1.0, -1.0), (-1.0, 1.0), (-1.0, -1.0)] {
                moves.push(vec![(i, si), (j, sj)]);
            }
        }
    }

    let values: Vec<f64> = moves
        .par_iter()
        .map(|mv| {
            let mut x = u.to_vec();
            for &(k, s) in mv {
                x[k] += s * h[k];
            }
            f(&x)
        })
        .collect();

    let mut grad = DVector::zeros(n);
    let mut hess = DMatrix::zeros(n, n);
    for i in 0..n {
        let plus = values[2 * i];
        let minus = values[2 * i + 1];
        grad[i] = (plus - minus) / (2.0 * h[i]);
        hess[(i, i)] = (plus - 2.0 * f0 + minus) / (h[i] * h[i]);
    }
    let mut k = 2 * n;
    for i in 0..n {
        for j in (i + 1)..n {
            let (pp, pm, mp, mm) = (values[k], values[k + 1], values[k + 2], values[k + 3]);
            let v = (pp - pm - mp + mm) / (4.0 * h[i] * h[j]);
            hess[(i, j)] = v;
            hess[(j, i)] = v;
            k += 4;
        }
    }
    (grad, hess)
}
