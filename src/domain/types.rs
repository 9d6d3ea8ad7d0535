//! Shared domain types.
//!
//! These are the value types that flow through the pipeline:
//!
//! - the fitted observable and its ranges (`Observable`)
//! - binned input data (`Histogram`)
//! - fit parameters and their errors (`Parameter`)
//! - fit outputs (`FitResult`, `FittedParameter`)
//! - the run configuration (`FitConfig`, `FitFlags`)

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// Name of the sub-range used by both fits.
pub const FIT_RANGE_NAME: &str = "fitMassRange";

/// Cache bins used for normalization and convolution sampling unless configured.
pub const DEFAULT_CACHE_BINS: usize = 10_000;

/// Interpolation order of the empirical (truth) signal densities.
pub const DEFAULT_INTERPOLATION_ORDER: usize = 3;

/// Which probe population a model or dataset belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    Pass,
    Fail,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Pass, Channel::Fail];

    pub fn label(self) -> &'static str {
        match self {
            Channel::Pass => "Pass",
            Channel::Fail => "Fail",
        }
    }

    /// One-letter suffix used by parameter names (`sigmaP`, `nBkgF`, ...).
    pub fn suffix(self) -> &'static str {
        match self {
            Channel::Pass => "P",
            Channel::Fail => "F",
        }
    }

    pub fn data_name(self) -> String {
        format!("h{}", self.label())
    }

    pub fn truth_name(self) -> String {
        format!("hGenZ{}", self.label())
    }

    pub fn physics_name(self) -> String {
        format!("sigPhys{}", self.label())
    }

    pub fn resolution_name(self) -> String {
        format!("sigRes{}", self.label())
    }

    pub fn signal_name(self) -> String {
        format!("sig{}", self.label())
    }

    pub fn background_name(self) -> String {
        format!("bkg{}", self.label())
    }

    pub fn model_name(self) -> String {
        format!("pdf{}", self.label())
    }

    pub fn signal_yield_name(self) -> String {
        format!("nSig{}", self.suffix())
    }

    pub fn background_yield_name(self) -> String {
        format!("nBkg{}", self.suffix())
    }

    /// Width of the resolution Gaussian.
    pub fn width_name(self) -> String {
        format!("sigma{}", self.suffix())
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// The single bounded variable every density is defined over.
#[derive(Debug, Clone)]
pub struct Observable {
    pub name: String,
    min: f64,
    max: f64,
    range: (f64, f64),
    named_ranges: BTreeMap<String, (f64, f64)>,
    cache_bins: usize,
}

impl Observable {
    pub fn new(name: impl Into<String>, min: f64, max: f64) -> Result<Self, FitError> {
        if !(min.is_finite() && max.is_finite() && min < max) {
            return Err(FitError::InvalidRange {
                lo: min,
                hi: max,
                reason: "observable bounds must be finite with min < max".to_string(),
            });
        }
        Ok(Self {
            name: name.into(),
            min,
            max,
            range: (min, max),
            named_ranges: BTreeMap::new(),
            cache_bins: 100,
        })
    }

    /// Storage bounds fixed at creation.
    pub fn bounds(&self) -> (f64, f64) {
        (self.min, self.max)
    }

    /// Active range used for normalization.
    pub fn range(&self) -> (f64, f64) {
        self.range
    }

    pub fn set_range(&mut self, lo: f64, hi: f64) -> Result<(), FitError> {
        self.check_within_bounds(lo, hi)?;
        self.range = (lo, hi);
        Ok(())
    }

    pub fn set_named_range(&mut self, name: &str, lo: f64, hi: f64) -> Result<(), FitError> {
        self.check_within_bounds(lo, hi)?;
        self.named_ranges.insert(name.to_string(), (lo, hi));
        Ok(())
    }

    pub fn named_range(&self, name: &str) -> Option<(f64, f64)> {
        self.named_ranges.get(name).copied()
    }

    pub fn cache_bins(&self) -> usize {
        self.cache_bins
    }

    pub fn set_cache_bins(&mut self, bins: usize) -> Result<(), FitError> {
        if bins < 2 {
            return Err(FitError::config(format!("cache bins must be >= 2, got {bins}")));
        }
        self.cache_bins = bins;
        Ok(())
    }

    /// Midpoints of `cache_bins` equal cells over the active range, plus the cell width.
    pub fn cache_grid(&self) -> (Vec<f64>, f64) {
        let (lo, hi) = self.range;
        let n = self.cache_bins;
        let step = (hi - lo) / n as f64;
        let grid = (0..n).map(|k| lo + (k as f64 + 0.5) * step).collect();
        (grid, step)
    }

    fn check_within_bounds(&self, lo: f64, hi: f64) -> Result<(), FitError> {
        if !(lo.is_finite() && hi.is_finite() && lo < hi) {
            return Err(FitError::InvalidRange {
                lo,
                hi,
                reason: "range must be finite with lo < hi".to_string(),
            });
        }
        if lo < self.min || hi > self.max {
            return Err(FitError::InvalidRange {
                lo,
                hi,
                reason: format!(
                    "outside the bounds [{}, {}] of '{}'",
                    self.min, self.max, self.name
                ),
            });
        }
        Ok(())
    }
}

/// Binned counts over the observable.
///
/// `sumw2` holds per-bin sums of squared weights for weighted simulation. When it
/// is absent the contents are plain counts and `sumw2 == contents`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub edges: Vec<f64>,
    pub contents: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sumw2: Option<Vec<f64>>,
}

impl Histogram {
    pub fn new(edges: Vec<f64>, contents: Vec<f64>) -> Self {
        Self {
            edges,
            contents,
            sumw2: None,
        }
    }

    /// Equal-width bins over `[lo, hi]`, one per entry of `contents`.
    pub fn uniform(lo: f64, hi: f64, contents: Vec<f64>) -> Self {
        let n = contents.len();
        let step = (hi - lo) / n as f64;
        let edges = (0..=n).map(|i| lo + i as f64 * step).collect();
        Self::new(edges, contents)
    }

    pub fn with_sumw2(mut self, sumw2: Vec<f64>) -> Self {
        self.sumw2 = Some(sumw2);
        self
    }

    pub fn validate(&self, name: &str) -> Result<(), FitError> {
        let invalid = |reason: String| FitError::InvalidHistogram {
            name: name.to_string(),
            reason,
        };
        if self.contents.is_empty() {
            return Err(invalid("no bins".to_string()));
        }
        if self.edges.len() != self.contents.len() + 1 {
            return Err(invalid(format!(
                "{} edges for {} bins",
                self.edges.len(),
                self.contents.len()
            )));
        }
        if self.edges.iter().any(|e| !e.is_finite()) || self.edges.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid("edges must be finite and strictly increasing".to_string()));
        }
        if self.contents.iter().any(|c| !c.is_finite()) {
            return Err(invalid("non-finite bin content".to_string()));
        }
        if let Some(sumw2) = &self.sumw2 {
            if sumw2.len() != self.contents.len() {
                return Err(invalid("sumw2 length differs from contents".to_string()));
            }
            if sumw2.iter().any(|s| !s.is_finite() || *s < 0.0) {
                return Err(invalid("sumw2 must be finite and non-negative".to_string()));
            }
        }
        if self.integral() < 0.0 {
            return Err(invalid(format!("negative integral {}", self.integral())));
        }
        Ok(())
    }

    pub fn n_bins(&self) -> usize {
        self.contents.len()
    }

    pub fn center(&self, bin: usize) -> f64 {
        0.5 * (self.edges[bin] + self.edges[bin + 1])
    }

    pub fn width(&self, bin: usize) -> f64 {
        self.edges[bin + 1] - self.edges[bin]
    }

    pub fn integral(&self) -> f64 {
        self.contents.iter().sum()
    }

    pub fn sumw2(&self, bin: usize) -> f64 {
        match &self.sumw2 {
            Some(s) => s[bin],
            None => self.contents[bin],
        }
    }

    /// Content divided by bin width.
    pub fn density(&self, bin: usize) -> f64 {
        self.contents[bin] / self.width(bin)
    }

    /// Bin holding `x`, with the upper edge of the last bin included.
    pub fn find_bin(&self, x: f64) -> Option<usize> {
        let n = self.n_bins();
        if !(x >= self.edges[0] && x <= self.edges[n]) {
            return None;
        }
        let idx = self.edges.partition_point(|e| *e <= x);
        Some(idx.saturating_sub(1).min(n - 1))
    }

    /// Add `weight` at `x`. Values outside the edges are dropped.
    pub fn fill(&mut self, x: f64, weight: f64) -> bool {
        let Some(bin) = self.find_bin(x) else {
            return false;
        };
        self.contents[bin] += weight;
        if let Some(s) = self.sumw2.as_mut() {
            s[bin] += weight * weight;
        }
        true
    }

    /// Zero every bin whose centre is `<= lo` or `>= hi`.
    pub fn zero_outside(&mut self, lo: f64, hi: f64) {
        for bin in 0..self.n_bins() {
            let c = self.center(bin);
            if c <= lo || c >= hi {
                self.contents[bin] = 0.0;
                if let Some(s) = self.sumw2.as_mut() {
                    s[bin] = 0.0;
                }
            }
        }
    }
}

/// A named fit parameter owned by the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    pub name: String,
    value: f64,
    min: f64,
    max: f64,
    constant: bool,
    error: f64,
    asym_error: Option<(f64, f64)>,
}

impl Parameter {
    /// A constant with unbounded range (`peakP[90.0]`).
    pub fn constant(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value,
            min: f64::NEG_INFINITY,
            max: f64::INFINITY,
            constant: true,
            error: 0.0,
            asym_error: None,
        }
    }

    /// A floating parameter; the start value is clamped into `[min, max]`.
    pub fn floating(name: impl Into<String>, value: f64, min: f64, max: f64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            name: name.into(),
            value: value.clamp(min, max),
            min,
            max,
            constant: false,
            error: 0.0,
            asym_error: None,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn is_constant(&self) -> bool {
        self.constant
    }

    pub fn error(&self) -> f64 {
        self.error
    }

    /// Minos `(lower, upper)` errors from the last fit, lower one negative.
    pub fn asym_error(&self) -> Option<(f64, f64)> {
        self.asym_error
    }

    /// Set the value, clamped into the current bounds.
    pub fn set_value(&mut self, value: f64) {
        self.value = value.clamp(self.min, self.max);
    }

    /// Replace the bounds (ordered so `min <= max`) and re-clamp the value.
    pub fn set_range(&mut self, lo: f64, hi: f64) {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.min = lo;
        self.max = hi;
        self.value = self.value.clamp(lo, hi);
    }

    pub fn set_constant(&mut self, constant: bool) {
        self.constant = constant;
    }

    /// Fix the parameter at exactly `value`, widening the bounds if needed.
    pub fn pin(&mut self, value: f64) {
        self.min = self.min.min(value);
        self.max = self.max.max(value);
        self.value = value;
        self.constant = true;
    }

    pub fn set_error(&mut self, error: f64) {
        self.error = error;
    }

    pub fn set_asym_error(&mut self, asym: Option<(f64, f64)>) {
        self.asym_error = asym;
    }
}

/// A floated parameter as reported by one fit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FittedParameter {
    pub name: String,
    pub initial: f64,
    pub value: f64,
    pub error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minos: Option<(f64, f64)>,
}

/// Output of a single channel fit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FitResult {
    pub channel: Channel,
    /// Minuit-style status: 0 is a clean convergence.
    pub status: i32,
    pub edm: f64,
    pub min_nll: f64,
    pub n_calls: usize,
    /// The dataset was empty and no optimization ran.
    pub skipped: bool,
    /// Floated parameters, sorted by name.
    pub float_params: Vec<FittedParameter>,
    pub const_params: Vec<(String, f64)>,
    /// Row-major covariance over `float_params`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub covariance: Option<Vec<f64>>,
}

impl FitResult {
    pub fn converged(&self) -> bool {
        self.status == 0
    }

    pub fn float_param(&self, name: &str) -> Option<&FittedParameter> {
        self.float_params.iter().find(|p| p.name == name)
    }

    pub fn correlation(&self, i: usize, j: usize) -> Option<f64> {
        let cov = self.covariance.as_ref()?;
        let n = self.float_params.len();
        if i >= n || j >= n {
            return None;
        }
        let si = cov[i * n + i].sqrt();
        let sj = cov[j * n + j].sqrt();
        if !(si > 0.0 && sj > 0.0) {
            return None;
        }
        Some(cov[i * n + j] / (si * sj))
    }
}

/// Per-run toggles of the constrained fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitFlags {
    /// Background forced absent (simulation truth fits).
    pub truth_mode: bool,
    /// Weighted simulation: apply the sum-of-weights-squared error correction.
    pub monte_carlo: bool,
    pub use_minos: bool,
}

/// Minimizer strategy level, as in Minuit (0 = fast, 2 = high precision).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Strategy {
    Fast,
    Balanced,
    #[default]
    HighPrecision,
}

impl TryFrom<u8> for Strategy {
    type Error = String;

    fn try_from(level: u8) -> Result<Self, Self::Error> {
        match level {
            0 => Ok(Strategy::Fast),
            1 => Ok(Strategy::Balanced),
            2 => Ok(Strategy::HighPrecision),
            other => Err(format!("strategy must be 0, 1 or 2, got {other}")),
        }
    }
}

impl From<Strategy> for u8 {
    fn from(strategy: Strategy) -> Self {
        match strategy {
            Strategy::Fast => 0,
            Strategy::Balanced => 1,
            Strategy::HighPrecision => 2,
        }
    }
}

/// Minimizer knobs shared by the pass and fail fits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MinimizerSettings {
    pub strategy: Strategy,
    /// Scales the EDM target (`0.002 * tolerance * up`).
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for MinimizerSettings {
    fn default() -> Self {
        Self {
            strategy: Strategy::HighPrecision,
            tolerance: 1.0,
            max_iterations: 200,
        }
    }
}

/// Observable definition as written in the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservableSpec {
    pub name: String,
    pub min: f64,
    pub max: f64,
}

impl Default for ObservableSpec {
    fn default() -> Self {
        Self {
            name: "x".to_string(),
            min: 50.0,
            max: 130.0,
        }
    }
}

/// A full run configuration as understood by the pipeline.
///
/// Built from the settings file plus CLI overrides.
#[derive(Debug, Clone)]
pub struct FitConfig {
    pub bin_name: String,
    pub observable: ObservableSpec,
    /// Bins with centres outside this window are zeroed at load time.
    pub validity_window: (f64, f64),
    pub fit_range: (f64, f64),
    pub cache_bins: usize,
    pub interpolation_order: usize,
    /// Declarative model specification, compiled in order.
    pub model: Vec<String>,
    /// Add the auxiliary Gaussian to the fail model.
    pub add_gaussian: bool,
    /// Fix the fail width to the pass width instead of bounding it.
    pub fix_sigma_fail_to_pass: bool,
    pub flags: FitFlags,
    pub minimizer: MinimizerSettings,
    pub export: Option<PathBuf>,
}
