//! Extended binned negative log-likelihood.
//!
//! Only bins whose centre lies inside both the observable's active range and
//! the `fitMassRange` named range take part.

use crate::domain::FIT_RANGE_NAME;
use crate::models::{HistId, ModelId, Registry, ShapeEvaluator};

/// How observed bin contents enter the likelihood.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Weighting {
    /// Plain counts (or summed weights).
    Counts,
    /// Sums of squared weights, for the SumW2 covariance correction.
    SquaredWeights,
}

pub struct BinnedLikelihood<'a> {
    registry: &'a Registry,
    model: ModelId,
    centers: Vec<f64>,
    widths: Vec<f64>,
    counts: Vec<f64>,
    sumw2: Vec<f64>,
    n_obs: f64,
    s2: f64,
}

impl<'a> BinnedLikelihood<'a> {
    pub fn new(registry: &'a Registry, model: ModelId, data: HistId) -> Self {
        let observable = registry.observable();
        let (lo, hi) = observable.range();
        let (nlo, nhi) = observable.named_range(FIT_RANGE_NAME).unwrap_or((lo, hi));
        let (lo, hi) = (lo.max(nlo), hi.min(nhi));

        let hist = registry.histogram(data);
        let mut centers = Vec::new();
        let mut widths = Vec::new();
        let mut counts = Vec::new();
        let mut sumw2 = Vec::new();
        for bin in 0..hist.n_bins() {
            let c = hist.center(bin);
            if c >= lo && c < hi {
                centers.push(c);
                widths.push(hist.width(bin));
                counts.push(hist.contents[bin]);
                sumw2.push(hist.sumw2(bin));
            }
        }
        let n_obs = counts.iter().sum();
        let s2 = sumw2.iter().sum();
        Self {
            registry,
            model,
            centers,
            widths,
            counts,
            sumw2,
            n_obs,
            s2,
        }
    }

    pub fn n_bins(&self) -> usize {
        self.centers.len()
    }

    /// Observed content of the bins in range.
    pub fn observed(&self) -> f64 {
        self.n_obs
    }

    pub fn nll(&self, values: &[f64]) -> f64 {
        self.evaluate(values, Weighting::Counts)
    }

    pub fn nll_sumw2(&self, values: &[f64]) -> f64 {
        self.evaluate(values, Weighting::SquaredWeights)
    }

    pub fn evaluate(&self, values: &[f64], weighting: Weighting) -> f64 {
        let model = self.registry.model(self.model);
        let eval = ShapeEvaluator::new(self.registry, values);
        let mu = model.expected_counts(&eval, values, &self.centers, &self.widths);
        let n_exp = model.expected_total(values);

        let (observed, extended) = match weighting {
            Weighting::Counts => (&self.counts, n_exp),
            Weighting::SquaredWeights => {
                let scale = if self.n_obs > 0.0 { self.s2 / self.n_obs } else { 1.0 };
                (&self.sumw2, n_exp * scale)
            }
        };

        let mut nll = extended;
        for (n, m) in observed.iter().zip(&mu) {
            if *n == 0.0 {
                continue;
            }
            if !(*m > 0.0) {
                return f64::INFINITY;
            }
            nll -= n * m.ln();
        }
        nll
    }
}
