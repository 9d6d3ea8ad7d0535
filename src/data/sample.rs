//! Synthetic tag-and-probe sample generation.
//!
//! Signal probes are drawn from a Breit-Wigner line shape, smeared by a
//! Gaussian detector resolution and split into pass/fail with a fixed
//! efficiency. Each channel also gets a falling exponential background. The
//! unsmeared line shape fills the truth templates.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::{Cauchy, Exp, Normal};
use serde::{Deserialize, Serialize};

use crate::domain::{Channel, Histogram};
use crate::error::FitError;
use crate::io::histogram::{histogram_key, HistogramFile};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    pub bin_name: String,
    pub efficiency: f64,
    pub signal_events: usize,
    pub background_pass: usize,
    pub background_fail: usize,
    /// Decay constant of the background, per unit of the observable.
    pub background_slope: f64,
    pub peak: f64,
    /// Full width of the line shape.
    pub width: f64,
    pub resolution: f64,
    pub range: (f64, f64),
    pub n_bins: usize,
    /// Events used for the truth templates.
    pub truth_events: usize,
    /// Per-event weight; anything other than 1 stores sums of squared weights.
    pub event_weight: f64,
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            bin_name: "bin00".to_string(),
            efficiency: 0.9,
            signal_events: 5000,
            background_pass: 300,
            background_fail: 1500,
            background_slope: 0.03,
            peak: 91.1876,
            width: 2.4952,
            resolution: 1.5,
            range: (50.0, 130.0),
            n_bins: 80,
            truth_events: 20_000,
            event_weight: 1.0,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub histograms: HistogramFile,
    /// Generated signal probes per channel, before any range cut.
    pub signal_pass: usize,
    pub signal_fail: usize,
}

impl SampleData {
    /// Efficiency of the generated signal.
    pub fn generated_efficiency(&self) -> f64 {
        let total = self.signal_pass + self.signal_fail;
        if total == 0 {
            return 0.0;
        }
        self.signal_pass as f64 / total as f64
    }
}

pub fn generate_sample(config: &SampleConfig) -> Result<SampleData, FitError> {
    let (lo, hi) = config.range;
    if !(lo.is_finite() && hi.is_finite() && lo < hi) {
        return Err(FitError::InvalidRange {
            lo,
            hi,
            reason: "sample range needs lo < hi".to_string(),
        });
    }
    if config.n_bins == 0 {
        return Err(FitError::config("sample needs at least one bin"));
    }
    if !(0.0..=1.0).contains(&config.efficiency) {
        return Err(FitError::config(format!(
            "efficiency must lie in [0, 1], got {}",
            config.efficiency
        )));
    }
    if !(config.event_weight.is_finite() && config.event_weight > 0.0) {
        return Err(FitError::config("event weight must be positive"));
    }

    let line_shape = Cauchy::new(config.peak, 0.5 * config.width)
        .map_err(|e| FitError::config(format!("line shape: {e}")))?;
    let smear = Normal::new(0.0, config.resolution)
        .map_err(|e| FitError::config(format!("resolution: {e}")))?;
    let background = Exp::new(config.background_slope)
        .map_err(|e| FitError::config(format!("background slope: {e}")))?;

    let mut rng = StdRng::seed_from_u64(sample_seed(config));
    let empty = || {
        let h = Histogram::uniform(lo, hi, vec![0.0; config.n_bins]);
        if config.event_weight == 1.0 {
            h
        } else {
            h.with_sumw2(vec![0.0; config.n_bins])
        }
    };
    let w = config.event_weight;

    let mut pass = empty();
    let mut fail = empty();
    let (mut signal_pass, mut signal_fail) = (0, 0);
    for _ in 0..config.signal_events {
        let mass = line_shape.sample(&mut rng) + smear.sample(&mut rng);
        if rng.gen_bool(config.efficiency) {
            signal_pass += 1;
            pass.fill(mass, w);
        } else {
            signal_fail += 1;
            fail.fill(mass, w);
        }
    }
    for (hist, count) in [(&mut pass, config.background_pass), (&mut fail, config.background_fail)] {
        for _ in 0..count {
            hist.fill(lo + background.sample(&mut rng), w);
        }
    }

    let mut truth_pass = empty();
    let mut truth_fail = empty();
    for _ in 0..config.truth_events {
        let mass = line_shape.sample(&mut rng);
        if rng.gen_bool(config.efficiency) {
            truth_pass.fill(mass, w);
        } else {
            truth_fail.fill(mass, w);
        }
    }

    let bin = config.bin_name.as_str();
    let mut histograms = HistogramFile::new();
    histograms.insert(histogram_key(bin, Channel::Pass, false), pass);
    histograms.insert(histogram_key(bin, Channel::Fail, false), fail);
    histograms.insert(histogram_key(bin, Channel::Pass, true), truth_pass);
    histograms.insert(histogram_key(bin, Channel::Fail, true), truth_fail);

    Ok(SampleData {
        histograms,
        signal_pass,
        signal_fail,
    })
}

fn sample_seed(config: &SampleConfig) -> u64 {
    let mut hasher = DefaultHasher::new();
    config.seed.hash(&mut hasher);
    config.bin_name.hash(&mut hasher);
    config.efficiency.to_bits().hash(&mut hasher);
    config.signal_events.hash(&mut hasher);
    config.background_pass.hash(&mut hasher);
    config.background_fail.hash(&mut hasher);
    hasher.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_has_all_four_histograms() {
        let data = generate_sample(&SampleConfig::default()).unwrap();
        let keys: Vec<&str> = data.histograms.keys().map(String::as_str).collect();
        assert_eq!(keys, ["bin00_Fail", "bin00_GenFail", "bin00_GenPass", "bin00_Pass"]);
        assert_eq!(data.signal_pass + data.signal_fail, 5000);
        assert!((data.generated_efficiency() - 0.9).abs() < 0.02);
        for h in data.histograms.values() {
            assert!(h.validate("sample").is_ok());
            assert!(h.sumw2.is_none());
        }
    }

    #[test]
    fn same_config_gives_same_sample() {
        let config = SampleConfig {
            signal_events: 500,
            truth_events: 1000,
            ..SampleConfig::default()
        };
        let a = generate_sample(&config).unwrap();
        let b = generate_sample(&config).unwrap();
        assert_eq!(a.histograms, b.histograms);
    }

    #[test]
    fn signal_peaks_near_the_pole() {
        let data = generate_sample(&SampleConfig::default()).unwrap();
        let truth = &data.histograms["bin00_GenPass"];
        let peak_bin = (0..truth.n_bins())
            .max_by(|&a, &b| truth.contents[a].total_cmp(&truth.contents[b]))
            .unwrap();
        assert!((truth.center(peak_bin) - 91.0).abs() <= 2.0);
    }

    #[test]
    fn weighted_sample_tracks_squared_weights() {
        let config = SampleConfig {
            event_weight: 0.5,
            signal_events: 200,
            truth_events: 200,
            ..SampleConfig::default()
        };
        let data = generate_sample(&config).unwrap();
        let pass = &data.histograms["bin00_Pass"];
        let sumw2: f64 = pass.sumw2.as_ref().unwrap().iter().sum();
        assert!((sumw2 - 0.5 * pass.integral()).abs() < 1e-9);
    }

    #[test]
    fn bad_efficiency_is_rejected() {
        let config = SampleConfig {
            efficiency: 1.5,
            ..SampleConfig::default()
        };
        assert!(generate_sample(&config).is_err());
    }
}
