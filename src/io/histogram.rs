//! Histogram files and per-bin preprocessing.
//!
//! A histogram file is a JSON object mapping names to histograms:
//!
//! ```json
//! { "bin00_Pass": { "edges": [50.0, 51.0, ...], "contents": [...], "sumw2": [...] } }
//! ```
//!
//! One tag-and-probe bin uses `<bin>_Pass` and `<bin>_Fail`, plus the optional
//! truth templates `<bin>_GenPass` and `<bin>_GenFail`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use tracing::debug;

use crate::domain::{Channel, Histogram};
use crate::error::FitError;
use crate::models::ChannelTotals;

pub type HistogramFile = BTreeMap<String, Histogram>;

/// Key of a bin's histogram, e.g. `bin00_Pass` or `bin00_GenFail`.
pub fn histogram_key(bin: &str, channel: Channel, truth: bool) -> String {
    if truth {
        format!("{bin}_Gen{}", channel.label())
    } else {
        format!("{bin}_{}", channel.label())
    }
}

/// Data of one bin, preprocessed for fitting.
#[derive(Debug, Clone)]
pub struct BinData {
    pub pass: Histogram,
    pub fail: Histogram,
    pub truth_pass: Option<Histogram>,
    pub truth_fail: Option<Histogram>,
    /// Integrals before the validity window was applied.
    pub totals: ChannelTotals,
}

impl BinData {
    /// Compute the raw integrals, then zero the pass and fail bins whose centre
    /// is `<= lo` or `>= hi`.
    pub fn prepare(
        mut pass: Histogram,
        mut fail: Histogram,
        truth_pass: Option<Histogram>,
        truth_fail: Option<Histogram>,
        window: (f64, f64),
    ) -> Result<Self, FitError> {
        pass.validate("pass")?;
        fail.validate("fail")?;
        if pass.edges != fail.edges {
            return Err(FitError::InvalidHistogram {
                name: "fail".to_string(),
                reason: "binning differs from the pass histogram".to_string(),
            });
        }
        for (name, truth) in [("truth pass", &truth_pass), ("truth fail", &truth_fail)] {
            if let Some(h) = truth {
                h.validate(name)?;
            }
        }

        let totals = ChannelTotals {
            pass: pass.integral(),
            fail: fail.integral(),
        };
        let (lo, hi) = window;
        pass.zero_outside(lo, hi);
        fail.zero_outside(lo, hi);
        debug!(
            raw_pass = totals.pass,
            raw_fail = totals.fail,
            kept_pass = pass.integral(),
            kept_fail = fail.integral(),
            "histograms prepared"
        );
        Ok(Self {
            pass,
            fail,
            truth_pass,
            truth_fail,
            totals,
        })
    }

    pub fn data(&self, channel: Channel) -> &Histogram {
        match channel {
            Channel::Pass => &self.pass,
            Channel::Fail => &self.fail,
        }
    }

    pub fn truth(&self, channel: Channel) -> Option<&Histogram> {
        match channel {
            Channel::Pass => self.truth_pass.as_ref(),
            Channel::Fail => self.truth_fail.as_ref(),
        }
    }
}

/// Pick one bin out of a histogram file and prepare it.
pub fn load_bin(file: &HistogramFile, bin: &str, window: (f64, f64)) -> Result<BinData, FitError> {
    let take = |channel: Channel, truth: bool| file.get(&histogram_key(bin, channel, truth)).cloned();
    let pass = take(Channel::Pass, false).ok_or_else(|| missing(bin, Channel::Pass))?;
    let fail = take(Channel::Fail, false).ok_or_else(|| missing(bin, Channel::Fail))?;
    BinData::prepare(
        pass,
        fail,
        take(Channel::Pass, true),
        take(Channel::Fail, true),
        window,
    )
}

/// Bins present in a file, i.e. every `<bin>` with a `<bin>_Pass` entry.
pub fn bin_names(file: &HistogramFile) -> Vec<String> {
    let suffix = format!("_{}", Channel::Pass.label());
    file.keys()
        .filter_map(|key| key.strip_suffix(suffix.as_str()))
        .map(str::to_string)
        .collect()
}

fn missing(bin: &str, channel: Channel) -> FitError {
    FitError::config(format!(
        "histogram '{}' not found in input",
        histogram_key(bin, channel, false)
    ))
}

pub fn read_histogram_file(path: &Path) -> Result<HistogramFile, FitError> {
    let file = File::open(path)
        .map_err(|e| FitError::io(format!("failed to open '{}'", path.display()), e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| FitError::json(format!("invalid histogram file '{}'", path.display()), e))
}

pub fn write_histogram_file(path: &Path, histograms: &HistogramFile) -> Result<(), FitError> {
    let file = File::create(path)
        .map_err(|e| FitError::io(format!("failed to create '{}'", path.display()), e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), histograms)
        .map_err(|e| FitError::json(format!("failed to write '{}'", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(value: f64) -> Histogram {
        Histogram::uniform(50.0, 130.0, vec![value; 80])
    }

    #[test]
    fn integrals_are_taken_before_zeroing() {
        let mut file = HistogramFile::new();
        file.insert("bin00_Pass".to_string(), flat(2.0));
        file.insert("bin00_Fail".to_string(), flat(1.0));
        file.insert("bin00_GenPass".to_string(), flat(3.0));

        let data = load_bin(&file, "bin00", (60.0, 120.0)).unwrap();
        assert_eq!(data.totals.pass, 160.0);
        assert_eq!(data.totals.fail, 80.0);
        assert_eq!(data.pass.integral(), 120.0);
        assert_eq!(data.fail.integral(), 60.0);
        // Truth templates are kept as given.
        assert_eq!(data.truth(Channel::Pass).unwrap().integral(), 240.0);
        assert!(data.truth(Channel::Fail).is_none());
    }

    #[test]
    fn bin_names_skip_truth_templates() {
        let mut file = HistogramFile::new();
        for key in ["bin01_Pass", "bin01_GenPass", "bin01_Fail", "bin00_Pass"] {
            file.insert(key.to_string(), flat(1.0));
        }
        assert_eq!(bin_names(&file), ["bin00", "bin01"]);
    }

    #[test]
    fn missing_channel_is_a_config_error() {
        let mut file = HistogramFile::new();
        file.insert("bin00_Pass".to_string(), flat(1.0));
        let err = load_bin(&file, "bin00", (60.0, 120.0)).unwrap_err();
        assert!(err.to_string().contains("bin00_Fail"));
    }

    #[test]
    fn mismatched_binning_is_rejected() {
        let pass = flat(1.0);
        let fail = Histogram::uniform(50.0, 130.0, vec![1.0; 40]);
        assert!(BinData::prepare(pass, fail, None, None, (60.0, 120.0)).is_err());
    }

    #[test]
    fn histogram_file_parses_optional_sumw2() {
        let text = r#"{
            "b_Pass": {"edges": [0, 1, 2], "contents": [1, 2]},
            "b_Fail": {"edges": [0, 1, 2], "contents": [0.5, 1], "sumw2": [0.25, 0.5]}
        }"#;
        let file: HistogramFile = serde_json::from_str(text).unwrap();
        assert_eq!(file["b_Pass"].sumw2(1), 2.0);
        assert_eq!(file["b_Fail"].sumw2(0), 0.25);
    }
}
