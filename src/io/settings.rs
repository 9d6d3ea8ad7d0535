//! Settings file (JSON) for a fit run.
//!
//! Every field is optional; missing fields take the defaults below. The
//! settings describe the model and ranges, while per-run switches can also be
//! set from the command line.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{
    FitConfig, FitFlags, MinimizerSettings, ObservableSpec, DEFAULT_CACHE_BINS,
    DEFAULT_INTERPOLATION_ORDER,
};
use crate::error::FitError;
use crate::models::ModelPreset;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub observable: ObservableSpec,
    /// Data bins with centres outside this window are zeroed.
    pub validity_window: (f64, f64),
    pub fit_range: (f64, f64),
    pub cache_bins: usize,
    pub interpolation_order: usize,
    /// Preset used when `model` is not given.
    pub preset: ModelPreset,
    /// Explicit specification list; overrides `preset`.
    pub model: Option<Vec<String>>,
    pub add_gaussian: bool,
    pub fix_sigma_fail_to_pass: bool,
    pub truth_mode: bool,
    pub monte_carlo: bool,
    pub use_minos: bool,
    pub minimizer: MinimizerSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            observable: ObservableSpec::default(),
            validity_window: (60.0, 120.0),
            fit_range: (60.0, 120.0),
            cache_bins: DEFAULT_CACHE_BINS,
            interpolation_order: DEFAULT_INTERPOLATION_ORDER,
            preset: ModelPreset::Nominal,
            model: None,
            add_gaussian: false,
            fix_sigma_fail_to_pass: false,
            truth_mode: false,
            monte_carlo: false,
            use_minos: false,
            minimizer: MinimizerSettings::default(),
        }
    }
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self, FitError> {
        let text = fs::read_to_string(path)
            .map_err(|e| FitError::io(format!("failed to read settings '{}'", path.display()), e))?;
        Self::from_json(&text)
            .map_err(|e| FitError::json(format!("invalid settings '{}'", path.display()), e))
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn model_lines(&self) -> Vec<String> {
        match &self.model {
            Some(lines) => lines.clone(),
            None => self.preset.specification(),
        }
    }

    /// Whether the fail model gets the auxiliary Gaussian.
    pub fn uses_aux_gaussian(&self) -> bool {
        self.add_gaussian || (self.model.is_none() && self.preset.uses_aux_gaussian())
    }

    /// Validate and turn into the pipeline's run configuration.
    pub fn to_fit_config(&self, bin_name: &str) -> Result<FitConfig, FitError> {
        check_window("validity_window", self.validity_window)?;
        check_window("fit_range", self.fit_range)?;
        if !(self.observable.min < self.observable.max) {
            return Err(FitError::config(format!(
                "observable '{}' needs min < max",
                self.observable.name
            )));
        }
        if self.cache_bins < 2 {
            return Err(FitError::config("cache_bins must be at least 2"));
        }
        if !(self.minimizer.tolerance > 0.0) {
            return Err(FitError::config("minimizer.tolerance must be positive"));
        }
        if bin_name.trim().is_empty() {
            return Err(FitError::config("bin name must not be empty"));
        }

        Ok(FitConfig {
            bin_name: bin_name.to_string(),
            observable: self.observable.clone(),
            validity_window: self.validity_window,
            fit_range: self.fit_range,
            cache_bins: self.cache_bins,
            interpolation_order: self.interpolation_order,
            model: self.model_lines(),
            add_gaussian: self.uses_aux_gaussian(),
            fix_sigma_fail_to_pass: self.fix_sigma_fail_to_pass,
            flags: FitFlags {
                truth_mode: self.truth_mode,
                monte_carlo: self.monte_carlo,
                use_minos: self.use_minos,
            },
            minimizer: self.minimizer,
            export: None,
        })
    }
}

fn check_window(name: &str, (lo, hi): (f64, f64)) -> Result<(), FitError> {
    if lo.is_finite() && hi.is_finite() && lo < hi {
        Ok(())
    } else {
        Err(FitError::InvalidRange {
            lo,
            hi,
            reason: format!("{name} needs finite bounds with lo < hi"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Strategy;

    #[test]
    fn empty_object_gives_defaults() {
        let s = Settings::from_json("{}").unwrap();
        assert_eq!(s, Settings::default());
        assert_eq!(s.observable.name, "x");
        assert_eq!((s.observable.min, s.observable.max), (50.0, 130.0));
        assert_eq!(s.fit_range, (60.0, 120.0));
        assert_eq!(s.cache_bins, 10_000);
        assert_eq!(s.minimizer.strategy, Strategy::HighPrecision);
        assert_eq!(s.model_lines(), ModelPreset::Nominal.specification());
    }

    #[test]
    fn partial_settings_override_fields() {
        let s = Settings::from_json(
            r#"{
                "fit_range": [70, 110],
                "preset": "alt_sig_gaus",
                "minimizer": {"strategy": 1},
                "observable": {"name": "mass"}
            }"#,
        )
        .unwrap();
        assert_eq!(s.fit_range, (70.0, 110.0));
        assert!(s.uses_aux_gaussian());
        assert_eq!(s.minimizer.strategy, Strategy::Balanced);
        assert_eq!(s.minimizer.max_iterations, 200);
        assert_eq!(s.observable.name, "mass");
        assert_eq!(s.observable.max, 130.0);
    }

    #[test]
    fn explicit_model_replaces_the_preset() {
        let s = Settings::from_json(r#"{"preset": "alt_sig_gaus", "model": ["a[1]"]}"#).unwrap();
        assert_eq!(s.model_lines(), vec!["a[1]".to_string()]);
        assert!(!s.uses_aux_gaussian());
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(Settings::from_json(r#"{"minimizer": {"strategy": 5}}"#).is_err());
        assert!(Settings::from_json(r#"{"unknown": 1}"#).is_err());

        let s = Settings {
            fit_range: (120.0, 60.0),
            ..Settings::default()
        };
        assert!(matches!(s.to_fit_config("bin00"), Err(FitError::InvalidRange { .. })));

        let s = Settings {
            cache_bins: 1,
            ..Settings::default()
        };
        assert!(s.to_fit_config("bin00").is_err());
        assert!(Settings::default().to_fit_config("bin00").is_ok());
    }
}
