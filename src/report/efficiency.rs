//! Efficiency from the fitted signal yields.

use serde::{Deserialize, Serialize};

use crate::error::FitError;

/// A fitted yield with its (symmetric) error.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Yield {
    pub value: f64,
    pub error: f64,
}

impl Yield {
    pub fn new(value: f64, error: f64) -> Self {
        Self { value, error }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Efficiency {
    pub value: f64,
    pub error: f64,
}

/// `eff = nP / (nP + nF)` with the uncorrelated error propagation
/// `σ = sqrt(nP²·σF² + nF²·σP²) / (nP + nF)²`.
///
/// The two yields come from independent fits, so their covariance is taken as zero.
pub fn efficiency(pass: Yield, fail: Yield) -> Result<Efficiency, FitError> {
    let total = pass.value + fail.value;
    if total == 0.0 {
        return Err(FitError::ZeroTotal);
    }
    let value = pass.value / total;
    let error = (pass.value.powi(2) * fail.error.powi(2) + fail.value.powi(2) * pass.error.powi(2))
        .sqrt()
        / (total * total);
    Ok(Efficiency { value, error })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_the_closed_form() {
        let eff = efficiency(Yield::new(900.0, 30.0), Yield::new(100.0, 10.0)).unwrap();
        assert!((eff.value - 0.9).abs() < 1e-15);
        // sqrt(900²·10² + 100²·30²) / 1000²
        let expected = (810_000.0_f64 * 100.0 + 10_000.0 * 900.0).sqrt() / 1e6;
        assert!((eff.error - expected).abs() < 1e-15);
    }

    #[test]
    fn swapping_channels_gives_the_complement() {
        let pass = Yield::new(640.0, 27.0);
        let fail = Yield::new(215.0, 16.0);
        let eff = efficiency(pass, fail).unwrap();
        let ineff = efficiency(fail, pass).unwrap();
        assert!((eff.value + ineff.value - 1.0).abs() < 1e-15);
        assert!((eff.error - ineff.error).abs() < 1e-15);
        assert!((0.0..=1.0).contains(&eff.value));
    }

    #[test]
    fn empty_pass_gives_exactly_zero() {
        let eff = efficiency(Yield::new(0.0, 0.0), Yield::new(100.0, 10.0)).unwrap();
        assert_eq!(eff.value, 0.0);
        assert_eq!(eff.error, 0.0);
    }

    #[test]
    fn zero_total_is_an_error() {
        let err = efficiency(Yield::new(0.0, 0.0), Yield::new(0.0, 0.0)).unwrap_err();
        assert!(matches!(err, FitError::ZeroTotal));
    }
}
