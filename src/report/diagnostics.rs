//! Per-bin diagnostics assembled after both fits.

use serde::{Deserialize, Serialize};

use crate::domain::Channel;
use crate::fit::ChannelFits;
use crate::models::Registry;
use crate::report::efficiency::Efficiency;

/// One floated parameter as shown in the report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterLine {
    pub channel: Channel,
    pub name: String,
    pub value: f64,
    pub error: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticsReport {
    pub bin_name: String,
    pub status_pass: i32,
    pub status_fail: i32,
    pub skipped_pass: bool,
    pub skipped_fail: bool,
    pub efficiency: f64,
    pub efficiency_error: f64,
    /// Pass parameters first, then fail parameters, each in fit order.
    pub parameters: Vec<ParameterLine>,
}

/// Collect the report. Values and errors come from the registry, so a
/// parameter shared by both fits shows its final state.
pub fn collect_diagnostics(
    bin_name: &str,
    registry: &Registry,
    fits: &ChannelFits,
    efficiency: Efficiency,
) -> DiagnosticsReport {
    let mut parameters = Vec::new();
    for channel in Channel::ALL {
        for fitted in &fits.get(channel).float_params {
            let (value, error) = match registry.param(&fitted.name) {
                Some(p) => (p.value(), p.error()),
                None => (fitted.value, fitted.error),
            };
            parameters.push(ParameterLine {
                channel,
                name: fitted.name.clone(),
                value,
                error,
            });
        }
    }
    DiagnosticsReport {
        bin_name: bin_name.to_string(),
        status_pass: fits.pass.status,
        status_fail: fits.fail.status,
        skipped_pass: fits.pass.skipped,
        skipped_fail: fits.fail.skipped,
        efficiency: efficiency.value,
        efficiency_error: efficiency.error,
        parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{FitResult, FittedParameter, Observable, Parameter};

    fn result(channel: Channel, status: i32, names: &[&str]) -> FitResult {
        FitResult {
            channel,
            status,
            edm: 0.0,
            min_nll: 0.0,
            n_calls: 0,
            skipped: false,
            float_params: names
                .iter()
                .map(|n| FittedParameter {
                    name: n.to_string(),
                    initial: 0.0,
                    value: -1.0,
                    error: -1.0,
                    minos: None,
                })
                .collect(),
            const_params: Vec::new(),
            covariance: None,
        }
    }

    #[test]
    fn pass_parameters_come_first_with_registry_values() {
        let mut reg = Registry::new(Observable::new("x", 50.0, 130.0).unwrap());
        for (name, value) in [("nSigP", 880.0), ("sigmaP", 1.2), ("nSigF", 95.0), ("sigmaF", 1.5)] {
            let id = reg.add_parameter(Parameter::floating(name, value, 0.0, 2000.0)).unwrap();
            reg.parameter_mut(id).set_error(0.1);
        }
        let fits = ChannelFits {
            pass: result(Channel::Pass, 0, &["nSigP", "sigmaP"]),
            fail: result(Channel::Fail, 3, &["nSigF", "sigmaF"]),
        };
        let eff = Efficiency {
            value: 0.9,
            error: 0.01,
        };
        let report = collect_diagnostics("bin00", &reg, &fits, eff);

        let names: Vec<&str> = report.parameters.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["nSigP", "sigmaP", "nSigF", "sigmaF"]);
        assert_eq!(report.parameters[1].value, 1.2);
        assert_eq!(report.parameters[3].error, 0.1);
        assert_eq!(report.parameters[2].channel, Channel::Fail);
        assert_eq!((report.status_pass, report.status_fail), (0, 3));
    }
}
