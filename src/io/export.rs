//! Export a fitted bin to JSON.
//!
//! One file per bin: both channel fits plus the diagnostics panel, so a
//! downstream script can rebuild the efficiency table without refitting.

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::FitResult;
use crate::error::FitError;
use crate::fit::ChannelFits;
use crate::report::DiagnosticsReport;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunExport {
    pub bin_name: String,
    pub created_at: DateTime<Utc>,
    pub efficiency: f64,
    pub efficiency_error: f64,
    pub pass: FitResult,
    pub fail: FitResult,
    pub diagnostics: DiagnosticsReport,
}

impl RunExport {
    pub fn new(fits: &ChannelFits, report: &DiagnosticsReport) -> Self {
        Self {
            bin_name: report.bin_name.clone(),
            created_at: Utc::now(),
            efficiency: report.efficiency,
            efficiency_error: report.efficiency_error,
            pass: fits.pass.clone(),
            fail: fits.fail.clone(),
            diagnostics: report.clone(),
        }
    }
}

pub fn write_run_json(path: &Path, fits: &ChannelFits, report: &DiagnosticsReport) -> Result<(), FitError> {
    let file = File::create(path)
        .map_err(|e| FitError::io(format!("failed to create export '{}'", path.display()), e))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &RunExport::new(fits, report))
        .map_err(|e| FitError::json(format!("failed to write export '{}'", path.display()), e))
}

pub fn read_run_json(path: &Path) -> Result<RunExport, FitError> {
    let file = File::open(path)
        .map_err(|e| FitError::io(format!("failed to open export '{}'", path.display()), e))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .map_err(|e| FitError::json(format!("invalid export '{}'", path.display()), e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Channel, FittedParameter};

    fn result(channel: Channel, value: f64) -> FitResult {
        FitResult {
            channel,
            status: 0,
            edm: 1e-5,
            min_nll: -10.0,
            n_calls: 42,
            skipped: false,
            float_params: vec![FittedParameter {
                name: channel.signal_yield_name(),
                initial: value * 0.9,
                value,
                error: value.sqrt(),
                minos: None,
            }],
            const_params: vec![("peakP".to_string(), 91.0)],
            covariance: Some(vec![value]),
        }
    }

    #[test]
    fn export_is_readable_back() {
        let fits = ChannelFits {
            pass: result(Channel::Pass, 900.0),
            fail: result(Channel::Fail, 100.0),
        };
        let report = DiagnosticsReport {
            bin_name: "bin03".to_string(),
            status_pass: 0,
            status_fail: 0,
            skipped_pass: false,
            skipped_fail: false,
            efficiency: 0.9,
            efficiency_error: 0.0095,
            parameters: Vec::new(),
        };
        let path = std::env::temp_dir().join(format!("tnp-export-{}.json", std::process::id()));
        write_run_json(&path, &fits, &report).unwrap();
        let back = read_run_json(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(back.bin_name, "bin03");
        assert_eq!(back.efficiency, 0.9);
        assert_eq!(back.fail.float_params[0].name, "nSigF");
        assert_eq!(back.pass.const_params, vec![("peakP".to_string(), 91.0)]);
    }
}
