//! Text rendering of fit results and diagnostics.
//!
//! Formatting lives here so the fitting code stays free of presentation
//! details and output changes are localized.

use crate::domain::FitResult;
use crate::report::diagnostics::DiagnosticsReport;

/// The summary panel of one bin.
pub fn format_report(report: &DiagnosticsReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "* fit status pass: {}, fail : {}\n",
        report.status_pass, report.status_fail
    ));
    out.push_str(&format!(
        "* eff = {:1.4} ± {:1.4}\n",
        report.efficiency, report.efficiency_error
    ));
    out.push_str("    --- parameters\n");
    for p in &report.parameters {
        out.push_str(&format!("   - {} = {:1.3} ± {:1.3}\n", p.name, p.value, p.error));
    }
    out
}

/// Detailed listing of one fit, with Minos errors and constants.
pub fn format_fit_result(result: &FitResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("=== {} fit ===\n", result.channel));
    if result.skipped {
        out.push_str("empty dataset, fit skipped\n");
    } else {
        out.push_str(&format!(
            "status={} | nll={:.4} | edm={:.3e} | calls={}\n",
            result.status, result.min_nll, result.edm, result.n_calls
        ));
    }
    for p in &result.float_params {
        out.push_str(&format!(
            "  {:<12} {:>12.4} ± {:<10.4}",
            p.name, p.value, p.error
        ));
        if let Some((lo, hi)) = p.minos {
            out.push_str(&format!(" minos [{lo:+.4}, {hi:+.4}]"));
        }
        out.push_str(&format!(" (start {:.4})\n", p.initial));
    }
    if !result.const_params.is_empty() {
        let consts: Vec<String> = result
            .const_params
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .collect();
        out.push_str(&format!("  constant: {}\n", consts.join(", ")));
    }
    if let Some(rho) = strongest_correlation(result) {
        out.push_str(&format!(
            "  largest correlation: {} / {} = {:+.3}\n",
            result.float_params[rho.0].name, result.float_params[rho.1].name, rho.2
        ));
    }
    out
}

fn strongest_correlation(result: &FitResult) -> Option<(usize, usize, f64)> {
    let n = result.float_params.len();
    let mut best: Option<(usize, usize, f64)> = None;
    for i in 0..n {
        for j in (i + 1)..n {
            let Some(r) = result.correlation(i, j) else {
                continue;
            };
            if best.is_none_or(|(_, _, b)| r.abs() > b.abs()) {
                best = Some((i, j, r));
            }
        }
    }
    best
}
