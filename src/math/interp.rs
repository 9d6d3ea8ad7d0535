//! Interpolation of binned densities.
//!
//! Empirical line shapes are evaluated between bin centres with a Lagrange
//! polynomial through the `order + 1` nearest centres. Order 0 returns the
//! density of the bin holding `x`.

use crate::domain::Histogram;

/// Density of `hist` at `x` (content / bin width), interpolated with `order`.
///
/// Returns 0 outside the histogram edges. Interpolation never goes negative:
/// overshoot from high orders next to empty bins is clipped at zero.
pub fn interpolate_density(hist: &Histogram, x: f64, order: usize) -> f64 {
    let Some(bin) = hist.find_bin(x) else {
        return 0.0;
    };
    let n = hist.n_bins();
    if order == 0 || n == 1 {
        return hist.density(bin);
    }

    let points = (order + 1).min(n);
    let first = window_start(hist, bin, x, points);

    let mut xs = Vec::with_capacity(points);
    let mut ys = Vec::with_capacity(points);
    for b in first..first + points {
        xs.push(hist.center(b));
        ys.push(hist.density(b));
    }
    lagrange(&xs, &ys, x).max(0.0)
}

/// First bin of a `points`-wide window centred on `x`, kept inside the histogram.
fn window_start(hist: &Histogram, bin: usize, x: f64, points: usize) -> usize {
    let n = hist.n_bins();
    // For even window sizes lean towards the side `x` sits on.
    let left = if x < hist.center(bin) {
        points / 2
    } else {
        (points - 1) / 2
    };
    bin.saturating_sub(left).min(n - points)
}

/// Evaluate the Lagrange polynomial through `(xs, ys)` at `x`.
pub fn lagrange(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let mut total = 0.0;
    for (i, (&xi, &yi)) in xs.iter().zip(ys).enumerate() {
        let mut term = yi;
        for (j, &xj) in xs.iter().enumerate() {
            if i != j {
                term *= (x - xj) / (xi - xj);
            }
        }
        total += term;
    }
    total
}

/// Linear interpolation on a uniform grid starting at `start` with spacing `step`.
///
/// Values outside the grid are clamped to the nearest end point.
pub fn interpolate_uniform(values: &[f64], start: f64, step: f64, x: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let last = values.len() - 1;
    let u = (x - start) / step;
    if u <= 0.0 {
        return values[0];
    }
    if u >= last as f64 {
        return values[last];
    }
    let i = u.floor() as usize;
    let frac = u - i as f64;
    values[i] * (1.0 - frac) + values[i + 1] * frac
}
