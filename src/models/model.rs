//! Extended sum models.
//!
//! A model is a list of components, each a normalized shape times a coefficient.
//! The coefficients sum to the expected event count of the channel.

use crate::models::registry::{ParamId, ShapeId};
use crate::models::shape::ShapeEvaluator;

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub name: String,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Component {
    pub shape: ShapeId,
    pub coefficient: Coefficient,
}

/// Expected yield of one component.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Coefficient {
    /// A yield parameter used as is.
    Yield(ParamId),
    /// `fraction · total`
    Fraction { fraction: ParamId, total: ParamId },
    /// `(1 - fraction) · total`
    Complement { fraction: ParamId, total: ParamId },
}

impl Coefficient {
    pub fn value(&self, values: &[f64]) -> f64 {
        match *self {
            Coefficient::Yield(p) => values[p.index()],
            Coefficient::Fraction { fraction, total } => {
                values[fraction.index()] * values[total.index()]
            }
            Coefficient::Complement { fraction, total } => {
                (1.0 - values[fraction.index()]) * values[total.index()]
            }
        }
    }

    pub fn parameters(&self) -> Vec<ParamId> {
        match *self {
            Coefficient::Yield(p) => vec![p],
            Coefficient::Fraction { fraction, total }
            | Coefficient::Complement { fraction, total } => vec![fraction, total],
        }
    }
}

impl Model {
    /// Sum of all component coefficients.
    pub fn expected_total(&self, values: &[f64]) -> f64 {
        self.components.iter().map(|c| c.coefficient.value(values)).sum()
    }

    /// Expected counts in bins centred at `centers` with the given `widths`.
    pub fn expected_counts(
        &self,
        eval: &ShapeEvaluator<'_>,
        values: &[f64],
        centers: &[f64],
        widths: &[f64],
    ) -> Vec<f64> {
        let mut mu = vec![0.0; centers.len()];
        for component in &self.components {
            let coef = component.coefficient.value(values);
            if coef == 0.0 {
                continue;
            }
            let density = eval.normalized(component.shape, centers);
            for ((m, d), w) in mu.iter_mut().zip(&density).zip(widths) {
                *m += coef * d * w;
            }
        }
        mu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Observable, Parameter};
    use crate::models::registry::Registry;
    use crate::models::shape::{Shape, ShapeKind};

    #[test]
    fn fraction_coefficients_split_the_signal_yield() {
        let mut reg = Registry::new(Observable::new("x", 0.0, 10.0).unwrap());
        let f = reg.add_parameter(Parameter::floating("sigFracF", 0.75, 0.0, 1.0)).unwrap();
        let n = reg.add_parameter(Parameter::floating("nSigF", 200.0, 0.5, 300.0)).unwrap();
        let values = reg.values();
        let a = Coefficient::Fraction { fraction: f, total: n };
        let b = Coefficient::Complement { fraction: f, total: n };
        assert_eq!(a.value(&values), 150.0);
        assert_eq!(b.value(&values), 50.0);
        assert_eq!(a.parameters(), vec![f, n]);
    }

    #[test]
    fn expected_counts_sum_to_total_for_full_coverage() {
        let mut x = Observable::new("x", 0.0, 10.0).unwrap();
        x.set_cache_bins(100).unwrap();
        let mut reg = Registry::new(x);
        let slope = reg.add_parameter(Parameter::constant("c", -0.2)).unwrap();
        let n = reg.add_parameter(Parameter::floating("nBkgP", 40.0, 0.0, 100.0)).unwrap();
        let shape = reg
            .add_shape(Shape {
                name: "bkgPass".to_string(),
                kind: ShapeKind::Exponential { slope },
            })
            .unwrap();
        let model = Model {
            name: "pdfPass".to_string(),
            components: vec![Component {
                shape,
                coefficient: Coefficient::Yield(n),
            }],
        };
        let values = reg.values();
        let eval = ShapeEvaluator::new(&reg, &values);
        let centers: Vec<f64> = (0..100).map(|i| 0.05 + 0.1 * i as f64).collect();
        let widths = vec![0.1; 100];
        let mu = model.expected_counts(&eval, &values, &centers, &widths);
        let total: f64 = mu.iter().sum();
        assert!((total - 40.0).abs() < 1e-9);
        assert_eq!(model.expected_total(&values), 40.0);
    }
}
