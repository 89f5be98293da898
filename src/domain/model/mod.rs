//! Pluggable signal models.
//!
//! A simulation configures one [`ModelSpec`], which builds a fresh
//! [`SignalModel`] each period.

pub mod logistic;
pub mod ridge;

use crate::domain::error::QuantwalkError;
use serde::{Deserialize, Serialize};

pub use logistic::LogisticClassifier;
pub use ridge::RidgeRegressor;

#[derive(Debug, Clone, PartialEq)]
pub enum Prediction {
    Regression(Vec<f64>),
    Probabilities {
        /// Fitted class labels, ascending.
        classes: Vec<i64>,
        /// One row per sample, one column per class.
        probs: Vec<Vec<f64>>,
        /// Most probable class per sample.
        labels: Vec<i64>,
    },
}

impl Prediction {
    pub fn len(&self) -> usize {
        match self {
            Prediction::Regression(v) => v.len(),
            Prediction::Probabilities { probs, .. } => probs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait SignalModel: Send {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), QuantwalkError>;

    fn predict(&self, x: &[Vec<f64>]) -> Result<Prediction, QuantwalkError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModelSpec {
    Logistic {
        learning_rate: f64,
        iterations: usize,
        l2: f64,
    },
    Ridge {
        l2: f64,
    },
}

impl Default for ModelSpec {
    fn default() -> Self {
        ModelSpec::Logistic {
            learning_rate: 0.5,
            iterations: 300,
            l2: 0.01,
        }
    }
}

impl ModelSpec {
    pub fn build(&self) -> Box<dyn SignalModel> {
        match *self {
            ModelSpec::Logistic {
                learning_rate,
                iterations,
                l2,
            } => Box::new(LogisticClassifier::new(learning_rate, iterations, l2)),
            ModelSpec::Ridge { l2 } => Box::new(RidgeRegressor::new(l2)),
        }
    }
}

/// Rejects empty or ragged inputs.
pub(crate) fn check_shape(x: &[Vec<f64>], y: Option<&[f64]>) -> Result<usize, QuantwalkError> {
    let width = x.first().map_or(0, |r| r.len());
    if x.iter().any(|r| r.len() != width) {
        return Err(QuantwalkError::Model {
            reason: "feature rows have differing widths".into(),
        });
    }
    if let Some(y) = y {
        if x.is_empty() {
            return Err(QuantwalkError::Model {
                reason: "no training rows".into(),
            });
        }
        if y.len() != x.len() {
            return Err(QuantwalkError::Model {
                reason: format!("{} rows but {} responses", x.len(), y.len()),
            });
        }
    }
    Ok(width)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builds_models() {
        let mut model = ModelSpec::Ridge { l2: 0.0 }.build();
        model.fit(&[vec![0.0], vec![1.0], vec![2.0]], &[1.0, 3.0, 5.0]).unwrap();
        match model.predict(&[vec![3.0]]).unwrap() {
            Prediction::Regression(v) => assert!((v[0] - 7.0).abs() < 1e-9),
            other => panic!("expected regression, got {other:?}"),
        }
    }

    #[test]
    fn spec_serializes_with_kind_tag() {
        let json = serde_json::to_string(&ModelSpec::Ridge { l2: 1.0 }).unwrap();
        assert_eq!(json, r#"{"kind":"ridge","l2":1.0}"#);
    }

    #[test]
    fn shape_checks() {
        assert!(check_shape(&[vec![1.0], vec![1.0, 2.0]], None).is_err());
        assert!(check_shape(&[], Some(&[])).is_err());
        assert!(check_shape(&[vec![1.0]], Some(&[1.0, 2.0])).is_err());
        assert_eq!(check_shape(&[vec![1.0, 2.0]], Some(&[1.0])).unwrap(), 2);
    }
}
