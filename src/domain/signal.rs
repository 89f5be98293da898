//! Signal generation from a fitted model.

use crate::domain::container::PreparedData;
use crate::domain::error::QuantwalkError;
use crate::domain::model::{ModelSpec, Prediction, SignalModel};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub sec_code: String,
    pub date: NaiveDate,
    pub value: f64,
}

/// How a classifier's output becomes a scalar when one of the ±1 classes was
/// absent from the training labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClassAsymmetryPolicy {
    /// `P(+1)` when −1 is absent; the predicted label when +1 is absent.
    #[default]
    Legacy,
    /// A missing class contributes probability 0 to `P(+1) − P(−1)`.
    Symmetric,
}

impl ClassAsymmetryPolicy {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_lowercase().as_str() {
            "legacy" => Some(ClassAsymmetryPolicy::Legacy),
            "symmetric" => Some(ClassAsymmetryPolicy::Symmetric),
            _ => None,
        }
    }
}

/// Scalar signal per prediction row.
pub fn signal_values(prediction: &Prediction, policy: ClassAsymmetryPolicy) -> Vec<f64> {
    match prediction {
        Prediction::Regression(values) => values.clone(),
        Prediction::Probabilities {
            classes,
            probs,
            labels,
        } => {
            let up = classes.iter().position(|&c| c == 1);
            let down = classes.iter().position(|&c| c == -1);
            probs
                .iter()
                .zip(labels)
                .map(|(p, &label)| match (up, down, policy) {
                    (Some(u), Some(d), _) => p[u] - p[d],
                    (Some(u), None, ClassAsymmetryPolicy::Legacy) => p[u],
                    (None, _, ClassAsymmetryPolicy::Legacy) => label as f64,
                    (u, d, ClassAsymmetryPolicy::Symmetric) => {
                        u.map_or(0.0, |i| p[i]) - d.map_or(0.0, |i| p[i])
                    }
                })
                .collect()
        }
    }
}

pub struct SignalGenerator {
    model: Box<dyn SignalModel>,
    policy: ClassAsymmetryPolicy,
    fitted: bool,
}

impl SignalGenerator {
    pub fn new(spec: &ModelSpec, policy: ClassAsymmetryPolicy) -> Self {
        Self::with_model(spec.build(), policy)
    }

    pub fn with_model(model: Box<dyn SignalModel>, policy: ClassAsymmetryPolicy) -> Self {
        Self {
            model,
            policy,
            fitted: false,
        }
    }

    /// Returns false when there is nothing to train on.
    pub fn fit_model(&mut self, data: &PreparedData) -> Result<bool, QuantwalkError> {
        self.fitted = false;
        if data.train.is_empty() {
            return Ok(false);
        }
        self.model.fit(&data.train.values, &data.train_response)?;
        self.fitted = true;
        Ok(true)
    }

    /// One signal per test row; empty when the test set is empty or the model
    /// could not be fitted.
    pub fn get_signals(&self, data: &PreparedData) -> Result<Vec<Signal>, QuantwalkError> {
        if !self.fitted || data.test.is_empty() {
            return Ok(Vec::new());
        }
        let prediction = self.model.predict(&data.test.values)?;
        let values = signal_values(&prediction, self.policy);
        Ok(data
            .test
            .sec_codes
            .iter()
            .zip(&data.test.dates)
            .zip(values)
            .map(|((sec_code, date), value)| Signal {
                sec_code: sec_code.clone(),
                date: *date,
                value,
            })
            .collect())
    }
}
