//! Multinomial logistic regression fitted by full-batch gradient descent.

use super::{check_shape, Prediction, SignalModel};
use crate::domain::error::QuantwalkError;

#[derive(Debug, Clone)]
pub struct LogisticClassifier {
    learning_rate: f64,
    iterations: usize,
    l2: f64,
    classes: Vec<i64>,
    /// One row per class: bias followed by feature weights.
    weights: Vec<Vec<f64>>,
}

impl LogisticClassifier {
    pub fn new(learning_rate: f64, iterations: usize, l2: f64) -> Self {
        Self {
            learning_rate,
            iterations,
            l2,
            classes: Vec::new(),
            weights: Vec::new(),
        }
    }

    pub fn classes(&self) -> &[i64] {
        &self.classes
    }

    fn probabilities(&self, row: &[f64]) -> Vec<f64> {
        let scores: Vec<f64> = self
            .weights
            .iter()
            .map(|w| w[0] + w[1..].iter().zip(row).map(|(a, b)| a * b).sum::<f64>())
            .collect();
        softmax(&scores)
    }
}

fn softmax(scores: &[f64]) -> Vec<f64> {
    let max = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = scores.iter().map(|s| (s - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}

impl SignalModel for LogisticClassifier {
    fn fit(&mut self, x: &[Vec<f64>], y: &[f64]) -> Result<(), QuantwalkError> {
        let width = check_shape(x, Some(y))?;
        let labels: Vec<i64> = y.iter().map(|v| v.round() as i64).collect();
        let mut classes = labels.clone();
        classes.sort_unstable();
        classes.dedup();

        self.classes = classes;
        self.weights = vec![vec![0.0; width + 1]; self.classes.len()];
        if self.classes.len() < 2 {
            return Ok(());
        }

        let targets: Vec<usize> = labels
            .iter()
            .map(|l| self.classes.iter().position(|c| c == l).unwrap_or(0))
            .collect();
        let n = x.len() as f64;

        for _ in 0..self.iterations {
            let mut grad = vec![vec![0.0; width + 1]; self.classes.len()];
            for (row, &target) in x.iter().zip(&targets) {
                let probs = self.probabilities(row);
                for (k, p) in probs.iter().enumerate() {
                    let err = p - if k == target { 1.0 } else { 0.0 };
                    grad[k][0] += err;
                    for (g, v) in grad[k][1..].iter_mut().zip(row) {
                        *g += err * v;
                    }
                }
            }
            for (w, g) in self.weights.iter_mut().zip(&grad) {
                w[0] -= self.learning_rate * g[0] / n;
                for j in 1..w.len() {
                    w[j] -= self.learning_rate * (g[j] / n + self.l2 * w[j]);
                }
            }
        }
        Ok(())
    }

    fn predict(&self, x: &[Vec<f64>]) -> Result<Prediction, QuantwalkError> {
        if self.classes.is_empty() {
            return Err(QuantwalkError::Model {
                reason: "logistic classifier used before fit".into(),
            });
        }
        check_shape(x, None)?;
        let probs: Vec<Vec<f64>> = x.iter().map(|row| self.probabilities(row)).collect();
        let labels = probs
            .iter()
            .map(|p| {
                let best = p
                    .iter()
                    .enumerate()
                    .fold(0, |best, (k, v)| if *v > p[best] { k } else { best });
                self.classes[best]
            })
            .collect();
        Ok(Prediction::Probabilities {
            classes: self.classes.clone(),
            probs,
            labels,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn separable() -> (Vec<Vec<f64>>, Vec<f64>) {
        let mut x = Vec::new();
        let mut y = Vec::new();
        for i in 0..30 {
            let v = i as f64 / 30.0;
            x.push(vec![v]);
            y.push(if v < 0.33 { -1.0 } else if v < 0.66 { 0.0 } else { 1.0 });
        }
        (x, y)
    }

    #[test]
    fn learns_ordered_classes() {
        let (x, y) = separable();
        let mut model = LogisticClassifier::new(1.0, 2000, 0.0);
        model.fit(&x, &y).unwrap();
        assert_eq!(model.classes(), &[-1, 0, 1]);

        match model.predict(&[vec![0.0], vec![1.0]]).unwrap() {
            Prediction::Probabilities { probs, labels, .. } => {
                assert_eq!(labels, vec![-1, 1]);
                for p in &probs {
                    assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-9);
                }
                assert!(probs[1][2] > probs[0][2]);
            }
            other => panic!("expected probabilities, got {other:?}"),
        }
    }

    #[test]
    fn single_class_predicts_certainty() {
        let mut model = LogisticClassifier::new(0.1, 10, 0.0);
        model.fit(&[vec![0.1], vec![0.9]], &[1.0, 1.0]).unwrap();
        match model.predict(&[vec![0.5]]).unwrap() {
            Prediction::Probabilities { classes, probs, .. } => {
                assert_eq!(classes, vec![1]);
                assert_eq!(probs, vec![vec![1.0]]);
            }
            other => panic!("expected probabilities, got {other:?}"),
        }
    }

    #[test]
    fn predict_before_fit_is_an_error() {
        let model = LogisticClassifier::new(0.1, 10, 0.0);
        assert!(model.predict(&[vec![0.0]]).is_err());
    }
}
