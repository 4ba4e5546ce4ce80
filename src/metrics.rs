/*!
Accuracy metrics for forecasts in physical units
*/
use crate::{CpuFloat, Error, Result};
use serde::{Deserialize, Serialize};

/// Guards the relative error against zero targets
const MAPE_EPSILON: CpuFloat = 1e-8;

/// Regression metrics over a set of predictions
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    /// Number of scored predictions
    pub samples: usize,
    /// Mean absolute error
    pub mae: CpuFloat,
    /// Mean squared error
    pub mse: CpuFloat,
    /// Root mean squared error
    pub rmse: CpuFloat,
    /// Coefficient of determination
    pub r2: CpuFloat,
    /// Mean absolute percentage error, in percent
    pub mape: CpuFloat,
    /// Percentage of predictions within 5 μg/m³ of the target
    pub within_5: CpuFloat,
    /// Percentage of predictions within 10 μg/m³ of the target
    pub within_10: CpuFloat,
}

impl Metrics {
    /// Score predictions against targets
    pub fn compute(predictions: &[CpuFloat], targets: &[CpuFloat]) -> Result<Metrics> {
        if predictions.len() != targets.len() {
            return Err(Error::shape(targets.len(), predictions.len()));
        }
        if targets.is_empty() {
            return Err(Error::Configuration("no predictions to score".into()));
        }
        let n = targets.len() as CpuFloat;
        let errors: Vec<CpuFloat> = predictions
            .iter()
            .zip(targets)
            .map(|(p, t)| p - t)
            .collect();
        let mae = errors.iter().map(|e| e.abs()).sum::<CpuFloat>() / n;
        let ss_res = errors.iter().map(|e| e * e).sum::<CpuFloat>();
        let mse = ss_res / n;
        let mean = targets.iter().sum::<CpuFloat>() / n;
        let ss_tot = targets.iter().map(|t| (t - mean) * (t - mean)).sum::<CpuFloat>();
        let r2 = if ss_tot > 0.0 {
            1.0 - ss_res / ss_tot
        } else if ss_res == 0.0 {
            1.0
        } else {
            0.0
        };
        let mape = errors
            .iter()
            .zip(targets)
            .map(|(e, t)| (e / (t + MAPE_EPSILON)).abs())
            .sum::<CpuFloat>()
            / n
            * 100.0;
        let within = |tolerance: CpuFloat| {
            errors.iter().filter(|e| e.abs() <= tolerance).count() as CpuFloat / n * 100.0
        };
        Ok(Metrics {
            samples: targets.len(),
            mae,
            mse,
            rmse: mse.sqrt(),
            r2,
            mape,
            within_5: within(5.0),
            within_10: within(10.0),
        })
    }

    /// A single blended score in percent: 40% R², 40% ±5 accuracy, 20% (1 − MAPE)
    pub fn overall(&self) -> CpuFloat {
        (self.r2 * 0.4 + self.within_5 / 100.0 * 0.4 + (1.0 - self.mape / 100.0) * 0.2) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn perfect_predictions() {
        let targets = [10.0, 20.0, 30.0];
        let m = Metrics::compute(&targets, &targets).unwrap();
        assert_eq!(m.mae, 0.0);
        assert_eq!(m.rmse, 0.0);
        assert_eq!(m.r2, 1.0);
        assert_eq!(m.within_5, 100.0);
        assert!((m.overall() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn known_errors() {
        let targets = [10.0, 20.0, 30.0, 40.0];
        let predictions = [12.0, 14.0, 30.0, 52.0];
        let m = Metrics::compute(&predictions, &targets).unwrap();
        assert_eq!(m.samples, 4);
        assert_eq!(m.mae, 5.0);
        assert_eq!(m.mse, 46.0);
        assert!((m.rmse - 46f64.sqrt()).abs() < 1e-12);
        assert!((m.r2 - (1.0 - 184.0 / 500.0)).abs() < 1e-12);
        assert!((m.mape - (20.0 + 30.0 + 0.0 + 30.0) / 4.0).abs() < 1e-6);
        assert_eq!(m.within_5, 50.0);
        assert_eq!(m.within_10, 75.0);
    }

    #[test]
    fn constant_targets_and_bad_input() {
        let m = Metrics::compute(&[5.0, 7.0], &[6.0, 6.0]).unwrap();
        assert_eq!(m.r2, 0.0);
        assert!(Metrics::compute(&[1.0], &[1.0, 2.0]).is_err());
        assert!(Metrics::compute(&[], &[]).is_err());
    }
}
