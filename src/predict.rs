/*!
Single-step inference in physical units
*/
use crate::data::scale::Normalizer;
use crate::data::window::Window;
use crate::lstm::Predictor;
use crate::util::round1;
use crate::{CpuFloat, Error, Result};
use chrono::NaiveDate;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// Relative spread of the placeholder uncertainty
pub const UNCERTAINTY_SCALE: CpuFloat = 0.1;

/// Predict the PM2.5 concentration following a window, in μg/m³
///
/// `normalizer` must be the one which standardized the window; any other is rejected.
pub fn predict_next(
    predictor: &Predictor,
    window: &Window,
    normalizer: &Normalizer,
) -> Result<CpuFloat> {
    if !predictor.is_trained() {
        return Err(Error::NotReady);
    }
    let expected = normalizer.id();
    if window.normalizer_id != expected {
        return Err(Error::NormalizerMismatch {
            expected,
            actual: window.normalizer_id,
        });
    }
    let standardized = predictor.forward_window(window)?;
    let predicted = normalizer.inverse_target(standardized)?;
    tracing::debug!(standardized, predicted, "predicted next day");
    Ok(predicted)
}

/// A next-day forecast, as handed to the serving layer
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    /// The latest known PM2.5 value
    pub current_value: CpuFloat,
    /// The forecast PM2.5 value
    pub predicted_value: CpuFloat,
    /// The day being forecast
    pub prediction_date: NaiveDate,
    /// Placeholder confidence in `[0.75, 0.95]`; not a calibrated probability
    pub confidence: CpuFloat,
    /// Lower end of the placeholder interval
    pub lower_bound: CpuFloat,
    /// Upper end of the placeholder interval
    pub upper_bound: CpuFloat,
}

impl Forecast {
    /// Wrap a prediction with a perturbation-derived confidence and interval
    pub fn new<R: Rng>(
        current: CpuFloat,
        predicted: CpuFloat,
        prediction_date: NaiveDate,
        rng: &mut R,
    ) -> Forecast {
        let relative = Normal::new(0.0, UNCERTAINTY_SCALE)
            .map(|dist| dist.sample(rng))
            .unwrap_or(0.0)
            .abs();
        let spread = relative * predicted.abs();
        let confidence = (90.0 - relative * 100.0).max(75.0).min(95.0) / 100.0;
        Forecast {
            current_value: round1(current),
            predicted_value: round1(predicted),
            prediction_date,
            confidence,
            lower_bound: round1(predicted - spread),
            upper_bound: round1(predicted + spread),
        }
    }
}
