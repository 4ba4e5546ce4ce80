/*!
Input data standardization
*/
use super::{Record, TimeSeries};
use crate::util::fingerprint;
use crate::{CpuFloat, Error, Result};
use num::{Float, NumCast};
use serde::{Deserialize, Serialize};

/// Standardization parameters for a single feature
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureScaler<F = CpuFloat> {
    /// The mean of the fitted data
    pub mean: F,
    /// The (population) standard deviation of the fitted data
    pub std: F,
}

impl<F> FeatureScaler<F>
where
    F: Copy + Float,
{
    /// Fit a scaler to a column of data. An empty column yields a zero mean and zero spread.
    pub fn fit<I: IntoIterator<Item = F>>(values: I) -> FeatureScaler<F> {
        let values: Vec<F> = values.into_iter().collect();
        if values.is_empty() {
            return FeatureScaler {
                mean: F::zero(),
                std: F::zero(),
            };
        }
        let n: F = NumCast::from(values.len()).unwrap_or_else(F::one);
        let mean = values.iter().fold(F::zero(), |acc, &v| acc + v) / n;
        let var = values
            .iter()
            .fold(F::zero(), |acc, &v| acc + (v - mean) * (v - mean))
            / n;
        FeatureScaler {
            mean,
            std: var.sqrt(),
        }
    }

    /// Whether the fitted data had (numerically) no spread
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.std <= F::epsilon() * self.mean.abs().max(F::one())
    }

    /// Scale a value
    #[inline]
    pub fn scale(&self, val: F) -> F {
        // Return 0 for NaN and Inf, and for constant features
        if !val.is_finite() || self.is_degenerate() {
            return F::zero();
        }
        (val - self.mean) / self.std
    }

    /// Map a scaled value back to physical units
    #[inline]
    pub fn unscale(&self, val: F) -> F {
        val * self.std + self.mean
    }
}

/// Per-feature standardization, fit once and reused for every transform of the same model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Normalizer {
    /// One scaler per feature, in column order
    pub columns: Vec<FeatureScaler>,
    /// The column holding the forecast target
    pub target: usize,
}

impl Normalizer {
    /// Fit a normalizer to a row-major matrix with `features` columns
    pub fn fit_matrix(values: &[CpuFloat], features: usize, target: usize) -> Result<Normalizer> {
        if features == 0 || target >= features {
            return Err(Error::Configuration(format!(
                "target column {} out of range for {} features",
                target, features
            )));
        }
        if values.is_empty() || values.len() % features != 0 {
            return Err(Error::shape(
                format!("non-empty rows of {} features", features),
                values.len(),
            ));
        }
        let columns = (0..features)
            .map(|col| FeatureScaler::fit(values.iter().skip(col).step_by(features).copied()))
            .collect();
        Ok(Normalizer { columns, target })
    }

    /// Fit a normalizer to the model features of a series, targeting PM2.5
    pub fn fit(series: &TimeSeries) -> Result<Normalizer> {
        Normalizer::fit_matrix(&series.feature_matrix(), Record::NN_FIELDS, Record::TARGET)
    }

    /// Fit a normalizer to a series and transform it
    pub fn fit_transform(series: &TimeSeries) -> Result<(Normalizer, NormalizedSeries)> {
        let normalizer = Normalizer::fit(series)?;
        let normalized = normalizer.transform(series)?;
        Ok((normalizer, normalized))
    }

    /// The number of features this normalizer was fit on
    pub fn features(&self) -> usize {
        self.columns.len()
    }

    /// A fingerprint of the fitted parameters, identifying which normalizer produced a transform
    pub fn id(&self) -> u64 {
        fingerprint(
            self.columns
                .iter()
                .flat_map(|col| vec![col.mean, col.std])
                .chain(std::iter::once(self.target as CpuFloat)),
        )
    }

    /// Standardize a row-major matrix with the fitted parameters, without refitting
    pub fn transform_matrix(&self, values: &[CpuFloat]) -> Result<NormalizedSeries> {
        let features = self.features();
        if values.len() % features != 0 {
            return Err(Error::shape(
                format!("rows of {} features", features),
                values.len(),
            ));
        }
        let values = values
            .iter()
            .enumerate()
            .map(|(i, &v)| self.columns[i % features].scale(v))
            .collect::<Vec<_>>();
        Ok(NormalizedSeries {
            rows: values.len() / features,
            features,
            values,
            normalizer_id: self.id(),
        })
    }

    /// Standardize a series with the fitted parameters, without refitting
    pub fn transform(&self, series: &TimeSeries) -> Result<NormalizedSeries> {
        self.transform_matrix(&series.feature_matrix())
    }

    /// Map a standardized value of a column back to physical units
    pub fn inverse(&self, column: usize, value: CpuFloat) -> Result<CpuFloat> {
        self.columns
            .get(column)
            .map(|scaler| scaler.unscale(value))
            .ok_or_else(|| Error::shape(format!("column < {}", self.features()), column))
    }

    /// Map a standardized target value back to physical units
    pub fn inverse_target(&self, value: CpuFloat) -> Result<CpuFloat> {
        self.inverse(self.target, value)
    }

    /// Check parameters which did not come from a fit, such as ones read back from disk
    pub fn validate(&self) -> Result<()> {
        if self.target >= self.features() {
            return Err(Error::Configuration(format!(
                "target column {} out of range for {} features",
                self.target,
                self.features()
            )));
        }
        if let Some(col) = self
            .columns
            .iter()
            .position(|col| !(col.mean.is_finite() && col.std.is_finite() && col.std >= 0.0))
        {
            return Err(Error::Configuration(format!(
                "invalid scaler for column {}: {:?}",
                col, self.columns[col]
            )));
        }
        Ok(())
    }
}

/// A standardized row-major matrix, tagged with the normalizer that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedSeries {
    /// The number of rows (days)
    pub rows: usize,
    /// The number of columns (features)
    pub features: usize,
    /// The standardized values, row-major
    pub values: Vec<CpuFloat>,
    /// [`Normalizer::id`] of the producing normalizer
    pub normalizer_id: u64,
}

impl NormalizedSeries {
    /// A row of standardized values
    pub fn row(&self, row: usize) -> &[CpuFloat] {
        &self.values[row * self.features..(row + 1) * self.features]
    }

    /// A contiguous run of rows
    pub fn rows(&self, start: usize, len: usize) -> &[CpuFloat] {
        &self.values[start * self.features..(start + len) * self.features]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::synth::Synthesizer;
    use crate::data::{cities, DataSource};
    use chrono::NaiveDate;

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
    }

    #[test]
    fn fit_uses_population_statistics() {
        let scaler = FeatureScaler::fit(vec![2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert_eq!(scaler.mean, 5.0);
        assert_eq!(scaler.std, 2.0);
        assert_eq!(scaler.scale(9.0), 2.0);
        assert_eq!(scaler.unscale(-1.5), 2.0);
    }

    #[test]
    fn zero_variance_is_neutralized() {
        let scaler = FeatureScaler::fit(vec![0.1f64; 7]);
        assert!(scaler.is_degenerate());
        assert_eq!(scaler.scale(0.1), 0.0);
        assert_eq!(scaler.scale(12.0), 0.0);
        assert!((scaler.unscale(0.0) - 0.1).abs() < 1e-12);
        assert_eq!(scaler.scale(f64::NAN), 0.0);
    }

    #[test]
    fn round_trip() {
        let matrix = vec![10.0, 30.0, 12.5, 28.0, 40.0, 55.0, 7.25, 31.0];
        let normalizer = Normalizer::fit_matrix(&matrix, 2, 0).unwrap();
        let normalized = normalizer.transform_matrix(&matrix).unwrap();
        assert_eq!(normalized.rows, 4);
        assert_eq!(normalized.normalizer_id, normalizer.id());
        for (i, &x) in matrix.iter().enumerate() {
            let back = normalizer.inverse(i % 2, normalized.values[i]).unwrap();
            assert!((back - x).abs() < 1e-9);
        }
        let col0 = normalized.values.iter().step_by(2).sum::<f64>();
        assert!(col0.abs() < 1e-9);
    }

    #[test]
    fn round_trip_on_city_series() {
        let synth = Synthesizer::new(14, 100);
        for city in cities::all() {
            let series = synth.generate(&DataSource::Synthetic(city), end());
            let (normalizer, normalized) = Normalizer::fit_transform(&series).unwrap();
            assert_eq!(normalized.rows, series.len());
            for (row, record) in series.records.iter().enumerate() {
                let scaled = normalized.row(row);
                assert!((normalizer.inverse_target(scaled[0]).unwrap() - record.pm25).abs() < 1e-9);
                assert!((normalizer.inverse(1, scaled[1]).unwrap() - record.no2).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn malformed_parameters_are_rejected() {
        let mut normalizer = Normalizer::fit_matrix(&[1.0, 2.0, 3.0, 5.0], 2, 0).unwrap();
        assert!(normalizer.validate().is_ok());
        normalizer.target = 2;
        assert!(matches!(normalizer.validate(), Err(Error::Configuration(_))));
        assert!(normalizer.inverse_target(0.5).is_err());
        normalizer.target = 1;
        normalizer.columns[0].std = f64::NAN;
        assert!(matches!(normalizer.validate(), Err(Error::Configuration(_))));
    }

    #[test]
    fn transform_does_not_refit() {
        let normalizer = Normalizer::fit_matrix(&[1.0, 1.0, 3.0, 5.0], 2, 0).unwrap();
        let other = normalizer.transform_matrix(&[5.0, 5.0]).unwrap();
        assert_eq!(other.values, vec![3.0, 1.0]);
        assert_eq!(other.normalizer_id, normalizer.id());
        let refit = Normalizer::fit_matrix(&[5.0, 5.0, 6.0, 7.0], 2, 0).unwrap();
        assert_ne!(refit.id(), normalizer.id());
    }

    #[test]
    fn bad_shapes() {
        assert!(matches!(
            Normalizer::fit_matrix(&[1.0, 2.0, 3.0], 2, 0),
            Err(Error::ShapeMismatch { .. })
        ));
        assert!(matches!(
            Normalizer::fit_matrix(&[1.0, 2.0], 2, 2),
            Err(Error::Configuration(_))
        ));
        let normalizer = Normalizer::fit_matrix(&[1.0, 2.0], 2, 0).unwrap();
        assert!(normalizer.inverse(3, 0.0).is_err());
    }
}
