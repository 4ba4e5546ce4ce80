/*!
Fixed-length input windows over a standardized series
*/
use super::scale::NormalizedSeries;
use crate::{CpuFloat, Error, GpuFloat, Result};
use rand::seq::SliceRandom;
use rand::Rng;
use tch::Tensor;

/// `seq_length` consecutive standardized rows, ready to be fed to the model
#[derive(Debug, Clone, PartialEq)]
pub struct Window {
    /// The number of rows
    pub seq_length: usize,
    /// The number of features per row
    pub features: usize,
    /// The values, row-major
    pub values: Vec<CpuFloat>,
    /// Fingerprint of the normalizer which standardized these values
    pub normalizer_id: u64,
}

impl Window {
    /// Build a window from raw standardized values, checking their count
    pub fn new(
        values: Vec<CpuFloat>,
        seq_length: usize,
        features: usize,
        normalizer_id: u64,
    ) -> Result<Window> {
        if values.len() != seq_length * features {
            return Err(Error::shape(
                [seq_length, features],
                format!("{} values", values.len()),
            ));
        }
        Ok(Window {
            seq_length,
            features,
            values,
            normalizer_id,
        })
    }

    /// A `(1, seq_length, features)` tensor holding this window
    pub fn to_tensor(&self) -> Tensor {
        let values: Vec<GpuFloat> = self.values.iter().map(|&v| v as GpuFloat).collect();
        Tensor::from_slice(&values).view([1, self.seq_length as i64, self.features as i64])
    }
}

/// A random partition of window indices
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Split {
    /// Windows used to fit the parameters
    pub train: Vec<usize>,
    /// Windows used to measure generalization
    pub validation: Vec<usize>,
}

/// Every `(window, next-day target)` pair of a standardized series
#[derive(Debug, Clone)]
pub struct SequenceDataset {
    data: NormalizedSeries,
    seq_length: usize,
    target: usize,
}

impl SequenceDataset {
    /// Window a standardized series, forecasting its first column
    pub fn new(data: NormalizedSeries, seq_length: usize) -> Result<SequenceDataset> {
        SequenceDataset::with_target(data, seq_length, 0)
    }

    /// Window a standardized series, forecasting the given column
    ///
    /// Requires at least `seq_length + 1` rows, so that at least one window has a target.
    pub fn with_target(
        data: NormalizedSeries,
        seq_length: usize,
        target: usize,
    ) -> Result<SequenceDataset> {
        if seq_length == 0 {
            return Err(Error::Configuration("sequence length must be positive".into()));
        }
        if target >= data.features {
            return Err(Error::Configuration(format!(
                "target column {} out of range for {} features",
                target, data.features
            )));
        }
        if data.rows < seq_length + 1 {
            return Err(Error::Configuration(format!(
                "need at least {} days of data for windows of {}, got {}",
                seq_length + 1,
                seq_length,
                data.rows
            )));
        }
        Ok(SequenceDataset {
            data,
            seq_length,
            target,
        })
    }

    /// The number of windows with a target
    pub fn len(&self) -> usize {
        self.data.rows - self.seq_length
    }

    /// Always `false`: construction guarantees at least one window
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The window length
    pub fn seq_length(&self) -> usize {
        self.seq_length
    }

    /// The number of features per row
    pub fn features(&self) -> usize {
        self.data.features
    }

    /// The standardized series being windowed
    pub fn data(&self) -> &NormalizedSeries {
        &self.data
    }

    fn window_at(&self, start: usize) -> Window {
        Window {
            seq_length: self.seq_length,
            features: self.data.features,
            values: self.data.rows(start, self.seq_length).to_vec(),
            normalizer_id: self.data.normalizer_id,
        }
    }

    /// The target following window `i`
    pub fn target(&self, i: usize) -> Option<CpuFloat> {
        if i >= self.len() {
            return None;
        }
        Some(self.data.row(i + self.seq_length)[self.target])
    }

    /// Window `i` (rows `i..i + seq_length`) and the target column of row `i + seq_length`
    pub fn get(&self, i: usize) -> Option<(Window, CpuFloat)> {
        let target = self.target(i)?;
        Some((self.window_at(i), target))
    }

    /// The most recent `seq_length` rows, whose target is the unseen next day
    pub fn last_window(&self) -> Window {
        self.window_at(self.data.rows - self.seq_length)
    }

    /// Shuffle window indices and split off a training share
    ///
    /// Fails before any training happens if either side of the split would be empty.
    pub fn split<R: Rng>(&self, train_ratio: f64, rng: &mut R) -> Result<Split> {
        let total = self.len();
        let train_len = (train_ratio * total as f64).floor() as usize;
        if train_len == 0 || train_len >= total {
            return Err(Error::Configuration(format!(
                "a {:.0}% split of {} windows leaves an empty training or validation set",
                train_ratio * 100.0,
                total
            )));
        }
        let mut indices: Vec<usize> = (0..total).collect();
        indices.shuffle(rng);
        let validation = indices.split_off(train_len);
        Ok(Split {
            train: indices,
            validation,
        })
    }

    /// Package a batch of windows and targets into `(B, seq_length, features)` and `(B, 1)` tensors
    pub fn batch(&self, indices: &[usize]) -> Result<(Tensor, Tensor)> {
        let features = self.data.features;
        let mut input = Vec::<GpuFloat>::with_capacity(indices.len() * self.seq_length * features);
        let mut output = Vec::<GpuFloat>::with_capacity(indices.len());
        for &i in indices {
            let target = self
                .target(i)
                .ok_or_else(|| Error::shape(format!("window index < {}", self.len()), i))?;
            input.extend(
                self.data
                    .rows(i, self.seq_length)
                    .iter()
                    .map(|&v| v as GpuFloat),
            );
            output.push(target as GpuFloat);
        }
        let batch_size = indices.len() as i64;
        let input =
            Tensor::from_slice(&input).view([batch_size, self.seq_length as i64, features as i64]);
        let output = Tensor::from_slice(&output).view([batch_size, 1]);
        Ok((input, output))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn series(rows: usize) -> NormalizedSeries {
        NormalizedSeries {
            rows,
            features: 2,
            values: (0..rows * 2).map(|v| v as f64).collect(),
            normalizer_id: 7,
        }
    }

    #[test]
    fn windows_and_targets() {
        let dataset = SequenceDataset::new(series(60), 10).unwrap();
        assert_eq!(dataset.len(), 50);
        for i in 0..dataset.len() {
            let (window, target) = dataset.get(i).unwrap();
            assert_eq!(window.values.len(), 20);
            assert_eq!(window.values[0], (i * 2) as f64);
            assert_eq!(target, dataset.data().row(i + 10)[0]);
            assert_eq!(window.normalizer_id, 7);
        }
        assert!(dataset.get(50).is_none());
        let last = dataset.last_window();
        assert_eq!(last.values[0], 100.0);
        assert_eq!(last.values[19], 119.0);
    }

    #[test]
    fn too_short() {
        assert!(matches!(
            SequenceDataset::new(series(10), 10),
            Err(Error::Configuration(_))
        ));
        assert_eq!(SequenceDataset::new(series(11), 10).unwrap().len(), 1);
        assert!(SequenceDataset::new(series(11), 0).is_err());
    }

    #[test]
    fn split_is_a_partition() {
        let dataset = SequenceDataset::new(series(60), 10).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        let split = dataset.split(0.8, &mut rng).unwrap();
        assert_eq!(split.train.len(), 40);
        assert_eq!(split.validation.len(), 10);
        let mut all: Vec<usize> = split.train.iter().chain(&split.validation).copied().collect();
        all.sort_unstable();
        assert_eq!(all, (0..50).collect::<Vec<_>>());
        let again = dataset.split(0.8, &mut StdRng::seed_from_u64(3)).unwrap();
        assert_eq!(split, again);
    }

    #[test]
    fn split_rejects_empty_sides() {
        let dataset = SequenceDataset::new(series(11), 10).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert!(matches!(
            dataset.split(0.8, &mut rng),
            Err(Error::Configuration(_))
        ));
    }

    #[test]
    fn batches() {
        let dataset = SequenceDataset::new(series(20), 5).unwrap();
        let (xs, ys) = dataset.batch(&[0, 3, 14]).unwrap();
        assert_eq!(xs.size(), vec![3, 5, 2]);
        assert_eq!(ys.size(), vec![3, 1]);
        assert_eq!(ys.double_value(&[1, 0]), 16.0);
        assert_eq!(xs.double_value(&[2, 4, 1]), 37.0);
        assert!(dataset.batch(&[15]).is_err());
    }

    #[test]
    fn window_shape_is_checked() {
        assert!(Window::new(vec![0.0; 19], 10, 2, 0).is_err());
        let window = Window::new(vec![0.5; 20], 10, 2, 0).unwrap();
        assert_eq!(window.to_tensor().size(), vec![1, 10, 2]);
    }
}
