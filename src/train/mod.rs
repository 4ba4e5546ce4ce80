/*!
Fitting a predictor to a windowed series
*/
use crate::data::window::{SequenceDataset, Split};
use crate::lstm::{Mode, Predictor, Snapshot};
use crate::{CpuFloat, Error, Result};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tch::nn::{self, OptimizerConfig};

/// Learning-rate decay on a validation plateau
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plateau {
    /// Epochs without improvement before decaying
    pub patience: usize,
    /// Multiplier applied to the learning rate on decay
    pub factor: f64,
}

/// Training hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainConfig {
    /// The number of passes over the training windows
    pub epochs: usize,
    /// Windows per optimizer step
    pub batch_size: usize,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    /// Share of windows used for training, the rest being held out for validation
    pub train_ratio: f64,
    /// Stop after this many epochs without validation improvement
    pub patience: Option<usize>,
    /// Decay the learning rate when validation loss plateaus
    pub lr_decay: Option<Plateau>,
    /// Clamp gradients to `[-clip, clip]` before each step
    pub clip: Option<f64>,
    /// Seed for the split, shuffling and dropout masks
    pub seed: u64,
}

impl Default for TrainConfig {
    fn default() -> TrainConfig {
        TrainConfig {
            epochs: 30,
            batch_size: 32,
            learning_rate: 1e-3,
            train_ratio: 0.8,
            patience: None,
            lr_decay: None,
            clip: None,
            seed: 42,
        }
    }
}

impl TrainConfig {
    /// Check that these settings can drive a training run
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::Configuration(msg));
        if self.epochs == 0 {
            return fail("at least one epoch is required".into());
        }
        if self.batch_size == 0 {
            return fail("batch size must be positive".into());
        }
        if !(self.learning_rate > 0.0 && self.learning_rate.is_finite()) {
            return fail(format!("invalid learning rate {}", self.learning_rate));
        }
        if !(self.train_ratio > 0.0 && self.train_ratio < 1.0) {
            return fail(format!("train ratio must lie in (0, 1), got {}", self.train_ratio));
        }
        if self.patience == Some(0) {
            return fail("early stopping patience must be positive".into());
        }
        if let Some(plateau) = self.lr_decay {
            if plateau.patience == 0 || !(plateau.factor > 0.0 && plateau.factor < 1.0) {
                return fail(format!("invalid plateau decay {:?}", plateau));
            }
        }
        if let Some(clip) = self.clip {
            if !(clip > 0.0) {
                return fail(format!("invalid gradient clip {}", clip));
            }
        }
        Ok(())
    }
}

/// The losses of one epoch
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochLoss {
    /// 1-based epoch number
    pub epoch: usize,
    /// Mean training loss, weighted by batch size
    pub train_loss: f64,
    /// Mean validation loss, weighted by batch size
    pub val_loss: f64,
    /// Learning rate in effect during the epoch
    pub learning_rate: f64,
}

/// Per-epoch losses in order
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LossHistory(pub Vec<EpochLoss>);

impl LossHistory {
    /// Number of recorded epochs
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether nothing was recorded
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The recorded epochs
    pub fn iter(&self) -> std::slice::Iter<'_, EpochLoss> {
        self.0.iter()
    }

    /// The most recent epoch
    pub fn last(&self) -> Option<&EpochLoss> {
        self.0.last()
    }

    /// The epoch with the lowest validation loss, the earliest on ties
    pub fn best(&self) -> Option<&EpochLoss> {
        self.0.iter().fold(None, |best: Option<&EpochLoss>, epoch| match best {
            Some(best) if best.val_loss <= epoch.val_loss => Some(best),
            _ => Some(epoch),
        })
    }
}

/// The result of a training run
#[derive(Debug)]
pub struct TrainOutcome {
    /// Per-epoch losses
    pub history: LossHistory,
    /// The epoch whose parameters scored the lowest validation loss
    pub best_epoch: usize,
    /// That epoch's validation loss
    pub best_val_loss: f64,
    /// Whether training stopped before the configured epoch count
    pub stopped_early: bool,
    /// The windows held out for validation
    pub validation: Vec<usize>,
    /// The parameters of the best epoch
    pub best: Snapshot,
}

impl TrainOutcome {
    /// Replace the predictor's final parameters with the best-validation ones
    pub fn restore_best(&self, predictor: &mut Predictor) -> Result<()> {
        predictor.restore(&self.best)
    }
}

/// Bookkeeping for early stopping and plateau decay
#[derive(Debug, Clone, PartialEq)]
struct Tracker {
    best_epoch: usize,
    best_val_loss: f64,
    since_best: usize,
    since_decay: usize,
}

impl Tracker {
    fn new() -> Tracker {
        Tracker {
            best_epoch: 0,
            best_val_loss: f64::INFINITY,
            since_best: 0,
            since_decay: 0,
        }
    }

    /// Record a validation loss, returning whether it improved on the best so far
    fn observe(&mut self, epoch: usize, val_loss: f64) -> bool {
        if val_loss < self.best_val_loss {
            self.best_epoch = epoch;
            self.best_val_loss = val_loss;
            self.since_best = 0;
            self.since_decay = 0;
            true
        } else {
            self.since_best += 1;
            self.since_decay += 1;
            false
        }
    }

    fn should_stop(&self, patience: Option<usize>) -> bool {
        patience.map_or(false, |patience| self.since_best >= patience)
    }

    fn should_decay(&mut self, plateau: Option<Plateau>) -> bool {
        match plateau {
            Some(plateau) if self.since_decay >= plateau.patience => {
                self.since_decay = 0;
                true
            }
            _ => false,
        }
    }
}

fn check_dataset(predictor: &Predictor, dataset: &SequenceDataset) -> Result<()> {
    let desc = predictor.desc();
    if dataset.features() != desc.features || dataset.seq_length() != desc.seq_length {
        return Err(Error::shape(
            [desc.seq_length, desc.features],
            [dataset.seq_length(), dataset.features()],
        ));
    }
    Ok(())
}

/// Mean loss over some windows in evaluation mode, without gradients
pub fn evaluate(
    predictor: &Predictor,
    dataset: &SequenceDataset,
    indices: &[usize],
    batch_size: usize,
) -> Result<f64> {
    tch::no_grad(|| -> Result<f64> {
        let mut sum = 0.0;
        for chunk in indices.chunks(batch_size.max(1)) {
            let (xs, ys) = dataset.batch(chunk)?;
            let device = predictor.device();
            let loss = predictor
                .net()
                .loss(&xs.to_device(device), &ys.to_device(device), Mode::Eval)?;
            sum += loss.double_value(&[]) * chunk.len() as f64;
        }
        Ok(sum / indices.len().max(1) as f64)
    })
}

/// Train a predictor in place
///
/// Windows are split once with `config.seed`; each epoch shuffles the training windows, takes one Adam
/// step per batch, then scores the validation windows. `on_epoch` sees every epoch's losses as soon
/// as they are known. A NaN or infinite loss aborts the run.
pub fn train<F>(
    predictor: &mut Predictor,
    dataset: &SequenceDataset,
    config: &TrainConfig,
    mut on_epoch: F,
) -> Result<TrainOutcome>
where
    F: FnMut(&EpochLoss),
{
    config.validate()?;
    check_dataset(predictor, dataset)?;
    let mut rng = StdRng::seed_from_u64(config.seed);
    let Split {
        train: mut train_windows,
        validation,
    } = dataset.split(config.train_ratio, &mut rng)?;
    tch::manual_seed(config.seed as i64);

    let device = predictor.device();
    let mut opt = nn::Adam::default().build(predictor.var_store(), config.learning_rate)?;
    let mut learning_rate = config.learning_rate;
    let mut history = LossHistory::default();
    let mut tracker = Tracker::new();
    let mut best = predictor.snapshot()?;
    let mut stopped_early = false;

    tracing::info!(
        train = train_windows.len(),
        validation = validation.len(),
        epochs = config.epochs,
        batch_size = config.batch_size,
        "starting training"
    );

    for epoch in 1..=config.epochs {
        train_windows.shuffle(&mut rng);
        let mut sum_loss = 0.0;
        for (batch, chunk) in train_windows.chunks(config.batch_size).enumerate() {
            let (xs, ys) = dataset.batch(chunk)?;
            let loss = predictor
                .net()
                .loss(&xs.to_device(device), &ys.to_device(device), Mode::Train)?;
            let value = loss.double_value(&[]);
            if !value.is_finite() {
                return Err(Error::NonFiniteLoss {
                    epoch,
                    phase: "training",
                    loss: value,
                });
            }
            match config.clip {
                Some(clip) => opt.backward_step_clip(&loss, clip),
                None => opt.backward_step(&loss),
            }
            sum_loss += value * chunk.len() as f64;
            tracing::debug!(epoch, batch, loss = value, "batch");
        }
        let train_loss = sum_loss / train_windows.len() as f64;

        let val_loss = evaluate(predictor, dataset, &validation, config.batch_size)?;
        if !val_loss.is_finite() {
            return Err(Error::NonFiniteLoss {
                epoch,
                phase: "validation",
                loss: val_loss,
            });
        }

        let record = EpochLoss {
            epoch,
            train_loss,
            val_loss,
            learning_rate,
        };
        tracing::info!(epoch, train_loss, val_loss, learning_rate, "epoch finished");
        on_epoch(&record);
        history.0.push(record);

        if tracker.observe(epoch, val_loss) {
            best = predictor.snapshot()?;
        }
        if tracker.should_stop(config.patience) {
            tracing::info!(epoch, best_epoch = tracker.best_epoch, "stopping early");
            stopped_early = epoch < config.epochs;
            break;
        }
        if tracker.should_decay(config.lr_decay) {
            if let Some(plateau) = config.lr_decay {
                learning_rate *= plateau.factor;
                opt.set_lr(learning_rate);
                tracing::warn!(
                    epoch,
                    learning_rate,
                    "validation loss plateaued, decaying learning rate"
                );
            }
        }
    }

    predictor.mark_trained();
    Ok(TrainOutcome {
        history,
        best_epoch: tracker.best_epoch,
        best_val_loss: tracker.best_val_loss,
        stopped_early,
        validation,
        best,
    })
}

/// Evaluation-mode predictions and their targets for some windows, in standardized units
pub fn predictions_and_targets(
    predictor: &Predictor,
    dataset: &SequenceDataset,
    indices: &[usize],
) -> Result<(Vec<CpuFloat>, Vec<CpuFloat>)> {
    if indices.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }
    let (xs, ys) = dataset.batch(indices)?;
    let yhat = tch::no_grad(|| predictor.forward(&xs, Mode::Eval))?;
    let predictions = (0..indices.len() as i64)
        .map(|i| yhat.double_value(&[i, 0]))
        .collect();
    let targets = (0..indices.len() as i64)
        .map(|i| ys.double_value(&[i, 0]))
        .collect();
    Ok((predictions, targets))
}
