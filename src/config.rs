/*!
Runtime configuration

Every tunable of the pipeline lives here with its default. [`Config::from_env`] overrides the
defaults from `AIRBURN_*` environment variables (loading a `.env` file first is left to the caller),
so `env::var` calls are not scattered through the crate.
*/
use crate::data::synth::Synthesizer;
use crate::data::Record;
use crate::lstm::AirLSTMDesc;
use crate::train::{Plateau, TrainConfig};
use crate::{Error, Result};
use std::env;
use std::path::PathBuf;
use tch::Device;

/// Parse an optional environment variable, falling back to a default when unset
macro_rules! parse_var {
    ($lookup:expr, $var_name:expr, $ty:ty, $default:expr) => {
        parse_opt_var!($lookup, $var_name, $ty).unwrap_or($default)
    };
}

/// Parse an optional environment variable into an `Option`
macro_rules! parse_opt_var {
    ($lookup:expr, $var_name:expr, $ty:ty) => {
        $lookup($var_name)
            .map(|v: String| v.trim().parse::<$ty>())
            .transpose()
            .map_err(|e| Error::Configuration(format!("invalid {}: {}", $var_name, e)))?
    };
}

/// Which device to train and predict on
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub enum DeviceChoice {
    /// Always the CPU
    Cpu,
    /// The first CUDA device
    Cuda,
    /// CUDA when available, otherwise the CPU
    Auto,
}

impl DeviceChoice {
    /// Parse `cpu`, `cuda` or `auto`
    pub fn parse(name: &str) -> Result<DeviceChoice> {
        match name.trim().to_lowercase().as_str() {
            "cpu" => Ok(DeviceChoice::Cpu),
            "cuda" | "gpu" => Ok(DeviceChoice::Cuda),
            "auto" => Ok(DeviceChoice::Auto),
            other => Err(Error::Configuration(format!("unknown device {:?}", other))),
        }
    }

    /// Resolve to a libtorch device
    pub fn device(self) -> Device {
        match self {
            DeviceChoice::Cpu => Device::Cpu,
            DeviceChoice::Cuda => Device::Cuda(0),
            DeviceChoice::Auto => Device::cuda_if_available(),
        }
    }
}

/// Strongly typed pipeline configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// Days per input window
    pub seq_length: usize,
    /// Days generated beyond one window
    pub surplus_days: usize,
    /// LSTM hidden size
    pub hidden: usize,
    /// Stacked LSTM layers
    pub layers: usize,
    /// Dropout between LSTM layers during training
    pub dropout: f64,
    /// Initial Adam learning rate
    pub learning_rate: f64,
    /// Training epochs
    pub epochs: usize,
    /// Windows per batch
    pub batch_size: usize,
    /// Share of windows used for training
    pub train_ratio: f64,
    /// Early stopping patience; `None` disables early stopping
    pub patience: Option<usize>,
    /// Learning-rate decay on plateau; `None` disables it
    pub lr_decay: Option<Plateau>,
    /// Gradient clamp; `None` disables clipping
    pub clip: Option<f64>,
    /// Seed for weight initialization, the split and shuffling
    pub seed: u64,
    /// Where the trained model is kept
    pub checkpoint: PathBuf,
    /// Which device to use
    pub device: DeviceChoice,
}

impl Default for Config {
    fn default() -> Config {
        let train = TrainConfig::default();
        Config {
            seq_length: 10,
            surplus_days: Synthesizer::MIN_SURPLUS,
            hidden: 64,
            layers: 2,
            dropout: 0.2,
            learning_rate: train.learning_rate,
            epochs: train.epochs,
            batch_size: train.batch_size,
            train_ratio: train.train_ratio,
            patience: train.patience,
            lr_decay: train.lr_decay,
            clip: train.clip,
            seed: train.seed,
            checkpoint: PathBuf::from("air_quality_predictor.ot"),
            device: DeviceChoice::Cpu,
        }
    }
}

impl Config {
    /// Load configuration from `AIRBURN_*` environment variables with defaults
    ///
    /// Optional:
    /// - `AIRBURN_SEQ_LENGTH` (default 10), `AIRBURN_SURPLUS_DAYS` (50)
    /// - `AIRBURN_HIDDEN` (64), `AIRBURN_LAYERS` (2), `AIRBURN_DROPOUT` (0.2)
    /// - `AIRBURN_LEARNING_RATE` (0.001), `AIRBURN_EPOCHS` (30), `AIRBURN_BATCH_SIZE` (32)
    /// - `AIRBURN_TRAIN_RATIO` (0.8), `AIRBURN_SEED` (42)
    /// - `AIRBURN_PATIENCE`, `AIRBURN_CLIP` (unset: disabled)
    /// - `AIRBURN_LR_DECAY_PATIENCE` with `AIRBURN_LR_DECAY_FACTOR` (default 0.5)
    /// - `AIRBURN_CHECKPOINT` (`air_quality_predictor.ot`), `AIRBURN_DEVICE` (`cpu`, `cuda` or `auto`)
    ///
    /// Returns an error if any variable is set but invalid.
    pub fn from_env() -> Result<Config> {
        Config::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Config>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let lr_decay = match parse_opt_var!(lookup, "AIRBURN_LR_DECAY_PATIENCE", usize) {
            Some(patience) => Some(Plateau {
                patience,
                factor: parse_var!(lookup, "AIRBURN_LR_DECAY_FACTOR", f64, 0.5),
            }),
            None => defaults.lr_decay,
        };
        let device = match lookup("AIRBURN_DEVICE") {
            Some(name) => DeviceChoice::parse(&name)?,
            None => defaults.device,
        };
        let config = Config {
            seq_length: parse_var!(lookup, "AIRBURN_SEQ_LENGTH", usize, defaults.seq_length),
            surplus_days: parse_var!(lookup, "AIRBURN_SURPLUS_DAYS", usize, defaults.surplus_days),
            hidden: parse_var!(lookup, "AIRBURN_HIDDEN", usize, defaults.hidden),
            layers: parse_var!(lookup, "AIRBURN_LAYERS", usize, defaults.layers),
            dropout: parse_var!(lookup, "AIRBURN_DROPOUT", f64, defaults.dropout),
            learning_rate: parse_var!(lookup, "AIRBURN_LEARNING_RATE", f64, defaults.learning_rate),
            epochs: parse_var!(lookup, "AIRBURN_EPOCHS", usize, defaults.epochs),
            batch_size: parse_var!(lookup, "AIRBURN_BATCH_SIZE", usize, defaults.batch_size),
            train_ratio: parse_var!(lookup, "AIRBURN_TRAIN_RATIO", f64, defaults.train_ratio),
            patience: parse_opt_var!(lookup, "AIRBURN_PATIENCE", usize).or(defaults.patience),
            lr_decay,
            clip: parse_opt_var!(lookup, "AIRBURN_CLIP", f64).or(defaults.clip),
            seed: parse_var!(lookup, "AIRBURN_SEED", u64, defaults.seed),
            checkpoint: lookup("AIRBURN_CHECKPOINT")
                .map(PathBuf::from)
                .unwrap_or(defaults.checkpoint),
            device,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every setting
    pub fn validate(&self) -> Result<()> {
        if self.surplus_days < Synthesizer::MIN_SURPLUS {
            return Err(Error::Configuration(format!(
                "surplus must be at least {} days, got {}",
                Synthesizer::MIN_SURPLUS,
                self.surplus_days
            )));
        }
        self.model_desc().validate()?;
        self.train_config().validate()
    }

    /// The model architecture
    pub fn model_desc(&self) -> AirLSTMDesc {
        AirLSTMDesc {
            features: Record::NN_FIELDS,
            seq_length: self.seq_length,
            hidden: self.hidden,
            layers: self.layers,
            dropout: self.dropout,
        }
    }

    /// The training hyperparameters
    pub fn train_config(&self) -> TrainConfig {
        TrainConfig {
            epochs: self.epochs,
            batch_size: self.batch_size,
            learning_rate: self.learning_rate,
            train_ratio: self.train_ratio,
            patience: self.patience,
            lr_decay: self.lr_decay,
            clip: self.clip,
            seed: self.seed,
        }
    }

    /// The series generator
    pub fn synthesizer(&self) -> Synthesizer {
        Synthesizer::new(self.seq_length, self.surplus_days)
    }

    /// Log the loaded configuration
    pub fn log_config(&self) {
        tracing::info!("Configuration loaded:");
        tracing::info!("  SEQ_LENGTH    : {}", self.seq_length);
        tracing::info!("  SURPLUS_DAYS  : {}", self.surplus_days);
        tracing::info!("  HIDDEN        : {}", self.hidden);
        tracing::info!("  LAYERS        : {}", self.layers);
        tracing::info!("  DROPOUT       : {}", self.dropout);
        tracing::info!("  LEARNING_RATE : {}", self.learning_rate);
        tracing::info!("  EPOCHS        : {}", self.epochs);
        tracing::info!("  BATCH_SIZE    : {}", self.batch_size);
        tracing::info!("  TRAIN_RATIO   : {}", self.train_ratio);
        tracing::info!("  PATIENCE      : {:?}", self.patience);
        tracing::info!("  LR_DECAY      : {:?}", self.lr_decay);
        tracing::info!("  CLIP          : {:?}", self.clip);
        tracing::info!("  SEED          : {}", self.seed);
        tracing::info!("  CHECKPOINT    : {}", self.checkpoint.display());
        tracing::info!("  DEVICE        : {:?}", self.device);
    }
}
