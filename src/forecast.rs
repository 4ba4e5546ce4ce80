/*!
The forecasting pipeline: one object owning the configuration, the trained model and its normalizer

A [`Forecaster`] is the only place where a predictor and the normalizer of its training data meet,
so every prediction is inverse-transformed with the parameters the model was trained against. It is
not internally synchronized; callers serving concurrent requests must serialize access to it.
*/
use crate::aqi::{pm25_to_aqi, QualityTier};
use crate::checkpoint::{self, ModelMeta};
use crate::config::Config;
use crate::data::scale::Normalizer;
use crate::data::synth::Synthesizer;
use crate::data::window::SequenceDataset;
use crate::data::{DataSource, Record, SourceKind, TimeSeries};
use crate::lstm::Predictor;
use crate::metrics::Metrics;
use crate::predict::{predict_next, Forecast};
use crate::train::{self, EpochLoss, LossHistory};
use crate::util::round1;
use crate::{Error, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A trained predictor together with the normalizer of its training data
#[derive(Debug)]
pub struct TrainedModel {
    /// The trained parameters
    pub predictor: Predictor,
    /// The standardization the parameters were trained against
    pub normalizer: Normalizer,
    /// How the model was trained
    pub meta: ModelMeta,
}

/// A summary of a training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    /// The city trained on
    pub city: String,
    /// Days in the training series
    pub days: usize,
    /// Per-epoch losses
    pub history: LossHistory,
    /// The epoch whose parameters were kept
    pub best_epoch: usize,
    /// Its validation loss
    pub best_val_loss: f64,
    /// Whether early stopping ended the run
    pub stopped_early: bool,
    /// Validation metrics in μg/m³
    pub metrics: Metrics,
    /// Where the model was written
    pub checkpoint: PathBuf,
}

/// A next-day forecast for a city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityForecast {
    /// The city
    pub city: String,
    /// How the input series was obtained
    pub source: SourceKind,
    /// The AQI implied by the latest PM2.5 value
    pub current_aqi: f64,
    /// The quality tier of the latest PM2.5 value
    pub current_quality: QualityTier,
    /// The quality tier of the forecast PM2.5 value
    pub predicted_quality: QualityTier,
    /// The forecast itself
    pub forecast: Forecast,
}

/// What the serving layer reports about the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    /// The kind of model
    pub model_type: String,
    /// Whether a trained model is ready
    pub is_loaded: bool,
    /// Input features, in column order
    pub features: Vec<String>,
    /// Days per input window
    pub sequence_length: usize,
    /// LSTM hidden size
    pub hidden: usize,
    /// Stacked LSTM layers
    pub layers: usize,
    /// When the model finished training
    pub last_trained: Option<DateTime<Utc>>,
    /// The city the model was trained on
    pub trained_on: Option<String>,
    /// Validation metrics of the model
    pub metrics: Option<Metrics>,
    /// The device computations run on
    pub device: String,
}

/// The forecasting pipeline
#[derive(Debug)]
pub struct Forecaster {
    config: Config,
    synthesizer: Synthesizer,
    model: Option<TrainedModel>,
    rng: StdRng,
}

impl Forecaster {
    /// A forecaster without a trained model
    pub fn new(config: Config) -> Result<Forecaster> {
        config.validate()?;
        Ok(Forecaster {
            synthesizer: config.synthesizer(),
            rng: StdRng::seed_from_u64(config.seed),
            model: None,
            config,
        })
    }

    /// A forecaster resuming from the configured checkpoint when one exists
    ///
    /// A checkpoint which cannot be loaded, or whose architecture differs from the configured one, is
    /// ignored: the next forecast trains a fresh model.
    pub fn open(config: Config) -> Result<Forecaster> {
        let mut forecaster = Forecaster::new(config)?;
        let path = &forecaster.config.checkpoint;
        if !checkpoint::exists(path) {
            tracing::info!(
                path = %path.display(),
                "no checkpoint, a model will be trained on demand"
            );
            return Ok(forecaster);
        }
        match checkpoint::load(path, forecaster.config.device.device()) {
            Ok(loaded) if *loaded.predictor.desc() == forecaster.config.model_desc() => {
                forecaster.model = Some(TrainedModel {
                    predictor: loaded.predictor,
                    normalizer: loaded.normalizer,
                    meta: loaded.meta,
                });
            }
            Ok(loaded) => tracing::warn!(
                path = %path.display(),
                saved = ?loaded.predictor.desc(),
                "checkpoint architecture differs from the configuration, ignoring it"
            ),
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "could not load checkpoint")
            }
        }
        Ok(forecaster)
    }

    /// The configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The trained model, if any
    pub fn model(&self) -> Option<&TrainedModel> {
        self.model.as_ref()
    }

    /// Whether a trained model is ready
    pub fn is_ready(&self) -> bool {
        self.model.is_some()
    }

    /// The series for a data source, ending today
    pub fn series(&self, source: &DataSource) -> TimeSeries {
        self.synthesizer.generate_today(source)
    }

    /// The series for a data source, ending at a given day
    pub fn series_at(&self, source: &DataSource, end: NaiveDate) -> TimeSeries {
        self.synthesizer.generate(source, end)
    }

    /// Train a fresh model on a data source's series
    pub fn train<F>(&mut self, source: &DataSource, on_epoch: F) -> Result<TrainingReport>
    where
        F: FnMut(&EpochLoss),
    {
        let series = self.series(source);
        self.train_on(&series, on_epoch)
    }

    /// Train a fresh model on a series, keeping its best-validation parameters
    ///
    /// The new model and checkpoint replace the previous ones only once everything succeeded; on any
    /// failure both stay as they were.
    pub fn train_on<F>(&mut self, series: &TimeSeries, on_epoch: F) -> Result<TrainingReport>
    where
        F: FnMut(&EpochLoss),
    {
        series.check()?;
        let (normalizer, normalized) = Normalizer::fit_transform(series)?;
        let dataset = SequenceDataset::new(normalized, self.config.seq_length)?;
        let mut predictor = Predictor::seeded(
            self.config.model_desc(),
            self.config.device.device(),
            self.config.seed as i64,
        )?;
        let outcome =
            train::train(&mut predictor, &dataset, &self.config.train_config(), on_epoch)?;
        outcome.restore_best(&mut predictor)?;

        let (predictions, targets) =
            train::predictions_and_targets(&predictor, &dataset, &outcome.validation)?;
        let predictions = predictions
            .into_iter()
            .map(|v| normalizer.inverse_target(v))
            .collect::<Result<Vec<_>>>()?;
        let targets = targets
            .into_iter()
            .map(|v| normalizer.inverse_target(v))
            .collect::<Result<Vec<_>>>()?;
        let metrics = Metrics::compute(&predictions, &targets)?;
        tracing::info!(
            city = %series.city,
            best_epoch = outcome.best_epoch,
            mae = metrics.mae,
            rmse = metrics.rmse,
            r2 = metrics.r2,
            score = metrics.overall(),
            "training finished"
        );

        let meta = ModelMeta {
            city: series.city.clone(),
            trained_at: Utc::now(),
            history: outcome.history.clone(),
            best_epoch: outcome.best_epoch,
            metrics: Some(metrics),
        };
        checkpoint::save(&self.config.checkpoint, &predictor, &normalizer, &meta)?;
        self.model = Some(TrainedModel {
            predictor,
            normalizer,
            meta,
        });
        Ok(TrainingReport {
            city: series.city.clone(),
            days: series.len(),
            history: outcome.history,
            best_epoch: outcome.best_epoch,
            best_val_loss: outcome.best_val_loss,
            stopped_early: outcome.stopped_early,
            metrics,
            checkpoint: self.config.checkpoint.clone(),
        })
    }

    /// Forecast tomorrow's PM2.5 for a data source, training a model first if none is ready
    pub fn forecast(&mut self, source: &DataSource) -> Result<CityForecast> {
        let series = self.series(source);
        self.forecast_series(&series)
    }

    /// Forecast the day after a series ends, training a model on it first if none is ready
    ///
    /// The series is standardized with the model's stored normalizer, never refit.
    pub fn forecast_series(&mut self, series: &TimeSeries) -> Result<CityForecast> {
        if self.model.is_none() {
            tracing::info!(city = %series.city, "no trained model, training on demand");
            self.train_on(series, |_| {})?;
        }
        let model = self.model.as_ref().ok_or(Error::NotReady)?;
        let normalized = model.normalizer.transform(series)?;
        let dataset = SequenceDataset::new(normalized, model.predictor.desc().seq_length)?;
        let predicted = predict_next(&model.predictor, &dataset.last_window(), &model.normalizer)?;
        let last = series
            .last()
            .ok_or_else(|| Error::Configuration(format!("{}: empty series", series.city)))?;
        let forecast = Forecast::new(
            last.pm25,
            predicted,
            last.date + Duration::days(1),
            &mut self.rng,
        );
        tracing::info!(
            city = %series.city,
            current = forecast.current_value,
            predicted = forecast.predicted_value,
            date = %forecast.prediction_date,
            "forecast"
        );
        Ok(CityForecast {
            city: series.city.clone(),
            source: series.source,
            current_aqi: round1(pm25_to_aqi(last.pm25)),
            current_quality: QualityTier::classify_pm25(last.pm25),
            predicted_quality: QualityTier::classify_pm25(predicted),
            forecast,
        })
    }

    /// A description of the model for the serving layer
    pub fn info(&self) -> ModelInfo {
        let desc = self.config.model_desc();
        let meta = self.model.as_ref().map(|model| &model.meta);
        ModelInfo {
            model_type: "LSTM".into(),
            is_loaded: self.model.is_some(),
            features: Record::FEATURES.iter().map(|f| f.to_string()).collect(),
            sequence_length: desc.seq_length,
            hidden: desc.hidden,
            layers: desc.layers,
            last_trained: meta.map(|meta| meta.trained_at),
            trained_on: meta.map(|meta| meta.city.clone()),
            metrics: meta.and_then(|meta| meta.metrics),
            device: format!("{:?}", self.config.device.device()),
        }
    }
}
