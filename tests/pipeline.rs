/*!
End-to-end tests of the forecasting pipeline
*/
use airburn::checkpoint;
use airburn::data::{
    cities, scale::Normalizer, window::SequenceDataset, DataSource, Observation, Record,
    SourceKind, TimeSeries,
};
use airburn::forecast::Forecaster;
use airburn::lstm::Predictor;
use airburn::predict::predict_next;
use airburn::{Config, Error};
use chrono::{Duration, NaiveDate};
use tch::Device;
use tempfile::tempdir;

fn config(dir: &std::path::Path) -> Config {
    Config {
        hidden: 16,
        epochs: 5,
        checkpoint: dir.join("air_quality_predictor.ot"),
        ..Config::default()
    }
}

fn end() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 6, 30).unwrap()
}

#[test]
fn mexico_city_trains_and_checkpoints() {
    let dir = tempdir().unwrap();
    let config = config(dir.path());
    let path = config.checkpoint.clone();
    let mut forecaster = Forecaster::new(config).unwrap();
    let city = cities::lookup("Ciudad de México").unwrap();
    assert_eq!(city.profile.pm25_base, 35.0);
    let series = forecaster.series_at(&DataSource::Synthetic(city), end());
    assert_eq!(series.len(), 60);

    let mut epochs = Vec::new();
    let report = forecaster
        .train_on(&series, |epoch| epochs.push(*epoch))
        .unwrap();
    assert_eq!(epochs.len(), 5);
    for (i, epoch) in epochs.iter().enumerate() {
        assert_eq!(epoch.epoch, i + 1);
        assert!(epoch.train_loss.is_finite(), "epoch {:?}", epoch);
        assert!(epoch.val_loss.is_finite(), "epoch {:?}", epoch);
    }
    assert_eq!(report.history.len(), 5);
    assert_eq!(report.metrics.samples, 10);
    assert!(path.is_file());
    assert!(checkpoint::exists(&path));

    let forecast = forecaster.forecast_series(&series).unwrap();
    assert_eq!(forecast.forecast.prediction_date, end() + Duration::days(1));
    assert!(forecast.forecast.predicted_value.is_finite());
}

#[test]
fn anchored_series_forecast() {
    let dir = tempdir().unwrap();
    let mut forecaster = Forecaster::new(Config {
        epochs: 2,
        ..config(dir.path())
    })
    .unwrap();
    let body = r#"{"status": "success", "data": {"current": {
        "pollution": {"aqius": 120, "mainus": "p2"},
        "weather": {"tp": 27, "hu": 35}
    }}}"#;
    let source = DataSource::resolve(
        cities::lookup("Aksu").unwrap(),
        Observation::from_airvisual_json(body),
    );
    assert_eq!(source.kind(), SourceKind::Observed);
    let forecast = forecaster.forecast(&source).unwrap();
    assert_eq!(forecast.source, SourceKind::Observed);
    assert_eq!(forecast.city, "Aksu");
}

#[test]
fn identical_rows_give_a_finite_prediction() {
    let dir = tempdir().unwrap();
    let mut forecaster = Forecaster::new(Config {
        epochs: 2,
        ..config(dir.path())
    })
    .unwrap();
    let source = DataSource::Synthetic(cities::lookup("Madrid").unwrap());
    forecaster.train(&source, |_| {}).unwrap();

    let model = forecaster.model().unwrap();
    let flat = TimeSeries {
        city: "Flatland".into(),
        source: SourceKind::Synthetic,
        records: (0..30)
            .map(|d| Record::new(end() - Duration::days(29 - d), 20.0, 30.0))
            .collect(),
    };
    let (normalizer, normalized) = Normalizer::fit_transform(&flat).unwrap();
    assert!(normalizer.columns.iter().all(|c| c.is_degenerate()));
    assert!(normalized.values.iter().all(|&v| v == 0.0));
    let dataset = SequenceDataset::new(normalized, 10).unwrap();
    let predicted = predict_next(&model.predictor, &dataset.last_window(), &normalizer).unwrap();
    assert!(predicted.is_finite());

    let forecast = forecaster.forecast_series(&flat).unwrap();
    assert!(forecast.forecast.predicted_value.is_finite());
}

#[test]
fn untrained_and_mismatched_inputs_are_rejected() {
    let config = Config::default();
    let predictor = Predictor::new(config.model_desc(), Device::Cpu).unwrap();
    let series = config
        .synthesizer()
        .generate(&DataSource::Synthetic(cities::default_city()), end());
    let (normalizer, normalized) = Normalizer::fit_transform(&series).unwrap();
    let dataset = SequenceDataset::new(normalized, 10).unwrap();
    assert!(matches!(
        predict_next(&predictor, &dataset.last_window(), &normalizer),
        Err(Error::NotReady)
    ));

    let short = SequenceDataset::new(Normalizer::fit_transform(&series).unwrap().1, 5).unwrap();
    let mut trained = Predictor::new(config.model_desc(), Device::Cpu).unwrap();
    trained.mark_trained();
    assert!(matches!(
        predict_next(&trained, &short.last_window(), &normalizer),
        Err(Error::ShapeMismatch { .. })
    ));
}
