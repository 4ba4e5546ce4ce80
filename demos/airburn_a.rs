/*!
Train the air quality LSTM on a city's series and forecast tomorrow's PM2.5
*/

use airburn::config::DeviceChoice;
use airburn::data::{archive::read_series, cities, DataSource, Observation};
use airburn::forecast::Forecaster;
use airburn::{Config, Error};
use anyhow::format_err;
use clap::{App, Arg};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs::{self, File};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

pub fn main() -> anyhow::Result<()> {
    let matches = App::new("Airburn Alpha")
        .version("1.0")
        .about("An LSTM which forecasts next-day PM2.5 concentrations for a city")
        .arg(
            Arg::with_name("CITY")
                .help("City key (1-7) or name. Defaults to Ciudad de México")
                .index(1),
        )
        .arg(
            Arg::with_name("observation")
                .short("o")
                .long("observation")
                .help("AirVisual JSON response to anchor the series on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("archive")
                .short("a")
                .long("archive")
                .help("Use an archived CSV series instead of generating one")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("train")
                .short("t")
                .long("train")
                .help("Retrain even if a checkpoint exists"),
        )
        .arg(
            Arg::with_name("info")
                .short("i")
                .long("info")
                .help("Print model information and exit"),
        )
        .arg(
            Arg::with_name("epochs")
                .short("e")
                .long("epochs")
                .help("Training epochs")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("checkpoint")
                .short("c")
                .long("checkpoint")
                .help("Checkpoint path")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("device")
                .short("d")
                .long("device")
                .help("Device to use: cuda, cpu, auto. Defaults to cpu")
                .takes_value(true),
        )
        .get_matches();

    dotenvy::dotenv().ok();
    init_tracing();

    let mut config = Config::from_env()?;
    if let Some(epochs) = matches.value_of("epochs") {
        config.epochs = usize::from_str_radix(epochs, 10)?;
    }
    if let Some(path) = matches.value_of("checkpoint") {
        config.checkpoint = PathBuf::from(path);
    }
    if let Some(device) = matches.value_of("device") {
        config.device = DeviceChoice::parse(device)?;
    }
    config.validate()?;
    config.log_config();

    let mut forecaster = Forecaster::open(config)?;
    if matches.is_present("info") {
        println!("{}", serde_json::to_string_pretty(&forecaster.info())?);
        return Ok(());
    }

    let city = match matches.value_of("CITY") {
        Some(query) => cities::lookup(query).ok_or_else(|| Error::UnknownCity(query.to_string()))?,
        None => cities::default_city(),
    };
    let series = match matches.value_of("archive") {
        Some(path) => read_series(File::open(path)?, &city.name)?,
        None => {
            let source = match matches.value_of("observation") {
                Some(path) => {
                    let fetched = fs::read_to_string(path)
                        .map_err(Error::from)
                        .and_then(|body| Observation::from_airvisual_json(&body));
                    DataSource::resolve(city, fetched)
                }
                None => DataSource::Synthetic(city),
            };
            forecaster.series(&source)
        }
    };

    if matches.is_present("train") || !forecaster.is_ready() {
        let epochs = forecaster.config().epochs as u64;
        let progress = ProgressBar::new(epochs);
        progress.set_style(
            ProgressStyle::default_bar()
                .template("Training: {wide_bar} {pos:>3}/{len:3} [{msg:<30}]"),
        );
        progress.set_message("no loss");
        let report = forecaster.train_on(&series, |epoch| {
            progress.println(format!(
                "Epoch {}: training loss = {:.5}, validation loss = {:.5}",
                epoch.epoch, epoch.train_loss, epoch.val_loss
            ));
            progress.set_message(&format!("val loss = {:.5}", epoch.val_loss));
            progress.inc(1);
        });
        progress.finish_and_clear();
        let report = report?;
        eprintln!(
            "Best epoch {} (validation loss {:.5})",
            report.best_epoch, report.best_val_loss
        );
        eprintln!(
            "MAE {:.2} μg/m³, RMSE {:.2} μg/m³, R² {:.3}, ±5 accuracy {:.1}%, score {:.1}%",
            report.metrics.mae,
            report.metrics.rmse,
            report.metrics.r2,
            report.metrics.within_5,
            report.metrics.overall()
        );
    }

    let forecast = forecaster.forecast_series(&series)?;
    eprintln!(
        "{}: {} {} today, {} {} forecast for {}",
        forecast.city,
        forecast.current_quality.emoji(),
        forecast.current_quality,
        forecast.predicted_quality.emoji(),
        forecast.predicted_quality,
        forecast.forecast.prediction_date
    );
    println!(
        "{}",
        serde_json::to_string_pretty(&forecast)
            .map_err(|err| format_err!("Error serializing forecast: {}", err))?
    );
    Ok(())
}
