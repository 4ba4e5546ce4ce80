/*!
Data processing and IO functions
*/
use crate::aqi::aqi_to_pm25;
use crate::util::round1;
use crate::*;
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;

pub mod archive;
pub mod cities;
pub mod scale;
pub mod synth;
pub mod window;

pub use cities::{City, CityProfile};

/// Physical bounds for PM2.5, in μg/m³
pub const PM25_RANGE: (CpuFloat, CpuFloat) = (1.0, 150.0);

/// Physical bounds for NO2, in μg/m³
pub const NO2_RANGE: (CpuFloat, CpuFloat) = (1.0, 80.0);

/// One day of pollutant and weather data for a city
#[derive(Debug, Copy, Clone, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Record<F = CpuFloat> {
    /// The calendar day this record describes
    pub date: NaiveDate,
    /// Fine particulate matter concentration
    pub pm25: F,
    /// Nitrogen dioxide concentration
    pub no2: F,
    /// Wind speed, if known
    #[serde(default)]
    pub wind_speed: Option<F>,
    /// Relative humidity, if known
    #[serde(default)]
    pub humidity: Option<F>,
    /// Temperature in °C, if known
    #[serde(default)]
    pub temperature: Option<F>,
}

impl Record {
    /// The number of fields a record feeds into a neural network. The date is *not* fed in.
    pub const NN_FIELDS: usize = 2; // (pm25, no2)

    /// The names of the fields fed into a neural network, in column order
    pub const FEATURES: [&'static str; 2] = ["pm25", "no2"];

    /// The column holding the forecast target
    pub const TARGET: usize = 0;

    /// A record holding only pollutant values
    pub fn new(date: NaiveDate, pm25: CpuFloat, no2: CpuFloat) -> Record {
        Record {
            date,
            pm25,
            no2,
            wind_speed: None,
            humidity: None,
            temperature: None,
        }
    }

    /// Push a record's data points to a feature vector. Guaranteed to write `NN_FIELDS` data points
    pub fn push_features(&self, features: &mut Vec<CpuFloat>) {
        features.push(self.pm25);
        features.push(self.no2);
    }
}

/// Where the values of a time series came from
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Generated around one real observation
    Observed,
    /// Generated purely from a city profile
    Synthetic,
    /// Read back from an archive
    Archived,
}

/// An ordered run of daily records for one city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    /// The display name of the city
    pub city: String,
    /// How the series was obtained
    pub source: SourceKind,
    /// The records, one per consecutive day
    pub records: Vec<Record>,
}

impl TimeSeries {
    /// The number of days in this series
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether this series is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The most recent record
    pub fn last(&self) -> Option<&Record> {
        self.records.last()
    }

    /// The dates of this series
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.records.iter().map(|record| record.date)
    }

    /// The model features of every record, row-major with `Record::NN_FIELDS` columns
    pub fn feature_matrix(&self) -> Vec<CpuFloat> {
        let mut matrix = Vec::with_capacity(self.len() * Record::NN_FIELDS);
        for record in &self.records {
            record.push_features(&mut matrix);
        }
        matrix
    }

    /// One column of the series
    pub fn column(&self, column: usize) -> Vec<CpuFloat> {
        let mut row = Vec::with_capacity(Record::NN_FIELDS);
        self.records
            .iter()
            .map(|record| {
                row.clear();
                record.push_features(&mut row);
                row[column]
            })
            .collect()
    }

    /// Check that dates advance one day at a time and pollutant values lie within physical bounds
    pub fn check(&self) -> Result<()> {
        for pair in self.records.windows(2) {
            if pair[1].date - pair[0].date != Duration::days(1) {
                return Err(Error::Configuration(format!(
                    "{}: dates {} and {} are not consecutive",
                    self.city, pair[0].date, pair[1].date
                )));
            }
        }
        for record in &self.records {
            if !(PM25_RANGE.0..=PM25_RANGE.1).contains(&record.pm25)
                || !(NO2_RANGE.0..=NO2_RANGE.1).contains(&record.no2)
            {
                return Err(Error::Configuration(format!(
                    "{}: values out of range on {} (pm25 = {}, no2 = {})",
                    self.city, record.date, record.pm25, record.no2
                )));
            }
        }
        Ok(())
    }

    /// A display-ready copy of this series: ISO dates and values rounded to one decimal
    pub fn view(&self) -> SeriesView {
        let optional = |get: fn(&Record) -> Option<CpuFloat>| -> Option<Vec<CpuFloat>> {
            self.records
                .iter()
                .map(|record| get(record).map(round1))
                .collect()
        };
        SeriesView {
            city: self.city.clone(),
            dates: self
                .dates()
                .map(|date| date.format("%Y-%m-%d").to_string())
                .collect(),
            pm25: self.records.iter().map(|r| round1(r.pm25)).collect(),
            no2: self.records.iter().map(|r| round1(r.no2)).collect(),
            wind_speed: optional(|r| r.wind_speed),
            humidity: optional(|r| r.humidity),
            temperature: optional(|r| r.temperature),
            total_days: self.len(),
        }
    }
}

/// A time series as handed to the serving layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesView {
    /// The display name of the city
    pub city: String,
    /// ISO calendar dates
    pub dates: Vec<String>,
    /// PM2.5 values, rounded to one decimal
    pub pm25: Vec<CpuFloat>,
    /// NO2 values, rounded to one decimal
    pub no2: Vec<CpuFloat>,
    /// Wind speed, when known for every day
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wind_speed: Option<Vec<CpuFloat>>,
    /// Humidity, when known for every day
    #[serde(skip_serializing_if = "Option::is_none")]
    pub humidity: Option<Vec<CpuFloat>>,
    /// Temperature, when known for every day
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<Vec<CpuFloat>>,
    /// The number of days in the series
    pub total_days: usize,
}

/// A single real-world reading, used to anchor a generated series
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// US AQI value
    pub aqi_us: CpuFloat,
    /// The main pollutant reported with the index
    pub main_pollutant: String,
    /// Temperature in °C
    pub temperature: CpuFloat,
    /// Relative humidity in %
    pub humidity: CpuFloat,
}

#[derive(Deserialize)]
struct AirVisualResponse {
    status: String,
    data: serde_json::Value,
}

impl Observation {
    /// The PM2.5 concentration implied by this observation's AQI
    pub fn anchor_pm25(&self) -> CpuFloat {
        aqi_to_pm25(self.aqi_us)
    }

    /// Parse the body of an AirVisual `city` endpoint response
    ///
    /// Missing readings take neutral defaults; a non-`success` status or a body without
    /// `data.current` is an error, which callers are expected to absorb by falling back to
    /// [`DataSource::Synthetic`].
    pub fn from_airvisual_json(body: &str) -> Result<Observation> {
        let response: AirVisualResponse = serde_json::from_str(body)?;
        if response.status != "success" {
            let message = response.data["message"].as_str().unwrap_or("unknown error");
            return Err(Error::Observation(format!(
                "status {:?}: {}",
                response.status, message
            )));
        }
        let current = &response.data["current"];
        if !current.is_object() {
            return Err(Error::Observation("response has no current readings".into()));
        }
        let pollution = &current["pollution"];
        let weather = &current["weather"];
        Ok(Observation {
            aqi_us: pollution["aqius"].as_f64().unwrap_or(50.0),
            main_pollutant: pollution["mainus"]
                .as_str()
                .unwrap_or("unknown")
                .to_string(),
            temperature: weather["tp"].as_f64().unwrap_or(20.0),
            humidity: weather["hu"].as_f64().unwrap_or(50.0),
        })
    }
}

/// How the series for a request is obtained, resolved once per request
#[derive(Debug, Clone, PartialEq)]
pub enum DataSource {
    /// Anchor a generated series on a real observation
    Observed {
        /// The city being forecast
        city: City,
        /// The reading to anchor on
        observation: Observation,
    },
    /// Generate a series from the city's profile alone
    Synthetic(City),
}

impl DataSource {
    /// Resolve the result of fetching a real observation, falling back to synthetic data on failure
    pub fn resolve<E: fmt::Display>(city: City, fetched: Result<Observation, E>) -> DataSource {
        match fetched {
            Ok(observation) => DataSource::Observed { city, observation },
            Err(err) => {
                tracing::warn!(
                    city = %city.name,
                    error = %err,
                    "no live observation, using synthetic profile"
                );
                DataSource::Synthetic(city)
            }
        }
    }

    /// The city this source describes
    pub fn city(&self) -> &City {
        match self {
            DataSource::Observed { city, .. } => city,
            DataSource::Synthetic(city) => city,
        }
    }

    /// The kind of series this source yields
    pub fn kind(&self) -> SourceKind {
        match self {
            DataSource::Observed { .. } => SourceKind::Observed,
            DataSource::Synthetic(_) => SourceKind::Synthetic,
        }
    }
}
