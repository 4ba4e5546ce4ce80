/*!
Generate plausible pollutant series for a city, anchored on a real reading when one is available
*/
use super::{City, DataSource, Observation, Record, SourceKind, TimeSeries};
use crate::util::{date_range, linspace, stable_hash};
use crate::CpuFloat;
use chrono::{NaiveDate, Utc};
use itertools::{Itertools, MinMaxResult};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

/// Clipping range for PM2.5 when anchored on an observation
pub const PM25_OBSERVED_CLIP: (CpuFloat, CpuFloat) = (5.0, 150.0);

/// Clipping range for PM2.5 when generated from a profile
pub const PM25_PROFILE_CLIP: (CpuFloat, CpuFloat) = (5.0, 100.0);

/// Clipping range for NO2
pub const NO2_CLIP: (CpuFloat, CpuFloat) = (5.0, 80.0);

/// Clipping range for relative humidity
pub const HUMIDITY_CLIP: (CpuFloat, CpuFloat) = (5.0, 100.0);

/// City seeds are reduced modulo this value
pub const SEED_RANGE: u64 = 1000;

/// The deterministic RNG seed for a city, stable across runs
pub fn city_seed(name: &str) -> u64 {
    stable_hash(name.as_bytes()) % SEED_RANGE
}

/// Draws for one generated series, from a single per-city stream
struct NoiseGen {
    rng: StdRng,
}

impl NoiseGen {
    fn for_city(city: &City) -> NoiseGen {
        NoiseGen {
            rng: StdRng::seed_from_u64(city_seed(&city.name)),
        }
    }

    /// `n` draws from `N(mean, std)`; a degenerate spread yields the mean
    fn normal(&mut self, mean: CpuFloat, std: CpuFloat, n: usize) -> Vec<CpuFloat> {
        match Normal::new(mean, std) {
            Ok(dist) => dist.sample_iter(&mut self.rng).take(n).collect(),
            Err(_) => vec![mean; n],
        }
    }
}

fn clip(values: impl Iterator<Item = CpuFloat>, (lo, hi): (CpuFloat, CpuFloat)) -> Vec<CpuFloat> {
    values.map(|v| v.max(lo).min(hi)).collect()
}

fn seasonal(amplitude: CpuFloat, period: CpuFloat, n: usize) -> impl Iterator<Item = CpuFloat> {
    (0..n).map(move |t| amplitude * (2.0 * PI * t as CpuFloat / period).sin())
}

fn log_column(city: &str, column: &str, values: &[CpuFloat]) {
    let mean = values.iter().sum::<CpuFloat>() / values.len().max(1) as CpuFloat;
    if let MinMaxResult::MinMax(min, max) = values.iter().copied().minmax() {
        tracing::debug!(city, column, mean, min, max, "generated column");
    }
}

/// Generates fixed-length daily series for cities
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub struct Synthesizer {
    /// The model's window length
    pub seq_length: usize,
    /// Extra days generated beyond one window, giving the training windows
    pub surplus_days: usize,
}

impl Synthesizer {
    /// The smallest surplus ever generated
    pub const MIN_SURPLUS: usize = 50;

    /// Create a synthesizer; surpluses below [`Synthesizer::MIN_SURPLUS`] are raised to it
    pub fn new(seq_length: usize, surplus_days: usize) -> Synthesizer {
        Synthesizer {
            seq_length,
            surplus_days: surplus_days.max(Self::MIN_SURPLUS),
        }
    }

    /// The number of days in every generated series
    pub fn days(&self) -> usize {
        self.seq_length + self.surplus_days
    }

    /// Generate a series ending today
    pub fn generate_today(&self, source: &DataSource) -> TimeSeries {
        self.generate(source, Utc::now().date_naive())
    }

    /// Generate a series ending at `end`
    ///
    /// The output only depends on the source and `end`: the same city and anchor always yield the same
    /// values.
    pub fn generate(&self, source: &DataSource, end: NaiveDate) -> TimeSeries {
        let dates = date_range(end, self.days());
        let records = match source {
            DataSource::Observed { city, observation } => self.observed(city, observation, &dates),
            DataSource::Synthetic(city) => self.profiled(city, &dates),
        };
        let series = TimeSeries {
            city: source.city().name.clone(),
            source: source.kind(),
            records,
        };
        log_column(&series.city, "pm25", &series.column(0));
        log_column(&series.city, "no2", &series.column(1));
        tracing::info!(
            city = %series.city,
            source = ?series.source,
            days = series.len(),
            "generated time series"
        );
        series
    }

    fn observed(&self, city: &City, observation: &Observation, dates: &[NaiveDate]) -> Vec<Record> {
        let n = dates.len();
        let mut noise = NoiseGen::for_city(city);
        let base = observation.anchor_pm25();

        let pm25_std = (base * 0.2).max(3.0);
        let pm25_noise = noise.normal(0.0, pm25_std * 0.3, n);
        let pm25 = clip(
            linspace(base * 1.1, base * 0.9, n)
                .into_iter()
                .zip(seasonal(5.0, 7.0, n))
                .zip(pm25_noise)
                .map(|((trend, season), noise)| trend + season + noise),
            PM25_OBSERVED_CLIP,
        );

        let no2_base = (base * 0.6 + 15.0).max(10.0).min(60.0);
        let no2_noise = noise.normal(0.0, no2_base * 0.15, n);
        let no2 = clip(
            linspace(no2_base * 1.1, no2_base * 0.9, n)
                .into_iter()
                .zip(no2_noise)
                .map(|(trend, noise)| trend + noise),
            NO2_CLIP,
        );

        let temperature = noise.normal(observation.temperature, 2.0, n);
        let humidity = clip(
            noise.normal(observation.humidity, 5.0, n).into_iter(),
            HUMIDITY_CLIP,
        );

        (0..n)
            .map(|i| Record {
                temperature: Some(temperature[i]),
                humidity: Some(humidity[i]),
                ..Record::new(dates[i], pm25[i], no2[i])
            })
            .collect()
    }

    fn profiled(&self, city: &City, dates: &[NaiveDate]) -> Vec<Record> {
        let n = dates.len();
        let mut noise = NoiseGen::for_city(city);
        let profile = city.profile;

        let pm25_noise = noise.normal(0.0, profile.pm25_std * 0.3, n);
        let pm25 = clip(
            linspace(profile.pm25_base * 1.1, profile.pm25_base * 0.9, n)
                .into_iter()
                .zip(seasonal(profile.pm25_std * 0.5, 30.0, n))
                .zip(pm25_noise)
                .map(|((trend, season), noise)| trend + season + noise),
            PM25_PROFILE_CLIP,
        );

        let no2_noise = noise.normal(0.0, profile.no2_std * 0.4, n);
        let no2 = clip(
            linspace(profile.no2_base * 1.1, profile.no2_base * 0.9, n)
                .into_iter()
                .zip(no2_noise)
                .map(|(trend, noise)| trend + noise),
            NO2_CLIP,
        );

        (0..n)
            .map(|i| Record::new(dates[i], pm25[i], no2[i]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{cities, CityProfile};
    use chrono::Duration;
    use rand::RngCore;

    fn end() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 7, 14).unwrap()
    }

    fn observation(aqi_us: f64) -> Observation {
        Observation {
            aqi_us,
            main_pollutant: "p2".into(),
            temperature: 21.0,
            humidity: 48.0,
        }
    }

    #[test]
    fn seeds_are_stable_and_bounded() {
        assert_eq!(city_seed("Madrid"), city_seed("Madrid"));
        assert!(city_seed("Ciudad de México") < SEED_RANGE);
        assert_eq!(city_seed("Madrid"), stable_hash(b"Madrid") % 1000);
    }

    #[test]
    fn synthetic_series_is_reproducible() {
        let synth = Synthesizer::new(10, 50);
        let source = DataSource::Synthetic(cities::lookup("1").unwrap());
        let a = synth.generate(&source, end());
        let b = synth.generate(&source, end());
        assert_eq!(a, b);
        assert_eq!(a.len(), 60);
        assert_eq!(a.source, SourceKind::Synthetic);
        assert_eq!(a.last().unwrap().date, end());
        assert_eq!(a.records[0].date, end() - Duration::days(59));
        assert!(a.check().is_ok());
    }

    #[test]
    fn mexico_city_series_is_pinned() {
        assert_eq!(city_seed("Ciudad de México"), 450);
        let mut rng = StdRng::seed_from_u64(450);
        assert_eq!(rng.next_u64(), 0xb5e7_0654_fc59_503d);
        assert_eq!(rng.next_u64(), 0x7284_1e68_0f2f_b172);

        let synth = Synthesizer::new(10, 50);
        let series = synth.generate(&DataSource::Synthetic(cities::lookup("1").unwrap()), end());
        let pm25 = [41.6140402270669, 39.01006494366289, 38.28200899471888, 39.50664144989753];
        let no2 = [49.467971408301, 47.002341955233994, 46.14361934571709, 49.52641415933999];
        for (i, record) in series.records.iter().take(4).enumerate() {
            assert!((record.pm25 - pm25[i]).abs() < 1e-9, "pm25[{}] = {}", i, record.pm25);
            assert!((record.no2 - no2[i]).abs() < 1e-9, "no2[{}] = {}", i, record.no2);
        }
    }

    #[test]
    fn cities_get_different_series() {
        let synth = Synthesizer::new(10, 50);
        let a = synth.generate(&DataSource::Synthetic(City::custom("Springfield")), end());
        let b = synth.generate(&DataSource::Synthetic(City::custom("Shelbyville")), end());
        // identical profiles, different seeds
        assert_ne!(city_seed("Springfield"), city_seed("Shelbyville"));
        assert_ne!(a.records, b.records);
    }

    #[test]
    fn observed_series_is_reproducible_and_anchored() {
        let synth = Synthesizer::new(14, 100);
        let city = cities::lookup("Madrid").unwrap();
        let source = DataSource::Observed {
            city: city.clone(),
            observation: observation(100.0),
        };
        let a = synth.generate(&source, end());
        assert_eq!(a, synth.generate(&source, end()));
        assert_eq!(a.len(), 114);
        assert_eq!(a.source, SourceKind::Observed);
        assert!(a.records.iter().all(|r| r.temperature.is_some() && r.humidity.is_some()));
        let mean = a.column(0).iter().sum::<f64>() / a.len() as f64;
        assert!((mean - 35.4).abs() < 5.0, "mean {} far from anchor", mean);

        let other = DataSource::Observed {
            city,
            observation: observation(40.0),
        };
        assert_ne!(a.records, synth.generate(&other, end()).records);
    }

    #[test]
    fn values_stay_in_physical_range() {
        let synth = Synthesizer::new(10, 50);
        let extreme = City {
            profile: CityProfile::new(140.0, 80.0, 90.0, 40.0),
            ..City::custom("Smogtown")
        };
        let sources = vec![
            DataSource::Synthetic(extreme.clone()),
            DataSource::Observed {
                city: extreme,
                observation: observation(480.0),
            },
            DataSource::Observed {
                city: City::custom("Clearwater"),
                observation: observation(0.0),
            },
        ];
        for source in &sources {
            let series = synth.generate(source, end());
            for record in &series.records {
                assert!(record.pm25 >= 5.0 && record.pm25 <= 150.0);
                assert!(record.no2 >= 5.0 && record.no2 <= 80.0);
                if source.kind() == SourceKind::Synthetic {
                    assert!(record.pm25 <= 100.0);
                }
            }
            assert!(series.check().is_ok());
        }
    }

    #[test]
    fn surplus_has_a_floor() {
        let synth = Synthesizer::new(10, 5);
        assert_eq!(synth.surplus_days, Synthesizer::MIN_SURPLUS);
        assert_eq!(synth.days(), 60);
    }
}
