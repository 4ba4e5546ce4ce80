/*!
US air quality index conversion and classification
*/
use serde::{Deserialize, Serialize};
use std::fmt;

/// The index breakpoints shared by conversion and classification
pub const AQI_BREAKPOINTS: [f64; 5] = [50.0, 100.0, 150.0, 200.0, 300.0];

/// PM2.5 concentrations (μg/m³) at the index values `0` followed by each of [`AQI_BREAKPOINTS`]
pub const PM25_BREAKPOINTS: [f64; 6] = [0.0, 12.0, 35.4, 55.4, 150.4, 250.4];

/// Concentration added per index unit above the last breakpoint
pub const HAZARDOUS_SLOPE: f64 = 1.5;

/// Lower and upper index value of a band, the last band being unbounded
fn aqi_band(band: usize) -> (f64, f64) {
    let lo = if band == 0 { 0.0 } else { AQI_BREAKPOINTS[band - 1] };
    let hi = AQI_BREAKPOINTS.get(band).copied().unwrap_or(f64::INFINITY);
    (lo, hi)
}

/// The band an index value falls into, breakpoints belonging to the lower band
fn band_of(aqi: f64) -> usize {
    AQI_BREAKPOINTS
        .iter()
        .position(|&bp| aqi <= bp)
        .unwrap_or(AQI_BREAKPOINTS.len())
}

/// Estimate a PM2.5 concentration (μg/m³) from a US AQI value
///
/// Piecewise linear between the EPA endpoint pairs; above an index of 300 the concentration grows by
/// [`HAZARDOUS_SLOPE`] per index unit without bound. Negative values are treated as zero.
pub fn aqi_to_pm25(aqi: f64) -> f64 {
    let aqi = aqi.max(0.0);
    let band = band_of(aqi);
    let (lo, hi) = aqi_band(band);
    let c_lo = PM25_BREAKPOINTS[band];
    if band == AQI_BREAKPOINTS.len() {
        return c_lo + (aqi - lo) * HAZARDOUS_SLOPE;
    }
    let c_hi = PM25_BREAKPOINTS[band + 1];
    c_lo + (aqi - lo) / (hi - lo) * (c_hi - c_lo)
}

/// Estimate the US AQI value corresponding to a PM2.5 concentration; the inverse of [`aqi_to_pm25`]
pub fn pm25_to_aqi(pm25: f64) -> f64 {
    let pm25 = pm25.max(0.0);
    let band = PM25_BREAKPOINTS[1..]
        .iter()
        .position(|&bp| pm25 <= bp)
        .unwrap_or(AQI_BREAKPOINTS.len());
    let (lo, hi) = aqi_band(band);
    let c_lo = PM25_BREAKPOINTS[band];
    if band == AQI_BREAKPOINTS.len() {
        return lo + (pm25 - c_lo) / HAZARDOUS_SLOPE;
    }
    let c_hi = PM25_BREAKPOINTS[band + 1];
    lo + (pm25 - c_lo) / (c_hi - c_lo) * (hi - lo)
}

/// Air quality severity tiers, from best to worst
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    /// AQI 0 to 50
    Good,
    /// AQI 51 to 100
    Moderate,
    /// AQI 101 to 150
    #[serde(rename = "unhealthy_for_sensitive")]
    UnhealthySensitive,
    /// AQI 151 to 200
    Unhealthy,
    /// AQI 201 to 300
    VeryUnhealthy,
    /// AQI above 300
    Hazardous,
}

impl QualityTier {
    /// All tiers, in order of severity
    pub const ALL: [QualityTier; 6] = [
        QualityTier::Good,
        QualityTier::Moderate,
        QualityTier::UnhealthySensitive,
        QualityTier::Unhealthy,
        QualityTier::VeryUnhealthy,
        QualityTier::Hazardous,
    ];

    /// Classify an AQI value
    pub fn classify(aqi: f64) -> QualityTier {
        QualityTier::ALL[band_of(aqi)]
    }

    /// Classify a PM2.5 concentration by way of its estimated AQI
    pub fn classify_pm25(pm25: f64) -> QualityTier {
        QualityTier::classify(pm25_to_aqi(pm25))
    }

    /// The AQI band covered by this tier: exclusive lower bound (except for `Good`), inclusive upper bound
    pub fn aqi_range(self) -> (f64, f64) {
        aqi_band(self as usize)
    }

    /// The stable key of this tier, as used by the serving layer
    pub fn as_str(self) -> &'static str {
        match self {
            QualityTier::Good => "good",
            QualityTier::Moderate => "moderate",
            QualityTier::UnhealthySensitive => "unhealthy_for_sensitive",
            QualityTier::Unhealthy => "unhealthy",
            QualityTier::VeryUnhealthy => "very_unhealthy",
            QualityTier::Hazardous => "hazardous",
        }
    }

    /// A human readable label
    pub fn label(self) -> &'static str {
        match self {
            QualityTier::Good => "GOOD",
            QualityTier::Moderate => "MODERATE",
            QualityTier::UnhealthySensitive => "UNHEALTHY FOR SENSITIVE GROUPS",
            QualityTier::Unhealthy => "UNHEALTHY",
            QualityTier::VeryUnhealthy => "VERY UNHEALTHY",
            QualityTier::Hazardous => "HAZARDOUS",
        }
    }

    /// A colored marker for terminal and web display
    pub fn emoji(self) -> &'static str {
        match self {
            QualityTier::Good => "🟢",
            QualityTier::Moderate => "🟡",
            QualityTier::UnhealthySensitive => "🟠",
            QualityTier::Unhealthy => "🔴",
            QualityTier::VeryUnhealthy => "🟣",
            QualityTier::Hazardous => "🟤",
        }
    }
}

impl fmt::Display for QualityTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EPS: f64 = 1e-9;

    #[test]
    fn conversion_hits_endpoints() {
        assert_eq!(aqi_to_pm25(0.0), 0.0);
        for (i, &bp) in AQI_BREAKPOINTS.iter().enumerate() {
            assert!((aqi_to_pm25(bp) - PM25_BREAKPOINTS[i + 1]).abs() < EPS, "at {}", bp);
        }
        assert!((aqi_to_pm25(400.0) - (250.4 + 150.0)).abs() < EPS);
        assert_eq!(aqi_to_pm25(-3.0), 0.0);
    }

    #[test]
    fn conversion_is_continuous_and_bounded_per_band() {
        for band in 0..=AQI_BREAKPOINTS.len() {
            let (lo, hi) = aqi_band(band);
            let hi = if hi.is_finite() { hi } else { 500.0 };
            let c_lo = PM25_BREAKPOINTS[band];
            let c_hi = PM25_BREAKPOINTS
                .get(band + 1)
                .copied()
                .unwrap_or(c_lo + (hi - lo) * HAZARDOUS_SLOPE);
            let steps = 200;
            for step in 1..=steps {
                let aqi = lo + (hi - lo) * step as f64 / steps as f64;
                let pm = aqi_to_pm25(aqi);
                assert!(pm >= c_lo - EPS && pm <= c_hi + EPS, "{} -> {}", aqi, pm);
            }
        }
        for &bp in AQI_BREAKPOINTS.iter() {
            let below = aqi_to_pm25(bp - 1e-7);
            let above = aqi_to_pm25(bp + 1e-7);
            assert!((below - above).abs() < 1e-5, "discontinuity at {}", bp);
        }
    }

    #[test]
    fn conversion_is_monotone() {
        let mut last = aqi_to_pm25(0.0);
        for i in 1..=6000 {
            let pm = aqi_to_pm25(i as f64 * 0.1);
            assert!(pm >= last);
            last = pm;
        }
    }

    #[test]
    fn inverse_conversion() {
        for &aqi in &[0.0, 17.0, 50.0, 75.5, 100.0, 149.0, 199.9, 250.0, 300.0, 420.0] {
            assert!((pm25_to_aqi(aqi_to_pm25(aqi)) - aqi).abs() < 1e-9, "at {}", aqi);
        }
    }

    #[test]
    fn classification_matches_bands() {
        assert_eq!(QualityTier::classify(0.0), QualityTier::Good);
        assert_eq!(QualityTier::classify(50.0), QualityTier::Good);
        assert_eq!(QualityTier::classify(50.5), QualityTier::Moderate);
        assert_eq!(QualityTier::classify(100.0), QualityTier::Moderate);
        assert_eq!(QualityTier::classify(101.0), QualityTier::UnhealthySensitive);
        assert_eq!(QualityTier::classify(200.0), QualityTier::Unhealthy);
        assert_eq!(QualityTier::classify(300.0), QualityTier::VeryUnhealthy);
        assert_eq!(QualityTier::classify(301.0), QualityTier::Hazardous);
        assert_eq!(QualityTier::classify(5000.0), QualityTier::Hazardous);
        for i in 0..6000 {
            let aqi = i as f64 * 0.1;
            let (lo, hi) = QualityTier::classify(aqi).aqi_range();
            assert!(aqi <= hi);
            assert!(aqi > lo || (lo == 0.0 && aqi == 0.0));
        }
    }

    #[test]
    fn tiers_are_ordered() {
        assert!(QualityTier::Good < QualityTier::Hazardous);
        assert_eq!(QualityTier::classify_pm25(12.0), QualityTier::Good);
        assert_eq!(QualityTier::classify_pm25(35.5), QualityTier::UnhealthySensitive);
        assert_eq!(
            serde_json::to_string(&QualityTier::UnhealthySensitive).unwrap(),
            "\"unhealthy_for_sensitive\""
        );
        assert_eq!(QualityTier::VeryUnhealthy.as_str(), "very_unhealthy");
    }
}
