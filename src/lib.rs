/*!
An LSTM for forecasting next-day PM2.5 concentrations written in Rust using PyTorch bindings.

Designed around short synthetic (or lightly anchored) pollutant series for a handful of named
cities: a series is generated per city, standardized, sliced into fixed-length windows, and fed to a
small stacked LSTM which predicts the following day's PM2.5. The [`forecast`] module ties the whole
pipeline together; the other modules can be used on their own.
*/
#![forbid(missing_docs)]

pub mod aqi;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod error;
pub mod forecast;
pub mod lstm;
pub mod metrics;
pub mod predict;
pub mod train;
pub mod util;

pub use config::Config;
pub use error::{Error, Result};

/// The floating point type to be used for CPU calculations
pub type CpuFloat = f64;

/// The floating point type to be used for GPU calculations
pub type GpuFloat = f32;
