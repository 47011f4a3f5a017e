//! Per-sample records returned by the drivers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Name and unit of one value a driver returns from `call`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    /// Column name.
    pub name: String,
    /// Unit, empty for dimensionless values.
    pub unit: String,
}

impl Variable {
    /// Variable with `name` and `unit`.
    pub fn new(name: &str, unit: &str) -> Self {
        Self {
            name: name.to_string(),
            unit: unit.to_string(),
        }
    }
}

/// One measurement cycle.
///
/// `values` lines up with the driver's `variables()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Time the sample was taken.
    pub timestamp: DateTime<Utc>,
    /// Driver that produced it.
    pub instrument_id: String,
    /// Values in the order of the driver variables.
    pub values: Vec<f64>,
}

impl Sample {
    /// Sample stamped with the current time.
    pub fn new(instrument_id: &str, values: Vec<f64>) -> Self {
        Self {
            timestamp: Utc::now(),
            instrument_id: instrument_id.to_string(),
            values,
        }
    }

    /// Seconds since the Unix epoch with microsecond resolution.
    pub fn seconds(&self) -> f64 {
        self.timestamp.timestamp_micros() as f64 / 1e6
    }
}
