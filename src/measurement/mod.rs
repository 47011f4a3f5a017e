//! Physical conversions on top of raw controller readings.
//!
//! - [`calculate_thickness`]: Sauerbrey/Z-match film thickness from the
//!   crystal frequency shift
//! - [`RateTracker`]: deposition rate from consecutive thickness samples
//! - [`crystal_life`]: remaining crystal life from the frequency window

pub mod datapoint;

pub use datapoint::{Sample, Variable};

use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Density of quartz in g/cm³.
pub const QUARTZ_DENSITY: f64 = 2.648;

/// Frequency constant of AT-cut quartz in Hz·cm.
pub const FREQUENCY_CONSTANT: f64 = 1.668e5;

/// Film thickness in nm for a crystal oscillating at `frequency` after
/// starting at `initial_frequency`.
///
/// `density` is the film density in g/cm³ and `impedance_ratio` the
/// acoustic impedance ratio of quartz to film. The result is not scaled by
/// a tooling factor. Callers must make sure `initial_frequency` is non-zero.
pub fn calculate_thickness(
    frequency: f64,
    initial_frequency: f64,
    density: f64,
    impedance_ratio: f64,
) -> f64 {
    let normalization = (QUARTZ_DENSITY * FREQUENCY_CONSTANT)
        / (PI * density * impedance_ratio * initial_frequency);
    let ratio = (impedance_ratio * (PI * (frequency - initial_frequency) / frequency).tan()).atan();

    // cm -> nm; the frequency drops as the film grows
    normalization * ratio * 1e7 * -1.0
}

/// Material parameters used by the thickness calculation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Calibration {
    /// Film density in g/cm³.
    pub density: f64,
    /// Acoustic impedance ratio (quartz / film).
    pub impedance_ratio: f64,
    /// Tooling factor in percent.
    pub tooling_factor: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            density: 1.3,
            impedance_ratio: 1.0,
            tooling_factor: 100.0,
        }
    }
}

impl Calibration {
    /// Reject non-positive or non-finite values.
    pub fn validate(&self) -> AppResult<()> {
        check_positive("density", self.density)?;
        check_positive("acoustic impedance", self.impedance_ratio)?;
        check_positive("tooling factor", self.tooling_factor)
    }

    /// Tooling-corrected thickness in nm.
    pub fn thickness(&self, frequency: f64, initial_frequency: f64) -> f64 {
        calculate_thickness(frequency, initial_frequency, self.density, self.impedance_ratio)
            * self.tooling_factor
            / 100.0
    }
}

pub(crate) fn check_positive(name: &str, value: f64) -> AppResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "Unaccepted {} of {}. Please enter a positive number",
            name, value
        )))
    }
}

/// Previous `(thickness, time)` sample for rate estimation.
///
/// The tracker is a plain value: [`RateTracker::update`] returns the rate
/// and the tracker to use for the next sample.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RateTracker {
    previous: Option<(f64, f64)>,
}

impl RateTracker {
    /// Rate in Å/s for `thickness` (nm) measured at `time` (s).
    ///
    /// The first sample after construction or [`RateTracker::reset`] yields
    /// 0, as does a sample that does not advance the clock.
    pub fn update(self, thickness: f64, time: f64) -> (f64, Self) {
        let rate = match self.previous {
            Some((previous_thickness, previous_time)) if time > previous_time => {
                (thickness - previous_thickness) / (time - previous_time) * 10.0
            }
            _ => 0.0,
        };
        (
            rate,
            Self {
                previous: Some((thickness, time)),
            },
        )
    }

    /// Forget the previous sample.
    pub fn reset(self) -> Self {
        Self::default()
    }

    /// Last (thickness, time) pair.
    pub fn previous(&self) -> Option<(f64, f64)> {
        self.previous
    }
}

/// Remaining crystal life in percent, rounded to two decimals.
pub fn crystal_life(frequency: f64, frequency_min: f64, frequency_max: f64) -> f64 {
    let life = (frequency - frequency_min) / (frequency_max - frequency_min) * 100.0;
    (life * 100.0).round() / 100.0
}
