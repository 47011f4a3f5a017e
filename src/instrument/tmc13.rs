//! PREVAC TMC13 thickness monitor controller driver
//!
//! The TMC13 computes thickness and rate itself; the driver reads them per
//! channel and derives the crystal life from the frequency window read at
//! `initialize`.
//!
//! Remote control requires a registered host that holds the master role:
//! `connect` registers the configured unique ID and assigns master,
//! `disconnect` releases it again.
//!
//! ## Configuration
//!
//! ```toml
//! [tmc13]
//! channel = 1
//! host_id = "PrevacRs"
//! reset_thickness = false
//! tooling_factor = 95.0
//! ```

use super::tmc_link::{command, TmcLink};
use crate::adapters::Adapter;
use crate::core::{Device, GuiField, GuiParameters, InstrumentState};
use crate::error::{AppResult, DaqError};
use crate::measurement::{check_positive, crystal_life, Sample, Variable};
use log::info;

/// Host ID sent on registration unless overridden.
pub const DEFAULT_HOST_ID: &str = "PrevacRs";

/// Material values written to the device on `configure`. `None` leaves
/// the device setting untouched.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MaterialSettings {
    /// Tooling factor in %.
    pub tooling_factor: Option<f64>,
    /// Density in g/cm³.
    pub density: Option<f64>,
    /// Acoustic impedance in 1e5 g/cm²/s.
    pub acoustic_impedance: Option<f64>,
}

/// TMC13 thickness logger on one channel.
pub struct Tmc13<A: Adapter> {
    id: String,
    link: TmcLink<A>,
    host_id: String,
    state: InstrumentState,
    reset_on_configure: bool,
    material: MaterialSettings,
    frequency_window: Option<(f64, f64)>,
}

impl<A: Adapter> Tmc13<A> {
    /// Driver on channel 1 with the default host ID.
    pub fn new(adapter: A) -> Self {
        Self {
            id: "TMC13".to_string(),
            link: TmcLink::new(adapter),
            host_id: DEFAULT_HOST_ID.to_string(),
            state: InstrumentState::Disconnected,
            reset_on_configure: false,
            material: MaterialSettings::default(),
            frequency_window: None,
        }
    }

    /// Unique ID registered with the device on `connect`.
    pub fn with_host_id(mut self, host_id: &str) -> Self {
        self.host_id = host_id.to_string();
        self
    }

    /// Shared V2.x session.
    pub fn link(&self) -> &TmcLink<A> {
        &self.link
    }

    /// Shared V2.x session.
    pub fn link_mut(&mut self) -> &mut TmcLink<A> {
        &mut self.link
    }

    /// Material values applied on configure.
    pub fn material(&self) -> MaterialSettings {
        self.material
    }

    /// `(f_min, f_max)` cached at initialize.
    pub fn frequency_window(&self) -> Option<(f64, f64)> {
        self.frequency_window
    }

    /// Thickness in nm; the device reports Å.
    pub fn get_thickness(&mut self) -> AppResult<f64> {
        Ok(self.link.read_double(command::THICKNESS)? / 10.0)
    }

    /// Rate in Å/s.
    pub fn get_rate(&mut self) -> AppResult<f64> {
        self.link.read_double(command::RATE)
    }

    /// Crystal frequency in Hz.
    pub fn get_crystal_frequency(&mut self) -> AppResult<f64> {
        self.link.read_double(command::CRYSTAL_FREQUENCY)
    }

    /// Lower end of the crystal window in Hz.
    pub fn get_minimum_frequency(&mut self) -> AppResult<f64> {
        self.link.read_double(command::FREQUENCY_MIN)
    }

    /// Upper end of the crystal window in Hz.
    pub fn get_maximum_frequency(&mut self) -> AppResult<f64> {
        self.link.read_double(command::FREQUENCY_MAX)
    }

    /// Pressure in the unit reported by [`TmcLink::pressure_unit`].
    pub fn get_pressure(&mut self) -> AppResult<f64> {
        self.link.read_double(command::PRESSURE)
    }

    /// Tooling factor in %.
    pub fn get_tooling_factor(&mut self) -> AppResult<f64> {
        self.link.read_double(command::TOOLING)
    }

    /// Density in g/cm³.
    pub fn get_material_density(&mut self) -> AppResult<f64> {
        self.link.read_double(command::DENSITY)
    }

    /// Tooling factor in %.
    pub fn set_tooling_factor(&mut self, tooling_factor: f64) -> AppResult<()> {
        check_positive("tooling factor", tooling_factor)?;
        self.link.write_double(command::TOOLING, tooling_factor)
    }

    /// Density in g/cm³.
    pub fn set_material_density(&mut self, density: f64) -> AppResult<()> {
        check_positive("density", density)?;
        self.link.write_double(command::DENSITY, density)
    }

    /// Acoustic impedance in 1e5 g/cm²/s.
    pub fn set_material_acoustic_impedance(&mut self, impedance: f64) -> AppResult<()> {
        check_positive("acoustic impedance", impedance)?;
        self.link.write_double(command::ACOUSTIC_IMPEDANCE, impedance)
    }

    /// Zero the thickness of the selected channel.
    pub fn reset_thickness(&mut self) -> AppResult<()> {
        let channel = self.link.channel();
        self.link.transact(command::RESET_THICKNESS.write(), &[channel])?;
        info!("TMC13 thickness of channel {} reset", channel);
        Ok(())
    }

    /// Remaining crystal life in % from the cached frequency window.
    pub fn get_crystal_life(&mut self) -> AppResult<f64> {
        let (frequency_min, frequency_max) = self.frequency_window.ok_or_else(|| {
            DaqError::Instrument("TMC13 not initialized, frequency window unknown".to_string())
        })?;
        let frequency = self.get_crystal_frequency()?;
        Ok(crystal_life(frequency, frequency_min, frequency_max))
    }
}

/// Value of an optional material field, validated only when enabled.
fn optional_value(
    parameters: &GuiParameters,
    flag: &str,
    field: &str,
    name: &str,
) -> AppResult<Option<f64>> {
    if !parameters.bool(flag)? {
        return Ok(None);
    }
    let value = parameters.f64(field)?;
    check_positive(name, value)?;
    Ok(Some(value))
}

pub(crate) fn parse_channel(parameters: &GuiParameters) -> AppResult<u8> {
    let channel = parameters.i64("Channel")?;
    u8::try_from(channel)
        .ok()
        .filter(|channel| (1..=6).contains(channel))
        .ok_or_else(|| {
            DaqError::Configuration(format!("Channel {} out of range, expected 1-6", channel))
        })
}

pub(crate) fn channel_choices() -> Vec<&'static str> {
    vec!["1", "2", "3", "4", "5", "6"]
}

impl<A: Adapter> Device for Tmc13<A> {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> InstrumentState {
        self.state
    }

    fn gui_parameters(&self) -> Vec<GuiField> {
        vec![
            GuiField::choice("Channel", channel_choices()),
            // Off by default so a running deposition is not zeroed by accident
            GuiField::value("Reset thickness", false),
            GuiField::value("Set Tooling", false),
            GuiField::value("Tooling in %", "100.0"),
            GuiField::value("Set Density", false),
            GuiField::value("Density in g/cm^3", "1.3"),
            GuiField::value("Set Acoustic Impedance", false),
            GuiField::value("Acoustic impedance in 1e5 g/cm²/s", 1.0),
        ]
    }

    fn apply_gui_parameters(&mut self, parameters: &GuiParameters) -> AppResult<()> {
        let channel = parse_channel(parameters)?;
        let reset_on_configure = parameters.bool("Reset thickness")?;
        let material = MaterialSettings {
            tooling_factor: optional_value(parameters, "Set Tooling", "Tooling in %", "tooling factor")?,
            density: optional_value(parameters, "Set Density", "Density in g/cm^3", "density")?,
            acoustic_impedance: optional_value(
                parameters,
                "Set Acoustic Impedance",
                "Acoustic impedance in 1e5 g/cm²/s",
                "acoustic impedance",
            )?,
        };

        self.link.set_channel(channel)?;
        self.reset_on_configure = reset_on_configure;
        self.material = material;
        Ok(())
    }

    fn variables(&self) -> Vec<Variable> {
        vec![
            Variable::new("Thickness", "nm"),
            Variable::new("Rate", "A/s"),
            Variable::new("XTAL life", "%"),
        ]
    }

    fn actions(&self) -> &'static [&'static str] {
        &["reset_thickness"]
    }

    fn run_action(&mut self, action: &str) -> AppResult<()> {
        match action {
            "reset_thickness" => self.reset_thickness(),
            other => Err(DaqError::UnknownAction(other.to_string())),
        }
    }

    fn connect(&mut self) -> AppResult<()> {
        let host_id = self.host_id.clone();
        self.link.register_host(&host_id)?;

        let serial_number = self.link.serial_number()?;
        let product_number = self.link.product_number()?;
        let version = self.link.device_version()?;
        info!(
            "TMC13 serial {} product {} version {}",
            serial_number, product_number, version
        );

        self.link.assign_master()?;
        self.state = InstrumentState::Connected;
        Ok(())
    }

    fn disconnect(&mut self) -> AppResult<()> {
        if self.state != InstrumentState::Disconnected {
            self.link.release_master()?;
            self.state = InstrumentState::Disconnected;
        }
        Ok(())
    }

    fn initialize(&mut self) -> AppResult<()> {
        let frequency_min = self.get_minimum_frequency()?;
        let frequency_max = self.get_maximum_frequency()?;
        if !(frequency_max - frequency_min).is_normal() {
            return Err(DaqError::Configuration(format!(
                "Degenerate crystal frequency range {} - {} Hz",
                frequency_min, frequency_max
            )));
        }
        self.frequency_window = Some((frequency_min, frequency_max));
        self.state = InstrumentState::Initialized;
        Ok(())
    }

    fn configure(&mut self) -> AppResult<()> {
        if self.reset_on_configure {
            self.reset_thickness()?;
        }
        if let Some(tooling_factor) = self.material.tooling_factor {
            self.set_tooling_factor(tooling_factor)?;
        }
        if let Some(density) = self.material.density {
            self.set_material_density(density)?;
        }
        if let Some(impedance) = self.material.acoustic_impedance {
            self.set_material_acoustic_impedance(impedance)?;
        }
        self.state = InstrumentState::Configured;
        Ok(())
    }

    fn call(&mut self) -> AppResult<Sample> {
        let thickness = self.get_thickness()?;
        let rate = self.get_rate()?;
        let life = self.get_crystal_life()?;
        Ok(Sample::new(&self.id, vec![thickness, rate, life]))
    }
}
