//! PREVAC TM13/TM14 thickness monitor driver
//!
//! The TM1x reports the raw crystal frequency. Thickness and rate are
//! derived on the host from the frequency captured at `initialize` (or at
//! the last `reset_thickness` action), using [`Calibration`].
//!
//! ## Configuration
//!
//! ```toml
//! [tm1x]
//! model = "TM14"
//! sample_rate_hz = 4.0
//! density = 2.7
//! checksum = "lenient"
//!
//! [tm1x.address]
//! device_address = 200
//! device_group = 161
//! logic_group = 200
//! driver_address = 1
//! ```
//!
//! Address and logic-group changes are not acknowledged with a frame: the
//! device starts answering on the new address, so success is judged by
//! whether any bytes arrive after the settle delay.

use crate::adapters::Adapter;
use crate::config::Tm1xConfig;
use crate::core::{Device, GuiField, GuiParameters, InstrumentState};
use crate::error::{AppResult, DaqError};
use crate::measurement::{Calibration, RateTracker, Sample, Variable};
use crate::protocol::v1::{self, Tm1x as Tm1xFormat, Tm1xAddress, Tm1xFrame};
use crate::protocol::{latin1_text, read_u32_be, receive, send, ChecksumPolicy};
use log::{debug, info};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// TM1x function codes.
pub mod function {
    /// Query that does nothing; used to look for an answering device.
    pub const NO_OPERATION: u8 = 0x00;
    /// Product number text.
    pub const PRODUCT_NUMBER: u8 = 0x01;
    /// Serial number text.
    pub const SERIAL_NUMBER: u8 = 0x02;
    /// Move the device to a new device address.
    pub const SET_DEVICE_ADDRESS: u8 = 0x04;
    /// Move the device to a new logic group.
    pub const SET_LOGIC_GROUP: u8 = 0x05;
    /// Crystal frequency with measurement metadata.
    pub const FREQUENCY: u8 = 0x53;
}

/// Command names used as keys for per-command checksum overrides.
pub mod command_name {
    /// Checksum override key for the no-op query.
    pub const NO_OPERATION: &str = "no_operation";
    /// Checksum override key for the product number query.
    pub const PRODUCT_NUMBER: &str = "product_number";
    /// Checksum override key for the serial number query.
    pub const SERIAL_NUMBER: &str = "serial_number";
    /// Checksum override key for the frequency query.
    pub const FREQUENCY: &str = "frequency";
}

/// TM1x hardware model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tm1xModel {
    /// Fixed 4 Hz sampling.
    Tm13,
    /// Selectable sample rate.
    Tm14,
}

impl Tm1xModel {
    /// Model number as reported in the frequency answer.
    pub fn number(self) -> u8 {
        match self {
            Tm1xModel::Tm13 => 13,
            Tm1xModel::Tm14 => 14,
        }
    }
}

impl FromStr for Tm1xModel {
    type Err = DaqError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TM13" => Ok(Tm1xModel::Tm13),
            "TM14" => Ok(Tm1xModel::Tm14),
            other => Err(DaqError::Configuration(format!(
                "Unknown TM1x model '{}', expected TM13 or TM14",
                other
            ))),
        }
    }
}

impl fmt::Display for Tm1xModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TM{}", self.number())
    }
}

/// Measurement rate of a TM14. A TM13 always runs at 4 Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleRate {
    /// 10 Hz
    Hz10,
    /// 4 Hz
    Hz4,
    /// 2 Hz
    Hz2,
    /// 1 Hz
    Hz1,
    /// 0.5 Hz
    Hz0_5,
}

impl SampleRate {
    /// Every rate, fastest first.
    pub const ALL: [SampleRate; 5] = [
        SampleRate::Hz10,
        SampleRate::Hz4,
        SampleRate::Hz2,
        SampleRate::Hz1,
        SampleRate::Hz0_5,
    ];

    /// Rate matching `hz` exactly.
    pub fn from_hz(hz: f64) -> AppResult<Self> {
        Self::ALL
            .into_iter()
            .find(|rate| rate.hz() == hz)
            .ok_or_else(|| {
                DaqError::Configuration(format!(
                    "Unsupported sample rate {} Hz, expected 10, 4, 2, 1 or 0.5",
                    hz
                ))
            })
    }

    /// Rate in Hz.
    pub fn hz(self) -> f64 {
        match self {
            SampleRate::Hz10 => 10.0,
            SampleRate::Hz4 => 4.0,
            SampleRate::Hz2 => 2.0,
            SampleRate::Hz1 => 1.0,
            SampleRate::Hz0_5 => 0.5,
        }
    }

    /// Code sent with the frequency query.
    pub fn code(self) -> u8 {
        match self {
            SampleRate::Hz10 => 1,
            SampleRate::Hz4 => 2,
            SampleRate::Hz2 => 3,
            SampleRate::Hz1 => 4,
            SampleRate::Hz0_5 => 5,
        }
    }
}

/// Answer to the frequency query.
///
/// Only the frequency is guaranteed; the trailing metadata bytes are
/// reported when the device sends them.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyReading {
    /// Crystal frequency in Hz, 0.01 Hz resolution.
    pub frequency: f64,
    /// Microbalance correction connected.
    pub correction_connected: Option<bool>,
    /// Rolling measurement counter, 0-255.
    pub counter: Option<u8>,
    /// Measurement duration in ms.
    pub duration_ms: Option<u8>,
    /// 13 or 14.
    pub model: Option<u8>,
}

impl FrequencyReading {
    /// Decode a frequency answer payload; only the first four bytes are required.
    pub fn decode(payload: &[u8]) -> AppResult<Self> {
        let raw = read_u32_be(v1::PROTOCOL_NAME, payload)?;
        Ok(Self {
            frequency: f64::from(raw) / 100.0,
            correction_connected: payload.get(4).map(|flag| *flag == 1),
            counter: payload.get(5).copied(),
            duration_ms: payload.get(6).copied(),
            model: payload.get(7).copied(),
        })
    }
}

/// Session settings of a TM1x driver.
#[derive(Debug, Clone, PartialEq)]
pub struct Tm1xSettings {
    /// Hardware model.
    pub model: Tm1xModel,
    /// Sample rate sent with every frequency query.
    pub sample_rate: SampleRate,
    /// Routing bytes; updated by address and group changes.
    pub address: Tm1xAddress,
    /// Thickness conversion constants.
    pub calibration: Calibration,
    /// Wait after an address or group change.
    pub settle_delay: Duration,
    /// Wait per group during the logic-group scan.
    pub scan_timeout: Duration,
    /// Default checksum handling.
    pub checksum: ChecksumPolicy,
    /// Per-command checksum handling, keyed by command name.
    pub checksum_overrides: BTreeMap<String, ChecksumPolicy>,
}

impl Default for Tm1xSettings {
    fn default() -> Self {
        Self {
            model: Tm1xModel::Tm13,
            sample_rate: SampleRate::Hz4,
            address: Tm1xAddress::default(),
            calibration: Calibration::default(),
            settle_delay: Duration::from_millis(500),
            scan_timeout: Duration::from_millis(100),
            checksum: ChecksumPolicy::Lenient,
            checksum_overrides: BTreeMap::new(),
        }
    }
}

impl Tm1xSettings {
    /// Settings from a validated `[tm1x]` section.
    pub fn from_config(config: &Tm1xConfig) -> AppResult<Self> {
        let model: Tm1xModel = config.model.parse()?;
        let sample_rate = match model {
            Tm1xModel::Tm13 => SampleRate::Hz4,
            Tm1xModel::Tm14 => SampleRate::from_hz(config.sample_rate_hz)?,
        };
        let calibration = Calibration {
            density: config.density,
            impedance_ratio: config.impedance_ratio,
            tooling_factor: config.tooling_factor,
        };
        calibration.validate()?;

        Ok(Self {
            model,
            sample_rate,
            address: config.address,
            calibration,
            settle_delay: Duration::from_millis(config.settle_delay_ms),
            scan_timeout: Duration::from_millis(config.scan_timeout_ms),
            checksum: config.checksum,
            checksum_overrides: config.checksum_overrides.clone(),
        })
    }

    /// Checksum handling for the response to `command`.
    pub fn checksum_policy(&self, command: &str) -> ChecksumPolicy {
        self.checksum_overrides
            .get(command)
            .copied()
            .unwrap_or(self.checksum)
    }
}

fn check_address(kind: &str, value: u8) -> AppResult<()> {
    if (1..=254).contains(&value) {
        Ok(())
    } else {
        Err(DaqError::Configuration(format!(
            "{} {} out of range, expected 1-254",
            kind, value
        )))
    }
}

/// TM13/TM14 driver over an exclusively owned transport.
pub struct Tm1x<A: Adapter> {
    id: String,
    adapter: A,
    settings: Tm1xSettings,
    state: InstrumentState,
    initial_frequency: Option<f64>,
    rate: RateTracker,
}

impl<A: Adapter> Tm1x<A> {
    /// Driver on `adapter`; nothing is sent until a command is issued.
    pub fn new(adapter: A, settings: Tm1xSettings) -> Self {
        Self {
            id: "TM1x".to_string(),
            adapter,
            settings,
            state: InstrumentState::Disconnected,
            initial_frequency: None,
            rate: RateTracker::default(),
        }
    }

    /// Current session settings.
    pub fn settings(&self) -> &Tm1xSettings {
        &self.settings
    }

    /// Underlying transport.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Underlying transport.
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Baseline frequency thickness is measured against.
    pub fn initial_frequency(&self) -> Option<f64> {
        self.initial_frequency
    }

    fn query(&mut self, name: &str, function: u8, payload: &[u8]) -> AppResult<Tm1xFrame> {
        let frame = v1::encode(function, &self.settings.address, payload)?;
        send(&mut self.adapter, v1::PROTOCOL_NAME, &frame)?;
        let policy = self.settings.checksum_policy(name);
        receive::<Tm1xFormat, _>(&mut self.adapter, policy)
    }

    /// Crystal frequency with the metadata the device reports.
    pub fn get_frequency(&mut self) -> AppResult<FrequencyReading> {
        let code = self.settings.sample_rate.code();
        let frame = self.query(command_name::FREQUENCY, function::FREQUENCY, &[code, 0, 0, 0])?;
        let reading = FrequencyReading::decode(&frame.payload)?;
        debug!("TM1x frequency {:.2} Hz", reading.frequency);
        Ok(reading)
    }

    /// Product number as printed on the device.
    pub fn get_product_number(&mut self) -> AppResult<String> {
        let frame = self.query(command_name::PRODUCT_NUMBER, function::PRODUCT_NUMBER, &[])?;
        Ok(latin1_text(&frame.payload, Some(15), "Non-ASCII Product Number"))
    }

    /// Serial number, or a placeholder if the device returns control bytes.
    pub fn get_serial_number(&mut self) -> AppResult<String> {
        let frame = self.query(command_name::SERIAL_NUMBER, function::SERIAL_NUMBER, &[])?;
        Ok(latin1_text(&frame.payload, Some(13), "Non-ASCII Serial Number"))
    }

    /// Move the device to `address`; succeeds when it answers on the new address.
    pub fn set_device_address(&mut self, address: u8) -> AppResult<()> {
        check_address("Device address", address)?;
        self.readdress(function::SET_DEVICE_ADDRESS, address)?;
        self.settings.address.device_address = address;
        info!("TM1x device address set to {}", address);
        Ok(())
    }

    /// Move the device to logic group `group`; succeeds when it answers.
    pub fn set_logic_group(&mut self, group: u8) -> AppResult<()> {
        check_address("Logic group", group)?;
        self.readdress(function::SET_LOGIC_GROUP, group)?;
        self.settings.address.logic_group = group;
        info!("TM1x logic group set to {}", group);
        Ok(())
    }

    fn readdress(&mut self, function: u8, value: u8) -> AppResult<()> {
        let frame = v1::encode(function, &self.settings.address, &[value])?;
        self.adapter.clear_internal()?;
        send(&mut self.adapter, v1::PROTOCOL_NAME, &frame)?;
        thread::sleep(self.settings.settle_delay);

        if self.adapter.in_waiting()? == 0 {
            return Err(DaqError::NoResponse(format!(
                "no answer after changing address to {}",
                value
            )));
        }
        self.adapter.clear_internal()
    }

    /// Scan logic groups 1-254 for the one the device answers on.
    ///
    /// The session adopts the group found. When no group answers, the
    /// previous group is restored and `None` is returned.
    pub fn detect_logic_group(&mut self) -> AppResult<Option<u8>> {
        let previous = self.settings.address.logic_group;

        for group in 1..=254u8 {
            self.settings.address.logic_group = group;
            let frame = v1::encode(function::NO_OPERATION, &self.settings.address, &[])?;
            self.adapter.clear_internal()?;
            send(&mut self.adapter, v1::PROTOCOL_NAME, &frame)?;
            thread::sleep(self.settings.scan_timeout);

            if self.adapter.in_waiting()? > 0 {
                self.adapter.clear_internal()?;
                info!("TM1x answers on logic group {}", group);
                return Ok(Some(group));
            }
        }

        self.settings.address.logic_group = previous;
        info!("No TM1x answered on any logic group");
        Ok(None)
    }

    /// Take the current frequency as the zero-thickness baseline.
    pub fn reset_thickness(&mut self) -> AppResult<()> {
        let reading = self.get_frequency()?;
        if reading.frequency == 0.0 {
            return Err(DaqError::Configuration(
                "Crystal reports 0 Hz, cannot use it as initial frequency".to_string(),
            ));
        }
        self.initial_frequency = Some(reading.frequency);
        self.rate = self.rate.reset();
        info!("TM1x initial frequency {:.2} Hz", reading.frequency);
        Ok(())
    }
}

impl<A: Adapter> Device for Tm1x<A> {
    fn id(&self) -> &str {
        &self.id
    }

    fn state(&self) -> InstrumentState {
        self.state
    }

    fn gui_parameters(&self) -> Vec<GuiField> {
        vec![
            GuiField::choice("Device", vec!["TM13", "TM14"]),
            GuiField::choice(
                "Sample rate in Hz",
                SampleRate::ALL.iter().map(|rate| rate.hz()).collect::<Vec<f64>>(),
            ),
            GuiField::value("Density in g/cm^3", 1.3),
            GuiField::value("Acoustic impedance ratio", 1.0),
            GuiField::value("Tooling in %", 100.0),
        ]
    }

    fn apply_gui_parameters(&mut self, parameters: &GuiParameters) -> AppResult<()> {
        let model: Tm1xModel = parameters.string("Device")?.parse()?;
        let sample_rate = match model {
            Tm1xModel::Tm13 => SampleRate::Hz4,
            Tm1xModel::Tm14 => SampleRate::from_hz(parameters.f64("Sample rate in Hz")?)?,
        };
        let calibration = Calibration {
            density: parameters.f64("Density in g/cm^3")?,
            impedance_ratio: parameters.f64("Acoustic impedance ratio")?,
            tooling_factor: parameters.f64("Tooling in %")?,
        };
        calibration.validate()?;

        self.settings.model = model;
        self.settings.sample_rate = sample_rate;
        self.settings.calibration = calibration;
        Ok(())
    }

    fn variables(&self) -> Vec<Variable> {
        vec![
            Variable::new("Frequency", "Hz"),
            Variable::new("Thickness", "nm"),
            Variable::new("Rate", "A/s"),
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
        self.adapter.clear_internal()?;
        self.state = InstrumentState::Connected;
        info!(
            "{} connected at device address {}, logic group {}",
            self.settings.model,
            self.settings.address.device_address,
            self.settings.address.logic_group
        );
        Ok(())
    }

    fn disconnect(&mut self) -> AppResult<()> {
        self.state = InstrumentState::Disconnected;
        Ok(())
    }

    fn initialize(&mut self) -> AppResult<()> {
        self.reset_thickness()?;
        self.state = InstrumentState::Initialized;
        Ok(())
    }

    fn configure(&mut self) -> AppResult<()> {
        self.state = InstrumentState::Configured;
        Ok(())
    }

    fn call(&mut self) -> AppResult<Sample> {
        let initial_frequency = self.initial_frequency.ok_or_else(|| {
            DaqError::Instrument("TM1x not initialized, no initial frequency".to_string())
        })?;

        let reading = self.get_frequency()?;
        let mut sample = Sample::new(&self.id, Vec::with_capacity(3));
        let thickness = self
            .settings
            .calibration
            .thickness(reading.frequency, initial_frequency);
        let (rate, tracker) = self.rate.update(thickness, sample.seconds());
        self.rate = tracker;

        sample.values = vec![reading.frequency, thickness, rate];
        Ok(sample)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MockAdapter;

    fn frequency_answer(raw: u32) -> Vec<u8> {
        let mut payload = raw.to_be_bytes().to_vec();
        payload.extend_from_slice(&[2, 17, 250, 14]);
        v1::encode(function::FREQUENCY, &Tm1xAddress::default(), &payload).unwrap()
    }

    fn settings() -> Tm1xSettings {
        Tm1xSettings {
            settle_delay: Duration::ZERO,
            scan_timeout: Duration::ZERO,
            ..Tm1xSettings::default()
        }
    }

    #[test]
    fn test_sample_rate_codes() {
        assert_eq!(SampleRate::from_hz(10.0).unwrap().code(), 1);
        assert_eq!(SampleRate::from_hz(0.5).unwrap().code(), 5);
        assert!(SampleRate::from_hz(3.0).is_err());
    }

    #[test]
    fn test_model_parse() {
        assert_eq!("tm14".parse::<Tm1xModel>().unwrap(), Tm1xModel::Tm14);
        assert_eq!(Tm1xModel::Tm13.to_string(), "TM13");
        assert!("TM15".parse::<Tm1xModel>().is_err());
    }

    #[test]
    fn test_frequency_reading_metadata() {
        let mut payload = 600_000_000u32.to_be_bytes().to_vec();
        payload.extend_from_slice(&[1, 42, 100, 14]);
        let reading = FrequencyReading::decode(&payload).unwrap();
        assert_eq!(reading.frequency, 6_000_000.0);
        assert_eq!(reading.correction_connected, Some(true));
        assert_eq!(reading.counter, Some(42));
        assert_eq!(reading.duration_ms, Some(100));
        assert_eq!(reading.model, Some(14));

        let bare = FrequencyReading::decode(&600_000_123u32.to_be_bytes()).unwrap();
        assert_eq!(bare.frequency, 6_000_001.23);
        assert_eq!(bare.counter, None);
    }

    #[test]
    fn test_frequency_request_carries_rate_code() {
        let mut adapter = MockAdapter::new();
        adapter.queue_response(frequency_answer(600_000_000));
        let mut driver = Tm1x::new(
            adapter,
            Tm1xSettings {
                model: Tm1xModel::Tm14,
                sample_rate: SampleRate::Hz10,
                ..settings()
            },
        );

        driver.get_frequency().unwrap();
        let request = &driver.adapter().written()[0];
        assert_eq!(request[6], function::FREQUENCY);
        assert_eq!(&request[7..11], &[1, 0, 0, 0]);
    }

    #[test]
    fn test_checksum_override() {
        let mut overrides = BTreeMap::new();
        overrides.insert(command_name::FREQUENCY.to_string(), ChecksumPolicy::Strict);
        let settings = Tm1xSettings {
            checksum_overrides: overrides,
            ..settings()
        };
        assert_eq!(settings.checksum_policy("frequency"), ChecksumPolicy::Strict);
        assert_eq!(settings.checksum_policy("serial_number"), ChecksumPolicy::Lenient);
    }

    #[test]
    fn test_zero_baseline_rejected() {
        let mut adapter = MockAdapter::new();
        adapter.queue_response(frequency_answer(0));
        let mut driver = Tm1x::new(adapter, settings());
        driver.connect().unwrap();
        assert!(matches!(driver.initialize(), Err(DaqError::Configuration(_))));
    }

    #[test]
    fn test_address_out_of_range_sends_nothing() {
        let mut driver = Tm1x::new(MockAdapter::new(), settings());
        assert!(matches!(driver.set_device_address(0), Err(DaqError::Configuration(_))));
        assert!(matches!(driver.set_logic_group(255), Err(DaqError::Configuration(_))));
        assert!(driver.adapter().written().is_empty());
    }

    #[test]
    fn test_gui_parameters_tm13_forces_four_hz() {
        let mut driver = Tm1x::new(MockAdapter::new(), settings());
        let mut parameters = GuiParameters::defaults(&driver.gui_parameters());
        parameters.insert("Sample rate in Hz", 0.5);
        driver.apply_gui_parameters(&parameters).unwrap();
        assert_eq!(driver.settings().sample_rate, SampleRate::Hz4);

        parameters.insert("Device", "TM14");
        driver.apply_gui_parameters(&parameters).unwrap();
        assert_eq!(driver.settings().sample_rate, SampleRate::Hz0_5);

        parameters.insert("Tooling in %", -5.0);
        assert!(driver.apply_gui_parameters(&parameters).is_err());
    }
}
