//! Request/response plumbing shared by the TMC13 drivers.
//!
//! [`TmcLink`] owns the transport and the session addressing (device
//! address, host address assigned at registration, thickness channel). Every
//! command is one request frame and one response frame; the response is
//! decoded with the strict V2.x rules, so checksum mismatches and fault
//! bytes surface before any value is extracted.

use crate::adapters::Adapter;
use crate::error::{AppResult, DaqError};
use crate::protocol::v2::{self, Command, StatusCode, V2Address, V2};
use crate::protocol::{latin1_text, read_f64_be, receive, send, ChecksumPolicy};
use log::{debug, info, warn};

/// V2.x command codes used by the TMC13 drivers (read form).
pub mod command {
    use crate::protocol::v2::Command;

    /// Chamber pressure.
    pub const PRESSURE: Command = Command(0x0101);
    /// Pressure unit code.
    pub const PRESSURE_UNIT: Command = Command(0x0103);
    /// Crystal frequency.
    pub const CRYSTAL_FREQUENCY: Command = Command(0x0201);
    /// Thickness in Å.
    pub const THICKNESS: Command = Command(0x0202);
    /// Thickness unit code.
    pub const THICKNESS_UNIT: Command = Command(0x0203);
    /// Deposition rate.
    pub const RATE: Command = Command(0x0204);
    /// Rate unit code.
    pub const RATE_UNIT: Command = Command(0x0205);
    /// Shutter state.
    pub const SHUTTER: Command = Command(0x0207);
    /// Tooling factor.
    pub const TOOLING: Command = Command(0x020D);
    /// Lower crystal frequency.
    pub const FREQUENCY_MIN: Command = Command(0x020E);
    /// Upper crystal frequency.
    pub const FREQUENCY_MAX: Command = Command(0x020F);
    /// Zero the thickness.
    pub const RESET_THICKNESS: Command = Command(0x0211);
    /// Material density.
    pub const DENSITY: Command = Command(0x0214);
    /// Acoustic impedance.
    pub const ACOUSTIC_IMPEDANCE: Command = Command(0x0215);
    /// Product number.
    pub const PRODUCT_NUMBER: Command = Command(0x7F01);
    /// Serial number.
    pub const SERIAL_NUMBER: Command = Command(0x7F02);
    /// Firmware version.
    pub const DEVICE_VERSION: Command = Command(0x7F03);
    /// Error register.
    pub const ERROR_STATUS: Command = Command(0x7F51);
    /// Warning register.
    pub const WARNING_STATUS: Command = Command(0x7F52);
    /// Host registration.
    pub const HOST: Command = Command(0x7FF0);
    /// Remote-control status.
    pub const MASTER_STATUS: Command = Command(0x7FF1);
    /// Assign (0x01) or release (0x00) master; a write-only command.
    pub const MASTER_CONTROL: Command = Command(0xFFF1);
}

/// Remote-control status byte returned by [`command::MASTER_STATUS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MasterStatus(pub u8);

impl MasterStatus {
    /// This host is master.
    pub fn is_master(&self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Remote control is enabled on the device.
    pub fn remote_control_enabled(&self) -> bool {
        self.0 & 0x04 != 0
    }

    /// This host is registered.
    pub fn host_registered(&self) -> bool {
        self.0 & 0x08 != 0
    }

    /// Another host holds master.
    pub fn other_master_present(&self) -> bool {
        self.0 & 0x10 != 0
    }
}

/// Unit fields are sent either as a raw number or as an ASCII digit.
fn unit_code(byte: u8) -> u8 {
    if byte.is_ascii_digit() {
        byte - b'0'
    } else {
        byte
    }
}

/// Thickness unit for a unit code.
pub fn thickness_unit(code: u8) -> Option<&'static str> {
    match unit_code(code) {
        0 => Some("Å"),
        1 => Some("kÅ"),
        2 => Some("nm"),
        _ => None,
    }
}

/// Rate unit for a unit code.
pub fn rate_unit(code: u8) -> Option<&'static str> {
    match unit_code(code) {
        4 => Some("Å/s"),
        5 => Some("kÅ/s"),
        6 => Some("nm/s"),
        8 => Some("Å/min"),
        9 => Some("kÅ/min"),
        10 => Some("nm/min"),
        12 => Some("Å/h"),
        13 => Some("kÅ/h"),
        14 => Some("nm/h"),
        _ => None,
    }
}

/// Pressure unit for a unit code.
pub fn pressure_unit(code: u8) -> Option<&'static str> {
    match unit_code(code) {
        0 => Some("mbar"),
        1 => Some("Torr"),
        2 => Some("Pa"),
        3 => Some("psia"),
        _ => None,
    }
}

/// Exclusive V2.x session with one TMC13.
pub struct TmcLink<A: Adapter> {
    adapter: A,
    address: V2Address,
    channel: u8,
}

impl<A: Adapter> TmcLink<A> {
    /// Session on `adapter`, channel 1, unregistered.
    pub fn new(adapter: A) -> Self {
        Self {
            adapter,
            address: V2Address::default(),
            channel: 1,
        }
    }

    /// Underlying transport.
    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Underlying transport.
    pub fn adapter_mut(&mut self) -> &mut A {
        &mut self.adapter
    }

    /// Current device and host address.
    pub fn address(&self) -> V2Address {
        self.address
    }

    /// Selected channel 1-6.
    pub fn channel(&self) -> u8 {
        self.channel
    }

    /// Select the thickness channel (1-6) used by channel commands.
    pub fn set_channel(&mut self, channel: u8) -> AppResult<()> {
        if !(1..=6).contains(&channel) {
            return Err(DaqError::Configuration(format!(
                "Channel {} out of range, expected 1-6",
                channel
            )));
        }
        self.channel = channel;
        Ok(())
    }

    /// One round trip; returns the response payload.
    pub fn transact(&mut self, command: Command, payload: &[u8]) -> AppResult<Vec<u8>> {
        let frame = v2::encode(command, &self.address, payload)?;
        send(&mut self.adapter, v2::PROTOCOL_NAME, &frame)?;
        let response = receive::<V2, _>(&mut self.adapter, ChecksumPolicy::Strict)?;
        Ok(response.payload)
    }

    /// Read a double for the selected channel.
    ///
    /// Some commands echo the channel in front of the value; a 9-byte
    /// payload has its first byte stripped.
    pub fn read_double(&mut self, command: Command) -> AppResult<f64> {
        let channel = self.channel;
        let payload = self.transact(command, &[channel])?;
        let value = if payload.len() >= 9 {
            &payload[1..]
        } else {
            &payload[..]
        };
        read_f64_be(v2::PROTOCOL_NAME, value)
    }

    /// Write a double for the selected channel; the answer is only checked for faults.
    pub fn write_double(&mut self, command: Command, value: f64) -> AppResult<()> {
        let mut payload = Vec::with_capacity(9);
        payload.push(self.channel);
        payload.extend_from_slice(&value.to_be_bytes());
        self.transact(command.write(), &payload)?;
        Ok(())
    }

    /// Read a one-byte unit code for the selected channel.
    fn read_unit(
        &mut self,
        command: Command,
        lookup: fn(u8) -> Option<&'static str>,
    ) -> AppResult<&'static str> {
        let channel = self.channel;
        let payload = self.transact(command, &[channel])?;
        let code = *payload.get(1).or(payload.first()).ok_or_else(|| {
            DaqError::framing(v2::PROTOCOL_NAME, format!("empty answer to {}", command))
        })?;
        lookup(code).ok_or_else(|| {
            DaqError::Instrument(format!("Unknown unit code {} in answer to {}", code, command))
        })
    }

    // -------------------------------------------------------------------------
    // Remote control
    // -------------------------------------------------------------------------

    /// Register `unique_id` and adopt the host address the device assigns.
    pub fn register_host(&mut self, unique_id: &str) -> AppResult<u8> {
        let id: Vec<u8> = unique_id
            .chars()
            .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
            .collect();
        let payload = self.transact(command::HOST, &id)?;
        let host = *payload.first().ok_or_else(|| {
            DaqError::framing(v2::PROTOCOL_NAME, "registration answer carries no host address")
        })?;
        info!("Registered host '{}' as address {:#04X}", unique_id, host);
        self.address.host = host;
        Ok(host)
    }

    /// Host address the device currently knows this link by.
    pub fn get_host(&mut self) -> AppResult<u8> {
        let payload = self.transact(command::HOST, &[])?;
        payload.first().copied().ok_or_else(|| {
            DaqError::framing(v2::PROTOCOL_NAME, "host answer carries no address")
        })
    }

    /// Read and log the remote-control status.
    pub fn master_status(&mut self) -> AppResult<MasterStatus> {
        let payload = self.transact(command::MASTER_STATUS, &[])?;
        let status = MasterStatus(*payload.first().ok_or_else(|| {
            DaqError::framing(v2::PROTOCOL_NAME, "master status answer is empty")
        })?);

        // A partially set status still allows remote control, so only log.
        if !status.is_master() {
            debug!("Not working as master");
        }
        if !status.remote_control_enabled() {
            debug!("Remote control not enabled on the device");
        }
        if !status.host_registered() {
            debug!("Host not registered");
        }
        if status.other_master_present() {
            debug!("Another master host is present");
        }
        Ok(status)
    }

    /// Take remote control of the device.
    pub fn assign_master(&mut self) -> AppResult<()> {
        self.master_control(0x01, "assign master to")
    }

    /// Hand back remote control.
    pub fn release_master(&mut self) -> AppResult<()> {
        self.master_control(0x00, "release master from")
    }

    fn master_control(&mut self, code: u8, what: &str) -> AppResult<()> {
        let answer = self.transact(command::MASTER_CONTROL, &[code])?;
        if answer != [0x00] {
            return Err(DaqError::Instrument(format!(
                "Could not {} device, answer {:?}",
                what, answer
            )));
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Identification
    // -------------------------------------------------------------------------

    /// Product number, 15 characters.
    pub fn product_number(&mut self) -> AppResult<String> {
        let payload = self.transact(command::PRODUCT_NUMBER, &[])?;
        Ok(latin1_text(&payload, Some(15), "Non-ASCII Product Number"))
    }

    /// Serial number, 13 characters.
    pub fn serial_number(&mut self) -> AppResult<String> {
        let payload = self.transact(command::SERIAL_NUMBER, &[])?;
        Ok(latin1_text(&payload, Some(13), "Non-ASCII Serial Number"))
    }

    /// Firmware version text.
    pub fn device_version(&mut self) -> AppResult<String> {
        let payload = self.transact(command::DEVICE_VERSION, &[])?;
        Ok(latin1_text(&payload, None, "Non-ASCII Version"))
    }

    // -------------------------------------------------------------------------
    // Device status
    // -------------------------------------------------------------------------

    /// Entry `index` of the device error list, `None` when it holds no known code.
    pub fn error_status(&mut self, index: u8) -> AppResult<Option<StatusCode>> {
        let code = self.read_status(command::ERROR_STATUS, index)?;
        let status = v2::error_status_message(code).map(|message| StatusCode { code, message });
        if let Some(status) = status {
            warn!("Device error {:#06X}: {}", status.code, status.message);
        }
        Ok(status)
    }

    /// Entry `index` of the device warning list, `None` when it holds no known code.
    pub fn warning_status(&mut self, index: u8) -> AppResult<Option<StatusCode>> {
        let code = self.read_status(command::WARNING_STATUS, index)?;
        let status = v2::warning_status_message(code).map(|message| StatusCode { code, message });
        if let Some(status) = status {
            warn!("Device warning {:#06X}: {}", status.code, status.message);
        }
        Ok(status)
    }

    /// Status code after the echoed index byte, big-endian.
    fn read_status(&mut self, command: Command, index: u8) -> AppResult<u16> {
        let payload = self.transact(command, &[index])?;
        let code = payload
            .iter()
            .skip(1)
            .take(2)
            .fold(0u16, |code, byte| (code << 8) | u16::from(*byte));
        Ok(code)
    }

    // -------------------------------------------------------------------------
    // Channel quantities
    // -------------------------------------------------------------------------

    /// Unit of the thickness display.
    pub fn thickness_unit(&mut self) -> AppResult<&'static str> {
        self.read_unit(command::THICKNESS_UNIT, thickness_unit)
    }

    /// Unit of the rate display.
    pub fn rate_unit(&mut self) -> AppResult<&'static str> {
        self.read_unit(command::RATE_UNIT, rate_unit)
    }

    /// Unit of the pressure display.
    pub fn pressure_unit(&mut self) -> AppResult<&'static str> {
        self.read_unit(command::PRESSURE_UNIT, pressure_unit)
    }
}
