//! PREVAC V2.x frame codec (TMC13 and later controllers)
//!
//! ```text
//! [0xBB][length][device_addr][host_addr][cmd_msb][cmd_lsb][payload ...][checksum]
//! ```
//!
//! Bit 15 of the command code selects write (1) or read (0). The checksum
//! is the modulo-256 sum of every byte after the start byte and is always
//! verified. When a request fails, the device answers with a fault code in
//! the last payload byte.

use super::{check_frame_len, checksum, ChecksumPolicy, FrameFormat, MAX_PAYLOAD_LEN};
use crate::error::{AppResult, DaqError, DeviceFault};
use serde::{Deserialize, Serialize};
use std::fmt;

/// First byte of every V2.x frame.
pub const START_BYTE: u8 = 0xBB;
/// Index of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 6;
/// Name used in errors and logs.
pub const PROTOCOL_NAME: &str = "PREVAC TMC13";

/// Two-byte V2.x command code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Command(pub u16);

impl Command {
    /// Set on the most significant byte of write commands.
    pub const WRITE_BIT: u16 = 0x8000;

    /// The write form of this command.
    pub const fn write(self) -> Self {
        Command(self.0 | Self::WRITE_BIT)
    }

    /// Whether this is the write form.
    pub const fn is_write(self) -> bool {
        self.0 & Self::WRITE_BIT != 0
    }

    /// High byte on the wire.
    pub const fn msb(self) -> u8 {
        (self.0 >> 8) as u8
    }

    /// Low byte on the wire.
    pub const fn lsb(self) -> u8 {
        (self.0 & 0xFF) as u8
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06X}", self.0)
    }
}

/// Device and host address of a V2.x exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct V2Address {
    /// Device address.
    pub device: u8,
    /// Assigned to the host by the device during registration.
    pub host: u8,
}

impl Default for V2Address {
    fn default() -> Self {
        Self {
            device: 0x01,
            host: 0xFF,
        }
    }
}

/// A decoded V2.x frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct V2Frame {
    /// Device address.
    pub device: u8,
    /// Host address.
    pub host: u8,
    /// Command code.
    pub command: Command,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
}

/// Build the request frame for `command`.
pub fn encode(command: Command, address: &V2Address, payload: &[u8]) -> AppResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(DaqError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(PAYLOAD_OFFSET + payload.len() + 1);
    frame.push(START_BYTE);
    frame.push(payload.len() as u8);
    frame.push(address.device);
    frame.push(address.host);
    frame.push(command.msb());
    frame.push(command.lsb());
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[1..]));
    Ok(frame)
}

/// Decode a complete frame, verify its checksum and reject fault answers.
pub fn decode(bytes: &[u8]) -> AppResult<V2Frame> {
    if bytes.first() != Some(&START_BYTE) {
        return Err(DaqError::framing(
            PROTOCOL_NAME,
            format!(
                "returned message does not start with {:#04X}, received {:?}",
                START_BYTE,
                bytes.first()
            ),
        ));
    }
    let length = check_frame_len(PROTOCOL_NAME, bytes, V2::ROUTING_LEN)?;

    let end = PAYLOAD_OFFSET + length;
    let received = bytes[end];
    ChecksumPolicy::Strict.apply(PROTOCOL_NAME, checksum(&bytes[1..end]), received)?;

    let payload = &bytes[PAYLOAD_OFFSET..end];
    check_fault(payload)?;

    Ok(V2Frame {
        device: bytes[2],
        host: bytes[3],
        command: Command(u16::from_be_bytes([bytes[4], bytes[5]])),
        payload: payload.to_vec(),
        checksum: received,
    })
}

/// Fail with the fault named by the last payload byte, if it is a fault code.
///
/// Every answer is checked, including numeric ones. A double whose least
/// significant byte happens to be 0x91-0x99 is reported as a fault.
pub fn check_fault(payload: &[u8]) -> AppResult<()> {
    match payload.last().copied().and_then(DeviceFault::from_code) {
        Some(fault) => Err(DaqError::DeviceFault(fault)),
        None => Ok(()),
    }
}

/// [`FrameFormat`] marker for the V2.x layout.
pub struct V2;

impl FrameFormat for V2 {
    type Frame = V2Frame;

    const NAME: &'static str = PROTOCOL_NAME;
    const HEADER: u8 = START_BYTE;
    const ROUTING_LEN: usize = 4;

    /// V2.x checksums are always verified; `policy` is not consulted.
    fn decode(bytes: &[u8], _policy: ChecksumPolicy) -> AppResult<V2Frame> {
        decode(bytes)
    }
}

/// Status code reported by the device error/warning registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatusCode {
    /// Register value.
    pub code: u16,
    /// Text for the value.
    pub message: &'static str,
}

/// Messages for codes read from the error register (`0x7F51`).
pub fn error_status_message(code: u16) -> Option<&'static str> {
    let message = match code {
        0x7F01 => "Internal communication error",
        0x7F02 => "Communication with Anybus module error",
        0x7F03 => "Communication with Bluetooth Anybus module error",
        0x7F04 => "Critically low disk space",
        0x4101 => "DC module is not available",
        0x4102 => "The connection to Bus has been lost",
        0x4103 => "DC power supply is damaged or short circuit",
        0x4104 => "HV power supply is damaged",
        0x4105 => "HV power supply has short circuit",
        0x4106 => "Main power failure",
        0x4107 => "Safety relay failure",
        0x10 => "Crystals head during movement",
        0x11 => "Stepper motor type for crystals head assigned to other channel",
        0x12 => "TM assigned to other crystals head",
        0x13 => "The crystals head must first be calibrated",
        0x14 => "Calibration not available",
        0x15 => "The crystals head does not have an assigned TM channel",
        0x16 => "No assigned relay output",
        0x17 => "Relay output assigned to another function",
        0x18 => "Parameter for a different type of magazine",
        0x80 => "CTR90 head not selected to set FS",
        0x81 => "MKS870 head not selected to set FS",
        0x82 => "Gas type not selected",
        0x83 => "Meter damaged",
        0x84 => "Selected head does not support degas function",
        0x85 => "Vacuum is too low to start system degassing",
        0x86 => "Selected head does not support emission function",
        _ => return None,
    };
    Some(message)
}

/// Messages for codes read from the warning register (`0x7F52`).
pub fn warning_status_message(code: u16) -> Option<&'static str> {
    let message = match code {
        0x7F80 => "Low disk space",
        0x7F06 => "Invalid read of the internal temperature of the device",
        0x7F07 => "The internal temperature of the device is above safe level",
        0x7F08 => "The internal temperature of the unit is too high, switching to standby mode",
        0x4180 => "DC no load or the connection is broken",
        0x4181 => "DC current has reached the limit",
        0x4182 => "Emission current has reached the limit",
        0x4183 => "No external interlock",
        0x4184 => "No vacuum interlock",
        _ => return None,
    };
    Some(message)
}
