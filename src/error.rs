//! Custom error types for the drivers.
//!
//! `DaqError` is the single error type returned by the frame codecs, the
//! command layers and the [`Device`](crate::core::Device) lifecycle. It is
//! built with `thiserror` so lower-level errors convert with `?`.
//!
//! ## Error Hierarchy
//!
//! - **`Framing`**: the received bytes do not form a valid frame (wrong
//!   header, short read, residual bytes left on the transport).
//! - **`Checksum`**: the trailing checksum does not match the received fields.
//! - **`DeviceFault`**: the instrument answered with one of the eight
//!   V2.x fault codes, see [`DeviceFault`].
//! - **`Configuration`**: a parameter was rejected before any device I/O
//!   (address out of range, non-positive calibration value, zero baseline).
//! - **`NoResponse`**: an address or logic-group change was not acknowledged.
//!
//! Every variant is fatal for the call that produced it. Nothing is retried.

use thiserror::Error;

/// Convenience alias for results using the driver error type.
pub type AppResult<T> = std::result::Result<T, DaqError>;

/// Errors raised by the drivers and their transport.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Loading or validating the configuration failed.
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// A parameter value cannot be used.
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// Transport I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The device answered but not as expected.
    #[error("Instrument error: {0}")]
    Instrument(String),

    /// The serial port is not open.
    #[error("Serial port not connected")]
    SerialPortNotConnected,

    /// Serial support is compiled out.
    #[error("Serial support not enabled. Rebuild with --features instrument_serial")]
    SerialFeatureDisabled,

    /// A frame is short, badly headed or followed by residual bytes.
    #[error("{protocol}: framing error: {detail}")]
    Framing {
        /// Frame family, for messages.
        protocol: &'static str,
        /// What was wrong.
        detail: String,
    },

    /// Strict checksum mismatch.
    #[error("{protocol}: checksums do not match (calculated {calculated:#04X}, received {received:#04X})")]
    Checksum {
        /// Frame family, for messages.
        protocol: &'static str,
        /// Checksum computed over the received bytes.
        calculated: u8,
        /// Checksum byte on the wire.
        received: u8,
    },

    /// Payload longer than 255 bytes.
    #[error("Payload of {0} bytes does not fit the 1-byte length field")]
    PayloadTooLong(usize),

    /// Fault code in a V2.x answer.
    #[error("Device fault: {0}")]
    DeviceFault(#[from] DeviceFault),

    /// Nothing arrived within the wait time.
    #[error("No response from device: {0}")]
    NoResponse(String),

    /// `run_action` was given a name the driver does not know.
    #[error("Unknown action '{0}'")]
    UnknownAction(String),
}

impl DaqError {
    pub(crate) fn framing(protocol: &'static str, detail: impl Into<String>) -> Self {
        DaqError::Framing {
            protocol,
            detail: detail.into(),
        }
    }
}

/// Fault conditions reported in the last payload byte of a V2.x response.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceFault {
    /// 0x91
    #[error("Value is too large")]
    ValueTooLarge,
    /// 0x92
    #[error("Value is too small")]
    ValueTooSmall,
    /// 0x93
    #[error("Wrong parameter (probably wrong data format or index out of range)")]
    WrongParameter,
    /// 0x95
    #[error("Read only parameter, write prohibited")]
    ReadOnly,
    /// 0x96
    #[error("Host not known and not registered")]
    HostNotRegistered,
    /// 0x97
    #[error("Host known but not selected to remote control")]
    HostNotSelected,
    /// 0x98
    #[error("Device configured to work in local mode")]
    LocalMode,
    /// 0x99
    #[error("Operation or parameter is not available")]
    NotAvailable,
}

impl DeviceFault {
    /// Map a reserved fault byte to its fault, `None` for ordinary data bytes.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x91 => Some(DeviceFault::ValueTooLarge),
            0x92 => Some(DeviceFault::ValueTooSmall),
            0x93 => Some(DeviceFault::WrongParameter),
            0x95 => Some(DeviceFault::ReadOnly),
            0x96 => Some(DeviceFault::HostNotRegistered),
            0x97 => Some(DeviceFault::HostNotSelected),
            0x98 => Some(DeviceFault::LocalMode),
            0x99 => Some(DeviceFault::NotAvailable),
            _ => None,
        }
    }

    /// Wire code of this fault.
    pub fn code(self) -> u8 {
        match self {
            DeviceFault::ValueTooLarge => 0x91,
            DeviceFault::ValueTooSmall => 0x92,
            DeviceFault::WrongParameter => 0x93,
            DeviceFault::ReadOnly => 0x95,
            DeviceFault::HostNotRegistered => 0x96,
            DeviceFault::HostNotSelected => 0x97,
            DeviceFault::LocalMode => 0x98,
            DeviceFault::NotAvailable => 0x99,
        }
    }
}
