//! RS-232 transport built on `serialport`.

use super::Adapter;
use crate::config::PortConfig;
use crate::error::{AppResult, DaqError};
use log::debug;
use std::time::Duration;

#[cfg(feature = "instrument_serial")]
use serialport::SerialPort;

/// Serial adapter for RS-232 communication
///
/// Wraps the serialport crate with raw, unterminated byte I/O. The PREVAC
/// protocols are binary, so no line terminators are added or stripped.
pub struct SerialAdapter {
    /// Port name (e.g., "/dev/ttyUSB0", "COM3")
    port_name: String,

    /// Baud rate (57600 for both PREVAC controllers by default)
    baud_rate: u32,

    /// Read timeout
    timeout: Duration,

    /// The open serial port, `None` until [`SerialAdapter::connect`]
    #[cfg(feature = "instrument_serial")]
    port: Option<Box<dyn SerialPort>>,
}

impl SerialAdapter {
    /// Create a new serial adapter with default settings
    ///
    /// # Arguments
    /// * `port_name` - Serial port path (e.g., "/dev/ttyUSB0", "COM3")
    /// * `baud_rate` - Communication speed (e.g., 57600)
    pub fn new(port_name: String, baud_rate: u32) -> Self {
        Self {
            port_name,
            baud_rate,
            timeout: Duration::from_secs(1),
            #[cfg(feature = "instrument_serial")]
            port: None,
        }
    }

    /// Create an adapter from the `[port]` configuration section.
    pub fn from_config(config: &PortConfig) -> Self {
        let mut adapter = Self::new(config.path.clone(), config.baud_rate);
        adapter.timeout = Duration::from_millis(config.timeout_ms);
        adapter
    }

    /// Port name this adapter was created for.
    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Open the port with 8 data bits, no parity and one stop bit.
    pub fn connect(&mut self) -> AppResult<()> {
        #[cfg(feature = "instrument_serial")]
        {
            let port = serialport::new(&self.port_name, self.baud_rate)
                .data_bits(serialport::DataBits::Eight)
                .parity(serialport::Parity::None)
                .stop_bits(serialport::StopBits::One)
                .flow_control(serialport::FlowControl::None)
                .timeout(self.timeout)
                .open()
                .map_err(|e| {
                    DaqError::Instrument(format!(
                        "Failed to open serial port '{}' at {} baud: {}",
                        self.port_name, self.baud_rate, e
                    ))
                })?;

            self.port = Some(port);

            debug!(
                "Serial port '{}' opened at {} baud",
                self.port_name, self.baud_rate
            );
            Ok(())
        }

        #[cfg(not(feature = "instrument_serial"))]
        {
            Err(DaqError::SerialFeatureDisabled)
        }
    }

    /// Close the port. Closing an unopened adapter is a no-op.
    pub fn disconnect(&mut self) {
        #[cfg(feature = "instrument_serial")]
        {
            if self.port.take().is_some() {
                debug!("Serial port '{}' closed", self.port_name);
            }
        }
    }

    #[cfg(feature = "instrument_serial")]
    fn port_mut(&mut self) -> AppResult<&mut Box<dyn SerialPort>> {
        self.port.as_mut().ok_or(DaqError::SerialPortNotConnected)
    }
}

#[cfg(feature = "instrument_serial")]
impl Adapter for SerialAdapter {
    fn write(&mut self, bytes: &[u8]) -> AppResult<()> {
        use std::io::Write;

        let port = self.port_mut()?;
        port.write_all(bytes)?;
        port.flush()?;
        Ok(())
    }

    fn read(&mut self, count: usize) -> AppResult<Vec<u8>> {
        use std::io::Read;

        let timeout = self.timeout;
        let port = self.port_mut()?;
        let mut buffer = vec![0u8; count];
        let mut filled = 0;
        let start = std::time::Instant::now();

        while filled < count {
            if start.elapsed() > timeout {
                break;
            }
            match port.read(&mut buffer[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }

        buffer.truncate(filled);
        Ok(buffer)
    }

    fn in_waiting(&mut self) -> AppResult<usize> {
        let port = self.port_mut()?;
        let pending = port
            .bytes_to_read()
            .map_err(|e| DaqError::Instrument(format!("Failed to query input buffer: {}", e)))?;
        Ok(pending as usize)
    }

    fn clear_internal(&mut self) -> AppResult<()> {
        let port = self.port_mut()?;
        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| DaqError::Instrument(format!("Failed to clear input buffer: {}", e)))
    }
}

#[cfg(not(feature = "instrument_serial"))]
impl Adapter for SerialAdapter {
    fn write(&mut self, _bytes: &[u8]) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn read(&mut self, _count: usize) -> AppResult<Vec<u8>> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn in_waiting(&mut self) -> AppResult<usize> {
        Err(DaqError::SerialFeatureDisabled)
    }

    fn clear_internal(&mut self) -> AppResult<()> {
        Err(DaqError::SerialFeatureDisabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serial_adapter_creation() {
        let adapter = SerialAdapter::new("/dev/ttyUSB0".to_string(), 57600);
        assert_eq!(adapter.port_name(), "/dev/ttyUSB0");
        assert_eq!(adapter.baud_rate, 57600);
        assert_eq!(adapter.timeout, Duration::from_secs(1));
    }

    #[test]
    fn test_from_config() {
        let config = PortConfig {
            path: "COM3".to_string(),
            baud_rate: 9600,
            timeout_ms: 250,
        };
        let adapter = SerialAdapter::from_config(&config);
        assert_eq!(adapter.port_name(), "COM3");
        assert_eq!(adapter.baud_rate, 9600);
        assert_eq!(adapter.timeout, Duration::from_millis(250));
    }

    #[cfg(feature = "instrument_serial")]
    #[test]
    fn test_io_before_connect_fails() {
        let mut adapter = SerialAdapter::new("/dev/null".to_string(), 57600);
        assert!(matches!(
            adapter.write(&[0xAA]),
            Err(DaqError::SerialPortNotConnected)
        ));
        assert!(matches!(
            adapter.in_waiting(),
            Err(DaqError::SerialPortNotConnected)
        ));
    }
}
