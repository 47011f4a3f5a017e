//! PREVAC serial frame codecs
//!
//! Both controller generations use the same frame skeleton:
//!
//! ```text
//! [header][length][routing bytes ...][payload ...][checksum]
//! ```
//!
//! - [`v1`]: TM13/TM14 protocol, header `0xAA`, four address bytes and a
//!   one-byte function code
//! - [`v2`]: PREVAC V2.x protocol (TMC13), header `0xBB`, device and host
//!   address and a two-byte command code
//!
//! The checksum is the modulo-256 sum of every byte after the header. The
//! two generations differ only in how many routing bytes sit between the
//! length field and the payload, so receiving a frame from a transport is
//! shared through [`FrameFormat`] and [`receive`].

pub mod v1;
pub mod v2;

use crate::adapters::Adapter;
use crate::error::{AppResult, DaqError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Largest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

/// Modulo-256 sum of `fields`.
pub fn checksum(fields: &[u8]) -> u8 {
    fields.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// How a received checksum mismatch is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChecksumPolicy {
    /// Mismatch is a [`DaqError::Checksum`].
    #[default]
    Strict,
    /// Mismatch is logged and the frame is accepted.
    Lenient,
    /// Checksum byte is read but not compared.
    Ignore,
}

impl ChecksumPolicy {
    pub(crate) fn apply(self, protocol: &'static str, calculated: u8, received: u8) -> AppResult<()> {
        if calculated == received {
            return Ok(());
        }
        match self {
            ChecksumPolicy::Strict => Err(DaqError::Checksum {
                protocol,
                calculated,
                received,
            }),
            ChecksumPolicy::Lenient => {
                warn!(
                    "{}: accepting frame with checksum mismatch (calculated {:#04X}, received {:#04X})",
                    protocol, calculated, received
                );
                Ok(())
            }
            ChecksumPolicy::Ignore => Ok(()),
        }
    }
}

/// Static description of one frame layout.
pub trait FrameFormat {
    /// Decoded frame type.
    type Frame;

    /// Name used in error messages and logs.
    const NAME: &'static str;

    /// Leading header byte.
    const HEADER: u8;

    /// Bytes between the length field and the payload.
    const ROUTING_LEN: usize;

    /// Decode one complete frame, header through checksum.
    fn decode(bytes: &[u8], policy: ChecksumPolicy) -> AppResult<Self::Frame>;
}

/// Read exactly one frame from `adapter` and decode it.
///
/// Bytes still pending on the transport after the frame mean the exchange
/// is out of step with the device; that is reported as a framing error.
/// The receive buffer is drained on every framing error so the next
/// request starts from an empty line.
pub fn receive<F, A>(adapter: &mut A, policy: ChecksumPolicy) -> AppResult<F::Frame>
where
    F: FrameFormat,
    A: Adapter + ?Sized,
{
    let raw = match read_frame::<F, A>(adapter) {
        Ok(raw) => raw,
        Err(err) => {
            if let Err(clear) = adapter.clear_internal() {
                warn!("{}: could not drain receive buffer: {}", F::NAME, clear);
            }
            return Err(err);
        }
    };
    F::decode(&raw, policy)
}

fn read_frame<F, A>(adapter: &mut A) -> AppResult<Vec<u8>>
where
    F: FrameFormat,
    A: Adapter + ?Sized,
{
    let head = read_exact(adapter, F::NAME, 2)?;
    if head[0] != F::HEADER {
        return Err(DaqError::framing(
            F::NAME,
            format!(
                "header does not match, expected {:#04X} received {:#04X}",
                F::HEADER,
                head[0]
            ),
        ));
    }

    let length = head[1] as usize;
    let rest = read_exact(adapter, F::NAME, F::ROUTING_LEN + length + 1)?;

    let mut raw = head;
    raw.extend_from_slice(&rest);
    debug!("{} <- {}", F::NAME, hex(&raw));

    let pending = adapter.in_waiting()?;
    if pending > 0 {
        return Err(DaqError::framing(
            F::NAME,
            format!("there are still {} bytes in waiting", pending),
        ));
    }
    Ok(raw)
}

/// Write an encoded frame and log it.
pub fn send<A: Adapter + ?Sized>(adapter: &mut A, protocol: &'static str, frame: &[u8]) -> AppResult<()> {
    debug!("{} -> {}", protocol, hex(frame));
    adapter.write(frame)
}

fn read_exact<A: Adapter + ?Sized>(adapter: &mut A, protocol: &'static str, count: usize) -> AppResult<Vec<u8>> {
    let bytes = adapter.read(count)?;
    if bytes.len() < count {
        return Err(DaqError::framing(
            protocol,
            format!("expected {} bytes, received {}", count, bytes.len()),
        ));
    }
    Ok(bytes)
}

/// Check that a complete frame has the length its length field announces.
pub(crate) fn check_frame_len(protocol: &'static str, bytes: &[u8], routing_len: usize) -> AppResult<usize> {
    if bytes.len() < 2 + routing_len + 1 {
        return Err(DaqError::framing(
            protocol,
            format!("frame of {} bytes is too short", bytes.len()),
        ));
    }
    let length = bytes[1] as usize;
    let expected = 2 + routing_len + length + 1;
    if bytes.len() != expected {
        return Err(DaqError::framing(
            protocol,
            format!(
                "length field announces {} payload bytes, frame holds {}",
                length,
                bytes.len() as isize - (2 + routing_len + 1) as isize
            ),
        ));
    }
    Ok(length)
}

/// Space separated upper-case hex dump.
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Big-endian IEEE-754 double from the first eight bytes.
pub fn read_f64_be(protocol: &'static str, bytes: &[u8]) -> AppResult<f64> {
    let raw: [u8; 8] = bytes
        .get(..8)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            DaqError::framing(
                protocol,
                format!("expected 8 bytes for a double, received {}", bytes.len()),
            )
        })?;
    Ok(f64::from_be_bytes(raw))
}

/// Big-endian u32 from the first four bytes.
pub fn read_u32_be(protocol: &'static str, bytes: &[u8]) -> AppResult<u32> {
    let raw: [u8; 4] = bytes
        .get(..4)
        .and_then(|slice| slice.try_into().ok())
        .ok_or_else(|| {
            DaqError::framing(
                protocol,
                format!("expected 4 bytes for an integer, received {}", bytes.len()),
            )
        })?;
    Ok(u32::from_be_bytes(raw))
}

/// Latin-1 text field truncated to `max_len` characters.
///
/// Devices pad text fields with NUL bytes; trailing padding is dropped.
/// Any other control character means the field is not text, and
/// `placeholder` is returned instead of an error.
pub fn latin1_text(bytes: &[u8], max_len: Option<usize>, placeholder: &str) -> String {
    let limit = max_len.unwrap_or(bytes.len()).min(bytes.len());
    let field = &bytes[..limit];
    let trimmed = match field.iter().rposition(|b| *b != 0x00) {
        Some(last) => &field[..=last],
        None => &field[..0],
    };

    if trimmed.iter().any(|b| b.is_ascii_control() || (0x80..0xA0).contains(b)) {
        warn!("Non-printable text field {}, using '{}'", hex(trimmed), placeholder);
        return placeholder.to_string();
    }

    trimmed.iter().map(|b| char::from(*b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_wraps_modulo_256() {
        let message = [0x04, 0xFF, 0x47, 0xFF, 0x01, 0x58, 0x00, 0x00, 0x00, 0xC8];
        assert_eq!(checksum(&message), 0x6A);
        assert_eq!(checksum(&[]), 0);
    }

    #[test]
    fn test_checksum_ignores_byte_order() {
        assert_eq!(checksum(&[1, 2, 3, 250]), checksum(&[250, 3, 2, 1]));
    }

    #[test]
    fn test_policy_lenient_accepts_mismatch() {
        assert!(ChecksumPolicy::Lenient.apply("test", 1, 2).is_ok());
        assert!(ChecksumPolicy::Ignore.apply("test", 1, 2).is_ok());
        assert!(matches!(
            ChecksumPolicy::Strict.apply("test", 1, 2),
            Err(DaqError::Checksum { calculated: 1, received: 2, .. })
        ));
    }

    #[test]
    fn test_latin1_text() {
        assert_eq!(latin1_text(b"021321000003302XYZ", Some(15), "?"), "021321000003302");
        assert_eq!(latin1_text(b"V1.2\0\0", None, "?"), "V1.2");
        assert_eq!(latin1_text(&[0xB5, b'm'], None, "?"), "µm");
        assert_eq!(latin1_text(&[0x01, 0x02], None, "Non-ASCII"), "Non-ASCII");
    }

    #[test]
    fn test_read_helpers() {
        let bytes = 6000.5f64.to_be_bytes();
        assert_eq!(read_f64_be("test", &bytes).unwrap(), 6000.5);
        assert!(read_f64_be("test", &bytes[..7]).is_err());
        assert_eq!(read_u32_be("test", &600_000_000u32.to_be_bytes()).unwrap(), 600_000_000);
    }

    #[test]
    fn test_bad_header_drains_receive_buffer() {
        use crate::adapters::MockAdapter;

        let mut adapter = MockAdapter::new();
        adapter.push_unsolicited(&[0x00, 0x00, 0xBB, 0x01, 0xC8, 0x01]);

        let result = receive::<v2::V2, _>(&mut adapter, ChecksumPolicy::Strict);
        assert!(matches!(result, Err(DaqError::Framing { .. })));
        assert_eq!(adapter.in_waiting().unwrap(), 0);
    }

    #[test]
    fn test_hex() {
        assert_eq!(hex(&[0xBB, 0x01, 0x0F]), "BB 01 0F");
    }
}
