//! TM13/TM14 frame codec
//!
//! ```text
//! [0xAA][length][device_addr][device_group][logic_group][driver_addr][function][payload ...][checksum]
//! ```
//!
//! The checksum covers every byte after the header. Responses carry the
//! same four routing bytes in reverse order (driver address first), which
//! does not matter for the sum. The payload always starts at offset 7.

use super::{check_frame_len, checksum, ChecksumPolicy, FrameFormat, MAX_PAYLOAD_LEN};
use crate::error::{AppResult, DaqError};
use serde::{Deserialize, Serialize};

/// First byte of every TM1x frame.
pub const HEADER: u8 = 0xAA;
/// Index of the first payload byte.
pub const PAYLOAD_OFFSET: usize = 7;
/// Name used in errors and logs.
pub const PROTOCOL_NAME: &str = "PREVAC TM1x";

/// Routing bytes of a TM1x frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tm1xAddress {
    /// Device address, 1-254.
    pub device_address: u8,
    /// Device group.
    pub device_group: u8,
    /// Logic group, 1-254.
    pub logic_group: u8,
    /// Host (driver) address.
    pub driver_address: u8,
}

impl Default for Tm1xAddress {
    fn default() -> Self {
        Self {
            device_address: 0xC8,
            device_group: 0xA1,
            logic_group: 0xC8,
            driver_address: 0x01,
        }
    }
}

impl Tm1xAddress {
    fn routing(&self) -> [u8; 4] {
        [
            self.device_address,
            self.device_group,
            self.logic_group,
            self.driver_address,
        ]
    }
}

/// A decoded TM1x frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tm1xFrame {
    /// The four routing bytes in wire order.
    pub routing: [u8; 4],
    /// Function code.
    pub function_code: u8,
    /// Payload bytes.
    pub payload: Vec<u8>,
    /// Checksum byte as received.
    pub checksum: u8,
}

/// Build the request frame for `function_code`.
pub fn encode(function_code: u8, address: &Tm1xAddress, payload: &[u8]) -> AppResult<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(DaqError::PayloadTooLong(payload.len()));
    }

    let mut frame = Vec::with_capacity(PAYLOAD_OFFSET + payload.len() + 1);
    frame.push(HEADER);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&address.routing());
    frame.push(function_code);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame[1..]));
    Ok(frame)
}

/// Decode a complete frame.
pub fn decode(bytes: &[u8], policy: ChecksumPolicy) -> AppResult<Tm1xFrame> {
    if bytes.first() != Some(&HEADER) {
        return Err(DaqError::framing(
            PROTOCOL_NAME,
            format!(
                "header does not match, expected {:#04X} received {:?}",
                HEADER,
                bytes.first()
            ),
        ));
    }
    let length = check_frame_len(PROTOCOL_NAME, bytes, Tm1x::ROUTING_LEN)?;

    let end = PAYLOAD_OFFSET + length;
    let received = bytes[end];
    policy.apply(PROTOCOL_NAME, checksum(&bytes[1..end]), received)?;

    Ok(Tm1xFrame {
        routing: [bytes[2], bytes[3], bytes[4], bytes[5]],
        function_code: bytes[6],
        payload: bytes[PAYLOAD_OFFSET..end].to_vec(),
        checksum: received,
    })
}

/// [`FrameFormat`] marker for the TM1x layout.
pub struct Tm1x;

impl FrameFormat for Tm1x {
    type Frame = Tm1xFrame;

    const NAME: &'static str = PROTOCOL_NAME;
    const HEADER: u8 = HEADER;
    const ROUTING_LEN: usize = 5;

    fn decode(bytes: &[u8], policy: ChecksumPolicy) -> AppResult<Tm1xFrame> {
        decode(bytes, policy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_layout() {
        let frame = encode(0x53, &Tm1xAddress::default(), &[0x02, 0x00, 0x00, 0x00]).unwrap();
        assert_eq!(
            frame,
            vec![0xAA, 0x04, 0xC8, 0xA1, 0xC8, 0x01, 0x53, 0x02, 0x00, 0x00, 0x00, 0x8B]
        );
    }

    #[test]
    fn test_empty_payload_checksum_is_sum_of_fixed_fields() {
        let address = Tm1xAddress::default();
        let frame = encode(0x10, &address, &[]).unwrap();
        let fixed = 0u32 + 0xC8 + 0xA1 + 0xC8 + 0x01 + 0x10;
        assert_eq!(*frame.last().unwrap() as u32, fixed % 256);
    }

    #[test]
    fn test_round_trip() {
        let address = Tm1xAddress {
            device_address: 0x05,
            device_group: 0x10,
            logic_group: 0x25,
            driver_address: 0x02,
        };
        for payload in [vec![], vec![0x01], (0..=254).collect::<Vec<u8>>()] {
            let frame = encode(0x53, &address, &payload).unwrap();
            let decoded = decode(&frame, ChecksumPolicy::Strict).unwrap();
            assert_eq!(decoded.function_code, 0x53);
            assert_eq!(decoded.payload, payload);
            assert_eq!(decoded.routing, [0x05, 0x10, 0x25, 0x02]);
        }
    }

    #[test]
    fn test_payload_too_long() {
        let payload = vec![0u8; 256];
        assert!(matches!(
            encode(0x53, &Tm1xAddress::default(), &payload),
            Err(DaqError::PayloadTooLong(256))
        ));
        assert!(encode(0x53, &Tm1xAddress::default(), &payload[..255]).is_ok());
    }

    #[test]
    fn test_bad_header() {
        let mut frame = encode(0x53, &Tm1xAddress::default(), &[1]).unwrap();
        frame[0] = 0xBB;
        assert!(matches!(
            decode(&frame, ChecksumPolicy::Strict),
            Err(DaqError::Framing { .. })
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut frame = encode(0x53, &Tm1xAddress::default(), &[1]).unwrap();
        frame.push(0x00);
        assert!(matches!(
            decode(&frame, ChecksumPolicy::Strict),
            Err(DaqError::Framing { .. })
        ));
    }

    #[test]
    fn test_checksum_policy() {
        let mut frame = encode(0x53, &Tm1xAddress::default(), &[1, 2, 3]).unwrap();
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);

        assert!(matches!(
            decode(&frame, ChecksumPolicy::Strict),
            Err(DaqError::Checksum { .. })
        ));
        let decoded = decode(&frame, ChecksumPolicy::Lenient).unwrap();
        assert_eq!(decoded.payload, vec![1, 2, 3]);
    }
}
