use crate::error::SessionError;

/// Decodes a BLE Heart Rate Measurement (0x2a37) notification payload.
///
/// Byte 0 is the flags byte; bit 0 selects the value width: 0 means byte 1
/// holds a u8 reading, 1 means bytes 1..3 hold a little-endian u16 reading.
/// Trailing fields (sensor contact, energy expended, RR intervals) are
/// ignored. Timestamping is the caller's job.
pub fn decode_heart_rate(payload: &[u8]) -> Result<u16, SessionError> {
    let flags = *payload.first().ok_or(SessionError::MalformedPayload {
        expected: 2,
        actual: 0,
    })?;

    if flags & 0x01 == 0 {
        match payload.get(1) {
            Some(&bpm) => Ok(u16::from(bpm)),
            None => Err(SessionError::MalformedPayload {
                expected: 2,
                actual: payload.len(),
            }),
        }
    } else if payload.len() < 3 {
        Err(SessionError::MalformedPayload {
            expected: 3,
            actual: payload.len(),
        })
    } else {
        Ok(u16::from_le_bytes([payload[1], payload[2]]))
    }
}
