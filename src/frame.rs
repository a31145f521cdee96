//! ==============================================================================
//! frame.rs - notification frame decoder
//! ==============================================================================
//!
//! purpose:
//!     turns one raw notification payload into a Reading, or rejects it.
//!
//! wire layout (32 bytes, little-endian):
//!
//!     offset  0   4   8   12   16        20           24   28
//!             pm1 pm25 pm4 pm10 humidity temperature voc  nox
//!
//!     each slot is an ieee-754 f32. nothing but the length is checked:
//!     out-of-range and non-finite values are passed through as-is.
//!
//! relationships:
//!     - used by: supervisor.rs (every notification goes through decode_frame)
//!     - used by: link.rs (simulated link builds frames with encode_frame)
//!
//! ==============================================================================

use crate::domain::Reading;
use thiserror::Error;

/// exact size of a sensor frame
pub const FRAME_LEN: usize = 32;

const SLOT: usize = 4;

/// rejected payloads are dumped up to this many bytes
const DUMP_LIMIT: usize = 64;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("unexpected frame length: {0} bytes (expected 32)")]
    Length(usize),
}

/// parse a payload without side effects
pub fn parse_frame(payload: &[u8]) -> Result<Reading, FrameError> {
    let bytes: &[u8; FRAME_LEN] = payload
        .try_into()
        .map_err(|_| FrameError::Length(payload.len()))?;

    let mut values = [0f32; 8];
    for (value, chunk) in values.iter_mut().zip(bytes.chunks_exact(SLOT)) {
        // chunks_exact(4) always yields 4-byte slices
        *value = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
    }
    Ok(Reading::from_values(values))
}

/// decode a payload, logging a single diagnostic when it is rejected
pub fn decode_frame(payload: &[u8]) -> Option<Reading> {
    match parse_frame(payload) {
        Ok(reading) => Some(reading),
        Err(e) => {
            tracing::warn!(len = payload.len(), raw = %dump(payload), "{}. skipping", e);
            None
        }
    }
}

/// hex of the first DUMP_LIMIT bytes, ".." marks a cut
fn dump(payload: &[u8]) -> String {
    let mut out = hex::encode(&payload[..payload.len().min(DUMP_LIMIT)]);
    if payload.len() > DUMP_LIMIT {
        out.push_str("..");
    }
    out
}

/// inverse of parse_frame
#[cfg_attr(feature = "bluetooth", allow(dead_code))]
pub fn encode_frame(reading: &Reading) -> [u8; FRAME_LEN] {
    let mut out = [0u8; FRAME_LEN];
    for (chunk, value) in out.chunks_exact_mut(SLOT).zip(reading.values()) {
        chunk.copy_from_slice(&value.to_le_bytes());
    }
    out
}
