//! Spectrum framing: packet reassembly, sync validation and sample decoding.
//!
//! A frame is always 4096 payload bytes on the bulk data pipe followed by a
//! single sync byte. The layout of the payload differs per family:
//!
//! - 2k: 32 round-trips of (64 LSBs, 64 MSBs). MSBs carry a 12-bit word so
//!   only the low nibble is kept. Samples decode as `i16` LE.
//! - 4k: a plain `u16` LE stream, split into 8×512 (high speed) or 64×64
//!   (full speed) packets.
//!
//! [`read_frame`] rebinds the IN pipe to [`EP_SPECTRUM_IN`] for the duration
//! of the read and always restores the status pipe before returning.

use serde::Serialize;

use crate::device::{DeviceError, Result};
use crate::protocol::{
    AUTONULL_SATURATION_OFFSET, EP_SPECTRUM_IN, FRAME_PAYLOAD_LEN, SATURATION_NUMERATOR,
    SYNC_BYTE, TWO_K_HALF_PACKET_LEN, TWO_K_MSB_MASK, TWO_K_ROUND_TRIPS,
};
use crate::status::UsbSpeed;
use crate::transport::{Direction, Transport};

/// Packet layout of one frame on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameLayout {
    TwoK,
    FourK(UsbSpeed),
}

/// One acquisition, in device units.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Spectrum {
    /// 2k family: raw 12-bit counts.
    Counts(Vec<i16>),
    /// 4k family: raw counts scaled by the saturation correction factor.
    Corrected(Vec<f64>),
}

impl Spectrum {
    pub fn len(&self) -> usize {
        match self {
            Spectrum::Counts(v) => v.len(),
            Spectrum::Corrected(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Samples widened to `f64`.
    pub fn to_f64(&self) -> Vec<f64> {
        match self {
            Spectrum::Counts(v) => v.iter().map(|&s| f64::from(s)).collect(),
            Spectrum::Corrected(v) => v.clone(),
        }
    }

    /// `(min, max, mean)` over all samples, or `None` for an empty spectrum.
    pub fn summary(&self) -> Option<(f64, f64, f64)> {
        let values = self.to_f64();
        if values.is_empty() {
            return None;
        }
        let min = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = values.iter().sum::<f64>() / values.len() as f64;
        Some((min, max, mean))
    }
}

// ── Pure decoding ──

/// Interleave one LSB packet with its MSB packet, masking each MSB to 4 bits.
pub fn interleave_two_k(lsb: &[u8], msb: &[u8], out: &mut Vec<u8>) {
    for (&lo, &hi) in lsb.iter().zip(msb) {
        out.push(lo);
        out.push(hi & TWO_K_MSB_MASK);
    }
}

pub fn decode_two_k(payload: &[u8]) -> Vec<i16> {
    payload
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn decode_four_k(payload: &[u8]) -> Vec<u16> {
    payload
        .chunks_exact(2)
        .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Saturation correction factor from an autonull (`0x05 0x11`) response:
/// `65536 / LE u16 at bytes 6..8`.
pub fn saturation_factor(autonull: &[u8]) -> Result<f64> {
    let level = autonull
        .get(AUTONULL_SATURATION_OFFSET..AUTONULL_SATURATION_OFFSET + 2)
        .map(|b| u16::from_le_bytes([b[0], b[1]]))
        .ok_or_else(|| {
            DeviceError::InvalidResponse(format!(
                "autonull: expected at least {} bytes, got {}",
                AUTONULL_SATURATION_OFFSET + 2,
                autonull.len()
            ))
        })?;
    if level == 0 {
        return Err(DeviceError::InvalidResponse(
            "autonull: saturation level is zero".into(),
        ));
    }
    Ok(SATURATION_NUMERATOR / f64::from(level))
}

pub fn apply_saturation(samples: &[u16], factor: f64) -> Vec<f64> {
    samples.iter().map(|&s| f64::from(s) * factor).collect()
}

/// Validate payload length and terminator.
pub fn check_frame(payload_len: usize, sync_byte: Option<u8>) -> Result<()> {
    if payload_len != FRAME_PAYLOAD_LEN || sync_byte != Some(SYNC_BYTE) {
        return Err(DeviceError::SyncError {
            sync_byte,
            payload_len,
        });
    }
    Ok(())
}

// ── Wire reads ──

/// Raw bytes received for one frame, before validation.
struct RawFrame {
    payload: Vec<u8>,
    received: usize,
    sync_byte: Option<u8>,
}

fn read_payload<T: Transport>(port: &mut T, layout: FrameLayout) -> Result<RawFrame> {
    let mut payload = Vec::with_capacity(FRAME_PAYLOAD_LEN);
    let mut received = 0;
    match layout {
        FrameLayout::TwoK => {
            for _ in 0..TWO_K_ROUND_TRIPS {
                let lsb = port.read(TWO_K_HALF_PACKET_LEN)?;
                let msb = port.read(TWO_K_HALF_PACKET_LEN)?;
                received += lsb.len() + msb.len();
                interleave_two_k(&lsb, &msb, &mut payload);
            }
        }
        FrameLayout::FourK(speed) => {
            let (packets, packet_len) = speed.packet_geometry();
            for _ in 0..packets {
                let packet = port.read(packet_len)?;
                received += packet.len();
                payload.extend_from_slice(&packet);
            }
        }
    }
    let sync_byte = port.read(1)?.first().copied();
    Ok(RawFrame {
        payload,
        received,
        sync_byte,
    })
}

/// Read one validated frame from the data pipe.
///
/// The IN binding is `status_endpoint` again on every return path. A
/// restore failure after a read error is logged and the read error wins.
pub fn read_frame<T: Transport>(
    port: &mut T,
    layout: FrameLayout,
    status_endpoint: u8,
) -> Result<Vec<u8>> {
    port.set_endpoint(Direction::In, EP_SPECTRUM_IN)?;
    log::debug!("IN endpoint -> 0x{EP_SPECTRUM_IN:02X} for {layout:?} frame");

    let frame = read_payload(port, layout);

    let restored = port.set_endpoint(Direction::In, status_endpoint);
    let frame = match (frame, restored) {
        (Ok(frame), Ok(())) => frame,
        (Ok(_), Err(e)) => return Err(e.into()),
        (Err(e), Ok(())) => return Err(e),
        (Err(e), Err(restore_err)) => {
            log::warn!("IN endpoint restore to 0x{status_endpoint:02X} failed: {restore_err}");
            return Err(e);
        }
    };

    check_frame(frame.received, frame.sync_byte)?;
    Ok(frame.payload)
}
