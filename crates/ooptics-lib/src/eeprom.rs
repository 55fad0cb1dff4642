//! EEPROM slot decoding and wavelength calibration coefficients.

use serde::Serialize;

use crate::device::{DeviceError, Result};
use crate::protocol::{EEPROM_RESPONSE_LEN, EEPROM_SLOT_FIRST_COEFFICIENT, EEPROM_STRING_OFFSET};

/// Extract the slot string from an EEPROM response.
///
/// The response echoes the command in bytes 0..2; the string runs from byte 2
/// up to the first null. A response with no null in the 18-byte window is
/// malformed. Bytes map one-to-one onto chars (Latin-1), so nothing is lost.
pub fn decode_slot(slot: u8, response: &[u8]) -> Result<String> {
    let window = &response[..response.len().min(EEPROM_RESPONSE_LEN)];
    let malformed = || DeviceError::MalformedEeprom {
        slot,
        response: window.to_vec(),
    };
    let body = window.get(EEPROM_STRING_OFFSET..).ok_or_else(malformed)?;
    let end = body.iter().position(|&b| b == 0).ok_or_else(malformed)?;
    Ok(body[..end].iter().copied().map(char::from).collect())
}

/// Pixel-to-wavelength polynomial `a + b·p + c·p² + d·p³`, from EEPROM slots 1–4.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationCoefficients {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
}

impl CalibrationCoefficients {
    pub fn new(a: f64, b: f64, c: f64, d: f64) -> Self {
        CalibrationCoefficients { a, b, c, d }
    }

    /// Parse the four slot strings (slots 1, 2, 3, 4 in order).
    pub fn from_slots(values: [&str; 4]) -> Result<Self> {
        let mut parsed = [0.0f64; 4];
        for (i, (value, out)) in values.iter().zip(parsed.iter_mut()).enumerate() {
            *out = parse_numeral(EEPROM_SLOT_FIRST_COEFFICIENT + i as u8, value)?;
        }
        let [a, b, c, d] = parsed;
        Ok(CalibrationCoefficients { a, b, c, d })
    }

    /// Coefficients in ascending power order.
    pub fn as_array(&self) -> [f64; 4] {
        [self.a, self.b, self.c, self.d]
    }
}

fn parse_numeral(slot: u8, value: &str) -> Result<f64> {
    value
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
        .ok_or_else(|| DeviceError::InvalidCoefficient {
            slot,
            value: value.to_string(),
        })
}
