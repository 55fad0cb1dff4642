//! Status register decoding.
//!
//! The 17-byte record returned by `0xFE` has a family-specific layout:
//!
//! | field               | 2k              | 4k               |
//! |---------------------|-----------------|------------------|
//! | pixel count         | 0..2 (LE or BE) | 0..2 LE          |
//! | integration time    | 2..4 LE, ms     | 2..6 LE, µs      |
//! | lamp enabled        | 4               | 6                |
//! | trigger mode        | 5               | 7                |
//! | request in progress | 6               |                  |
//! | timer mode          | 7               |                  |
//! | data ready          | 8               | 8                |
//! | counters            |                 | 9, 10, 11        |
//! | USB speed marker    |                 | 14               |
//!
//! NIRQuest and Maya share only the family-independent fields (pixel count,
//! data ready); every other accessor returns `None` for them.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::device::{DeviceError, Result};
use crate::models::{ByteOrder, Family, ModelDescriptor};
use crate::protocol::{
    FULL_SPEED_PACKET_LEN, FULL_SPEED_PACKETS, HIGH_SPEED_PACKET_LEN, HIGH_SPEED_PACKETS,
    STATUS_LEN, USB_HIGH_SPEED_MARKER,
};

/// Negotiated USB link speed of a 4k-family device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum UsbSpeed {
    /// 480 Mbps.
    High,
    /// 12 Mbps.
    Full,
}

impl UsbSpeed {
    pub fn from_marker(marker: u8) -> Self {
        if marker == USB_HIGH_SPEED_MARKER {
            UsbSpeed::High
        } else {
            UsbSpeed::Full
        }
    }

    /// Spectrum packet geometry: `(packet count, bytes per packet)`.
    pub fn packet_geometry(self) -> (usize, usize) {
        match self {
            UsbSpeed::High => (HIGH_SPEED_PACKETS, HIGH_SPEED_PACKET_LEN),
            UsbSpeed::Full => (FULL_SPEED_PACKETS, FULL_SPEED_PACKET_LEN),
        }
    }
}

impl fmt::Display for UsbSpeed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UsbSpeed::High => write!(f, "high"),
            UsbSpeed::Full => write!(f, "full"),
        }
    }
}

/// One read of the status register. Never cached; re-query before relying on a field.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusSnapshot {
    raw: [u8; STATUS_LEN],
    family: Family,
    pixel_count_order: ByteOrder,
}

impl StatusSnapshot {
    /// Interpret a raw status record for `model`.
    pub fn decode(bytes: &[u8], model: &ModelDescriptor) -> Result<Self> {
        let raw: [u8; STATUS_LEN] = bytes.try_into().map_err(|_| {
            DeviceError::InvalidResponse(format!(
                "status: expected {STATUS_LEN} bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(StatusSnapshot {
            raw,
            family: model.family,
            pixel_count_order: model.pixel_count_order,
        })
    }

    pub fn raw(&self) -> &[u8; STATUS_LEN] {
        &self.raw
    }

    pub fn family(&self) -> Family {
        self.family
    }

    fn u16_le(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.raw[offset], self.raw[offset + 1]])
    }

    fn two_k(&self) -> bool {
        self.family == Family::TwoK
    }

    fn four_k(&self) -> bool {
        self.family == Family::FourK
    }

    pub fn pixel_count(&self) -> u16 {
        let bytes = [self.raw[0], self.raw[1]];
        match self.pixel_count_order {
            ByteOrder::Little => u16::from_le_bytes(bytes),
            ByteOrder::Big => u16::from_be_bytes(bytes),
        }
    }

    /// Current integration time (2k: millisecond resolution, 4k: microsecond).
    pub fn integration_time(&self) -> Option<Duration> {
        match self.family {
            Family::TwoK => Some(Duration::from_millis(u64::from(self.u16_le(2)))),
            Family::FourK => {
                let us = u32::from_le_bytes([self.raw[2], self.raw[3], self.raw[4], self.raw[5]]);
                Some(Duration::from_micros(u64::from(us)))
            }
            Family::NirQuest | Family::Maya => None,
        }
    }

    pub fn lamp_enabled(&self) -> Option<bool> {
        match self.family {
            Family::TwoK => Some(self.raw[4] != 0),
            Family::FourK => Some(self.raw[6] != 0),
            Family::NirQuest | Family::Maya => None,
        }
    }

    pub fn trigger_mode(&self) -> Option<u8> {
        match self.family {
            Family::TwoK => Some(self.raw[5]),
            Family::FourK => Some(self.raw[7]),
            Family::NirQuest | Family::Maya => None,
        }
    }

    pub fn request_in_progress(&self) -> Option<bool> {
        self.two_k().then(|| self.raw[6] != 0)
    }

    pub fn timer_mode(&self) -> Option<u8> {
        self.two_k().then(|| self.raw[7])
    }

    pub fn data_ready(&self) -> bool {
        self.raw[8] != 0
    }

    pub fn packets_in_spectrum(&self) -> Option<u8> {
        self.four_k().then(|| self.raw[9])
    }

    pub fn power_on_status(&self) -> Option<u8> {
        self.four_k().then(|| self.raw[10])
    }

    pub fn packet_count(&self) -> Option<u8> {
        self.four_k().then(|| self.raw[11])
    }

    pub fn usb_speed(&self) -> Option<UsbSpeed> {
        self.four_k().then(|| UsbSpeed::from_marker(self.raw[14]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models;

    fn record(fill: &[(usize, u8)]) -> [u8; STATUS_LEN] {
        let mut raw = [0u8; STATUS_LEN];
        for &(i, b) in fill {
            raw[i] = b;
        }
        raw
    }

    // ── Length checks ──

    #[test]
    fn decode_rejects_wrong_length() {
        for len in [0, 16, 18] {
            let err = StatusSnapshot::decode(&vec![0; len], &models::USB4000).unwrap_err();
            assert!(matches!(err, DeviceError::InvalidResponse(_)), "len {len}");
        }
    }

    // ── 2k layout ──

    #[test]
    fn two_k_fields() {
        let raw = record(&[
            (0, 0x00),
            (1, 0x08),
            (2, 0xE8),
            (3, 0x03),
            (4, 1),
            (5, 2),
            (6, 1),
            (7, 5),
            (8, 1),
        ]);
        let s = StatusSnapshot::decode(&raw, &models::HR2000).unwrap();
        assert_eq!(s.pixel_count(), 2048);
        assert_eq!(s.integration_time(), Some(Duration::from_millis(1000)));
        assert_eq!(s.lamp_enabled(), Some(true));
        assert_eq!(s.trigger_mode(), Some(2));
        assert_eq!(s.request_in_progress(), Some(true));
        assert_eq!(s.timer_mode(), Some(5));
        assert!(s.data_ready());
        assert_eq!(s.usb_speed(), None);
        assert_eq!(s.packet_count(), None);
    }

    #[test]
    fn usb2000_pixel_count_big_endian() {
        let raw = record(&[(0, 0x08), (1, 0x00)]);
        let usb2000 = StatusSnapshot::decode(&raw, &models::USB2000).unwrap();
        let adc1000 = StatusSnapshot::decode(&raw, &models::ADC1000).unwrap();
        assert_eq!(usb2000.pixel_count(), 2048);
        assert_eq!(adc1000.pixel_count(), 8);
    }

    // ── 4k layout ──

    #[test]
    fn four_k_fields() {
        // 100_000 µs = 0x0001_86A0
        let raw = record(&[
            (0, 0x00),
            (1, 0x0E),
            (2, 0xA0),
            (3, 0x86),
            (4, 0x01),
            (5, 0x00),
            (6, 1),
            (7, 3),
            (8, 0),
            (9, 8),
            (10, 1),
            (11, 4),
            (14, 128),
        ]);
        let s = StatusSnapshot::decode(&raw, &models::USB4000).unwrap();
        assert_eq!(s.pixel_count(), 3584);
        assert_eq!(s.integration_time(), Some(Duration::from_micros(100_000)));
        assert_eq!(s.lamp_enabled(), Some(true));
        assert_eq!(s.trigger_mode(), Some(3));
        assert!(!s.data_ready());
        assert_eq!(s.packets_in_spectrum(), Some(8));
        assert_eq!(s.power_on_status(), Some(1));
        assert_eq!(s.packet_count(), Some(4));
        assert_eq!(s.usb_speed(), Some(UsbSpeed::High));
        assert_eq!(s.request_in_progress(), None);
        assert_eq!(s.timer_mode(), None);
    }

    #[test]
    fn four_k_lamp_reads_byte_six_not_four() {
        let raw = record(&[(4, 1)]);
        let s = StatusSnapshot::decode(&raw, &models::HR4000).unwrap();
        assert_eq!(s.lamp_enabled(), Some(false));
    }

    #[test]
    fn usb_speed_marker() {
        assert_eq!(UsbSpeed::from_marker(128), UsbSpeed::High);
        assert_eq!(UsbSpeed::from_marker(0), UsbSpeed::Full);
        assert_eq!(UsbSpeed::from_marker(129), UsbSpeed::Full);
        assert_eq!(UsbSpeed::High.packet_geometry(), (8, 512));
        assert_eq!(UsbSpeed::Full.packet_geometry(), (64, 64));
        assert_eq!(UsbSpeed::High.to_string(), "high");
    }

    // ── NIRQuest / Maya ──

    #[test]
    fn nirquest_exposes_only_common_fields() {
        let raw = record(&[(0, 0x00), (1, 0x02), (8, 1), (14, 128)]);
        let s = StatusSnapshot::decode(&raw, &models::NIRQUEST_512).unwrap();
        assert_eq!(s.pixel_count(), 512);
        assert!(s.data_ready());
        assert_eq!(s.integration_time(), None);
        assert_eq!(s.lamp_enabled(), None);
        assert_eq!(s.usb_speed(), None);
        assert_eq!(s.family(), Family::NirQuest);
    }
}
