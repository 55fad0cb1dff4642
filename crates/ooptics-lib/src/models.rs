//! Model registry: one descriptor per supported model code.
//!
//! The code is what the instrument reports as its VISA model code (the USB
//! product ID). Models are grouped into protocol families; per-model quirks
//! are plain descriptor fields rather than separate types.
//!
//! This table is the only place new instrument models are added.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::device::{DeviceError, Result};
use crate::protocol::{EP_FOUR_K_OUT, EP_FOUR_K_STATUS_IN, EP_TWO_K_OUT, EP_TWO_K_STATUS_IN};

/// Protocol family shared by a group of models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Family {
    /// 12-bit A/D, nibble-masked MSB packets, millisecond integration time.
    TwoK,
    /// 16-bit A/D, speed-dependent packet geometry, microsecond integration time.
    FourK,
    /// No family-specific protocol block yet.
    NirQuest,
    /// No family-specific protocol block yet.
    Maya,
}

impl fmt::Display for Family {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Family::TwoK => write!(f, "2k"),
            Family::FourK => write!(f, "4k"),
            Family::NirQuest => write!(f, "NIRQuest"),
            Family::Maya => write!(f, "Maya"),
        }
    }
}

/// Byte order of a multi-byte status field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ByteOrder {
    Little,
    Big,
}

/// Static description of one instrument model.
#[derive(Debug, PartialEq, Serialize)]
pub struct ModelDescriptor {
    /// Model code reported by the device.
    pub code: u16,
    pub name: &'static str,
    pub family: Family,
    /// IN pipe for status and control responses.
    pub status_in_endpoint: u8,
    /// OUT pipe for commands.
    pub out_endpoint: u8,
    /// Shortest integration time the firmware accepts.
    pub min_integration_time: Duration,
    /// Full-scale raw count.
    pub max_counts: u32,
    /// Byte order of the pixel-count status field.
    ///
    /// The USB2000 reports it big-endian, unlike every other model.
    pub pixel_count_order: ByteOrder,
}

const fn two_k(code: u16, name: &'static str, pixel_count_order: ByteOrder) -> ModelDescriptor {
    ModelDescriptor {
        code,
        name,
        family: Family::TwoK,
        status_in_endpoint: EP_TWO_K_STATUS_IN,
        out_endpoint: EP_TWO_K_OUT,
        min_integration_time: Duration::from_millis(3),
        max_counts: 4096,
        pixel_count_order,
    }
}

const fn four_k_endpoints(code: u16, name: &'static str, family: Family) -> ModelDescriptor {
    ModelDescriptor {
        code,
        name,
        family,
        status_in_endpoint: EP_FOUR_K_STATUS_IN,
        out_endpoint: EP_FOUR_K_OUT,
        min_integration_time: Duration::from_micros(10),
        max_counts: 65536,
        pixel_count_order: ByteOrder::Little,
    }
}

const fn four_k(code: u16, name: &'static str) -> ModelDescriptor {
    four_k_endpoints(code, name, Family::FourK)
}

pub static USB2000: ModelDescriptor = two_k(4098, "USB2000", ByteOrder::Big);
pub static ADC1000: ModelDescriptor = two_k(4100, "ADC1000", ByteOrder::Little);
pub static HR2000: ModelDescriptor = two_k(4106, "HR2000", ByteOrder::Little);
pub static HR4000: ModelDescriptor = four_k(4114, "HR4000");
pub static HR2000_PLUS: ModelDescriptor = four_k(4118, "HR2000+");
pub static QE65000: ModelDescriptor = four_k(4120, "QE65000");
pub static USB2000_PLUS: ModelDescriptor = four_k(4126, "USB2000+");
pub static USB4000: ModelDescriptor = four_k(4130, "USB4000");
pub static NIRQUEST_512: ModelDescriptor = four_k_endpoints(4134, "NIRQuest512", Family::NirQuest);
pub static NIRQUEST_256: ModelDescriptor = four_k_endpoints(4136, "NIRQuest256", Family::NirQuest);
pub static MAYA_PRO: ModelDescriptor = four_k_endpoints(4138, "Maya Pro", Family::Maya);
pub static MAYA: ModelDescriptor = four_k_endpoints(4140, "Maya", Family::Maya);
pub static TORUS: ModelDescriptor = four_k(4160, "Torus");

static MODELS: [&ModelDescriptor; 13] = [
    &USB2000,
    &ADC1000,
    &HR2000,
    &HR4000,
    &HR2000_PLUS,
    &QE65000,
    &USB2000_PLUS,
    &USB4000,
    &NIRQUEST_512,
    &NIRQUEST_256,
    &MAYA_PRO,
    &MAYA,
    &TORUS,
];

/// All registered models, in model-code order.
pub fn all() -> &'static [&'static ModelDescriptor] {
    &MODELS
}

/// Resolve a device-reported model code to its descriptor.
pub fn resolve(code: u16) -> Result<&'static ModelDescriptor> {
    MODELS
        .iter()
        .copied()
        .find(|m| m.code == code)
        .ok_or(DeviceError::UnsupportedModel(code))
}

/// Look up a model by its name (case-insensitive, e.g. "usb4000").
pub fn detect_model(name: &str) -> Option<&'static ModelDescriptor> {
    let name = name.trim();
    MODELS
        .iter()
        .copied()
        .find(|m| m.name.eq_ignore_ascii_case(name))
}

/// Parse a model given either as a numeric code or as a name.
pub fn parse_model(s: &str) -> Result<&'static ModelDescriptor> {
    let s = s.trim();
    let code = if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u16::from_str_radix(hex, 16).ok()
    } else {
        s.parse::<u16>().ok()
    };
    match code {
        Some(code) => resolve(code),
        None => detect_model(s).ok_or_else(|| {
            DeviceError::InvalidParameter(format!("unknown model name \"{s}\""))
        }),
    }
}
