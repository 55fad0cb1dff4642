//! ooptics: USB protocol core for Ocean Optics spectrometers.

pub mod calibration;
pub mod config;
pub mod device;
pub mod eeprom;
pub mod error;
pub mod models;
pub mod protocol;
pub mod spectrum;
pub mod status;
pub mod transport;

pub use device::{DeviceError, SessionState, Spectrometer};
pub use error::OpticsError;
