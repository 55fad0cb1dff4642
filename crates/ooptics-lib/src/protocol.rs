//! Wire constants for the Ocean Optics USB spectrometer command set.
//!
//! Every command is a single opcode byte written to the bound OUT pipe,
//! optionally followed by a packed argument. Responses arrive on the bound
//! IN pipe, except spectral payloads, which always arrive on the dedicated
//! bulk data pipe ([`EP_SPECTRUM_IN`]).
//!
//! ## Family differences
//!
//! - 2k family (USB2000, ADC1000, HR2000): status/control on `0x87`/`0x02`,
//!   integration time packed as `u16` milliseconds.
//! - 4k family (HR4000, USB4000, QE65000, ...): status/control on
//!   `0x81`/`0x01`, integration time packed as `u32` microseconds.

// ── Command opcodes ──

/// Reset the instrument. No response. 2k devices then emit one pending frame.
pub const CMD_RESET: u8 = 0x01;

/// Set integration time: opcode + little-endian packed value (width per family).
pub const CMD_SET_INTEGRATION_TIME: u8 = 0x02;

/// Read one EEPROM slot: opcode + slot byte. Response: [`EEPROM_RESPONSE_LEN`] bytes.
pub const CMD_QUERY_EEPROM: u8 = 0x05;

/// Request a spectrum. Response: payload packets + one [`SYNC_BYTE`].
pub const CMD_REQUEST_SPECTRUM: u8 = 0x09;

/// Request the status register. Response: [`STATUS_LEN`] bytes.
pub const CMD_QUERY_STATUS: u8 = 0xFE;

// ── EEPROM slots ──

/// Slot holding the unit's serial number.
pub const EEPROM_SLOT_SERIAL: u8 = 0;

/// First of the four wavelength calibration coefficient slots (1..=4).
pub const EEPROM_SLOT_FIRST_COEFFICIENT: u8 = 1;

/// Autonull / saturation info (4k family only). Response: [`AUTONULL_RESPONSE_LEN`] bytes.
pub const EEPROM_SLOT_AUTONULL: u8 = 0x11;

// ── Response sizes ──

/// Length of the status register.
pub const STATUS_LEN: usize = 17;

/// Length of an EEPROM slot response.
pub const EEPROM_RESPONSE_LEN: usize = 18;

/// Byte offset where the EEPROM slot string starts (after the echoed command).
pub const EEPROM_STRING_OFFSET: usize = 2;

/// Length of the autonull response.
pub const AUTONULL_RESPONSE_LEN: usize = 17;

/// Autonull bytes `[6..8]` hold the little-endian saturation level.
pub const AUTONULL_SATURATION_OFFSET: usize = 6;

/// Numerator of the saturation correction factor (`65536.0 / level`).
pub const SATURATION_NUMERATOR: f64 = 65536.0;

// ── Spectrum framing ──

/// Terminator byte that follows every spectral payload.
pub const SYNC_BYTE: u8 = 0x69;

/// Payload bytes in one spectrum frame, for every supported family.
pub const FRAME_PAYLOAD_LEN: usize = 4096;

/// Samples per frame (16-bit words).
pub const FRAME_SAMPLES: usize = FRAME_PAYLOAD_LEN / 2;

/// 2k family: number of (LSB packet, MSB packet) round-trips per frame.
pub const TWO_K_ROUND_TRIPS: usize = 32;

/// 2k family: bytes in each LSB or MSB half-packet.
pub const TWO_K_HALF_PACKET_LEN: usize = 64;

/// 2k family: MSBs carry a 12-bit A/D word, only the low nibble is valid.
pub const TWO_K_MSB_MASK: u8 = 0x0F;

/// 4k family, high-speed USB: packets per frame.
pub const HIGH_SPEED_PACKETS: usize = 8;

/// 4k family, high-speed USB: bytes per packet.
pub const HIGH_SPEED_PACKET_LEN: usize = 512;

/// 4k family, full-speed USB: packets per frame.
pub const FULL_SPEED_PACKETS: usize = 64;

/// 4k family, full-speed USB: bytes per packet.
pub const FULL_SPEED_PACKET_LEN: usize = 64;

/// Status byte 14 value reported by 4k devices on a 480 Mbps link.
pub const USB_HIGH_SPEED_MARKER: u8 = 128;

// ── Endpoints ──

/// Bulk IN pipe carrying spectral payloads (both families).
pub const EP_SPECTRUM_IN: u8 = 0x82;

/// 2k family status/control IN pipe.
pub const EP_TWO_K_STATUS_IN: u8 = 0x87;

/// 2k family command OUT pipe.
pub const EP_TWO_K_OUT: u8 = 0x02;

/// 4k family status/control IN pipe.
pub const EP_FOUR_K_STATUS_IN: u8 = 0x81;

/// 4k family command OUT pipe.
pub const EP_FOUR_K_OUT: u8 = 0x01;

// ── USB identifiers ──

/// Ocean Optics USB vendor ID.
pub const OCEAN_OPTICS_VID: u16 = 0x2457;

/// Default instrument timeout in milliseconds. Must exceed the integration time.
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;
