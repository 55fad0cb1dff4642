//! Device session: probe, lifecycle and every instrument operation.
//!
//! A [`Spectrometer`] binds one instrument through a [`Connector`]. Building
//! one probes the device's model code over a transient port; [`open`] then
//! claims a durable port, binds the family's endpoints and resets the unit.
//!
//! ```text
//! Unopened ──open──> Open ──close──> Closed
//! ```
//!
//! A closed session cannot be reopened; build a new one.
//!
//! [`open`]: Spectrometer::open

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::calibration::{self, CalibratedSpectrum};
use crate::eeprom::{self, CalibrationCoefficients};
use crate::models::{self, Family, ModelDescriptor};
use crate::protocol::*;
use crate::spectrum::{self, FrameLayout, Spectrum};
use crate::status::{StatusSnapshot, UsbSpeed};
use crate::transport::{Connector, Direction, PlatformConnector, Transport, TransportError};

// ── Error type ──

/// Session errors.
///
/// String payloads follow the convention **"context: details"** where
/// *context* names the operation or record being decoded.
#[derive(Debug)]
pub enum DeviceError {
    /// Model code not in the registry.
    UnsupportedModel(u16),
    /// Device reports a different model than the caller declared.
    ModelMismatch { reported: u16, expected: u16 },
    /// Operation on an unopened or closed session.
    SessionClosed,
    AlreadyOpen,
    /// No null terminator inside the EEPROM response window.
    MalformedEeprom { slot: u8, response: Vec<u8> },
    /// Frame length or terminator check failed. The instrument is out of sync.
    SyncError {
        sync_byte: Option<u8>,
        payload_len: usize,
    },
    InvalidParameter(String),
    /// Family-specific operation on a family without a protocol block for it.
    Unsupported {
        model: &'static str,
        operation: &'static str,
    },
    InvalidCoefficient { slot: u8, value: String },
    InvalidResponse(String),
    Transport(TransportError),
}

impl fmt::Display for DeviceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceError::UnsupportedModel(code) => {
                write!(f, "Unsupported model code {code} (0x{code:04X})")
            }
            DeviceError::ModelMismatch { reported, expected } => write!(
                f,
                "Model mismatch: device reports model code {reported}, expected {expected}"
            ),
            DeviceError::SessionClosed => write!(f, "Session is not open"),
            DeviceError::AlreadyOpen => write!(f, "Session is already open"),
            DeviceError::MalformedEeprom { slot, response } => write!(
                f,
                "Malformed EEPROM slot {slot}: no terminator in {} bytes",
                response.len()
            ),
            DeviceError::SyncError {
                sync_byte,
                payload_len,
            } => {
                let terminator = match sync_byte {
                    Some(b) => format!("0x{b:02X}"),
                    None => "missing".to_string(),
                };
                write!(
                    f,
                    "Spectrum frame out of sync: {payload_len} payload bytes (expected \
                     {FRAME_PAYLOAD_LEN}), terminator {terminator} (expected 0x{SYNC_BYTE:02X}). \
                     Close and reopen the session; a power cycle may be required"
                )
            }
            DeviceError::InvalidParameter(e) => write!(f, "Invalid parameter: {e}"),
            DeviceError::Unsupported { model, operation } => {
                write!(f, "{operation} is not supported on the {model}")
            }
            DeviceError::InvalidCoefficient { slot, value } => {
                write!(f, "Invalid calibration coefficient in slot {slot}: {value:?}")
            }
            DeviceError::InvalidResponse(e) => write!(f, "Invalid response: {e}"),
            DeviceError::Transport(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DeviceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DeviceError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for DeviceError {
    fn from(e: TransportError) -> Self {
        DeviceError::Transport(e)
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;

// ── Session ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Unopened,
    Open,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unopened => write!(f, "unopened"),
            SessionState::Open => write!(f, "open"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Read the model code over a transient port, then release it.
fn probe<C: Connector>(connector: &C, resource: &str) -> Result<u16> {
    let mut port = connector.connect(resource)?;
    let code = port.model_code();
    if let Err(e) = port.close() {
        log::warn!("probe port close failed for {resource}: {e}");
    }
    Ok(code?)
}

/// One instrument binding.
///
/// Not `Sync`; callers sharing a session across threads must serialize access.
pub struct Spectrometer<C: Connector = PlatformConnector> {
    connector: C,
    resource: String,
    timeout: Duration,
    model: &'static ModelDescriptor,
    port: Option<C::Port>,
    state: SessionState,
    /// Last value written with `set_integration_time`.
    integration_time: Option<Duration>,
    // Write-once; valid for the life of the connection.
    usb_speed: Option<UsbSpeed>,
    saturation_factor: Option<f64>,
}

impl<C: Connector> Spectrometer<C> {
    /// Probe `resource` and bind it as `expected_code`.
    ///
    /// Fails with `UnsupportedModel` if the reported code is not registered and
    /// `ModelMismatch` if it differs from `expected_code`. No port stays open.
    pub fn new(
        connector: C,
        resource: impl Into<String>,
        expected_code: u16,
        timeout: Duration,
    ) -> Result<Self> {
        let resource = resource.into();
        let reported = probe(&connector, &resource)?;
        let model = models::resolve(reported)?;
        if reported != expected_code {
            return Err(DeviceError::ModelMismatch {
                reported,
                expected: expected_code,
            });
        }
        Self::bind(connector, resource, model, timeout)
    }

    /// Probe `resource` and bind whatever registered model it reports.
    pub fn autodetect(connector: C, resource: impl Into<String>, timeout: Duration) -> Result<Self> {
        let resource = resource.into();
        let reported = probe(&connector, &resource)?;
        let model = models::resolve(reported)?;
        log::debug!("autodetected {} (model code {reported}) at {resource}", model.name);
        Self::bind(connector, resource, model, timeout)
    }

    fn bind(
        connector: C,
        resource: String,
        model: &'static ModelDescriptor,
        timeout: Duration,
    ) -> Result<Self> {
        if timeout.is_zero() {
            return Err(DeviceError::InvalidParameter("timeout must be non-zero".into()));
        }
        Ok(Spectrometer {
            connector,
            resource,
            timeout,
            model,
            port: None,
            state: SessionState::Unopened,
            integration_time: None,
            usb_speed: None,
            saturation_factor: None,
        })
    }

    pub fn model(&self) -> &'static ModelDescriptor {
        self.model
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SessionState::Open
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Change the instrument timeout. Must exceed the integration time last set.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if timeout.is_zero() {
            return Err(DeviceError::InvalidParameter("timeout must be non-zero".into()));
        }
        if let Some(it) = self.integration_time {
            if timeout <= it {
                return Err(DeviceError::InvalidParameter(format!(
                    "timeout {timeout:?} must exceed integration time {it:?}"
                )));
            }
        }
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    // ── Lifecycle ──

    /// Claim the port, bind endpoints and reset the instrument.
    ///
    /// 2k devices emit one frame after reset; it is read and discarded here.
    /// Any failure after the port is claimed releases it and closes the session.
    pub fn open(&mut self) -> Result<()> {
        match self.state {
            SessionState::Unopened => {}
            SessionState::Open => return Err(DeviceError::AlreadyOpen),
            SessionState::Closed => return Err(DeviceError::SessionClosed),
        }

        let port = self.connector.connect(&self.resource)?;
        self.port = Some(port);
        self.state = SessionState::Open;

        if let Err(e) = self.initialize() {
            self.release();
            return Err(e);
        }

        log::info!(
            "opened {} ({} family) at {}",
            self.model.name,
            self.model.family,
            self.resource
        );
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        let model = self.model;
        let timeout = self.timeout;
        let port = self.port_mut()?;
        port.set_timeout(timeout)?;
        port.set_endpoint(Direction::In, model.status_in_endpoint)?;
        port.set_endpoint(Direction::Out, model.out_endpoint)?;
        port.write(&[CMD_RESET])?;

        // The reset already queued one frame; drain it without requesting another.
        if model.family == Family::TwoK {
            let _ = self.read_two_k_frame()?;
            log::debug!("discarded post-reset frame");
        }
        Ok(())
    }

    /// Release the port and move to `Closed`. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<()> {
        let port = self.port.take();
        self.state = SessionState::Closed;
        if let Some(mut port) = port {
            port.close()?;
            log::info!("closed {} at {}", self.model.name, self.resource);
        }
        Ok(())
    }

    fn release(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("closing {} failed: {e}", self.resource);
        }
    }

    /// Open, run `f`, and close on every exit path.
    ///
    /// An error from `f` takes precedence over a close failure.
    pub fn with_open<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.open()?;
        let result = f(self);
        match (result, self.close()) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), close) => {
                if let Err(close_err) = close {
                    log::warn!("closing {} failed: {close_err}", self.resource);
                }
                Err(e)
            }
        }
    }

    fn port_mut(&mut self) -> Result<&mut C::Port> {
        match self.state {
            SessionState::Open => self.port.as_mut().ok_or(DeviceError::SessionClosed),
            _ => Err(DeviceError::SessionClosed),
        }
    }

    fn unsupported(&self, operation: &'static str) -> DeviceError {
        DeviceError::Unsupported {
            model: self.model.name,
            operation,
        }
    }

    fn query(&mut self, command: &[u8], len: usize) -> Result<Vec<u8>> {
        let port = self.port_mut()?;
        port.write(command)?;
        Ok(port.read(len)?)
    }

    // ── Status ──

    /// Read the status register. Not cached.
    pub fn query_status(&mut self) -> Result<StatusSnapshot> {
        let raw = self.query(&[CMD_QUERY_STATUS], STATUS_LEN)?;
        StatusSnapshot::decode(&raw, self.model)
    }

    pub fn pixel_count(&mut self) -> Result<u16> {
        Ok(self.query_status()?.pixel_count())
    }

    pub fn data_ready(&mut self) -> Result<bool> {
        Ok(self.query_status()?.data_ready())
    }

    pub fn lamp_enabled(&mut self) -> Result<bool> {
        self.ensure_open()?;
        self.query_status()?
            .lamp_enabled()
            .ok_or_else(|| self.unsupported("lamp state"))
    }

    /// Integration time as reported by the instrument.
    pub fn integration_time(&mut self) -> Result<Duration> {
        self.ensure_open()?;
        self.query_status()?
            .integration_time()
            .ok_or_else(|| self.unsupported("integration time"))
    }

    /// Negotiated USB speed (4k family). Queried once, then cached.
    pub fn usb_speed(&mut self) -> Result<UsbSpeed> {
        self.ensure_open()?;
        if self.model.family != Family::FourK {
            return Err(self.unsupported("USB speed"));
        }
        if let Some(speed) = self.usb_speed {
            return Ok(speed);
        }
        let speed = self
            .query_status()?
            .usb_speed()
            .ok_or_else(|| self.unsupported("USB speed"))?;
        log::debug!("{} USB speed: {speed}", self.model.name);
        self.usb_speed = Some(speed);
        Ok(speed)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == SessionState::Open {
            Ok(())
        } else {
            Err(DeviceError::SessionClosed)
        }
    }

    // ── Integration time ──

    /// Write a new integration time.
    ///
    /// Rejected before any I/O when below the family floor, not below the
    /// instrument timeout, or too large for the packed field.
    pub fn set_integration_time(&mut self, value: Duration) -> Result<()> {
        self.ensure_open()?;
        let model = self.model;
        if value < model.min_integration_time {
            return Err(DeviceError::InvalidParameter(format!(
                "integration time {value:?} is below the {} minimum of {:?}",
                model.name, model.min_integration_time
            )));
        }
        if value >= self.timeout {
            return Err(DeviceError::InvalidParameter(format!(
                "integration time {value:?} must be shorter than the timeout {:?}",
                self.timeout
            )));
        }

        let mut command = vec![CMD_SET_INTEGRATION_TIME];
        match model.family {
            Family::TwoK => {
                let ms = u16::try_from(value.as_millis()).map_err(|_| {
                    DeviceError::InvalidParameter(format!(
                        "integration time {value:?} exceeds {} ms",
                        u16::MAX
                    ))
                })?;
                command.extend_from_slice(&ms.to_le_bytes());
            }
            Family::FourK => {
                let us = u32::try_from(value.as_micros()).map_err(|_| {
                    DeviceError::InvalidParameter(format!(
                        "integration time {value:?} exceeds {} µs",
                        u32::MAX
                    ))
                })?;
                command.extend_from_slice(&us.to_le_bytes());
            }
            Family::NirQuest | Family::Maya => {
                return Err(self.unsupported("setting integration time"));
            }
        }

        self.port_mut()?.write(&command)?;
        self.integration_time = Some(value);
        log::debug!("{} integration time set to {value:?}", model.name);
        Ok(())
    }

    // ── EEPROM ──

    /// Read one EEPROM slot as a string.
    pub fn query_eeprom(&mut self, slot: u8) -> Result<String> {
        let raw = self.query(&[CMD_QUERY_EEPROM, slot], EEPROM_RESPONSE_LEN)?;
        eeprom::decode_slot(slot, &raw)
    }

    pub fn serial_number(&mut self) -> Result<String> {
        self.query_eeprom(EEPROM_SLOT_SERIAL)
    }

    pub fn calibration_coefficients(&mut self) -> Result<CalibrationCoefficients> {
        let first = EEPROM_SLOT_FIRST_COEFFICIENT;
        let values = [
            self.query_eeprom(first)?,
            self.query_eeprom(first + 1)?,
            self.query_eeprom(first + 2)?,
            self.query_eeprom(first + 3)?,
        ];
        CalibrationCoefficients::from_slots(values.each_ref().map(String::as_str))
    }

    /// Wavelength of every pixel, from the calibration polynomial.
    pub fn wavelengths(&mut self) -> Result<Vec<f64>> {
        let coefficients = self.calibration_coefficients()?;
        let pixels = self.pixel_count()?;
        Ok(calibration::wavelengths(usize::from(pixels), &coefficients))
    }

    /// Saturation correction factor (4k family). Queried once, then cached.
    pub fn saturation_factor(&mut self) -> Result<f64> {
        self.ensure_open()?;
        if self.model.family != Family::FourK {
            return Err(self.unsupported("saturation correction"));
        }
        if let Some(factor) = self.saturation_factor {
            return Ok(factor);
        }
        let raw = self.query(&[CMD_QUERY_EEPROM, EEPROM_SLOT_AUTONULL], AUTONULL_RESPONSE_LEN)?;
        let factor = spectrum::saturation_factor(&raw)?;
        log::debug!("{} saturation factor: {factor}", self.model.name);
        self.saturation_factor = Some(factor);
        Ok(factor)
    }

    // ── Spectrum ──

    /// Acquire one spectrum.
    ///
    /// A `SyncError` is never retried; close and reopen the session.
    pub fn read_spectrum(&mut self) -> Result<Spectrum> {
        self.ensure_open()?;
        let model = self.model;
        match model.family {
            Family::TwoK => {
                self.port_mut()?.write(&[CMD_REQUEST_SPECTRUM])?;
                self.read_two_k_frame()
            }
            Family::FourK => {
                self.port_mut()?.write(&[CMD_REQUEST_SPECTRUM])?;
                let speed = self.usb_speed()?;
                let port = self.port_mut()?;
                let payload = spectrum::read_frame(
                    port,
                    FrameLayout::FourK(speed),
                    model.status_in_endpoint,
                )?;
                let factor = self.saturation_factor()?;
                let raw = spectrum::decode_four_k(&payload);
                Ok(Spectrum::Corrected(spectrum::apply_saturation(&raw, factor)))
            }
            Family::NirQuest | Family::Maya => Err(self.unsupported("spectrum acquisition")),
        }
    }

    /// Read and decode one 2k frame already in flight. Writes nothing.
    fn read_two_k_frame(&mut self) -> Result<Spectrum> {
        let endpoint = self.model.status_in_endpoint;
        let port = self.port_mut()?;
        let payload = spectrum::read_frame(port, FrameLayout::TwoK, endpoint)?;
        Ok(Spectrum::Counts(spectrum::decode_two_k(&payload)))
    }

    /// Acquire one spectrum paired with per-pixel wavelengths.
    pub fn read_calibrated_spectrum(&mut self) -> Result<CalibratedSpectrum> {
        let wavelengths = self.wavelengths()?;
        let spectrum = self.read_spectrum()?;
        Ok(CalibratedSpectrum::new(&wavelengths, &spectrum))
    }
}

impl<C: Connector> Drop for Spectrometer<C> {
    fn drop(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                log::warn!("closing {} on drop failed: {e}", self.resource);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockConnector;

    const RESOURCE: &str = "USB0::0x2457::0x1002::RAW";
    const TIMEOUT: Duration = Duration::from_secs(10);

    fn ramp() -> Vec<u16> {
        (0..FRAME_SAMPLES as u16).map(|i| i % 4096).collect()
    }

    fn status(fill: &[(usize, u8)]) -> Vec<u8> {
        let mut raw = vec![0u8; STATUS_LEN];
        for &(i, b) in fill {
            raw[i] = b;
        }
        raw
    }

    fn eeprom(text: &str) -> Vec<u8> {
        let mut raw = vec![CMD_QUERY_EEPROM, 0];
        raw.extend_from_slice(text.as_bytes());
        raw.resize(EEPROM_RESPONSE_LEN, 0);
        raw
    }

    fn autonull(level: u16) -> Vec<u8> {
        let mut raw = vec![0u8; AUTONULL_RESPONSE_LEN];
        raw[6..8].copy_from_slice(&level.to_le_bytes());
        raw
    }

    /// Open a 2k session, feeding the post-reset discard frame.
    fn open_two_k(code: u16) -> (MockConnector, Spectrometer<MockConnector>) {
        let conn = MockConnector::new(code);
        let mut spec = Spectrometer::new(conn.clone(), RESOURCE, code, TIMEOUT).unwrap();
        conn.push_two_k_frame(&ramp(), 0, SYNC_BYTE);
        spec.open().unwrap();
        (conn, spec)
    }

    fn open_four_k(code: u16) -> (MockConnector, Spectrometer<MockConnector>) {
        let conn = MockConnector::new(code);
        let mut spec = Spectrometer::new(conn.clone(), RESOURCE, code, TIMEOUT).unwrap();
        spec.open().unwrap();
        (conn, spec)
    }

    // ── Probe ──

    #[test]
    fn probe_mismatch_fails_and_releases_port() {
        let conn = MockConnector::new(4130);
        let err = Spectrometer::new(conn.clone(), RESOURCE, 4098, TIMEOUT)
            .err()
            .unwrap();
        assert!(matches!(
            err,
            DeviceError::ModelMismatch {
                reported: 4130,
                expected: 4098
            }
        ));
        let state = conn.state.borrow();
        assert_eq!(state.connects, 1);
        assert_eq!(state.closes, 1);
        assert!(state.writes.is_empty());
    }

    #[test]
    fn probe_unregistered_code_fails() {
        let conn = MockConnector::new(4097);
        let err = Spectrometer::new(conn, RESOURCE, 4097, TIMEOUT).err().unwrap();
        assert!(matches!(err, DeviceError::UnsupportedModel(4097)));
    }

    #[test]
    fn probe_connect_failure_propagates() {
        let conn = MockConnector::new(4098);
        conn.state.borrow_mut().fail_connect = true;
        let err = Spectrometer::new(conn, RESOURCE, 4098, TIMEOUT).err().unwrap();
        assert!(matches!(err, DeviceError::Transport(TransportError::NotFound)));
    }

    #[test]
    fn autodetect_resolves_reported_model() {
        let conn = MockConnector::new(4126);
        let spec = Spectrometer::autodetect(conn, RESOURCE, TIMEOUT).unwrap();
        assert_eq!(spec.model().name, "USB2000+");
        assert_eq!(spec.state(), SessionState::Unopened);
    }

    #[test]
    fn zero_timeout_rejected() {
        let conn = MockConnector::new(4098);
        let err = Spectrometer::new(conn, RESOURCE, 4098, Duration::ZERO)
            .err()
            .unwrap();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
    }

    // ── Lifecycle ──

    #[test]
    fn open_two_k_resets_and_discards_one_frame() {
        let (conn, spec) = open_two_k(4106);
        assert!(spec.is_open());
        let state = conn.state.borrow();
        // The post-reset frame is drained without a spectrum request.
        assert_eq!(state.writes, vec![vec![CMD_RESET]]);
        assert_eq!(state.reads.len(), 2 * TWO_K_ROUND_TRIPS + 1);
        assert_eq!(state.in_endpoint, EP_TWO_K_STATUS_IN);
        assert_eq!(state.out_endpoint, EP_TWO_K_OUT);
        assert_eq!(state.timeout, Some(TIMEOUT));
        assert!(state.responses.is_empty());
    }

    #[test]
    fn open_four_k_resets_without_discard() {
        let (conn, _spec) = open_four_k(4130);
        let state = conn.state.borrow();
        assert_eq!(state.writes, vec![vec![CMD_RESET]]);
        assert_eq!(state.in_endpoint, EP_FOUR_K_STATUS_IN);
        assert_eq!(state.out_endpoint, EP_FOUR_K_OUT);
    }

    #[test]
    fn open_twice_fails() {
        let (_conn, mut spec) = open_four_k(4130);
        assert!(matches!(spec.open(), Err(DeviceError::AlreadyOpen)));
    }

    #[test]
    fn discard_failure_closes_session() {
        let conn = MockConnector::new(4098);
        let mut spec = Spectrometer::new(conn.clone(), RESOURCE, 4098, TIMEOUT).unwrap();
        // No frame queued: the discard read times out.
        let err = spec.open().unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::Timeout)));
        assert_eq!(spec.state(), SessionState::Closed);
        // probe + open port both released
        assert_eq!(conn.state.borrow().closes, 2);
        assert_eq!(conn.in_endpoint(), EP_TWO_K_STATUS_IN);
    }

    #[test]
    fn operations_after_close_fail() {
        let (_conn, mut spec) = open_four_k(4130);
        spec.close().unwrap();
        assert_eq!(spec.state(), SessionState::Closed);
        assert!(matches!(spec.query_status(), Err(DeviceError::SessionClosed)));
        assert!(matches!(spec.read_spectrum(), Err(DeviceError::SessionClosed)));
        assert!(matches!(spec.serial_number(), Err(DeviceError::SessionClosed)));
        assert!(matches!(
            spec.set_integration_time(Duration::from_millis(10)),
            Err(DeviceError::SessionClosed)
        ));
        assert!(matches!(spec.open(), Err(DeviceError::SessionClosed)));
    }

    #[test]
    fn operations_before_open_fail() {
        let conn = MockConnector::new(4130);
        let mut spec = Spectrometer::new(conn, RESOURCE, 4130, TIMEOUT).unwrap();
        assert!(matches!(spec.query_status(), Err(DeviceError::SessionClosed)));
        assert!(matches!(spec.usb_speed(), Err(DeviceError::SessionClosed)));
    }

    #[test]
    fn close_is_idempotent() {
        let (conn, mut spec) = open_four_k(4130);
        spec.close().unwrap();
        spec.close().unwrap();
        assert_eq!(conn.state.borrow().closes, 2); // probe + session
    }

    #[test]
    fn drop_closes_open_port() {
        let conn = MockConnector::new(4130);
        {
            let mut spec = Spectrometer::new(conn.clone(), RESOURCE, 4130, TIMEOUT).unwrap();
            spec.open().unwrap();
        }
        assert_eq!(conn.state.borrow().closes, 2);
    }

    #[test]
    fn with_open_closes_on_error() {
        let conn = MockConnector::new(4130);
        let mut spec = Spectrometer::new(conn.clone(), RESOURCE, 4130, TIMEOUT).unwrap();
        let err = spec
            .with_open(|s| s.query_status().map(|_| ()))
            .unwrap_err();
        assert!(matches!(err, DeviceError::Transport(TransportError::Timeout)));
        assert_eq!(spec.state(), SessionState::Closed);
        assert_eq!(conn.state.borrow().closes, 2);
    }

    #[test]
    fn with_open_returns_value() {
        let conn = MockConnector::new(4130);
        let mut spec = Spectrometer::new(conn.clone(), RESOURCE, 4130, TIMEOUT).unwrap();
        conn.push_response(eeprom("USB4C01234"));
        let serial = spec.with_open(|s| s.serial_number()).unwrap();
        assert_eq!(serial, "USB4C01234");
        assert_eq!(spec.state(), SessionState::Closed);
    }

    // ── Status & EEPROM ──

    #[test]
    fn query_status_writes_fe_and_reads_17() {
        let (conn, mut spec) = open_four_k(4130);
        conn.push_response(status(&[(0, 0x00), (1, 0x0E), (8, 1)]));
        let s = spec.query_status().unwrap();
        assert_eq!(s.pixel_count(), 3584);
        assert!(s.data_ready());
        let state = conn.state.borrow();
        assert_eq!(state.writes.last().unwrap(), &vec![CMD_QUERY_STATUS]);
        assert_eq!(state.reads.last().unwrap(), &(EP_FOUR_K_STATUS_IN, STATUS_LEN));
    }

    #[test]
    fn usb2000_pixel_count_through_session() {
        let (conn, mut spec) = open_two_k(4098);
        conn.push_response(status(&[(0, 0x08), (1, 0x00)]));
        assert_eq!(spec.pixel_count().unwrap(), 2048);
    }

    #[test]
    fn serial_and_coefficients() {
        let (conn, mut spec) = open_two_k(4106);
        conn.push_responses([
            eeprom("HR2A1234"),
            eeprom("339.1"),
            eeprom("0.38"),
            eeprom("-1.5e-5"),
            eeprom("2e-10"),
        ]);
        assert_eq!(spec.serial_number().unwrap(), "HR2A1234");
        let c = spec.calibration_coefficients().unwrap();
        assert_eq!(c, CalibrationCoefficients::new(339.1, 0.38, -1.5e-5, 2e-10));
        let eeprom_writes: Vec<Vec<u8>> = conn
            .writes()
            .into_iter()
            .filter(|w| w[0] == CMD_QUERY_EEPROM)
            .collect();
        let expected: Vec<Vec<u8>> = (0u8..5).map(|slot| vec![CMD_QUERY_EEPROM, slot]).collect();
        assert_eq!(eeprom_writes, expected);
    }

    #[test]
    fn malformed_eeprom_surfaces() {
        let (conn, mut spec) = open_four_k(4130);
        conn.push_response(vec![b'X'; EEPROM_RESPONSE_LEN]);
        assert!(matches!(
            spec.serial_number(),
            Err(DeviceError::MalformedEeprom { slot: 0, .. })
        ));
    }

    #[test]
    fn wavelengths_use_status_pixel_count() {
        let (conn, mut spec) = open_four_k(4130);
        conn.push_responses([eeprom("0"), eeprom("1"), eeprom("0"), eeprom("0")]);
        conn.push_response(status(&[(0, 5)]));
        assert_eq!(spec.wavelengths().unwrap(), vec![0.0, 1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn integration_time_read_back() {
        let (conn, mut spec) = open_two_k(4098);
        conn.push_response(status(&[(2, 100)]));
        assert_eq!(spec.integration_time().unwrap(), Duration::from_millis(100));
    }

    // ── Integration time ──

    #[test]
    fn two_k_below_floor_rejected_without_write() {
        let (conn, mut spec) = open_two_k(4098);
        let before = conn.writes().len();
        let err = spec.set_integration_time(Duration::from_micros(1)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
        assert_eq!(conn.writes().len(), before);
    }

    #[test]
    fn four_k_below_floor_rejected_without_write() {
        let (conn, mut spec) = open_four_k(4130);
        let before = conn.writes().len();
        let err = spec.set_integration_time(Duration::from_micros(9)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
        assert_eq!(conn.writes().len(), before);
    }

    #[test]
    fn two_k_packs_u16_milliseconds() {
        let (conn, mut spec) = open_two_k(4098);
        spec.set_integration_time(Duration::from_millis(300)).unwrap();
        assert_eq!(conn.writes().last().unwrap(), &vec![0x02, 0x2C, 0x01]);
    }

    #[test]
    fn four_k_packs_u32_microseconds() {
        let (conn, mut spec) = open_four_k(4130);
        spec.set_integration_time(Duration::from_micros(10)).unwrap();
        assert_eq!(conn.writes().last().unwrap(), &vec![0x02, 10, 0, 0, 0]);
        spec.set_integration_time(Duration::from_millis(100)).unwrap();
        assert_eq!(conn.writes().last().unwrap(), &vec![0x02, 0xA0, 0x86, 0x01, 0x00]);
    }

    #[test]
    fn integration_time_must_be_below_timeout() {
        let (conn, mut spec) = open_four_k(4130);
        let before = conn.writes().len();
        let err = spec.set_integration_time(TIMEOUT).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
        assert_eq!(conn.writes().len(), before);
    }

    #[test]
    fn timeout_must_exceed_integration_time() {
        let (conn, mut spec) = open_four_k(4130);
        spec.set_integration_time(Duration::from_secs(2)).unwrap();
        assert!(matches!(
            spec.set_timeout(Duration::from_secs(1)),
            Err(DeviceError::InvalidParameter(_))
        ));
        spec.set_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(conn.state.borrow().timeout, Some(Duration::from_secs(5)));
    }

    #[test]
    fn two_k_overflowing_value_rejected() {
        let conn = MockConnector::new(4098);
        let mut spec =
            Spectrometer::new(conn.clone(), RESOURCE, 4098, Duration::from_secs(100)).unwrap();
        conn.push_two_k_frame(&ramp(), 0, SYNC_BYTE);
        spec.open().unwrap();
        let err = spec.set_integration_time(Duration::from_secs(70)).unwrap_err();
        assert!(matches!(err, DeviceError::InvalidParameter(_)));
    }

    // ── Spectrum ──

    #[test]
    fn two_k_spectrum_decoded() {
        let (conn, mut spec) = open_two_k(4106);
        conn.push_two_k_frame(&ramp(), 0xF0, SYNC_BYTE);
        let s = spec.read_spectrum().unwrap();
        match s {
            Spectrum::Counts(v) => {
                assert_eq!(v.len(), FRAME_SAMPLES);
                assert_eq!(v[0], 0);
                assert_eq!(v[2047], 2047);
            }
            other => panic!("expected counts, got {other:?}"),
        }
        assert_eq!(conn.in_endpoint(), EP_TWO_K_STATUS_IN);
    }

    #[test]
    fn two_k_one_request_per_frame_after_open() {
        let (conn, mut spec) = open_two_k(4098);
        for n in 1..=2u16 {
            conn.push_two_k_frame(&vec![n; FRAME_SAMPLES], 0, SYNC_BYTE);
            assert_eq!(
                spec.read_spectrum().unwrap(),
                Spectrum::Counts(vec![n as i16; FRAME_SAMPLES])
            );
        }
        assert_eq!(
            conn.writes(),
            vec![
                vec![CMD_RESET],
                vec![CMD_REQUEST_SPECTRUM],
                vec![CMD_REQUEST_SPECTRUM]
            ]
        );
        assert_eq!(conn.pending_responses(), 0);
    }

    #[test]
    fn two_k_sync_error_restores_endpoint() {
        let (conn, mut spec) = open_two_k(4098);
        conn.push_two_k_frame(&ramp(), 0, 0x00);
        let err = spec.read_spectrum().unwrap_err();
        assert!(matches!(err, DeviceError::SyncError { .. }));
        assert_eq!(conn.in_endpoint(), EP_TWO_K_STATUS_IN);
        // Session stays open; recovery is the caller's choice.
        assert!(spec.is_open());
    }

    #[test]
    fn four_k_saturation_queried_once() {
        let (conn, mut spec) = open_four_k(4130);
        let samples: Vec<u16> = vec![100; FRAME_SAMPLES];

        // First acquisition: speed query, frame, autonull.
        conn.push_response(status(&[(14, 128)]));
        conn.push_four_k_frame(&samples, 512, SYNC_BYTE);
        conn.push_response(autonull(32768));
        let first = spec.read_spectrum().unwrap();

        // Second acquisition: frame only.
        conn.push_four_k_frame(&samples, 512, SYNC_BYTE);
        let second = spec.read_spectrum().unwrap();

        for s in [first, second] {
            match s {
                Spectrum::Corrected(v) => {
                    assert_eq!(v.len(), FRAME_SAMPLES);
                    assert!(v.iter().all(|&x| x == 200.0));
                }
                other => panic!("expected corrected, got {other:?}"),
            }
        }
        assert_eq!(conn.count_writes(&[CMD_QUERY_EEPROM, EEPROM_SLOT_AUTONULL]), 1);
        assert_eq!(conn.count_writes(&[CMD_QUERY_STATUS]), 1);
        assert_eq!(conn.pending_responses(), 0);
    }

    #[test]
    fn four_k_full_speed_and_ordering() {
        let (conn, mut spec) = open_four_k(4120);
        conn.push_response(status(&[(14, 0)]));
        conn.push_four_k_frame(&ramp(), 64, SYNC_BYTE);
        conn.push_response(autonull(65535));
        spec.read_spectrum().unwrap();
        assert_eq!(spec.usb_speed().unwrap(), UsbSpeed::Full);

        let writes = conn.writes();
        assert_eq!(
            &writes[1..],
            &[
                vec![CMD_REQUEST_SPECTRUM],
                vec![CMD_QUERY_STATUS],
                vec![CMD_QUERY_EEPROM, EEPROM_SLOT_AUTONULL]
            ]
        );
        // Autonull is read on the status pipe after restore.
        let reads = conn.state.borrow().reads.clone();
        assert_eq!(reads.last().unwrap(), &(EP_FOUR_K_STATUS_IN, AUTONULL_RESPONSE_LEN));
    }

    #[test]
    fn four_k_sync_error_restores_endpoint() {
        let (conn, mut spec) = open_four_k(4130);
        conn.push_response(status(&[(14, 128)]));
        conn.push_four_k_frame(&ramp(), 512, 0x68);
        let err = spec.read_spectrum().unwrap_err();
        assert!(matches!(
            err,
            DeviceError::SyncError {
                sync_byte: Some(0x68),
                ..
            }
        ));
        assert_eq!(conn.in_endpoint(), EP_FOUR_K_STATUS_IN);
        // No saturation query after a failed frame.
        assert_eq!(conn.count_writes(&[CMD_QUERY_EEPROM, EEPROM_SLOT_AUTONULL]), 0);
    }

    #[test]
    fn calibrated_spectrum_pairs_samples() {
        let (conn, mut spec) = open_two_k(4106);
        conn.push_responses([eeprom("500"), eeprom("0.5"), eeprom("0"), eeprom("0")]);
        conn.push_response(status(&[(0, 0x00), (1, 0x08)]));
        conn.push_two_k_frame(&ramp(), 0, SYNC_BYTE);
        let cal = spec.read_calibrated_spectrum().unwrap();
        assert_eq!(cal.len(), 2048);
        assert_eq!(cal.points[2].wavelength, 501.0);
        assert_eq!(cal.points[2].intensity, 2.0);
    }

    // ── NIRQuest / Maya ──

    #[test]
    fn nirquest_opens_and_serves_common_operations() {
        let (conn, mut spec) = open_four_k(4134);
        conn.push_response(eeprom("NQ5E0001"));
        assert_eq!(spec.serial_number().unwrap(), "NQ5E0001");
        conn.push_response(status(&[(0, 0x00), (1, 0x02)]));
        assert_eq!(spec.pixel_count().unwrap(), 512);
    }

    #[test]
    fn maya_family_specific_operations_unsupported() {
        let (conn, mut spec) = open_four_k(4140);
        let before = conn.writes().len();
        assert!(matches!(
            spec.read_spectrum(),
            Err(DeviceError::Unsupported { model: "Maya", .. })
        ));
        assert!(matches!(
            spec.set_integration_time(Duration::from_millis(10)),
            Err(DeviceError::Unsupported { .. })
        ));
        assert!(matches!(spec.usb_speed(), Err(DeviceError::Unsupported { .. })));
        assert!(matches!(
            spec.saturation_factor(),
            Err(DeviceError::Unsupported { .. })
        ));
        assert_eq!(conn.writes().len(), before);
    }

    // ── Errors ──

    #[test]
    fn error_display() {
        assert_eq!(
            DeviceError::ModelMismatch {
                reported: 4130,
                expected: 4098
            }
            .to_string(),
            "Model mismatch: device reports model code 4130, expected 4098"
        );
        assert_eq!(
            DeviceError::UnsupportedModel(4097).to_string(),
            "Unsupported model code 4097 (0x1001)"
        );
        let sync = DeviceError::SyncError {
            sync_byte: None,
            payload_len: 4095,
        }
        .to_string();
        assert!(sync.contains("4095 payload bytes"));
        assert!(sync.contains("terminator missing"));
        assert!(sync.contains("power cycle"));
    }

    #[test]
    fn transport_error_is_source() {
        let e = DeviceError::from(TransportError::Timeout);
        let source = std::error::Error::source(&e).unwrap();
        assert_eq!(source.to_string(), "Transfer timed out");
    }
}
