//! Transport port: byte-oriented duplex channel to the instrument.
//!
//! The session never touches USB directly: it talks to a [`Transport`]
//! opened by a [`Connector`]. Linux gets a bulk-transfer backend on `nusb`;
//! other hosts get a stub that reports `NotFound`. [`mock`] provides a
//! scripted in-memory port for tests.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;

use crate::protocol::OCEAN_OPTICS_VID;

// ── Error type ──

/// Transport-level errors.
///
/// String payloads follow the convention **"context: details"**.
#[derive(Debug)]
pub enum TransportError {
    NotFound,
    OpenFailed(String),
    InvalidResource(String),
    Timeout,
    Io(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::NotFound => write!(f, "spectrometer not found"),
            TransportError::OpenFailed(e) => write!(f, "Failed to open device: {e}"),
            TransportError::InvalidResource(e) => write!(f, "Invalid resource name: {e}"),
            TransportError::Timeout => write!(f, "Transfer timed out"),
            TransportError::Io(e) => write!(f, "Transfer failed: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

pub type Result<T> = std::result::Result<T, TransportError>;

// ── Traits ──

/// Which pipe an endpoint binding applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    In,
    Out,
}

/// An open, exclusively owned channel to one instrument.
///
/// All operations block until completion or until the configured timeout.
pub trait Transport {
    fn write(&mut self, data: &[u8]) -> Result<()>;
    /// Read up to `len` bytes from the bound IN endpoint.
    fn read(&mut self, len: usize) -> Result<Vec<u8>>;
    /// Rebind the IN or OUT pipe used by subsequent reads/writes.
    fn set_endpoint(&mut self, direction: Direction, endpoint: u8) -> Result<()>;
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
    /// Model-identification attribute (USB product ID).
    fn model_code(&self) -> Result<u16>;
    /// Release the underlying resource. Dropping the port also releases it.
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Opens transports by resource identifier.
pub trait Connector {
    type Port: Transport;
    fn connect(&self, resource: &str) -> Result<Self::Port>;
}

// ── Resource names ──

/// A parsed `USB<board>::<vid>::<pid>[::<serial>]::RAW` resource string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    pub board: u16,
    pub vendor_id: u16,
    pub product_id: u16,
    pub serial: Option<String>,
}

fn parse_id(field: &str) -> Option<u16> {
    let field = field.trim();
    match field
        .strip_prefix("0x")
        .or_else(|| field.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => field.parse().ok(),
    }
}

impl FromStr for ResourceName {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |why: &str| TransportError::InvalidResource(format!("{s}: {why}"));
        let parts: Vec<&str> = s.trim().split("::").collect();
        if parts.len() < 4 || parts.len() > 5 {
            return Err(invalid("expected USB<n>::<vid>::<pid>[::<serial>]::RAW"));
        }
        let head = parts[0].to_ascii_uppercase();
        let board = head
            .strip_prefix("USB")
            .ok_or_else(|| invalid("interface must be USB"))?;
        let board = if board.is_empty() {
            0
        } else {
            board.parse().map_err(|_| invalid("bad board number"))?
        };
        if !parts[parts.len() - 1].eq_ignore_ascii_case("RAW") {
            return Err(invalid("resource class must be RAW"));
        }
        let vendor_id = parse_id(parts[1]).ok_or_else(|| invalid("bad vendor id"))?;
        let product_id = parse_id(parts[2]).ok_or_else(|| invalid("bad product id"))?;
        let serial = (parts.len() == 5)
            .then(|| parts[3].trim().to_string())
            .filter(|s| !s.is_empty());
        Ok(ResourceName {
            board,
            vendor_id,
            product_id,
            serial,
        })
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "USB{}::0x{:04X}::0x{:04X}::",
            self.board, self.vendor_id, self.product_id
        )?;
        if let Some(ref serial) = self.serial {
            write!(f, "{serial}::")?;
        }
        write!(f, "RAW")
    }
}

// ── Linux implementation ──

#[cfg(target_os = "linux")]
mod linux_impl {
    use super::*;

    use nusb::transfer::RequestBuffer;

    /// Bulk-transfer port on top of `nusb`.
    ///
    /// `nusb` transfers are futures; each one is driven to completion on a
    /// private current-thread runtime and bounded by the configured timeout.
    pub struct UsbTransport {
        interface: nusb::Interface,
        runtime: tokio::runtime::Runtime,
        product_id: u16,
        in_endpoint: u8,
        out_endpoint: u8,
        timeout: Duration,
    }

    impl Transport for UsbTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            let transfer = self.interface.bulk_out(self.out_endpoint, data.to_vec());
            let timeout = self.timeout;
            let completion = self
                .runtime
                .block_on(async move { tokio::time::timeout(timeout, transfer).await })
                .map_err(|_| TransportError::Timeout)?;
            let sent = completion
                .into_result()
                .map_err(|e| TransportError::Io(format!("bulk_out(0x{:02X}): {e}", self.out_endpoint)))?;
            if sent.actual_length() != data.len() {
                return Err(TransportError::Io(format!(
                    "bulk_out(0x{:02X}): wrote {} of {} bytes",
                    self.out_endpoint,
                    sent.actual_length(),
                    data.len()
                )));
            }
            Ok(())
        }

        fn read(&mut self, len: usize) -> Result<Vec<u8>> {
            let transfer = self
                .interface
                .bulk_in(self.in_endpoint, RequestBuffer::new(len));
            let timeout = self.timeout;
            let completion = self
                .runtime
                .block_on(async move { tokio::time::timeout(timeout, transfer).await })
                .map_err(|_| TransportError::Timeout)?;
            completion
                .into_result()
                .map_err(|e| TransportError::Io(format!("bulk_in(0x{:02X}): {e}", self.in_endpoint)))
        }

        fn set_endpoint(&mut self, direction: Direction, endpoint: u8) -> Result<()> {
            match direction {
                Direction::In => self.in_endpoint = endpoint,
                Direction::Out => self.out_endpoint = endpoint,
            }
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.timeout = timeout;
            Ok(())
        }

        fn model_code(&self) -> Result<u16> {
            Ok(self.product_id)
        }
    }

    /// Opens [`UsbTransport`]s for `USB...::RAW` resource strings.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct UsbConnector;

    impl Connector for UsbConnector {
        type Port = UsbTransport;

        fn connect(&self, resource: &str) -> Result<UsbTransport> {
            let name: ResourceName = resource.parse()?;
            let device_info = nusb::list_devices()
                .map_err(|e| TransportError::OpenFailed(format!("USB enumeration: {e}")))?
                .find(|dev| {
                    dev.vendor_id() == name.vendor_id
                        && dev.product_id() == name.product_id
                        && name
                            .serial
                            .as_deref()
                            .is_none_or(|s| dev.serial_number() == Some(s))
                })
                .ok_or(TransportError::NotFound)?;

            let device = device_info
                .open()
                .map_err(|e| TransportError::OpenFailed(format!("USB open: {e}")))?;
            let interface = device
                .detach_and_claim_interface(0)
                .map_err(|e| TransportError::OpenFailed(format!("claim interface 0: {e}")))?;
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .map_err(|e| TransportError::OpenFailed(format!("transfer runtime: {e}")))?;

            log::debug!(
                "opened {resource} (bus {:03} addr {:03})",
                device_info.bus_number(),
                device_info.device_address()
            );

            Ok(UsbTransport {
                interface,
                runtime,
                product_id: device_info.product_id(),
                in_endpoint: crate::protocol::EP_FOUR_K_STATUS_IN,
                out_endpoint: crate::protocol::EP_FOUR_K_OUT,
                timeout: Duration::from_millis(crate::protocol::DEFAULT_TIMEOUT_MS),
            })
        }
    }
}

#[cfg(target_os = "linux")]
pub use linux_impl::{UsbConnector, UsbTransport};

// ── Stub for unsupported platforms ──

/// Placeholder port; never constructed.
#[cfg(not(target_os = "linux"))]
pub struct StubTransport;

#[cfg(not(target_os = "linux"))]
impl Transport for StubTransport {
    fn write(&mut self, _data: &[u8]) -> Result<()> {
        unreachable!()
    }
    fn read(&mut self, _len: usize) -> Result<Vec<u8>> {
        unreachable!()
    }
    fn set_endpoint(&mut self, _direction: Direction, _endpoint: u8) -> Result<()> {
        unreachable!()
    }
    fn set_timeout(&mut self, _timeout: Duration) -> Result<()> {
        unreachable!()
    }
    fn model_code(&self) -> Result<u16> {
        unreachable!()
    }
}

/// Connector that always returns `NotFound`.
/// Enables compilation and `cargo test` on unsupported hosts.
#[cfg(not(target_os = "linux"))]
#[derive(Debug, Default, Clone, Copy)]
pub struct StubConnector;

#[cfg(not(target_os = "linux"))]
impl Connector for StubConnector {
    type Port = StubTransport;

    fn connect(&self, resource: &str) -> Result<StubTransport> {
        let _: ResourceName = resource.parse()?;
        Err(TransportError::NotFound)
    }
}

/// Concrete connector for the current platform.
#[cfg(target_os = "linux")]
pub type PlatformConnector = UsbConnector;
#[cfg(not(target_os = "linux"))]
pub type PlatformConnector = StubConnector;

// ── Device enumeration ──

/// An attached Ocean Optics device (not yet opened).
#[derive(Debug, Clone, Serialize)]
pub struct DiscoveredDevice {
    /// Resource string accepted by [`Connector::connect`].
    pub resource: String,
    /// Model code (USB product ID).
    pub model_code: u16,
    /// USB serial number, if the device reports one.
    pub serial: Option<String>,
}

/// Enumerate attached Ocean Optics devices.
///
/// On unsupported platforms, or if USB enumeration fails, returns an empty list.
pub fn enumerate_devices() -> Vec<DiscoveredDevice> {
    #[cfg(target_os = "linux")]
    {
        enumerate_devices_linux()
    }
    #[cfg(not(target_os = "linux"))]
    {
        Vec::new()
    }
}

#[cfg(target_os = "linux")]
fn enumerate_devices_linux() -> Vec<DiscoveredDevice> {
    let Ok(devices) = nusb::list_devices() else {
        return Vec::new();
    };

    devices
        .filter(|dev| dev.vendor_id() == OCEAN_OPTICS_VID)
        .map(|dev| {
            let serial = dev.serial_number().map(|s| s.to_string());
            let name = ResourceName {
                board: 0,
                vendor_id: dev.vendor_id(),
                product_id: dev.product_id(),
                serial: serial.clone(),
            };
            DiscoveredDevice {
                resource: name.to_string(),
                model_code: dev.product_id(),
                serial,
            }
        })
        .collect()
}

/// Resource string for the first attached Ocean Optics device.
pub fn first_resource() -> Result<String> {
    enumerate_devices()
        .into_iter()
        .next()
        .map(|d| d.resource)
        .ok_or(TransportError::NotFound)
}

/// Build the canonical resource string for a vendor/product pair.
pub fn resource_for(product_id: u16, serial: Option<&str>) -> String {
    ResourceName {
        board: 0,
        vendor_id: OCEAN_OPTICS_VID,
        product_id,
        serial: serial.map(str::to_string),
    }
    .to_string()
}

// ── Mock transport for testing ──

/// Scripted in-memory transport for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::rc::Rc;

    /// Shared state behind a [`MockConnector`] and every port it opens.
    #[derive(Debug, Default)]
    pub struct MockState {
        /// Value returned by `model_code()`.
        pub model_code: u16,
        /// Response chunks; each `read()` pops one (truncated to the requested length).
        pub responses: VecDeque<Vec<u8>>,
        /// Every `write()` payload, in order.
        pub writes: Vec<Vec<u8>>,
        /// Every `read()`: (bound IN endpoint, requested length).
        pub reads: Vec<(u8, usize)>,
        /// Every `set_endpoint()` call, in order.
        pub endpoint_history: Vec<(Direction, u8)>,
        pub in_endpoint: u8,
        pub out_endpoint: u8,
        pub timeout: Option<Duration>,
        pub connects: usize,
        pub closes: usize,
        /// If true, `connect()` fails with `NotFound`.
        pub fail_connect: bool,
    }

    /// A port handed out by [`MockConnector`].
    pub struct MockTransport {
        state: Rc<RefCell<MockState>>,
    }

    impl Transport for MockTransport {
        fn write(&mut self, data: &[u8]) -> Result<()> {
            self.state.borrow_mut().writes.push(data.to_vec());
            Ok(())
        }

        fn read(&mut self, len: usize) -> Result<Vec<u8>> {
            let mut state = self.state.borrow_mut();
            let endpoint = state.in_endpoint;
            state.reads.push((endpoint, len));
            let mut chunk = state.responses.pop_front().ok_or(TransportError::Timeout)?;
            chunk.truncate(len);
            Ok(chunk)
        }

        fn set_endpoint(&mut self, direction: Direction, endpoint: u8) -> Result<()> {
            let mut state = self.state.borrow_mut();
            match direction {
                Direction::In => state.in_endpoint = endpoint,
                Direction::Out => state.out_endpoint = endpoint,
            }
            state.endpoint_history.push((direction, endpoint));
            Ok(())
        }

        fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
            self.state.borrow_mut().timeout = Some(timeout);
            Ok(())
        }

        fn model_code(&self) -> Result<u16> {
            Ok(self.state.borrow().model_code)
        }

        fn close(&mut self) -> Result<()> {
            self.state.borrow_mut().closes += 1;
            Ok(())
        }
    }

    /// Connector whose ports all share one [`MockState`].
    #[derive(Clone)]
    pub struct MockConnector {
        pub state: Rc<RefCell<MockState>>,
    }

    impl MockConnector {
        pub fn new(model_code: u16) -> Self {
            MockConnector {
                state: Rc::new(RefCell::new(MockState {
                    model_code,
                    ..MockState::default()
                })),
            }
        }

        /// Queue one response chunk.
        pub fn push_response(&self, bytes: impl Into<Vec<u8>>) {
            self.state.borrow_mut().responses.push_back(bytes.into());
        }

        /// Queue several response chunks in order.
        pub fn push_responses<I, B>(&self, chunks: I)
        where
            I: IntoIterator<Item = B>,
            B: Into<Vec<u8>>,
        {
            let mut state = self.state.borrow_mut();
            for chunk in chunks {
                state.responses.push_back(chunk.into());
            }
        }

        /// Queue a 2k-family frame: 32 × (LSB packet, MSB packet) then the sync byte.
        ///
        /// `samples` must hold [`crate::protocol::FRAME_SAMPLES`] values; `msb_noise`
        /// is OR-ed into the high nibble of every MSB byte to exercise masking.
        pub fn push_two_k_frame(&self, samples: &[u16], msb_noise: u8, sync: u8) {
            use crate::protocol::TWO_K_HALF_PACKET_LEN;
            for chunk in samples.chunks(TWO_K_HALF_PACKET_LEN) {
                let lsbs: Vec<u8> = chunk.iter().map(|s| (s & 0xFF) as u8).collect();
                let msbs: Vec<u8> = chunk
                    .iter()
                    .map(|s| ((s >> 8) as u8) | (msb_noise & 0xF0))
                    .collect();
                self.push_response(lsbs);
                self.push_response(msbs);
            }
            self.push_response(vec![sync]);
        }

        /// Queue a 4k-family frame split into `packet_len`-byte packets, then the sync byte.
        pub fn push_four_k_frame(&self, samples: &[u16], packet_len: usize, sync: u8) {
            let bytes: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();
            for packet in bytes.chunks(packet_len) {
                self.push_response(packet.to_vec());
            }
            self.push_response(vec![sync]);
        }

        /// Snapshot of all writes so far.
        pub fn writes(&self) -> Vec<Vec<u8>> {
            self.state.borrow().writes.clone()
        }

        /// Number of writes exactly equal to `command`.
        pub fn count_writes(&self, command: &[u8]) -> usize {
            self.state
                .borrow()
                .writes
                .iter()
                .filter(|w| w.as_slice() == command)
                .count()
        }

        /// Currently bound IN endpoint.
        pub fn in_endpoint(&self) -> u8 {
            self.state.borrow().in_endpoint
        }

        /// Number of queued responses not yet consumed.
        pub fn pending_responses(&self) -> usize {
            self.state.borrow().responses.len()
        }
    }

    impl Connector for MockConnector {
        type Port = MockTransport;

        fn connect(&self, _resource: &str) -> Result<MockTransport> {
            let mut state = self.state.borrow_mut();
            if state.fail_connect {
                return Err(TransportError::NotFound);
            }
            state.connects += 1;
            Ok(MockTransport {
                state: Rc::clone(&self.state),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnector;
    use super::*;

    // ── ResourceName ──

    #[test]
    fn parse_resource_with_serial() {
        let r: ResourceName = "USB0::0x2457::0x1002::USB2E1234::RAW".parse().unwrap();
        assert_eq!(r.board, 0);
        assert_eq!(r.vendor_id, 0x2457);
        assert_eq!(r.product_id, 0x1002);
        assert_eq!(r.serial.as_deref(), Some("USB2E1234"));
    }

    #[test]
    fn parse_resource_without_serial() {
        let r: ResourceName = "USB::0x2457::4130::RAW".parse().unwrap();
        assert_eq!(r.board, 0);
        assert_eq!(r.product_id, 4130);
        assert_eq!(r.serial, None);
    }

    #[test]
    fn parse_resource_case_insensitive() {
        let r: ResourceName = "usb1::0X2457::0X1022::raw".parse().unwrap();
        assert_eq!(r.board, 1);
        assert_eq!(r.product_id, 0x1022);
    }

    #[test]
    fn parse_resource_rejects_malformed() {
        for bad in [
            "",
            "USB2000",
            "GPIB0::12::INSTR",
            "USB0::0x2457::0x1002::INSTR",
            "USB0::zz::0x1002::RAW",
            "USB0::0x2457::0x1002::a::b::RAW",
            "USBx::0x2457::0x1002::RAW",
        ] {
            let err = bad.parse::<ResourceName>().unwrap_err();
            assert!(
                matches!(err, TransportError::InvalidResource(_)),
                "{bad:?} should be rejected, got {err:?}"
            );
        }
    }

    #[test]
    fn resource_display_is_canonical() {
        let r: ResourceName = "usb::9303::4098::ABC::raw".parse().unwrap();
        assert_eq!(r.to_string(), "USB0::0x2457::0x1002::ABC::RAW");
        let reparsed: ResourceName = r.to_string().parse().unwrap();
        assert_eq!(reparsed, r);
    }

    #[test]
    fn resource_for_builds_ocean_optics_name() {
        assert_eq!(resource_for(4130, None), "USB0::0x2457::0x1022::RAW");
        assert_eq!(
            resource_for(4098, Some("S1")),
            "USB0::0x2457::0x1002::S1::RAW"
        );
    }

    // ── Error display ──

    #[test]
    fn transport_error_display() {
        assert_eq!(TransportError::NotFound.to_string(), "spectrometer not found");
        assert_eq!(TransportError::Timeout.to_string(), "Transfer timed out");
        assert_eq!(
            TransportError::Io("bulk_in(0x82): stall".into()).to_string(),
            "Transfer failed: bulk_in(0x82): stall"
        );
    }

    // ── Mock ──

    #[test]
    fn mock_records_writes_and_reads() {
        let conn = MockConnector::new(4098);
        let mut port = conn.connect("USB0::0x2457::0x1002::RAW").unwrap();
        port.set_endpoint(Direction::In, 0x87).unwrap();
        port.write(&[0xFE]).unwrap();
        conn.push_response(vec![1, 2, 3, 4]);
        assert_eq!(port.read(2).unwrap(), vec![1, 2]);
        assert_eq!(conn.writes(), vec![vec![0xFE]]);
        assert_eq!(conn.state.borrow().reads, vec![(0x87, 2)]);
    }

    #[test]
    fn mock_read_without_response_times_out() {
        let conn = MockConnector::new(4098);
        let mut port = conn.connect("x").unwrap();
        assert!(matches!(port.read(1), Err(TransportError::Timeout)));
    }

    #[test]
    fn mock_counts_connects_and_closes() {
        let conn = MockConnector::new(4130);
        let mut port = conn.connect("x").unwrap();
        assert_eq!(port.model_code().unwrap(), 4130);
        port.close().unwrap();
        let state = conn.state.borrow();
        assert_eq!(state.connects, 1);
        assert_eq!(state.closes, 1);
    }

    #[test]
    fn enumerate_devices_does_not_panic() {
        // On a test host: possibly empty, never an error.
        let devices = enumerate_devices();
        for d in &devices {
            assert!(d.resource.starts_with("USB0::0x2457::"));
        }
    }
}
