//! Unified error type for the ooptics-lib crate.
//!
//! [`OpticsError`] wraps session errors (`DeviceError`, which itself wraps
//! transport failures) and configuration problems. `From` impls allow `?` to
//! propagate across module boundaries.

use std::fmt;

use crate::device::DeviceError;
use crate::transport::TransportError;

/// Unified error type for ooptics-lib operations.
#[derive(Debug)]
pub enum OpticsError {
    /// Instrument session error (probe, command, decode, framing).
    Device(DeviceError),
    /// Standard I/O error (config persistence).
    Io(std::io::Error),
    /// Configuration parsing or validation error.
    Config(String),
}

impl fmt::Display for OpticsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpticsError::Device(e) => write!(f, "{e}"),
            OpticsError::Io(e) => write!(f, "I/O error: {e}"),
            OpticsError::Config(e) => write!(f, "Config error: {e}"),
        }
    }
}

impl std::error::Error for OpticsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpticsError::Device(e) => Some(e),
            OpticsError::Io(e) => Some(e),
            OpticsError::Config(_) => None,
        }
    }
}

impl From<DeviceError> for OpticsError {
    fn from(e: DeviceError) -> Self {
        OpticsError::Device(e)
    }
}

impl From<TransportError> for OpticsError {
    fn from(e: TransportError) -> Self {
        OpticsError::Device(DeviceError::Transport(e))
    }
}

impl From<std::io::Error> for OpticsError {
    fn from(e: std::io::Error) -> Self {
        OpticsError::Io(e)
    }
}

/// Crate-level Result alias using [`OpticsError`].
pub type Result<T> = std::result::Result<T, OpticsError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_device_error() {
        let e: OpticsError = DeviceError::SessionClosed.into();
        assert!(matches!(e, OpticsError::Device(DeviceError::SessionClosed)));
    }

    #[test]
    fn from_transport_error_goes_through_device() {
        let e: OpticsError = TransportError::NotFound.into();
        assert!(matches!(
            e,
            OpticsError::Device(DeviceError::Transport(TransportError::NotFound))
        ));
    }

    #[test]
    fn from_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: OpticsError = io_err.into();
        assert!(matches!(e, OpticsError::Io(_)));
    }

    #[test]
    fn display_device_error() {
        let e = OpticsError::Device(DeviceError::SyncError {
            sync_byte: Some(0x42),
            payload_len: 4096,
        });
        assert!(e.to_string().starts_with("Spectrum frame out of sync"));
        assert!(e.to_string().contains("terminator 0x42"));
    }

    #[test]
    fn display_config_error() {
        let e = OpticsError::Config("invalid input".into());
        assert_eq!(e.to_string(), "Config error: invalid input");
    }

    #[test]
    fn source_chains_device_error() {
        let e = OpticsError::Device(DeviceError::InvalidResponse("status: 3 bytes".into()));
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("3 bytes"));
    }

    #[test]
    fn source_chains_io_error() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let e = OpticsError::Io(io_err);
        let source = std::error::Error::source(&e).unwrap();
        assert!(source.to_string().contains("denied"));
    }

    #[test]
    fn source_none_for_config() {
        let e = OpticsError::Config("test".into());
        assert!(std::error::Error::source(&e).is_none());
    }

    #[test]
    fn question_mark_propagation_device_to_optics() {
        fn inner() -> crate::device::Result<()> {
            Err(DeviceError::SessionClosed)
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        let err = outer().unwrap_err();
        assert!(matches!(err, OpticsError::Device(DeviceError::SessionClosed)));
    }

    #[test]
    fn question_mark_propagation_io_to_optics() {
        fn inner() -> std::io::Result<()> {
            Err(std::io::Error::new(std::io::ErrorKind::NotFound, "nope"))
        }
        fn outer() -> Result<()> {
            inner()?;
            Ok(())
        }
        let err = outer().unwrap_err();
        assert!(matches!(err, OpticsError::Io(_)));
    }
}
