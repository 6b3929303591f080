//! Backend error taxonomy.
//!
//! Every hardware failure is classified into one of these variants so callers
//! can react uniformly: `DeviceGone` is terminal for a handle, `Busy`/`Other`
//! are retryable, `Unsupported` is a capability gap, `PermissionDenied` is
//! actionable by the user.

use thiserror::Error;

/// Errors from backend probing, opening, and hardware writes.
#[derive(Error, Debug)]
pub enum BackendError {
    /// No backend could be selected or the device was never opened.
    #[error("No lighting device available")]
    Unavailable,

    /// The device disappeared (unplug, suspend teardown). Terminal for the
    /// handle that observed it; a fresh probe must create a new handle.
    #[error("Device disconnected")]
    DeviceGone,

    /// Transient contention or timeout. Retry once before surfacing.
    #[error("Device busy: {0}")]
    Busy(String),

    /// The operation is not supported by this backend's capabilities.
    #[error("Operation not supported: {0}")]
    Unsupported(&'static str),

    /// Opening or writing the device was denied by the OS.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Anything else; treated as transient and retried once.
    #[error("Backend error: {0}")]
    Other(String),
}

impl BackendError {
    /// True when the handle must be invalidated and never reused.
    pub fn is_terminal(&self) -> bool {
        matches!(self, BackendError::DeviceGone)
    }

    /// True when the caller may retry the same call once.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BackendError::Busy(_) | BackendError::Other(_))
    }
}

impl From<hidapi::HidError> for BackendError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        let lower = msg.to_ascii_lowercase();
        if lower.contains("permission denied") || lower.contains("eperm") || lower.contains("eacces")
        {
            BackendError::PermissionDenied(msg)
        } else if lower.contains("disconnect")
            || lower.contains("no such device")
            || lower.contains("enodev")
            || lower.contains("device not found")
        {
            BackendError::DeviceGone
        } else if lower.contains("busy") || lower.contains("timed out") || lower.contains("timeout")
        {
            BackendError::Busy(msg)
        } else {
            BackendError::Other(msg)
        }
    }
}

impl From<std::io::Error> for BackendError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match e.kind() {
            ErrorKind::PermissionDenied => BackendError::PermissionDenied(e.to_string()),
            ErrorKind::NotFound => BackendError::DeviceGone,
            ErrorKind::ResourceBusy | ErrorKind::TimedOut | ErrorKind::WouldBlock => {
                BackendError::Busy(e.to_string())
            }
            _ => {
                // ENODEV surfaces as "uncategorized" on some kernels.
                if e.raw_os_error() == Some(libc_enodev()) {
                    BackendError::DeviceGone
                } else {
                    BackendError::Other(e.to_string())
                }
            }
        }
    }
}

const fn libc_enodev() -> i32 {
    19 // ENODEV on Linux
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn test_io_classification() {
        let gone: BackendError = io::Error::from(io::ErrorKind::NotFound).into();
        assert!(matches!(gone, BackendError::DeviceGone));

        let denied: BackendError = io::Error::from(io::ErrorKind::PermissionDenied).into();
        assert!(matches!(denied, BackendError::PermissionDenied(_)));

        let busy: BackendError = io::Error::from(io::ErrorKind::TimedOut).into();
        assert!(matches!(busy, BackendError::Busy(_)));
        assert!(busy.is_retryable());

        let enodev: BackendError = io::Error::from_raw_os_error(19).into();
        assert!(enodev.is_terminal());
    }

    #[test]
    fn test_terminal_flags() {
        assert!(BackendError::DeviceGone.is_terminal());
        assert!(!BackendError::Unsupported("per-key").is_terminal());
        assert!(!BackendError::Unsupported("per-key").is_retryable());
        assert!(BackendError::Other("x".into()).is_retryable());
    }
}
