//! Read-error classification.
//!
//! Telling "the device was unplugged" apart from "this read hiccuped" depends
//! on host and driver (OS error codes, error strings), so the reader asks an
//! [`ErrorClassifier`] instead of matching codes itself.

use std::io;

/// How the reader should treat a failed read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The device is gone. Fatal immediately; the payload is the user-facing message.
    DeviceRemoved(&'static str),
    /// Looks like a removal but is not confirmed yet. Counted, short fixed pause.
    Suspect,
    /// Generic I/O failure. Counted, growing pause.
    Transient,
}

pub trait ErrorClassifier: Send + Sync {
    /// `consecutive` counts this error too (1 for the first failure in a row).
    fn classify(&self, err: &io::Error, consecutive: u32) -> ErrorClass;
}

/// Codes and markers observed on Windows and Linux USB-serial drivers.
#[derive(Debug, Clone)]
pub struct DefaultClassifier {
    /// OS error codes that mean the device was pulled when they come with a
    /// permission-denied failure.
    pub removal_errnos: Vec<i32>,
    /// Substrings that mean the driver gave up on the device.
    pub removal_markers: Vec<String>,
    /// Lower-case substrings that hint at a removal.
    pub suspect_markers: Vec<String>,
    /// Consecutive suspect errors after which they count as a removal.
    pub suspect_limit: u32,
}

impl Default for DefaultClassifier {
    fn default() -> Self {
        Self {
            removal_errnos: vec![22],
            removal_markers: vec!["ClearCommError failed".to_string()],
            suspect_markers: vec![
                "permission denied".to_string(),
                "device not ready".to_string(),
                "no such device".to_string(),
            ],
            suspect_limit: 3,
        }
    }
}

impl ErrorClassifier for DefaultClassifier {
    fn classify(&self, err: &io::Error, consecutive: u32) -> ErrorClass {
        if err.kind() == io::ErrorKind::PermissionDenied
            && os_code(err).is_some_and(|code| self.removal_errnos.contains(&code))
        {
            return ErrorClass::DeviceRemoved("USB device disconnected");
        }

        let text = err.to_string();
        if self.removal_markers.iter().any(|m| text.contains(m.as_str())) {
            return ErrorClass::DeviceRemoved("USB communication error, check the connection");
        }

        let lower = text.to_lowercase();
        let suspect = err.kind() == io::ErrorKind::PermissionDenied
            || self.suspect_markers.iter().any(|m| lower.contains(m.as_str()));
        if suspect {
            if consecutive >= self.suspect_limit {
                return ErrorClass::DeviceRemoved("Device disconnected");
            }
            return ErrorClass::Suspect;
        }

        ErrorClass::Transient
    }
}

/// OS code carried by `err`. Errors that went through another error type
/// (`serialport::Error` for one) keep only the `(os error N)` text.
fn os_code(err: &io::Error) -> Option<i32> {
    if let Some(code) = err.raw_os_error() {
        return Some(code);
    }
    let text = err.to_string();
    let start = text.rfind("os error ")? + "os error ".len();
    let digits: String = text[start..]
        .chars()
        .take_while(char::is_ascii_digit)
        .collect();
    digits.parse().ok()
}
