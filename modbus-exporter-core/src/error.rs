//! Error types for the scrape pipeline.

use std::num::ParseIntError;

use thiserror::Error;

use crate::profile::FunctionCode;

/// Result type alias using [`ScrapeError`].
pub type Result<T> = std::result::Result<T, ScrapeError>;

/// Errors that can abort a scrape.
///
/// The first three variants are configuration resolution failures: they are
/// raised while turning a device profile into a workload and never reach the
/// network.
#[derive(Debug, Error)]
pub enum ScrapeError {
    /// Register address does not split into `<base>#<digits>`.
    #[error("register '{register}': invalid address format '{address}' (expected '<dec|hex>#<digits>')")]
    InvalidAddressFormat { register: String, address: String },

    /// Register address uses a base keyword other than `dec` or `hex`.
    #[error("register '{register}': unknown address base '{base}' (use 'dec' or 'hex')")]
    UnknownAddressBase { register: String, base: String },

    /// Register address digits do not parse into a 16-bit value.
    #[error("register '{register}': cannot parse address '{address}': {source}")]
    AddressParse {
        register: String,
        address: String,
        #[source]
        source: ParseIntError,
    },

    /// The target could not be reached.
    #[error("error connecting to address {target}: {message}")]
    Connection { target: String, message: String },

    /// A register read failed after the connection was established.
    #[error("read of {function} at address {address} failed: {message}")]
    Read {
        address: u16,
        function: FunctionCode,
        message: String,
    },

    /// A decoded value could not be turned into a valid sample.
    #[error("invalid sample '{name}': {message}")]
    Sample { name: String, message: String },
}

impl ScrapeError {
    /// Stable category name, used as a label on error counters.
    pub fn kind(&self) -> &'static str {
        match self {
            ScrapeError::InvalidAddressFormat { .. }
            | ScrapeError::UnknownAddressBase { .. }
            | ScrapeError::AddressParse { .. } => "config",
            ScrapeError::Connection { .. } => "connection",
            ScrapeError::Read { .. } => "read",
            ScrapeError::Sample { .. } => "sample",
        }
    }

    /// Whether this error stems from the profile rather than the device.
    pub fn is_config(&self) -> bool {
        self.kind() == "config"
    }

    pub(crate) fn connection(target: impl Into<String>, message: impl ToString) -> Self {
        Self::Connection {
            target: target.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn sample(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Sample {
            name: name.into(),
            message: message.into(),
        }
    }
}
