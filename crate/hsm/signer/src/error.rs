use std::time::Duration;

use thiserror::Error;

use crate::SlotIdentifier;

pub type HResult<T> = Result<T, HError>;

/// The families of failures a caller has to tell apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Malformed module configuration; the module is unusable until it is fixed.
    Configuration,
    /// The policy refuses the request; try another key, slot or mechanism.
    PolicyDenied,
    /// The token failed or was not available; the operation may succeed if retried.
    Device,
    /// The calling code misused an API.
    Programming,
    Other,
}

#[derive(Error, Debug)]
pub enum HError {
    #[error("{0}")]
    Default(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("No PKCS#11 library configured for operating system '{0}'")]
    NoLibraryForPlatform(String),

    #[error("Unknown mechanism: {0}")]
    UnknownMechanism(String),

    #[error("Mechanism {mechanism} is not permitted on slot {slot}")]
    MechanismNotPermitted {
        slot: SlotIdentifier,
        mechanism: String,
    },

    #[error("Slot {0} is excluded by the module configuration")]
    SlotExcluded(SlotIdentifier),

    #[error("No session available on slot {slot} after waiting {waited:?}")]
    SessionTimeout {
        slot: SlotIdentifier,
        waited: Duration,
    },

    #[error("Token error: {0}")]
    Token(String),

    #[error("Unsupported key type: {0}")]
    UnsupportedKeyType(String),

    #[error("Security error: {0}")]
    Security(String),

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    #[error("Unsupported PSS trailer field: {0}")]
    UnsupportedTrailer(u32),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Error loading the library: {0}")]
    LibLoading(#[from] libloading::Error),

    #[error("OpenSSL error: {0}")]
    OpenSsl(#[from] openssl::error::ErrorStack),

    #[error(transparent)]
    TryFromInt(#[from] std::num::TryFromIntError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML configuration: {0}")]
    Toml(#[from] toml::de::Error),
}

impl HError {
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::InvalidConfiguration(_)
            | Self::NoLibraryForPlatform(_)
            | Self::Toml(_)
            | Self::LibLoading(_) => ErrorCategory::Configuration,
            Self::MechanismNotPermitted { .. } | Self::SlotExcluded(_) => {
                ErrorCategory::PolicyDenied
            }
            Self::SessionTimeout { .. } | Self::Token(_) | Self::UnsupportedKeyType(_) => {
                ErrorCategory::Device
            }
            Self::IllegalState(_)
            | Self::UnsupportedOperation(_)
            | Self::UnsupportedTrailer(_)
            | Self::InvalidParameter(_)
            | Self::InvalidKey(_)
            | Self::Security(_) => ErrorCategory::Programming,
            Self::Default(_)
            | Self::UnknownMechanism(_)
            | Self::OpenSsl(_)
            | Self::TryFromInt(_)
            | Self::Io(_) => ErrorCategory::Other,
        }
    }

    /// Whether retrying the same operation later might succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::SessionTimeout { .. } | Self::Token(_))
    }
}
