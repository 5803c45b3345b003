use thiserror::Error;

/// Error type for every Key Light operation in this crate.
///
/// Client errors stay local to the device that produced them; callers that
/// talk to several lights collect one result per device.
#[derive(Debug, Error)]
pub enum Error {
    /// The request never produced an HTTP response (connection refused,
    /// timeout, DNS failure, ...).
    #[error("failed to reach {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// The device answered with a non-success status.
    #[error("{url} answered with HTTP {status}")]
    HttpStatus { url: String, status: u16 },

    /// The body was not JSON or did not carry a non-empty `lights` array.
    #[error("malformed response from {url}: {message}")]
    MalformedResponse { url: String, message: String },

    /// The stored device list could not be read as a JSON array.
    ///
    /// The registry repairs this on load; it is only surfaced through logs.
    #[error("stored device list is corrupted: {0}")]
    PersistenceCorruption(#[source] serde_json::Error),

    /// The settings store could not be read or written.
    #[error("settings store failure at {path}: {message}")]
    Settings { path: String, message: String },

    #[error("invalid version string {0:?}")]
    InvalidVersion(String),

    #[error("no device at index {0}")]
    NoSuchDevice(usize),

    #[error("mDNS discovery failed: {0}")]
    Discovery(String),
}

impl Error {
    /// Returns `true` for failures reaching a device over HTTP, including
    /// non-success status codes.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::HttpStatus { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
