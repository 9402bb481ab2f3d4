//! Error types for remote collaborators, the settings store and the media library.
use std::time::Duration;

/// Failure talking to the account service or the alt-text generator.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    /// The call exceeded its deadline.
    #[error("{endpoint} timed out after {timeout:?}")]
    Timeout { endpoint: &'static str, timeout: Duration },
    /// The request never produced an HTTP response (DNS, TLS, connection reset).
    #[error("connection to {endpoint} failed: {message}")]
    Transport { endpoint: &'static str, message: String },
    /// A non-2xx response.
    #[error("{endpoint} returned HTTP {status}: {message}")]
    Status { endpoint: &'static str, status: u16, message: String },
    /// The account service does not know this site.
    #[error("site is not registered with the account service")]
    SiteNotRegistered,
    /// A 2xx response carrying `success: false`.
    #[error("{endpoint} rejected the request: {message}")]
    Rejected { endpoint: &'static str, message: String },
    /// The body could not be decoded.
    #[error("malformed response from {endpoint}: {message}")]
    Decode { endpoint: &'static str, message: String },
}

impl RemoteError {
    /// Check if this error is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }

    /// Timeouts and connection failures: nothing was heard back from the remote.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Transport { .. })
    }

    /// Check if the remote reported the site as unregistered.
    pub fn is_not_registered(&self) -> bool {
        matches!(self, Self::SiteNotRegistered)
    }

    /// Message suitable for showing to an administrator.
    pub fn user_message(&self) -> String {
        match self {
            Self::Timeout { .. } | Self::Transport { .. } => format!("Connection error: {self}"),
            Self::Status { message, .. } | Self::Rejected { message, .. } => message.clone(),
            Self::SiteNotRegistered => self.to_string(),
            Self::Decode { .. } => "Unexpected response from the alt text service".to_string(),
        }
    }
}

/// Failure reading or writing host-managed settings.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to decode value for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("settings backend unavailable: {0}")]
    Backend(String),
}

/// Failure resolving or updating an image record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MediaError {
    #[error("image {0} not found")]
    NotFound(u64),
    #[error("attachment {0} is not an image")]
    NotAnImage(u64),
    #[error("could not resolve a URL for image {0}")]
    MissingUrl(u64),
    #[error("media library error: {0}")]
    Backend(String),
}

/// Configuration could not be loaded or failed validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration syntax: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
