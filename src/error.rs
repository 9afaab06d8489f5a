//! Error types for the commons-dl library.

use thiserror::Error;

/// Errors that can occur while harvesting, resolving, or downloading.
#[derive(Error, Debug)]
pub enum Error {
    /// HTTP request error (connection, TLS, body read).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reading or writing a CSV table failed.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The configuration file is not valid TOML or has wrongly typed values.
    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A configuration value is missing or invalid.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The catalog answered with a body that could not be parsed.
    ///
    /// Never retried: a well-formed request that yields garbage will yield
    /// garbage again.
    #[error("Malformed response (status {status}, content-type {content_type}): {snippet}")]
    MalformedResponse {
        /// HTTP status of the response.
        status: u16,
        /// Reported content type.
        content_type: String,
        /// First characters of the body.
        snippet: String,
    },

    /// A transient status persisted through every retry.
    #[error("Gave up after {attempts} attempt(s), last status {status}")]
    Transient {
        /// Last HTTP status seen.
        status: u16,
        /// Number of attempts made.
        attempts: u32,
    },

    /// A non-transient HTTP error status.
    #[error("HTTP status {status} for {url}")]
    Status {
        /// HTTP status of the response.
        status: u16,
        /// Requested URL.
        url: String,
    },

    /// JSON (de)serialisation error outside of response parsing.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Returns `true` for errors that must halt the whole run rather than
    /// skip a single item.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::ConfigParse(_) | Self::MalformedResponse { .. }
        )
    }

    /// Builds a [`Error::MalformedResponse`] keeping at most 200 characters of
    /// the body, newlines flattened.
    #[must_use]
    pub fn malformed(status: u16, content_type: &str, body: &str) -> Self {
        let snippet: String = body
            .chars()
            .take(200)
            .map(|c| if c == '\n' { ' ' } else { c })
            .collect();
        Self::MalformedResponse {
            status,
            content_type: content_type.to_string(),
            snippet,
        }
    }
}

/// A specialized `Result` type for commons-dl operations.
pub type Result<T> = std::result::Result<T, Error>;
