//! Error handling for the quickplay ranker

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Schema document could not be parsed
    #[error("Document parse error at line {line}: {message}")]
    Document { line: usize, message: String },

    /// Schema document parsed but lacked expected sections
    #[error("Schema error: {0}")]
    Schema(String),

    /// Upstream returned a body we could not use
    #[error("API error: {0}")]
    Api(String),

    /// Geolocation lookup failed
    #[error("Geolocation error: {0}")]
    Geo(String),

    /// Direct probe failed
    #[error("Probe error: {0}")]
    Probe(String),

    /// Key-value store error
    #[error("Store error: {0}")]
    Store(String),

    /// Config error
    #[error("Config error: {0}")]
    Config(String),
}
