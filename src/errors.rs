/*!
 * Error types for the narravox pipeline.
 *
 * Each stage has its own error enum built with thiserror. The pipeline logs
 * most of them, marks the affected segment and continues. Only `AppError`
 * crosses the application boundary.
 */

use thiserror::Error;

/// Errors that can occur when talking to an external generation service
#[derive(Error, Debug, Clone)]
pub enum ProviderError {
    /// Error when making an API request fails
    #[error("API request failed: {0}")]
    RequestFailed(String),

    /// Error when parsing an API response fails
    #[error("Failed to parse API response: {0}")]
    ParseError(String),

    /// Error returned by the API itself
    #[error("API responded with error: {status_code} - {message}")]
    ApiError {
        /// HTTP status code
        status_code: u16,
        /// Error message from the API
        message: String,
    },

    /// Error establishing or maintaining a connection
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error related to rate limiting
    #[error("Rate limit exceeded: {0}")]
    RateLimitExceeded(String),

    /// Error with authentication
    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    /// The collaborator is not configured for this run
    #[error("Provider not configured: {0}")]
    NotConfigured(String),
}

impl ProviderError {
    /// Build the error matching an HTTP status returned by a provider
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match status_code {
            401 | 403 => Self::AuthenticationError(message),
            429 => Self::RateLimitExceeded(message),
            _ => Self::ApiError { status_code, message },
        }
    }

    /// Whether retrying the same request can succeed
    ///
    /// Client errors are final, except request timeouts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::ApiError { status_code, .. } => {
                *status_code >= 500 || *status_code == 408
            }
            Self::AuthenticationError(_) | Self::NotConfigured(_) => false,
            Self::RequestFailed(_)
            | Self::ParseError(_)
            | Self::ConnectionError(_)
            | Self::RateLimitExceeded(_) => true,
        }
    }
}

/// Errors raised while binding a text segment to its reference audio
#[derive(Error, Debug)]
pub enum ResolutionError {
    /// The voice profile is not present in the reference store
    #[error("Unknown voice profile: {0}")]
    UnknownVoiceProfile(String),

    /// The voice profile exists but carries no reference entries
    #[error("Voice profile '{0}' has no reference audio")]
    EmptyReferenceSet(String),

    /// Computing an embedding failed
    #[error("Embedding failed: {0}")]
    Embedding(#[from] ProviderError),

    /// Reading the reference audio or its transcript failed
    #[error("Reference audio error for {path}: {message}")]
    ReferenceIo {
        /// Location of the reference file
        path: String,
        /// Underlying IO error
        message: String,
    },

    /// No transcript was supplied and none could be produced
    #[error("No transcript available for reference audio {0}")]
    MissingTranscript(String),
}

/// Terminal per-segment synthesis errors
#[derive(Error, Debug)]
pub enum SynthesisError {
    /// Every attempt of the backoff schedule failed
    #[error("Segment {order} failed after {attempts} attempts: {last_error}")]
    RetryExhausted {
        /// Segment order
        order: usize,
        /// Number of attempts made
        attempts: usize,
        /// Message of the last failure
        last_error: String,
    },

    /// The service refused the request; it was not retried
    #[error("Segment {order} rejected after {attempts} attempt(s): {cause}")]
    Rejected {
        /// Segment order
        order: usize,
        /// Number of attempts made
        attempts: usize,
        /// Message of the refusal
        cause: String,
    },

    /// Persisting an artifact failed
    #[error("Failed to persist artifact for segment {order}: {message}")]
    Artifact {
        /// Segment order
        order: usize,
        /// Underlying error message
        message: String,
    },
}

/// Main application error type that wraps all other errors
#[derive(Error, Debug)]
pub enum AppError {
    /// Error from a file operation
    #[error("File error: {0}")]
    File(String),

    /// Error in the configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Error from a provider
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// Error from reference resolution
    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    /// Error from synthesis
    #[error("Synthesis error: {0}")]
    Synthesis(#[from] SynthesisError),

    /// Any other error
    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<anyhow::Error> for AppError {
    fn from(error: anyhow::Error) -> Self {
        Self::Unknown(error.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(error: std::io::Error) -> Self {
        Self::File(error.to_string())
    }
}
