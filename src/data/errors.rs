use thiserror::Error;

/// One provider's terminal failure, kept for chain diagnostics.
#[derive(Debug, Clone)]
pub struct ProviderFailure {
    pub provider: String,
    pub error: String,
    /// True when the provider succeeded but returned an empty series.
    pub no_data: bool,
}

impl std::fmt::Display for ProviderFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.provider, self.error)
    }
}

/// Error types for market data operations
#[derive(Error, Debug)]
pub enum DataError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Parse error: {message}")]
    Parse { message: String },

    #[error("API error: {message} (status: {status_code})")]
    Api { status_code: u16, message: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Rate limit exceeded, retry after {retry_after} seconds")]
    RateLimit { retry_after: u64 },

    #[error("Invalid symbol: {0}")]
    InvalidSymbol(String),

    #[error("No data available for {symbol} between {start} and {end}")]
    NoData {
        symbol: String,
        start: String,
        end: String,
    },

    #[error("Timeout error: operation took longer than {timeout_seconds}s")]
    Timeout { timeout_seconds: u64 },

    #[error("Data validation error: {field} - {message}")]
    Validation { field: String, message: String },

    #[error("All providers exhausted for {symbol}: [{}]", .failures.iter().map(|f| f.to_string()).collect::<Vec<_>>().join("; "))]
    ChainExhausted {
        symbol: String,
        failures: Vec<ProviderFailure>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for data operations
pub type DataResult<T> = Result<T, DataError>;

impl DataError {
    /// Check if error is retryable within a single provider
    pub fn is_retryable(&self) -> bool {
        match self {
            DataError::Network(e) => {
                // A connect/timeout/transfer failure may clear up; a body
                // decode failure will not.
                !e.is_decode()
            }
            DataError::RateLimit { .. } => true,
            DataError::Timeout { .. } => true,
            DataError::Api { status_code, .. } => {
                // Retry on server errors (5xx) and rate limiting (429)
                *status_code >= 500 || *status_code == 429
            }
            _ => false,
        }
    }

    /// Create a parse error with context
    pub fn parse_error<S: Into<String>>(message: S) -> Self {
        DataError::Parse {
            message: message.into(),
        }
    }

    /// Create a validation error with field context
    pub fn validation_error<S: Into<String>>(field: S, message: S) -> Self {
        DataError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create an API error with status code
    pub fn api_error<S: Into<String>>(status_code: u16, message: S) -> Self {
        DataError::Api {
            status_code,
            message: message.into(),
        }
    }
}
