//! Error types for the RPC gateway

use ethers::providers::{ProviderError, RpcError};
use thiserror::Error;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;

/// JSON-RPC error codes that describe the node's condition rather than the request
const TRANSIENT_RPC_CODES: &[i64] = &[
    -32005, // limit exceeded
    -32603, // internal error
    429,    // too many requests (some providers reuse the HTTP status)
];

/// Error taxonomy for gateway operations
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Fatal setup problem, e.g. no endpoints configured
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Network, transport or malformed-response failure on one endpoint
    #[error("Transient endpoint error: {message}")]
    TransientEndpoint { message: String },

    #[error("Connection timeout for endpoint: {endpoint} ({timeout_ms}ms)")]
    ConnectionTimeout { endpoint: String, timeout_ms: u64 },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Malformed input or a remote rejection unrelated to endpoint health
    #[error("Operation rejected: {message}")]
    PermanentOperation { message: String },

    #[error(
        "Retries exhausted after {attempts} attempts (endpoints tried: {}): {last_error}",
        .endpoints_tried.join(", ")
    )]
    ExhaustedRetries {
        attempts: u32,
        endpoints_tried: Vec<String>,
        #[source]
        last_error: Box<GatewayError>,
    },

    #[error("Operation cancelled after {attempts} attempts")]
    Cancelled { attempts: u32 },

    /// A mutating call whose effect on chain cannot be confirmed either way
    #[error("Outcome of transaction {tx_hash} is unknown: {last_error}")]
    OutcomeUnknown {
        tx_hash: String,
        #[source]
        last_error: Box<GatewayError>,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Create a new configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration(message.into())
    }

    /// Create a new transient endpoint error
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::TransientEndpoint {
            message: message.into(),
        }
    }

    /// Create a new permanent operation error
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::PermanentOperation {
            message: message.into(),
        }
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal(message.into())
    }

    /// Check if this error should trigger failover to another endpoint
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GatewayError::TransientEndpoint { .. }
                | GatewayError::ConnectionTimeout { .. }
                | GatewayError::Network(_)
        )
    }

    /// Get the error category for logs and metrics
    pub fn category(&self) -> &'static str {
        match self {
            GatewayError::Configuration(_) => "config",
            GatewayError::Config(_) => "config",
            GatewayError::TransientEndpoint { .. } => "transient",
            GatewayError::ConnectionTimeout { .. } => "timeout",
            GatewayError::Network(_) => "network",
            GatewayError::PermanentOperation { .. } => "rejected",
            GatewayError::ExhaustedRetries { .. } => "exhausted",
            GatewayError::Cancelled { .. } => "cancelled",
            GatewayError::OutcomeUnknown { .. } => "ambiguous",
            GatewayError::Io(_) => "io",
            GatewayError::Internal(_) => "internal",
        }
    }

    /// Message suitable for end users; never exposes raw transport errors
    pub fn user_message(&self) -> String {
        match self {
            GatewayError::PermanentOperation { message } => {
                format!("Request rejected: {}", message)
            }
            GatewayError::Cancelled { .. } => "Request cancelled".to_string(),
            GatewayError::OutcomeUnknown { tx_hash, .. } => format!(
                "Transaction {} may have been submitted; check its status before resending",
                tx_hash
            ),
            GatewayError::Configuration(_) | GatewayError::Config(_) => {
                "Service is not configured correctly".to_string()
            }
            _ => "Service temporarily unavailable, please try again later".to_string(),
        }
    }

    /// Number of attempts recorded on retry-related errors
    pub fn attempts(&self) -> Option<u32> {
        match self {
            GatewayError::ExhaustedRetries { attempts, .. } => Some(*attempts),
            GatewayError::Cancelled { attempts } => Some(*attempts),
            _ => None,
        }
    }
}

impl From<ProviderError> for GatewayError {
    fn from(err: ProviderError) -> Self {
        if let Some(response) = err.as_error_response() {
            let message = format!("{} (code {})", response.message, response.code);
            if TRANSIENT_RPC_CODES.contains(&response.code)
                || response.message.to_lowercase().contains("header not found")
            {
                return GatewayError::transient(message);
            }
            return GatewayError::permanent(message);
        }

        match err {
            ProviderError::JsonRpcClientError(inner) => GatewayError::transient(inner.to_string()),
            ProviderError::SerdeJson(e) => {
                GatewayError::transient(format!("malformed response: {}", e))
            }
            ProviderError::HTTPError(e) => GatewayError::Network(e),
            other => GatewayError::permanent(other.to_string()),
        }
    }
}
