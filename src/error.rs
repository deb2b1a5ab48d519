//! Error types for the gateway

use thiserror::Error;

/// Main error type for the gateway
#[derive(Error, Debug)]
pub enum Error {
    /// Specification error (client error)
    #[error("Specification error: {0}")]
    Spec(#[from] SpecError),

    /// Backend transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Expression evaluation error
    #[error("Expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Backend answered with a non-retryable or exhausted failure
    #[error("Backend error (HTTP {status}): {message}")]
    Backend {
        /// HTTP status code returned by the backend
        status: u16,
        /// Message extracted from the backend error envelope
        message: String,
    },

    /// The fan-out executor has been closed
    #[error("Executor is closed")]
    ExecutorClosed,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// HTTP status an upstream REST layer should answer with
    ///
    /// Specification errors are client errors (400); everything else is a
    /// server-side failure (500), except backend failures which keep the
    /// backend's own status.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::Spec(_) => 400,
            Error::Backend { status, .. } => *status,
            _ => 500,
        }
    }

    /// Whether the error was caused by the client's request
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

/// Metric specification errors
///
/// Raised while parsing the textual DSL or validating a decoded
/// specification. Never retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    /// Malformed `rate{...}` options
    #[error("Invalid rate options: {0}")]
    RateFormat(String),

    /// Malformed specification text (term count, trailing input, tag block)
    #[error("Parse error: {0}")]
    Parse(String),

    /// Aggregator name is not known
    #[error("Unknown aggregator: {0}")]
    UnknownAggregator(String),

    /// Downsample directive is not well formed
    #[error("Invalid downsample: {0}")]
    InvalidDownsample(String),

    /// Interpolator name is not known
    #[error("Unknown interpolator: {0}")]
    UnknownInterpolator(String),

    /// Specification is semantically invalid
    #[error("Invalid specification: {0}")]
    Invalid(String),
}

/// Backend transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// Request or connect timed out
    #[error("{0}")]
    Timeout(String),

    /// Could not connect to the backend
    #[error("{0}")]
    Connect(String),

    /// Request could not be built or sent
    #[error("{0}")]
    Request(String),

    /// Response body could not be read
    #[error("{0}")]
    Body(String),
}

impl TransportError {
    /// Short class name of the failure, written into error statuses
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) => "TimeoutError",
            TransportError::Connect(_) => "ConnectError",
            TransportError::Request(_) => "RequestError",
            TransportError::Body(_) => "BodyError",
        }
    }
}

/// RPN expression errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExpressionError {
    /// Symbolic reference could not be resolved in the current bucket
    #[error("Unknown reference: {0}")]
    UnknownReference(String),

    /// Operator needed more operands than the stack holds
    #[error("Stack underflow in operator '{operator}'")]
    StackUnderflow {
        /// Operator that underflowed
        operator: String,
    },

    /// Token is neither a number, an operator nor a valid reference
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Count operand of sort/rev/avg is not a usable integer
    #[error("Invalid count {count} for operator '{operator}'")]
    InvalidCount {
        /// Operator that received the count
        operator: String,
        /// Offending count value
        count: String,
    },

    /// Expression had no tokens or left an empty stack
    #[error("Empty expression")]
    Empty,
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
