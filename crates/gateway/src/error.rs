use api_client::{ApiError, ErrorCategory};
use thiserror::Error;

/// Which side of the retry policy a failure fell on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Retryable failure that outlasted the attempt budget.
    Transient,
    /// Failure that is never retried.
    Fatal,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    #[error("{operation} failed after {attempts} attempts: {source}")]
    Transient {
        operation: &'static str,
        attempts: u32,
        source: ApiError,
    },

    #[error("{operation} failed: {source}")]
    Fatal {
        operation: &'static str,
        /// Attempts made, the failing one included. Above one, an earlier attempt timed out
        /// or was throttled and may still have reached the exchange.
        attempts: u32,
        source: ApiError,
    },
}

impl GatewayError {
    pub fn kind(&self) -> GatewayErrorKind {
        match self {
            GatewayError::Transient { .. } => GatewayErrorKind::Transient,
            GatewayError::Fatal { .. } => GatewayErrorKind::Fatal,
        }
    }

    /// The last underlying exchange error.
    pub fn cause(&self) -> &ApiError {
        match self {
            GatewayError::Transient { source, .. } | GatewayError::Fatal { source, .. } => source,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        self.cause().category()
    }

    pub fn operation(&self) -> &'static str {
        match self {
            GatewayError::Transient { operation, .. } | GatewayError::Fatal { operation, .. } => {
                operation
            }
        }
    }

    pub fn attempts(&self) -> u32 {
        match self {
            GatewayError::Transient { attempts, .. } | GatewayError::Fatal { attempts, .. } => {
                *attempts
            }
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind() == GatewayErrorKind::Transient
    }
}
