use thiserror::Error;

use crate::payment::PaymentStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PaymentError {
    #[error("cannot move payment from {from} to {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },
}

/// Failures talking to, or hearing from, a payment provider.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Network failure, timeout or provider 5xx. Safe to retry with the same
    /// provider reference.
    #[error("gateway unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the request (4xx or business validation).
    #[error("gateway rejected request: {0}")]
    Rejected(String),

    #[error("callback signature mismatch")]
    InvalidSignature,

    #[error("malformed gateway payload: {0}")]
    MalformedPayload(String),

    #[error("gateway not configured: {0}")]
    NotConfigured(String),
}

impl GatewayError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    /// Classify a transport-level failure.
    pub(crate) fn from_transport(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) if status.is_client_error() => GatewayError::Rejected(err.to_string()),
            _ => GatewayError::Unavailable(err.to_string()),
        }
    }
}
