//! Billing error types.
//!
//! Everything in this crate returns [`BillingError`]. The variants are split
//! along the lines callers care about: client mistakes (bad payloads, bad
//! signatures), missing state, gateway trouble, and storage trouble. The
//! [`BillingError::is_retryable`] classification exists for webhook
//! transports that decide between a 2xx acknowledgement and a retry-later
//! response.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BillingError>;

/// Errors produced by billing operations.
#[derive(Debug, Error)]
pub enum BillingError {
    /// No subscription row matched the given identifier.
    #[error("subscription not found: {0}")]
    SubscriptionNotFound(String),

    /// An event referenced a subscription that has not been created locally
    /// yet. Deliveries can arrive out of order; the transport should retry.
    #[error("event {event_id} references subscription {subscription_id} which does not exist yet")]
    OutOfOrderEvent {
        event_id: String,
        subscription_id: String,
    },

    /// The webhook payload could not be parsed.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// The webhook signature header was malformed or did not match.
    #[error("webhook signature verification failed: {0}")]
    InvalidSignature(String),

    /// The webhook timestamp fell outside the freshness window.
    #[error("webhook timestamp is {age_seconds}s from current time, outside the {tolerance_seconds}s window")]
    TimestampOutOfRange {
        age_seconds: i64,
        tolerance_seconds: i64,
    },

    /// The payment gateway rejected or failed a call.
    #[error("gateway error during {operation}: {message}")]
    Gateway { operation: String, message: String },

    /// A storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),

    /// Invariant violation or other internal failure.
    #[error("internal billing error: {0}")]
    Internal(String),
}

impl BillingError {
    /// Shorthand for gateway failures.
    pub fn gateway(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Gateway {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether a transport should retry the triggering delivery.
    ///
    /// Out-of-order events and storage failures are transient by nature.
    /// Signature and payload problems will never succeed on retry.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::OutOfOrderEvent { .. } | Self::Storage(_) | Self::Gateway { .. }
        )
    }

    /// Whether the caller (rather than this system) caused the failure.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidPayload(_) | Self::InvalidSignature(_) | Self::TimestampOutOfRange { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_is_retryable() {
        let err = BillingError::OutOfOrderEvent {
            event_id: "evt_1".to_string(),
            subscription_id: "sub_1".to_string(),
        };
        assert!(err.is_retryable());
        assert!(!err.is_client_error());
    }

    #[test]
    fn signature_failure_is_client_error() {
        let err = BillingError::InvalidSignature("mismatch".to_string());
        assert!(err.is_client_error());
        assert!(!err.is_retryable());
    }

    #[test]
    fn display_includes_operation() {
        let err = BillingError::gateway("cancel_subscription", "timeout");
        assert!(err.to_string().contains("cancel_subscription"));
    }
}
