//! Error Types

use thiserror::Error;

use crate::plan::PlanDuration;

/// Result type alias for storefront operations
pub type Result<T> = std::result::Result<T, ShopError>;

/// Storefront error types
///
/// The caller-facing operations turn the business variants into outcome
/// enums; only `StorageUnavailable` and `InternalInconsistency` escape as
/// `Err` from them.
#[derive(Error, Debug)]
pub enum ShopError {
    /// No available key for the requested plan
    #[error("Out of stock: {0}")]
    OutOfStock(PlanDuration),

    /// Buyer already has an outstanding purchase attempt
    #[error("Buyer {0} already has a pending purchase")]
    AlreadyPending(String),

    /// Session id already present in the ledger
    #[error("Duplicate session: {0}")]
    DuplicateSession(String),

    /// No reservation recorded for the session
    #[error("No reservation for session {0}")]
    NoSuchReservation(String),

    /// Gateway has not confirmed payment
    #[error("Session {0} not yet paid")]
    NotYetPaid(String),

    /// Paid, but the reserved key was already issued elsewhere
    #[error("Fulfillment conflict on session {session_id} for key {key}")]
    FulfillmentConflict { session_id: String, key: String },

    /// Payment gateway unreachable or returned an error
    #[error("Gateway unavailable: {0}")]
    GatewayUnavailable(String),

    /// Gateway rejected the price reference
    #[error("Invalid price reference: {0}")]
    InvalidPriceRef(String),

    /// Inventory store unreadable, malformed or unwritable
    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    /// A key left inventory without being reserved or fulfilled
    #[error("Internal inconsistency: {0}")]
    InternalInconsistency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Webhook signature verification failed
    #[error("Webhook signature invalid: {0}")]
    WebhookSignature(String),

    /// Webhook payload parsing failed
    #[error("Webhook parse error: {0}")]
    WebhookParse(String),
}

impl ShopError {
    /// Check if this error is retryable
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::GatewayUnavailable(_) | Self::NotYetPaid(_))
    }

    /// Errors that must reach an operator instead of being retried
    pub const fn requires_alert(&self) -> bool {
        matches!(
            self,
            Self::StorageUnavailable(_) | Self::InternalInconsistency(_)
        )
    }

    /// Get user-friendly message
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::OutOfStock(_) => {
                "Sorry, no licenses are available for this plan. Please try another option or contact support."
            }
            Self::AlreadyPending(_) => {
                "You have an incomplete payment session. Please complete it or wait for it to expire."
            }
            Self::NoSuchReservation(_) => "Invalid session ID or payment already claimed.",
            Self::NotYetPaid(_) => "Payment not completed yet. Please complete payment and try again.",
            Self::FulfillmentConflict { .. } => {
                "Error: License key no longer available. Please contact support."
            }
            Self::GatewayUnavailable(_) | Self::InvalidPriceRef(_) => {
                "There was an error processing your request. Please try again later."
            }
            _ => "Error processing license. Please contact support.",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_classification() {
        assert!(ShopError::StorageUnavailable("disk".into()).requires_alert());
        assert!(ShopError::InternalInconsistency("lost key".into()).requires_alert());
        assert!(!ShopError::OutOfStock(PlanDuration::Lifetime).requires_alert());
        assert!(!ShopError::GatewayUnavailable("timeout".into()).requires_alert());
    }

    #[test]
    fn test_gateway_errors_are_generic_to_buyer() {
        let unavailable = ShopError::GatewayUnavailable("502 from upstream".into());
        let bad_price = ShopError::InvalidPriceRef("price_missing".into());
        assert_eq!(unavailable.user_message(), bad_price.user_message());
        assert!(!unavailable.user_message().contains("502"));
        assert!(unavailable.is_retryable());
    }
}
