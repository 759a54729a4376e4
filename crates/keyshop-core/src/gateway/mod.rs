//! Payment Gateway Contract
//!
//! The payment processor is the authority on whether a session was paid.
//! Implement [`PaymentGateway`] per processor; the Stripe implementation
//! lives in `keyshop-payments`.

mod mock;

pub use mock::MockGateway;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Payment state of a checkout session as reported by the gateway
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    /// Gateway no longer recognises the session (e.g. expired).
    /// Means "not yet paid", never success.
    Unknown,
}

impl PaymentStatus {
    pub const fn is_paid(&self) -> bool {
        matches!(self, Self::Paid)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Session opened with the gateway
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutSession {
    /// Gateway session id
    pub session_id: String,

    /// URL the buyer pays at
    pub checkout_url: String,
}

/// Payment gateway trait (Strategy pattern)
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a checkout session for one unit of `price_ref`.
    ///
    /// The session must stop accepting payment at `expires_at`, which is
    /// when its reservation becomes eligible for the sweep. Fails with
    /// `GatewayUnavailable` or `InvalidPriceRef`.
    async fn create_session(
        &self,
        price_ref: &str,
        success_url: &str,
        cancel_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CheckoutSession>;

    /// Current payment status of a session
    async fn session_status(&self, session_id: &str) -> Result<PaymentStatus>;

    /// Gateway name
    fn name(&self) -> &str;
}
