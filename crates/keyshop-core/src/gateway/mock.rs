//! Mock Payment Gateway
//!
//! For testing and local development. Sessions start `Pending` and change
//! only when told to.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{CheckoutSession, PaymentGateway, PaymentStatus};
use crate::error::{Result, ShopError};

/// In-memory gateway with scripted session statuses
#[derive(Debug, Default)]
pub struct MockGateway {
    next_id: AtomicU64,
    sessions: RwLock<HashMap<String, PaymentStatus>>,
    rejected_prices: RwLock<HashSet<String>>,
    expiries: RwLock<HashMap<String, DateTime<Utc>>>,
    offline: AtomicBool,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the status the gateway reports for a session
    pub fn set_status(&self, session_id: &str, status: PaymentStatus) {
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.to_string(), status);
    }

    /// Simulate an outage: every call fails with `GatewayUnavailable`
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Make `create_session` reject a price reference
    pub fn reject_price(&self, price_ref: &str) {
        self.rejected_prices
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(price_ref.to_string());
    }

    /// Number of sessions created so far
    pub fn sessions_created(&self) -> u64 {
        self.next_id.load(Ordering::SeqCst)
    }

    /// When a created session stops accepting payment
    pub fn expires_at(&self, session_id: &str) -> Option<DateTime<Utc>> {
        self.expiries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .copied()
    }

    fn check_online(&self) -> Result<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(ShopError::GatewayUnavailable("mock gateway offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(
        &self,
        price_ref: &str,
        success_url: &str,
        _cancel_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CheckoutSession> {
        self.check_online()?;
        if self
            .rejected_prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(price_ref)
        {
            return Err(ShopError::InvalidPriceRef(price_ref.to_string()));
        }

        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let session_id = format!("cs_mock_{n}");
        self.set_status(&session_id, PaymentStatus::Pending);
        self.expiries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(session_id.clone(), expires_at);

        Ok(CheckoutSession {
            checkout_url: format!("{success_url}?mock_checkout={session_id}"),
            session_id,
        })
    }

    async fn session_status(&self, session_id: &str) -> Result<PaymentStatus> {
        self.check_online()?;
        Ok(self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(session_id)
            .copied()
            .unwrap_or(PaymentStatus::Unknown))
    }

    fn name(&self) -> &str {
        "MockGateway"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_gateway_sessions() {
        let gateway = MockGateway::new();
        let session = gateway
            .create_session(
                "price_lifetime",
                "https://example.com/ok",
                "https://example.com/no",
                Utc::now(),
            )
            .await
            .unwrap();

        assert_eq!(session.session_id, "cs_mock_1");
        assert_eq!(
            gateway.session_status(&session.session_id).await.unwrap(),
            PaymentStatus::Pending
        );

        gateway.set_status(&session.session_id, PaymentStatus::Paid);
        assert!(gateway.session_status(&session.session_id).await.unwrap().is_paid());
        assert_eq!(
            gateway.session_status("cs_never_created").await.unwrap(),
            PaymentStatus::Unknown
        );
    }

    #[tokio::test]
    async fn test_mock_gateway_failures() {
        let gateway = MockGateway::new();
        gateway.reject_price("price_bad");
        assert!(matches!(
            gateway.create_session("price_bad", "a", "b", Utc::now()).await,
            Err(ShopError::InvalidPriceRef(_))
        ));

        gateway.set_offline(true);
        assert!(matches!(
            gateway.session_status("cs_mock_1").await,
            Err(ShopError::GatewayUnavailable(_))
        ));
        assert_eq!(gateway.sessions_created(), 0);
    }
}
