//! Stripe Checkout Gateway
//!
//! Hosted checkout in one-off `payment` mode; one line item of the plan's
//! Stripe price id. Payment status is polled by session id.

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use keyshop_core::{CheckoutSession, PaymentGateway, PaymentStatus, Result, ShopError};
use stripe::{
    CheckoutSession as StripeCheckoutSession, CheckoutSessionId, CheckoutSessionMode,
    CheckoutSessionPaymentStatus, CheckoutSessionStatus, Client, CreateCheckoutSession,
    CreateCheckoutSessionLineItems, CreateCheckoutSessionPaymentMethodTypes, ErrorCode,
    StripeError, Timestamp,
};

/// Earliest expiry Stripe accepts is 30 minutes out; one minute of slack
/// covers the request in flight
const MIN_SESSION_LIFETIME: TimeDelta = TimeDelta::minutes(31);
const MAX_SESSION_LIFETIME: TimeDelta = TimeDelta::hours(24);

/// Payment methods offered at checkout; all of them support EUR
const PAYMENT_METHODS: [CreateCheckoutSessionPaymentMethodTypes; 6] = [
    CreateCheckoutSessionPaymentMethodTypes::Card,
    CreateCheckoutSessionPaymentMethodTypes::Link,
    CreateCheckoutSessionPaymentMethodTypes::Paypal,
    CreateCheckoutSessionPaymentMethodTypes::Bancontact,
    CreateCheckoutSessionPaymentMethodTypes::Eps,
    CreateCheckoutSessionPaymentMethodTypes::Klarna,
];

/// Stripe-backed [`PaymentGateway`]
pub struct StripeGateway {
    client: Client,
    webhook_secret: Option<String>,
}

impl StripeGateway {
    /// Create a new Stripe gateway
    pub fn new(secret_key: &str, webhook_secret: Option<String>) -> Self {
        Self {
            client: Client::new(secret_key),
            webhook_secret,
        }
    }

    /// Create from environment variables
    ///
    /// `STRIPE_SECRET_KEY` is required; without `STRIPE_WEBHOOK_SECRET`
    /// webhooks are refused and buyers verify by polling only.
    pub fn from_env() -> Result<Self> {
        let secret_key = std::env::var("STRIPE_SECRET_KEY")
            .map_err(|_| ShopError::Config("STRIPE_SECRET_KEY not set".into()))?;
        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").ok();

        Ok(Self::new(&secret_key, webhook_secret))
    }

    /// Get the webhook secret, if configured
    pub fn webhook_secret(&self) -> Option<&str> {
        self.webhook_secret.as_deref()
    }
}

#[async_trait]
impl PaymentGateway for StripeGateway {
    async fn create_session(
        &self,
        price_ref: &str,
        success_url: &str,
        cancel_url: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<CheckoutSession> {
        let mut params = CreateCheckoutSession::new();
        params.expires_at = Some(session_expiry(expires_at, Utc::now()));
        params.success_url = Some(success_url);
        params.cancel_url = Some(cancel_url);
        params.mode = Some(CheckoutSessionMode::Payment);
        params.payment_method_types = Some(PAYMENT_METHODS.to_vec());
        params.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_ref.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]);

        let session = StripeCheckoutSession::create(&self.client, params)
            .await
            .map_err(|e| create_error(e, price_ref))?;

        let checkout_url = session
            .url
            .ok_or_else(|| ShopError::GatewayUnavailable("No checkout URL returned".into()))?;

        tracing::debug!(session_id = %session.id, "Created Stripe checkout session");
        Ok(CheckoutSession {
            session_id: session.id.to_string(),
            checkout_url,
        })
    }

    async fn session_status(&self, session_id: &str) -> Result<PaymentStatus> {
        let Ok(id) = session_id.parse::<CheckoutSessionId>() else {
            return Ok(PaymentStatus::Unknown);
        };

        match StripeCheckoutSession::retrieve(&self.client, &id, &[]).await {
            Ok(session) => Ok(payment_status(session.payment_status, session.status)),
            Err(StripeError::Stripe(ref e)) if e.http_status == 404 => Ok(PaymentStatus::Unknown),
            Err(e) => Err(ShopError::GatewayUnavailable(e.to_string())),
        }
    }

    fn name(&self) -> &str {
        "Stripe"
    }
}

/// Collapse Stripe's session state into the four statuses the core knows.
///
/// A completed session can still be unpaid while a delayed method
/// (bancontact, eps, klarna) settles; that stays `Pending`.
pub(crate) fn payment_status(
    payment: CheckoutSessionPaymentStatus,
    session: Option<CheckoutSessionStatus>,
) -> PaymentStatus {
    match (payment, session) {
        (CheckoutSessionPaymentStatus::Paid | CheckoutSessionPaymentStatus::NoPaymentRequired, _) => {
            PaymentStatus::Paid
        }
        (_, Some(CheckoutSessionStatus::Expired)) => PaymentStatus::Unknown,
        _ => PaymentStatus::Pending,
    }
}

/// Clamp the requested expiry into the window Stripe allows
pub(crate) fn session_expiry(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Timestamp {
    let clamped = expires_at.clamp(now + MIN_SESSION_LIFETIME, now + MAX_SESSION_LIFETIME);
    if clamped != expires_at {
        tracing::warn!(
            requested = %expires_at,
            applied = %clamped,
            "Checkout expiry outside Stripe's limits; session and reservation lifetimes differ"
        );
    }
    clamped.timestamp()
}

fn create_error(err: StripeError, price_ref: &str) -> ShopError {
    match err {
        StripeError::Stripe(e) if e.code == Some(ErrorCode::ResourceMissing) => {
            ShopError::InvalidPriceRef(format!(
                "{price_ref}: {}",
                e.message.unwrap_or_default()
            ))
        }
        other => ShopError::GatewayUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paid_states() {
        assert_eq!(
            payment_status(CheckoutSessionPaymentStatus::Paid, Some(CheckoutSessionStatus::Complete)),
            PaymentStatus::Paid
        );
        assert_eq!(
            payment_status(CheckoutSessionPaymentStatus::NoPaymentRequired, None),
            PaymentStatus::Paid
        );
    }

    #[test]
    fn test_unpaid_states_never_succeed() {
        assert_eq!(
            payment_status(CheckoutSessionPaymentStatus::Unpaid, Some(CheckoutSessionStatus::Open)),
            PaymentStatus::Pending
        );
        assert_eq!(
            payment_status(CheckoutSessionPaymentStatus::Unpaid, Some(CheckoutSessionStatus::Complete)),
            PaymentStatus::Pending
        );
        assert_eq!(
            payment_status(CheckoutSessionPaymentStatus::Unpaid, Some(CheckoutSessionStatus::Expired)),
            PaymentStatus::Unknown
        );
    }

    #[test]
    fn test_session_expiry_follows_reservation() {
        let now = Utc::now();
        let window = now + TimeDelta::hours(1);
        assert_eq!(session_expiry(window, now), window.timestamp());

        assert_eq!(
            session_expiry(now + TimeDelta::minutes(5), now),
            (now + MIN_SESSION_LIFETIME).timestamp()
        );
        assert_eq!(
            session_expiry(now + TimeDelta::days(3), now),
            (now + MAX_SESSION_LIFETIME).timestamp()
        );
    }

    #[tokio::test]
    async fn test_malformed_session_id_is_unknown() {
        let gateway = StripeGateway::new("sk_test_unused", None);
        assert_eq!(
            gateway.session_status("not-a-session").await.unwrap(),
            PaymentStatus::Unknown
        );
        assert!(gateway.webhook_secret().is_none());
    }
}
