//! Stripe Webhook Handling
//!
//! Checkout events are observed, never acted on: the payload is not trusted
//! for payment state, so each relevant event re-polls the gateway through
//! `check_payment`. Keys are only handed over when the buyer verifies,
//! since nobody is listening on this path to receive one.

use std::sync::Arc;

use keyshop_core::{PaymentCheck, Result, ShopError, Storefront};
use stripe::{Event, EventObject, EventType, Webhook};

/// Parsed webhook event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WebhookEvent {
    /// Buyer finished checkout (payment may still be settling)
    CheckoutCompleted { session_id: String },

    /// Delayed payment method settled
    AsyncPaymentSucceeded { session_id: String },

    /// Delayed payment method failed
    AsyncPaymentFailed { session_id: String },

    /// Stripe expired the session unpaid
    CheckoutExpired { session_id: String },

    /// Unhandled event type
    Other { event_type: String },
}

impl WebhookEvent {
    /// Session whose payment should be checked, if any
    pub fn session_to_verify(&self) -> Option<&str> {
        match self {
            Self::CheckoutCompleted { session_id } | Self::AsyncPaymentSucceeded { session_id } => {
                Some(session_id)
            }
            _ => None,
        }
    }
}

/// Webhook handler
pub struct WebhookHandler {
    storefront: Arc<Storefront>,
    secret: String,
}

impl WebhookHandler {
    pub fn new(storefront: Arc<Storefront>, secret: impl Into<String>) -> Self {
        Self {
            storefront,
            secret: secret.into(),
        }
    }

    /// Verify webhook signature and parse event
    pub fn parse_event(&self, payload: &str, signature: &str) -> Result<Event> {
        Webhook::construct_event(payload, signature, &self.secret)
            .map_err(|e| ShopError::WebhookSignature(e.to_string()))
    }

    /// Process a webhook event, checking the payment of the session it
    /// concerns. The reservation is left for the buyer to claim.
    pub async fn handle(&self, event: Event) -> Result<(WebhookEvent, Option<PaymentCheck>)> {
        tracing::info!(event_type = ?event.type_, "Processing Stripe webhook");

        let parsed = parse_webhook_event(&event)?;

        let outcome = match parsed.session_to_verify() {
            Some(session_id) => {
                let check = self.storefront.check_payment(session_id).await?;
                tracing::info!(
                    session_id = %session_id,
                    outcome = check.as_str(),
                    "Webhook payment check"
                );
                Some(check)
            }
            None => {
                match &parsed {
                    WebhookEvent::AsyncPaymentFailed { session_id } => {
                        tracing::warn!(session_id = %session_id, "Delayed payment failed");
                    }
                    WebhookEvent::CheckoutExpired { session_id } => {
                        tracing::debug!(session_id = %session_id, "Checkout session expired");
                    }
                    _ => tracing::debug!(event = ?parsed, "Unhandled webhook event"),
                }
                None
            }
        };

        Ok((parsed, outcome))
    }
}

/// Parse Stripe event into our event type
fn parse_webhook_event(event: &Event) -> Result<WebhookEvent> {
    let session_id = || match &event.data.object {
        EventObject::CheckoutSession(session) => Ok(session.id.to_string()),
        _ => Err(ShopError::WebhookParse("Invalid checkout session data".into())),
    };

    match event.type_ {
        EventType::CheckoutSessionCompleted => Ok(WebhookEvent::CheckoutCompleted {
            session_id: session_id()?,
        }),
        EventType::CheckoutSessionAsyncPaymentSucceeded => Ok(WebhookEvent::AsyncPaymentSucceeded {
            session_id: session_id()?,
        }),
        EventType::CheckoutSessionAsyncPaymentFailed => Ok(WebhookEvent::AsyncPaymentFailed {
            session_id: session_id()?,
        }),
        EventType::CheckoutSessionExpired => Ok(WebhookEvent::CheckoutExpired {
            session_id: session_id()?,
        }),
        _ => Ok(WebhookEvent::Other {
            event_type: format!("{:?}", event.type_),
        }),
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use keyshop_core::{
        Inventory, LicenseInventory, LicenseKey, MemoryInventoryStore, MemoryLedger, MockGateway,
        PaymentStatus, PlanDuration, PurchaseOutcome, ShopConfig, VerifyOutcome,
    };
    use stripe::{CheckoutSession, CheckoutSessionId, NotificationEventData};

    use super::*;

    fn handler() -> WebhookHandler {
        let shop = Storefront::new(
            ShopConfig::default(),
            LicenseInventory::open(MemoryInventoryStore::new(Inventory::new())).unwrap(),
            Arc::new(MemoryLedger::new()),
            Arc::new(MockGateway::new()),
        );
        WebhookHandler::new(Arc::new(shop), "whsec_test")
    }

    fn checkout_event(type_: EventType, session_id: &str) -> Event {
        Event {
            type_,
            data: NotificationEventData {
                object: EventObject::CheckoutSession(CheckoutSession {
                    id: session_id.parse::<CheckoutSessionId>().unwrap(),
                    ..Default::default()
                }),
                previous_attributes: None,
            },
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_completed_checkout_leaves_key_for_the_buyer() {
        let gateway = Arc::new(MockGateway::new());
        let shop = Arc::new(Storefront::new(
            ShopConfig::default().with_price(PlanDuration::Lifetime, "price_life"),
            LicenseInventory::open(MemoryInventoryStore::new(
                Inventory::new().with_keys(PlanDuration::Lifetime, ["K1"]),
            ))
            .unwrap(),
            Arc::new(MemoryLedger::new()),
            gateway.clone(),
        ));
        let webhooks = WebhookHandler::new(shop.clone(), "whsec_test");

        let now = Utc::now();
        let PurchaseOutcome::Started { session_id, .. } = shop
            .initiate_purchase("buyer", PlanDuration::Lifetime, now)
            .await
            .unwrap()
        else {
            panic!("purchase did not start");
        };
        gateway.set_status(&session_id, PaymentStatus::Paid);

        for _ in 0..2 {
            let (parsed, check) = webhooks
                .handle(checkout_event(EventType::CheckoutSessionCompleted, &session_id))
                .await
                .unwrap();
            assert_eq!(
                parsed,
                WebhookEvent::CheckoutCompleted {
                    session_id: session_id.clone()
                }
            );
            assert_eq!(
                check,
                Some(PaymentCheck::AwaitingClaim {
                    duration: PlanDuration::Lifetime
                })
            );
        }

        assert_eq!(
            shop.verify(&session_id, now).await.unwrap(),
            VerifyOutcome::Fulfilled {
                key: LicenseKey::from("K1"),
                duration: PlanDuration::Lifetime,
            }
        );
    }

    #[tokio::test]
    async fn test_expired_checkout_is_only_logged() {
        let (parsed, check) = handler()
            .handle(checkout_event(EventType::CheckoutSessionExpired, "cs_gone"))
            .await
            .unwrap();
        assert_eq!(
            parsed,
            WebhookEvent::CheckoutExpired {
                session_id: "cs_gone".into()
            }
        );
        assert!(check.is_none());
    }

    #[test]
    fn test_bad_signature_rejected() {
        let result = handler().parse_event(r#"{"id":"evt_1"}"#, "t=1,v1=deadbeef");
        assert!(matches!(result, Err(ShopError::WebhookSignature(_))));
    }

    #[test]
    fn test_only_payment_events_trigger_verification() {
        let completed = WebhookEvent::CheckoutCompleted {
            session_id: "cs_1".into(),
        };
        let settled = WebhookEvent::AsyncPaymentSucceeded {
            session_id: "cs_2".into(),
        };
        let expired = WebhookEvent::CheckoutExpired {
            session_id: "cs_3".into(),
        };

        assert_eq!(completed.session_to_verify(), Some("cs_1"));
        assert_eq!(settled.session_to_verify(), Some("cs_2"));
        assert_eq!(expired.session_to_verify(), None);
        assert_eq!(
            WebhookEvent::Other {
                event_type: "InvoicePaid".into()
            }
            .session_to_verify(),
            None
        );
    }
}
