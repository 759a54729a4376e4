//! Purchase & Verification Workflow
//!
//! ```text
//! Created ──reserve──▶ Reserved ──gateway: paid──▶ Fulfilled
//!                        │  ▲
//!                        │  └── pending / failed / unknown (retry later)
//!                        ├──sweep──▶ Expired
//!                        └──key already issued──▶ FulfillmentConflict
//! ```
//!
//! Gateway calls never run under a lock. The fulfillment lock serializes
//! ledger commits (reserve), fulfillment (issue + remove) and sweeps, so
//! none of them sees another half done.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ShopConfig;
use crate::error::{Result, ShopError};
use crate::gateway::{PaymentGateway, PaymentStatus};
use crate::inventory::LicenseInventory;
use crate::ledger::{ReservationLedger, ReservationRecord};
use crate::license::LicenseKey;
use crate::plan::{Offer, PlanDuration};

/// Result of `initiate_purchase`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// Key reserved; buyer should pay at `checkout_url`
    Started {
        session_id: String,
        checkout_url: String,
        duration: PlanDuration,
    },
    /// Buyer has an outstanding attempt (`None` while one is being opened)
    AlreadyPending { session_id: Option<String> },
    OutOfStock { duration: PlanDuration },
    /// No gateway price configured for the plan
    NotOffered { duration: PlanDuration },
    /// Gateway failed; nothing was changed
    GatewayUnavailable,
}

/// Result of `verify`
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum VerifyOutcome {
    Fulfilled {
        key: LicenseKey,
        duration: PlanDuration,
    },
    NotYetPaid { status: PaymentStatus },
    NoSuchReservation,
    /// Paid, but the key was already issued elsewhere. Needs a human.
    FulfillmentConflict {
        key: LicenseKey,
        duration: PlanDuration,
    },
    /// Gateway failed; nothing was changed
    GatewayUnavailable,
}

/// Result of `check_payment`; never carries a key
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PaymentCheck {
    /// Paid and still reserved; the buyer collects the key through `verify`
    AwaitingClaim { duration: PlanDuration },
    NotYetPaid { status: PaymentStatus },
    NoSuchReservation,
    GatewayUnavailable,
}

impl PaymentCheck {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::AwaitingClaim { .. } => "awaiting_claim",
            Self::NotYetPaid { .. } => "not_yet_paid",
            Self::NoSuchReservation => "no_such_reservation",
            Self::GatewayUnavailable => "gateway_unavailable",
        }
    }
}

/// One session's result in a buyer-wide verification
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionVerification {
    pub session_id: String,
    pub outcome: VerifyOutcome,
}

/// Result of a sweep
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Session ids removed from the ledger
    pub removed: Vec<String>,

    /// Removed sessions whose key could not be returned to inventory
    pub unreleased: Vec<String>,
}

/// The storefront core: inventory, ledger and gateway behind one API
pub struct Storefront {
    config: ShopConfig,
    inventory: LicenseInventory,
    ledger: Arc<dyn ReservationLedger>,
    gateway: Arc<dyn PaymentGateway>,
    fulfillment: Mutex<()>,
    in_flight: Mutex<HashSet<String>>,
}

impl Storefront {
    pub fn new(
        config: ShopConfig,
        inventory: LicenseInventory,
        ledger: Arc<dyn ReservationLedger>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            config,
            inventory,
            ledger,
            gateway,
            fulfillment: Mutex::new(()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub const fn config(&self) -> &ShopConfig {
        &self.config
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.name()
    }

    /// Open reservations
    pub fn pending_count(&self) -> usize {
        self.ledger.len()
    }

    /// Reserve a key for `buyer_id` and open a checkout session for it
    pub async fn initiate_purchase(
        &self,
        buyer_id: &str,
        duration: PlanDuration,
        now: DateTime<Utc>,
    ) -> Result<PurchaseOutcome> {
        let Some(price_ref) = self.config.price_ref(duration) else {
            tracing::warn!(duration = %duration, "No price configured for plan");
            return Ok(PurchaseOutcome::NotOffered { duration });
        };

        let Some(_slot) = BuyerSlot::claim(&self.in_flight, buyer_id) else {
            return Ok(PurchaseOutcome::AlreadyPending { session_id: None });
        };

        let active = self.ledger.lookup_active_by_buyer(
            buyer_id,
            now,
            self.config.purchase_block_window,
        )?;
        if let Some(existing) = active.first() {
            tracing::info!(
                buyer_id = %buyer_id,
                session_id = %existing.session_id,
                "Purchase blocked by pending session"
            );
            return Ok(PurchaseOutcome::AlreadyPending {
                session_id: Some(existing.session_id.clone()),
            });
        }

        let key = match self.inventory.take(duration) {
            Ok(key) => key,
            Err(ShopError::OutOfStock(_)) => return Ok(PurchaseOutcome::OutOfStock { duration }),
            Err(e) => return Err(alert(e)),
        };

        let session = match self
            .gateway
            .create_session(
                price_ref,
                &self.config.success_url,
                &self.config.cancel_url,
                now + self.config.sweep_window,
            )
            .await
        {
            Ok(session) => session,
            Err(e) => {
                tracing::warn!(
                    buyer_id = %buyer_id,
                    duration = %duration,
                    gateway = self.gateway.name(),
                    error = %e,
                    "Checkout session creation failed"
                );
                self.release_or_alert(duration, &key)?;
                return Ok(PurchaseOutcome::GatewayUnavailable);
            }
        };

        let record = ReservationRecord::new(
            session.session_id.clone(),
            buyer_id,
            duration,
            key.clone(),
            now,
        );
        let reserved = {
            let _commit = self.lock_fulfillment();
            self.ledger.reserve(record)
        };

        if let Err(e) = reserved {
            self.release_or_alert(duration, &key)?;
            return Err(alert(ShopError::InternalInconsistency(format!(
                "reservation for session {} rejected after key was taken: {e}",
                session.session_id
            ))));
        }

        tracing::info!(
            buyer_id = %buyer_id,
            session_id = %session.session_id,
            duration = %duration,
            "Reserved license key"
        );
        Ok(PurchaseOutcome::Started {
            session_id: session.session_id,
            checkout_url: session.checkout_url,
            duration,
        })
    }

    /// Check payment for a session and hand over its key once paid.
    ///
    /// Safe to call any number of times; a fulfilled session answers
    /// `NoSuchReservation` afterwards.
    pub async fn verify(&self, session_id: &str, now: DateTime<Utc>) -> Result<VerifyOutcome> {
        let Some(record) = self.ledger.lookup_by_session(session_id)? else {
            return Ok(VerifyOutcome::NoSuchReservation);
        };

        let status = match self.gateway.session_status(session_id).await {
            Ok(status) => status,
            Err(e) => {
                tracing::warn!(
                    session_id = %session_id,
                    gateway = self.gateway.name(),
                    error = %e,
                    "Payment status lookup failed"
                );
                return Ok(VerifyOutcome::GatewayUnavailable);
            }
        };

        if !status.is_paid() {
            tracing::debug!(
                session_id = %session_id,
                status = %status,
                age_secs = record.age(now).num_seconds(),
                "Session not yet paid"
            );
            return Ok(VerifyOutcome::NotYetPaid { status });
        }

        self.fulfill(session_id)
    }

    /// Ask the gateway about a session without fulfilling it.
    ///
    /// For observers such as payment webhooks: the reservation and its held
    /// key stay in place until the buyer claims them through `verify`.
    pub async fn check_payment(&self, session_id: &str) -> Result<PaymentCheck> {
        let Some(record) = self.ledger.lookup_by_session(session_id)? else {
            return Ok(PaymentCheck::NoSuchReservation);
        };

        match self.gateway.session_status(session_id).await {
            Ok(status) if status.is_paid() => Ok(PaymentCheck::AwaitingClaim {
                duration: record.duration,
            }),
            Ok(status) => Ok(PaymentCheck::NotYetPaid { status }),
            Err(e) => {
                tracing::warn!(session_id = %session_id, error = %e, "Payment status lookup failed");
                Ok(PaymentCheck::GatewayUnavailable)
            }
        }
    }

    /// Verify every reservation a buyer holds, oldest first.
    ///
    /// An empty result means the buyer has nothing pending.
    pub async fn verify_buyer(
        &self,
        buyer_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SessionVerification>> {
        let records = self.ledger.lookup_by_buyer(buyer_id)?;
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            let outcome = self.verify(&record.session_id, now).await?;
            results.push(SessionVerification {
                session_id: record.session_id,
                outcome,
            });
        }
        Ok(results)
    }

    /// Remove reservations older than the sweep window and return their
    /// keys to inventory
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let _commit = self.lock_fulfillment();
        let swept = self.ledger.sweep_expired(now, self.config.sweep_window)?;

        let mut report = SweepReport::default();
        for record in swept {
            if let Err(e) = self.inventory.release(record.duration, &record.key) {
                tracing::error!(
                    alert = true,
                    session_id = %record.session_id,
                    duration = %record.duration,
                    key = %record.key,
                    error = %e,
                    "Swept reservation key could not be returned to inventory"
                );
                report.unreleased.push(record.session_id.clone());
            }
            report.removed.push(record.session_id);
        }

        if !report.removed.is_empty() {
            tracing::info!(
                removed = report.removed.len(),
                unreleased = report.unreleased.len(),
                "Swept expired reservations"
            );
        }
        Ok(report)
    }

    /// Available keys for a plan (display only)
    pub fn peek_count(&self, duration: PlanDuration) -> usize {
        self.inventory.peek_count(duration)
    }

    /// Plans that can be bought right now
    pub fn offers(&self) -> Vec<Offer> {
        PlanDuration::ALL
            .into_iter()
            .filter(|d| self.config.price_ref(*d).is_some())
            .filter_map(|duration| {
                let available = self.inventory.peek_count(duration);
                (available > 0).then(|| {
                    let pricing = duration.pricing();
                    Offer {
                        duration,
                        label: pricing.menu_label(),
                        price_eur: pricing.price_eur,
                        available,
                    }
                })
            })
            .collect()
    }

    fn fulfill(&self, session_id: &str) -> Result<VerifyOutcome> {
        let _commit = self.lock_fulfillment();

        let Some(record) = self.ledger.lookup_by_session(session_id)? else {
            tracing::warn!(
                session_id = %session_id,
                "Paid session lost its reservation before fulfillment"
            );
            return Ok(VerifyOutcome::NoSuchReservation);
        };

        if !self.inventory.issue(record.duration, &record.key) {
            tracing::error!(
                session_id = %session_id,
                buyer_id = %record.buyer_id,
                duration = %record.duration,
                "Paid reservation's key was already issued; manual reconciliation required"
            );
            return Ok(VerifyOutcome::FulfillmentConflict {
                key: record.key,
                duration: record.duration,
            });
        }

        // the key is issued now; a leftover record can only ever conflict
        if let Err(e) = self.ledger.remove(session_id) {
            tracing::warn!(session_id = %session_id, error = %e, "Failed to retire fulfilled reservation");
        }

        tracing::info!(
            session_id = %session_id,
            buyer_id = %record.buyer_id,
            duration = %record.duration,
            "Fulfilled license purchase"
        );
        Ok(VerifyOutcome::Fulfilled {
            key: record.key,
            duration: record.duration,
        })
    }

    fn release_or_alert(&self, duration: PlanDuration, key: &LicenseKey) -> Result<()> {
        self.inventory.release(duration, key).map_err(|e| {
            alert(ShopError::InternalInconsistency(format!(
                "key {key} ({duration}) left inventory and could not be restored: {e}"
            )))
        })
    }

    fn lock_fulfillment(&self) -> MutexGuard<'_, ()> {
        self.fulfillment.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn alert(err: ShopError) -> ShopError {
    if err.requires_alert() {
        tracing::error!(alert = true, error = %err, "Storefront needs operator attention");
    }
    err
}

/// Marks a buyer as mid-initiation until dropped
struct BuyerSlot<'a> {
    in_flight: &'a Mutex<HashSet<String>>,
    buyer_id: String,
}

impl<'a> BuyerSlot<'a> {
    fn claim(in_flight: &'a Mutex<HashSet<String>>, buyer_id: &str) -> Option<Self> {
        let mut buyers = in_flight.lock().unwrap_or_else(PoisonError::into_inner);
        buyers.insert(buyer_id.to_string()).then(|| Self {
            in_flight,
            buyer_id: buyer_id.to_string(),
        })
    }
}

impl Drop for BuyerSlot<'_> {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.buyer_id);
    }
}
