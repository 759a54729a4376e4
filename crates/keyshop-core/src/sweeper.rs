//! Expiry Sweeper
//!
//! Recurring task that purges stale reservations. Without it the ledger
//! grows without bound and abandoned checkouts keep their keys held.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::storefront::Storefront;

/// Spawn the sweeper on the current tokio runtime.
///
/// Runs `sweep_expired` every `every`; the first sweep happens one period
/// after start. Abort the handle to stop it.
pub fn spawn_sweeper(storefront: Arc<Storefront>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // interval's first tick completes immediately
        ticker.tick().await;

        loop {
            ticker.tick().await;
            // the sweep saves inventory to disk under the fulfillment lock
            let shop = storefront.clone();
            let pass = tokio::task::spawn_blocking(move || shop.sweep_expired(Utc::now())).await;
            match pass {
                Ok(Ok(report)) => {
                    tracing::debug!(
                        removed = report.removed.len(),
                        pending = storefront.pending_count(),
                        "Sweeper pass complete"
                    );
                }
                Ok(Err(e)) => {
                    tracing::error!(alert = e.requires_alert(), error = %e, "Sweeper pass failed");
                }
                Err(e) => {
                    tracing::error!(alert = true, error = %e, "Sweeper pass did not complete");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use chrono::TimeDelta;

    use super::*;
    use crate::config::ShopConfig;
    use crate::gateway::MockGateway;
    use crate::inventory::{Inventory, LicenseInventory, MemoryInventoryStore};
    use crate::ledger::{MemoryLedger, ReservationLedger};
    use crate::plan::PlanDuration;
    use crate::storefront::PurchaseOutcome;

    #[tokio::test]
    async fn test_sweeper_purges_in_background() {
        let ledger = Arc::new(MemoryLedger::new());
        let shop = Arc::new(Storefront::new(
            ShopConfig::default().with_price(PlanDuration::Lifetime, "price_life"),
            LicenseInventory::open(MemoryInventoryStore::new(
                Inventory::new().with_keys(PlanDuration::Lifetime, ["K1"]),
            ))
            .unwrap(),
            ledger.clone(),
            Arc::new(MockGateway::new()),
        ));

        let outcome = shop
            .initiate_purchase("buyer", PlanDuration::Lifetime, Utc::now() - TimeDelta::hours(3))
            .await
            .unwrap();
        assert!(matches!(outcome, PurchaseOutcome::Started { .. }));
        assert_eq!(shop.peek_count(PlanDuration::Lifetime), 0);

        let handle = spawn_sweeper(shop.clone(), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.abort();

        assert!(ledger.is_empty());
        assert_eq!(shop.peek_count(PlanDuration::Lifetime), 1);
    }
}
