//! Reservation Ledger
//!
//! In-flight purchase attempts, keyed by payment session id.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ShopError};
use crate::license::LicenseKey;
use crate::plan::PlanDuration;

/// A key bound to one payment attempt
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationRecord {
    /// Gateway checkout session id
    pub session_id: String,

    /// Chat-platform user id of the buyer
    pub buyer_id: String,

    pub duration: PlanDuration,

    /// Key held for this attempt
    pub key: LicenseKey,

    pub created_at: DateTime<Utc>,
}

impl ReservationRecord {
    pub fn new(
        session_id: impl Into<String>,
        buyer_id: impl Into<String>,
        duration: PlanDuration,
        key: LicenseKey,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            buyer_id: buyer_id.into(),
            duration,
            key,
            created_at,
        }
    }

    /// Time since the record was created
    pub fn age(&self, now: DateTime<Utc>) -> TimeDelta {
        now - self.created_at
    }
}

/// Ledger storage trait
///
/// Implementations must make each call atomic on its own; cross-call
/// atomicity is the storefront's job.
pub trait ReservationLedger: Send + Sync {
    /// Insert a record; `DuplicateSession` if the session id exists
    fn reserve(&self, record: ReservationRecord) -> Result<()>;

    /// Get record by session id
    fn lookup_by_session(&self, session_id: &str) -> Result<Option<ReservationRecord>>;

    /// Buyer's records younger than `active_window`, oldest first
    fn lookup_active_by_buyer(
        &self,
        buyer_id: &str,
        now: DateTime<Utc>,
        active_window: TimeDelta,
    ) -> Result<Vec<ReservationRecord>>;

    /// All of a buyer's records regardless of age, oldest first
    fn lookup_by_buyer(&self, buyer_id: &str) -> Result<Vec<ReservationRecord>>;

    /// Delete a record; no error if absent
    fn remove(&self, session_id: &str) -> Result<()>;

    /// Delete and return every record with `now - created_at > expiry_window`
    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        expiry_window: TimeDelta,
    ) -> Result<Vec<ReservationRecord>>;

    /// Number of records
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-memory ledger. Lost on restart.
pub struct MemoryLedger {
    records: RwLock<HashMap<String, ReservationRecord>>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
        }
    }

    fn filter_buyer<F>(&self, buyer_id: &str, keep: F) -> Vec<ReservationRecord>
    where
        F: Fn(&ReservationRecord) -> bool,
    {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut result: Vec<_> = records
            .values()
            .filter(|r| r.buyer_id == buyer_id && keep(r))
            .cloned()
            .collect();
        result.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        result
    }
}

impl ReservationLedger for MemoryLedger {
    fn reserve(&self, record: ReservationRecord) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        if records.contains_key(&record.session_id) {
            return Err(ShopError::DuplicateSession(record.session_id));
        }
        records.insert(record.session_id.clone(), record);
        Ok(())
    }

    fn lookup_by_session(&self, session_id: &str) -> Result<Option<ReservationRecord>> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        Ok(records.get(session_id).cloned())
    }

    fn lookup_active_by_buyer(
        &self,
        buyer_id: &str,
        now: DateTime<Utc>,
        active_window: TimeDelta,
    ) -> Result<Vec<ReservationRecord>> {
        Ok(self.filter_buyer(buyer_id, |r| r.age(now) < active_window))
    }

    fn lookup_by_buyer(&self, buyer_id: &str) -> Result<Vec<ReservationRecord>> {
        Ok(self.filter_buyer(buyer_id, |_| true))
    }

    fn remove(&self, session_id: &str) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        records.remove(session_id);
        Ok(())
    }

    fn sweep_expired(
        &self,
        now: DateTime<Utc>,
        expiry_window: TimeDelta,
    ) -> Result<Vec<ReservationRecord>> {
        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let expired: Vec<String> = records
            .values()
            .filter(|r| r.age(now) > expiry_window)
            .map(|r| r.session_id.clone())
            .collect();

        Ok(expired
            .iter()
            .filter_map(|session_id| records.remove(session_id))
            .collect())
    }

    fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(session: &str, buyer: &str, created_at: DateTime<Utc>) -> ReservationRecord {
        ReservationRecord::new(
            session,
            buyer,
            PlanDuration::Lifetime,
            LicenseKey::from_string(format!("key-{session}")),
            created_at,
        )
    }

    #[test]
    fn test_reserve_rejects_duplicate_session() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        ledger.reserve(record("cs_1", "alice", now)).unwrap();

        let result = ledger.reserve(record("cs_1", "bob", now));
        assert!(matches!(result, Err(ShopError::DuplicateSession(id)) if id == "cs_1"));
        assert_eq!(
            ledger.lookup_by_session("cs_1").unwrap().unwrap().buyer_id,
            "alice"
        );
    }

    #[test]
    fn test_remove_is_idempotent() {
        let ledger = MemoryLedger::new();
        ledger.reserve(record("cs_1", "alice", Utc::now())).unwrap();
        ledger.remove("cs_1").unwrap();
        ledger.remove("cs_1").unwrap();
        assert!(ledger.is_empty());
    }

    #[test]
    fn test_active_window_is_per_buyer_and_strict() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let window = TimeDelta::hours(24);
        ledger.reserve(record("fresh", "alice", now - TimeDelta::hours(2))).unwrap();
        ledger.reserve(record("edge", "alice", now - window)).unwrap();
        ledger.reserve(record("other", "bob", now)).unwrap();

        let active = ledger.lookup_active_by_buyer("alice", now, window).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].session_id, "fresh");

        let all = ledger.lookup_by_buyer("alice").unwrap();
        assert_eq!(
            all.iter().map(|r| r.session_id.as_str()).collect::<Vec<_>>(),
            ["edge", "fresh"]
        );
    }

    #[test]
    fn test_sweep_removes_exactly_older_than_window() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let window = TimeDelta::hours(1);
        ledger.reserve(record("old", "a", now - TimeDelta::minutes(61))).unwrap();
        ledger.reserve(record("boundary", "b", now - window)).unwrap();
        ledger.reserve(record("young", "c", now - TimeDelta::minutes(5))).unwrap();

        let swept = ledger.sweep_expired(now, window).unwrap();
        assert_eq!(swept.len(), 1);
        assert_eq!(swept[0].session_id, "old");
        assert!(ledger.lookup_by_session("old").unwrap().is_none());
        assert!(ledger.lookup_by_session("boundary").unwrap().is_some());
        assert!(ledger.lookup_by_session("young").unwrap().is_some());
    }
}
