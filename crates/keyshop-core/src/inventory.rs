//! License Inventory
//!
//! Durable store of unsold keys grouped by plan duration, plus the
//! in-process bookkeeping of keys held by open reservations.
//!
//! ```text
//!   available ──take──▶ held ──issue──▶ issued
//!       ▲                 │
//!       └────release──────┘
//! ```
//!
//! Only `available` is persisted. Held keys live in process memory, so a
//! restart with open reservations needs manual reconciliation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, ShopError};
use crate::license::LicenseKey;
use crate::plan::PlanDuration;

/// Available keys, keyed by duration name.
///
/// Buckets are keyed by the raw string so that buckets this build does not
/// sell survive a load/save cycle untouched.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Inventory {
    buckets: BTreeMap<String, Vec<LicenseKey>>,
}

impl Inventory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append keys to a bucket
    #[must_use]
    pub fn with_keys<I, K>(mut self, duration: PlanDuration, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.buckets
            .entry(duration.as_str().to_string())
            .or_default()
            .extend(keys.into_iter().map(LicenseKey::from_string));
        self
    }

    /// Keys available for a duration, in sale order
    pub fn bucket(&self, duration: PlanDuration) -> &[LicenseKey] {
        self.buckets
            .get(duration.as_str())
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn count(&self, duration: PlanDuration) -> usize {
        self.bucket(duration).len()
    }

    pub fn contains(&self, key: &LicenseKey) -> bool {
        self.buckets.values().any(|keys| keys.contains(key))
    }

    /// Reject documents where a key appears twice
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for (bucket, keys) in &self.buckets {
            for key in keys {
                if !seen.insert(key) {
                    return Err(ShopError::StorageUnavailable(format!(
                        "key listed more than once (seen again in bucket {bucket})"
                    )));
                }
            }
        }
        Ok(())
    }

    fn pop_front(&mut self, duration: PlanDuration) -> Option<LicenseKey> {
        let keys = self.buckets.get_mut(duration.as_str())?;
        if keys.is_empty() {
            None
        } else {
            Some(keys.remove(0))
        }
    }

    fn push_front(&mut self, duration: PlanDuration, key: LicenseKey) {
        self.buckets
            .entry(duration.as_str().to_string())
            .or_default()
            .insert(0, key);
    }
}

/// Durable inventory storage, loaded and saved whole
pub trait InventoryStore: Send + Sync {
    /// Read the whole inventory
    fn load(&self) -> Result<Inventory>;

    /// Overwrite the whole inventory; must never leave a partial document
    fn save(&self, inventory: &Inventory) -> Result<()>;
}

/// JSON document on disk: `{"lifetime": ["KEY-1", ...], ...}`
#[derive(Clone, Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl InventoryStore for JsonFileStore {
    fn load(&self) -> Result<Inventory> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            ShopError::StorageUnavailable(format!("failed to read {}: {e}", self.path.display()))
        })?;
        let inventory: Inventory = serde_json::from_str(&contents).map_err(|e| {
            ShopError::StorageUnavailable(format!("malformed {}: {e}", self.path.display()))
        })?;
        inventory.validate()?;
        Ok(inventory)
    }

    fn save(&self, inventory: &Inventory) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                ShopError::StorageUnavailable(format!("failed to prepare inventory directory: {e}"))
            })?;
        }

        let payload = serde_json::to_vec_pretty(inventory).map_err(|e| {
            ShopError::StorageUnavailable(format!("failed to encode inventory: {e}"))
        })?;

        let temp_path = self
            .path
            .with_extension(format!("{}.tmp", Uuid::new_v4().simple()));
        std::fs::write(&temp_path, payload).map_err(|e| {
            ShopError::StorageUnavailable(format!("failed to write inventory: {e}"))
        })?;

        std::fs::rename(&temp_path, &self.path).map_err(|e| {
            let _ = std::fs::remove_file(&temp_path);
            ShopError::StorageUnavailable(format!("failed to finalize inventory: {e}"))
        })
    }
}

/// In-memory inventory store (for development/testing)
#[derive(Debug, Default)]
pub struct MemoryInventoryStore {
    inventory: RwLock<Inventory>,
    fail_saves: AtomicBool,
}

impl MemoryInventoryStore {
    pub fn new(inventory: Inventory) -> Self {
        Self {
            inventory: RwLock::new(inventory),
            fail_saves: AtomicBool::new(false),
        }
    }

    /// Make every following `save` fail with `StorageUnavailable`
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Last saved document
    pub fn contents(&self) -> Inventory {
        self.inventory
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl InventoryStore for MemoryInventoryStore {
    fn load(&self) -> Result<Inventory> {
        let inventory = self.contents();
        inventory.validate()?;
        Ok(inventory)
    }

    fn save(&self, inventory: &Inventory) -> Result<()> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(ShopError::StorageUnavailable("memory store rejecting saves".into()));
        }
        *self
            .inventory
            .write()
            .unwrap_or_else(PoisonError::into_inner) = inventory.clone();
        Ok(())
    }
}

impl<S: InventoryStore + ?Sized> InventoryStore for std::sync::Arc<S> {
    fn load(&self) -> Result<Inventory> {
        (**self).load()
    }

    fn save(&self, inventory: &Inventory) -> Result<()> {
        (**self).save(inventory)
    }
}

#[derive(Debug)]
struct InventoryState {
    available: Inventory,
    held: HashMap<LicenseKey, PlanDuration>,
}

/// Serialized view over an [`InventoryStore`].
///
/// One mutex covers the available buckets, the held set and every `save`,
/// so no caller observes a key both available and held.
pub struct LicenseInventory {
    store: Box<dyn InventoryStore>,
    state: Mutex<InventoryState>,
}

impl LicenseInventory {
    /// Load the store and start serving from it
    pub fn open(store: impl InventoryStore + 'static) -> Result<Self> {
        let available = store.load()?;
        tracing::info!(
            buckets = available.buckets.len(),
            keys = available.buckets.values().map(Vec::len).sum::<usize>(),
            "Loaded license inventory"
        );
        Ok(Self {
            store: Box::new(store),
            state: Mutex::new(InventoryState {
                available,
                held: HashMap::new(),
            }),
        })
    }

    /// Remove the first available key of a bucket and hold it.
    ///
    /// The only path by which an available key leaves inventory.
    pub fn take(&self, duration: PlanDuration) -> Result<LicenseKey> {
        let mut state = self.lock();
        let key = state
            .available
            .pop_front(duration)
            .ok_or(ShopError::OutOfStock(duration))?;

        if let Err(e) = self.store.save(&state.available) {
            state.available.push_front(duration, key);
            return Err(e);
        }

        state.held.insert(key.clone(), duration);
        tracing::debug!(duration = %duration, "Took key from inventory");
        Ok(key)
    }

    /// Available key count, for display only
    pub fn peek_count(&self, duration: PlanDuration) -> usize {
        self.lock().available.count(duration)
    }

    /// Mark a held key as issued.
    ///
    /// Returns `false` if the key is not held under `duration`, meaning it
    /// was already issued through another path.
    pub fn issue(&self, duration: PlanDuration, key: &LicenseKey) -> bool {
        let mut state = self.lock();
        match state.held.get(key) {
            Some(held) if *held == duration => {
                state.held.remove(key);
                true
            }
            _ => false,
        }
    }

    /// Return a held, never-issued key to the front of its bucket
    pub fn release(&self, duration: PlanDuration, key: &LicenseKey) -> Result<()> {
        let mut state = self.lock();
        if state.held.remove(key).is_none() {
            return Err(ShopError::InternalInconsistency(format!(
                "release of key not held ({duration})"
            )));
        }
        state.available.push_front(duration, key.clone());

        if let Err(e) = self.store.save(&state.available) {
            state.available.pop_front(duration);
            state.held.insert(key.clone(), duration);
            return Err(e);
        }
        tracing::debug!(duration = %duration, "Released key back to inventory");
        Ok(())
    }

    /// Copy of the available buckets
    pub fn snapshot(&self) -> Inventory {
        self.lock().available.clone()
    }

    /// Keys taken for reservations and not yet issued or released
    pub fn held_count(&self) -> usize {
        self.lock().held.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, InventoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
