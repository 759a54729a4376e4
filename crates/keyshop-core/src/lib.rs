//! # keyshop-core
//!
//! Reservation and verification core for a license key storefront.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                         Storefront                            │
//! │  ┌──────────────────┐ ┌───────────────────┐ ┌──────────────┐  │
//! │  │ LicenseInventory │ │ ReservationLedger │ │PaymentGateway│  │
//! │  │  (InventoryStore)│ │     (injected)    │ │  (Strategy)  │  │
//! │  └──────────────────┘ └───────────────────┘ └──────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//!            ▲ spawn_sweeper (recurring sweep_expired)
//! ```
//!
//! A purchase takes a key out of inventory, opens a gateway checkout and
//! records the reservation. Verification asks the gateway whether the
//! session was paid and, if so, issues the held key and retires the
//! reservation in one step. Reservations nobody pays for are swept and
//! their keys returned.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyshop_core::{JsonFileStore, LicenseInventory, MemoryLedger, ShopConfig, Storefront};
//!
//! let config = ShopConfig::from_env()?;
//! let inventory = LicenseInventory::open(JsonFileStore::new(&config.inventory_path))?;
//! let shop = Storefront::new(config, inventory, Arc::new(MemoryLedger::new()), gateway);
//!
//! match shop.initiate_purchase("user-42", PlanDuration::Lifetime, Utc::now()).await? {
//!     PurchaseOutcome::Started { checkout_url, .. } => { /* send link */ }
//!     other => { /* tell the buyer */ }
//! }
//! ```

pub mod config;
pub mod error;
pub mod gateway;
pub mod inventory;
pub mod ledger;
pub mod license;
pub mod plan;
pub mod storefront;
pub mod sweeper;

pub use config::ShopConfig;
pub use error::{Result, ShopError};
pub use gateway::{CheckoutSession, MockGateway, PaymentGateway, PaymentStatus};
pub use inventory::{Inventory, InventoryStore, JsonFileStore, LicenseInventory, MemoryInventoryStore};
pub use ledger::{MemoryLedger, ReservationLedger, ReservationRecord};
pub use license::LicenseKey;
pub use plan::{Offer, PlanDuration, PlanPricing};
pub use storefront::{
    PaymentCheck, PurchaseOutcome, SessionVerification, Storefront, SweepReport, VerifyOutcome,
};
pub use sweeper::spawn_sweeper;
