//! # keyshop-payments
//!
//! Stripe implementation of the keyshop payment gateway.
//!
//! ## Flow
//!
//! ```text
//! ┌─────────────┐     ┌─────────────────┐     ┌─────────────┐
//! │  Chat bot   │────▶│  Stripe Hosted  │────▶│  Chat bot   │
//! │ (purchase)  │     │  Checkout Page  │     │  (verify)   │
//! └─────────────┘     └─────────────────┘     └─────────────┘
//!                              │ webhook
//!                              ▼
//!                     keyshop-server → Storefront::check_payment
//! ```
//!
//! Only the buyer's verify button (or `/verify` command) hands a key over.
//! `checkout.session.completed` webhooks re-read the payment status from
//! Stripe and log it, leaving the reservation for the buyer to claim.
//! Checkout sessions expire together with their reservation.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use keyshop_payments::StripeGateway;
//!
//! let gateway = Arc::new(StripeGateway::from_env()?);
//! let shop = Storefront::new(config, inventory, ledger, gateway);
//! ```

mod checkout;
mod webhook;

pub use checkout::StripeGateway;
pub use webhook::{WebhookEvent, WebhookHandler};
