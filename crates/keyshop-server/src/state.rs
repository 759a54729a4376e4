//! Application State

use std::sync::Arc;

use keyshop_core::Storefront;
use keyshop_payments::WebhookHandler;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Inventory, ledger and gateway behind the caller-facing operations
    pub storefront: Arc<Storefront>,

    /// Stripe webhook handler (None if no webhook secret is configured)
    pub webhooks: Option<Arc<WebhookHandler>>,
}
