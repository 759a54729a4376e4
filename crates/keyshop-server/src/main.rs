//! keyshop HTTP Server
//!
//! Hosts the storefront core for a chat bot: caller-facing operations as
//! JSON endpoints, Stripe webhooks, and the recurring expiry sweeper.

mod handlers;
mod state;

use std::sync::Arc;

use anyhow::Context;
use axum::{routing::{get, post}, Router};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use keyshop_core::{
    spawn_sweeper, JsonFileStore, LicenseInventory, MemoryLedger, MockGateway, PaymentGateway,
    ShopConfig, Storefront,
};
use keyshop_payments::{StripeGateway, WebhookHandler};

use crate::handlers::{
    health_check, list_offers, purchase, stripe_webhook, sweep, verify_buyer, verify_session,
};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ShopConfig::from_env().context("invalid storefront configuration")?;
    for duration in keyshop_core::PlanDuration::ALL {
        if config.price_ref(duration).is_none() {
            tracing::warn!(duration = %duration, "No price configured; plan will not be sold");
        }
    }

    // Inventory
    let inventory = LicenseInventory::open(JsonFileStore::new(&config.inventory_path))
        .with_context(|| format!("cannot open inventory at {}", config.inventory_path))?;

    // Payment gateway
    let (gateway, webhook_secret): (Arc<dyn PaymentGateway>, Option<String>) =
        match std::env::var("KEYSHOP_GATEWAY").as_deref() {
            Ok("mock") => {
                tracing::warn!("⚠ Mock gateway in use - payments are simulated");
                (Arc::new(MockGateway::new()) as Arc<dyn PaymentGateway>, None)
            }
            _ => {
                let stripe = StripeGateway::from_env().context("Stripe is not configured")?;
                let secret = stripe.webhook_secret().map(str::to_string);
                if secret.is_none() {
                    tracing::warn!("⚠ STRIPE_WEBHOOK_SECRET not set - webhooks disabled");
                }
                tracing::info!("✓ Stripe configured");
                (Arc::new(stripe) as Arc<dyn PaymentGateway>, secret)
            }
        };

    let sweep_interval = config.sweep_interval;
    let storefront = Arc::new(Storefront::new(
        config,
        inventory,
        Arc::new(MemoryLedger::new()),
        gateway,
    ));

    // Reservations are volatile; anything reserved before a restart is gone
    let _sweeper = spawn_sweeper(storefront.clone(), sweep_interval);
    tracing::info!(every_secs = sweep_interval.as_secs(), "Expiry sweeper started");

    let state = AppState {
        webhooks: webhook_secret
            .map(|secret| Arc::new(WebhookHandler::new(storefront.clone(), secret))),
        storefront,
    };

    let app = build_router(state);

    // Start server
    let addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("keyshop server running on http://{}", addr);
    tracing::info!("  GET  /health            - Health check");
    tracing::info!("  GET  /api/offers        - Plans in stock");
    tracing::info!("  POST /api/purchase      - Reserve a key and open checkout");
    tracing::info!("  POST /api/verify        - Verify one session");
    tracing::info!("  POST /api/verify/buyer  - Verify a buyer's sessions");
    tracing::info!("  POST /api/sweep         - Sweep expired reservations");

    axum::serve(listener, app).await?;

    Ok(())
}

pub(crate) fn build_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health & catalog
        .route("/health", get(health_check))
        .route("/api/offers", get(list_offers))

        // Storefront operations
        .route("/api/purchase", post(purchase))
        .route("/api/verify", post(verify_session))
        .route("/api/verify/buyer", post(verify_buyer))
        .route("/api/sweep", post(sweep))

        // Payments
        .route("/webhook/stripe", post(stripe_webhook))

        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
