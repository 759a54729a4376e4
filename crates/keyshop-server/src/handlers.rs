//! HTTP Handlers
//!
//! Thin adapters from requests to the storefront operations. Business
//! outcomes are always `200 OK` with an `outcome` tag; only operational
//! failures map to error statuses.

use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use keyshop_core::{
    Offer, PlanDuration, PurchaseOutcome, SessionVerification, ShopError, SweepReport,
    VerifyOutcome,
};

use crate::state::AppState;

// ============================================================================
// Request / Response Types
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub gateway: String,
    pub pending_reservations: usize,
    pub webhooks_enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

#[derive(Debug, Deserialize)]
pub struct PurchaseRequest {
    pub buyer_id: String,
    pub duration: PlanDuration,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    #[serde(flatten)]
    pub outcome: PurchaseOutcome,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct VerifySessionRequest {
    pub session_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    #[serde(flatten)]
    pub outcome: VerifyOutcome,
    pub message: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct VerifyBuyerRequest {
    pub buyer_id: String,
}

#[derive(Debug, Serialize)]
pub struct VerifyBuyerResponse {
    pub results: Vec<SessionVerification>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<&'static str>,
}

// ============================================================================
// Handlers
// ============================================================================

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        gateway: state.storefront.gateway_name().to_string(),
        pending_reservations: state.storefront.pending_count(),
        webhooks_enabled: state.webhooks.is_some(),
    })
}

/// Plans in stock, for the selection menu
pub async fn list_offers(State(state): State<AppState>) -> Json<Vec<Offer>> {
    Json(state.storefront.offers())
}

/// Reserve a key and open a checkout session
pub async fn purchase(
    State(state): State<AppState>,
    Json(payload): Json<PurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let outcome = state
        .storefront
        .initiate_purchase(&payload.buyer_id, payload.duration, Utc::now())
        .await
        .map_err(operational_error)?;

    let message = match &outcome {
        PurchaseOutcome::Started { .. } => {
            "1. Click the payment link\n2. After payment, click Verify\n3. If the button expires, use /verify"
        }
        PurchaseOutcome::AlreadyPending { .. } => {
            ShopError::AlreadyPending(payload.buyer_id).user_message()
        }
        PurchaseOutcome::OutOfStock { duration } => ShopError::OutOfStock(*duration).user_message(),
        PurchaseOutcome::NotOffered { .. } => {
            "No subscription options are currently available. Please contact support."
        }
        PurchaseOutcome::GatewayUnavailable => {
            ShopError::GatewayUnavailable(String::new()).user_message()
        }
    };

    Ok(Json(PurchaseResponse { outcome, message }))
}

/// Verify one session (the buyer's verify button)
pub async fn verify_session(
    State(state): State<AppState>,
    Json(payload): Json<VerifySessionRequest>,
) -> Result<Json<VerifyResponse>, ApiError> {
    let outcome = state
        .storefront
        .verify(&payload.session_id, Utc::now())
        .await
        .map_err(operational_error)?;

    let message = verify_message(&outcome);
    Ok(Json(VerifyResponse { outcome, message }))
}

/// Verify every pending session of a buyer (the `/verify` command)
pub async fn verify_buyer(
    State(state): State<AppState>,
    Json(payload): Json<VerifyBuyerRequest>,
) -> Result<Json<VerifyBuyerResponse>, ApiError> {
    let results = state
        .storefront
        .verify_buyer(&payload.buyer_id, Utc::now())
        .await
        .map_err(operational_error)?;

    let message = results
        .is_empty()
        .then_some("You have no pending payments to verify.");
    Ok(Json(VerifyBuyerResponse { results, message }))
}

/// Run the expiry sweep now
pub async fn sweep(State(state): State<AppState>) -> Result<Json<SweepReport>, ApiError> {
    // the sweep writes inventory to disk; keep it off the async workers
    let storefront = state.storefront.clone();
    tokio::task::spawn_blocking(move || storefront.sweep_expired(Utc::now()))
        .await
        .map_err(|e| {
            operational_error(ShopError::InternalInconsistency(format!("sweep task failed: {e}")))
        })?
        .map(Json)
        .map_err(operational_error)
}

/// Stripe webhook handler
pub async fn stripe_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<StatusCode, ApiError> {
    let webhooks = state.webhooks.as_ref().ok_or_else(|| {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse {
                error: "Webhooks not configured".into(),
                code: "WEBHOOKS_DISABLED".into(),
            }),
        )
    })?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error: "Missing Stripe signature".into(),
                    code: "MISSING_SIGNATURE".into(),
                }),
            )
        })?;

    let event = webhooks.parse_event(&body, signature).map_err(|e| {
        tracing::warn!("Webhook signature failed: {}", e);
        (
            StatusCode::BAD_REQUEST,
            Json(ErrorResponse {
                error: "Invalid signature".into(),
                code: "INVALID_SIGNATURE".into(),
            }),
        )
    })?;

    webhooks.handle(event).await.map_err(|e| {
        tracing::error!("Webhook processing error: {}", e);
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorResponse {
                error: "Webhook processing failed".into(),
                code: "WEBHOOK_ERROR".into(),
            }),
        )
    })?;

    Ok(StatusCode::OK)
}

fn verify_message(outcome: &VerifyOutcome) -> &'static str {
    match outcome {
        VerifyOutcome::Fulfilled { .. } => "Payment verified. Here is your license key.",
        VerifyOutcome::NotYetPaid { .. } => ShopError::NotYetPaid(String::new()).user_message(),
        VerifyOutcome::NoSuchReservation => {
            ShopError::NoSuchReservation(String::new()).user_message()
        }
        VerifyOutcome::FulfillmentConflict { .. } => ShopError::FulfillmentConflict {
            session_id: String::new(),
            key: String::new(),
        }
        .user_message(),
        VerifyOutcome::GatewayUnavailable => "Error verifying payment. Please try again or contact support.",
    }
}

fn operational_error(err: ShopError) -> ApiError {
    tracing::error!(alert = err.requires_alert(), error = %err, "Storefront operation failed");
    let code = match err {
        ShopError::StorageUnavailable(_) => "STORAGE_UNAVAILABLE",
        ShopError::InternalInconsistency(_) => "INTERNAL_INCONSISTENCY",
        _ => "INTERNAL_ERROR",
    };
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: err.user_message().into(),
            code: code.into(),
        }),
    )
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        Router,
    };
    use keyshop_core::{
        Inventory, LicenseInventory, MemoryInventoryStore, MemoryLedger, MockGateway,
        PaymentStatus, ShopConfig, Storefront,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::build_router;
    use crate::state::AppState;

    fn app() -> (Router, Arc<MockGateway>) {
        let gateway = Arc::new(MockGateway::new());
        let storefront = Storefront::new(
            ShopConfig::default().with_price(keyshop_core::PlanDuration::Lifetime, "price_life"),
            LicenseInventory::open(MemoryInventoryStore::new(
                Inventory::new().with_keys(keyshop_core::PlanDuration::Lifetime, ["K1"]),
            ))
            .unwrap(),
            Arc::new(MemoryLedger::new()),
            gateway.clone(),
        );
        let state = AppState {
            storefront: Arc::new(storefront),
            webhooks: None,
        };
        (build_router(state), gateway)
    }

    async fn post(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(uri)
                    .header("content-type", "application/json")
                    .body(Body::from(body.to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_purchase_then_verify_over_http() {
        let (app, gateway) = app();

        let (status, json) = post(
            &app,
            "/api/purchase",
            json!({"buyer_id": "42", "duration": "lifetime"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "started");
        let session_id = json["session_id"].as_str().unwrap().to_string();

        let (_, json) = post(&app, "/api/verify", json!({"session_id": session_id})).await;
        assert_eq!(json["outcome"], "not_yet_paid");
        assert_eq!(json["status"], "pending");

        gateway.set_status(&session_id, PaymentStatus::Paid);
        let (_, json) = post(&app, "/api/verify/buyer", json!({"buyer_id": "42"})).await;
        assert_eq!(json["results"][0]["outcome"]["outcome"], "fulfilled");
        assert_eq!(json["results"][0]["outcome"]["key"], "K1");

        let (_, json) = post(&app, "/api/verify/buyer", json!({"buyer_id": "42"})).await;
        assert_eq!(json["results"], json!([]));
        assert_eq!(json["message"], "You have no pending payments to verify.");
    }

    #[tokio::test]
    async fn test_out_of_stock_is_an_outcome() {
        let (app, _) = app();
        post(&app, "/api/purchase", json!({"buyer_id": "a", "duration": "lifetime"})).await;

        let (status, json) = post(
            &app,
            "/api/purchase",
            json!({"buyer_id": "b", "duration": "lifetime"}),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["outcome"], "out_of_stock");
    }

    #[tokio::test]
    async fn test_offers_and_health() {
        let (app, _) = app();
        let response = app
            .clone()
            .oneshot(Request::builder().uri("/api/offers").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let offers: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(offers[0]["duration"], "lifetime");
        assert_eq!(offers[0]["available"], 1);

        let response = app
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let health: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(health["gateway"], "MockGateway");
        assert_eq!(health["webhooks_enabled"], false);
    }

    #[tokio::test]
    async fn test_sweep_endpoint_reports_removals() {
        let (app, _) = app();
        let (status, json) = post(&app, "/api/sweep", json!({})).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["removed"], json!([]));
        assert_eq!(json["unreleased"], json!([]));
    }

    #[tokio::test]
    async fn test_webhook_without_secret_is_unavailable() {
        let (app, _) = app();
        let (status, json) = post(&app, "/webhook/stripe", json!({})).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(json["code"], "WEBHOOKS_DISABLED");
    }
}
