//! Storefront API Library
//!
//! Checkout, payment-session reconciliation, and order tracking.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod auth;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod gateway;
pub mod handlers;
pub mod migrator;
pub mod openapi;
pub mod services;

use axum::{extract::State, response::Json, routing::get, Extension, Router};
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use utoipa::ToSchema;

use crate::auth::AuthRouterExt;

/// Shared application state injected into every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: services::AppServices,
}

/// Common response envelope.
#[derive(Serialize, ToSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
        }
    }
}

/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// All `/api/v1` routes. The webhook and verification endpoints are
/// public (the webhook carries its own signature); order reads need a
/// bearer token and the admin patch additionally the `admin` role.
pub fn api_v1_routes() -> Router<AppState> {
    let orders_read = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .route(
            "/orders/session/:session_id",
            get(handlers::orders::get_order_by_session),
        )
        .with_auth();

    let orders_create = Router::new()
        .route(
            "/orders",
            axum::routing::post(handlers::orders::create_order),
        )
        .with_auth();

    let orders_admin = Router::new()
        .route(
            "/orders/:id",
            axum::routing::put(handlers::orders::update_order),
        )
        .with_role("admin");

    let checkout = Router::new().route(
        "/checkout",
        axum::routing::post(handlers::checkout::create_checkout_session),
    );

    // Signature-verified rather than token-authenticated.
    let payments = Router::new()
        .route(
            "/payments/webhook",
            axum::routing::post(handlers::payment_webhooks::payment_webhook),
        )
        .route(
            "/payments/verify/:session_id",
            get(handlers::payment_webhooks::verify_session),
        );

    Router::new()
        .route("/status", get(api_status))
        .route("/health", get(health_check))
        .merge(checkout)
        .merge(payments)
        .merge(orders_read)
        .merge(orders_create)
        .merge(orders_admin)
}

/// Assemble the application router around the given state.
pub fn build_router(state: AppState) -> Router {
    let auth_service = state.services.auth.clone();

    Router::new()
        .nest("/api/v1", api_v1_routes())
        .merge(openapi::swagger_routes())
        .layer(Extension(auth_service))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(state)
}

async fn api_status() -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let status_data = json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "storefront-api",
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(status_data)))
}

async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<Value>>, errors::ServiceError> {
    let db_status = match state.db.ping().await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let health_data = json!({
        "status": db_status,
        "checks": { "database": db_status },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });
    Ok(Json(ApiResponse::success(health_data)))
}
