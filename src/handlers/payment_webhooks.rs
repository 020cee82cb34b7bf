use axum::{
    extract::{Path, State},
    http::HeaderMap,
    response::Json,
};
use bytes::Bytes;
use serde_json::{json, Value};

use crate::{
    errors::ServiceError, services::reconciliation::VerificationResponse, ApiResponse, AppState,
};

/// Signature header set by the payment processor on webhook deliveries.
const SIGNATURE_HEADER: &str = "x-signature";

/// Webhook receiver. The body must stay raw: signature verification
/// runs over the exact bytes the processor signed.
#[utoipa::path(
    post,
    path = "/api/v1/payments/webhook",
    summary = "Payment processor webhook",
    request_body = String,
    responses(
        (status = 200, description = "Event accepted"),
        (status = 400, description = "Invalid signature or payload", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, ServiceError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .or_else(|| headers.get("stripe-signature"))
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| {
            ServiceError::InvalidSignature("missing signature header".to_string())
        })?;

    state
        .services
        .reconciliation
        .handle_webhook(&body, signature)
        .await?;

    Ok(Json(json!({ "received": true })))
}

/// Verify a payment session by id: re-fetches the live session from the
/// processor, reconciles the order if needed, returns both.
#[utoipa::path(
    get,
    path = "/api/v1/payments/verify/{session_id}",
    summary = "Verify payment session",
    params(("session_id" = String, Path, description = "Payment session id")),
    responses(
        (status = 200, description = "Order and session state", body = ApiResponse<VerificationResponse>),
        (status = 404, description = "Session or order not found", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Payments"
)]
pub async fn verify_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<ApiResponse<VerificationResponse>>, ServiceError> {
    let response = state
        .services
        .reconciliation
        .verify_session(&session_id)
        .await?;
    Ok(Json(ApiResponse::success(response)))
}
