use axum::{extract::State, http::StatusCode, response::Json};

use crate::{
    errors::ServiceError,
    services::checkout::{CheckoutRequest, CheckoutResponse},
    ApiResponse, AppState,
};

/// Create a hosted payment session and the pending order behind it.
#[utoipa::path(
    post,
    path = "/api/v1/checkout",
    summary = "Create checkout session",
    request_body = CheckoutRequest,
    responses(
        (status = 200, description = "Session created", body = ApiResponse<CheckoutResponse>),
        (status = 400, description = "Invalid cart submission", body = crate::errors::ErrorResponse),
        (status = 502, description = "Payment provider unavailable", body = crate::errors::ErrorResponse),
    ),
    tag = "Checkout"
)]
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(request): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<ApiResponse<CheckoutResponse>>), ServiceError> {
    let response = state
        .services
        .checkout
        .create_checkout_session(request)
        .await?;
    Ok((StatusCode::OK, Json(ApiResponse::success(response))))
}
