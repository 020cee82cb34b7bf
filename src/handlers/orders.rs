use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::checkout::{
        check_total_within_tolerance, compute_order_total, is_valid_email, validate_items,
        CartItemInput,
    },
    services::orders::{
        CreateOrderInput, NewLineItem, OrderResponse, ShippingAddress, UpdateOrderInput,
    },
    ApiResponse, AppState,
};

#[derive(Debug, Deserialize)]
pub struct OrderListQuery {
    pub email: Option<String>,
}

/// Direct order creation, without a payment session. The claimed total
/// (when present) must agree with the computed one within rounding
/// tolerance; otherwise the server-side total wins silently.
#[derive(Debug, Deserialize, ToSchema)]
pub struct CreateOrderRequest {
    pub email: String,
    pub items: Vec<CartItemInput>,
    pub total_amount: Option<Decimal>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
}

/// List a customer's orders, newest first.
#[utoipa::path(
    get,
    path = "/api/v1/orders",
    summary = "List orders by customer email",
    params(("email" = String, Query, description = "Customer email")),
    responses(
        (status = 200, description = "Orders for the customer", body = ApiResponse<Vec<OrderResponse>>),
        (status = 400, description = "Missing email parameter", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderListQuery>,
    _auth_user: AuthUser,
) -> Result<Json<ApiResponse<Vec<OrderResponse>>>, ServiceError> {
    let email = query
        .email
        .filter(|e| !e.trim().is_empty())
        .ok_or_else(|| ServiceError::InvalidInput("email is required".to_string()))?;

    let orders = state.services.orders.list_orders_by_email(&email).await?;
    Ok(Json(ApiResponse::success(orders)))
}

/// Fetch a single order by internal id.
#[utoipa::path(
    get,
    path = "/api/v1/orders/{id}",
    summary = "Get order",
    params(("id" = Uuid, Path, description = "Order id")),
    responses(
        (status = 200, description = "The order", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Order with ID {} not found", id)))?;
    Ok(Json(ApiResponse::success(order)))
}

/// Fetch the order linked to a payment session.
#[utoipa::path(
    get,
    path = "/api/v1/orders/session/{session_id}",
    summary = "Get order by payment session id",
    params(("session_id" = String, Path, description = "Payment session id")),
    responses(
        (status = 200, description = "The order", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn get_order_by_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    _auth_user: AuthUser,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    let order = state
        .services
        .orders
        .get_order_by_session(&session_id)
        .await?
        .ok_or_else(|| {
            ServiceError::NotFound(format!("Order for session {} not found", session_id))
        })?;
    Ok(Json(ApiResponse::success(order)))
}

/// Create an order directly, without a payment session.
#[utoipa::path(
    post,
    path = "/api/v1/orders",
    summary = "Create order",
    request_body = CreateOrderRequest,
    responses(
        (status = 201, description = "Order created", body = ApiResponse<OrderResponse>),
        (status = 400, description = "Invalid order data", body = crate::errors::ErrorResponse),
        (status = 401, description = "Unauthorized", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn create_order(
    State(state): State<AppState>,
    _auth_user: AuthUser,
    Json(request): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderResponse>>), ServiceError> {
    let email = request.email.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(ServiceError::InvalidInput(
            "invalid email format".to_string(),
        ));
    }
    validate_items(&request.items)?;

    let computed_total = compute_order_total(&request.items);
    if let Some(claimed) = request.total_amount {
        check_total_within_tolerance(claimed, computed_total)?;
    }

    let order = state
        .services
        .orders
        .create_order(CreateOrderInput {
            customer_email: email,
            items: request
                .items
                .into_iter()
                .map(|item| NewLineItem {
                    name: item.name,
                    unit_price: item.unit_price,
                    quantity: item.quantity,
                    image_url: item.image_url,
                    description: item.description,
                    product_id: item.product_id,
                })
                .collect(),
            total_amount: computed_total,
            currency: state.config.currency.clone(),
            external_session_id: None,
            shipping_address: request.shipping_address,
            notes: request.notes,
        })
        .await?;

    Ok((StatusCode::CREATED, Json(ApiResponse::success(order))))
}

/// Administrative partial order update.
#[utoipa::path(
    put,
    path = "/api/v1/orders/{id}",
    summary = "Update order (admin)",
    params(("id" = Uuid, Path, description = "Order id")),
    request_body = UpdateOrderInput,
    responses(
        (status = 200, description = "Updated order", body = ApiResponse<OrderResponse>),
        (status = 404, description = "Order not found", body = crate::errors::ErrorResponse),
        (status = 403, description = "Admin role required", body = crate::errors::ErrorResponse),
    ),
    security(("Bearer" = [])),
    tag = "Orders"
)]
pub async fn update_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
    Json(patch): Json<UpdateOrderInput>,
) -> Result<Json<ApiResponse<OrderResponse>>, ServiceError> {
    // the route is role-gated already; keep the check close to the write
    if !auth_user.is_admin() {
        return Err(ServiceError::Forbidden(
            "admin role required to update orders".to_string(),
        ));
    }

    let order = state.services.orders.update_order(id, patch).await?;
    Ok(Json(ApiResponse::success(order)))
}
