use std::collections::HashMap;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::{
    errors::ServiceError,
    gateway::{CreateSessionRequest, PaymentGateway, SessionLineItem, SESSION_ID_PLACEHOLDER},
    services::orders::{CreateOrderInput, NewLineItem, OrderService, ShippingAddress},
};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

/// Largest acceptable gap between a client-supplied total and the
/// server-computed one (one currency unit, covering rounding drift).
const TOTAL_TOLERANCE: Decimal = Decimal::ONE;

/// A cart line item as submitted by the client.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CartItemInput {
    pub name: String,
    #[serde(alias = "price", alias = "unitPrice")]
    pub unit_price: Decimal,
    pub quantity: i32,
    #[serde(alias = "image")]
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub product_id: Option<Uuid>,
}

/// Checkout submission: `{email, items[], shipping_address?}`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CheckoutRequest {
    pub email: String,
    pub items: Vec<CartItemInput>,
    pub shipping_address: Option<ShippingAddress>,
}

/// Result of a successful checkout: where to send the customer, and
/// which order tracks the outcome.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CheckoutResponse {
    pub session_id: String,
    pub url: Option<String>,
    pub order_id: Uuid,
}

/// Validate an email address against the storefront pattern.
pub fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.is_match(email)
}

/// Validate cart items: non-empty, named, non-negative price, quantity
/// at least one. Fails before any external call.
pub fn validate_items(items: &[CartItemInput]) -> Result<(), ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::InvalidInput("cart is empty".to_string()));
    }
    for (index, item) in items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(ServiceError::InvalidInput(format!(
                "items[{index}]: name is required"
            )));
        }
        if item.unit_price < Decimal::ZERO {
            return Err(ServiceError::InvalidInput(format!(
                "items[{index}]: price cannot be negative"
            )));
        }
        if item.quantity < 1 {
            return Err(ServiceError::InvalidInput(format!(
                "items[{index}]: quantity must be at least 1"
            )));
        }
    }
    Ok(())
}

/// The authoritative order total: Σ(unit_price × quantity). Client
/// totals are never trusted.
pub fn compute_order_total(items: &[CartItemInput]) -> Decimal {
    items
        .iter()
        .map(|item| item.unit_price * Decimal::from(item.quantity))
        .sum()
}

/// Check a client-supplied total against the computed one, allowing
/// rounding drift of at most one currency unit.
pub fn check_total_within_tolerance(
    claimed: Decimal,
    computed: Decimal,
) -> Result<(), ServiceError> {
    if (claimed - computed).abs() > TOTAL_TOLERANCE {
        return Err(ServiceError::InvalidInput(format!(
            "total_amount {claimed} does not match item total {computed}"
        )));
    }
    Ok(())
}

/// Convert a major-unit price to the processor's integer minor units
/// (two-decimal currencies: multiply by 100, round to nearest).
pub fn to_minor_units(price: Decimal) -> Result<i64, ServiceError> {
    (price * Decimal::from(100))
        .round()
        .to_i64()
        .ok_or_else(|| ServiceError::InvalidInput(format!("price {price} out of range")))
}

/// Orchestrates a checkout: validates the cart, opens a hosted payment
/// session, then persists the pending order linked to that session.
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
    client_url: String,
    currency: String,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        orders: Arc<OrderService>,
        client_url: String,
        currency: String,
    ) -> Self {
        Self {
            gateway,
            orders,
            client_url: client_url.trim_end_matches('/').to_string(),
            currency,
        }
    }

    /// Create a payment session and the pending order behind it.
    ///
    /// Session creation and order persistence are not a distributed
    /// transaction: a gateway failure persists nothing, while a store
    /// failure after session creation leaves an orphaned external
    /// session that the verification path later heals.
    #[instrument(skip(self, request), fields(email = %request.email, item_count = request.items.len()))]
    pub async fn create_checkout_session(
        &self,
        request: CheckoutRequest,
    ) -> Result<CheckoutResponse, ServiceError> {
        let email = request.email.trim().to_lowercase();
        if !is_valid_email(&email) {
            return Err(ServiceError::InvalidInput(
                "invalid email format".to_string(),
            ));
        }
        validate_items(&request.items)?;

        let total_amount = compute_order_total(&request.items);

        let line_items = request
            .items
            .iter()
            .map(|item| {
                Ok(SessionLineItem {
                    name: item.name.clone(),
                    currency: self.currency.clone(),
                    unit_amount: to_minor_units(item.unit_price)?,
                    quantity: item.quantity as u32,
                    description: item.description.clone(),
                    images: item.image_url.clone().into_iter().collect(),
                })
            })
            .collect::<Result<Vec<_>, ServiceError>>()?;

        // Fallback reconciliation context: enough to rebuild the order
        // from the processor's copy if the local write is lost.
        let mut metadata = HashMap::new();
        metadata.insert("email".to_string(), email.clone());
        metadata.insert("cart".to_string(), serde_json::to_string(&request.items)?);
        metadata.insert("item_count".to_string(), request.items.len().to_string());

        let session = self
            .gateway
            .create_session(CreateSessionRequest {
                line_items,
                customer_email: email.clone(),
                success_url: format!(
                    "{}/success?session_id={}",
                    self.client_url, SESSION_ID_PLACEHOLDER
                ),
                cancel_url: format!("{}/checkout", self.client_url),
                metadata,
            })
            .await?;

        info!(session_id = %session.id, "payment session created");

        let order = self
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
                total_amount,
                currency: self.currency.clone(),
                external_session_id: Some(session.id.clone()),
                shipping_address: request.shipping_address,
                notes: None,
            })
            .await?;

        Ok(CheckoutResponse {
            session_id: session.id,
            url: session.url,
            order_id: order.id,
        })
    }
}
