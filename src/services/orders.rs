use crate::{
    db::DbPool,
    entities::order::{
        self, ActiveModel as OrderActiveModel, Entity as OrderEntity, Model as OrderModel,
        OrderStatus, PaymentStatus,
    },
    entities::order_item::{
        self, ActiveModel as OrderItemActiveModel, Entity as OrderItemEntity,
        Model as OrderItemModel,
    },
    errors::ServiceError,
    events::{Event, EventSender},
};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

/// Structured shipping address, stored JSON-serialized on the order.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ShippingAddress {
    pub name: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    #[serde(default = "default_country")]
    pub country: String,
}

fn default_country() -> String {
    "India".to_string()
}

/// A line item as accepted by order creation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct NewLineItem {
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub image_url: Option<String>,
    pub description: Option<String>,
    pub product_id: Option<Uuid>,
}

/// Input for persisting a new order. Validation happens upstream; this
/// layer only enforces store-level invariants (session uniqueness).
#[derive(Debug, Clone)]
pub struct CreateOrderInput {
    pub customer_email: String,
    pub items: Vec<NewLineItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub external_session_id: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
}

/// Admin-only partial patch.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct UpdateOrderInput {
    pub payment_status: Option<PaymentStatus>,
    pub order_status: Option<OrderStatus>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
}

/// Order projection returned to callers.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct OrderResponse {
    pub id: Uuid,
    pub customer_email: String,
    pub items: Vec<NewLineItem>,
    pub total_amount: Decimal,
    pub currency: String,
    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,
    pub external_session_id: Option<String>,
    pub external_payment_ref: Option<String>,
    pub shipping_address: Option<ShippingAddress>,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Service owning all reads and writes of the order store.
pub struct OrderService {
    db: Arc<DbPool>,
    event_sender: Option<EventSender>,
}

impl OrderService {
    pub fn new(db: Arc<DbPool>, event_sender: Option<EventSender>) -> Self {
        Self { db, event_sender }
    }

    /// Persist a new order and its line items in one transaction.
    ///
    /// A duplicate `external_session_id` violates the unique-sparse index
    /// and surfaces as `Conflict`: two checkouts can never share a session.
    #[instrument(skip(self, input), fields(customer_email = %input.customer_email))]
    pub async fn create_order(
        &self,
        input: CreateOrderInput,
    ) -> Result<OrderResponse, ServiceError> {
        let now = Utc::now();
        let order_id = Uuid::new_v4();

        let shipping_address = input
            .shipping_address
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let txn = self.db.begin().await.map_err(|e| {
            error!(error = %e, "failed to start transaction for order creation");
            ServiceError::DatabaseError(e)
        })?;

        let order_model = OrderActiveModel {
            id: Set(order_id),
            customer_email: Set(input.customer_email.clone()),
            total_amount: Set(input.total_amount),
            currency: Set(input.currency.clone()),
            payment_status: Set(PaymentStatus::Pending),
            order_status: Set(OrderStatus::Pending),
            external_session_id: Set(input.external_session_id.clone()),
            external_payment_ref: Set(None),
            shipping_address: Set(shipping_address),
            notes: Set(input.notes.clone()),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let order = order_model.insert(&txn).await.map_err(|e| {
            error!(error = %e, order_id = %order_id, "failed to insert order");
            ServiceError::from_db(e)
        })?;

        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            let item_model = OrderItemActiveModel {
                id: Set(Uuid::new_v4()),
                order_id: Set(order_id),
                name: Set(item.name.clone()),
                unit_price: Set(item.unit_price),
                quantity: Set(item.quantity),
                image_url: Set(item.image_url.clone()),
                description: Set(item.description.clone()),
                product_id: Set(item.product_id),
                created_at: Set(now),
            };
            items.push(item_model.insert(&txn).await.map_err(ServiceError::from_db)?);
        }

        txn.commit().await.map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, session_id = ?order.external_session_id, "order created");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::OrderCreated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "failed to send order created event");
            }
        }

        Ok(to_response(order, items))
    }

    /// Fetch an order with its items by internal id.
    #[instrument(skip(self))]
    pub async fn get_order(&self, order_id: Uuid) -> Result<Option<OrderResponse>, ServiceError> {
        let Some(order) = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        let items = self.load_items(order.id).await?;
        Ok(Some(to_response(order, items)))
    }

    /// Fetch an order with its items by external payment-session id.
    #[instrument(skip(self))]
    pub async fn get_order_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<OrderResponse>, ServiceError> {
        let Some(order) = OrderEntity::find()
            .filter(order::Column::ExternalSessionId.eq(session_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        let items = self.load_items(order.id).await?;
        Ok(Some(to_response(order, items)))
    }

    /// List a customer's orders, newest first.
    #[instrument(skip(self))]
    pub async fn list_orders_by_email(
        &self,
        email: &str,
    ) -> Result<Vec<OrderResponse>, ServiceError> {
        let email = email.trim().to_lowercase();
        let orders = OrderEntity::find()
            .filter(order::Column::CustomerEmail.eq(email))
            .order_by_desc(order::Column::CreatedAt)
            .find_with_related(OrderItemEntity)
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        Ok(orders
            .into_iter()
            .map(|(order, items)| to_response(order, items))
            .collect())
    }

    /// The completion transition. A single conditional UPDATE keyed on
    /// session id and the `pending` precondition: invoked concurrently
    /// from the webhook and polling paths, at most one call takes effect
    /// and the loser observes a no-op.
    ///
    /// Returns `None` when no order carries this session id, otherwise
    /// the order plus whether this call applied the transition.
    #[instrument(skip(self))]
    pub async fn complete_payment_by_session(
        &self,
        session_id: &str,
        payment_ref: Option<&str>,
    ) -> Result<Option<(OrderModel, bool)>, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Completed),
            )
            .col_expr(
                order::Column::OrderStatus,
                Expr::value(OrderStatus::Processing),
            )
            .col_expr(
                order::Column::ExternalPaymentRef,
                Expr::value(payment_ref.map(str::to_string)),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::ExternalSessionId.eq(session_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let applied = result.rows_affected > 0;

        let Some(order) = OrderEntity::find()
            .filter(order::Column::ExternalSessionId.eq(session_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        if applied {
            info!(order_id = %order.id, session_id, "payment completed, order moved to processing");
            if let Some(sender) = &self.event_sender {
                if let Err(e) = sender
                    .send(Event::PaymentCompleted {
                        order_id: order.id,
                        session_id: session_id.to_string(),
                    })
                    .await
                {
                    warn!(error = %e, order_id = %order.id, "failed to send payment completed event");
                }
            }
        }

        Ok(Some((order, applied)))
    }

    /// Mark a session's payment failed, but only while it is still
    /// pending. Completed and refunded orders are never demoted.
    #[instrument(skip(self))]
    pub async fn fail_payment_by_session(
        &self,
        session_id: &str,
    ) -> Result<Option<(OrderModel, bool)>, ServiceError> {
        let result = OrderEntity::update_many()
            .col_expr(
                order::Column::PaymentStatus,
                Expr::value(PaymentStatus::Failed),
            )
            .col_expr(order::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(order::Column::ExternalSessionId.eq(session_id))
            .filter(order::Column::PaymentStatus.eq(PaymentStatus::Pending))
            .exec(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        let applied = result.rows_affected > 0;

        let Some(order) = OrderEntity::find()
            .filter(order::Column::ExternalSessionId.eq(session_id))
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
        else {
            return Ok(None);
        };

        if applied {
            warn!(order_id = %order.id, session_id, "payment failed");
            if let Some(sender) = &self.event_sender {
                if let Err(e) = sender
                    .send(Event::PaymentFailed {
                        order_id: order.id,
                        session_id: session_id.to_string(),
                    })
                    .await
                {
                    warn!(error = %e, order_id = %order.id, "failed to send payment failed event");
                }
            }
        }

        Ok(Some((order, applied)))
    }

    /// Administrative partial update.
    #[instrument(skip(self, patch))]
    pub async fn update_order(
        &self,
        order_id: Uuid,
        patch: UpdateOrderInput,
    ) -> Result<OrderResponse, ServiceError> {
        let order = OrderEntity::find_by_id(order_id)
            .one(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?
            .ok_or_else(|| {
                warn!(order_id = %order_id, "order not found for update");
                ServiceError::NotFound(format!("Order with ID {} not found", order_id))
            })?;

        let mut active: OrderActiveModel = order.into();
        if let Some(payment_status) = patch.payment_status {
            active.payment_status = Set(payment_status);
        }
        if let Some(order_status) = patch.order_status {
            active.order_status = Set(order_status);
        }
        if let Some(address) = &patch.shipping_address {
            active.shipping_address = Set(Some(serde_json::to_string(address)?));
        }
        if let Some(notes) = patch.notes {
            active.notes = Set(Some(notes));
        }
        active.updated_at = Set(Utc::now());

        let updated = active
            .update(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)?;

        info!(order_id = %order_id, "order updated");

        if let Some(sender) = &self.event_sender {
            if let Err(e) = sender.send(Event::OrderUpdated(order_id)).await {
                warn!(error = %e, order_id = %order_id, "failed to send order updated event");
            }
        }

        let items = self.load_items(order_id).await?;
        Ok(to_response(updated, items))
    }

    /// Load the full response projection for a known order model.
    pub async fn to_full_response(&self, order: OrderModel) -> Result<OrderResponse, ServiceError> {
        let items = self.load_items(order.id).await?;
        Ok(to_response(order, items))
    }

    async fn load_items(&self, order_id: Uuid) -> Result<Vec<OrderItemModel>, ServiceError> {
        OrderItemEntity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(&*self.db)
            .await
            .map_err(ServiceError::DatabaseError)
    }
}

fn to_response(order: OrderModel, items: Vec<OrderItemModel>) -> OrderResponse {
    let shipping_address = order
        .shipping_address
        .as_deref()
        .and_then(|raw| serde_json::from_str(raw).ok());

    OrderResponse {
        id: order.id,
        customer_email: order.customer_email,
        items: items
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
        total_amount: order.total_amount,
        currency: order.currency,
        payment_status: order.payment_status,
        order_status: order.order_status,
        external_session_id: order.external_session_id,
        external_payment_ref: order.external_payment_ref,
        shipping_address,
        notes: order.notes,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }
}
