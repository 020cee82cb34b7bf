use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// A customer order. Created in `pending` state at the moment a hosted
/// payment session is opened, so the full cart and shipping context is
/// retained regardless of payment outcome.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// Lowercase-normalized customer email
    pub customer_email: String,

    pub total_amount: Decimal,
    pub currency: String,

    pub payment_status: PaymentStatus,
    pub order_status: OrderStatus,

    /// Payment-session id assigned by the external processor.
    /// Unique-sparse: absent for directly created orders, never shared.
    #[sea_orm(nullable)]
    pub external_session_id: Option<String>,

    /// Processor payment reference, set by the completion transition
    #[sea_orm(nullable)]
    pub external_payment_ref: Option<String>,

    /// JSON-serialized shipping address
    #[sea_orm(nullable)]
    pub shipping_address: Option<String>,

    #[sea_orm(nullable)]
    pub notes: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Payment lifecycle of an order. Transitions are monotonic forward:
/// `failed` and `refunded` are terminal and are never overwritten by
/// reconciliation.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "completed")]
    Completed,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    /// Terminal statuses cannot be left by reconciliation.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }
}

/// Fulfillment lifecycle of an order. Reconciliation only ever advances
/// this to `processing`, and only alongside payment completion.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payment_status_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&PaymentStatus::Completed).unwrap(),
            "\"completed\""
        );
        assert_eq!(
            serde_json::to_string(&OrderStatus::Processing).unwrap(),
            "\"processing\""
        );
    }

    #[test]
    fn terminal_statuses() {
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Refunded.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Completed.is_terminal());
    }
}
