//! Contract over the external payment processor: hosted session creation,
//! session retrieval, and webhook event verification.
//!
//! The processor is consumed, never built. Everything the rest of the
//! service knows about it goes through [`PaymentGateway`], so the HTTP
//! client can be swapped for a scripted implementation in tests.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;

pub mod http;

pub use http::HttpPaymentGateway;

/// Placeholder the processor resolves to the session id in the success
/// redirect URL.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";

/// Event type emitted when a hosted session finishes successfully.
pub const EVENT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Event type emitted when a payment attempt fails.
pub const EVENT_PAYMENT_FAILED: &str = "payment.failed";

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Create a hosted payment session for the given line items.
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError>;

    /// Fetch the current state of a session from the processor.
    /// This is live truth, distinct from any webhook payload.
    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError>;

    /// Verify a webhook delivery against the configured secret and parse
    /// the event. Verification operates over the exact raw bytes and
    /// fails closed: any mismatch is `ServiceError::InvalidSignature`.
    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, ServiceError>;
}

/// One line item in the processor's representation: minor currency units,
/// integer quantity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionLineItem {
    pub name: String,
    pub currency: String,
    pub unit_amount: i64,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub images: Vec<String>,
}

/// Request payload for session creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub line_items: Vec<SessionLineItem>,
    pub customer_email: String,
    pub success_url: String,
    pub cancel_url: String,
    /// String map the processor echoes back on every event. Carries
    /// enough to rebuild the order if local persistence failed.
    pub metadata: HashMap<String, String>,
}

/// Payment state of a session as reported by the processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SessionPaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
}

impl SessionPaymentStatus {
    pub fn is_paid(self) -> bool {
        matches!(self, Self::Paid)
    }
}

/// A processor-hosted payment session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewaySession {
    pub id: String,
    /// Hosted payment page the customer is redirected to
    #[serde(default)]
    pub url: Option<String>,
    pub payment_status: SessionPaymentStatus,
    /// Processor payment reference, present once a payment was captured
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub customer_email: Option<String>,
    /// Total in minor currency units
    #[serde(default)]
    pub amount_total: Option<i64>,
}

/// A signed, parsed webhook delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookEventData {
    pub object: GatewaySession,
}

impl WebhookEvent {
    pub fn is_session_completed(&self) -> bool {
        self.event_type == EVENT_SESSION_COMPLETED
    }

    pub fn is_payment_failed(&self) -> bool {
        // older processor API versions emit the payment_intent-scoped name
        self.event_type == EVENT_PAYMENT_FAILED
            || self.event_type == "payment_intent.payment_failed"
    }
}
