//! Brings persisted orders in line with the processor's authoritative
//! session state. Two entry points — the processor's webhook dispatcher
//! and the redirected browser's verification poll — converge on one
//! idempotent completion transition, so either may arrive first, twice,
//! or concurrently.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;

use crate::{
    entities::order::Model as OrderModel,
    errors::ServiceError,
    gateway::{PaymentGateway, SessionPaymentStatus},
    services::orders::{OrderResponse, OrderService},
};

/// Which path asked for the completion transition. Tags logs and
/// nothing else: the transition itself is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileTrigger {
    Webhook,
    Poll,
}

impl fmt::Display for ReconcileTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Webhook => write!(f, "webhook"),
            Self::Poll => write!(f, "poll"),
        }
    }
}

/// Session fields surfaced to the status page alongside the order.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SessionProjection {
    pub id: String,
    pub payment_status: SessionPaymentStatus,
    pub customer_email: Option<String>,
}

/// Result of the read-or-reconcile verification endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct VerificationResponse {
    pub order: OrderResponse,
    pub session: SessionProjection,
}

pub struct ReconciliationService {
    gateway: Arc<dyn PaymentGateway>,
    orders: Arc<OrderService>,
}

impl ReconciliationService {
    pub fn new(gateway: Arc<dyn PaymentGateway>, orders: Arc<OrderService>) -> Self {
        Self { gateway, orders }
    }

    /// Webhook entry point. Verifies the signature over the exact raw
    /// bytes (fails closed), then dispatches on event type.
    ///
    /// A completed-session event whose order is missing is acknowledged,
    /// not failed: the event may have raced ahead of order persistence,
    /// and the polling path is the backstop. Returning an error would
    /// only make the processor retry into the same gap.
    #[instrument(skip(self, payload, signature_header))]
    pub async fn handle_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<(), ServiceError> {
        let event = self.gateway.verify_webhook(payload, signature_header)?;

        if event.is_session_completed() {
            let session = &event.data.object;
            info!(event_id = %event.id, session_id = %session.id, "checkout session completed");

            let outcome = self
                .complete_session_payment(
                    &session.id,
                    session.payment_intent.as_deref(),
                    ReconcileTrigger::Webhook,
                )
                .await?;
            if outcome.is_none() {
                warn!(
                    session_id = %session.id,
                    "no order for completed session yet; acknowledging, polling path will recover"
                );
            }
        } else if event.is_payment_failed() {
            let session = &event.data.object;
            match self.orders.fail_payment_by_session(&session.id).await? {
                Some((order, true)) => {
                    info!(order_id = %order.id, session_id = %session.id, "order marked failed");
                }
                Some((order, false)) => {
                    debug!(
                        order_id = %order.id,
                        session_id = %session.id,
                        status = ?order.payment_status,
                        "payment failed event ignored, order already settled"
                    );
                }
                None => {
                    warn!(session_id = %session.id, "payment failed event for unknown session");
                }
            }
        } else {
            debug!(event_type = %event.event_type, "unhandled webhook event type");
        }

        Ok(())
    }

    /// Polling entry point: re-fetch the live session from the gateway,
    /// reconcile if it reports paid, and return the (possibly updated)
    /// order either way. Safe to call repeatedly.
    #[instrument(skip(self))]
    pub async fn verify_session(
        &self,
        session_id: &str,
    ) -> Result<VerificationResponse, ServiceError> {
        let session = self.gateway.retrieve_session(session_id).await?;

        let order = if session.payment_status.is_paid() {
            match self
                .complete_session_payment(
                    session_id,
                    session.payment_intent.as_deref(),
                    ReconcileTrigger::Poll,
                )
                .await?
            {
                Some(order) => order,
                None => {
                    // Session exists and is paid but the checkout's
                    // persistence step never landed. Observable anomaly,
                    // surfaced as 404 to the caller.
                    warn!(session_id, "verified session has no local order");
                    return Err(ServiceError::NotFound(format!(
                        "Order for session {session_id} not found"
                    )));
                }
            }
        } else {
            return self.respond_unreconciled(session_id, &session).await;
        };

        let order = self.orders.to_full_response(order).await?;
        Ok(VerificationResponse {
            order,
            session: SessionProjection {
                id: session.id,
                payment_status: session.payment_status,
                customer_email: session.customer_email,
            },
        })
    }

    async fn respond_unreconciled(
        &self,
        session_id: &str,
        session: &crate::gateway::GatewaySession,
    ) -> Result<VerificationResponse, ServiceError> {
        let order = self
            .orders
            .get_order_by_session(session_id)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Order for session {session_id} not found"))
            })?;

        Ok(VerificationResponse {
            order,
            session: SessionProjection {
                id: session.id.clone(),
                payment_status: session.payment_status,
                customer_email: session.customer_email.clone(),
            },
        })
    }

    /// The single completion transition both entry points share. The
    /// store applies it as one conditional write, so a webhook/poll race
    /// produces at most one effective update and the loser logs a no-op.
    async fn complete_session_payment(
        &self,
        session_id: &str,
        payment_ref: Option<&str>,
        trigger: ReconcileTrigger,
    ) -> Result<Option<OrderModel>, ServiceError> {
        match self
            .orders
            .complete_payment_by_session(session_id, payment_ref)
            .await?
        {
            Some((order, true)) => {
                info!(
                    order_id = %order.id,
                    session_id,
                    %trigger,
                    "completion transition applied"
                );
                Ok(Some(order))
            }
            Some((order, false)) => {
                debug!(
                    order_id = %order.id,
                    session_id,
                    %trigger,
                    status = ?order.payment_status,
                    "completion transition was a no-op"
                );
                Ok(Some(order))
            }
            None => Ok(None),
        }
    }
}
