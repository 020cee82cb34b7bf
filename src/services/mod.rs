pub mod checkout;
pub mod orders;
pub mod reconciliation;

use std::sync::Arc;

use crate::auth::AuthService;

/// Container for the shared service instances handlers pull from
/// application state.
#[derive(Clone)]
pub struct AppServices {
    pub orders: Arc<orders::OrderService>,
    pub checkout: Arc<checkout::CheckoutService>,
    pub reconciliation: Arc<reconciliation::ReconciliationService>,
    pub auth: Arc<AuthService>,
}
