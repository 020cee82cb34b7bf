use utoipa::openapi::security::{HttpAuthScheme, HttpBuilder, SecurityScheme};
use utoipa::{Modify, OpenApi};
use utoipa_swagger_ui::SwaggerUi;

/// OpenAPI document for the storefront API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Storefront API",
        description = "Checkout, payment session reconciliation, and order tracking."
    ),
    paths(
        crate::handlers::checkout::create_checkout_session,
        crate::handlers::payment_webhooks::payment_webhook,
        crate::handlers::payment_webhooks::verify_session,
        crate::handlers::orders::list_orders,
        crate::handlers::orders::get_order,
        crate::handlers::orders::get_order_by_session,
        crate::handlers::orders::create_order,
        crate::handlers::orders::update_order,
    ),
    components(schemas(
        crate::errors::ErrorResponse,
        crate::entities::order::PaymentStatus,
        crate::entities::order::OrderStatus,
        crate::services::checkout::CartItemInput,
        crate::services::checkout::CheckoutRequest,
        crate::services::checkout::CheckoutResponse,
        crate::services::orders::NewLineItem,
        crate::services::orders::OrderResponse,
        crate::services::orders::ShippingAddress,
        crate::services::orders::UpdateOrderInput,
        crate::services::reconciliation::SessionProjection,
        crate::services::reconciliation::VerificationResponse,
        crate::handlers::orders::CreateOrderRequest,
    )),
    modifiers(&SecurityAddon),
    tags(
        (name = "Checkout", description = "Cart to payment session"),
        (name = "Payments", description = "Webhook and verification reconciliation"),
        (name = "Orders", description = "Order reads and administration"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "Bearer",
                SecurityScheme::Http(
                    HttpBuilder::new()
                        .scheme(HttpAuthScheme::Bearer)
                        .bearer_format("JWT")
                        .build(),
                ),
            );
        }
    }
}

/// Swagger UI mounted at `/docs`, serving the generated document.
pub fn swagger_routes() -> SwaggerUi {
    SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi())
}
