use std::{net::SocketAddr, sync::Arc, time::Duration};

use http::HeaderValue;
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};
use tracing::info;

use storefront_api as api;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cfg = api::config::load_config()?;
    api::config::init_tracing(cfg.log_level(), cfg.log_json);

    // Init DB
    let db_pool = api::db::establish_connection_from_app_config(&cfg).await?;
    if cfg.auto_migrate {
        api::db::run_migrations(&db_pool).await?;
    }
    let db = Arc::new(db_pool);

    // Init events
    let (event_sender, event_rx) = api::events::channel(1024);
    tokio::spawn(api::events::process_events(event_rx));

    // Gateway client: constructed once, injected everywhere.
    let gateway: Arc<dyn api::gateway::PaymentGateway> =
        Arc::new(api::gateway::HttpPaymentGateway::from_config(&cfg.payment)?);

    // Build services
    let auth_service = Arc::new(api::auth::AuthService::new(api::auth::AuthConfig::new(
        cfg.jwt_secret.clone(),
        Duration::from_secs(cfg.jwt_expiration as u64),
    )));
    let order_service = Arc::new(api::services::orders::OrderService::new(
        db.clone(),
        Some(event_sender.clone()),
    ));
    let checkout_service = Arc::new(api::services::checkout::CheckoutService::new(
        gateway.clone(),
        order_service.clone(),
        cfg.client_url.clone(),
        cfg.currency.clone(),
    ));
    let reconciliation_service = Arc::new(api::services::reconciliation::ReconciliationService::new(
        gateway,
        order_service.clone(),
    ));

    let state = api::AppState {
        db,
        config: cfg.clone(),
        event_sender,
        services: api::services::AppServices {
            orders: order_service,
            checkout: checkout_service,
            reconciliation: reconciliation_service,
            auth: auth_service,
        },
    };

    // CORS: explicit origins in production, permissive otherwise
    let cors = match cfg
        .cors_allowed_origins
        .as_deref()
        .filter(|origins| !origins.trim().is_empty())
    {
        Some(origins) => {
            let origins: Vec<HeaderValue> = origins
                .split(',')
                .filter_map(|origin| origin.trim().parse().ok())
                .collect();
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods(Any)
                .allow_headers(Any)
        }
        None => CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any),
    };

    let app = api::build_router(state)
        .layer(cors)
        .layer(TimeoutLayer::new(Duration::from_secs(cfg.request_timeout_secs)))
        .layer(CompressionLayer::new());

    let addr: SocketAddr = format!("{}:{}", cfg.host, cfg.port).parse()?;
    info!("storefront-api listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("shutdown signal received");
}
