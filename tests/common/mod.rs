#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request},
    response::Response,
    Router,
};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use tower::ServiceExt;

use storefront_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db::{self, DbConfig},
    errors::ServiceError,
    events,
    gateway::{
        http::verify_signature, CreateSessionRequest, GatewaySession, PaymentGateway,
        SessionPaymentStatus, WebhookEvent,
    },
    services::{
        checkout::CheckoutService, orders::OrderService, reconciliation::ReconciliationService,
        AppServices,
    },
    AppState,
};

pub const WEBHOOK_SECRET: &str = "whsec_test123secret456";

type HmacSha256 = Hmac<Sha256>;

/// Scripted stand-in for the payment processor. Sessions created
/// through it are retrievable; tests flip their payment state to drive
/// reconciliation. Webhook verification runs the production signature
/// path against the test secret.
pub struct MockGateway {
    sessions: Mutex<HashMap<String, GatewaySession>>,
    requests: Mutex<Vec<CreateSessionRequest>>,
    next_session_id: Mutex<Vec<String>>,
    fail_create: AtomicBool,
    counter: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            next_session_id: Mutex::new(Vec::new()),
            fail_create: AtomicBool::new(false),
            counter: AtomicU64::new(0),
        }
    }

    /// Force the next created session to use this id (queued, FIFO).
    pub fn force_next_session_id(&self, id: &str) {
        self.next_session_id.lock().unwrap().push(id.to_string());
    }

    /// Make session creation fail with a gateway error.
    pub fn fail_next_create(&self, fail: bool) {
        self.fail_create.store(fail, Ordering::SeqCst);
    }

    /// Mark a session paid, as the processor would after capture.
    pub fn mark_paid(&self, session_id: &str, payment_ref: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.payment_status = SessionPaymentStatus::Paid;
            session.payment_intent = Some(payment_ref.to_string());
        }
    }

    /// Requests seen by `create_session`, in order.
    pub fn recorded_requests(&self) -> Vec<CreateSessionRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(ServiceError::PaymentGatewayError(
                "connection refused".to_string(),
            ));
        }

        let id = {
            let mut forced = self.next_session_id.lock().unwrap();
            if forced.is_empty() {
                format!("cs_test_{}", self.counter.fetch_add(1, Ordering::SeqCst))
            } else {
                forced.remove(0)
            }
        };

        let session = GatewaySession {
            id: id.clone(),
            url: Some(format!("https://pay.example/session/{id}")),
            payment_status: SessionPaymentStatus::Unpaid,
            payment_intent: None,
            customer_email: Some(request.customer_email.clone()),
            amount_total: Some(
                request
                    .line_items
                    .iter()
                    .map(|item| item.unit_amount * item.quantity as i64)
                    .sum(),
            ),
        };

        self.sessions
            .lock()
            .unwrap()
            .insert(id.clone(), session.clone());
        self.requests.lock().unwrap().push(request);
        Ok(session)
    }

    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError> {
        self.sessions
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .ok_or_else(|| {
                ServiceError::NotFound(format!("payment session {session_id} not found"))
            })
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, ServiceError> {
        verify_signature(payload, signature_header, WEBHOOK_SECRET, 300)?;
        serde_json::from_slice(payload)
            .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {e}")))
    }
}

/// Sign a webhook payload the way the processor does.
pub fn sign_webhook(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let ts = timestamp.to_string();
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(ts.as_bytes());
    mac.update(b".");
    mac.update(payload);
    format!("t={},v1={}", ts, hex::encode(mac.finalize().into_bytes()))
}

/// Application harness over an in-memory SQLite database and a scripted
/// gateway.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub gateway: Arc<MockGateway>,
    _event_task: tokio::task::JoinHandle<()>,
}

impl TestApp {
    pub async fn new() -> Self {
        let mut cfg = AppConfig::new(
            "sqlite::memory:".to_string(),
            "test_secret_key_that_is_definitely_longer_than_sixty_four_characters_ok".to_string(),
            3600,
            "127.0.0.1".to_string(),
            0,
            "test".to_string(),
        );
        cfg.payment.webhook_secret = Some(WEBHOOK_SECRET.to_string());

        // a single shared connection keeps the in-memory database alive
        let pool = db::establish_connection_with_config(&DbConfig {
            url: cfg.database_url.clone(),
            max_connections: 1,
            min_connections: 1,
            ..Default::default()
        })
        .await
        .expect("failed to create test database");

        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");

        let db = Arc::new(pool);
        let (event_sender, event_rx) = events::channel(64);
        let event_task = tokio::spawn(events::process_events(event_rx));

        let gateway = Arc::new(MockGateway::new());
        let gateway_dyn: Arc<dyn PaymentGateway> = gateway.clone();

        let auth_service = Arc::new(AuthService::new(AuthConfig::new(
            cfg.jwt_secret.clone(),
            Duration::from_secs(3600),
        )));
        let order_service = Arc::new(OrderService::new(db.clone(), Some(event_sender.clone())));
        let checkout_service = Arc::new(CheckoutService::new(
            gateway_dyn.clone(),
            order_service.clone(),
            cfg.client_url.clone(),
            cfg.currency.clone(),
        ));
        let reconciliation_service = Arc::new(ReconciliationService::new(
            gateway_dyn,
            order_service.clone(),
        ));

        let state = AppState {
            db,
            config: cfg,
            event_sender,
            services: AppServices {
                orders: order_service,
                checkout: checkout_service,
                reconciliation: reconciliation_service,
                auth: auth_service,
            },
        };

        let router = storefront_api::build_router(state.clone());

        Self {
            router,
            state,
            gateway,
            _event_task: event_task,
        }
    }

    /// Mint a bearer token for a caller with the given roles.
    pub fn token(&self, subject: &str, roles: &[&str]) -> String {
        self.state
            .services
            .auth
            .generate_token(
                subject,
                Some(format!("{subject}@test.example")),
                roles.iter().map(|r| r.to_string()).collect(),
            )
            .expect("token generation")
    }

    pub async fn request(&self, method: Method, uri: &str, body: Option<Value>) -> Response {
        self.dispatch(method, uri, body, None).await
    }

    pub async fn request_with_token(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: &str,
    ) -> Response {
        self.dispatch(method, uri, body, Some(token)).await
    }

    /// Post a signed webhook delivery with the raw payload bytes.
    pub async fn post_webhook(&self, payload: &[u8], signature: Option<&str>) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri("/api/v1/payments/webhook")
            .header(header::CONTENT_TYPE, "application/json");
        if let Some(signature) = signature {
            builder = builder.header("x-signature", signature);
        }
        let request = builder.body(Body::from(payload.to_vec())).expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("webhook response")
    }

    /// Post a webhook payload signed with the test secret and a current
    /// timestamp.
    pub async fn post_signed_webhook(&self, payload: &Value) -> Response {
        let bytes = serde_json::to_vec(payload).expect("payload bytes");
        let signature = sign_webhook(&bytes, WEBHOOK_SECRET, chrono::Utc::now().timestamp());
        self.post_webhook(&bytes, Some(&signature)).await
    }

    async fn dispatch(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }

        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("response")
    }
}

/// Decode a response body as JSON.
pub async fn response_json(response: Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
