use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::{debug, instrument};

use crate::config::PaymentConfig;
use crate::errors::ServiceError;

use super::{CreateSessionRequest, GatewaySession, PaymentGateway, WebhookEvent};

type HmacSha256 = Hmac<Sha256>;

/// Gateway client speaking the processor's REST API over reqwest.
///
/// Constructed once at startup and injected; gateway calls are
/// time-bounded by the client timeout, and a timeout surfaces as
/// `PaymentGatewayError` rather than being retried in-request.
#[derive(Clone)]
pub struct HttpPaymentGateway {
    http: reqwest::Client,
    base_url: String,
    secret_key: String,
    webhook_secret: Option<String>,
    webhook_tolerance_secs: u64,
}

impl HttpPaymentGateway {
    pub fn from_config(cfg: &PaymentConfig) -> Result<Self, ServiceError> {
        let timeout = Duration::from_secs(if cfg.timeout_secs > 0 {
            cfg.timeout_secs
        } else {
            15
        });
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(timeout)
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;

        Ok(Self {
            http,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            secret_key: cfg.secret_key.clone(),
            webhook_secret: cfg.webhook_secret.clone(),
            webhook_tolerance_secs: cfg.webhook_tolerance_secs,
        })
    }

    fn sessions_url(&self) -> String {
        format!("{}/v1/checkout/sessions", self.base_url)
    }

    fn map_transport_error(err: reqwest::Error) -> ServiceError {
        if err.is_timeout() {
            ServiceError::PaymentGatewayError("request timed out".to_string())
        } else {
            ServiceError::PaymentGatewayError(err.to_string())
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpPaymentGateway {
    #[instrument(skip(self, request), fields(customer_email = %request.customer_email))]
    async fn create_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<GatewaySession, ServiceError> {
        let response = self
            .http
            .post(self.sessions_url())
            .bearer_auth(&self.secret_key)
            .json(&request)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::PaymentGatewayError(format!(
                "session create rejected ({status}): {body}"
            )));
        }

        let session: GatewaySession = response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentGatewayError(format!("invalid response: {e}")))?;
        debug!(session_id = %session.id, "payment session created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<GatewaySession, ServiceError> {
        let response = self
            .http
            .get(format!("{}/{}", self.sessions_url(), session_id))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ServiceError::NotFound(format!(
                "payment session {session_id} not found"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::PaymentGatewayError(format!(
                "session retrieve rejected ({status}): {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::PaymentGatewayError(format!("invalid response: {e}")))
    }

    fn verify_webhook(
        &self,
        payload: &[u8],
        signature_header: &str,
    ) -> Result<WebhookEvent, ServiceError> {
        let secret = self.webhook_secret.as_deref().ok_or_else(|| {
            ServiceError::InvalidSignature("webhook secret not configured".to_string())
        })?;

        verify_signature(payload, signature_header, secret, self.webhook_tolerance_secs)?;

        serde_json::from_slice(payload)
            .map_err(|e| ServiceError::InvalidInput(format!("invalid webhook payload: {e}")))
    }
}

/// Verify a `t=<unix-ts>,v1=<hex-hmac>` signature header against the raw
/// payload bytes. The HMAC covers `"<ts>.<payload>"`; the timestamp must
/// be within the tolerance window on either side.
pub fn verify_signature(
    payload: &[u8],
    signature_header: &str,
    secret: &str,
    tolerance_secs: u64,
) -> Result<(), ServiceError> {
    let mut timestamp = "";
    let mut signature = "";
    for part in signature_header.split(',') {
        let mut it = part.trim().splitn(2, '=');
        match (it.next(), it.next()) {
            (Some("t"), Some(val)) => timestamp = val,
            (Some("v1"), Some(val)) => signature = val,
            _ => {}
        }
    }

    if timestamp.is_empty() || signature.is_empty() {
        return Err(ServiceError::InvalidSignature(
            "malformed signature header".to_string(),
        ));
    }

    let ts: i64 = timestamp
        .parse()
        .map_err(|_| ServiceError::InvalidSignature("invalid timestamp".to_string()))?;
    let now = chrono::Utc::now().timestamp();
    if (now - ts).unsigned_abs() > tolerance_secs {
        return Err(ServiceError::InvalidSignature(
            "timestamp outside tolerance".to_string(),
        ));
    }

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| ServiceError::InvalidSignature("invalid secret".to_string()))?;
    mac.update(timestamp.as_bytes());
    mac.update(b".");
    mac.update(payload);
    let expected = hex::encode(mac.finalize().into_bytes());

    if !constant_time_eq(&expected, signature) {
        return Err(ServiceError::InvalidSignature(
            "signature mismatch".to_string(),
        ));
    }

    Ok(())
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
