use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::{instrument, warn};

use crate::config::GatewayConfig;

use super::{
    CheckoutSessionHandle, CreateSessionRequest, GatewayError, GatewayErrorKind, GatewayRefund,
    PaymentGateway, RefundRequest,
};

const RETRY_BASE_BACKOFF_MS: u64 = 100;

/// REST client for the payment gateway. Every call carries an explicit
/// network timeout; transient faults are retried a small bounded number of
/// times with exponential backoff. Business errors are never retried.
pub struct RestPaymentGateway {
    client: reqwest::Client,
    base_url: String,
    secret_key: String,
    max_retries: u32,
}

impl RestPaymentGateway {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(config.timeout_secs))
                .build()
                .unwrap_or_default(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            secret_key: config.secret_key.clone(),
            max_retries: config.max_retries.max(1),
        }
    }

    async fn post_with_retry(
        &self,
        path: &str,
        body: &Value,
    ) -> Result<Value, GatewayError> {
        let url = format!("{}{}", self.base_url, path);
        let mut last_error =
            GatewayError::new(GatewayErrorKind::Transient, "no attempts made");

        for attempt in 1..=self.max_retries {
            let result = self
                .client
                .post(&url)
                .bearer_auth(&self.secret_key)
                .json(body)
                .send()
                .await;

            match result {
                Ok(response) => {
                    let status = response.status();
                    let payload: Value = response.json().await.unwrap_or(Value::Null);

                    if status.is_success() {
                        return Ok(payload);
                    }

                    let error = classify_http_error(status, &payload);
                    if error.kind != GatewayErrorKind::Transient {
                        return Err(error);
                    }
                    warn!(
                        url = %url,
                        status = status.as_u16(),
                        attempt,
                        max_retries = self.max_retries,
                        "Transient gateway error"
                    );
                    last_error = error;
                }
                Err(e) => {
                    warn!(
                        url = %url,
                        error = %e,
                        attempt,
                        max_retries = self.max_retries,
                        "Gateway request failed"
                    );
                    last_error = GatewayError::new(GatewayErrorKind::Transient, e.to_string());
                }
            }

            if attempt < self.max_retries {
                let backoff =
                    Duration::from_millis(RETRY_BASE_BACKOFF_MS * 2_u64.pow(attempt - 1));
                tokio::time::sleep(backoff).await;
            }
        }

        Err(last_error)
    }
}

/// Maps a non-2xx gateway response onto the error taxonomy. A 4xx whose
/// body names a missing price resource is a configuration error; other 4xx
/// are business rejections; 5xx are transient.
fn classify_http_error(status: StatusCode, payload: &Value) -> GatewayError {
    let detail = payload
        .pointer("/error/message")
        .and_then(Value::as_str)
        .unwrap_or("no error detail")
        .to_string();

    if status.is_server_error() {
        return GatewayError::new(GatewayErrorKind::Transient, detail);
    }

    let code = payload.pointer("/error/code").and_then(Value::as_str);
    let param = payload.pointer("/error/param").and_then(Value::as_str);
    if code == Some("resource_missing") && param == Some("price") {
        return GatewayError::new(GatewayErrorKind::UnknownPrice, detail);
    }

    GatewayError::new(GatewayErrorKind::Rejected, detail)
}

#[async_trait]
impl PaymentGateway for RestPaymentGateway {
    #[instrument(skip(self, request), fields(price_ref = %request.price_ref))]
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionHandle, GatewayError> {
        let body = serde_json::json!({
            "price": request.price_ref,
            "success_url": request.success_url,
            "cancel_url": request.cancel_url,
            "customer": request.customer_ref,
            "metadata": request.metadata,
        });

        let payload = self.post_with_retry("/v1/checkout/sessions", &body).await?;
        serde_json::from_value(payload).map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Transient,
                format!("malformed session response: {}", e),
            )
        })
    }

    #[instrument(skip(self))]
    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError> {
        let path = format!("/v1/checkout/sessions/{}/expire", session_id);
        self.post_with_retry(&path, &Value::Null).await.map(|_| ())
    }

    #[instrument(skip(self, request), fields(payment_ref = %request.payment_ref))]
    async fn create_refund(&self, request: RefundRequest) -> Result<GatewayRefund, GatewayError> {
        let body = serde_json::json!({
            "payment": request.payment_ref,
            "reason": request.reason,
            "metadata": request.metadata,
        });

        let payload = self.post_with_retry("/v1/refunds", &body).await?;
        serde_json::from_value(payload).map_err(|e| {
            GatewayError::new(
                GatewayErrorKind::Transient,
                format!("malformed refund response: {}", e),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_price_is_a_config_error() {
        let payload = json!({
            "error": {
                "code": "resource_missing",
                "param": "price",
                "message": "No such price: 'price_cert_1d'"
            }
        });
        let err = classify_http_error(StatusCode::BAD_REQUEST, &payload);
        assert_eq!(err.kind, GatewayErrorKind::UnknownPrice);
    }

    #[test]
    fn server_errors_are_transient() {
        let err = classify_http_error(StatusCode::BAD_GATEWAY, &Value::Null);
        assert_eq!(err.kind, GatewayErrorKind::Transient);
    }

    #[test]
    fn other_client_errors_are_rejections() {
        let payload = json!({
            "error": { "code": "amount_too_small", "message": "Amount below minimum" }
        });
        let err = classify_http_error(StatusCode::BAD_REQUEST, &payload);
        assert_eq!(err.kind, GatewayErrorKind::Rejected);
        assert_eq!(err.detail, "Amount below minimum");
    }
}
