use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod rest;

pub use rest::RestPaymentGateway;

/// How a gateway call failed. Call sites are forced to distinguish a
/// deployment problem (unknown price) from a transient network fault and
/// from a business-rule rejection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// The price reference does not exist on the gateway. A configuration
    /// error, surfaced differently to the caller.
    UnknownPrice,
    /// Network-level fault (timeout, connect failure, 5xx). Retryable.
    Transient,
    /// The gateway rejected the request as a business matter. Not retryable.
    Rejected,
}

#[derive(Debug, Clone)]
pub struct GatewayError {
    pub kind: GatewayErrorKind,
    pub detail: String,
}

impl GatewayError {
    pub fn new(kind: GatewayErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for GatewayError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            GatewayErrorKind::UnknownPrice => write!(f, "unknown price: {}", self.detail),
            GatewayErrorKind::Transient => write!(f, "transient gateway error: {}", self.detail),
            GatewayErrorKind::Rejected => write!(f, "gateway rejected request: {}", self.detail),
        }
    }
}

impl std::error::Error for GatewayError {}

#[derive(Debug, Clone, Serialize)]
pub struct CreateSessionRequest {
    /// Gateway price reference resolved from the pricing config
    pub price_ref: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Stored gateway customer, when the patient has one
    pub customer_ref: Option<String>,
    /// Binds the session back to the intake id
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSessionHandle {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefundRequest {
    /// The captured gateway payment to refund
    pub payment_ref: String,
    pub reason: String,
    pub metadata: Value,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayRefund {
    pub id: String,
    pub amount: i64,
}

/// External payment gateway operations used by the intake pipeline.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CreateSessionRequest,
    ) -> Result<CheckoutSessionHandle, GatewayError>;

    async fn expire_session(&self, session_id: &str) -> Result<(), GatewayError>;

    async fn create_refund(&self, request: RefundRequest) -> Result<GatewayRefund, GatewayError>;
}
