use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{error, instrument};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::entities::intake::{self, IntakeCategory, IntakeStatus, PaymentStatus};
use crate::errors::ServiceError;
use crate::services::checkout::SubmitIntakeRequest;
use crate::services::refunds::RefundResult;
use crate::AppState;

const PATIENT_ID_HEADER: &str = "x-patient-id";

/// Submission contract output. Failures are part of the payload: the
/// presenting layer displays `error` as-is and never sees a thrown error.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct SubmitIntakeResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub intake_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl SubmitIntakeResponse {
    fn ok(intake_id: Uuid, checkout_url: Option<String>) -> Self {
        Self {
            success: true,
            intake_id: Some(intake_id),
            checkout_url,
            error: None,
        }
    }

    fn err(error: String) -> Self {
        Self {
            success: false,
            intake_id: None,
            checkout_url: None,
            error: Some(error),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct IntakeView {
    pub id: Uuid,
    pub category: IntakeCategory,
    pub subtype: String,
    pub status: IntakeStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout_error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<intake::Model> for IntakeView {
    fn from(model: intake::Model) -> Self {
        Self {
            id: model.id,
            category: model.category,
            subtype: model.subtype,
            status: model.status,
            payment_status: model.payment_status,
            amount_cents: model.amount_cents,
            checkout_url: model.checkout_url,
            checkout_error: model.checkout_error,
            created_at: model.created_at,
        }
    }
}

/// Decision event from the external review workflow.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct DecisionRequest {
    /// Only "declined" drives this endpoint
    pub decision: String,
    pub actor_id: Uuid,
}

pub fn intake_routes() -> Router<AppState> {
    Router::new()
        .route("/intakes", post(submit_intake))
        .route("/intakes/:id", get(get_intake))
        .route("/intakes/:id/checkout/retry", post(retry_checkout))
        .route("/intakes/:id/decision", post(apply_decision))
}

fn authenticated_patient(headers: &HeaderMap) -> Result<Option<Uuid>, ServiceError> {
    match headers.get(PATIENT_ID_HEADER) {
        None => Ok(None),
        Some(value) => {
            let raw = value.to_str().map_err(|_| {
                ServiceError::AuthError("Invalid patient identity header".to_string())
            })?;
            Uuid::parse_str(raw).map(Some).map_err(|_| {
                ServiceError::AuthError("Invalid patient identity header".to_string())
            })
        }
    }
}

/// Submit a clinical request and open its checkout session.
#[utoipa::path(
    post,
    path = "/api/v1/intakes",
    request_body = SubmitIntakeRequest,
    responses(
        (status = 200, description = "Submission outcome", body = SubmitIntakeResponse)
    )
)]
#[instrument(skip(state, headers, request))]
pub async fn submit_intake(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<SubmitIntakeRequest>,
) -> Json<SubmitIntakeResponse> {
    let result = match authenticated_patient(&headers) {
        Ok(patient_id) => state.services.checkout.submit(request, patient_id).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(outcome) => Json(SubmitIntakeResponse::ok(
            outcome.intake_id,
            outcome.checkout_url,
        )),
        Err(e) => {
            // Full detail goes to the log; the caller gets the safe message.
            error!(error = %e, "Intake submission failed");
            Json(SubmitIntakeResponse::err(e.response_message()))
        }
    }
}

/// Fetch an intake's current lifecycle and payment state.
#[utoipa::path(
    get,
    path = "/api/v1/intakes/{id}",
    params(("id" = Uuid, Path, description = "Intake id")),
    responses(
        (status = 200, description = "Intake state", body = IntakeView),
        (status = 404, description = "Unknown intake")
    )
)]
pub async fn get_intake(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<IntakeView>, ServiceError> {
    let intake = state
        .services
        .intakes
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Intake {} not found", id)))?;
    Ok(Json(IntakeView::from(intake)))
}

/// Re-open checkout for an intake whose gateway session attempt failed.
#[utoipa::path(
    post,
    path = "/api/v1/intakes/{id}/checkout/retry",
    params(("id" = Uuid, Path, description = "Intake id")),
    responses(
        (status = 200, description = "Retry outcome", body = SubmitIntakeResponse)
    )
)]
#[instrument(skip(state))]
pub async fn retry_checkout(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Json<SubmitIntakeResponse> {
    match state.services.checkout.retry_checkout(id).await {
        Ok(outcome) => Json(SubmitIntakeResponse::ok(
            outcome.intake_id,
            outcome.checkout_url,
        )),
        Err(e) => {
            error!(intake_id = %id, error = %e, "Checkout retry failed");
            Json(SubmitIntakeResponse::err(e.response_message()))
        }
    }
}

/// Apply a reviewer decision. A decline marks the intake and drives the
/// refund pipeline.
#[utoipa::path(
    post,
    path = "/api/v1/intakes/{id}/decision",
    request_body = DecisionRequest,
    params(("id" = Uuid, Path, description = "Intake id")),
    responses(
        (status = 200, description = "Refund outcome", body = RefundResult),
        (status = 404, description = "Unknown intake")
    )
)]
#[instrument(skip(state, request), fields(intake_id = %id))]
pub async fn apply_decision(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<DecisionRequest>,
) -> Result<Json<RefundResult>, ServiceError> {
    if request.decision != "declined" {
        return Err(ServiceError::ValidationError(
            "Only 'declined' decisions are accepted on this endpoint".to_string(),
        ));
    }

    let intake = state
        .services
        .intakes
        .find_by_id(id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("Intake {} not found", id)))?;
    state.services.intakes.mark_declined(intake).await?;
    state
        .event_sender
        .send_logged(crate::events::Event::IntakeDeclined {
            intake_id: id,
            actor_id: request.actor_id,
        })
        .await;

    let result = state
        .services
        .refunds
        .refund_if_eligible(id, request.actor_id)
        .await?;
    Ok(Json(result))
}
