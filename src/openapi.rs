use axum::Json;
use utoipa::OpenApi;

use crate::entities::intake::{IntakeCategory, IntakeStatus, PaymentStatus};
use crate::entities::payment::RefundStatus;
use crate::handlers::intakes::{DecisionRequest, IntakeView, SubmitIntakeResponse};
use crate::services::checkout::{SubmitIntakeRequest, SubmitOutcome};
use crate::services::refunds::RefundResult;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Intake API",
        description = "Clinical request intake and payment orchestration"
    ),
    paths(
        crate::handlers::intakes::submit_intake,
        crate::handlers::intakes::get_intake,
        crate::handlers::intakes::retry_checkout,
        crate::handlers::intakes::apply_decision,
    ),
    components(schemas(
        SubmitIntakeRequest,
        SubmitIntakeResponse,
        SubmitOutcome,
        IntakeView,
        DecisionRequest,
        RefundResult,
        IntakeCategory,
        IntakeStatus,
        PaymentStatus,
        RefundStatus,
    ))
)]
pub struct ApiDoc;

pub async fn openapi_json() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}
