use std::sync::Arc;

use metrics::counter;
use sea_orm::EntityTrait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::config::{AppConfig, IDEMPOTENCY_KEY_MIN_LEN};
use crate::db::DbPool;
use crate::entities::intake::{self, IntakeCategory, IntakeStatus};
use crate::entities::patient;
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{CreateSessionRequest, GatewayErrorKind, PaymentGateway};
use crate::models::answers::AnswerPayload;
use crate::repositories::intake_repository::{CreateOutcome, IntakeRepository, NewIntake};
use crate::services::catalog::CatalogService;
use crate::services::fraud::{FraudScorer, ScoringInput};
use crate::services::patients::PatientDirectory;
use crate::services::pricing::PriceResolver;
use crate::services::safety_gate::{GateOutcome, SafetyGate};

/// One logical submission from the presenting layer.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, ToSchema)]
pub struct SubmitIntakeRequest {
    pub category: IntakeCategory,
    #[validate(length(min = 1, message = "A subtype is required"))]
    pub subtype: String,
    /// Open answers map; converted to the typed per-category shape at the
    /// boundary
    #[schema(value_type = Object)]
    pub answers: Value,
    /// Caller-supplied key identifying this logical submission. Client
    /// retries of the same submission must reuse the same key.
    pub idempotency_key: String,
    /// Explicit catalog slug, overriding category + subtype derivation
    pub service_override: Option<String>,
    /// Guest email for unauthenticated submissions
    pub email: Option<String>,
    /// How long the patient spent filling the form, for fraud scoring
    pub form_duration_secs: Option<u64>,
}

/// Success payload of a submission: where the patient goes next.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SubmitOutcome {
    pub intake_id: Uuid,
    /// Absent when the intake already left pending_payment; the caller
    /// should show its current state instead of a payment page.
    pub checkout_url: Option<String>,
}

/// The intake lifecycle state machine: gates a submission through safety
/// and fraud evaluation, persists the clinical record atomically, and opens
/// an idempotent checkout session against the payment gateway.
#[derive(Clone)]
pub struct CheckoutService {
    config: Arc<AppConfig>,
    catalog: CatalogService,
    gate: SafetyGate,
    fraud: FraudScorer,
    patients: PatientDirectory,
    pricing: PriceResolver,
    repo: Arc<IntakeRepository>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
}

impl CheckoutService {
    pub fn new(
        db: Arc<DbPool>,
        config: Arc<AppConfig>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
    ) -> Self {
        Self {
            catalog: CatalogService::new(db.clone()),
            gate: SafetyGate::new(config.gate_rules.clone(), events.clone()),
            fraud: FraudScorer::new(db.clone(), config.fraud.clone()),
            patients: PatientDirectory::new(db.clone()),
            pricing: PriceResolver::new(config.pricing.clone()),
            repo: Arc::new(IntakeRepository::new(db)),
            config,
            gateway,
            events,
        }
    }

    pub fn repository(&self) -> Arc<IntakeRepository> {
        self.repo.clone()
    }

    /// Runs a submission through the full pipeline. Every step
    /// short-circuits on failure; nothing before atomic creation touches
    /// storage.
    #[instrument(skip(self, request), fields(category = %request.category, subtype = %request.subtype))]
    pub async fn submit(
        &self,
        request: SubmitIntakeRequest,
        authenticated_patient: Option<Uuid>,
    ) -> Result<SubmitOutcome, ServiceError> {
        // 1. Administrative kill switch, before anything else runs.
        if self.config.kill_switch.is_disabled(request.category) {
            return Err(ServiceError::ServiceUnavailable(format!(
                "[SERVICE_DISABLED] The {} service is temporarily unavailable",
                request.category
            )));
        }

        // 2. Structural validation of the payload. No storage touched.
        request.validate()?;
        let answers = AnswerPayload::from_submission(request.category, &request.answers)?;

        // 5 runs before 3 only to name the service in gate telemetry; the
        // catalog read has no side effects.
        let service = self
            .catalog
            .resolve(
                request.category,
                &request.subtype,
                request.service_override.as_deref(),
            )
            .await?;

        // 3. Safety gate.
        let decision = self.gate.evaluate(&service, &answers).await;
        if decision.outcome != GateOutcome::Allow {
            counter!(
                "intake_submissions_blocked_total",
                1,
                "outcome" => decision.outcome.label()
            );
            self.events
                .send_logged(Event::SubmissionBlocked {
                    service_slug: service.slug.clone(),
                    outcome: decision.outcome.label().to_string(),
                    reason: decision.reason.clone(),
                })
                .await;
            return Err(match decision.outcome {
                // An incomplete payload should have been caught upstream;
                // reaching the gate with one is a client defect, not a pass.
                GateOutcome::RequestMoreInfo => ServiceError::ValidationError(decision.reason),
                _ => ServiceError::SafetyBlocked(decision.reason),
            });
        }

        // 4. Identity resolution.
        let patient = self
            .patients
            .resolve_for_submission(authenticated_patient, request.email.as_deref())
            .await?;

        // 6. Fraud scoring. Non-blocking by contract.
        let assessment = self
            .fraud
            .score(ScoringInput {
                patient_id: patient.id,
                email: &patient.email,
                category: request.category,
                subtype: &request.subtype,
                form_duration_secs: request.form_duration_secs,
            })
            .await;

        // 7. Idempotency key validation. The caller supplies the key so
        // retries of the same logical submission collapse naturally.
        let idempotency_key = request.idempotency_key.trim().to_string();
        if idempotency_key.len() < IDEMPOTENCY_KEY_MIN_LEN {
            return Err(ServiceError::ValidationError(format!(
                "Idempotency key must be at least {} characters",
                IDEMPOTENCY_KEY_MIN_LEN
            )));
        }

        // 8. Atomic creation, resolving idempotency-key replays.
        let outcome = self
            .repo
            .create_intake_with_answers(
                NewIntake {
                    id: Uuid::new_v4(),
                    patient_id: patient.id,
                    service_id: service.id,
                    category: request.category,
                    subtype: request.subtype.clone(),
                    amount_cents: service.price_cents,
                    idempotency_key,
                },
                &answers,
            )
            .await?;

        let (intake, created) = match outcome {
            CreateOutcome::Created(intake) => {
                self.events.send_logged(Event::IntakeCreated(intake.id)).await;
                let to_persist: Vec<_> = assessment
                    .flags
                    .iter()
                    .filter(|f| self.fraud.should_persist(f))
                    .cloned()
                    .collect();
                if !to_persist.is_empty() {
                    self.repo
                        .record_fraud_flags(intake.id, patient.id, &to_persist)
                        .await;
                    self.events
                        .send_logged(Event::FraudFlagged {
                            intake_id: intake.id,
                            patient_id: patient.id,
                            flags: assessment.flag_names(),
                            score: assessment.score,
                        })
                        .await;
                }
                (intake, true)
            }
            CreateOutcome::Existing(intake) => {
                if intake.status != IntakeStatus::PendingPayment {
                    // Already past payment: report where it is, never open
                    // another session.
                    return Ok(SubmitOutcome {
                        intake_id: intake.id,
                        checkout_url: None,
                    });
                }
                if let Some(url) = intake.checkout_url.clone() {
                    info!(intake_id = %intake.id, "Replay resumed existing checkout session");
                    return Ok(SubmitOutcome {
                        intake_id: intake.id,
                        checkout_url: Some(url),
                    });
                }
                // Pending with no session yet: reuse the row and open one.
                (intake, false)
            }
        };

        // 9. Price-ref resolution. A fresh intake that cannot be priced was
        // never real: roll it back entirely.
        let price_ref = match self.pricing.resolve(&answers) {
            Ok(price_ref) => price_ref,
            Err(e) => {
                if created {
                    self.repo.delete_intake_with_answers(intake.id).await?;
                }
                return Err(e);
            }
        };

        // 10–11. Gateway session.
        self.open_session(intake, &price_ref, patient.gateway_customer_ref.as_deref())
            .await
    }

    /// Re-opens checkout for an intake whose previous gateway session
    /// attempt failed. Expires any stale session first, best-effort.
    #[instrument(skip(self))]
    pub async fn retry_checkout(&self, intake_id: Uuid) -> Result<SubmitOutcome, ServiceError> {
        let intake = self
            .repo
            .find_by_id(intake_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Intake {} not found", intake_id)))?;

        if intake.status != IntakeStatus::CheckoutFailed {
            return Err(ServiceError::InvalidOperation(
                "Only failed checkouts can be retried".to_string(),
            ));
        }

        if let Some(session_ref) = intake.payment_session_ref.clone() {
            if let Err(e) = self.gateway.expire_session(&session_ref).await {
                warn!(intake_id = %intake.id, error = %e, "Failed to expire stale session");
            }
        }

        let answers_row = self.repo.find_answers(intake.id).await?.ok_or_else(|| {
            ServiceError::InternalServerError
        })?;
        let answers: AnswerPayload =
            serde_json::from_value(answers_row.payload).map_err(|e| {
                warn!(intake_id = %intake.id, error = %e, "Stored answers no longer parse");
                ServiceError::InternalServerError
            })?;

        // The intake survived a gateway failure; a pricing failure here
        // leaves it inspectable rather than deleting history.
        let price_ref = self.pricing.resolve(&answers)?;

        let patient = patient::Entity::find_by_id(intake.patient_id)
            .one(self.repo.db_handle())
            .await?;
        let customer_ref = patient.and_then(|p| p.gateway_customer_ref);

        self.open_session(intake, &price_ref, customer_ref.as_deref())
            .await
    }

    async fn open_session(
        &self,
        intake: intake::Model,
        price_ref: &str,
        customer_ref: Option<&str>,
    ) -> Result<SubmitOutcome, ServiceError> {
        let intake_id = intake.id;
        let session_request = CreateSessionRequest {
            price_ref: price_ref.to_string(),
            success_url: format!(
                "{}?intake_id={}",
                self.config.gateway.success_url, intake_id
            ),
            cancel_url: self.config.gateway.cancel_url.clone(),
            customer_ref: customer_ref.map(str::to_string),
            metadata: serde_json::json!({ "intake_id": intake_id }),
        };

        match self.gateway.create_checkout_session(session_request).await {
            Ok(session) => {
                let updated = self
                    .repo
                    .set_checkout_session(intake, &session.id, &session.url)
                    .await?;
                counter!("intake_checkout_sessions_opened_total", 1);
                self.events
                    .send_logged(Event::CheckoutSessionOpened {
                        intake_id,
                        session_ref: session.id.clone(),
                    })
                    .await;
                info!(intake_id = %updated.id, "Checkout session opened");
                Ok(SubmitOutcome {
                    intake_id,
                    checkout_url: Some(session.url),
                })
            }
            Err(e) => {
                // The attempt happened; the record must stay auditable.
                // Soft-fail instead of deleting anything.
                counter!("intake_checkout_sessions_failed_total", 1);
                warn!(intake_id = %intake_id, error = %e, "Gateway session creation failed");
                self.repo
                    .mark_checkout_failed(intake, &e.to_string())
                    .await?;
                self.events
                    .send_logged(Event::CheckoutFailed {
                        intake_id,
                        error: e.to_string(),
                    })
                    .await;
                Err(match e.kind {
                    GatewayErrorKind::UnknownPrice => ServiceError::PriceConfig(e.detail),
                    _ => ServiceError::GatewayError(
                        "We could not start the payment process. Please try again shortly."
                            .to_string(),
                    ),
                })
            }
        }
    }
}
