use std::sync::Arc;

use chrono::Utc;
use metrics::counter;
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use tracing::{error, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::DbPool;
use crate::entities::intake::{IntakeCategory, IntakeStatus, PaymentStatus};
use crate::entities::payment::{self, Entity as Payment, PaymentState, RefundStatus};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::gateway::{PaymentGateway, RefundRequest};
use crate::repositories::intake_repository::IntakeRepository;

const REFUND_REASON: &str = "declined_clinical_request";

/// Outcome of a refund attempt. Failure to refund is part of the result,
/// not an exception: the caller always learns where the refund stands.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RefundResult {
    pub refunded: bool,
    pub status: String,
    pub reason: String,
}

impl RefundResult {
    fn new(refunded: bool, status: &str, reason: impl Into<String>) -> Self {
        Self {
            refunded,
            status: status.to_string(),
            reason: reason.into(),
        }
    }
}

/// Categories whose payments are automatically refunded on decline.
/// Consults are excluded by policy: clinician time was still spent.
const REFUNDABLE_CATEGORIES: &[IntakeCategory] =
    &[IntakeCategory::Certificate, IntakeCategory::Prescription];

/// Drives idempotent, concurrency-safe refunds for declined intakes.
#[derive(Clone)]
pub struct RefundService {
    db: Arc<DbPool>,
    repo: Arc<IntakeRepository>,
    gateway: Arc<dyn PaymentGateway>,
    events: EventSender,
}

impl RefundService {
    pub fn new(
        db: Arc<DbPool>,
        repo: Arc<IntakeRepository>,
        gateway: Arc<dyn PaymentGateway>,
        events: EventSender,
    ) -> Self {
        Self {
            db,
            repo,
            gateway,
            events,
        }
    }

    /// Refunds a declined intake's payment if policy allows.
    ///
    /// At most one gateway refund call can ever be in flight per intake:
    /// entry into `processing` is a conditional update guarded by the
    /// previously-read refund status, and an existing gateway refund ref
    /// short-circuits before the gateway is touched at all.
    #[instrument(skip(self), fields(intake_id = %intake_id, actor_id = %actor_id))]
    pub async fn refund_if_eligible(
        &self,
        intake_id: Uuid,
        actor_id: Uuid,
    ) -> Result<RefundResult, ServiceError> {
        // 1. The intake must exist.
        let intake = self
            .repo
            .find_by_id(intake_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Intake {} not found", intake_id)))?;

        // 2. Refunds are only ever driven by a decline decision.
        if intake.status != IntakeStatus::Declined {
            return Ok(RefundResult::new(
                false,
                "not_applicable",
                "Refunds only apply to declined requests",
            ));
        }

        // 3. Category policy gate.
        if !REFUNDABLE_CATEGORIES.contains(&intake.category) {
            let reason = format!(
                "{} requests are not automatically refunded on decline",
                intake.category
            );
            self.persist_not_eligible(intake_id, &reason).await?;
            self.events
                .send_logged(Event::RefundNotEligible {
                    intake_id,
                    reason: reason.clone(),
                })
                .await;
            return Ok(RefundResult::new(
                false,
                RefundStatus::NotEligible.as_str(),
                reason,
            ));
        }

        // 4. There must be a captured payment to refund.
        let paid = Payment::find()
            .filter(payment::Column::IntakeId.eq(intake_id))
            .filter(payment::Column::Status.eq(PaymentState::Paid))
            .one(&*self.db)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("No captured payment for intake {}", intake_id))
            })?;

        // 5. Idempotency short-circuit: a recorded gateway refund ref is
        // proof of a completed refund.
        if paid.gateway_refund_ref.is_some() || paid.refund_status == RefundStatus::Refunded {
            info!(intake_id = %intake_id, "Refund already completed; skipping gateway call");
            return Ok(RefundResult::new(
                true,
                RefundStatus::Refunded.as_str(),
                "Refund already processed",
            ));
        }
        if paid.refund_status == RefundStatus::NotEligible {
            return Ok(RefundResult::new(
                false,
                RefundStatus::NotEligible.as_str(),
                paid.refund_reason
                    .unwrap_or_else(|| "Not eligible for automatic refund".to_string()),
            ));
        }
        if paid.refund_status == RefundStatus::Processing {
            return Err(ServiceError::Conflict(
                "A refund for this request is already in progress".to_string(),
            ));
        }

        // 6. Cannot refund what was never captured through the gateway.
        let payment_ref = paid.gateway_payment_ref.clone().ok_or_else(|| {
            ServiceError::InvalidOperation(format!(
                "Payment for intake {} has no gateway reference",
                intake_id
            ))
        })?;

        // 7. Optimistic lock: move to processing only if the status is
        // still what we just read. Zero rows means a concurrent call won
        // the race; abort rather than double-calling the gateway.
        let locked = Payment::update_many()
            .set(payment::ActiveModel {
                refund_status: Set(RefundStatus::Processing),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(payment::Column::Id.eq(paid.id))
            .filter(payment::Column::RefundStatus.eq(paid.refund_status))
            .exec(&*self.db)
            .await?;
        if locked.rows_affected == 0 {
            info!(intake_id = %intake_id, "Lost refund lock to a concurrent call");
            return Err(ServiceError::Conflict(
                "A refund for this request is already in progress".to_string(),
            ));
        }

        // 8. The gateway call, exactly once per lock acquisition.
        let refund = self
            .gateway
            .create_refund(RefundRequest {
                payment_ref,
                reason: REFUND_REASON.to_string(),
                metadata: serde_json::json!({ "intake_id": intake_id }),
            })
            .await;

        match refund {
            Ok(refund) => {
                // 9. Record the completed refund on both rows.
                Payment::update_many()
                    .set(payment::ActiveModel {
                        status: Set(PaymentState::Refunded),
                        refund_status: Set(RefundStatus::Refunded),
                        refund_amount_cents: Set(Some(refund.amount)),
                        gateway_refund_ref: Set(Some(refund.id.clone())),
                        refund_reason: Set(Some(REFUND_REASON.to_string())),
                        updated_at: Set(Some(Utc::now())),
                        ..Default::default()
                    })
                    .filter(payment::Column::Id.eq(paid.id))
                    .exec(&*self.db)
                    .await?;
                self.repo
                    .set_payment_status(intake, PaymentStatus::Refunded)
                    .await?;

                counter!("intake_refunds_total", 1, "outcome" => "refunded");
                info!(
                    intake_id = %intake_id,
                    refund_ref = %refund.id,
                    amount_cents = refund.amount,
                    "Refund completed"
                );
                self.events
                    .send_logged(Event::RefundProcessed {
                        intake_id,
                        gateway_refund_ref: refund.id,
                        amount_cents: refund.amount,
                        actor_id,
                    })
                    .await;

                Ok(RefundResult::new(
                    true,
                    RefundStatus::Refunded.as_str(),
                    "Refund processed",
                ))
            }
            Err(e) => {
                // Leave a retryable, inspectable record of the failure.
                if let Err(update_err) = Payment::update_many()
                    .set(payment::ActiveModel {
                        refund_status: Set(RefundStatus::Failed),
                        refund_reason: Set(Some(e.detail.clone())),
                        updated_at: Set(Some(Utc::now())),
                        ..Default::default()
                    })
                    .filter(payment::Column::Id.eq(paid.id))
                    .filter(payment::Column::RefundStatus.eq(RefundStatus::Processing))
                    .exec(&*self.db)
                    .await
                {
                    error!(
                        intake_id = %intake_id,
                        error = %update_err,
                        "Failed to record refund failure"
                    );
                }

                counter!("intake_refunds_total", 1, "outcome" => "failed");
                warn!(intake_id = %intake_id, error = %e, "Gateway refund failed");
                self.events
                    .send_logged(Event::RefundFailed {
                        intake_id,
                        reason: e.to_string(),
                        actor_id,
                    })
                    .await;

                Ok(RefundResult::new(
                    false,
                    RefundStatus::Failed.as_str(),
                    "The refund could not be processed and will be retried",
                ))
            }
        }
    }

    /// Terminal sink: `not_eligible` is only ever reached from `none`.
    async fn persist_not_eligible(
        &self,
        intake_id: Uuid,
        reason: &str,
    ) -> Result<(), ServiceError> {
        Payment::update_many()
            .set(payment::ActiveModel {
                refund_status: Set(RefundStatus::NotEligible),
                refund_reason: Set(Some(reason.to_string())),
                updated_at: Set(Some(Utc::now())),
                ..Default::default()
            })
            .filter(payment::Column::IntakeId.eq(intake_id))
            .filter(payment::Column::Status.eq(PaymentState::Paid))
            .filter(payment::Column::RefundStatus.eq(RefundStatus::None))
            .exec(&*self.db)
            .await?;
        Ok(())
    }
}
