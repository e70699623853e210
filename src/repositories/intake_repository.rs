use std::sync::Arc;

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter, Set,
    SqlErr,
};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::entities::intake::{
    self, Entity as Intake, IntakeCategory, IntakeStatus, PaymentStatus,
};
use crate::entities::intake_answer::{self, Entity as IntakeAnswer};
use crate::entities::fraud_flag;
use crate::errors::ServiceError;
use crate::models::answers::AnswerPayload;
use crate::repositories::{BaseRepository, Repository};
use crate::services::fraud::FraudFlag;

/// Fields for a new intake row. The id is chosen by the caller so that a
/// rollback can name exactly what it created.
#[derive(Debug, Clone)]
pub struct NewIntake {
    pub id: Uuid,
    pub patient_id: Uuid,
    pub service_id: Uuid,
    pub category: IntakeCategory,
    pub subtype: String,
    pub amount_cents: i64,
    pub idempotency_key: String,
}

/// Distinguishes a fresh insert from an idempotent replay resolving to a
/// pre-existing intake.
#[derive(Debug, Clone)]
pub enum CreateOutcome {
    Created(intake::Model),
    Existing(intake::Model),
}

/// Persistence for intakes and their answer payloads. The two rows are a
/// single logical unit: no intake may ever exist without its answers.
#[derive(Debug)]
pub struct IntakeRepository {
    base: BaseRepository,
}

impl IntakeRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    fn db(&self) -> &DatabaseConnection {
        self.base.get_db()
    }

    /// Shared connection handle for callers composing their own reads.
    pub fn db_handle(&self) -> &DatabaseConnection {
        self.base.get_db()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<intake::Model>, ServiceError> {
        Ok(Intake::find_by_id(id).one(self.db()).await?)
    }

    pub async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<intake::Model>, ServiceError> {
        Ok(Intake::find()
            .filter(intake::Column::IdempotencyKey.eq(key))
            .one(self.db())
            .await?)
    }

    pub async fn find_answers(
        &self,
        intake_id: Uuid,
    ) -> Result<Option<intake_answer::Model>, ServiceError> {
        Ok(IntakeAnswer::find()
            .filter(intake_answer::Column::IntakeId.eq(intake_id))
            .one(self.db())
            .await?)
    }

    /// Inserts the intake and its answers as one logical unit.
    ///
    /// If the answers insert fails after the intake insert succeeded, the
    /// orphaned intake row is deleted before the error is returned. A
    /// uniqueness violation on the idempotency key resolves to the
    /// pre-existing intake so the caller can resume instead of failing.
    #[instrument(skip(self, fields, answers), fields(intake_id = %fields.id))]
    pub async fn create_intake_with_answers(
        &self,
        fields: NewIntake,
        answers: &AnswerPayload,
    ) -> Result<CreateOutcome, ServiceError> {
        let now = Utc::now();
        let intake_id = fields.id;
        let idempotency_key = fields.idempotency_key.clone();

        let intake_model = intake::ActiveModel {
            id: Set(intake_id),
            patient_id: Set(fields.patient_id),
            service_id: Set(fields.service_id),
            category: Set(fields.category),
            subtype: Set(fields.subtype),
            status: Set(IntakeStatus::PendingPayment),
            payment_status: Set(PaymentStatus::Pending),
            amount_cents: Set(fields.amount_cents),
            idempotency_key: Set(idempotency_key.clone()),
            payment_session_ref: Set(None),
            checkout_url: Set(None),
            checkout_error: Set(None),
            created_at: Set(now),
            updated_at: Set(Some(now)),
        };

        let inserted = match intake_model.insert(self.db()).await {
            Ok(model) => model,
            Err(e) if matches!(e.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) => {
                let existing = self
                    .find_by_idempotency_key(&idempotency_key)
                    .await?
                    .ok_or(ServiceError::DatabaseError(e))?;
                info!(
                    intake_id = %existing.id,
                    "Idempotency key replay resolved to existing intake"
                );
                return Ok(CreateOutcome::Existing(existing));
            }
            Err(e) => return Err(ServiceError::DatabaseError(e)),
        };

        let payload = serde_json::to_value(answers).map_err(|e| {
            ServiceError::ValidationError(format!("Unserializable answer payload: {}", e))
        });

        let answers_result = match payload {
            Ok(payload) => {
                let answers_model = intake_answer::ActiveModel {
                    id: Set(Uuid::new_v4()),
                    intake_id: Set(intake_id),
                    payload: Set(payload),
                    created_at: Set(now),
                };
                answers_model
                    .insert(self.db())
                    .await
                    .map_err(ServiceError::DatabaseError)
            }
            Err(e) => Err(e),
        };

        match answers_result {
            Ok(_) => Ok(CreateOutcome::Created(inserted)),
            Err(e) => {
                // The intake must not outlive a failed answers insert.
                error!(
                    intake_id = %intake_id,
                    error = %e,
                    "Answers insert failed; rolling back intake"
                );
                if let Err(del) = inserted.delete(self.db()).await {
                    error!(
                        intake_id = %intake_id,
                        error = %del,
                        "Rollback of orphaned intake failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Hard-deletes an intake and its answers. Only used when a submission
    /// failed before any gateway session existed: the record was never real.
    #[instrument(skip(self))]
    pub async fn delete_intake_with_answers(&self, intake_id: Uuid) -> Result<(), ServiceError> {
        IntakeAnswer::delete_many()
            .filter(intake_answer::Column::IntakeId.eq(intake_id))
            .exec(self.db())
            .await?;
        Intake::delete_many()
            .filter(intake::Column::Id.eq(intake_id))
            .exec(self.db())
            .await?;
        Ok(())
    }

    /// Records the gateway session on a pending intake.
    pub async fn set_checkout_session(
        &self,
        intake: intake::Model,
        session_ref: &str,
        checkout_url: &str,
    ) -> Result<intake::Model, ServiceError> {
        let mut active: intake::ActiveModel = intake.into();
        active.status = Set(IntakeStatus::PendingPayment);
        active.payment_session_ref = Set(Some(session_ref.to_string()));
        active.checkout_url = Set(Some(checkout_url.to_string()));
        active.checkout_error = Set(None);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(self.db()).await?)
    }

    /// Soft-transitions an intake to checkout_failed, preserving the row
    /// and its answers for support and manual retry.
    pub async fn mark_checkout_failed(
        &self,
        intake: intake::Model,
        error_message: &str,
    ) -> Result<intake::Model, ServiceError> {
        let mut active: intake::ActiveModel = intake.into();
        active.status = Set(IntakeStatus::CheckoutFailed);
        active.checkout_error = Set(Some(error_message.to_string()));
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(self.db()).await?)
    }

    /// Marks an intake declined. Terminal states are never reverted, so an
    /// already-terminal intake is returned unchanged.
    pub async fn mark_declined(&self, intake: intake::Model) -> Result<intake::Model, ServiceError> {
        if intake.status.is_terminal() {
            return Ok(intake);
        }
        let mut active: intake::ActiveModel = intake.into();
        active.status = Set(IntakeStatus::Declined);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(self.db()).await?)
    }

    pub async fn set_payment_status(
        &self,
        intake: intake::Model,
        payment_status: PaymentStatus,
    ) -> Result<intake::Model, ServiceError> {
        let mut active: intake::ActiveModel = intake.into();
        active.payment_status = Set(payment_status);
        active.updated_at = Set(Some(Utc::now()));
        Ok(active.update(self.db()).await?)
    }

    /// Append-only fraud flag persistence. Best-effort by contract: a
    /// failure is logged and never propagated to the submission flow.
    pub async fn record_fraud_flags(
        &self,
        intake_id: Uuid,
        patient_id: Uuid,
        flags: &[FraudFlag],
    ) {
        for flag in flags {
            let row = fraud_flag::ActiveModel {
                id: Set(Uuid::new_v4()),
                intake_id: Set(intake_id),
                patient_id: Set(patient_id),
                flag_kind: Set(flag.kind.as_str().to_string()),
                score: Set(flag.score as i32),
                detail: Set(Some(flag.detail.clone())),
                created_at: Set(Utc::now()),
            };
            if let Err(e) = row.insert(self.db()).await {
                warn!(
                    intake_id = %intake_id,
                    flag = flag.kind.as_str(),
                    error = %e,
                    "Failed to persist fraud flag"
                );
            }
        }
    }
}
