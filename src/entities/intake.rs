use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// One patient-submitted clinical request.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "intakes")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub patient_id: Uuid,
    pub service_id: Uuid,
    pub category: IntakeCategory,
    pub subtype: String,
    pub status: IntakeStatus,
    pub payment_status: PaymentStatus,
    pub amount_cents: i64,
    #[sea_orm(unique)]
    pub idempotency_key: String,
    #[sea_orm(nullable)]
    pub payment_session_ref: Option<String>,
    #[sea_orm(nullable)]
    pub checkout_url: Option<String>,
    #[sea_orm(nullable)]
    pub checkout_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_one = "super::intake_answer::Entity")]
    Answers,
    #[sea_orm(has_many = "super::fraud_flag::Entity")]
    FraudFlags,
    #[sea_orm(
        belongs_to = "super::patient::Entity",
        from = "Column::PatientId",
        to = "super::patient::Column::Id"
    )]
    Patient,
    #[sea_orm(
        belongs_to = "super::service_offering::Entity",
        from = "Column::ServiceId",
        to = "super::service_offering::Column::Id"
    )]
    Service,
}

impl Related<super::intake_answer::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Answers.def()
    }
}

impl Related<super::fraud_flag::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::FraudFlags.def()
    }
}

impl Related<super::patient::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Patient.def()
    }
}

impl Related<super::service_offering::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Service.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Clinical request category.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumIter,
    DeriveActiveEnum,
    ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum IntakeCategory {
    #[sea_orm(string_value = "certificate")]
    Certificate,
    #[sea_orm(string_value = "prescription")]
    Prescription,
    #[sea_orm(string_value = "consult")]
    Consult,
}

impl IntakeCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntakeCategory::Certificate => "certificate",
            IntakeCategory::Prescription => "prescription",
            IntakeCategory::Consult => "consult",
        }
    }
}

impl std::fmt::Display for IntakeCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Review lifecycle of an intake. Terminal states are never reverted.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum IntakeStatus {
    #[sea_orm(string_value = "pending_payment")]
    PendingPayment,
    #[sea_orm(string_value = "approved")]
    Approved,
    #[sea_orm(string_value = "declined")]
    Declined,
    #[sea_orm(string_value = "checkout_failed")]
    CheckoutFailed,
}

impl IntakeStatus {
    /// Whether review has reached a final verdict for this intake.
    pub fn is_terminal(&self) -> bool {
        matches!(self, IntakeStatus::Approved | IntakeStatus::Declined)
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}
