use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Captured payment for an intake, created once a gateway checkout session
/// completes. Carries the refund state machine for the decline path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "payments")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub intake_id: Uuid,
    #[sea_orm(nullable)]
    pub gateway_payment_ref: Option<String>,
    pub status: PaymentState,
    pub amount_cents: i64,
    pub refund_status: RefundStatus,
    #[sea_orm(nullable)]
    pub refund_amount_cents: Option<i64>,
    #[sea_orm(nullable)]
    pub gateway_refund_ref: Option<String>,
    #[sea_orm(nullable)]
    pub refund_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::intake::Entity",
        from = "Column::IntakeId",
        to = "super::intake::Column::Id"
    )]
    Intake,
}

impl Related<super::intake::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Intake.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

/// Refund state machine.
///
/// Legal transitions: `none -> processing -> {refunded | failed}`,
/// `failed -> processing` (retry), `none -> not_eligible` (terminal sink).
/// Entry into `processing` goes through a conditional update guarded by the
/// previously-read value, so two concurrent refund calls cannot both reach
/// the gateway.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum, ToSchema,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
pub enum RefundStatus {
    #[sea_orm(string_value = "none")]
    None,
    #[sea_orm(string_value = "not_eligible")]
    NotEligible,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "refunded")]
    Refunded,
    #[sea_orm(string_value = "failed")]
    Failed,
}

impl RefundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RefundStatus::None => "none",
            RefundStatus::NotEligible => "not_eligible",
            RefundStatus::Processing => "processing",
            RefundStatus::Refunded => "refunded",
            RefundStatus::Failed => "failed",
        }
    }
}
