use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only fraud signal attached to an intake for manual review.
/// Never consulted on the payment path.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "fraud_flags")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub intake_id: Uuid,
    pub patient_id: Uuid,
    pub flag_kind: String,
    pub score: i32,
    #[sea_orm(nullable)]
    pub detail: Option<String>,
    pub created_at: DateTime<Utc>,
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
