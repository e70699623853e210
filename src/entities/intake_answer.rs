use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The answer payload belonging to exactly one intake. Inserted atomically
/// with its intake and deleted only as part of an intake rollback.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "intake_answers")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub intake_id: Uuid,
    #[sea_orm(column_type = "Json")]
    pub payload: Json,
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
