use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Minimal patient identity row. Full profile management lives in the
/// upstream identity provider; guests are keyed by normalized email.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "patients")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub email: String,
    pub is_guest: bool,
    #[sea_orm(nullable)]
    pub gateway_customer_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::intake::Entity")]
    Intakes,
}

impl Related<super::intake::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Intakes.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
