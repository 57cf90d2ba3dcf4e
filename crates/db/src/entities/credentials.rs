//! `SeaORM` Entity for the credentials table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: Uuid,
    /// `bot` or `webhook`.
    pub kind: String,
    /// Bot token; present iff `kind = bot`.
    pub token: Option<String>,
    /// Webhook URL including its secret; present iff `kind = webhook`.
    pub url: Option<String>,
    pub enabled: bool,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::fragments::Entity")]
    Fragments,
}

impl Related<super::fragments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Fragments.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
