//! `SeaORM` Entity for the files table.

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub mime_type: String,
    pub kind: String,
    pub size: i64,
    pub crc: Option<i64>,
    pub encryption: String,
    pub enc_key: Option<Vec<u8>>,
    pub enc_iv: Option<Vec<u8>>,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::fragments::Entity")]
    Fragments,
    #[sea_orm(has_many = "super::thumbnails::Entity")]
    Thumbnails,
}

impl Related<super::fragments::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Fragments.def()
    }
}

impl Related<super::thumbnails::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Thumbnails.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
