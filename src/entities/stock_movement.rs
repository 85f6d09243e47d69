use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Append-only audit record for every stock mutation. Never updated or
/// deleted after insert.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stock_movements")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub variant_id: Uuid,
    pub action: String,
    /// Signed change applied to the affected counter.
    pub delta: i32,
    pub previous_quantity: i32,
    pub new_quantity: i32,
    pub reason: String,
    pub actor_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::inventory_level::Entity",
        from = "Column::VariantId",
        to = "super::inventory_level::Column::VariantId"
    )]
    Level,
}

impl Related<super::inventory_level::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Level.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Kinds of ledger entries.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display, strum::EnumString,
)]
pub enum MovementAction {
    #[strum(serialize = "RESERVE")]
    #[serde(rename = "RESERVE")]
    Reserve,
    #[strum(serialize = "STOCK_COMMITTED")]
    #[serde(rename = "STOCK_COMMITTED")]
    StockCommitted,
    #[strum(serialize = "STOCK_UNRESERVE")]
    #[serde(rename = "STOCK_UNRESERVE")]
    StockUnreserve,
    #[strum(serialize = "STOCK_ADD")]
    #[serde(rename = "STOCK_ADD")]
    StockAdd,
    #[strum(serialize = "STOCK_REMOVE")]
    #[serde(rename = "STOCK_REMOVE")]
    StockRemove,
    #[strum(serialize = "STOCK_SET")]
    #[serde(rename = "STOCK_SET")]
    StockSet,
}
