use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Per-variant stock counters. Mutated only through the inventory ledger
/// operations so the movement log stays an accurate audit trail.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "inventory_levels")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub variant_id: Uuid,
    /// On-hand quantity. Never negative.
    pub stock_quantity: i32,
    /// Portion of stock earmarked for unsettled orders. Never negative.
    pub reserved_quantity: i32,
    /// Reorder threshold; drives the derived low-stock status.
    pub safety_stock: i32,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::stock_movement::Entity")]
    Movements,
}

impl Related<super::stock_movement::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Movements.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Derived stock status for level queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum StockStatus {
    Out,
    Low,
    Normal,
}

impl Model {
    pub fn available(&self) -> i32 {
        self.stock_quantity - self.reserved_quantity
    }

    pub fn status(&self) -> StockStatus {
        if self.stock_quantity == 0 {
            StockStatus::Out
        } else if self.stock_quantity <= self.safety_stock {
            StockStatus::Low
        } else {
            StockStatus::Normal
        }
    }
}
