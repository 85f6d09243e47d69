pub mod idempotency_key;
pub mod inventory_level;
pub mod order;
pub mod order_item;
pub mod payment;
pub mod product;
pub mod product_variant;
pub mod return_entity;
pub mod return_item;
pub mod stock_movement;
