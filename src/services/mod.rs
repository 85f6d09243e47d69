pub mod coupons;
pub mod inventory;
pub mod orders;
pub mod payments;
pub mod returns;
