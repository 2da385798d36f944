pub mod catalog;
pub mod fulfillment;
pub mod health;
pub mod partners;
pub mod payouts;
pub mod sales;
