//! partner_hub_core - channel-partner program domain.
//!
//! Pure types and engines (approval workflow, commission and spiff
//! calculation, assignment/milestone progress, payouts), the store port
//! traits they run against, and an in-memory store. No database code lives
//! here; see `partner_hub_postgres` for the sqlx adapter.

pub mod assignment;
pub mod audit;
pub mod commission;
pub mod error;
pub mod memory;
pub mod milestone;
pub mod money;
pub mod partner;
pub mod payout;
pub mod ports;
pub mod principal;
pub mod sale;
pub mod service;
pub mod spiff;
pub mod tier_rates;
pub mod workflow;

pub use error::ProgramError;
pub use principal::{Principal, Role};
pub use service::{ProgramService, ProgramServiceImpl};
