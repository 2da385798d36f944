//! partner_hub_postgres - PostgreSQL adapter for the partner program.
//!
//! [`PgProgramStore`] implements every port trait from `partner_hub_core`
//! over one `PgPool`. Decimals are stored as TEXT so nothing passes through
//! a binary float on the way to disk.

mod sqlx_types;
pub mod store;

pub use store::PgProgramStore;
