//! partner_hub_server - REST surface for the partner program.
//!
//! The router is a library so integration tests can drive it with
//! `tower::ServiceExt::oneshot` without binding a socket.

pub mod config;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod middleware;
pub mod router;
