//! Router construction for the partner hub server.

use std::sync::Arc;

use axum::{
    middleware as axum_mw,
    routing::{get, post, put},
    Extension, Router,
};
use partner_hub_core::service::ProgramService;
use tower_http::trace::TraceLayer;

use crate::handlers;
use crate::middleware::jwt::{jwt_auth, JwtConfig};

/// Build the full axum router with all routes and middleware.
pub fn build_router(service: Arc<dyn ProgramService>, jwt_config: JwtConfig) -> Router {
    // Routes that require JWT authentication
    let protected = Router::new()
        // Partner onboarding
        .route("/partners", post(handlers::partners::create))
        .route("/partners/:id", get(handlers::partners::get))
        .route(
            "/partners/:id/l1-approve",
            post(handlers::partners::l1_approve),
        )
        .route("/partners/:id/l1-reject", post(handlers::partners::l1_reject))
        .route(
            "/partners/:id/l2-approve",
            post(handlers::partners::l2_approve),
        )
        .route("/partners/:id/l2-reject", post(handlers::partners::l2_reject))
        .route("/partners/:id/hold", post(handlers::partners::hold))
        .route("/partners/:id/resume", post(handlers::partners::resume))
        .route("/partners/:id/resubmit", post(handlers::partners::resubmit))
        .route(
            "/partners/:id/reject",
            post(handlers::partners::reject_permanently),
        )
        .route(
            "/partners/:id/deactivate",
            post(handlers::partners::deactivate),
        )
        .route(
            "/partners/:id/products",
            post(handlers::partners::assign_products),
        )
        // Catalogue
        .route("/products", post(handlers::catalog::create_product))
        .route("/spiffs", post(handlers::catalog::create_spiff))
        .route("/spiffs/:id", get(handlers::catalog::get_spiff))
        // Fulfillment
        .route(
            "/assignments",
            post(handlers::fulfillment::create_assignment),
        )
        .route(
            "/assignments/:id",
            get(handlers::fulfillment::get_assignment),
        )
        .route(
            "/assignments/:id/status",
            put(handlers::fulfillment::set_status),
        )
        .route("/milestones", post(handlers::fulfillment::create_milestone))
        // Sales and commissions
        .route("/sales", post(handlers::sales::log_sale))
        .route("/sales/:id", get(handlers::sales::get_sale))
        .route("/sales/:id/approve", post(handlers::sales::approve))
        .route("/sales/:id/reject", post(handlers::sales::reject))
        .route(
            "/sales/:id/credit-split",
            post(handlers::sales::credit_split),
        )
        .route(
            "/commissions/bulk-approve",
            post(handlers::sales::bulk_approve),
        )
        // Payouts
        .route("/payouts", post(handlers::payouts::create_batch))
        .route("/payouts/:id", get(handlers::payouts::get_batch))
        .route(
            "/payouts/:id/reconcile",
            post(handlers::payouts::reconcile),
        )
        .layer(axum_mw::from_fn(jwt_auth))
        .layer(Extension(jwt_config));

    // Public routes (no auth)
    let public = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/partners/register", post(handlers::partners::register));

    public
        .merge(protected)
        .layer(Extension(service))
        .layer(TraceLayer::new_for_http())
}
