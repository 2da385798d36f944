//! POST /payouts                - settle approved lines into a batch
//! GET  /payouts/:id            - batch as stored
//! POST /payouts/:id/reconcile  - compare against the amount actually paid

use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Extension, Json};
use partner_hub_core::payout::{NewPayoutBatch, PayoutBatch};
use partner_hub_core::principal::Principal;
use partner_hub_core::service::{ProgramService, ReconcileRequest};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;

pub async fn create_batch(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(req): ApiJson<NewPayoutBatch>,
) -> Result<(StatusCode, Json<PayoutBatch>), AppError> {
    let batch = service.create_payout_batch(&principal, req).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

pub async fn get_batch(
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<PayoutBatch>, AppError> {
    Ok(Json(service.get_payout_batch(id).await?))
}

pub async fn reconcile(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<ReconcileRequest>,
) -> Result<Json<PayoutBatch>, AppError> {
    Ok(Json(service.reconcile_payout(&principal, id, req).await?))
}
