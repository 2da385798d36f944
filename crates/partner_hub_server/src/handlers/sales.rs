//! Sale and commission handlers.
//!
//! POST /sales                        - log a sale and price its commission
//! GET  /sales/:id                    - transaction with its commission lines
//! POST /sales/:id/approve            - approve every pending line
//! POST /sales/:id/reject             - reject with a reason
//! POST /sales/:id/credit-split       - replace lines with a new split
//! POST /commissions/bulk-approve     - approve many, skipping settled ones

use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Extension, Json};
use partner_hub_core::commission::CreditShare;
use partner_hub_core::principal::Principal;
use partner_hub_core::sale::{NewSale, SaleRecord};
use partner_hub_core::service::{BulkApproveResult, ProgramService, SaleReceipt};
use partner_hub_core::workflow::RejectCommand;
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;

#[derive(Debug, Deserialize)]
pub struct CreditSplitRequest {
    pub assignments: Vec<CreditShare>,
}

#[derive(Debug, Deserialize)]
pub struct BulkApproveRequest {
    pub transaction_ids: Vec<Uuid>,
}

pub async fn log_sale(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(sale): ApiJson<NewSale>,
) -> Result<(StatusCode, Json<SaleReceipt>), AppError> {
    let receipt = service.log_sale(&principal, sale).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}

pub async fn get_sale(
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SaleRecord>, AppError> {
    Ok(Json(service.get_sale(id).await?))
}

pub async fn approve(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SaleRecord>, AppError> {
    Ok(Json(service.approve_commission(&principal, id).await?))
}

pub async fn reject(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<RejectCommand>,
) -> Result<Json<SaleRecord>, AppError> {
    Ok(Json(service.reject_commission(&principal, id, cmd).await?))
}

pub async fn credit_split(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<CreditSplitRequest>,
) -> Result<Json<SaleRecord>, AppError> {
    Ok(Json(
        service
            .split_credit(&principal, id, req.assignments)
            .await?,
    ))
}

pub async fn bulk_approve(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(req): ApiJson<BulkApproveRequest>,
) -> Result<Json<BulkApproveResult>, AppError> {
    Ok(Json(
        service
            .bulk_approve_commissions(&principal, req.transaction_ids)
            .await?,
    ))
}
