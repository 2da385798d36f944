//! Partner onboarding handlers.
//!
//! POST /partners/register            - public self-registration
//! POST /partners                     - manager creation
//! GET  /partners/:id                 - current partner record
//! POST /partners/:id/l1-approve      - L1 approve with tier
//! POST /partners/:id/l1-reject       - L1 reject with reason
//! POST /partners/:id/l2-approve      - L2 approve
//! POST /partners/:id/l2-reject       - L2 reject with reason
//! POST /partners/:id/hold            - put on hold with reason
//! POST /partners/:id/resume          - return from hold
//! POST /partners/:id/resubmit        - resubmit after rejection or hold
//! POST /partners/:id/reject          - reject permanently
//! POST /partners/:id/deactivate      - deactivate an approved partner
//! POST /partners/:id/products        - assign products with margins

use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Extension, Json};
use partner_hub_core::partner::Partner;
use partner_hub_core::principal::Principal;
use partner_hub_core::service::ProgramService;
use partner_hub_core::workflow::{
    HoldCommand, L1ApproveCommand, L2ApproveCommand, NewPartner, ProductOverride, RejectCommand,
    ResubmitCommand,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;

type Service = Extension<Arc<dyn ProgramService>>;

#[derive(Debug, Deserialize)]
pub struct AssignProductsRequest {
    pub products: Vec<ProductOverride>,
}

pub async fn register(
    Extension(service): Service,
    ApiJson(input): ApiJson<NewPartner>,
) -> Result<(StatusCode, Json<Partner>), AppError> {
    let partner = service.self_register(input).await?;
    Ok((StatusCode::CREATED, Json(partner)))
}

pub async fn create(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    ApiJson(input): ApiJson<NewPartner>,
) -> Result<(StatusCode, Json<Partner>), AppError> {
    let partner = service.create_partner(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(partner)))
}

pub async fn get(
    Extension(service): Service,
    Path(id): Path<Uuid>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.get_partner(id).await?))
}

pub async fn l1_approve(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<L1ApproveCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.approve_l1(&principal, id, cmd).await?))
}

pub async fn l1_reject(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<RejectCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.reject_l1(&principal, id, cmd).await?))
}

pub async fn l2_approve(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<L2ApproveCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.approve_l2(&principal, id, cmd).await?))
}

pub async fn l2_reject(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<RejectCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.reject_l2(&principal, id, cmd).await?))
}

pub async fn hold(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<HoldCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.put_on_hold(&principal, id, cmd).await?))
}

pub async fn resume(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.resume(&principal, id).await?))
}

pub async fn resubmit(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<ResubmitCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.resubmit(&principal, id, cmd).await?))
}

pub async fn reject_permanently(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<RejectCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.reject_permanently(&principal, id, cmd).await?))
}

pub async fn deactivate(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(cmd): ApiJson<RejectCommand>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(service.deactivate(&principal, id, cmd).await?))
}

pub async fn assign_products(
    Extension(principal): Extension<Principal>,
    Extension(service): Service,
    Path(id): Path<Uuid>,
    ApiJson(req): ApiJson<AssignProductsRequest>,
) -> Result<Json<Partner>, AppError> {
    Ok(Json(
        service
            .assign_products(&principal, id, req.products)
            .await?,
    ))
}
