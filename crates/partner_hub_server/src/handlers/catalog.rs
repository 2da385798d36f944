//! Product and spiff handlers.
//!
//! POST /products     - product with base and tier rates
//! POST /spiffs       - time-boxed incentive
//! GET  /spiffs/:id   - spiff with its status as of now

use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Extension, Json};
use partner_hub_core::principal::Principal;
use partner_hub_core::service::{ProgramService, SpiffView};
use partner_hub_core::spiff::NewSpiff;
use partner_hub_core::tier_rates::{NewProduct, Product};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;

pub async fn create_product(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(input): ApiJson<NewProduct>,
) -> Result<(StatusCode, Json<Product>), AppError> {
    let product = service.create_product(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(product)))
}

pub async fn create_spiff(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(input): ApiJson<NewSpiff>,
) -> Result<(StatusCode, Json<SpiffView>), AppError> {
    let spiff = service.create_spiff(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(spiff)))
}

pub async fn get_spiff(
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SpiffView>, AppError> {
    Ok(Json(service.get_spiff(id).await?))
}
