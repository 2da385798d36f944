//! Assignment and milestone handlers.
//!
//! POST /assignments             - assign products and targets to a partner
//! GET  /assignments/:id         - aggregates plus milestone progress
//! PUT  /assignments/:id/status  - complete, expire or cancel
//! POST /milestones              - define a program milestone

use std::sync::Arc;

use axum::{extract::Path, http::StatusCode, Extension, Json};
use partner_hub_core::assignment::{AssignmentStatus, FulfillmentAssignment, NewAssignment};
use partner_hub_core::milestone::{Milestone, NewMilestone};
use partner_hub_core::principal::Principal;
use partner_hub_core::service::{AssignmentView, ProgramService};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::ApiJson;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: AssignmentStatus,
}

pub async fn create_assignment(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(input): ApiJson<NewAssignment>,
) -> Result<(StatusCode, Json<FulfillmentAssignment>), AppError> {
    let assignment = service.create_assignment(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

pub async fn get_assignment(
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignmentView>, AppError> {
    Ok(Json(service.get_assignment(id).await?))
}

pub async fn set_status(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    Path(id): Path<Uuid>,
    ApiJson(update): ApiJson<StatusUpdate>,
) -> Result<Json<FulfillmentAssignment>, AppError> {
    Ok(Json(
        service
            .set_assignment_status(&principal, id, update.status)
            .await?,
    ))
}

pub async fn create_milestone(
    Extension(principal): Extension<Principal>,
    Extension(service): Extension<Arc<dyn ProgramService>>,
    ApiJson(input): ApiJson<NewMilestone>,
) -> Result<(StatusCode, Json<Milestone>), AppError> {
    let milestone = service.create_milestone(&principal, input).await?;
    Ok((StatusCode::CREATED, Json(milestone)))
}
