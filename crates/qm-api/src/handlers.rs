use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Form, Json};
use qm_domain::{Resource, ResourceId};
use qm_store::{ReleaseReason, Repository};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::Identity;
use crate::error::ApiError;
use crate::state::AppState;

// ── Health ────────────────────────────────────────────────────────────────

pub async fn health() -> StatusCode {
    StatusCode::OK
}

pub async fn ready(State(state): State<AppState>) -> Result<StatusCode, ApiError> {
    state.repo.list_pools().await?;
    Ok(StatusCode::OK)
}

// ── Reservation body shaping ─────────────────────────────────────────────

async fn devices_json(state: &AppState, resource_id: &ResourceId) -> Result<Vec<Value>, ApiError> {
    let devices = state.repo.list_devices_for_resource(resource_id).await?;
    let mut out = Vec::with_capacity(devices.len());
    for d in devices {
        let host = state
            .repo
            .get_host(&d.host_id)
            .await?
            .ok_or_else(|| ApiError::internal(format!("device '{}' references unknown host", d.id)))?;

        let mut obj = d.config.clone();
        if let Some(map) = obj.as_object_mut() {
            map.insert("driver".to_string(), json!(d.driver));
            map.insert("name".to_string(), json!(d.name));
            map.insert("host_address".to_string(), json!(host.address));
        }
        out.push(obj);
    }
    Ok(out)
}

async fn reservation_json(state: &AppState, resource: &Resource) -> Result<Value, ApiError> {
    let devices = devices_json(state, &resource.id).await?;
    Ok(json!({
        "user": resource.user,
        "used_for": resource.used_for,
        "use_password": resource.use_password,
        "devices": devices,
        "reservation_url": reservation_url(state, &resource.id),
    }))
}

fn reservation_url(state: &AppState, id: &ResourceId) -> String {
    format!("{}/api/reservation/{}", state.server_base_url, id)
}

fn resource_url(state: &AppState, id: &ResourceId) -> String {
    format!("{}/api/resource/{}", state.server_base_url, id)
}

async fn load_resource(state: &AppState, resource_pk: &str) -> Result<Resource, ApiError> {
    state
        .repo
        .get_resource(&ResourceId::new(resource_pk))
        .await?
        .ok_or_else(|| ApiError::not_found(format!("resource '{resource_pk}' not found")))
}

fn forbidden_other_user(owner: &str) -> ApiError {
    ApiError::forbidden(format!("the resource in use by another user, {owner}"))
}

// ── /api/reservation/:resource_pk ────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
pub struct ReservationBody {
    pub used_for: Option<String>,
}

pub async fn post_reservation(
    State(state): State<AppState>,
    Extension(Identity(user)): Extension<Identity>,
    Path(resource_pk): Path<String>,
    Form(body): Form<ReservationBody>,
) -> Result<Response, ApiError> {
    let resource = load_resource(&state, &resource_pk).await?;

    if let Some(owner) = &resource.user {
        if owner == &user {
            let body = reservation_json(&state, &resource).await?;
            return Ok(Json(body).into_response());
        }
        return Err(forbidden_other_user(owner));
    }

    let used_for = body.used_for.unwrap_or_else(|| "API User".to_string());
    let outcome = qm_allocator::make_reservation(state.repo.as_ref(), state.drivers.as_ref(), &resource.id, &user, &used_for)
        .await?;
    let body = reservation_json(&state, &outcome.resource).await?;
    Ok((StatusCode::CREATED, Json(body)).into_response())
}

pub async fn get_reservation(
    State(state): State<AppState>,
    Extension(Identity(user)): Extension<Identity>,
    Path(resource_pk): Path<String>,
) -> Result<Response, ApiError> {
    let resource = load_resource(&state, &resource_pk).await?;
    match &resource.user {
        None => Err(ApiError::not_found("resource is not reserved")),
        Some(owner) if owner == &user => {
            let body = reservation_json(&state, &resource).await?;
            Ok(Json(body).into_response())
        }
        Some(owner) => Err(forbidden_other_user(owner)),
    }
}

pub async fn head_reservation(
    State(state): State<AppState>,
    Extension(Identity(user)): Extension<Identity>,
    Path(resource_pk): Path<String>,
) -> Result<StatusCode, ApiError> {
    let resource = load_resource(&state, &resource_pk).await?;
    match &resource.user {
        Some(owner) if owner == &user => Ok(StatusCode::OK),
        _ => Ok(StatusCode::NOT_FOUND),
    }
}

pub async fn delete_reservation(
    State(state): State<AppState>,
    Path(resource_pk): Path<String>,
) -> Result<StatusCode, ApiError> {
    let resource_id = ResourceId::new(resource_pk);
    qm_allocator::release_reservation(state.repo.as_ref(), state.drivers.as_ref(), &resource_id, ReleaseReason::Explicit)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn refresh_reservation(
    State(state): State<AppState>,
    Path(resource_pk): Path<String>,
) -> Result<Response, ApiError> {
    let resource_id = ResourceId::new(resource_pk);
    let outcome = qm_allocator::refresh_reservation(state.repo.as_ref(), state.drivers.as_ref(), &resource_id).await?;
    let body = reservation_json(&state, &outcome.resource).await?;
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

// ── /api/resource/:resource_pk (read-only) ───────────────────────────────

pub async fn get_resource(
    State(state): State<AppState>,
    Path(resource_pk): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let resource = load_resource(&state, &resource_pk).await?;
    Ok(Json(json!({
        "used_for": resource.used_for,
        "last_reserved": resource.last_reserved,
        "last_check_in": resource.last_check_in,
        "name": resource.name,
        "resource_url": resource_url(&state, &resource.id),
    })))
}

// ── /teamcity/build_reservation/:build_id ────────────────────────────────

pub async fn delete_build_reservation(
    State(state): State<AppState>,
    Path(build_id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    let used_for = qm_ci::used_for(build_id);
    let resources = state.repo.list_all_resources().await?;
    let resource = resources
        .into_iter()
        .find(|r| r.used_for == used_for)
        .ok_or_else(|| ApiError::not_found(format!("no reservation found for build {build_id}")))?;

    qm_allocator::release_reservation(state.repo.as_ref(), state.drivers.as_ref(), &resource.id, ReleaseReason::CiBuildFinished)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn redirect_build_reservation(
    State(state): State<AppState>,
    Path(build_id): Path<i64>,
) -> Result<Response, ApiError> {
    let used_for = qm_ci::used_for(build_id);
    let resources = state.repo.list_all_resources().await?;
    let resource = resources
        .into_iter()
        .find(|r| r.used_for == used_for)
        .ok_or_else(|| ApiError::not_found(format!("no reservation found for build {build_id}")))?;
    Ok(Redirect::temporary(&reservation_url(&state, &resource.id)).into_response())
}
