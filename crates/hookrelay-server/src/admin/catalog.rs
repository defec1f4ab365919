//! Catalog administration: accounts, apps, phone numbers, destinations and
//! mappings.
//!
//! Mapping and destination changes go through the resolver so cached
//! resolutions are invalidated before the response is sent.

use axum::{
    Json,
    extract::{
        Path, State,
        rejection::{JsonRejection, PathRejection},
    },
    http::StatusCode,
};
use hookrelay_core::{
    App, BusinessAccount, Destination, Mapping, MappingView, NewApp, NewBusinessAccount,
    NewDestination, NewPhoneNumber, PhoneNumber, PhoneNumberSummary, UpsertMapping,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

type JsonBody<T> = Result<Json<T>, JsonRejection>;
type PathParams<T> = Result<Path<T>, PathRejection>;

pub async fn list_business_accounts(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<BusinessAccount>>> {
    Ok(Json(state.catalog().list_business_accounts().await?))
}

pub async fn create_business_account(
    State(state): State<AppState>,
    payload: JsonBody<NewBusinessAccount>,
) -> ApiResult<(StatusCode, Json<BusinessAccount>)> {
    let Json(account) = payload?;
    let created = state.catalog().create_business_account(account).await?;
    info!(business_id = %created.business_id, "Business account created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_apps(
    State(state): State<AppState>,
    Path(business_id): Path<String>,
) -> ApiResult<Json<Vec<App>>> {
    Ok(Json(state.catalog().list_apps(&business_id).await?))
}

pub async fn create_app(
    State(state): State<AppState>,
    payload: JsonBody<NewApp>,
) -> ApiResult<(StatusCode, Json<App>)> {
    let Json(app) = payload?;
    let created = state.catalog().create_app(app).await?;
    info!(app_id = %created.id, business_id = %created.business_id, "App created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_phone_numbers(
    State(state): State<AppState>,
    Path(app_id): Path<String>,
) -> ApiResult<Json<Vec<PhoneNumberSummary>>> {
    Ok(Json(state.catalog().list_phone_numbers(&app_id).await?))
}

pub async fn create_phone_number(
    State(state): State<AppState>,
    payload: JsonBody<NewPhoneNumber>,
) -> ApiResult<(StatusCode, Json<PhoneNumber>)> {
    let Json(phone_number) = payload?;
    let created = state.catalog().create_phone_number(phone_number).await?;
    info!(phone_number_id = %created.phone_number_id, app_id = %created.app_id, "Phone number created");
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn list_phone_number_destinations(
    State(state): State<AppState>,
    Path(phone_number_id): Path<String>,
) -> ApiResult<Json<Vec<MappingView>>> {
    Ok(Json(state.catalog().list_mappings(&phone_number_id).await?))
}

pub async fn list_destinations(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<Destination>>> {
    Ok(Json(state.catalog().list_destinations().await?))
}

pub async fn create_destination(
    State(state): State<AppState>,
    payload: JsonBody<NewDestination>,
) -> ApiResult<(StatusCode, Json<Destination>)> {
    let Json(destination) = payload?;
    let created = state.catalog().create_destination(destination).await?;
    info!(destination_id = created.id, name = %created.name, "Destination created");
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Deserialize)]
pub struct DestinationPatch {
    pub is_active: bool,
}

pub async fn update_destination(
    State(state): State<AppState>,
    path: PathParams<i64>,
    payload: JsonBody<DestinationPatch>,
) -> ApiResult<Json<Destination>> {
    let Path(id) = path?;
    let Json(patch) = payload?;
    let updated = state
        .resolver
        .set_destination_active(id, patch.is_active)
        .await?;
    Ok(Json(updated))
}

pub async fn upsert_mapping(
    State(state): State<AppState>,
    payload: JsonBody<UpsertMapping>,
) -> ApiResult<(StatusCode, Json<Mapping>)> {
    let Json(mapping) = payload?;
    let saved = state.resolver.upsert_mapping(mapping).await?;
    Ok((StatusCode::CREATED, Json(saved)))
}

#[derive(Debug, Serialize)]
pub struct MappingRemoved {
    pub message: &'static str,
    pub mapping: Mapping,
}

pub async fn delete_mapping(
    State(state): State<AppState>,
    path: PathParams<(String, i64)>,
) -> ApiResult<Json<MappingRemoved>> {
    let Path((phone_number_id, destination_id)) = path?;
    match state
        .resolver
        .deactivate_mapping(&phone_number_id, destination_id)
        .await?
    {
        Some(mapping) => Ok(Json(MappingRemoved {
            message: "Mapping removed successfully",
            mapping,
        })),
        None => Err(ApiError::not_found("Mapping not found")),
    }
}
