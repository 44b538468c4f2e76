use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use uuid::Uuid;

use crate::application::contacts::{ContactMutation, ListContactsQuery};
use crate::application::pagination::{MAX_PAGE_SIZE, PaginationMode, SortField, SortOrder};
use crate::domain::contacts::{ContactPatch, NewContact};

use super::error::ApiError;
use super::state::AppState;

pub const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
pub const IDEMPOTENT_REPLAY_HEADER: &str = "idempotent-replayed";

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactListParams {
    pub q: Option<String>,
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<SortField>,
    pub order: Option<SortOrder>,
    pub pagination: Option<PaginationMode>,
    pub cursor: Option<String>,
}

impl ContactListParams {
    fn into_query(self) -> Result<ListContactsQuery, ApiError> {
        let defaults = ListContactsQuery::default();

        let page = self.page.unwrap_or(defaults.page);
        if page == 0 {
            return Err(ApiError::bad_request(
                "Invalid page",
                Some("page must be at least 1".to_string()),
            ));
        }

        let page_size = self.page_size.unwrap_or(defaults.page_size);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ApiError::bad_request(
                "Invalid page size",
                Some(format!("pageSize must be between 1 and {MAX_PAGE_SIZE}")),
            ));
        }

        Ok(ListContactsQuery {
            q: self.q,
            page,
            page_size,
            sort: self.sort.unwrap_or(defaults.sort),
            order: self.order.unwrap_or(defaults.order),
            pagination: self.pagination.unwrap_or(defaults.pagination),
            cursor: self.cursor,
        }
        .normalized())
    }
}

#[derive(Debug, Deserialize)]
pub struct ContactCreateRequest {
    pub name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
pub struct ContactUpdateRequest {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

fn contact_id(path: Result<Path<Uuid>, PathRejection>) -> Result<Uuid, ApiError> {
    path.map(|Path(id)| id)
        .map_err(|rejection| ApiError::bad_request("Invalid contact id", Some(rejection.body_text())))
}

fn mutation_response(status: StatusCode, mutation: ContactMutation) -> Response {
    let mut response = (status, Json(mutation.contact)).into_response();
    if mutation.replayed {
        response
            .headers_mut()
            .insert(IDEMPOTENT_REPLAY_HEADER, HeaderValue::from_static("true"));
    }
    response
}

pub async fn list_contacts(
    State(state): State<AppState>,
    params: Result<Query<ContactListParams>, QueryRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Query(params) = params.map_err(|rejection| {
        ApiError::bad_request("Invalid query parameters", Some(rejection.body_text()))
    })?;
    let query = params.into_query()?;

    let envelope = state.contacts.list(query).await?;
    Ok(Json(envelope))
}

pub async fn get_contact(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = contact_id(path)?;
    let contact = state.contacts.get(id).await?;
    Ok(Json(contact))
}

/// Replays also answer 201 so a retried create looks identical to the first.
pub async fn create_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<ContactCreateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(payload) = payload
        .map_err(|rejection| ApiError::bad_request("Invalid request body", Some(rejection.body_text())))?;
    let input = NewContact::parse(&payload.name, &payload.email, &payload.phone)?;

    let mutation = state
        .contacts
        .create(input, idempotency_key(&headers))
        .await?;
    Ok(mutation_response(StatusCode::CREATED, mutation))
}

pub async fn update_contact(
    State(state): State<AppState>,
    headers: HeaderMap,
    path: Result<Path<Uuid>, PathRejection>,
    payload: Result<Json<ContactUpdateRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let id = contact_id(path)?;
    let Json(payload) = payload
        .map_err(|rejection| ApiError::bad_request("Invalid request body", Some(rejection.body_text())))?;
    let patch = ContactPatch::parse(
        payload.name.as_deref(),
        payload.email.as_deref(),
        payload.phone.as_deref(),
    )?;

    let mutation = state
        .contacts
        .update(id, patch, idempotency_key(&headers))
        .await?;
    Ok(mutation_response(StatusCode::OK, mutation))
}

pub async fn delete_contact(
    State(state): State<AppState>,
    path: Result<Path<Uuid>, PathRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = contact_id(path)?;
    state.contacts.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
