//! HTTP control API over the job store.
//!
//! Create, inspect, and delete jobs under `/api/v1/job/`. Validation
//! failures come back as 422 with a field → message object; every other
//! error uses a `{"error": …}` body. Internal details are logged, never
//! returned.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::store::{Job, JobId, JobStore, NewJob, StoreError};

/// Shared state for HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn JobStore>,
}

/// Create the HTTP router. Routes are exact with a trailing slash.
pub fn create_router(state: HttpState) -> Router {
    Router::new()
        .route("/api/v1/job/", post(create_job))
        .route("/api/v1/job/:key/", get(get_job).delete(delete_job))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}

async fn log_request(request: Request, next: Next) -> Response {
    info!(method = %request.method(), path = %request.uri().path(), "request");
    next.run(request).await
}

/// Create job request. Unknown fields are rejected; absent fields fall to
/// their defaults and fail validation instead of deserialisation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields, default)]
pub struct CreateJobRequest {
    pub name: String,
    pub crontab_string: String,
    pub command: String,
    pub arguments: Vec<String>,
    /// Whole seconds; must be positive.
    pub timeout: u64,
}

#[derive(Serialize)]
pub struct CreateJobResponse {
    pub id: i64,
}

/// Job representation on the wire; `timeout` is whole seconds.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobBody {
    pub id: i64,
    pub name: String,
    pub crontab_string: String,
    pub command: String,
    pub arguments: Vec<String>,
    pub timeout: u64,
}

impl From<Job> for JobBody {
    fn from(job: Job) -> Self {
        Self {
            id: job.id.0,
            name: job.name,
            crontab_string: job.crontab,
            command: job.command,
            arguments: job.arguments,
            timeout: job.timeout.as_secs(),
        }
    }
}

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    UnsupportedMediaType,
    Validation(BTreeMap<&'static str, String>),
    NotFound,
    Internal,
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => ApiError::NotFound,
            StoreError::DuplicateName(_) => {
                ApiError::Validation(field_error("name", "is already in use"))
            }
            StoreError::InvalidCrontab(cron_err) => {
                ApiError::Validation(field_error("crontabString", &cron_err.to_string()))
            }
            err @ (StoreError::Deadline | StoreError::Database(_) | StoreError::Migration(_)) => {
                error!(?err, "store error");
                ApiError::Internal
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(fields) => {
                (StatusCode::UNPROCESSABLE_ENTITY, Json(fields)).into_response()
            }
            ApiError::BadRequest(message) => error_body(StatusCode::BAD_REQUEST, &message),
            ApiError::UnsupportedMediaType => error_body(
                StatusCode::UNSUPPORTED_MEDIA_TYPE,
                "expected application/json content type",
            ),
            ApiError::NotFound => error_body(StatusCode::NOT_FOUND, "job not found"),
            ApiError::Internal => {
                error_body(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

fn error_body(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorBody { error: message })).into_response()
}

fn field_error(field: &'static str, message: &str) -> BTreeMap<&'static str, String> {
    let mut fields = BTreeMap::new();
    fields.insert(field, message.to_string());
    fields
}

async fn create_job(
    State(state): State<HttpState>,
    payload: Result<Json<CreateJobRequest>, JsonRejection>,
) -> Result<Json<CreateJobResponse>, ApiError> {
    let Json(request) = payload.map_err(|rejection| match rejection {
        JsonRejection::MissingJsonContentType(_) => ApiError::UnsupportedMediaType,
        other => ApiError::BadRequest(other.body_text()),
    })?;

    let new_job = validate_request(state.store.as_ref(), request).await?;
    let id = state.store.create(new_job).await?;
    Ok(Json(CreateJobResponse { id: id.0 }))
}

async fn validate_request(
    store: &dyn JobStore,
    request: CreateJobRequest,
) -> Result<NewJob, ApiError> {
    let mut errors = BTreeMap::new();

    if request.name.is_empty() {
        errors.insert("name", "must not be empty".to_string());
    } else {
        // Point lookup; the unique index still backstops races.
        match store.get_by_name(&request.name).await {
            Ok(_) => {
                errors.insert("name", "is already in use".to_string());
            }
            Err(StoreError::NotFound) => {}
            Err(err) => return Err(err.into()),
        }
    }

    if let Err(err) = crate::cron::validate(&request.crontab_string) {
        errors.insert("crontabString", err.to_string());
    }

    if request.command.is_empty() {
        errors.insert("command", "must not be empty".to_string());
    }

    if request.timeout == 0 {
        errors.insert("timeout", "must be positive".to_string());
    }

    if !errors.is_empty() {
        return Err(ApiError::Validation(errors));
    }

    Ok(NewJob {
        name: request.name,
        crontab: request.crontab_string,
        command: request.command,
        arguments: request.arguments,
        timeout: Duration::from_secs(request.timeout),
    })
}

/// Numeric keys look up by id; keys shaped like `[A-Za-z_]\w*` look up by
/// name; anything else is not a job.
async fn get_job(
    State(state): State<HttpState>,
    Path(key): Path<String>,
) -> Result<Json<JobBody>, ApiError> {
    let job = if is_numeric_id(&key) {
        let id = key.parse::<i64>().map_err(|_| ApiError::NotFound)?;
        state.store.get(JobId(id)).await?
    } else if is_valid_name(&key) {
        state.store.get_by_name(&key).await?
    } else {
        return Err(ApiError::NotFound);
    };
    Ok(Json(job.into()))
}

async fn delete_job(
    State(state): State<HttpState>,
    Path(key): Path<String>,
) -> Result<StatusCode, ApiError> {
    if !is_numeric_id(&key) {
        return Err(ApiError::NotFound);
    }
    let id = key.parse::<i64>().map_err(|_| ApiError::NotFound)?;
    state.store.delete(JobId(id)).await?;
    Ok(StatusCode::OK)
}

/// Matches the `[0-9]+` id segment exactly; bare `parse::<i64>` would also
/// accept a leading sign.
fn is_numeric_id(key: &str) -> bool {
    !key.is_empty() && key.bytes().all(|b| b.is_ascii_digit())
}

fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
