//! Handlers for the spreadsheet import workflow.
//!
//! Session endpoints walk one uploaded file through mapping, validation,
//! resolution, configuration and commit. The stateless `/validate` and
//! `/execute` endpoints run the same engine on rows supplied in the body.

use std::collections::BTreeMap;
use std::future::Future;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use salesdesk_core::catalog::CatalogSnapshot;
use salesdesk_core::commit::{commit, CommitReport, ImportOptions};
use salesdesk_core::error::CoreError;
use salesdesk_core::mapping::{apply_mapping, ColumnMapping};
use salesdesk_core::parser::{parse_csv, parse_csv_with_delimiter, RawRow};
use salesdesk_core::resolution::{Directive, Resolution};
use salesdesk_core::schema::{ReferenceKind, TargetSchema};
use salesdesk_core::session::{ImportSession, SessionState, SessionSummary};
use salesdesk_core::validator::{validate, ValidationReport};

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

type SessionResponse = AppResult<Json<DataResponse<SessionSummary>>>;

// ── Schemas & catalogs ───────────────────────────────────────────────

/// GET /api/v1/import/schemas/{target}
///
/// Ordered field descriptors for `leads` or `sales`.
pub async fn get_schema(
    Path(target): Path<String>,
) -> AppResult<Json<DataResponse<&'static TargetSchema>>> {
    let schema = TargetSchema::from_target(&target)?;
    Ok(Json(DataResponse { data: schema }))
}

#[derive(Debug, Serialize)]
pub struct CatalogListing {
    pub kind: ReferenceKind,
    pub keys: Vec<String>,
}

/// GET /api/v1/import/catalog/{kind}
///
/// Every natural key of one catalog, used to offer `map_to` targets.
pub async fn list_catalog(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> AppResult<Json<DataResponse<CatalogListing>>> {
    let kind = ReferenceKind::from_str(&kind).ok_or_else(|| {
        AppError::BadRequest(format!(
            "Unknown catalog '{kind}'. Must be one of: closer, program, payment_method"
        ))
    })?;
    let keys = state.catalog.list(kind).await.map_err(CoreError::from)?;
    Ok(Json(DataResponse {
        data: CatalogListing { kind, keys },
    }))
}

// ── Sessions ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CreateSessionRequest {
    /// `leads` or `sales`.
    pub target: String,
    /// Raw file contents.
    pub csv_data: String,
    /// Single-character delimiter. Sniffed when absent.
    pub delimiter: Option<String>,
}

fn single_byte_delimiter(raw: &str) -> Result<u8, AppError> {
    match raw.as_bytes() {
        [byte] if byte.is_ascii() => Ok(*byte),
        _ => Err(AppError::BadRequest(format!(
            "Delimiter must be a single ASCII character, got '{raw}'"
        ))),
    }
}

/// POST /api/v1/import/sessions
///
/// Parse an uploaded file, suggest a column mapping and open a session.
pub async fn create_session(
    State(state): State<AppState>,
    Json(input): Json<CreateSessionRequest>,
) -> AppResult<(StatusCode, Json<DataResponse<SessionSummary>>)> {
    let schema = TargetSchema::from_target(&input.target)?;
    let bytes = input.csv_data.as_bytes();
    let parsed = match input.delimiter.as_deref() {
        Some(d) => parse_csv_with_delimiter(bytes, single_byte_delimiter(d)?),
        None => parse_csv(bytes),
    }
    .map_err(CoreError::from)?;

    let session = ImportSession::new(schema.entity_kind, parsed);
    let summary = session.summary();
    state.sessions.insert(session).await;

    tracing::info!(
        session_id = %summary.id,
        target = %summary.target,
        rows = summary.row_count,
        mapped_fields = summary.mapping.len(),
        "Import session created"
    );

    Ok((StatusCode::CREATED, Json(DataResponse { data: summary })))
}

/// GET /api/v1/import/sessions/{id}
pub async fn get_session(State(state): State<AppState>, Path(id): Path<Uuid>) -> SessionResponse {
    let entry = state.sessions.get(id).await?;
    let summary = entry.session.lock().await.summary();
    Ok(Json(DataResponse { data: summary }))
}

/// PUT /api/v1/import/sessions/{id}/mapping
///
/// Replace the column mapping. The previous validation is discarded.
pub async fn update_mapping(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(mapping): Json<ColumnMapping>,
) -> SessionResponse {
    let entry = state.sessions.get(id).await?;
    let mut session = entry.session.lock().await;
    session.set_mapping(mapping)?;
    Ok(Json(DataResponse {
        data: session.summary(),
    }))
}

/// POST /api/v1/import/sessions/{id}/validate
///
/// Validate the mapped rows against a fresh catalog snapshot.
pub async fn validate_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> SessionResponse {
    let entry = state.sessions.get(id).await?;
    let mut session = entry.session.lock().await;

    let schema = session.schema();
    let snapshot = CatalogSnapshot::load(state.catalog.as_ref(), &schema.reference_kinds())
        .await
        .map_err(CoreError::from)?;
    let report = validate(&session.mapped_rows(), schema, &snapshot);

    tracing::info!(
        session_id = %id,
        clean = report.is_clean(),
        missing_fields = report.missing_required.len(),
        unresolved_fields = report.unresolved.len(),
        "Import session validated"
    );

    session.record_validation(report)?;
    Ok(Json(DataResponse {
        data: session.summary(),
    }))
}

/// PUT /api/v1/import/sessions/{id}/resolutions
///
/// Merge directives and defaults into the session. Body:
/// `{ "field_resolutions": { field: { value: { "action": ..., "target": ... } } }, "defaults": { field: value } }`.
pub async fn update_resolutions(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(batch): Json<Resolution>,
) -> SessionResponse {
    let entry = state.sessions.get(id).await?;
    let mut session = entry.session.lock().await;
    session.apply_resolution(batch)?;
    Ok(Json(DataResponse {
        data: session.summary(),
    }))
}

/// PUT /api/v1/import/sessions/{id}/options
///
/// Choose commit options. Fails with 422 and the open issues unless
/// every blocking issue is addressed or `skip_errors` is set.
pub async fn update_options(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(options): Json<ImportOptions>,
) -> SessionResponse {
    let entry = state.sessions.get(id).await?;
    let mut session = entry.session.lock().await;
    session.configure(options)?;
    Ok(Json(DataResponse {
        data: session.summary(),
    }))
}

/// Run a commit on its own task so that dropping the request never stops
/// it between writes. Once `limit` passes, `cancel` is triggered and the
/// task is still awaited, so the caller gets the report of a commit that
/// actually ended.
async fn run_commit<T, F>(job: F, cancel: &CancellationToken, limit: Duration) -> AppResult<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    let mut task = tokio::spawn(job);
    let joined = match tokio::time::timeout(limit, &mut task).await {
        Ok(joined) => joined,
        Err(_) => {
            tracing::warn!(limit_secs = limit.as_secs(), "Commit time limit reached, cancelling");
            cancel.cancel();
            task.await
        }
    };
    joined.map_err(|e| AppError::InternalError(format!("Commit task failed: {e}")))
}

fn commit_limit(state: &AppState) -> Duration {
    Duration::from_secs(state.config.commit_timeout_secs)
}

/// POST /api/v1/import/sessions/{id}/commit
///
/// Run the commit (or dry run) with the configured options. The session
/// lock is held until the commit finishes.
pub async fn commit_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<DataResponse<CommitReport>>> {
    let entry = state.sessions.get(id).await?;
    let mut session = entry.session.clone().lock_owned().await;
    session.ensure_committable()?;

    let running = entry.begin_commit();
    let catalog = state.catalog.clone();
    let store = state.store.clone();
    let cancel = entry.cancel.clone();
    let job = async move {
        let _running = running;
        let rows = session.mapped_rows();
        let report = commit(
            &rows,
            session.schema(),
            &session.resolution,
            session.options,
            catalog.as_ref(),
            store.as_ref(),
            &cancel,
        )
        .await?;
        session.record_commit(report.clone())?;
        Ok::<_, CoreError>(report)
    };
    let report = run_commit(job, &entry.cancel, commit_limit(&state)).await??;

    tracing::info!(
        session_id = %id,
        status = report.status.as_str(),
        dry_run = report.dry_run,
        success = report.success,
        errors = report.errors.len(),
        "Import session commit finished"
    );

    Ok(Json(DataResponse { data: report }))
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub id: Uuid,
    /// A commit was running; it stops at the next check of its token.
    pub in_flight: bool,
    /// Session state after cancelling, when it could be read.
    pub state: Option<SessionState>,
}

/// POST /api/v1/import/sessions/{id}/cancel
///
/// Cancel the session. A running commit is signalled and the response is
/// `202`; the commit reports `cancelled` and moves the session there.
pub async fn cancel_session(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<(StatusCode, Json<DataResponse<CancelResult>>)> {
    let entry = state.sessions.get(id).await?;

    if entry.commit_running() {
        entry.cancel.cancel();
        tracing::info!(session_id = %id, "Cancellation requested for running commit");
        return Ok((
            StatusCode::ACCEPTED,
            Json(DataResponse {
                data: CancelResult {
                    id,
                    in_flight: true,
                    state: None,
                },
            }),
        ));
    }

    let mut session = entry.session.lock().await;
    session.cancel()?;
    entry.cancel.cancel();
    tracing::info!(session_id = %id, "Import session cancelled");

    Ok((
        StatusCode::OK,
        Json(DataResponse {
            data: CancelResult {
                id,
                in_flight: false,
                state: Some(session.state),
            },
        }),
    ))
}

// ── Stateless validate / execute ─────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ValidateRowsRequest {
    pub target: String,
    /// Column headers. Defaults to the keys of `rows` in first-seen order.
    pub headers: Option<Vec<String>>,
    pub rows: Vec<RawRow>,
    pub mapping: ColumnMapping,
}

#[derive(Debug, Deserialize)]
pub struct ExecuteRowsRequest {
    pub target: String,
    pub headers: Option<Vec<String>>,
    pub rows: Vec<RawRow>,
    pub mapping: ColumnMapping,
    #[serde(default)]
    pub options: ImportOptions,
    /// field -> raw value -> directive
    #[serde(default)]
    pub resolutions: BTreeMap<String, BTreeMap<String, Directive>>,
    #[serde(default)]
    pub defaults: BTreeMap<String, String>,
}

fn headers_of(headers: Option<Vec<String>>, rows: &[RawRow]) -> Vec<String> {
    headers.unwrap_or_else(|| {
        let mut seen: Vec<String> = Vec::new();
        for key in rows.iter().flat_map(|row| row.keys()) {
            if !seen.contains(key) {
                seen.push(key.clone());
            }
        }
        seen
    })
}

/// POST /api/v1/import/validate
///
/// Validate rows supplied in the body without opening a session.
pub async fn validate_rows(
    State(state): State<AppState>,
    Json(input): Json<ValidateRowsRequest>,
) -> AppResult<Json<DataResponse<ValidationReport>>> {
    let schema = TargetSchema::from_target(&input.target)?;
    let headers = headers_of(input.headers, &input.rows);
    input.mapping.validate_against(&headers, schema)?;

    let mapped = apply_mapping(&input.rows, &input.mapping, schema);
    let snapshot = CatalogSnapshot::load(state.catalog.as_ref(), &schema.reference_kinds())
        .await
        .map_err(CoreError::from)?;

    Ok(Json(DataResponse {
        data: validate(&mapped, schema, &snapshot),
    }))
}

/// POST /api/v1/import/execute
///
/// Commit rows supplied in the body without opening a session.
pub async fn execute_rows(
    State(state): State<AppState>,
    Json(input): Json<ExecuteRowsRequest>,
) -> AppResult<Json<DataResponse<CommitReport>>> {
    let schema = TargetSchema::from_target(&input.target)?;
    let headers = headers_of(input.headers, &input.rows);
    input.mapping.validate_against(&headers, schema)?;

    let mut resolution = Resolution {
        field_resolutions: input.resolutions,
        defaults: BTreeMap::new(),
    };
    for (field, value) in input.defaults {
        resolution.set_default(field, value);
    }

    let mapped = apply_mapping(&input.rows, &input.mapping, schema);
    let options = input.options;
    let catalog = state.catalog.clone();
    let store = state.store.clone();
    let cancel = state.shutdown.child_token();
    let job = {
        let cancel = cancel.clone();
        async move {
            commit(
                &mapped,
                schema,
                &resolution,
                options,
                catalog.as_ref(),
                store.as_ref(),
                &cancel,
            )
            .await
        }
    };
    let report = run_commit(job, &cancel, commit_limit(&state)).await??;

    tracing::info!(
        target = %schema.entity_kind,
        status = report.status.as_str(),
        dry_run = report.dry_run,
        success = report.success,
        errors = report.errors.len(),
        "Stateless import finished"
    );

    Ok(Json(DataResponse { data: report }))
}
