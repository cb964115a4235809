use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    Json as RequestJson,
};
use parking_lot::Mutex as SyncMutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

use crate::error::{ApplyError, SessionError, StoreError};
use crate::logic::apply::{ApplyReport, ApplyState, CancelToken};
use crate::logic::engine::UpsertOutcome;
use crate::logic::filter::{filter_records, RecordFilter};
use crate::logic::preview::{self, PreviewRow, PreviewSummary};
use crate::logic::session::EditorSession;
use crate::model::{
    ChangeSet, GroupField, GroupingRecord, InstrumentId, ValidationReport,
};
use crate::store::traits::Model;

/// Shared server state: one editing session against one connected model
pub struct AppState<M> {
    pub session: Arc<Mutex<EditorSession>>,
    pub model: Arc<M>,
    /// Token of the apply currently running, reachable without the session lock
    active_cancel: SyncMutex<Option<CancelToken>>,
    apply_state: watch::Receiver<ApplyState>,
}

impl<M: Model> AppState<M> {
    pub fn new(session: EditorSession, model: Arc<M>) -> Self {
        let apply_state = session.coordinator().subscribe();
        Self {
            session: Arc::new(Mutex::new(session)),
            model,
            active_cancel: SyncMutex::new(None),
            apply_state,
        }
    }
}

type ApiError = (StatusCode, Json<ErrorResponse>);
type ApiResult<T> = Result<Json<T>, ApiError>;

/// Simple health check endpoint
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
    })
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    /// Set when the live model may be left in an unknown state
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub fatal: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorResponse {
    pub fn new(message: &str) -> Self {
        Self {
            error: message.to_string(),
            fatal: false,
            details: None,
        }
    }

    fn with_details<T: Serialize>(mut self, details: &T) -> Self {
        self.details = serde_json::to_value(details).ok();
        self
    }
}

fn store_error(err: StoreError) -> ApiError {
    let status = match err {
        StoreError::NotFound(_) => StatusCode::NOT_FOUND,
        StoreError::DuplicateKey(_) => StatusCode::CONFLICT,
    };
    (status, Json(ErrorResponse::new(&err.to_string())))
}

fn apply_error(err: ApplyError) -> ApiError {
    let message = err.to_string();
    match err {
        ApplyError::Validation(report) => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(ErrorResponse::new(&message).with_details(&report)),
        ),
        ApplyError::StaleChangeSet | ApplyError::Blocked(_) => {
            (StatusCode::CONFLICT, Json(ErrorResponse::new(&message)))
        }
        ApplyError::RolledBack { failure, .. } => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse::new(&message).with_details(&failure)),
        ),
        ApplyError::Cancelled { .. } => {
            (StatusCode::BAD_GATEWAY, Json(ErrorResponse::new(&message)))
        }
        ApplyError::Inconsistent(inconsistency) => {
            let mut body = ErrorResponse::new(&message).with_details(&inconsistency);
            body.fatal = true;
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body))
        }
    }
}

fn session_error(err: SessionError) -> ApiError {
    match err {
        SessionError::Store(e) => store_error(e),
        SessionError::Read(e) => (
            StatusCode::BAD_GATEWAY,
            Json(ErrorResponse::new(&e.to_string())),
        ),
        SessionError::Apply(e) => apply_error(e),
    }
}

#[derive(Debug, Serialize)]
pub struct ListResponse<T> {
    pub items: Vec<T>,
    pub total: usize,
}

pub async fn list_groupings<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    Query(filter): Query<RecordFilter>,
) -> ApiResult<ListResponse<GroupingRecord>> {
    let session = state.session.lock().await;
    let engine = session.engine();
    let change_set = engine.current_change_set();
    let items: Vec<GroupingRecord> = filter_records(engine.records(), &filter, &change_set)
        .into_iter()
        .cloned()
        .collect();
    Ok(Json(ListResponse {
        total: items.len(),
        items,
    }))
}

pub async fn get_grouping<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    Path(instrument_id): Path<InstrumentId>,
) -> ApiResult<GroupingRecord> {
    let session = state.session.lock().await;
    session
        .engine()
        .records()
        .get(&instrument_id)
        .cloned()
        .map(Json)
        .ok_or_else(|| store_error(StoreError::NotFound(instrument_id)))
}

pub async fn add_grouping<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    RequestJson(mut record): RequestJson<GroupingRecord>,
) -> Result<(StatusCode, Json<GroupingRecord>), ApiError> {
    // Metadata is owned by the model and only ever arrives through a reload
    record.metadata = None;

    let mut session = state.session.lock().await;
    session
        .engine_mut()
        .add(record.clone())
        .map_err(store_error)?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// Body of `PUT /groupings/:id`; the id comes from the path.
/// Only the grouping path is editable, so any other field is ignored.
#[derive(Debug, Deserialize)]
pub struct UpsertRequest {
    #[serde(default)]
    pub first_group: String,
    #[serde(default)]
    pub second_group: String,
    #[serde(default)]
    pub third_group: String,
}

#[derive(Debug, Serialize)]
pub struct UpsertResponse {
    pub outcome: UpsertOutcome,
    pub record: GroupingRecord,
}

pub async fn upsert_grouping<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    Path(instrument_id): Path<InstrumentId>,
    RequestJson(request): RequestJson<UpsertRequest>,
) -> ApiResult<UpsertResponse> {
    let record = GroupingRecord::new(
        instrument_id.clone(),
        request.first_group,
        request.second_group,
        request.third_group,
    );

    let mut session = state.session.lock().await;
    let engine = session.engine_mut();
    let outcome = engine.upsert(record).map_err(store_error)?;
    let record = engine
        .records()
        .get(&instrument_id)
        .cloned()
        .ok_or_else(|| store_error(StoreError::NotFound(instrument_id)))?;
    Ok(Json(UpsertResponse { outcome, record }))
}

#[derive(Debug, Deserialize)]
pub struct SetFieldRequest {
    pub field: GroupField,
    pub value: String,
}

#[derive(Debug, Serialize)]
pub struct SetFieldResponse {
    pub changed: bool,
    pub record: GroupingRecord,
}

pub async fn set_grouping_field<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    Path(instrument_id): Path<InstrumentId>,
    RequestJson(request): RequestJson<SetFieldRequest>,
) -> ApiResult<SetFieldResponse> {
    let mut session = state.session.lock().await;
    let engine = session.engine_mut();
    let changed = engine
        .set_field(&instrument_id, request.field, request.value)
        .map_err(store_error)?;
    let record = engine
        .records()
        .get(&instrument_id)
        .cloned()
        .ok_or_else(|| store_error(StoreError::NotFound(instrument_id)))?;
    Ok(Json(SetFieldResponse { changed, record }))
}

pub async fn remove_grouping<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    Path(instrument_id): Path<InstrumentId>,
) -> ApiResult<GroupingRecord> {
    let mut session = state.session.lock().await;
    let removed = session
        .engine_mut()
        .remove(&instrument_id)
        .map_err(store_error)?;
    Ok(Json(removed))
}

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub instrument_ids: Vec<InstrumentId>,
    #[serde(default)]
    pub first_group: String,
    #[serde(default)]
    pub second_group: String,
    #[serde(default)]
    pub third_group: String,
}

#[derive(Debug, Serialize)]
pub struct AssignResponse {
    /// Field updates recorded as one undoable action
    pub updated_fields: usize,
}

pub async fn assign_path<M: Model>(
    State(state): State<Arc<AppState<M>>>,
    RequestJson(request): RequestJson<AssignRequest>,
) -> ApiResult<AssignResponse> {
    let path = [
        request.first_group.as_str(),
        request.second_group.as_str(),
        request.third_group.as_str(),
    ];
    let mut session = state.session.lock().await;
    let updated_fields = session
        .engine_mut()
        .assign_path(&request.instrument_ids, path)
        .map_err(store_error)?;
    Ok(Json(AssignResponse { updated_fields }))
}

pub async fn get_changes<M: Model>(State(state): State<Arc<AppState<M>>>) -> Json<ChangeSet> {
    let session = state.session.lock().await;
    Json(session.engine().current_change_set())
}

#[derive(Debug, Serialize)]
pub struct PreviewResponse {
    pub summary: PreviewSummary,
    pub rows: Vec<PreviewRow>,
    pub text: String,
}

pub async fn preview_changes<M: Model>(
    State(state): State<Arc<AppState<M>>>,
) -> Json<PreviewResponse> {
    let change_set = state.session.lock().await.engine().current_change_set();
    let rows = preview::format(&change_set);
    Json(PreviewResponse {
        summary: preview::summarize(&change_set),
        text: preview::render_text(&rows),
        rows,
    })
}

pub async fn validate_changes<M: Model>(
    State(state): State<Arc<AppState<M>>>,
) -> ApiResult<ValidationReport> {
    let session = state.session.lock().await;
    let report = session
        .validate(state.model.as_ref())
        .await
        .map_err(session_error)?;
    Ok(Json(report))
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    /// Whether the request changed anything
    pub changed: bool,
    pub can_undo: bool,
    pub can_redo: bool,
    pub pending_operations: usize,
}

fn history_response(session: &EditorSession, changed: bool) -> HistoryResponse {
    let engine = session.engine();
    HistoryResponse {
        changed,
        can_undo: engine.history().can_undo(),
        can_redo: engine.history().can_redo(),
        pending_operations: engine.current_change_set().len(),
    }
}

pub async fn undo<M: Model>(State(state): State<Arc<AppState<M>>>) -> Json<HistoryResponse> {
    let mut session = state.session.lock().await;
    let changed = session.engine_mut().undo();
    Json(history_response(&session, changed))
}

pub async fn redo<M: Model>(State(state): State<Arc<AppState<M>>>) -> Json<HistoryResponse> {
    let mut session = state.session.lock().await;
    let changed = session.engine_mut().redo();
    Json(history_response(&session, changed))
}

pub async fn discard<M: Model>(State(state): State<Arc<AppState<M>>>) -> Json<HistoryResponse> {
    let mut session = state.session.lock().await;
    let changed = session.engine().is_dirty();
    session.engine_mut().discard();
    Json(history_response(&session, changed))
}

/// Runs the apply on its own task so a dropped connection cannot abandon it
/// halfway through its writes
pub async fn apply_changes<M: Model + 'static>(
    State(state): State<Arc<AppState<M>>>,
) -> ApiResult<ApplyReport> {
    let mut session = state.session.clone().lock_owned().await;

    let cancel = CancelToken::new();
    *state.active_cancel.lock() = Some(cancel.clone());

    let task_state = state.clone();
    let task = tokio::spawn(async move {
        let result = session.apply(task_state.model.as_ref(), &cancel).await;
        task_state.active_cancel.lock().take();
        result
    });

    match task.await {
        Ok(result) => result.map(Json).map_err(session_error),
        Err(join_err) => {
            log::error!("Apply task failed: {}", join_err);
            state.active_cancel.lock().take();
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse::new("Apply task failed")),
            ))
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    /// False when no apply was running
    pub cancelled: bool,
}

pub async fn cancel_apply<M: Model>(State(state): State<Arc<AppState<M>>>) -> Json<CancelResponse> {
    let cancelled = match state.active_cancel.lock().as_ref() {
        Some(token) => {
            token.cancel();
            log::info!("Cancellation requested for running apply");
            true
        }
        None => false,
    };
    Json(CancelResponse { cancelled })
}

#[derive(Debug, Serialize)]
pub struct ApplyStateResponse {
    pub state: ApplyState,
}

pub async fn get_apply_state<M: Model>(
    State(state): State<Arc<AppState<M>>>,
) -> Json<ApplyStateResponse> {
    Json(ApplyStateResponse {
        state: *state.apply_state.borrow(),
    })
}

#[derive(Debug, Serialize)]
pub struct ReloadResponse {
    pub rows: usize,
}

pub async fn reload<M: Model>(State(state): State<Arc<AppState<M>>>) -> ApiResult<ReloadResponse> {
    let mut session = state.session.lock().await;
    let rows = session
        .reload(state.model.as_ref())
        .await
        .map_err(session_error)?;
    Ok(Json(ReloadResponse { rows }))
}
