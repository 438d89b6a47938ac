use axum::Json;
use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use super::{AppState, data};
use crate::supervisor::{RunRequest, SupervisorError};

const DEFAULT_LOG_LIMIT: i64 = 100;
const MAX_LOG_LIMIT: i64 = 2000;

/// JSON error body with a status code.
pub(super) struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn internal(err: &impl std::fmt::Display) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        let status = match err {
            SupervisorError::TaskRunning => StatusCode::CONFLICT,
            SupervisorError::Validation { .. } => StatusCode::BAD_REQUEST,
        };
        Self::new(status, err.to_string())
    }
}

pub(super) async fn health() -> Json<Value> {
    Json(json!({ "ok": true }))
}

pub(super) async fn status(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.supervisor.status())
}

/// Starts a job. An empty body runs the base config.
pub(super) async fn run(State(state): State<AppState>, body: Bytes) -> Result<Response, ApiError> {
    let request: RunRequest = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        serde_json::from_slice(&body)
            .map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.to_string()))?
    };
    let status = state.supervisor.run(&request).inspect_err(|err| {
        debug!(error = %err, "run request rejected");
    })?;
    Ok((StatusCode::ACCEPTED, Json(status)).into_response())
}

pub(super) async fn stop(State(state): State<AppState>) -> impl IntoResponse {
    let stopped = state.supervisor.stop();
    (StatusCode::ACCEPTED, Json(json!({ "stopped": stopped })))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct LogsQuery {
    limit: Option<String>,
}

/// Parses `limit`, falling back to the default on garbage and clamping to
/// `0..=2000`.
fn log_limit(raw: Option<&str>) -> usize {
    let limit = raw
        .and_then(|v| v.trim().parse::<i64>().ok())
        .unwrap_or(DEFAULT_LOG_LIMIT)
        .clamp(0, MAX_LOG_LIMIT);
    usize::try_from(limit).unwrap_or(0)
}

pub(super) async fn logs(
    State(state): State<AppState>,
    Query(query): Query<LogsQuery>,
) -> Json<Value> {
    let limit = log_limit(query.limit.as_deref());
    let lines: Vec<Value> = if limit == 0 {
        Vec::new()
    } else {
        state
            .logs
            .recent(limit)
            .iter()
            .map(|line| {
                serde_json::from_str(line).unwrap_or_else(|_| Value::String(line.to_string()))
            })
            .collect()
    };
    Json(json!({ "logs": lines }))
}

fn platform_label(name: &str) -> &str {
    match name {
        "bilibili" => "Bilibili",
        "weibo" => "微博",
        "tieba" => "贴吧",
        "zhihu" => "知乎",
        "kuaishou" => "快手",
        other => other,
    }
}

pub(super) async fn platforms(State(state): State<AppState>) -> Json<Value> {
    let platforms: Vec<Value> = state
        .supervisor
        .registry()
        .names()
        .iter()
        .map(|name| {
            json!({
                "key": name,
                "label": platform_label(name),
                "modes": ["search", "detail", "creator"],
            })
        })
        .collect();
    Json(json!({ "platforms": platforms }))
}

pub(super) async fn options(State(state): State<AppState>) -> Json<Value> {
    let base = state.supervisor.base_config();
    Json(json!({
        "crawler_types": ["search", "detail", "creator"],
        "store_backends": ["file", "sqlite", "mysql", "postgres", "mongodb"],
        "save_data_option": ["json", "csv", "xlsx", "xlsx_book"],
        "bili_search_mode": ["video"],
        "wb_search_type": ["1", "61", "60", "64"],
        "defaults": {
            "platform": base.platform,
            "crawler_type": base.crawler_type,
            "keywords": base.keywords,
            "store_backend": base.store_backend,
            "sqlite_path": base.sqlite_path,
            "save_data_option": base.save_data_option,
            "enable_ip_proxy": base.enable_ip_proxy,
            "max_concurrency": base.max_concurrency_num,
            "enable_comments": base.enable_get_comments,
            "enable_subcomment": base.enable_get_sub_comments,
            "enable_medias": base.enable_get_medias,
            "bili_search_mode": base.bili_search_mode,
            "wb_search_type": base.weibo_search_type,
        },
    }))
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct FilesQuery {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    file_type: String,
}

pub(super) async fn data_files(
    State(state): State<AppState>,
    Query(query): Query<FilesQuery>,
) -> Result<Json<Value>, ApiError> {
    let root = state.data_dir.clone();
    let files = tokio::task::spawn_blocking(move || {
        data::list_files(&root, &query.platform, &query.file_type)
    })
    .await
    .map_err(|e| ApiError::internal(&e))?
    .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(json!({ "files": files })))
}

pub(super) async fn data_stats(State(state): State<AppState>) -> Result<Json<data::DataStats>, ApiError> {
    let root = state.data_dir.clone();
    let stats = tokio::task::spawn_blocking(move || data::stats(&root))
        .await
        .map_err(|e| ApiError::internal(&e))?
        .map_err(|e| ApiError::internal(&e))?;
    Ok(Json(stats))
}

/// Sends a data file as an attachment.
pub(super) async fn data_download(
    State(state): State<AppState>,
    Path(rel): Path<String>,
) -> Result<Response, ApiError> {
    let Some(path) = data::safe_path(&state.data_dir, &rel) else {
        warn!(path = %rel, "data download outside the data directory");
        return Err(ApiError::new(StatusCode::FORBIDDEN, "access denied"));
    };
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::new(StatusCode::NOT_FOUND, "file not found"));
        }
        Err(e) => return Err(ApiError::internal(&e)),
    };
    let filename = path
        .file_name()
        .map(|n| {
            n.to_string_lossy()
                .chars()
                .map(|c| if c == ' ' || (c.is_ascii_graphic() && c != '"') { c } else { '_' })
                .collect::<String>()
        })
        .unwrap_or_default();
    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response())
}
