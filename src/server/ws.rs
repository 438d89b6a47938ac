//! WebSocket streams of log lines and status snapshots.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use tracing::debug;

use super::AppState;
use crate::logging::DEFAULT_SUBSCRIBER_BUFFER;

const DEFAULT_STATUS_INTERVAL: Duration = Duration::from_secs(1);
const MIN_STATUS_INTERVAL_MS: u64 = 100;
const MAX_STATUS_INTERVAL_MS: u64 = 5000;

pub(super) async fn logs(State(state): State<AppState>, upgrade: WebSocketUpgrade) -> Response {
    upgrade.on_upgrade(move |socket| stream_logs(socket, state))
}

/// Forwards live log lines until the client goes away. Lines the client is
/// too slow for are shed by the bus.
async fn stream_logs(mut socket: WebSocket, state: AppState) {
    let (mut lines, _subscription) = state.logs.subscribe(DEFAULT_SUBSCRIBER_BUFFER);
    loop {
        tokio::select! {
            line = lines.recv() => {
                let Some(line) = line else { break };
                if socket.send(Message::Text(line.to_string().into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("log stream closed");
}

#[derive(Debug, Default, Deserialize)]
pub(super) struct StatusQuery {
    interval_ms: Option<String>,
}

/// Parses `interval_ms`, clamping to `100..=5000`; garbage keeps one second.
fn status_interval(raw: Option<&str>) -> Duration {
    raw.and_then(|v| v.trim().parse::<i64>().ok())
        .map_or(DEFAULT_STATUS_INTERVAL, |ms| {
            let ms = u64::try_from(ms.max(0)).unwrap_or(0);
            Duration::from_millis(ms.clamp(MIN_STATUS_INTERVAL_MS, MAX_STATUS_INTERVAL_MS))
        })
}

pub(super) async fn status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    let interval = status_interval(query.interval_ms.as_deref());
    upgrade.on_upgrade(move |socket| stream_status(socket, state, interval))
}

/// Sends a status snapshot immediately and then every `interval`.
async fn stream_status(mut socket: WebSocket, state: AppState, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Ok(mut frame) = serde_json::to_string(&state.supervisor.status()) else {
                    break;
                };
                frame.push('\n');
                if socket.send(Message::Text(frame.into())).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_)) | Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    debug!("status stream closed");
}
