use crate::monitor_logic::error::AppError;
use crate::monitor_logic::page::render_monitor_page;
use crate::monitor_logic::state::AppState;
use axum::{
    Json, Router,
    body::Bytes,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::{get, post},
};
use futures_util::StreamExt;
use lib_common::{ConsumerId, Item, RotationSnapshot};
use serde::Deserialize;
use serde_json::{Value, json};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::time::MissedTickBehavior;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

static NEXT_SESSION_ID: AtomicUsize = AtomicUsize::new(1);

pub fn router(app_state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/items/", get(list_items_handler))
        .route("/items/add_test/", post(add_test_item_handler))
        .route("/monitor/{id}/", get(monitor_page_handler))
        .route("/monitor/{id}/current", get(monitor_current_handler))
        .route("/monitor/{id}/ws", get(ws_handler))
        .route("/mock_monitor_endpoint/", post(mock_monitor_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(app_state)
}

/// Serves until the state's shutdown token is cancelled.
pub async fn run(port: u16, app_state: AppState) -> anyhow::Result<()> {
    let shutdown = app_state.shutdown.clone();
    let app = router(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Downstream server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown.cancelled().await;
            info!("Downstream server shutting down.");
        })
        .await?;
    Ok(())
}

async fn root_handler() -> Json<Value> {
    Json(json!({ "message": "Monitor Data Server is running" }))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.ping().await {
        Ok(()) => (StatusCode::OK, "OK"),
        Err(e) => {
            warn!("Health check failed: {}", e);
            (StatusCode::SERVICE_UNAVAILABLE, "Store unavailable")
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddItemParams {
    pub text: String,
}

fn validate_text(text: &str, max_len: usize) -> Result<(), AppError> {
    if text.trim().is_empty() {
        return Err(AppError::InvalidText("text must not be empty".to_string()));
    }
    let len = text.chars().count();
    if len > max_len {
        return Err(AppError::InvalidText(format!(
            "text is {len} characters long, the limit is {max_len}"
        )));
    }
    Ok(())
}

async fn add_test_item_handler(
    State(state): State<AppState>,
    Query(params): Query<AddItemParams>,
) -> Result<Json<Value>, AppError> {
    validate_text(&params.text, state.max_text_len)?;
    let id = state.store.insert(&params.text).await?;
    info!(item = id, "Test item added");
    Ok(Json(json!({ "message": "Item added successfully", "no": id })))
}

async fn list_items_handler(State(state): State<AppState>) -> Result<Json<Vec<Item>>, AppError> {
    Ok(Json(state.store.list_all().await?))
}

/// Maps a raw path segment onto a configured monitor id. Negative and
/// oversized ids get the same 404 as any other out-of-range id.
fn monitor_id(state: &AppState, raw: i64) -> Result<ConsumerId, AppError> {
    let registry = state.engine.registry();
    let count = registry.monitor_count().get();
    let id = ConsumerId::try_from(raw).map_err(|_| {
        AppError::UnknownMonitor(format!("Monitor ID {raw} not found. Valid IDs are 1 to {count}."))
    })?;
    registry.check_consumer(id)?;
    Ok(id)
}

async fn monitor_page_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<i64>,
) -> Result<Html<String>, AppError> {
    let id = monitor_id(&state, raw_id)?;
    let snapshot = state.engine.tick(id).await?;
    if snapshot.current.is_none() {
        info!(monitor = id, "No item found for monitor yet");
    }
    Ok(Html(render_monitor_page(&snapshot)))
}

async fn monitor_current_handler(
    State(state): State<AppState>,
    Path(raw_id): Path<i64>,
) -> Result<Json<RotationSnapshot>, AppError> {
    let id = monitor_id(&state, raw_id)?;
    Ok(Json(state.engine.tick(id).await?))
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(raw_id): Path<i64>,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, AppError> {
    let id = monitor_id(&state, raw_id)?;
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, id)))
}

async fn handle_socket(mut socket: WebSocket, state: AppState, monitor: ConsumerId) {
    let session = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
    info!(session, monitor, "Monitor session connected");

    let mut ticker = tokio::time::interval(state.engine.settings().tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                break;
            }
            incoming = socket.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    // Clients have nothing to say; anything else is ignored.
                    Some(Ok(_)) => {}
                }
            }
            _ = ticker.tick() => {
                let snapshot = match state.engine.tick(monitor).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        warn!(session, monitor, "Ending session: {}", e);
                        break;
                    }
                };
                let payload = match serde_json::to_string(&snapshot) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(session, monitor, "Failed to encode snapshot: {}", e);
                        continue;
                    }
                };
                if socket.send(Message::Text(payload.into())).await.is_err() {
                    break; // client disconnected
                }
            }
        }
    }

    info!(session, monitor, "Monitor session disconnected");
}

async fn mock_monitor_handler(body: Bytes) -> Json<Value> {
    let content = String::from_utf8_lossy(&body);
    info!("Received data at mock monitor endpoint:");
    debug!("--- Content Start ---\n{}\n--- Content End ---", content);
    Json(json!({ "status": "received" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeDelta, Utc};
    use lib_common::configs::EngineSettings;
    use lib_common::{Dispatcher, ItemStore, MemoryItemStore};
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn app_state(store: Arc<MemoryItemStore>) -> AppState {
        AppState::new(store, &EngineSettings::default(), CancellationToken::new())
    }

    #[tokio::test]
    async fn add_test_item_inserts_pending_rows() {
        let store = Arc::new(MemoryItemStore::new());
        let state = app_state(store.clone());

        let Json(body) = add_test_item_handler(
            State(state.clone()),
            Query(AddItemParams { text: "hello".to_string() }),
        )
        .await
        .unwrap();
        assert_eq!(body, json!({ "message": "Item added successfully", "no": 1 }));

        let Json(items) = list_items_handler(State(state)).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].text, "hello");
    }

    #[tokio::test]
    async fn add_test_item_enforces_the_length_limit() {
        let state = app_state(Arc::new(MemoryItemStore::new()));
        let long = "x".repeat(state.max_text_len + 1);

        for text in [long, "   ".to_string()] {
            let result = add_test_item_handler(State(state.clone()), Query(AddItemParams { text })).await;
            assert!(matches!(result, Err(AppError::InvalidText(_))));
        }
    }

    #[tokio::test]
    async fn monitor_endpoints_reject_unknown_ids() {
        let state = app_state(Arc::new(MemoryItemStore::new()));
        let result = monitor_current_handler(State(state.clone()), Path(4)).await;
        assert!(matches!(result, Err(AppError::UnknownMonitor(_))));

        let page = monitor_page_handler(State(state.clone()), Path(0)).await;
        assert!(matches!(page, Err(AppError::UnknownMonitor(_))));

        for raw in [-1, i64::from(u32::MAX) + 1] {
            match monitor_current_handler(State(state.clone()), Path(raw)).await {
                Err(e @ AppError::UnknownMonitor(_)) => {
                    assert_eq!(e.to_string(), format!("Monitor ID {raw} not found. Valid IDs are 1 to 3."));
                    assert_eq!(e.into_response().status(), StatusCode::NOT_FOUND);
                }
                other => panic!("expected 404 for {raw}, got {:?}", other.map(|Json(s)| s)),
            }
        }
    }

    #[tokio::test]
    async fn current_snapshot_follows_dispatched_items() {
        let store = Arc::new(MemoryItemStore::new());
        let state = app_state(store.clone());

        let Json(before) = monitor_current_handler(State(state.clone()), Path(1)).await.unwrap();
        assert_eq!(before, RotationSnapshot::empty(1));

        let id = store.insert_at("breaking", Utc::now() - TimeDelta::minutes(10));
        let settings = EngineSettings::default();
        Dispatcher::new(store.clone(), settings.monitor_count, settings.dispatcher)
            .run_cycle()
            .await;

        let Json(after) = monitor_current_handler(State(state.clone()), Path(1)).await.unwrap();
        assert_eq!(after.current.map(|item| item.id), Some(id));

        let Html(page) = monitor_page_handler(State(state), Path(1)).await.unwrap();
        assert!(page.contains("breaking"));
    }

    #[tokio::test]
    async fn health_reports_store_outages() {
        let store = Arc::new(MemoryItemStore::new());
        let state = app_state(store.clone());
        assert_eq!(health_handler(State(state.clone())).await.into_response().status(), StatusCode::OK);

        store.set_unavailable(true);
        assert!(store.ping().await.is_err());
        assert_eq!(
            health_handler(State(state)).await.into_response().status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn mock_endpoint_acknowledges() {
        let Json(body) = mock_monitor_handler(Bytes::from_static(b"<html></html>")).await;
        assert_eq!(body, json!({ "status": "received" }));
    }
}
