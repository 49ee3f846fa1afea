use std::{net::SocketAddr, sync::Arc};

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch},
    Json, Router,
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use server_api::{
    create_task, delete_task, ensure_collection_name, list_tasks, snapshot_event, update_task,
    ApiContext,
};
use shared::{
    domain::{OrderKey, SortDirection, TaskId, DEFAULT_COLLECTION},
    error::{ApiError, ErrorCode},
    protocol::{CreatedTask, ListQuery, NewTask, ServerEvent, Task, TaskPatch},
};
use storage::Storage;
use tokio_stream::wrappers::{errors::BroadcastStreamRecvError, BroadcastStream};
use tower_http::limit::RequestBodyLimitLayer;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

mod app_state;
mod config;

use app_state::AppState;
use config::{load_settings, prepare_database_url};

type ApiResult<T> = Result<T, (StatusCode, Json<ApiError>)>;

#[derive(Debug, Deserialize)]
struct WsQuery {
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    order_by: OrderKey,
    #[serde(default)]
    direction: SortDirection,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let settings = load_settings();
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await.map_err(|error| {
        error!(
            %database_url,
            %error,
            "failed to open SQLite database; verify parent directory exists and permissions are correct"
        );
        error
    })?;

    let state = AppState::new(ApiContext { storage }, settings.change_buffer);
    let app = build_router(Arc::new(state), settings.max_body_bytes);

    let addr: SocketAddr = settings.server_bind.parse()?;
    info!(%addr, "server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

fn build_router(state: Arc<AppState>, max_body_bytes: usize) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route(
            "/collections/:collection/documents",
            get(http_list_tasks).post(http_create_task),
        )
        .route(
            "/collections/:collection/documents/:id",
            patch(http_update_task).delete(http_delete_task),
        )
        .route("/ws", get(ws_handler))
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .with_state(state)
}

async fn healthz(State(state): State<Arc<AppState>>) -> ApiResult<&'static str> {
    state
        .api
        .storage
        .health_check()
        .await
        .map_err(|e| error_response(ApiError::internal(e.to_string())))?;
    Ok("ok")
}

fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::Validation => StatusCode::BAD_REQUEST,
        ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(err: ApiError) -> (StatusCode, Json<ApiError>) {
    let status = status_for(err.code);
    if status.is_server_error() {
        error!(code = ?err.code, message = %err.message, "request failed");
    } else {
        debug!(code = ?err.code, message = %err.message, "request rejected");
    }
    (status, Json(err))
}

async fn http_list_tasks(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Query(q): Query<ListQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let tasks = list_tasks(&state.api, &collection, q.direction)
        .await
        .map_err(error_response)?;
    Ok(Json(tasks))
}

async fn http_create_task(
    State(state): State<Arc<AppState>>,
    Path(collection): Path<String>,
    Json(req): Json<NewTask>,
) -> ApiResult<(StatusCode, Json<CreatedTask>)> {
    let created = create_task(&state.api, &collection, req)
        .await
        .map_err(error_response)?;
    info!(%collection, id = %created.id, "document created");
    state.notify_changed(&collection);
    Ok((StatusCode::CREATED, Json(created)))
}

async fn http_update_task(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
    Json(req): Json<TaskPatch>,
) -> ApiResult<StatusCode> {
    let id = TaskId(id);
    update_task(&state.api, &collection, &id, req)
        .await
        .map_err(error_response)?;
    info!(%collection, %id, completed = ?req.completed, "document updated");
    state.notify_changed(&collection);
    Ok(StatusCode::NO_CONTENT)
}

async fn http_delete_task(
    State(state): State<Arc<AppState>>,
    Path((collection, id)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    let id = TaskId(id);
    delete_task(&state.api, &collection, &id)
        .await
        .map_err(error_response)?;
    info!(%collection, %id, "document deleted");
    state.notify_changed(&collection);
    Ok(StatusCode::NO_CONTENT)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(q): Query<WsQuery>,
) -> impl IntoResponse {
    let collection = q
        .collection
        .unwrap_or_else(|| DEFAULT_COLLECTION.to_string());
    debug!(
        %collection,
        order_by = q.order_by.as_str(),
        direction = q.direction.as_str(),
        "subscription requested"
    );
    ws.on_upgrade(move |socket| ws_connection(state, socket, collection, q.direction))
}

async fn send_event(
    sender: &mut futures::stream::SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    let text = match serde_json::to_string(event) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "failed to encode server event");
            return Ok(());
        }
    };
    sender.send(Message::Text(text)).await
}

async fn ws_connection(
    state: Arc<AppState>,
    socket: WebSocket,
    collection: String,
    direction: SortDirection,
) {
    let (mut sender, mut receiver) = socket.split();

    if let Err(err) = ensure_collection_name(&collection) {
        let _ = send_event(&mut sender, &ServerEvent::Error(err)).await;
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    // Subscribe before the first read so no change between the two is missed.
    let mut changes = BroadcastStream::new(state.changes.subscribe());
    info!(%collection, "subscriber connected");

    let send_collection = collection.clone();
    let send_task = tokio::spawn(async move {
        let initial = snapshot_event(&state.api, &send_collection, direction).await;
        if send_event(&mut sender, &initial).await.is_err() {
            return;
        }

        while let Some(change) = changes.next().await {
            match change {
                Ok(changed) if changed.collection != send_collection => continue,
                Ok(_) => {}
                Err(BroadcastStreamRecvError::Lagged(skipped)) => {
                    warn!(collection = %send_collection, skipped, "subscriber lagged; resending snapshot");
                }
            }
            let event = snapshot_event(&state.api, &send_collection, direction).await;
            if send_event(&mut sender, &event).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(msg)) = receiver.next().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }

    send_task.abort();
    info!(%collection, "subscriber disconnected");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
