use std::sync::Arc;

use super::*;
use axum::{
    extract::{
        ws::{Message as AxumMessage, WebSocket},
        Path, Query, State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use chrono::Utc;
use shared::{domain::SortDirection, protocol::Task};
use tokio::{net::TcpListener, sync::Mutex};

#[derive(Clone, Default)]
struct ServerState {
    created: Arc<Mutex<Vec<NewTask>>>,
    deleted: Arc<Mutex<Vec<String>>>,
    ws_queries: Arc<Mutex<Vec<std::collections::HashMap<String, String>>>>,
}

fn sample_task() -> Task {
    Task {
        id: TaskId::from("srv-1"),
        title: "Buy milk".into(),
        completed: false,
        created_at: Utc::now(),
    }
}

async fn create_handler(
    State(state): State<ServerState>,
    Json(body): Json<NewTask>,
) -> (StatusCode, Json<CreatedTask>) {
    state.created.lock().await.push(body);
    (
        StatusCode::CREATED,
        Json(CreatedTask {
            id: TaskId::from("srv-1"),
        }),
    )
}

async fn update_handler(Path((_collection, id)): Path<(String, String)>) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ApiError::new(
            ErrorCode::NotFound,
            format!("no document '{id}'"),
        )),
    )
}

async fn delete_handler(
    State(state): State<ServerState>,
    Path((_collection, id)): Path<(String, String)>,
) -> StatusCode {
    state.deleted.lock().await.push(id);
    StatusCode::NO_CONTENT
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<ServerState>,
    Query(q): Query<std::collections::HashMap<String, String>>,
) -> impl IntoResponse {
    state.ws_queries.lock().await.push(q);
    ws.on_upgrade(scripted_feed)
}

async fn scripted_feed(mut socket: WebSocket) {
    let events = [
        ServerEvent::Snapshot {
            collection: "tasks".into(),
            tasks: vec![sample_task()],
        },
        ServerEvent::Error(ApiError::new(ErrorCode::Internal, "read failed")),
    ];
    for event in events {
        let text = serde_json::to_string(&event).expect("encode");
        if socket.send(AxumMessage::Text(text)).await.is_err() {
            return;
        }
    }
    let _ = socket.send(AxumMessage::Text("not json".into())).await;
    let _ = socket.send(AxumMessage::Close(None)).await;
}

async fn spawn_document_server() -> (String, ServerState) {
    let state = ServerState::default();
    let app = Router::new()
        .route("/collections/:collection/documents", post(create_handler))
        .route(
            "/collections/:collection/documents/:id",
            patch(update_handler).delete(delete_handler),
        )
        .route("/ws", get(ws_handler))
        .with_state(state.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), state)
}

#[test]
fn rejects_non_http_server_urls() {
    let err = RemoteBackend::new("ftp://example.com").err().expect("must fail");
    assert!(matches!(err, BackendError::InvalidUrl(_)));
    let err = RemoteBackend::new("not a url").err().expect("must fail");
    assert!(matches!(err, BackendError::InvalidUrl(_)));
}

#[test]
fn subscription_url_switches_scheme_and_carries_query() {
    let backend = RemoteBackend::new("https://tasks.example.com/").expect("backend");
    let url = backend
        .subscription_url(&CollectionQuery::new("chores").direction(SortDirection::Asc))
        .expect("url");
    assert_eq!(
        url.as_str(),
        "wss://tasks.example.com/ws?collection=chores&order_by=created_at&direction=asc"
    );

    let backend = RemoteBackend::new("http://127.0.0.1:8080").expect("backend");
    let url = backend
        .subscription_url(&CollectionQuery::default())
        .expect("url");
    assert_eq!(
        url.as_str(),
        "ws://127.0.0.1:8080/ws?collection=tasks&order_by=created_at&direction=desc"
    );
}

#[tokio::test]
async fn create_posts_fields_and_returns_server_id() {
    let (server_url, state) = spawn_document_server().await;
    let backend = RemoteBackend::new(&server_url).expect("backend");

    let id = backend
        .create("tasks", NewTask::pending("Buy milk", Utc::now()))
        .await
        .expect("create");
    assert_eq!(id, TaskId::from("srv-1"));

    let created = state.created.lock().await;
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].title, "Buy milk");
    assert!(!created[0].completed);
}

#[tokio::test]
async fn error_bodies_map_to_rejected() {
    let (server_url, _state) = spawn_document_server().await;
    let backend = RemoteBackend::new(&server_url).expect("backend");

    let err = backend
        .update("tasks", &TaskId::from("ghost"), TaskPatch::completed(true))
        .await
        .expect_err("must fail");
    assert!(err.is_not_found(), "unexpected error: {err}");
}

#[tokio::test]
async fn delete_targets_the_document_path() {
    let (server_url, state) = spawn_document_server().await;
    let backend = RemoteBackend::new(&server_url).expect("backend");

    backend
        .delete("tasks", &TaskId::from("srv-1"))
        .await
        .expect("delete");
    assert_eq!(*state.deleted.lock().await, vec!["srv-1".to_string()]);
}

#[tokio::test]
async fn unreachable_server_is_a_transport_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let backend = RemoteBackend::new(&format!("http://{addr}")).expect("backend");
    let err = backend
        .delete("tasks", &TaskId::from("x"))
        .await
        .expect_err("must fail");
    assert!(matches!(err, BackendError::Transport(_)), "unexpected error: {err}");

    let err = backend
        .subscribe(&CollectionQuery::default())
        .await
        .expect_err("must fail");
    assert!(matches!(err, BackendError::Transport(_)), "unexpected error: {err}");
}

async fn next(subscription: &mut Subscription) -> Option<SnapshotEvent> {
    tokio::time::timeout(std::time::Duration::from_secs(5), subscription.next_event())
        .await
        .expect("event before timeout")
}

#[tokio::test]
async fn subscription_forwards_snapshots_and_errors_in_order() {
    let (server_url, state) = spawn_document_server().await;
    let backend = RemoteBackend::new(&server_url).expect("backend");

    let mut subscription = backend
        .subscribe(&CollectionQuery::default())
        .await
        .expect("subscribe");

    match next(&mut subscription).await {
        Some(SnapshotEvent::Snapshot(Some(tasks))) => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].id, TaskId::from("srv-1"));
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next(&mut subscription).await {
        Some(SnapshotEvent::Error(BackendError::Rejected { code, .. })) => {
            assert_eq!(code, ErrorCode::Internal)
        }
        other => panic!("unexpected event: {other:?}"),
    }
    match next(&mut subscription).await {
        Some(SnapshotEvent::Error(BackendError::Decode(_))) => {}
        other => panic!("unexpected event: {other:?}"),
    }
    match next(&mut subscription).await {
        Some(SnapshotEvent::Error(BackendError::SubscriptionClosed)) => {}
        other => panic!("unexpected event: {other:?}"),
    }
    assert_eq!(next(&mut subscription).await, None);

    let queries = state.ws_queries.lock().await;
    assert_eq!(queries[0].get("collection").map(String::as_str), Some("tasks"));
    assert_eq!(queries[0].get("direction").map(String::as_str), Some("desc"));
}
