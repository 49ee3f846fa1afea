use super::*;
use axum::{body, body::Body, http::Request};
use chrono::Utc;
use client_core::{RemoteBackend, TaskListController, TaskListState};
use shared::domain::CollectionQuery;
use tokio::{net::TcpListener, sync::watch};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tower::ServiceExt;

async fn test_state() -> Arc<AppState> {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    Arc::new(AppState::new(ApiContext { storage }, 32))
}

async fn test_app() -> (Router, Arc<AppState>) {
    let state = test_state().await;
    (build_router(Arc::clone(&state), 64 * 1024), state)
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

async fn create(app: &Router, title: &str) -> TaskId {
    let response = app
        .clone()
        .oneshot(json_request(
            "POST",
            "/collections/tasks/documents",
            serde_json::json!({
                "title": title,
                "completed": false,
                "created_at": Utc::now(),
            }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::CREATED);
    read_json::<CreatedTask>(response).await.id
}

#[tokio::test]
async fn healthz_reports_ok_when_storage_is_ready() {
    let (app, _state) = test_app().await;
    let request = Request::get("/healthz")
        .body(Body::empty())
        .expect("request");
    let response = app.oneshot(request).await.expect("response");
    assert_eq!(response.status(), StatusCode::OK);

    let body = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    assert_eq!(body.as_ref(), b"ok");
}

#[tokio::test]
async fn create_then_list_returns_newest_first() {
    let (app, _state) = test_app().await;
    let first = create(&app, "first").await;
    let second = create(&app, "second").await;

    let response = app
        .oneshot(
            Request::get("/collections/tasks/documents?direction=desc")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let tasks: Vec<Task> = read_json(response).await;
    let ids: Vec<_> = tasks.iter().map(|t| t.id.clone()).collect();
    assert_eq!(ids, vec![second, first]);
}

#[tokio::test]
async fn create_rejects_blank_title() {
    let (app, _state) = test_app().await;
    let response = app
        .oneshot(json_request(
            "POST",
            "/collections/tasks/documents",
            serde_json::json!({ "title": "   ", "created_at": Utc::now() }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::Validation);
}

#[tokio::test]
async fn invalid_collection_name_is_rejected() {
    let (app, _state) = test_app().await;
    let response = app
        .oneshot(
            Request::get("/collections/bad.name/documents")
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn patch_toggles_completed_and_notifies_subscribers() {
    let (app, state) = test_app().await;
    let id = create(&app, "Buy milk").await;
    let mut changes = state.changes.subscribe();

    let response = app
        .clone()
        .oneshot(json_request(
            "PATCH",
            &format!("/collections/tasks/documents/{id}"),
            serde_json::json!({ "completed": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let changed = changes.recv().await.expect("change notice");
    assert_eq!(changed.collection, "tasks");

    let task = state
        .api
        .storage
        .get_task("tasks", &id)
        .await
        .expect("get")
        .expect("present");
    assert!(task.completed);
}

#[tokio::test]
async fn patch_of_unknown_document_is_not_found() {
    let (app, _state) = test_app().await;
    let response = app
        .oneshot(json_request(
            "PATCH",
            "/collections/tasks/documents/does-not-exist",
            serde_json::json!({ "completed": true }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let err: ApiError = read_json(response).await;
    assert_eq!(err.code, ErrorCode::NotFound);
}

#[tokio::test]
async fn delete_removes_document() {
    let (app, state) = test_app().await;
    let id = create(&app, "Walk dog").await;

    let response = app
        .oneshot(
            Request::delete(format!("/collections/tasks/documents/{id}"))
                .body(Body::empty())
                .expect("request"),
        )
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(state
        .api
        .storage
        .get_task("tasks", &id)
        .await
        .expect("get")
        .is_none());
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let state = test_state().await;
    let app = build_router(state, 128);
    let response = app
        .oneshot(json_request(
            "POST",
            "/collections/tasks/documents",
            serde_json::json!({ "title": "x".repeat(1024), "created_at": Utc::now() }),
        ))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
}

async fn next_event(
    socket: &mut tokio_tungstenite::WebSocketStream<
        tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
    >,
) -> ServerEvent {
    loop {
        let msg = tokio::time::timeout(std::time::Duration::from_secs(5), socket.next())
            .await
            .expect("event before timeout")
            .expect("stream open")
            .expect("ws message");
        if let WsMessage::Text(text) = msg {
            return serde_json::from_str(&text).expect("server event");
        }
    }
}

#[tokio::test]
async fn websocket_subscriber_receives_snapshot_after_each_change() {
    let state = test_state().await;
    let app = build_router(Arc::clone(&state), 64 * 1024);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let (mut socket, _) = connect_async(format!(
        "ws://{addr}/ws?collection=tasks&order_by=created_at&direction=desc"
    ))
    .await
    .expect("connect");

    match next_event(&mut socket).await {
        ServerEvent::Snapshot { collection, tasks } => {
            assert_eq!(collection, "tasks");
            assert!(tasks.is_empty());
        }
        other => panic!("unexpected event: {other:?}"),
    }

    let created = server_api::create_task(
        &state.api,
        "tasks",
        NewTask::pending("Buy milk", Utc::now()),
    )
    .await
    .expect("create");
    state.notify_changed("tasks");

    match next_event(&mut socket).await {
        ServerEvent::Snapshot { tasks, .. } => {
            assert_eq!(tasks.len(), 1);
            assert_eq!(tasks[0].id, created.id);
            assert_eq!(tasks[0].title, "Buy milk");
        }
        other => panic!("unexpected event: {other:?}"),
    }

    // Changes to other collections do not wake this subscriber.
    state.notify_changed("chores");
    server_api::delete_task(&state.api, "tasks", &created.id)
        .await
        .expect("delete");
    state.notify_changed("tasks");

    match next_event(&mut socket).await {
        ServerEvent::Snapshot { tasks, .. } => assert!(tasks.is_empty()),
        other => panic!("unexpected event: {other:?}"),
    }
}

#[tokio::test]
async fn websocket_rejects_invalid_collection() {
    let state = test_state().await;
    let app = build_router(state, 64 * 1024);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let (mut socket, _) = connect_async(format!("ws://{addr}/ws?collection=bad.name"))
        .await
        .expect("connect");
    match next_event(&mut socket).await {
        ServerEvent::Error(err) => assert_eq!(err.code, ErrorCode::Validation),
        other => panic!("unexpected event: {other:?}"),
    }
}

async fn wait_for_state(
    rx: &mut watch::Receiver<TaskListState>,
    predicate: impl FnMut(&TaskListState) -> bool,
) -> TaskListState {
    tokio::time::timeout(std::time::Duration::from_secs(5), rx.wait_for(predicate))
        .await
        .expect("state before timeout")
        .expect("controller alive")
        .clone()
}

#[tokio::test]
async fn controller_follows_server_through_add_toggle_delete() {
    let state = test_state().await;
    let app = build_router(state, 64 * 1024);
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });

    let backend = RemoteBackend::new(&format!("http://{addr}")).expect("backend");
    let controller = TaskListController::start(Arc::new(backend), CollectionQuery::default())
        .await
        .expect("start");
    let mut rx = controller.watch_state();
    let initial = wait_for_state(&mut rx, |s| s.ready).await;
    assert!(initial.tasks.is_empty());

    controller.set_draft_title("Buy milk");
    let id = controller
        .submit_draft()
        .await
        .expect("add")
        .expect("created");
    let added = wait_for_state(&mut rx, |s| s.tasks.len() == 1).await;
    assert_eq!(added.tasks[0].id, id);
    assert_eq!(added.tasks[0].title, "Buy milk");
    assert!(!added.tasks[0].completed);
    assert_eq!(added.draft_title, "");

    controller.toggle_row(0).await.expect("toggle");
    wait_for_state(&mut rx, |s| s.tasks.first().is_some_and(|t| t.completed)).await;

    controller.delete_task(&id).await.expect("delete");
    wait_for_state(&mut rx, |s| s.tasks.is_empty()).await;

    controller.shutdown().await;
}
