//! Wire-contract tests for the queue client, the solver agents, and the
//! push channel.
//!
//! Each test spins up an Axum stub on a random port and drives the real
//! client against it.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use coordination::{
    ConsensusConfig, ConsensusResolver, HttpSolverAgent, SolveRequest, SolverAgent,
    WorkerRegistration, WorkerStatus,
};
use swarm_worker::channel::{PushChannel, PushMessage};
use swarm_worker::queue::{HttpQueueClient, QueueApi, QueueError};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Requests seen by the stub, as `(method path, body)`.
#[derive(Default)]
struct Recorded {
    calls: Vec<(String, Value)>,
    query: HashMap<String, String>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn serve(app: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

fn record(state: &Shared, call: String, body: Value) {
    state.lock().unwrap().calls.push((call, body));
}

fn queue_app(state: Shared) -> Router {
    Router::new()
        .route(
            "/workers",
            post(|State(s): State<Shared>, Json(body): Json<Value>| async move {
                record(&s, "POST /workers".into(), body);
                Json(json!({ "id": "w-77", "status": "online" }))
            }),
        )
        .route(
            "/workers/{id}/heartbeat",
            post(|State(s): State<Shared>, Path(id): Path<String>| async move {
                record(&s, format!("POST /workers/{id}/heartbeat"), Value::Null);
                StatusCode::OK
            }),
        )
        .route(
            "/workers/{id}",
            axum::routing::put(
                |State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                    record(&s, format!("PUT /workers/{id}"), body);
                    StatusCode::OK
                },
            ),
        )
        .route(
            "/tasks",
            get(
                |State(s): State<Shared>, Query(q): Query<HashMap<String, String>>| async move {
                    s.lock().unwrap().query = q;
                    Json(json!([
                        { "id": "t-1", "type": "web-scrape", "payload": { "url": "https://a" }, "priority": 5, "status": "pending" }
                    ]))
                },
            ),
        )
        .route(
            "/tasks/{id}/claim",
            post(
                |State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                    record(&s, format!("POST /tasks/{id}/claim"), body.clone());
                    if id == "taken" {
                        return Err((StatusCode::CONFLICT, "already claimed"));
                    }
                    Ok(Json(json!({
                        "id": id,
                        "type": "web-scrape",
                        "payload": {},
                        "status": "running",
                        "claimed_by": body["worker_id"],
                    })))
                },
            ),
        )
        .route(
            "/tasks/{id}/complete",
            post(
                |State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                    record(&s, format!("POST /tasks/{id}/complete"), body);
                    StatusCode::OK
                },
            ),
        )
        .route(
            "/tasks/{id}/fail",
            post(
                |State(s): State<Shared>, Path(id): Path<String>, Json(body): Json<Value>| async move {
                    record(&s, format!("POST /tasks/{id}/fail"), body);
                    StatusCode::INTERNAL_SERVER_ERROR
                },
            ),
        )
        .with_state(state)
}

#[tokio::test]
async fn test_queue_client_wire_format() {
    let state: Shared = Arc::default();
    let base = serve(queue_app(Arc::clone(&state))).await;
    let client = HttpQueueClient::new(format!("{base}/"), TEST_TIMEOUT).unwrap();

    let registration = WorkerRegistration {
        name: "scraper".into(),
        worker_type: "automation".into(),
        capabilities: vec!["web-scrape".into()],
        metadata: HashMap::new(),
    };
    let id = client.register(&registration).await.unwrap();
    assert_eq!(id, "w-77");

    client.heartbeat(&id).await.unwrap();
    client.update_status(&id, WorkerStatus::Busy).await.unwrap();

    let tasks = client.pending_tasks(1).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].task_type, "web-scrape");
    assert_eq!(tasks[0].priority, 5);

    let claimed = client.claim("t-1", &id).await.unwrap().unwrap();
    assert_eq!(claimed.claimed_by.as_deref(), Some("w-77"));
    assert!(client.claim("taken", &id).await.unwrap().is_none());

    client.complete("t-1", &json!({ "ok": true })).await.unwrap();
    let err = client.fail("t-1", "boom").await.unwrap_err();
    assert!(matches!(err, QueueError::Status { status: 500, .. }));

    let s = state.lock().unwrap();
    assert_eq!(s.query.get("status").map(String::as_str), Some("pending"));
    assert_eq!(s.query.get("limit").map(String::as_str), Some("1"));

    let calls: Vec<&str> = s.calls.iter().map(|(c, _)| c.as_str()).collect();
    assert_eq!(
        calls,
        vec![
            "POST /workers",
            "POST /workers/w-77/heartbeat",
            "PUT /workers/w-77",
            "POST /tasks/t-1/claim",
            "POST /tasks/taken/claim",
            "POST /tasks/t-1/complete",
            "POST /tasks/t-1/fail",
        ]
    );
    assert_eq!(s.calls[0].1["type"], "automation");
    assert_eq!(s.calls[0].1["capabilities"], json!(["web-scrape"]));
    assert_eq!(s.calls[2].1, json!({ "status": "busy" }));
    assert_eq!(s.calls[3].1, json!({ "worker_id": "w-77" }));
    assert_eq!(s.calls[5].1, json!({ "result": { "ok": true } }));
    assert_eq!(s.calls[6].1, json!({ "error": "boom" }));
}

#[tokio::test]
async fn test_queue_client_unreachable_is_transport_error() {
    let client = HttpQueueClient::new("http://127.0.0.1:1", Duration::from_secs(1)).unwrap();
    let err = client.pending_tasks(1).await.unwrap_err();
    assert!(matches!(err, QueueError::Transport(_)));
    assert!(err.is_retriable());
}

fn solver_app(answer: Option<Value>) -> Router {
    Router::new().route(
        "/solve",
        post(move |Json(body): Json<Value>| {
            let answer = answer.clone();
            async move {
                assert!(body["image"].is_string());
                match answer {
                    Some(answer) => Ok(Json(answer)),
                    None => Err(StatusCode::INTERNAL_SERVER_ERROR),
                }
            }
        }),
    )
}

#[tokio::test]
async fn test_resolver_over_http_agents() {
    let a = serve(solver_app(Some(json!({ "solution": "X9", "confidence": 0.9, "time": 40 })))).await;
    let b = serve(solver_app(Some(json!({ "solution": "X9", "confidence": 0.95 })))).await;
    let c = serve(solver_app(None)).await;

    let agents: Vec<Arc<dyn SolverAgent>> = [("a", a), ("b", b), ("c", c)]
        .into_iter()
        .map(|(id, url)| {
            Arc::new(HttpSolverAgent::new(id, url, TEST_TIMEOUT).unwrap()) as Arc<dyn SolverAgent>
        })
        .collect();
    let resolver = ConsensusResolver::new(agents, ConsensusConfig::default());

    let result = resolver
        .resolve(&SolveRequest {
            image: "aGVsbG8=".into(),
        })
        .await;

    assert_eq!(result.solution, "X9");
    assert_eq!(result.agreement_count, 2);
    assert_eq!(result.total_valid_votes, 2);
    assert!((result.confidence - 0.925).abs() < 1e-9);
    assert!(result.meets_threshold);
    assert_eq!(result.votes.len(), 3);
    let failed = result.votes.iter().find(|v| v.agent_id == "c").unwrap();
    assert!(failed.error.as_deref().unwrap_or_default().contains("500"));
}

async fn push_session(mut socket: WebSocket, frames: mpsc::UnboundedSender<String>) {
    let created = json!({
        "type": "task:created",
        "data": { "id": "t-push", "type": "form-fill", "payload": {} }
    });
    if socket
        .send(Message::Text(created.to_string().into()))
        .await
        .is_err()
    {
        return;
    }
    let _ = socket
        .send(Message::Text(r#"{"type":"worker:ping"}"#.into()))
        .await;

    while let Some(Ok(msg)) = socket.recv().await {
        if let Message::Text(text) = msg {
            let _ = frames.send(text.as_str().to_string());
            break;
        }
    }
}

fn push_app(frames: mpsc::UnboundedSender<String>, seen_ids: Shared) -> Router {
    Router::new().route(
        "/ws",
        get(
            move |ws: WebSocketUpgrade, Query(q): Query<HashMap<String, String>>| {
                let frames = frames.clone();
                let seen_ids = Arc::clone(&seen_ids);
                async move {
                    seen_ids.lock().unwrap().query = q;
                    let response: Response = ws.on_upgrade(move |socket| push_session(socket, frames));
                    response
                }
            },
        ),
    )
}

#[tokio::test]
async fn test_push_channel_delivers_in_order_and_sends_heartbeats() {
    let (frames_tx, mut frames_rx) = mpsc::unbounded_channel();
    let seen: Shared = Arc::default();
    let base = serve(push_app(frames_tx, Arc::clone(&seen))).await;
    let url = base.replace("http://", "ws://") + "/ws";

    let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
    let channel = PushChannel::open(&url, "w-5", Duration::from_millis(100), inbound_tx);

    let first = timeout(TEST_TIMEOUT, inbound_rx.recv()).await.unwrap().unwrap();
    match first {
        PushMessage::TaskCreated(task) => assert_eq!(task.id, "t-push"),
        other => panic!("expected task:created first, got {other:?}"),
    }
    let second = timeout(TEST_TIMEOUT, inbound_rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, PushMessage::WorkerPing);

    assert!(channel.is_connected());
    assert!(channel.sender().send_heartbeat("w-5"));
    let frame = timeout(TEST_TIMEOUT, frames_rx.recv()).await.unwrap().unwrap();
    let frame: Value = serde_json::from_str(&frame).unwrap();
    assert_eq!(frame["type"], "worker:heartbeat");
    assert_eq!(frame["data"]["worker_id"], "w-5");

    assert_eq!(
        seen.lock().unwrap().query.get("worker_id").map(String::as_str),
        Some("w-5")
    );

    channel.close().await;
}

#[tokio::test]
async fn test_push_channel_reconnects_after_server_close() {
    let (frames_tx, _frames_rx) = mpsc::unbounded_channel();
    let base = serve(push_app(frames_tx, Arc::default())).await;
    let url = base.replace("http://", "ws://") + "/ws";

    let (inbound_tx, mut inbound_rx) = mpsc::channel(8);
    let channel = PushChannel::open(&url, "w-6", Duration::from_millis(50), inbound_tx);

    // Each stub session hangs up after reading one frame from the worker.
    let mut created = 0;
    while created < 2 {
        let msg = timeout(TEST_TIMEOUT, inbound_rx.recv()).await.unwrap().unwrap();
        match msg {
            PushMessage::TaskCreated(_) => created += 1,
            PushMessage::WorkerPing => {
                channel.sender().send_heartbeat("w-6");
            }
            PushMessage::Unknown(kind) => panic!("unexpected {kind}"),
        }
    }
    channel.close().await;
}
