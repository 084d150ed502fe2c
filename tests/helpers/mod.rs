#![allow(dead_code)] // Test helpers appear unused when compiled independently

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;

const WAIT_ATTEMPTS: usize = 50;
const WAIT_DELAY: Duration = Duration::from_millis(100);

/// Find an available TCP port
pub async fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .await
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Best-effort check for whether binding to loopback is permitted in the current sandbox.
pub async fn can_bind_loopback() -> bool {
    match TcpListener::bind("127.0.0.1:0").await {
        Ok(listener) => {
            drop(listener);
            true
        }
        Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => false,
        Err(_) => true, // treat other errors as non-fatal for skipping
    }
}

/// Wait for a server to respond to /health
pub async fn wait_for_health(client: &Client, base_url: &str) {
    poll_until(|| async {
        client
            .get(format!("{}/health", base_url))
            .send()
            .await
            .ok()
            .map(|_| ())
    })
    .await
    .unwrap_or_else(|| panic!("timed out waiting for {} to be healthy", base_url));
}

pub async fn poll_until<T, F, Fut>(mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for _ in 0..WAIT_ATTEMPTS {
        if let Some(result) = f().await {
            return Some(result);
        }
        tokio::time::sleep(WAIT_DELAY).await;
    }
    None
}

/// Spawn the bridge under test against the given mock services, with timings
/// tightened for test speed. Returns its base URL.
pub async fn spawn_bridge(broker_url: &str, kv_url: &str) -> String {
    use streambridge::broker::RestProxyClient;
    use streambridge::cache::KvStoreClient;
    use streambridge::{build_router, Bridge, BridgeConfig};

    let broker = Arc::new(RestProxyClient::new(broker_url).expect("broker client"));
    let cache = Arc::new(KvStoreClient::new(kv_url).expect("kv client"));
    let config = BridgeConfig {
        consume_deadline: Duration::from_millis(500),
        grace_period: Duration::from_secs(1),
        ..BridgeConfig::default()
    };
    let bridge = Arc::new(Bridge::new(broker.clone(), broker, cache, config));

    let port = free_port().await;
    let listener = TcpListener::bind(format!("127.0.0.1:{}", port))
        .await
        .expect("failed to bind bridge listener");
    tokio::spawn(async move {
        axum::serve(listener, build_router(bridge)).await.unwrap();
    });

    format!("http://127.0.0.1:{}", port)
}

// ---------------------------------------------------------------------------
// Mock broker REST proxy
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct BrokerState {
    base_url: String,
    messages: Arc<Mutex<Vec<Vec<u8>>>>,
    // cursor per live consumer instance, keyed by "{group}/{instance}"
    cursors: Arc<Mutex<HashMap<String, usize>>>,
    created: Arc<Mutex<usize>>,
}

pub struct MockBroker {
    pub url: String,
    state: BrokerState,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockBroker {
    /// Messages published to the mock, oldest first
    pub async fn messages(&self) -> Vec<Vec<u8>> {
        self.state.messages.lock().await.clone()
    }

    /// Seed topic history without going through the bridge
    pub async fn publish_raw(&self, value: &[u8]) {
        self.state.messages.lock().await.push(value.to_vec());
    }

    /// Consumer instances created since startup
    pub async fn instances_created(&self) -> usize {
        *self.state.created.lock().await
    }

    /// Consumer instances that have not been deleted yet
    pub async fn live_instances(&self) -> usize {
        self.state.cursors.lock().await.len()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Spawn a mock Kafka REST proxy speaking the v2 binary subset the bridge uses
pub async fn spawn_mock_broker(port: u16) -> MockBroker {
    let url = format!("http://127.0.0.1:{}", port);
    let state = BrokerState {
        base_url: url.clone(),
        messages: Arc::new(Mutex::new(Vec::new())),
        cursors: Arc::new(Mutex::new(HashMap::new())),
        created: Arc::new(Mutex::new(0)),
    };

    let app = Router::new()
        .route("/topics", get(list_topics))
        .route("/topics/:topic", post(produce))
        .route("/consumers/:group", post(create_instance))
        .route(
            "/consumers/:group/instances/:id/assignments",
            post(accept_no_content),
        )
        .route(
            "/consumers/:group/instances/:id/positions/beginning",
            post(seek_beginning),
        )
        .route(
            "/consumers/:group/instances/:id/positions/end",
            post(seek_end),
        )
        .route("/consumers/:group/instances/:id/records", get(fetch_records))
        .route("/consumers/:group/instances/:id", delete(delete_instance))
        .with_state(state.clone());

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind mock broker listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock broker server error: {}", err);
        }
    });

    MockBroker {
        url,
        state,
        shutdown_tx,
        handle,
    }
}

async fn list_topics() -> Json<Value> {
    Json(json!(["data-topic"]))
}

async fn produce(
    State(state): State<BrokerState>,
    Path(_topic): Path<String>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, StatusCode> {
    let encoded = body["records"][0]["value"]
        .as_str()
        .ok_or(StatusCode::UNPROCESSABLE_ENTITY)?;
    let value = BASE64
        .decode(encoded)
        .map_err(|_| StatusCode::UNPROCESSABLE_ENTITY)?;

    let mut messages = state.messages.lock().await;
    messages.push(value);
    let offset = messages.len() - 1;

    Ok(Json(json!({
        "offsets": [{ "partition": 0, "offset": offset, "error": null }],
    })))
}

async fn create_instance(
    State(state): State<BrokerState>,
    Path(group): Path<String>,
) -> Json<Value> {
    let mut created = state.created.lock().await;
    *created += 1;
    let id = format!("instance-{}", created);
    drop(created);

    state
        .cursors
        .lock()
        .await
        .insert(format!("{}/{}", group, id), 0);

    Json(json!({
        "instance_id": id,
        "base_uri": format!("{}/consumers/{}/instances/{}", state.base_url, group, id),
    }))
}

async fn accept_no_content() -> StatusCode {
    StatusCode::NO_CONTENT
}

async fn seek_beginning(
    State(state): State<BrokerState>,
    Path((group, id)): Path<(String, String)>,
) -> StatusCode {
    match state.cursors.lock().await.get_mut(&format!("{}/{}", group, id)) {
        Some(cursor) => {
            *cursor = 0;
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn seek_end(
    State(state): State<BrokerState>,
    Path((group, id)): Path<(String, String)>,
) -> StatusCode {
    let end = state.messages.lock().await.len();
    match state.cursors.lock().await.get_mut(&format!("{}/{}", group, id)) {
        Some(cursor) => {
            *cursor = end;
            StatusCode::NO_CONTENT
        }
        None => StatusCode::NOT_FOUND,
    }
}

async fn fetch_records(
    State(state): State<BrokerState>,
    Path((group, id)): Path<(String, String)>,
) -> Result<Json<Value>, StatusCode> {
    let messages = state.messages.lock().await.clone();
    let mut cursors = state.cursors.lock().await;
    let cursor = cursors
        .get_mut(&format!("{}/{}", group, id))
        .ok_or(StatusCode::NOT_FOUND)?;

    let records: Vec<Value> = messages[*cursor..]
        .iter()
        .enumerate()
        .map(|(i, value)| {
            json!({
                "topic": "data-topic",
                "key": null,
                "value": BASE64.encode(value),
                "partition": 0,
                "offset": *cursor + i,
            })
        })
        .collect();
    *cursor = messages.len();
    drop(cursors);

    if records.is_empty() {
        // crude stand-in for the proxy's long poll
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    Ok(Json(json!(records)))
}

async fn delete_instance(
    State(state): State<BrokerState>,
    Path((group, id)): Path<(String, String)>,
) -> StatusCode {
    match state
        .cursors
        .lock()
        .await
        .remove(&format!("{}/{}", group, id))
    {
        Some(_) => StatusCode::NO_CONTENT,
        None => StatusCode::NOT_FOUND,
    }
}

// ---------------------------------------------------------------------------
// Mock key-value store
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct KvState {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

pub struct MockKv {
    pub url: String,
    state: KvState,
    shutdown_tx: oneshot::Sender<()>,
    handle: JoinHandle<()>,
}

impl MockKv {
    pub async fn entry(&self, key: &str) -> Option<Vec<u8>> {
        self.state.entries.lock().await.get(key).cloned()
    }

    pub async fn stop(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.handle.await;
    }
}

/// Spawn a mock raw-value KV store (GET/PUT /values/{key})
pub async fn spawn_mock_kv(port: u16) -> MockKv {
    let state = KvState {
        entries: Arc::new(Mutex::new(HashMap::new())),
    };

    let app = Router::new()
        .route("/values/:key", get(kv_get).put(kv_put))
        .with_state(state.clone());

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .expect("failed to bind mock kv listener");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });
        if let Err(err) = server.await {
            eprintln!("mock kv server error: {}", err);
        }
    });

    MockKv {
        url: format!("http://127.0.0.1:{}", port),
        state,
        shutdown_tx,
        handle,
    }
}

async fn kv_get(
    State(state): State<KvState>,
    Path(key): Path<String>,
) -> Result<Vec<u8>, StatusCode> {
    state
        .entries
        .lock()
        .await
        .get(&key)
        .cloned()
        .ok_or(StatusCode::NOT_FOUND)
}

async fn kv_put(
    State(state): State<KvState>,
    Path(key): Path<String>,
    body: axum::body::Bytes,
) -> StatusCode {
    state.entries.lock().await.insert(key, body.to_vec());
    StatusCode::NO_CONTENT
}
