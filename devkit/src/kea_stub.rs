/*!
Mock Kea Control Agent for development without a Kea server

Serves scripted answers on `POST /`. Every request body is recorded.

Answer selection:
- `statistic-get` for a name registered with `set_statistic*` gets the
  registered answer, whatever the request order
- anything else pops the next scripted answer (FIFO)
- with nothing scripted the agent answers HTTP 500 with a plain text body
*/

use anyhow::Result;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::kea_fixtures::KeaFixtures;

#[derive(Debug, Clone)]
enum ScriptedAnswer {
    Json(Value),
    Raw(String),
    Delayed(Duration, Value),
}

#[derive(Debug, Default)]
struct AgentState {
    queue: VecDeque<ScriptedAnswer>,
    statistics: HashMap<String, Value>,
    requests: Vec<Value>,
}

type SharedState = Arc<Mutex<AgentState>>;

/// HTTP server imitating a Kea Control Agent
pub struct MockControlAgent {
    address: SocketAddr,
    state: SharedState,
    server: Option<JoinHandle<()>>,
}

impl MockControlAgent {
    /// Bind on a random local port and start serving.
    pub async fn start() -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let address = listener.local_addr()?;
        let state = SharedState::default();

        let app = Router::new()
            .route("/", post(handle_command))
            .with_state(state.clone());

        let server = tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, app).await {
                log::error!("[MOCK KEA] server stopped: {}", e);
            }
        });

        log::info!("🧪 [MOCK KEA] Control Agent listening on {}", address);
        Ok(Self { address, state, server: Some(server) })
    }

    /// Base URL, e.g. `http://127.0.0.1:40123/`
    pub fn url(&self) -> String {
        format!("http://{}/", self.address)
    }

    pub fn address(&self) -> String {
        self.address.ip().to_string()
    }

    pub fn port(&self) -> u16 {
        self.address.port()
    }

    /// Queue a JSON answer
    pub fn enqueue_json(&self, answer: Value) {
        self.state.lock().queue.push_back(ScriptedAnswer::Json(answer));
    }

    /// Queue a raw (non JSON) body
    pub fn enqueue_raw<S: Into<String>>(&self, body: S) {
        self.state.lock().queue.push_back(ScriptedAnswer::Raw(body.into()));
    }

    /// Queue a JSON answer sent after `delay`
    pub fn enqueue_delayed(&self, delay: Duration, answer: Value) {
        self.state.lock().queue.push_back(ScriptedAnswer::Delayed(delay, answer));
    }

    /// Answer `statistic-get` for `name` with a successful time series
    pub fn set_statistic(&self, name: &str, samples: &[(i64, &str)]) {
        self.set_statistic_response(name, KeaFixtures::statistic_response(name, samples));
    }

    /// Answer `statistic-get` for `name` with an arbitrary answer
    pub fn set_statistic_response(&self, name: &str, answer: Value) {
        self.state.lock().statistics.insert(name.to_string(), answer);
    }

    /// Bodies of all requests received so far
    pub fn requests(&self) -> Vec<Value> {
        self.state.lock().requests.clone()
    }

    /// Commands received so far, in order
    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .requests
            .iter()
            .map(|request| request["command"].as_str().unwrap_or_default().to_string())
            .collect()
    }

    /// Scripted answers not consumed yet
    pub fn pending(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Stop serving. The port refuses connections afterwards.
    pub async fn shutdown(mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
            let _ = server.await;
        }
        log::info!("🛑 [MOCK KEA] Control Agent on {} stopped", self.address);
    }
}

impl Drop for MockControlAgent {
    fn drop(&mut self) {
        if let Some(server) = self.server.take() {
            server.abort();
        }
    }
}

async fn handle_command(State(state): State<SharedState>, body: Bytes) -> Response {
    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let answer = {
        let mut state = state.lock();
        state.requests.push(request.clone());

        let registered = if request["command"] == "statistic-get" {
            request["arguments"]["name"]
                .as_str()
                .and_then(|name| state.statistics.get(name).cloned())
        } else {
            None
        };
        registered.map(ScriptedAnswer::Json).or_else(|| state.queue.pop_front())
    };

    log::info!("📥 [MOCK KEA] {}", request["command"]);

    match answer {
        Some(ScriptedAnswer::Json(answer)) => json_response(answer),
        Some(ScriptedAnswer::Raw(body)) => (StatusCode::OK, body).into_response(),
        Some(ScriptedAnswer::Delayed(delay, answer)) => {
            tokio::time::sleep(delay).await;
            json_response(answer)
        }
        None => {
            log::warn!("⚠️ [MOCK KEA] no scripted answer left");
            (StatusCode::INTERNAL_SERVER_ERROR, "no scripted answer").into_response()
        }
    }
}

fn json_response(answer: Value) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        answer.to_string(),
    )
        .into_response()
}
