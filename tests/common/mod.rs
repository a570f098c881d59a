// tests/common/mod.rs
//
// In-process stand-in for the news provider: an axum router bound to
// 127.0.0.1:0 that records every request and answers with scripted
// status codes and bodies.
#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde_json::{json, Value};

use deepseeking::NewsApiConfig;

#[derive(Clone, Debug)]
pub struct Seen {
    pub path: &'static str,
    pub query: HashMap<String, String>,
    pub api_key: Option<String>,
}

pub struct MockState {
    pub top_status: Mutex<u16>,
    pub everything: Mutex<(u16, Value)>,
    pub seen: Mutex<Vec<Seen>>,
}

impl MockState {
    pub fn set_top_status(&self, code: u16) {
        *self.top_status.lock().unwrap() = code;
    }

    pub fn set_everything(&self, code: u16, body: Value) {
        *self.everything.lock().unwrap() = (code, body);
    }

    pub fn seen(&self, path: &str) -> Vec<Seen> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.path == path)
            .cloned()
            .collect()
    }
}

pub struct MockNews {
    pub base_url: String,
    pub state: Arc<MockState>,
}

fn record(s: &MockState, path: &'static str, query: HashMap<String, String>, headers: &HeaderMap) {
    let api_key = headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    s.seen.lock().unwrap().push(Seen {
        path,
        query,
        api_key,
    });
}

async fn top_headlines(
    State(s): State<Arc<MockState>>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    record(&s, "/top-headlines", q, &headers);
    let code = *s.top_status.lock().unwrap();
    (
        StatusCode::from_u16(code).unwrap(),
        Json(json!({ "status": "ok", "totalResults": 1, "articles": [] })),
    )
}

async fn everything(
    State(s): State<Arc<MockState>>,
    Query(q): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> (StatusCode, Json<Value>) {
    record(&s, "/everything", q, &headers);
    let (code, body) = s.everything.lock().unwrap().clone();
    (StatusCode::from_u16(code).unwrap(), Json(body))
}

pub async fn spawn_mock_news() -> MockNews {
    let state = Arc::new(MockState {
        top_status: Mutex::new(200),
        everything: Mutex::new((200, mock_response())),
        seen: Mutex::new(Vec::new()),
    });
    let app = Router::new()
        .route("/top-headlines", get(top_headlines))
        .route("/everything", get(everything))
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock provider");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("mock provider");
    });

    MockNews {
        base_url: format!("http://{addr}"),
        state,
    }
}

/// Address that refuses connections: bind, read the port, release it.
pub async fn dead_base_url() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{addr}")
}

pub fn collector_config(base_url: &str) -> NewsApiConfig {
    let mut cfg = NewsApiConfig::new("test_api_key");
    cfg.keywords = vec!["crypto".into(), "blockchain".into()];
    cfg.language = "en".into();
    cfg.max_articles = 10;
    cfg.base_url = base_url.to_string();
    cfg.timeout_secs = 5;
    cfg
}

fn article(n: u32, hour: u32) -> Value {
    json!({
        "source": { "id": "test", "name": "Test Source" },
        "author": "Test Author",
        "title": format!("Test Title {n}"),
        "description": format!("Test Description {n}"),
        "url": format!("https://test.com/{n}"),
        "urlToImage": format!("https://test.com/image{n}.jpg"),
        "publishedAt": format!("2024-01-27T{hour:02}:00:00Z"),
        "content": format!("Test content {n} ").repeat(20)
    })
}

pub fn mock_response() -> Value {
    json!({
        "status": "ok",
        "totalResults": 2,
        "articles": [article(1, 12), article(2, 13)]
    })
}
