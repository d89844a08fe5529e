use std::net::SocketAddr;
use std::sync::Arc;

use delve_core::{
    build_router, research_graph, GraphExecutor, MemoryTier, PathRouter, ResearchOptions,
    ServerConfig, SqliteTier,
};
use delve_protocol::{decode_frames, SseFrame, ThreadStateResponse};
use serde_json::json;
use tokio::net::TcpListener;

// ── Helpers ──────────────────────────────────────────────────────────

async fn start_server(options: ResearchOptions) -> SocketAddr {
    let router = PathRouter::new(Arc::new(MemoryTier::ephemeral()))
        .with_route("/memories/", Arc::new(SqliteTier::open_memory().unwrap()))
        .unwrap();
    let executor = GraphExecutor::new(research_graph(options).unwrap(), Arc::new(router));
    let app = build_router(ServerConfig::default(), Arc::new(executor));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn health_over_tcp() {
    let addr = start_server(ResearchOptions::default()).await;
    let body = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn run_then_resume_over_tcp() {
    let addr = start_server(ResearchOptions::default()).await;
    let client = reqwest::Client::new();
    let url = format!("http://{addr}/threads/live-1/runs/stream");

    let response = client
        .post(&url)
        .json(&json!({
            "input": {"messages": [{"type": "human", "content": "Compare SSE and websockets"}]},
            "stream_mode": ["updates"]
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(
        response.headers()["content-type"].to_str().unwrap(),
        "text/event-stream"
    );
    let frames = decode_frames(&response.text().await.unwrap()).unwrap();
    assert_eq!(frames.last(), Some(&SseFrame::end()));
    assert!(frames[..frames.len() - 1].iter().all(|f| f.event == "updates"));

    let text = client
        .post(&url)
        .json(&json!({"command": {"resume": {"approved": true}}}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    let frames = decode_frames(&text).unwrap();
    assert_eq!(frames.last(), Some(&SseFrame::end()));

    let state: ThreadStateResponse = client
        .get(format!("http://{addr}/threads/live-1/state"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(state.values["published"], "/memories/live-1/final_report.md");
}
