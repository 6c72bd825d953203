//! HTTP tests against a real server on an ephemeral port.
//!
//! Run with: `cargo test -p narrative-ai --test http_api`

use narrative_ai::{router, AppState};
use narrative_core::testing::MockScene;
use narrative_core::{Choice, MemoryStore, MockGenerator, NarrativeService};
use reqwest::StatusCode;
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::net::TcpListener;

struct TestServer {
    base: String,
    client: reqwest::Client,
    generator: Arc<MockGenerator>,
}

impl TestServer {
    async fn start() -> Self {
        let generator = Arc::new(MockGenerator::new());
        let service = NarrativeService::new(generator.clone(), Arc::new(MemoryStore::new()));

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = router(AppState::new(service));
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            generator,
        }
    }

    async fn post(&self, path: &str, body: Value) -> (StatusCode, Value) {
        let response = self
            .client
            .post(format!("{}{path}", self.base))
            .json(&body)
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        let response = self
            .client
            .get(format!("{}{path}", self.base))
            .send()
            .await
            .unwrap();
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

#[tokio::test]
async fn test_health() {
    let server = TestServer::start().await;
    let (status, body) = server.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"status": "healthy", "service": "narrative-ai"}));
}

#[tokio::test]
async fn test_scene_choices_and_state() {
    let server = TestServer::start().await;
    server
        .generator
        .expect_scene(MockScene::with_updates(
            "Fog rolls over the moor.",
            json!({"location": "moor"}),
        ))
        .await;
    server
        .generator
        .expect_choices(vec![
            Choice::new("follow", "Follow the lantern"),
            Choice::new("camp", "Make camp"),
        ])
        .await;

    let (status, scene) = server
        .post(
            "/api/generate/scene",
            json!({"story_id": "moor", "user_context": {"genre": "gothic"}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(scene["text"], "Fog rolls over the moor.");
    assert_eq!(scene["metadata"]["story_id"], "moor");
    assert!(scene["metadata"]["model"].is_string());
    assert!(scene["metadata"]["tokens_used"].is_number());

    let (status, choices) = server
        .post(
            "/api/generate/choices",
            json!({"story_id": "moor", "current_scene": "scene_1", "user_context": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(choices["ended"], false);
    assert_eq!(
        choices["choices"],
        json!([
            {"id": "follow", "text": "Follow the lantern"},
            {"id": "camp", "text": "Make camp"}
        ])
    );

    let (status, story) = server.get("/api/story/moor").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(story["story_id"], "moor");
    assert_eq!(story["state"]["location"], "moor");
    assert_eq!(story["status"], "active");
    assert_eq!(story["turn"], 1);
    assert!(story.get("message").is_none());
}

#[tokio::test]
async fn test_ended_story_over_http() {
    let server = TestServer::start().await;
    server.generator.expect_ending(Some("The end.")).await;

    server
        .post(
            "/api/generate/scene",
            json!({"story_id": "brief", "user_context": {}}),
        )
        .await;
    let (status, body) = server
        .post(
            "/api/generate/choices",
            json!({"story_id": "brief", "current_scene": "scene_1", "user_context": {}}),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ended"], true);
    assert_eq!(body["choices"], json!([]));
    assert_eq!(body["metadata"]["epilogue"], "The end.");

    let (_, story) = server.get("/api/story/brief").await;
    assert_eq!(story["status"], "ended");
}

#[tokio::test]
async fn test_error_responses() {
    let server = TestServer::start().await;

    let (status, body) = server
        .post(
            "/api/generate/scene",
            json!({"story_id": "", "user_context": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_input");
    assert!(body["error"]["message"].is_string());

    let (status, body) = server.get("/api/story/unknown").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");

    let (status, body) = server
        .post(
            "/api/generate/choices",
            json!({"story_id": "unknown", "current_scene": "scene_1", "user_context": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["kind"], "not_found");

    server.generator.expect_scene(MockScene::text("")).await;
    let (status, body) = server
        .post(
            "/api/generate/scene",
            json!({"story_id": "blank", "user_context": {}}),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["error"]["kind"], "generation_failure");
}

#[tokio::test]
async fn test_malformed_body_is_invalid_input() {
    let server = TestServer::start().await;

    let response = server
        .client
        .post(format!("{}/api/generate/scene", server.base))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["error"]["kind"], "invalid_input");

    let (status, body) = server
        .post("/api/generate/scene", json!({"user_context": {}}))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["kind"], "invalid_input");
}
