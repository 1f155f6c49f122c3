//! HTTP endpoints served on an ephemeral port.

mod fixtures;

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use clm_workflow::api::{self, AppState, USER_HEADER};
use clm_workflow::shutdown::ShutdownCoordinator;
use fixtures::*;

struct TestServer {
    base: String,
    client: reqwest::Client,
    shutdown: ShutdownCoordinator,
    task: JoinHandle<anyhow::Result<()>>,
    db: TestDb,
}

impl TestServer {
    async fn start(current_step: i64) -> Self {
        let db = seeded_db(current_step).await;
        let state = Arc::new(AppState::new(db.engine.clone(), Duration::from_secs(60)));
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base = format!("http://{}", listener.local_addr().unwrap());

        let shutdown = ShutdownCoordinator::new();
        let task = tokio::spawn(api::serve_on(listener, state, shutdown.wait()));

        Self {
            base,
            client: reqwest::Client::new(),
            shutdown,
            task,
            db,
        }
    }

    fn post(&self, path: &str, user_id: i64) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{}", self.base, path))
            .header(USER_HEADER, user_id.to_string())
    }

    fn get(&self, path: &str, user_id: i64) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{}", self.base, path))
            .header(USER_HEADER, user_id.to_string())
    }

    async fn stop(self) {
        self.shutdown.trigger();
        self.task.await.unwrap().unwrap();
    }
}

async fn send(request: reqwest::RequestBuilder) -> (u16, Value) {
    let response = request.send().await.unwrap();
    let status = response.status().as_u16();
    (status, response.json().await.unwrap())
}

#[tokio::test]
async fn decision_endpoint_approves_and_reports() {
    let server = TestServer::start(1).await;

    let (status, body) = send(server.post("/api/workflows/decision", FIRST_APPROVER).json(&json!({
        "contract_id": CONTRACT,
        "request_type": "approval",
        "action": "approve",
        "comments": "Fine by legal"
    })))
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Sent to Ben Reviewer for further approval");
    assert_eq!(instance_state(server.db.pool(), INSTANCE).await.0, 2);
    server.stop().await;
}

#[tokio::test]
async fn decision_endpoint_maps_errors() {
    let server = TestServer::start(1).await;

    let (status, body) = send(server.post("/api/workflows/decision", FIRST_APPROVER).json(&json!({
        "contract_id": CONTRACT,
        "request_type": "approval",
        "action": "maybe"
    })))
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    let (status, body) = send(server.post("/api/workflows/decision", FIRST_APPROVER).json(&json!({
        "contract_id": 999,
        "request_type": "approval",
        "action": "approve"
    })))
    .await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);

    let (status, body) = send(
        server
            .post("/api/workflows/decision", FIRST_APPROVER)
            .header("content-type", "application/json")
            .body("{\"contract_id\": \"one\"}"),
    )
    .await;
    assert_eq!(status, 400);
    assert_eq!(body["success"], false);

    assert_eq!(count(server.db.pool(), "SELECT COUNT(*) FROM audit_logs").await, 0);
    server.stop().await;
}

#[tokio::test]
async fn unknown_or_missing_caller_is_unauthorized() {
    let server = TestServer::start(1).await;
    let payload = json!({ "contract_id": CONTRACT, "request_type": "approval", "action": "approve" });

    let (status, body) = send(server.post("/api/workflows/decision", 4040).json(&payload)).await;
    assert_eq!(status, 401);
    assert_eq!(body["success"], false);

    let (status, _) = send(
        server
            .client
            .post(format!("{}/api/workflows/decision", server.base))
            .json(&payload),
    )
    .await;
    assert_eq!(status, 401);
    server.stop().await;
}

#[tokio::test]
async fn negotiation_endpoint_returns_contract_id() {
    let server = TestServer::start(1).await;

    let (status, body) = send(server.post("/api/negotiation/initiate", FIRST_APPROVER).json(&json!({
        "contract_id": CONTRACT,
        "comments": "Counter-proposal attached"
    })))
    .await;

    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["message"], "Negotiation initiated successfully");
    assert_eq!(body["contract_id"], CONTRACT);
    server.stop().await;
}

#[tokio::test]
async fn history_endpoint_lists_decisions_for_own_company_only() {
    let server = TestServer::start(1).await;
    send(server.post("/api/workflows/decision", FIRST_APPROVER).json(&json!({
        "contract_id": CONTRACT,
        "request_type": "approval",
        "action": "approve",
        "comments": "Fine by legal"
    })))
    .await;

    let path = format!("/api/contracts/{CONTRACT}/workflow-history");
    let (status, body) = send(server.get(&path, CREATOR)).await;
    assert_eq!(status, 200);
    assert_eq!(body["success"], true);
    assert_eq!(body["contract"]["number"], "CT-100");
    assert_eq!(body["total"], 1);
    let entry = &body["data"][0];
    assert_eq!(entry["action"], "approve");
    assert_eq!(entry["comment"], "Fine by legal");
    assert_eq!(entry["workflow_step"], 1);
    assert_eq!(entry["user"]["name"], "Ada Approver");
    assert_eq!(entry["user"]["department"], "Legal");

    let (status, body) = send(server.get(&path, OUTSIDER)).await;
    assert_eq!(status, 403);
    assert_eq!(body["success"], false);
    server.stop().await;
}

#[tokio::test]
async fn health_and_fallback() {
    let server = TestServer::start(1).await;

    let (status, body) = send(server.client.get(format!("{}/health", server.base))).await;
    assert_eq!(status, 200);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(server.get("/api/nowhere", FIRST_APPROVER)).await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    server.stop().await;
}
