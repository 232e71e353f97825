use std::sync::Arc;

use relayq_api::app::services::AppServices;
use relayq_core::RequestHandle;
use relayq_infra::secrets::InMemorySecretStore;
use relayq_infra::{InMemoryTransport, QueueConfig};
use reqwest::StatusCode;
use serde_json::json;

struct TestServer {
    base_url: String,
    transport: Arc<InMemoryTransport>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        Self::spawn_with(InMemorySecretStore::with_dispatch_secrets(
            "test-key",
            "https://consumer.test",
        ))
        .await
    }

    async fn spawn_with(secrets: InMemorySecretStore) -> Self {
        // Same router as prod, in-memory store, scripted transport.
        let transport = Arc::new(InMemoryTransport::new());
        let services = AppServices::in_memory(
            transport.clone(),
            Arc::new(secrets),
            &QueueConfig::default(),
        );
        let app = relayq_api::app::build_app(Arc::new(services));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            transport,
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn create_job(
    client: &reqwest::Client,
    srv: &TestServer,
    body: serde_json::Value,
) -> reqwest::Response {
    client
        .post(srv.url("/jobs"))
        .json(&body)
        .send()
        .await
        .unwrap()
}

async fn job_eventually(
    client: &reqwest::Client,
    srv: &TestServer,
    id: i64,
    status: &str,
) -> serde_json::Value {
    // Collector runs are spawned in the background; poll briefly.
    for _ in 0..100 {
        let res = client
            .get(srv.url(&format!("/jobs/{id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        let body: serde_json::Value = res.json().await.unwrap();
        if body["status"] == status {
            return body;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }

    panic!("job {id} did not reach status {status} within timeout");
}

#[tokio::test]
async fn health_is_ok() {
    let srv = TestServer::spawn().await;
    let res = reqwest::get(srv.url("/health")).await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn create_job_dispatches_before_responding() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = create_job(
        &client,
        &srv,
        json!({ "verb": "POST", "url_path": "/ingest", "payload": { "x": 1 }, "retry_limit": 3 }),
    )
    .await;
    assert_eq!(res.status(), StatusCode::CREATED);

    let created: serde_json::Value = res.json().await.unwrap();
    assert_eq!(created["status"], "processing");
    assert_eq!(created["retry_count"], 0);
    assert!(created["id"].as_i64().unwrap() > 0);

    let (_, request) = srv.transport.last_sent().unwrap();
    assert_eq!(request.url, "https://consumer.test/ingest");
    assert_eq!(request.header("authorization"), Some("Bearer test-key"));
    assert_eq!(request.body, json!({ "x": 1 }));
}

#[tokio::test]
async fn unsupported_verb_is_rejected() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = create_job(&client, &srv, json!({ "verb": "PUT", "url_path": "/x" })).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(srv.transport.sent_count(), 0);
}

#[tokio::test]
async fn missing_secret_fails_creation_and_leaves_no_job() {
    let srv = TestServer::spawn_with(InMemorySecretStore::new()).await;
    let client = reqwest::Client::new();

    let res = create_job(&client, &srv, json!({ "verb": "GET", "url_path": "/x" })).await;
    assert_eq!(res.status(), StatusCode::BAD_GATEWAY);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "secret_error");

    let stats: serde_json::Value = client
        .get(srv.url("/stats"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(stats["jobs"]["pending"], 0);
    assert_eq!(stats["jobs"]["processing"], 0);
}

#[tokio::test]
async fn unknown_and_malformed_job_ids() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/jobs/9999")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "not_found");

    let res = client.get(srv.url("/jobs/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn collect_trigger_completes_a_resolved_job() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = create_job(
        &client,
        &srv,
        json!({ "verb": "GET", "url_path": "/report" }),
    )
    .await
    .json()
    .await
    .unwrap();
    let id = created["id"].as_i64().unwrap();

    let (handle, _) = srv.transport.last_sent().unwrap();
    srv.transport.respond(handle, 200, "ok");

    let res = client.post(srv.url("/tasks/collect")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["started"], true);

    let job = job_eventually(&client, &srv, id, "complete").await;
    assert_eq!(job["result_body"], "ok");
    assert_eq!(job["retry_count"], 0);
}

#[tokio::test]
async fn failed_job_is_retried_through_the_reap_trigger() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let created: serde_json::Value = create_job(
        &client,
        &srv,
        json!({ "verb": "DELETE", "url_path": "/item/1", "retry_limit": 2 }),
    )
    .await
    .json()
    .await
    .unwrap();
    let id = created["id"].as_i64().unwrap();

    srv.transport.respond(RequestHandle::new(1), 500, "boom");
    client.post(srv.url("/tasks/collect")).send().await.unwrap();
    let job = job_eventually(&client, &srv, id, "failed").await;
    assert_eq!(job["retry_count"], 1);

    let res = client.post(srv.url("/tasks/reap")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let job = job_eventually(&client, &srv, id, "processing").await;
    assert_eq!(job["retry_count"], 1);
    assert_eq!(srv.transport.sent_count(), 2);
}

#[tokio::test]
async fn stats_report_counts_and_worker_tokens() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    for path in ["/a", "/b"] {
        let res = create_job(&client, &srv, json!({ "verb": "POST", "url_path": path })).await;
        assert_eq!(res.status(), StatusCode::CREATED);
    }

    let res = client.get(srv.url("/stats")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let stats: serde_json::Value = res.json().await.unwrap();
    assert_eq!(stats["jobs"]["processing"], 2);
    assert_eq!(stats["jobs"]["in_flight_requests"], 2);
    assert_eq!(stats["worker_tokens"]["size"], 5);
}
