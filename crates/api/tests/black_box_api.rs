use std::sync::Arc;
use std::time::Duration;

use axum::{Json, Router, routing::post};
use orderflow_api::app::{AppServices, build_app};
use orderflow_core::OwnerId;
use orderflow_fulfillment::BackoffPolicy;
use orderflow_infra::DispatcherConfig;
use orderflow_suppliers::{
    AdapterRegistry, CjAdapter, CredentialStore, GenericAdapter, InMemoryCredentialStore,
    SupplierHttp,
};
use reqwest::StatusCode;
use serde_json::{Value, json};

/// Ephemeral-port server that aborts on drop.
struct Spawned {
    base_url: String,
    handle: tokio::task::JoinHandle<()>,
}

impl Spawned {
    async fn serve(app: Router) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self {
            base_url: format!("http://{addr}"),
            handle,
        }
    }
}

impl Drop for Spawned {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

struct TestServer {
    api: Spawned,
    // Held so the fake supplier outlives the test.
    _cj: Spawned,
    client: reqwest::Client,
    owner: OwnerId,
}

/// Fake CJ endpoint that refuses every order as undeliverable.
async fn fake_cj() -> Spawned {
    Spawned::serve(Router::new().route(
        "/shopping/order/createOrder",
        post(|| async {
            Json(json!({
                "result": false,
                "code": 1603,
                "message": "Invalid shipping address",
            }))
        }),
    ))
    .await
}

impl TestServer {
    async fn spawn() -> Self {
        let cj = fake_cj().await;

        let credentials: Arc<dyn CredentialStore> = Arc::new(
            InMemoryCredentialStore::from_json_str(
                r#"[{"supplier": "cj", "credentials": {"kind": "access_token", "access_token": "test-token"}}]"#,
            )
            .unwrap(),
        );
        let mut adapters = AdapterRegistry::new();
        adapters.register(CjAdapter::new(
            SupplierHttp::new(Duration::from_secs(5)).unwrap(),
            &cj.base_url,
            credentials,
        ));
        adapters.register(GenericAdapter::new());

        let services = AppServices::in_memory(
            adapters,
            DispatcherConfig::default().with_backoff(BackoffPolicy::new(
                Duration::ZERO,
                Duration::ZERO,
                Duration::ZERO,
            )),
        );
        let api = Spawned::serve(build_app(Arc::new(services))).await;

        Self {
            api,
            _cj: cj,
            client: reqwest::Client::new(),
            owner: OwnerId::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api.base_url, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(self.url(path))
            .header("x-owner-id", self.owner.to_string())
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(self.url(path))
            .header("x-owner-id", self.owner.to_string())
    }

    async fn enqueue(&self, order_id: &str, supplier: &str) -> reqwest::Response {
        self.post("/queue")
            .json(&json!({
                "order_id": order_id,
                "supplier_type": supplier,
                "payload": {
                    "order_number": order_id,
                    "shipping": {
                        "name": "Ada Lovelace",
                        "address1": "12 Analytical Row",
                        "city": "London",
                        "zip": "N1 9GU",
                        "country_code": "GB",
                    },
                    "items": [{"sku": "SKU-1", "variant_id": "VID-1", "quantity": 2}],
                },
            }))
            .send()
            .await
            .unwrap()
    }

    async fn process(&self) -> Value {
        let res = self
            .client
            .post(self.url("/internal/process"))
            .json(&json!({ "batch_size": 10 }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }

    async fn status_of(&self, order_id: &str) -> Value {
        let res = self
            .get(&format!("/queue?order_id={order_id}"))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }
}

#[tokio::test]
async fn owner_header_is_required_for_queue_routes() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/queue")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .get(srv.url("/queue"))
        .header("x-owner-id", "nobody")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["storage"], "in_memory");
}

#[tokio::test]
async fn enqueue_is_idempotent_and_validated() {
    let srv = TestServer::spawn().await;

    let res = srv.enqueue("1042", "generic").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let created: Value = res.json().await.unwrap();
    assert_eq!(created["success"], true);

    let res = srv.enqueue("1042", "generic").await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let dup: Value = res.json().await.unwrap();
    assert_eq!(dup["success"], false);
    assert_eq!(dup["error"], "already queued");
    assert_eq!(dup["queue_id"], created["queue_id"]);

    let res = srv.enqueue("1043", "temu").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv.enqueue("   ", "cj").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let status = srv.get("/queue").send().await.unwrap();
    let body: Value = status.json().await.unwrap();
    assert_eq!(body["items"].as_array().unwrap().len(), 1);
    assert_eq!(body["stats"]["pending"], 1);
}

#[tokio::test]
async fn generic_order_completes_for_manual_placement() {
    let srv = TestServer::spawn().await;
    srv.enqueue("1042", "generic").await;

    let report = srv.process().await;
    assert_eq!(report["processed"], 1);
    assert_eq!(report["results"][0]["success"], true);

    let body = srv.status_of("1042").await;
    let item = &body["items"][0];
    assert_eq!(item["status"], "completed");
    assert_eq!(item["result"]["supplier_order_id"], "MANUAL-1042");
    assert_eq!(body["stats"]["completed"], 1);

    // Nothing left to do.
    assert_eq!(srv.process().await["processed"], 0);
}

#[tokio::test]
async fn rejected_order_fails_and_can_be_requeued_then_cancelled() {
    let srv = TestServer::spawn().await;
    let created: Value = srv.enqueue("2001", "cj").await.json().await.unwrap();
    let id = created["queue_id"].as_str().unwrap().to_string();

    let report = srv.process().await;
    assert_eq!(report["results"][0]["success"], false);

    let body = srv.status_of("2001").await;
    let item = &body["items"][0];
    assert_eq!(item["status"], "failed");
    assert_eq!(item["attempt"], 1);
    assert_eq!(item["failure_kind"], "permanent");

    let res = srv.post(&format!("/queue/{id}/retry")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let requeued: Value = res.json().await.unwrap();
    assert_eq!(requeued["status"], "pending");
    assert_eq!(requeued["attempt"], 0);

    let res = srv.post(&format!("/queue/{id}/cancel")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let cancelled: Value = res.json().await.unwrap();
    assert_eq!(cancelled["status"], "cancelled");

    let res = srv.post(&format!("/queue/{id}/retry")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);
    let err: Value = res.json().await.unwrap();
    assert_eq!(err["error"], "not_retryable");

    let res = srv.get(&format!("/queue/{id}/events")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let events: Value = res.json().await.unwrap();
    let types: Vec<&str> = events["items"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["event_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["order_failed", "requeued", "cancelled"]);
}

#[tokio::test]
async fn items_are_invisible_to_other_owners() {
    let srv = TestServer::spawn().await;
    let created: Value = srv.enqueue("3001", "generic").await.json().await.unwrap();
    let id = created["queue_id"].as_str().unwrap().to_string();

    let stranger = OwnerId::new().to_string();
    let res = srv
        .client
        .post(srv.url(&format!("/queue/{id}/cancel")))
        .header("x-owner-id", &stranger)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv
        .client
        .get(srv.url("/queue"))
        .header("x-owner-id", &stranger)
        .send()
        .await
        .unwrap();
    let body: Value = res.json().await.unwrap();
    assert!(body["items"].as_array().unwrap().is_empty());

    let res = srv.post("/queue/not-a-uuid/cancel").send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}
