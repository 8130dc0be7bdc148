//! Admin HTTP API on the secondary port

use fabrickv::common::{MetricsRegistry, StoreLimits};
use fabrickv::protocol::Status;
use fabrickv::server::admin::{create_router, AdminState};
use fabrickv::server::{Acl, KeyStore};
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

struct Admin {
    base: String,
    state: AdminState,
}

async fn start_admin(rules: &[&str]) -> Admin {
    let state = AdminState {
        store: Arc::new(KeyStore::new(StoreLimits::default())),
        acl: Arc::new(Acl::from_rules(rules).unwrap()),
        metrics: Arc::new(MetricsRegistry::new()),
    };
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    Admin {
        base: format!("http://{}", addr),
        state,
    }
}

#[tokio::test]
async fn test_ping_and_version() {
    let admin = start_admin(&["any"]).await;
    let client = Client::new();

    let resp = client
        .get(format!("{}/api/ping", admin.base))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert_eq!(resp.text().await.unwrap(), "pong");

    let version: Value = client
        .get(format!("{}/api/version", admin.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(version["version"], fabrickv::VERSION);
}

#[tokio::test]
async fn test_info_reports_store() {
    let admin = start_admin(&["any"]).await;
    assert_eq!(admin.state.store.set("a", b"1".to_vec(), None), Status::Ok);
    assert_eq!(admin.state.store.set("b", b"2".to_vec(), Some(60)), Status::Ok);

    let info: Value = Client::new()
        .get(format!("{}/api/info", admin.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(info["store"]["keys"], 2);
    assert_eq!(info["store"]["keys_with_ttl"], 1);
    assert!(info.get("uptime_seconds").is_some());
}

#[tokio::test]
async fn test_acl_list_add_del() {
    let admin = start_admin(&["127.0.0.1"]).await;
    let client = Client::new();
    let url = format!("{}/api/acl", admin.base);

    let listed: Value = client
        .get(format!("{}?action=list", url))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["rules"], json!(["127.0.0.1/32"]));

    let resp = client
        .post(format!("{}?action=add", url))
        .json(&json!({ "rules": ["10.0.0.0/8"] }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(admin.state.acl.verify("10.1.2.3".parse().unwrap()));

    let resp = client
        .post(format!("{}?action=del", url))
        .json(&json!({ "rules": ["127.0.0.1"] }))
        .send()
        .await
        .unwrap();
    assert!(resp.status().is_success());
    assert!(!admin.state.acl.verify("127.0.0.1".parse().unwrap()));
}

#[tokio::test]
async fn test_acl_errors() {
    let admin = start_admin(&["any"]).await;
    let client = Client::new();
    let url = format!("{}/api/acl", admin.base);

    let resp = client
        .post(format!("{}?action=add", url))
        .json(&json!({ "rules": ["not-an-address"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);

    let resp = client
        .post(format!("{}?action=del", url))
        .json(&json!({ "rules": ["192.168.0.0/16"] }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::NOT_FOUND);

    let resp = client
        .get(format!("{}?action=shuffle", url))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_text() {
    let admin = start_admin(&["any"]).await;
    admin
        .state
        .metrics
        .record("get", Duration::from_millis(2), Status::NoSuchKey);
    admin
        .state
        .metrics
        .record("set", Duration::from_millis(1), Status::Ok);
    admin.state.store.set("k", b"v".to_vec(), None);

    let text = Client::new()
        .get(format!("{}/metrics", admin.base))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("fabrickv_command_requests_total"));
    assert!(text.contains("fabrickv_keys 1"));
}
