mod common;

use std::net::SocketAddr;

use common::{Harness, harness_with};
use reqwest::StatusCode;
use serde_json::{Value, json};
use zonewarden::api::create_router;
use zonewarden::config::AppConfig;

async fn serve(h: &Harness) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = create_router(h.state.clone());
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

async fn with_token() -> Harness {
    harness_with(AppConfig {
        default_ttl: 300,
        default_nameservers: vec!["ns1.example.net.".into()],
        api_token: Some("s3cret".into()),
        ..AppConfig::default()
    })
    .await
}

#[tokio::test]
async fn bearer_token_is_required() {
    let h = with_token().await;
    let addr = serve(&h).await;
    let client = reqwest::Client::new();

    let res = client
        .get(format!("http://{addr}/api/providers"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("http://{addr}/api/providers"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .get(format!("http://{addr}/api/providers"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let providers: Value = res.json().await.unwrap();
    assert_eq!(providers[0]["name"], "mock");
}

#[tokio::test]
async fn zone_and_record_over_http() {
    let h = with_token().await;
    let addr = serve(&h).await;
    let client = reqwest::Client::new();
    let base = format!("http://{addr}/api");

    let res = client
        .post(format!("{base}/providers/{}/zones", h.provider_id))
        .bearer_auth("s3cret")
        .json(&json!({ "name": "example.com" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let outcome: Value = res.json().await.unwrap();
    assert_eq!(outcome["local"]["name"], "example.com.");
    let zone_id = outcome["local"]["id"].as_i64().unwrap();

    let res = client
        .post(format!("{base}/zones/{zone_id}/records"))
        .bearer_auth("s3cret")
        .json(&json!({ "name": "www", "type": "A", "content": "192.0.2.1" }))
        .send()
        .await
        .unwrap();
    assert!(res.status().is_success(), "{}", res.status());

    // Same record again collides.
    let res = client
        .post(format!("{base}/zones/{zone_id}/records"))
        .bearer_auth("s3cret")
        .json(&json!({ "name": "www", "type": "A", "content": "192.0.2.1" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = client
        .post(format!("{base}/zones/{zone_id}/records"))
        .bearer_auth("s3cret")
        .json(&json!({ "name": "bad", "type": "A", "content": "not-an-ip" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNPROCESSABLE_ENTITY);

    let res = client
        .get(format!("{base}/zones/{zone_id}/export"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let text = res.text().await.unwrap();
    assert!(text.contains("$ORIGIN example.com."));
    assert!(text.contains("www\t"));

    let res = client
        .get(format!("{base}/zones/999"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fcrdns_endpoint_reports_camel_case() {
    let h = with_token().await;
    h.lookup
        .forward
        .lock()
        .unwrap()
        .insert("mail.example.com.".into(), vec!["192.0.2.25".parse().unwrap()]);
    h.lookup
        .reverse
        .lock()
        .unwrap()
        .insert("192.0.2.25".parse().unwrap(), vec!["mail.example.com.".into()]);
    let addr = serve(&h).await;

    let report: Value = reqwest::Client::new()
        .get(format!(
            "http://{addr}/api/fcrdns?fqdn=mail.example.com&ip=192.0.2.25"
        ))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["hasForwardDns"], true);
    assert_eq!(report["hasReverseDns"], true);
    assert_eq!(report["hasFcrDns"], true);
    assert_eq!(report["reverseFqdn"], "mail.example.com.");

    let report: Value = reqwest::Client::new()
        .get(format!("http://{addr}/api/fcrdns?fqdn=www.example.com&ip=192.0.2.80"))
        .bearer_auth("s3cret")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(report["hasFcrDns"], false);
    assert_eq!(report["failures"][0], "missing-forward");
}
