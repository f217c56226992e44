
use std::collections::HashSet;

use harness::{client, relay, spawn, spawn_downstream};
use sqlrelay_cluster::RoutingStrategy;
use sqlrelay_relay::{trusted_host_router, Stage, ValidationPolicy};

#[tokio::test]
async fn valid_select_is_forwarded() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        ValidationPolicy::default(),
    )))
    .await;

    let response = client()
        .get(format!(
            "http://{trusted}/normal?query=SELECT%20*%20FROM%20film%20LIMIT%205"
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    let seen = downstream.requests();
    assert_eq!(seen.len(), 1);
    assert_eq!(
        seen[0].path_and_query,
        "/normal?query=SELECT%20*%20FROM%20film%20LIMIT%205"
    );
}

#[tokio::test]
async fn path_statement_is_validated_and_forwarded() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        ValidationPolicy::default(),
    )))
    .await;

    let response = client()
        .delete(format!(
            "http://{trusted}/custom/DELETE%20FROM%20film%20WHERE%20film_id%20=%201"
        ))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
    assert_eq!(downstream.requests()[0].method, "DELETE");
}

#[tokio::test]
async fn drop_table_is_rejected_before_forwarding() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        ValidationPolicy::default(),
    )))
    .await;

    let response = client()
        .post(format!("http://{trusted}/normal"))
        .header("content-type", "application/json")
        .body(r#"{"query":"DROP TABLE film"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let problem: serde_json::Value = response.json().await.unwrap();
    assert_eq!(problem["title"], "Invalid Request");
    assert_eq!(problem["code"], "unrecognized_statement");
    assert!(downstream.requests().is_empty());
}

#[tokio::test]
async fn disallowed_method_is_rejected() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        ValidationPolicy::default(),
    )))
    .await;

    let response = client()
        .patch(format!("http://{trusted}/normal"))
        .body(r#"{"query":"SELECT a FROM t"}"#)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let problem: serde_json::Value = response.json().await.unwrap();
    assert_eq!(problem["code"], "method_not_allowed");
    assert!(downstream.requests().is_empty());
}

#[tokio::test]
async fn malformed_body_is_rejected() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        ValidationPolicy::default(),
    )))
    .await;

    let response = client()
        .post(format!("http://{trusted}/normal"))
        .body("{not json")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 400);
    let problem: serde_json::Value = response.json().await.unwrap();
    assert_eq!(problem["code"], "malformed_payload");
    assert!(downstream.requests().is_empty());
}

#[tokio::test]
async fn read_only_route_refuses_writes() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let policy = ValidationPolicy {
        read_only_strategies: HashSet::from([RoutingStrategy::Random]),
        ..Default::default()
    };
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        policy,
    )))
    .await;

    let insert = r#"{"query":"INSERT INTO actor VALUES (1, 'A', 'B')"}"#;

    let rejected = client()
        .post(format!("http://{trusted}/random"))
        .body(insert)
        .send()
        .await
        .unwrap();
    assert_eq!(rejected.status(), 400);
    let problem: serde_json::Value = rejected.json().await.unwrap();
    assert_eq!(problem["code"], "write_not_allowed");

    let accepted = client()
        .post(format!("http://{trusted}/normal"))
        .body(insert)
        .send()
        .await
        .unwrap();
    assert_eq!(accepted.status(), 201);

    assert_eq!(downstream.requests().len(), 1);
}

#[tokio::test]
async fn read_only_route_aliases_refuse_writes() {
    let (downstream, downstream_addr) = spawn_downstream().await;
    let policy = ValidationPolicy {
        read_only_strategies: HashSet::from([RoutingStrategy::LatencyProbed]),
        default_strategy: RoutingStrategy::LatencyProbed,
        ..Default::default()
    };
    let trusted = spawn(trusted_host_router(relay(
        Stage::TrustedHost,
        downstream_addr,
        policy,
    )))
    .await;

    let insert = r#"{"query":"INSERT INTO actor VALUES (1, 'A', 'B')"}"#;

    for route in ["custom", "latency", "latency_probed", "query"] {
        let response = client()
            .post(format!("http://{trusted}/{route}"))
            .body(insert)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "{route}");
        let problem: serde_json::Value = response.json().await.unwrap();
        assert_eq!(problem["code"], "write_not_allowed", "{route}");
    }

    assert!(downstream.requests().is_empty());
}
