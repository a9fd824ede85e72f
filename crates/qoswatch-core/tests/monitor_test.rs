#![allow(clippy::unwrap_used)]
// Rule reconciliation tests for `Monitor` against a wiremock backend.

use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use qoswatch_core::{
    CoreError, Monitor, MonitorConfig, PendingWrite, QosRule, RuleId, SdnAction,
};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, Monitor) {
    let server = MockServer::start().await;
    let config = MonitorConfig::for_backend(Url::parse(&server.uri()).unwrap()).unwrap();
    let monitor = Monitor::oneshot(config).unwrap();
    (server, monitor)
}

async fn mount_qos_list(server: &MockServer, rules: serde_json::Value, times: Option<u64>) {
    let mock = Mock::given(method("GET"))
        .and(path("/api/qos/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(rules));
    match times {
        Some(n) => mock.up_to_n_times(n).mount(server).await,
        None => mock.mount(server).await,
    }
}

fn qos(protocol: &str, priority: u8, bandwidth_limit: Option<u64>) -> QosRule {
    QosRule {
        protocol: protocol.into(),
        priority,
        bandwidth_limit,
    }
}

fn confirmed_qos(monitor: &Monitor) -> Vec<QosRule> {
    monitor
        .qos_rules()
        .iter()
        .map(|r| QosRule::clone(r))
        .collect()
}

// ── QoS reconciliation ──────────────────────────────────────────────

#[tokio::test]
async fn test_set_then_clear_qos_rule() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .and(body_json(json!({ "protocol": "TCP", "priority": 5, "bandwidth_limit": 100 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "ok" })))
        .expect(1)
        .mount(&server)
        .await;
    mount_qos_list(
        &server,
        json!([{ "protocol": "TCP", "priority": 5, "bandwidth_limit": 100 }]),
        Some(1),
    )
    .await;

    monitor.set_qos_rule("TCP", Some(5), Some(100)).await.unwrap();
    assert_eq!(confirmed_qos(&monitor), vec![qos("TCP", 5, Some(100))]);

    Mock::given(method("DELETE"))
        .and(path("/api/qos/rules/TCP"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_qos_list(&server, json!([]), None).await;

    monitor.set_qos_rule("TCP", None, None).await.unwrap();
    assert!(monitor.qos_rules().is_empty());
    assert!(monitor.pending_qos_writes().is_empty());
}

#[tokio::test]
async fn test_missing_priority_defaults_to_lowest() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .and(body_json(json!({ "protocol": "UDP", "priority": 1, "bandwidth_limit": 500 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_qos_list(
        &server,
        json!([{ "protocol": "UDP", "priority": 1, "bandwidth_limit": 500 }]),
        None,
    )
    .await;

    monitor.set_qos_rule("UDP", None, Some(500)).await.unwrap();
    assert_eq!(confirmed_qos(&monitor), vec![qos("UDP", 1, Some(500))]);
}

#[tokio::test]
async fn test_out_of_range_priority_never_reaches_backend() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    for priority in [0, 11] {
        let result = monitor.set_qos_rule("TCP", Some(priority), None).await;
        assert!(
            matches!(result, Err(CoreError::Validation { .. })),
            "expected Validation for {priority}, got: {result:?}"
        );
    }

    let result = monitor.set_qos_rule("  ", Some(1), None).await;
    assert!(matches!(result, Err(CoreError::Validation { .. })));
}

#[tokio::test]
async fn test_highest_priority_reaches_backend() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .and(body_json(json!({ "protocol": "TCP", "priority": 10 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_qos_list(&server, json!([{ "protocol": "TCP", "priority": 10 }]), None).await;

    monitor.set_qos_rule("TCP", Some(10), None).await.unwrap();
    assert_eq!(confirmed_qos(&monitor), vec![qos("TCP", 10, None)]);
}

#[tokio::test]
async fn test_rejected_write_keeps_confirmed_list() {
    let (server, monitor) = setup().await;

    mount_qos_list(&server, json!([{ "protocol": "TCP", "priority": 1 }]), None).await;
    monitor.refresh_qos_rules().await.unwrap();
    let before = confirmed_qos(&monitor);

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .respond_with(ResponseTemplate::new(422).set_body_string("bandwidth limit too large"))
        .expect(1)
        .mount(&server)
        .await;

    let result = monitor.set_qos_rule("TCP", Some(6), Some(u64::MAX)).await;
    match result {
        Err(CoreError::Rejected { status, message }) => {
            assert_eq!(status, 422);
            assert_eq!(message, "bandwidth limit too large");
        }
        other => panic!("expected Rejected, got: {other:?}"),
    }
    assert_eq!(confirmed_qos(&monitor), before);
    assert!(monitor.pending_qos_writes().is_empty());
}

#[tokio::test]
async fn test_stale_refresh_does_not_overwrite_newer() {
    let (server, monitor) = setup().await;

    // First request answers slowly with the old list; later ones answer
    // immediately with the new one.
    Mock::given(method("GET"))
        .and(path("/api/qos/rules"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!([{ "protocol": "TCP", "priority": 1 }]))
                .set_delay(Duration::from_millis(500)),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount_qos_list(&server, json!([{ "protocol": "TCP", "priority": 7 }]), None).await;

    let slow = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.refresh_qos_rules().await }
    });

    // Make sure the slow request is the one that hit the delayed mock.
    for _ in 0..100 {
        if server.received_requests().await.unwrap().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    monitor.refresh_qos_rules().await.unwrap();
    assert_eq!(confirmed_qos(&monitor), vec![qos("TCP", 7, None)]);

    slow.await.unwrap().unwrap();
    assert_eq!(confirmed_qos(&monitor), vec![qos("TCP", 7, None)]);
}

#[tokio::test]
async fn test_same_key_writes_run_in_issue_order() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .and(body_json(json!({ "protocol": "TCP", "priority": 3 })))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .and(body_json(json!({ "protocol": "TCP", "priority": 9 })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_qos_list(&server, json!([{ "protocol": "TCP", "priority": 3 }]), Some(1)).await;
    mount_qos_list(&server, json!([{ "protocol": "TCP", "priority": 9 }]), None).await;

    let first = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.set_qos_rule("TCP", Some(3), None).await }
    });
    for _ in 0..100 {
        if server.received_requests().await.unwrap().len() == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // Issued while the first write is still waiting on the backend.
    let second = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.set_qos_rule("TCP", Some(9), None).await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    let log: Vec<String> = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .map(|r| match r.method.to_string().as_str() {
            "POST" => {
                let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
                format!("POST {}", body["priority"])
            }
            other => other.to_owned(),
        })
        .collect();
    assert_eq!(log, vec!["POST 3", "GET", "POST 9", "GET"]);
    assert_eq!(confirmed_qos(&monitor), vec![qos("TCP", 9, None)]);
}

#[tokio::test]
async fn test_pending_write_visible_while_in_flight() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/qos/rules"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(300)))
        .mount(&server)
        .await;
    mount_qos_list(&server, json!([{ "protocol": "ICMP", "priority": 2 }]), None).await;

    let write = tokio::spawn({
        let monitor = monitor.clone();
        async move { monitor.set_qos_rule("ICMP", Some(2), None).await }
    });

    let mut seen = Vec::new();
    for _ in 0..100 {
        seen = monitor.pending_qos_writes();
        if !seen.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].key, "ICMP");
    assert_eq!(seen[0].write, PendingWrite::Upsert(qos("ICMP", 2, None)));
    assert!(monitor.qos_rules().is_empty(), "not confirmed yet");

    write.await.unwrap().unwrap();
    assert!(monitor.pending_qos_writes().is_empty());
    assert_eq!(confirmed_qos(&monitor), vec![qos("ICMP", 2, None)]);
}

// ── SDN reconciliation ──────────────────────────────────────────────

#[tokio::test]
async fn test_create_and_delete_sdn_rule() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/sdn/rules"))
        .and(body_json(json!({
            "source_ip": "10.0.0.1",
            "destination_ip": "10.0.0.2",
            "action": "Drop"
        })))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sdn/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{
            "id": 4,
            "source_ip": "10.0.0.1",
            "destination_ip": "10.0.0.2",
            "action": "Drop",
            "status": "ACTIVE"
        }])))
        .up_to_n_times(1)
        .mount(&server)
        .await;

    monitor
        .create_sdn_rule("10.0.0.1", "10.0.0.2", SdnAction::Drop)
        .await
        .unwrap();
    let rules = monitor.sdn_rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].id, RuleId::Numeric(4));

    Mock::given(method("DELETE"))
        .and(path("/api/sdn/rules/4"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sdn/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .mount(&server)
        .await;

    monitor.delete_sdn_rule(&RuleId::Numeric(4)).await.unwrap();
    assert!(monitor.sdn_rules().is_empty());
}

#[tokio::test]
async fn test_failed_sdn_delete_rejects() {
    let (server, monitor) = setup().await;

    Mock::given(method("DELETE"))
        .and(path("/api/sdn/rules/99"))
        .respond_with(ResponseTemplate::new(404).set_body_string("Rule not found"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/sdn/rules"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let err = monitor.delete_sdn_rule(&RuleId::from("99")).await.unwrap_err();
    assert_eq!(err.status(), Some(404));
}

// ── Metrics ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_refresh_metrics_replaces_snapshot() {
    let (server, monitor) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/metrics/current"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "statistics": { "total_packets": 10, "throughput": 300.0 },
            "bandwidth_utilization": { "TCP": 300.0 },
            "latency_metrics": {}
        })))
        .mount(&server)
        .await;

    assert!(monitor.metrics().is_none());
    let snapshot = monitor.refresh_metrics().await.unwrap();
    assert_eq!(snapshot.statistics.total_packets, 10);
    assert_eq!(monitor.metrics().unwrap().statistics.total_packets, 10);
}

#[tokio::test]
async fn test_clear_history_is_passthrough() {
    let (server, monitor) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/metrics/clear"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "status": "success" })))
        .expect(1)
        .mount(&server)
        .await;

    monitor.clear_history().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_backend_maps_to_core_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let config =
        MonitorConfig::for_backend(Url::parse(&format!("http://127.0.0.1:{port}")).unwrap())
            .unwrap();
    let monitor = Monitor::oneshot(config).unwrap();

    let err = monitor.refresh_qos_rules().await.unwrap_err();
    assert!(
        matches!(err, CoreError::BackendUnreachable { .. }),
        "expected BackendUnreachable, got: {err:?}"
    );
}
