//! Collector push through a live HTTP forwarder.

mod helpers;

use std::time::Duration;

use helpers::{local_config, series_line};
use nfstats::config::MetricsConfig;
use nfstats::stats::{CounterKind, GaugeKind};
use nfstats::setup_metrics;
use serde_json::Value;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn push_config(daemon_name: &str, collector_url: String) -> MetricsConfig {
    MetricsConfig {
        collector_url,
        push_enabled: true,
        push_timeout: Duration::from_millis(500),
        ..local_config(daemon_name)
    }
}

/// Wait until the collector has seen `count` requests.
async fn received_bodies(server: &MockServer, count: usize) -> Vec<(String, Value)> {
    for _ in 0..100 {
        let requests = server.received_requests().await.unwrap_or_default();
        if requests.len() >= count {
            return requests
                .iter()
                .map(|r| {
                    let body = serde_json::from_slice(&r.body).unwrap();
                    (r.url.path().to_string(), body)
                })
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("collector did not receive {count} requests");
}

#[tokio::test]
async fn test_gauge_update_is_pushed() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/gauge"))
        .and(header("content-type", "application/json"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&collector)
        .await;

    let handle = setup_metrics(&push_config("nfpush", collector.uri()))
        .await
        .unwrap();
    handle
        .registry()
        .set(42.0, GaugeKind::Running, "progX", "eth0");

    let bodies = received_bodies(&collector, 1).await;
    let (route, body) = &bodies[0];
    assert_eq!(route, "/gauge");
    assert_eq!(body["MetricName"], "nfpush_OtelNFRunning");
    assert_eq!(body["Value"], 42.0);

    let attribs = body["Attribs"].as_array().unwrap();
    assert_eq!(attribs.len(), 5);
    assert!(attribs.iter().any(|a| {
        a["Key"] == "ebpfProgram"
            && a["Value"]["Type"] == "STRING"
            && a["Value"]["Value"] == "progX"
    }));

    handle.shutdown().await;
}

#[tokio::test]
async fn test_counter_increment_is_pushed() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/counter"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&collector)
        .await;

    let handle = setup_metrics(&push_config("nfpush", collector.uri()))
        .await
        .unwrap();
    handle
        .registry()
        .incr(CounterKind::StartCount, "progX", "ingress", "eth0");

    let bodies = received_bodies(&collector, 1).await;
    let (route, body) = &bodies[0];
    assert_eq!(route, "/counter");
    assert_eq!(body["MetricName"], "nfpush_OtelNFStartCount");
    assert_eq!(body["Value"], 1);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_collector_errors_do_not_affect_updates() {
    let collector = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&collector)
        .await;

    let handle = setup_metrics(&push_config("nferr", collector.uri()))
        .await
        .unwrap();
    let registry = handle.registry();
    registry.set(1.0, GaugeKind::Running, "progX", "eth0");
    registry.set(2.0, GaugeKind::Running, "progX", "eth0");

    received_bodies(&collector, 2).await;
    assert_eq!(registry.gauge(GaugeKind::Running).unwrap().value(), 2.0);

    handle.shutdown().await;
}

#[tokio::test]
async fn test_unreachable_collector_still_scrapes_value() {
    // Port 9 (discard) is not listening on test hosts.
    let handle = setup_metrics(&push_config("nfdown", "http://127.0.0.1:9".to_string()))
        .await
        .unwrap();
    handle
        .registry()
        .set(42.0, GaugeKind::Running, "progX", "eth0");

    let url = format!("http://{}/metrics", handle.local_addr());
    let text = reqwest::get(&url).await.unwrap().text().await.unwrap();
    let line = series_line(&text, "nfdown_OtelNFRunning").expect("running series");
    assert!(line.ends_with(" 42"));

    handle.shutdown().await;
}
