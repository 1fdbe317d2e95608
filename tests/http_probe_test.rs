//! HTTP prober behavior against a mock server: HEAD-first probing, the GET
//! fallback on 405, auth header injection, and transport-failure shapes.

use std::time::Duration;

use pulsecheck::classifier::{classify, error_details, UrlStatus};
use pulsecheck::http_probe::HttpProber;
use pulsecheck::model::{AuthConfig, TransportError};

const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn healthy_endpoint_probes_via_head() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/health")
        .with_status(200)
        .with_header("content-length", "1234")
        .create_async()
        .await;

    let prober = HttpProber::new().unwrap();
    let outcome = prober
        .probe(&format!("{}/health", server.url()), None, PROBE_TIMEOUT)
        .await;

    head.assert_async().await;
    assert_eq!(outcome.http_status, Some(200));
    assert!(outcome.transport_error.is_none());
    assert_eq!(classify(&outcome), UrlStatus::Up);
}

#[tokio::test]
async fn head_rejection_falls_back_to_get() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/page")
        .with_status(405)
        .create_async()
        .await;
    let get = server
        .mock("GET", "/page")
        .with_status(200)
        .with_body("hello")
        .create_async()
        .await;

    let prober = HttpProber::new().unwrap();
    let outcome = prober
        .probe(&format!("{}/page", server.url()), None, PROBE_TIMEOUT)
        .await;

    head.assert_async().await;
    get.assert_async().await;
    assert_eq!(outcome.http_status, Some(200));
    assert_eq!(classify(&outcome), UrlStatus::Up);
}

#[tokio::test]
async fn server_error_classifies_down_with_details() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("HEAD", "/api")
        .with_status(503)
        .create_async()
        .await;

    let prober = HttpProber::new().unwrap();
    let url = format!("{}/api", server.url());
    let outcome = prober.probe(&url, None, PROBE_TIMEOUT).await;

    assert_eq!(outcome.http_status, Some(503));
    let status = classify(&outcome);
    assert_eq!(status, UrlStatus::Down);

    let details = error_details(&url, status, &outcome).expect("details for 503");
    assert_eq!(details.summary, "HTTP 503");
    assert!(details.reason.contains("Service Unavailable"));
}

#[tokio::test]
async fn client_error_classifies_warning() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("HEAD", "/missing")
        .with_status(404)
        .create_async()
        .await;

    let prober = HttpProber::new().unwrap();
    let outcome = prober
        .probe(&format!("{}/missing", server.url()), None, PROBE_TIMEOUT)
        .await;

    assert_eq!(outcome.http_status, Some(404));
    assert_eq!(classify(&outcome), UrlStatus::Warning);
}

#[tokio::test]
async fn bearer_token_is_attached() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/secured")
        .match_header("authorization", "Bearer seekrit")
        .with_status(200)
        .create_async()
        .await;

    let prober = HttpProber::new().unwrap();
    let auth = AuthConfig::Bearer { token: Some("seekrit".into()) };
    let outcome = prober
        .probe(&format!("{}/secured", server.url()), Some(&auth), PROBE_TIMEOUT)
        .await;

    head.assert_async().await;
    assert_eq!(outcome.http_status, Some(200));
}

#[tokio::test]
async fn api_key_header_is_attached() {
    let mut server = mockito::Server::new_async().await;
    let head = server
        .mock("HEAD", "/keyed")
        .match_header("x-api-key", "k-123")
        .with_status(200)
        .create_async()
        .await;

    let prober = HttpProber::new().unwrap();
    let auth = AuthConfig::ApiKey { header: "x-api-key".into(), key: Some("k-123".into()) };
    let outcome = prober
        .probe(&format!("{}/keyed", server.url()), Some(&auth), PROBE_TIMEOUT)
        .await;

    head.assert_async().await;
    assert_eq!(outcome.http_status, Some(200));
}

#[tokio::test]
async fn unresponsive_server_times_out() {
    // A listener that accepts connections and never answers.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((socket, _)) = listener.accept().await {
            held.push(socket);
        }
    });

    let prober = HttpProber::new().unwrap();
    let outcome = prober
        .probe(&format!("http://{addr}/"), None, Duration::from_millis(400))
        .await;
    server.abort();

    assert_eq!(outcome.transport_error, Some(TransportError::Timeout));
    assert_eq!(classify(&outcome), UrlStatus::Timeout);
    // Latency reflects the elapsed wait, not zero.
    assert!(outcome.latency_ms >= 300, "latency was {}", outcome.latency_ms);
}

#[tokio::test]
async fn refused_connection_is_a_network_error() {
    // Bind then drop to get a port that refuses connections.
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let prober = HttpProber::new().unwrap();
    let outcome = prober
        .probe(&format!("http://{addr}/"), None, Duration::from_secs(2))
        .await;

    assert!(
        matches!(
            outcome.transport_error,
            Some(TransportError::Connection | TransportError::Other)
        ),
        "{:?}",
        outcome.transport_error
    );
    assert_eq!(classify(&outcome), UrlStatus::NetworkError);
}
