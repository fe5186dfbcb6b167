//! Wire protocol tests against a mock collector.
//!
//! The client uses `reqwest::blocking`, which must not be created or dropped
//! on an async runtime thread, so every client call runs in `spawn_blocking`.

use std::time::Duration;

use api_types::CollectionConfigurationError;
use api_types::CollectionConfigurationErrorType;
use api_types::MetricPoint;
use api_types::MonitoringDataPoint;
use chrono::Utc;
use collector_client::BlockingServiceClient;
use collector_client::ClientConfig;
use collector_client::CommError;
use collector_client::PollingHint;
use collector_client::ServiceClient;
use similar_asserts::assert_eq;
use test_log::test;
use wiremock::matchers::header;
use wiremock::matchers::method;
use wiremock::matchers::path;
use wiremock::matchers::query_param;
use wiremock::Mock;
use wiremock::MockServer;
use wiremock::ResponseTemplate;

const CONFIGURATION: &str = r#"{
    "ETag": "v2",
    "Metrics": [],
    "DocumentStreams": [{
        "Id": "failures",
        "DocumentFilterGroups": [{
            "TelemetryType": "Request",
            "Filters": {"Filters": [
                {"FieldName": "Success", "Predicate": "Equal", "Comparand": "false"}
            ]}
        }]
    }]
}"#;

fn client(endpoint: &str) -> BlockingServiceClient {
    let config = ClientConfig::new(endpoint)
        .unwrap()
        .with_instance_name("web-0")
        .with_role_name("checkout")
        .with_machine_name("host-a")
        .with_stream_id("stream-1")
        .with_request_timeout(Duration::from_secs(1));
    BlockingServiceClient::new(config).unwrap()
}

fn endpoint(server: &MockServer) -> String {
    format!("{}/QuickPulseService.svc", server.uri())
}

#[test(tokio::test)]
async fn unsubscribed_ping_sends_identity_headers() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/QuickPulseService.svc/ping"))
        .and(query_param("ikey", "ikey-1"))
        .and(header("x-ms-qps-stream-id", "stream-1"))
        .and(header("x-ms-qps-invariant-version", "5"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-ms-qps-subscribed", "false"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let response = tokio::task::spawn_blocking(move || {
        client(&endpoint).ping("ikey-1", Utc::now(), "", Some("secret"))
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.subscribed, Some(false));
    assert_eq!(response.configuration, None);

    let requests = server.received_requests().await.unwrap();
    let request = &requests[0];
    assert_eq!(request.headers.get("x-ms-qps-instance-name").unwrap(), "web-0");
    assert_eq!(request.headers.get("x-ms-qps-role-name").unwrap(), "checkout");
    assert_eq!(request.headers.get("x-ms-qps-machine-name").unwrap(), "host-a");
    assert_eq!(request.headers.get("x-ms-qps-auth-api-key").unwrap(), "secret");
    assert!(request.headers.get("x-ms-qps-transmission-time").is_some());

    let point: MonitoringDataPoint = serde_json::from_slice(&request.body).unwrap();
    assert_eq!(point.instrumentation_key, "ikey-1");
    assert_eq!(point.stream_id, "stream-1");
    assert!(point.metrics.is_empty());
}

#[test(tokio::test)]
async fn subscribed_ping_with_new_etag_returns_configuration() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/QuickPulseService.svc/ping"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-qps-subscribed", "true")
                .insert_header("x-ms-qps-configuration-etag", "v2")
                .set_body_string(CONFIGURATION),
        )
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let (changed, unchanged) = tokio::task::spawn_blocking(move || {
        let client = client(&endpoint);
        let changed = client.ping("ikey-1", Utc::now(), "v1", None).unwrap();
        let unchanged = client.ping("ikey-1", Utc::now(), "v2", None).unwrap();
        (changed, unchanged)
    })
    .await
    .unwrap();

    assert_eq!(changed.subscribed, Some(true));
    assert_eq!(changed.configuration_etag.as_deref(), Some("v2"));
    let configuration = changed.configuration.unwrap();
    assert_eq!(configuration.etag, "v2");
    assert_eq!(configuration.document_streams[0].id, "failures");

    assert_eq!(unchanged.subscribed, Some(true));
    assert_eq!(unchanged.configuration, None);
}

#[test(tokio::test)]
async fn unparsable_configuration_is_ignored() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-qps-subscribed", "true")
                .insert_header("x-ms-qps-configuration-etag", "v3")
                .set_body_string("{\"ETag\": \"v3\", \"Metrics\": [{\"Aggregation\": \"Median\"}]}"),
        )
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let response = tokio::task::spawn_blocking(move || {
        client(&endpoint).ping("ikey-1", Utc::now(), "v2", None)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.subscribed, Some(true));
    assert_eq!(response.configuration, None);
}

#[test(tokio::test)]
async fn missing_subscribed_header_is_unknown() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let response = tokio::task::spawn_blocking(move || {
        client(&endpoint).ping("ikey-1", Utc::now(), "", None)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.subscribed, None);
    assert_eq!(response.polling_interval_hint, PollingHint::Unchanged);
    assert_eq!(response.endpoint_redirect, None);
}

#[test(tokio::test)]
async fn polling_hint_and_redirect_are_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/QuickPulseService.svc/ping"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-qps-subscribed", "false")
                .insert_header("x-ms-qps-service-polling-interval-hint", "30000")
                .insert_header(
                    "x-ms-qps-service-endpoint-redirect-v2",
                    "https://westus.live.example.com/QuickPulseService.svc",
                ),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/QuickPulseService.svc/post"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-qps-subscribed", "true")
                .insert_header("x-ms-qps-service-polling-interval-hint", "")
                .insert_header("x-ms-qps-service-endpoint-redirect-v2", "/elsewhere"),
        )
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let (ping, submit) = tokio::task::spawn_blocking(move || {
        let client = client(&endpoint);
        let ping = client.ping("ikey-1", Utc::now(), "", None).unwrap();
        let submit = client
            .submit_samples(Vec::new(), "ikey-1", "", None, &[])
            .unwrap();
        (ping, submit)
    })
    .await
    .unwrap();

    assert_eq!(
        ping.polling_interval_hint,
        PollingHint::Set(Duration::from_secs(30))
    );
    assert_eq!(
        ping.endpoint_redirect.unwrap().as_str(),
        "https://westus.live.example.com/QuickPulseService.svc"
    );

    assert_eq!(submit.polling_interval_hint, PollingHint::Cleared);
    assert_eq!(submit.endpoint_redirect, None);
}

#[test(tokio::test)]
async fn opaque_auth_headers_are_echoed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-qps-subscribed", "false")
                .insert_header("x-ms-qps-auth-app-id", "app-42")
                .insert_header("x-ms-qps-auth-status", "ok"),
        )
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    tokio::task::spawn_blocking(move || {
        let client = client(&endpoint);
        client.ping("ikey-1", Utc::now(), "", None).unwrap();
        client.ping("ikey-1", Utc::now(), "", None).unwrap();
    })
    .await
    .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests.len(), 2);
    assert!(requests[0].headers.get("x-ms-qps-auth-app-id").is_none());
    assert_eq!(requests[1].headers.get("x-ms-qps-auth-app-id").unwrap(), "app-42");
    assert_eq!(requests[1].headers.get("x-ms-qps-auth-status").unwrap(), "ok");
}

#[test(tokio::test)]
async fn submit_stamps_identity_and_errors() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/QuickPulseService.svc/post"))
        .and(query_param("ikey", "ikey-1"))
        .and(header("x-ms-qps-configuration-etag", "v7"))
        .respond_with(ResponseTemplate::new(200).insert_header("x-ms-qps-subscribed", "true"))
        .expect(1)
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let response = tokio::task::spawn_blocking(move || {
        let point = MonitoringDataPoint {
            timestamp: Utc::now(),
            metrics: vec![MetricPoint::new("\\ApplicationInsights\\Requests/Sec", 4.0, 1)],
            ..Default::default()
        };
        let errors = [CollectionConfigurationError::new(
            CollectionConfigurationErrorType::MetricDuplicateIds,
            "duplicate metric id",
            "",
            [("MetricId", "m1".to_string()), ("ETag", "v7".to_string())],
        )];
        client(&endpoint).submit_samples(vec![point], "ikey-1", "v7", None, &errors)
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(response.subscribed, Some(true));

    let requests = server.received_requests().await.unwrap();
    let points: Vec<MonitoringDataPoint> = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(points.len(), 1);
    assert_eq!(points[0].instrumentation_key, "ikey-1");
    assert_eq!(points[0].instance, "web-0");
    assert_eq!(points[0].metrics[0].value, 4.0);
    assert_eq!(points[0].collection_configuration_errors.len(), 1);
    assert_eq!(
        points[0].collection_configuration_errors[0].data_value("MetricId"),
        Some("m1")
    );
}

#[test(tokio::test)]
async fn server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let result = tokio::task::spawn_blocking(move || {
        client(&endpoint).ping("ikey-1", Utc::now(), "", None)
    })
    .await
    .unwrap();

    let report = result.unwrap_err();
    assert!(matches!(
        report.current_context(),
        CommError::Http { status: 503, .. }
    ));
}

#[test(tokio::test)]
async fn slow_collector_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("x-ms-qps-subscribed", "true")
                .set_delay(Duration::from_secs(3)),
        )
        .mount(&server)
        .await;

    let endpoint = endpoint(&server);
    let result = tokio::task::spawn_blocking(move || {
        client(&endpoint).ping("ikey-1", Utc::now(), "", None)
    })
    .await
    .unwrap();

    let report = result.unwrap_err();
    assert!(matches!(
        report.current_context(),
        CommError::Timeout { .. }
    ));
}
