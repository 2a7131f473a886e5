//! End-to-end pipeline tests: records in, batches durably staged, batches
//! delivered to a mock analytics endpoint with transactional ack/rollback.

use std::sync::Arc;
use std::time::Duration;

use telemetry_agent::config::TlsConfig;
use telemetry_agent::proto::v1::telemetry_client::TelemetryClient;
use telemetry_agent::proto::v1::{attribute_value, AttributeValue, PublishRequest, Record};
use telemetry_agent::{
    Adapter, AdapterError, FilePersister, MemoryPersister, Persister, Publisher, Writer,
};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn record_json(id: &str) -> String {
    format!(r#"{{"requestID":"{id}"}}"#)
}

async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<wiremock::Request> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    loop {
        let requests = server.received_requests().await.unwrap();
        if requests.len() >= count {
            return requests;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {count} requests, got {}",
            requests.len()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

fn spawn_pipeline(
    persister: Arc<dyn Persister>,
    endpoint: String,
    max_records: usize,
    buffer_timeout: Duration,
    send_interval: Duration,
) -> (
    mpsc::Sender<String>,
    CancellationToken,
    tokio::task::JoinHandle<()>,
    tokio::task::JoinHandle<()>,
) {
    let shutdown = CancellationToken::new();
    let (buffer_tx, buffer_rx) = mpsc::channel(max_records * 2);

    let writer = Writer::new(
        buffer_rx,
        Arc::clone(&persister),
        max_records,
        buffer_timeout,
        shutdown.clone(),
    );
    let publisher = Publisher::new(
        persister,
        endpoint,
        reqwest::Client::new(),
        send_interval,
        shutdown.clone(),
    );
    let writer_handle = tokio::spawn(writer.run());
    let publisher_handle = tokio::spawn(publisher.run());
    (buffer_tx, shutdown, writer_handle, publisher_handle)
}

#[tokio::test]
async fn four_records_ship_as_two_batches() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let persister = Arc::new(MemoryPersister::new(2, 4));
    let (buffer_tx, shutdown, writer_handle, publisher_handle) = spawn_pipeline(
        Arc::clone(&persister) as Arc<dyn Persister>,
        server.uri(),
        2,
        Duration::from_secs(60),
        Duration::from_millis(20),
    );

    for id in ["r1", "r2", "r3", "r4"] {
        buffer_tx.send(record_json(id)).await.unwrap();
    }

    let requests = wait_for_requests(&server, 2).await;
    let bodies: Vec<String> = requests
        .iter()
        .map(|request| String::from_utf8(request.body.clone()).unwrap())
        .collect();
    assert_eq!(bodies[0], format!("[{},{}]", record_json("r1"), record_json("r2")));
    assert_eq!(bodies[1], format!("[{},{}]", record_json("r3"), record_json("r4")));

    shutdown.cancel();
    writer_handle.await.unwrap();
    publisher_handle.await.unwrap();
    assert!(
        persister.fetch().await.unwrap().is_none(),
        "every batch was delivered and committed"
    );
}

#[tokio::test]
async fn a_lone_record_ships_on_the_timeout_trigger() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let persister = Arc::new(MemoryPersister::new(10, 10));
    let (buffer_tx, shutdown, writer_handle, publisher_handle) = spawn_pipeline(
        Arc::clone(&persister) as Arc<dyn Persister>,
        server.uri(),
        10,
        Duration::from_millis(200),
        Duration::from_millis(20),
    );

    buffer_tx.send(record_json("r1")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(
        server.received_requests().await.unwrap().is_empty(),
        "nothing may ship before the buffer timeout"
    );

    let requests = wait_for_requests(&server, 1).await;
    assert_eq!(
        String::from_utf8(requests[0].body.clone()).unwrap(),
        format!("[{}]", record_json("r1"))
    );

    shutdown.cancel();
    writer_handle.await.unwrap();
    publisher_handle.await.unwrap();
}

#[tokio::test]
async fn batch_survives_outage_and_is_delivered_exactly_once() {
    let server = MockServer::start().await;
    // Three failing ticks, then the endpoint recovers.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let persister = Arc::new(MemoryPersister::new(2, 4));
    let (buffer_tx, shutdown, writer_handle, publisher_handle) = spawn_pipeline(
        Arc::clone(&persister) as Arc<dyn Persister>,
        server.uri(),
        2,
        Duration::from_secs(60),
        Duration::from_millis(25),
    );

    buffer_tx.send(record_json("r1")).await.unwrap();
    buffer_tx.send(record_json("r2")).await.unwrap();

    let requests = wait_for_requests(&server, 4).await;
    let expected_body = format!("[{},{}]", record_json("r1"), record_json("r2"));
    for request in &requests {
        assert_eq!(String::from_utf8(request.body.clone()).unwrap(), expected_body);
    }

    // One more interval: the committed batch must not be re-offered.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 4);

    shutdown.cancel();
    writer_handle.await.unwrap();
    publisher_handle.await.unwrap();
    assert!(persister.fetch().await.unwrap().is_none());
}

#[tokio::test]
async fn file_backend_reoffers_batches_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let batch = format!("[{}]", record_json("r1"));

    // First incarnation persists a batch and dies without publishing.
    {
        let store = FilePersister::new(dir.path()).unwrap();
        store.write(&batch).await.unwrap();
    }

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let store = Arc::new(FilePersister::new(dir.path()).unwrap());
    let shutdown = CancellationToken::new();
    let publisher = Publisher::new(
        Arc::clone(&store) as Arc<dyn Persister>,
        server.uri(),
        reqwest::Client::new(),
        Duration::from_millis(20),
        shutdown.clone(),
    );
    let handle = tokio::spawn(publisher.run());

    let requests = wait_for_requests(&server, 1).await;
    assert_eq!(String::from_utf8(requests[0].body.clone()).unwrap(), batch);

    shutdown.cancel();
    handle.await.unwrap();
    assert!(store.fetch().await.unwrap().is_none(), "delivered file is gone");
}

#[tokio::test]
async fn a_full_buffer_blocks_the_producer() {
    let (buffer_tx, mut buffer_rx) = mpsc::channel::<String>(4);

    for id in ["r1", "r2", "r3", "r4"] {
        buffer_tx.send(record_json(id)).await.unwrap();
    }

    let blocked = tokio::time::timeout(
        Duration::from_millis(50),
        buffer_tx.send(record_json("r5")),
    )
    .await;
    assert!(blocked.is_err(), "the fifth send must block on a full buffer");

    assert_eq!(buffer_rx.recv().await.unwrap(), record_json("r1"));
    tokio::time::timeout(Duration::from_secs(1), buffer_tx.send(record_json("r5")))
        .await
        .expect("send must complete once the consumer drained a record")
        .unwrap();
}

#[tokio::test]
async fn grpc_records_reach_the_buffer_normalised() {
    use attribute_value::Kind;

    let (buffer_tx, mut buffer_rx) = mpsc::channel(16);
    let shutdown = CancellationToken::new();
    let adapter = Arc::new(Adapter::new(0, buffer_tx, None, &shutdown));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = Arc::clone(&adapter);
    let handle = tokio::spawn(async move { server.serve(listener).await });

    let mut client = TelemetryClient::connect(format!("http://{addr}"))
        .await
        .unwrap();
    let request = PublishRequest {
        records: vec![Record {
            name: "telemetry-metric".to_string(),
            attributes: [(
                "responseCode".to_string(),
                AttributeValue {
                    kind: Some(Kind::Int64Value(200)),
                },
            )]
            .into_iter()
            .collect(),
            value: None,
        }],
    };
    client.publish(request).await.unwrap();

    let normalised = buffer_rx.recv().await.unwrap();
    let parsed: serde_json::Value = serde_json::from_str(&normalised).unwrap();
    assert_eq!(parsed, serde_json::json!({"responseCode": 200}));

    adapter.close();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn unreadable_tls_material_fails_run_not_construction() {
    let (buffer_tx, _buffer_rx) = mpsc::channel(4);
    let shutdown = CancellationToken::new();
    let tls = TlsConfig {
        certificate: "/nonexistent/adapter.crt".into(),
        private_key: "/nonexistent/adapter.key".into(),
        ca_certificate: "/nonexistent/ca.pem".into(),
    };

    // Construction must succeed even with unreadable material.
    let adapter = Adapter::new(0, buffer_tx, Some(tls), &shutdown);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let err = adapter.serve(listener).await.unwrap_err();
    assert!(matches!(err, AdapterError::TlsMaterial { .. }));
}
