//! Policy-plane ingestion adapter.
//!
//! Serves the `telemetry.v1.Telemetry` gRPC service. Every record in a
//! request is normalised into a flat JSON object and pushed onto the shared
//! ingestion buffer; a full buffer blocks the RPC handler, which is the
//! agent's backpressure towards the policy plane.
//!
//! TLS is optional: when the configuration names a certificate, private key
//! and CA certificate, the listener serves mutual TLS. The material is only
//! read when the adapter starts serving, so constructing an adapter with
//! unreadable paths succeeds and the failure surfaces from [`Adapter::run`].

use crate::config::TlsConfig;
use crate::error::AdapterError;
use crate::proto::v1::telemetry_server::{Telemetry, TelemetryServer};
use crate::proto::v1::{attribute_value, AttributeValue, PublishRequest, PublishResponse, Record};
use chrono::{DateTime, SecondsFormat, Utc};
use std::net::{Ipv4Addr, Ipv6Addr};
use std::path::Path;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::transport::{Certificate, Identity, Server, ServerTlsConfig};
use tonic::{Request, Response, Status};
use tracing::{debug, info};

/// Port the policy plane dials the adapter on.
pub const ADAPTER_PORT: u16 = 38355;

/// gRPC ingestion surface.
pub struct Adapter {
    port: u16,
    buffer: mpsc::Sender<String>,
    tls: Option<TlsConfig>,
    close: CancellationToken,
}

impl Adapter {
    /// Create an adapter feeding `buffer`. The adapter observes `shutdown`
    /// and can additionally be stopped alone via [`Adapter::close`].
    pub fn new(
        port: u16,
        buffer: mpsc::Sender<String>,
        tls: Option<TlsConfig>,
        shutdown: &CancellationToken,
    ) -> Self {
        Self {
            port,
            buffer,
            tls,
            close: shutdown.child_token(),
        }
    }

    /// Bind the configured port and serve until closed.
    pub async fn run(&self) -> Result<(), AdapterError> {
        let listener = TcpListener::bind((Ipv6Addr::UNSPECIFIED, self.port)).await?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until closed. In-flight RPCs
    /// complete before the server task returns.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), AdapterError> {
        let mut builder = Server::builder();
        if let Some(tls) = &self.tls {
            builder = builder.tls_config(load_tls(tls)?)?;
            info!("serving the metric RPC with mutual TLS");
        }
        let close = self.close.clone();
        builder
            .add_service(TelemetryServer::new(TelemetryService {
                buffer: self.buffer.clone(),
            }))
            .serve_with_incoming_shutdown(TcpListenerStream::new(listener), async move {
                close.cancelled().await;
            })
            .await?;
        Ok(())
    }

    /// Stop accepting connections; in-flight RPCs complete normally.
    pub fn close(&self) {
        self.close.cancel();
    }
}

fn load_tls(tls: &TlsConfig) -> Result<ServerTlsConfig, AdapterError> {
    let read = |path: &Path| {
        std::fs::read(path).map_err(|source| AdapterError::TlsMaterial {
            path: path.to_path_buf(),
            source,
        })
    };
    let certificate = read(&tls.certificate)?;
    let private_key = read(&tls.private_key)?;
    let ca_certificate = read(&tls.ca_certificate)?;
    Ok(ServerTlsConfig::new()
        .identity(Identity::from_pem(certificate, private_key))
        .client_ca_root(Certificate::from_pem(ca_certificate)))
}

struct TelemetryService {
    buffer: mpsc::Sender<String>,
}

#[tonic::async_trait]
impl Telemetry for TelemetryService {
    async fn publish(
        &self,
        request: Request<PublishRequest>,
    ) -> Result<Response<PublishResponse>, Status> {
        for record in request.into_inner().records {
            let json = normalize_record(&record);
            // Blocks when the buffer is full: backpressure on the caller.
            self.buffer
                .send(json)
                .await
                .map_err(|_| Status::unavailable("ingestion buffer is closed"))?;
        }
        Ok(Response::new(PublishResponse {}))
    }
}

/// Render one record as a flat JSON object string.
///
/// Attributes whose value cannot be represented (unset oneof, non-finite
/// double, malformed IP or timestamp) are dropped with a debug line; the
/// record itself is always produced. The metric magnitude, when present,
/// lands under the `value` key.
pub fn normalize_record(record: &Record) -> String {
    let mut object = serde_json::Map::new();
    for (name, value) in &record.attributes {
        match normalize_value(value) {
            Some(rendered) => {
                object.insert(name.clone(), rendered);
            }
            None => debug!(attribute = %name, "dropping attribute with unsupported value"),
        }
    }
    if let Some(value) = &record.value {
        match normalize_value(value) {
            Some(rendered) => {
                object.insert("value".to_string(), rendered);
            }
            None => debug!("dropping unsupported metric value"),
        }
    }
    serde_json::Value::Object(object).to_string()
}

fn normalize_value(value: &AttributeValue) -> Option<serde_json::Value> {
    use attribute_value::Kind;
    use serde_json::Value;

    match value.kind.as_ref()? {
        Kind::Int64Value(n) => Some((*n).into()),
        Kind::Uint64Value(n) => Some((*n).into()),
        Kind::DoubleValue(f) => serde_json::Number::from_f64(*f).map(Value::Number),
        Kind::BoolValue(b) => Some((*b).into()),
        Kind::StringValue(s) => Some(s.clone().into()),
        Kind::IpAddress(bytes) => format_ip(bytes).map(Value::String),
        Kind::DurationNanos(nanos) => Some(Value::String(nanos.to_string())),
        Kind::Timestamp(ts) => format_timestamp(ts.seconds, ts.nanos).map(Value::String),
        Kind::StringMap(map) => Some(Value::Object(
            map.entries
                .iter()
                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                .collect(),
        )),
    }
}

fn format_ip(bytes: &[u8]) -> Option<String> {
    match bytes.len() {
        4 => {
            let octets: [u8; 4] = bytes.try_into().ok()?;
            Some(Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = bytes.try_into().ok()?;
            Some(Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

fn format_timestamp(seconds: i64, nanos: i32) -> Option<String> {
    let nanos: u32 = nanos.try_into().ok()?;
    let instant = DateTime::<Utc>::from_timestamp(seconds, nanos)?;
    Some(instant.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}
