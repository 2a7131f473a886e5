//! Generated ingestion protocol types.

pub mod v1 {
    tonic::include_proto!("telemetry.v1");
}
