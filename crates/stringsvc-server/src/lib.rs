pub mod app;
pub mod codec;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod grpc;
pub mod http;
pub mod telemetry;

/// Generated protobuf types for `stringsvc.v1`.
pub mod proto {
    tonic::include_proto!("stringsvc.v1");
}

pub use app::{start, Dependencies, Server};
pub use config::{ServerArgs, ServerConfig};
pub use error::{ApiError, ServeError};
