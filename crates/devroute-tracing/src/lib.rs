//! Tracing setup shared by devroute binaries: fmt output (JSON or text),
//! optional OTLP export, and span helper macros.

pub mod config;
pub mod otlp;
pub mod spans;

pub use config::{LogFormat, OtlpProtocol, TracingConfig};
pub use otlp::{init_tracing, TracingGuard};
