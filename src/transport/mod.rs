//! HTTP plumbing between a vendor endpoint and the streaming pipeline.

pub mod http;

pub use http::{body_stream, HttpTransport, TransportError};
