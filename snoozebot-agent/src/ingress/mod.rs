//! Ingress API: HTTP/JSON (axum) and typed RPC (tonic), both thin
//! transports over the one [`crate::agent::Agent`] core so the two can
//! never drift apart in semantics.

pub mod convert;
pub mod grpc;
pub mod http;

pub use grpc::{CloudOperationsGrpc, IngressGrpc};
pub use http::router as http_router;
