//! Wire types and gRPC client for the integrity-monitoring server.
//!
//! `proto` is the checked-in prost/tonic output for
//! `proto/sentinel.proto`; regenerate it with `tonic-prost-build` when
//! the service definition changes.

mod client;
pub mod proto;

pub use client::{ConnectError, RpcError, SentinelClient, TlsFiles};
