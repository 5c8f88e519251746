//! # Observability
//!
//! Prometheus metrics exposed by the HTTP server in `crate::server`.

pub mod metrics;
