//! Inbound adapters that translate external requests into domain calls
//! while keeping framework details at the edge.
//!
//! HTTP middleware and probes live under [`http`].

pub mod http;
