//! Shared data model and wire helpers for the pulsemon agent and server.
//!
//! [`types::Metric`] is the only domain entity. It travels over the network,
//! into the file snapshot and out of the HTTP API as the JSON shape described
//! by [`types::MetricPayload`].

pub mod codec;
pub mod retry;
pub mod signing;
pub mod types;
pub mod validate;
