//! HTTP ingestion and query server for pulsemon metrics.

pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod middleware;
pub mod state;
