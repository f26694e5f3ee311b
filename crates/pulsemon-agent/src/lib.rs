//! The pulsemon agent: samples local metrics on one cadence and delivers
//! them to the server on another.

pub mod config;
pub mod scheduler;
pub mod snapshot;
pub mod transport;

#[cfg(test)]
mod test_support;
