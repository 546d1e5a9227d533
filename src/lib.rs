//! sitepulse - HTTP site reachability and latency monitoring.
//!
//! Probes registered sites on demand, stores every ping and keeps rolling
//! uptime and response-time statistics per site.

pub mod config;
pub mod db;
pub mod monitor;
pub mod probe;
pub mod web;

#[cfg(test)]
mod test_support;
