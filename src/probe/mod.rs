//! Probe module for site monitoring.
//!
//! A probe never fails towards its caller: every transport problem is folded
//! into a `down` [`ProbeOutcome`].

mod http;

pub use http::*;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Whether a site answered acceptably.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeState {
    Up,
    Down,
}

impl ProbeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeState::Up => "up",
            ProbeState::Down => "down",
        }
    }
}

impl fmt::Display for ProbeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(ProbeState::Up),
            "down" => Ok(ProbeState::Down),
            other => Err(format!("unknown probe state: {}", other)),
        }
    }
}

/// Result of a single probe.
///
/// `error` is set exactly when the state is `Down`, and a missing status code
/// always means `Down`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub state: ProbeState,
    pub status_code: Option<u16>,
    pub elapsed_ms: u64,
    pub error: Option<String>,
}

impl ProbeOutcome {
    /// Classify a received HTTP status: 2xx and 3xx are up.
    pub fn from_status(status_code: u16, elapsed_ms: u64) -> Self {
        if (200..400).contains(&status_code) {
            Self {
                state: ProbeState::Up,
                status_code: Some(status_code),
                elapsed_ms,
                error: None,
            }
        } else {
            Self {
                state: ProbeState::Down,
                status_code: Some(status_code),
                elapsed_ms,
                error: Some(format!("HTTP {}", status_code)),
            }
        }
    }

    /// A probe that got no HTTP response at all.
    pub fn failed(error: String, elapsed_ms: u64) -> Self {
        Self {
            state: ProbeState::Down,
            status_code: None,
            elapsed_ms,
            error: Some(error),
        }
    }

    pub fn is_up(&self) -> bool {
        self.state == ProbeState::Up
    }
}
