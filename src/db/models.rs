//! Database model types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::probe::{ProbeOutcome, ProbeState};

/// Lifecycle status of a registered site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SiteStatus {
    Active,
    Archive,
    NotTracking,
    Delete,
}

impl SiteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SiteStatus::Active => "active",
            SiteStatus::Archive => "archive",
            SiteStatus::NotTracking => "not_tracking",
            SiteStatus::Delete => "delete",
        }
    }
}

impl fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SiteStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SiteStatus::Active),
            "archive" => Ok(SiteStatus::Archive),
            "not_tracking" => Ok(SiteStatus::NotTracking),
            "delete" => Ok(SiteStatus::Delete),
            other => Err(format!("unknown site status: {}", other)),
        }
    }
}

/// A registered site. Owned by the registration layer; read-only here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Site {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub slug: String,
    pub status: SiteStatus,
    /// Requested check interval. Stored but not consulted when probing.
    pub interval: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Site {
    /// Build a new site with a fresh id.
    pub fn new(name: &str, url: &str, status: SiteStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            url: url.to_string(),
            slug: slugify(name),
            status,
            interval: "5m".to_string(),
            created_at: now,
            updated_at: now,
        }
    }
}

fn slugify(name: &str) -> String {
    name.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| part.to_ascii_lowercase())
        .collect::<Vec<_>>()
        .join("-")
}

/// A ping about to be stored.
#[derive(Debug, Clone)]
pub struct NewPing {
    pub site_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    pub response_time: Option<i64>,
    pub status_code: Option<i64>,
    pub location: Option<String>,
    pub region_code: Option<String>,
    pub error: Option<String>,
}

impl NewPing {
    /// Build a ping record from a probe outcome and the probing location.
    pub fn from_outcome(
        site_id: Uuid,
        checked_at: DateTime<Utc>,
        outcome: &ProbeOutcome,
        location: &str,
        region_code: &str,
    ) -> Self {
        Self {
            site_id,
            checked_at,
            is_up: outcome.is_up(),
            response_time: Some(outcome.elapsed_ms as i64),
            status_code: outcome.status_code.map(i64::from),
            location: Some(location.to_string()),
            region_code: Some(region_code.to_string()),
            error: outcome.error.clone(),
        }
    }
}

/// A stored ping. Never mutated after insertion.
#[derive(Debug, Clone, Serialize)]
pub struct PingRecord {
    pub id: Uuid,
    pub site_id: Uuid,
    pub checked_at: DateTime<Utc>,
    pub is_up: bool,
    pub response_time: Option<i64>,
    pub status_code: Option<i64>,
    pub location: Option<String>,
    pub region_code: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Rolling statistics for one site. Exactly one row per site.
///
/// The windowed fields (`1h`, `24h`, `7d`) mirror the all-time values.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteStats {
    pub id: Uuid,
    pub site_id: Uuid,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub uptime_1h: f64,
    pub uptime_24h: f64,
    pub uptime_7d: f64,
    pub avg_response_time_1h: i64,
    pub avg_response_time_24h: i64,
    pub avg_response_time_7d: i64,
    pub uptime_all_time: f64,
    pub avg_response_time_all_time: i64,
    pub current_status: ProbeState,
    pub last_checked: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a read-modify-write on a stats row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsWrite {
    Inserted,
    Updated,
}
