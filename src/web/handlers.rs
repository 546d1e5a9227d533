//! HTTP request handlers.

use super::AppState;
use crate::db::{PingRecord, SiteStatus};
use crate::monitor::{CheckError, Dispatcher};
use crate::probe::ProbeState;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

const DEFAULT_PING_LIMIT: u32 = 50;

fn iso(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(json!({ "error": message }))).into_response()
}

// ============================================================================
// Index
// ============================================================================

pub async fn handle_index() -> impl IntoResponse {
    Json(json!({ "message": "pong" }))
}

// ============================================================================
// Monitoring: single-site check
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSiteRequest {
    pub site_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckSiteResponse {
    pub site_id: Uuid,
    pub site_name: String,
    pub url: String,
    pub status: ProbeState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub response_time: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub checked_at: String,
    pub ping_id: Uuid,
}

pub async fn handle_check_site(
    State(state): State<AppState>,
    payload: Result<Json<CheckSiteRequest>, JsonRejection>,
) -> Response {
    let site_id = match payload
        .ok()
        .and_then(|Json(req)| Uuid::parse_str(req.site_id.trim()).ok())
    {
        Some(id) => id,
        None => return error_response(StatusCode::BAD_REQUEST, "Invalid site ID provided"),
    };

    tracing::info!("Checking registered site: {}", site_id);

    match state.dispatcher.check_single_site(site_id).await {
        Ok(check) => Json(CheckSiteResponse {
            site_id: check.site.id,
            site_name: check.site.name,
            url: check.site.url,
            status: check.outcome.state,
            status_code: check.outcome.status_code,
            response_time: check.outcome.elapsed_ms,
            error: check.outcome.error,
            checked_at: iso(&check.checked_at),
            ping_id: check.ping_id,
        })
        .into_response(),
        Err(CheckError::NotFound(_)) => error_response(StatusCode::NOT_FOUND, "Site not found"),
        Err(e) => {
            tracing::error!("Error checking site {}: {}", site_id, e);
            error_response(StatusCode::BAD_REQUEST, "Failed to check site")
        }
    }
}

// ============================================================================
// Monitoring: ping history
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct PingsQuery {
    #[serde(default)]
    pub limit: Option<String>,
    #[serde(default)]
    pub offset: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPing {
    pub id: Uuid,
    pub checked_at: String,
    pub is_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub region_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<PingRecord> for ApiPing {
    fn from(p: PingRecord) -> Self {
        Self {
            id: p.id,
            checked_at: iso(&p.checked_at),
            is_up: p.is_up,
            response_time: p.response_time,
            status_code: p.status_code,
            location: p.location,
            region_code: p.region_code,
            error: p.error,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingHistoryResponse {
    pub site_id: Uuid,
    pub site_name: String,
    pub pings: Vec<ApiPing>,
    pub total_count: usize,
    pub timestamp: String,
}

pub async fn handle_site_pings(
    State(state): State<AppState>,
    Path(site_id): Path<String>,
    Query(query): Query<PingsQuery>,
) -> Response {
    // a malformed id cannot name a registered site
    let site_id = match Uuid::parse_str(&site_id) {
        Ok(id) => id,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "Site not found"),
    };

    let limit = parse_or(query.limit.as_deref(), DEFAULT_PING_LIMIT);
    let offset = parse_or(query.offset.as_deref(), 0);

    let site = match state.store.find_site_by_id(site_id) {
        Ok(Some(site)) => site,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Site not found"),
        Err(e) => {
            tracing::error!("Error fetching site {}: {}", site_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch ping history");
        }
    };

    match state.store.site_pings(site_id, limit, offset) {
        Ok(pings) => {
            let pings: Vec<ApiPing> = pings.into_iter().map(ApiPing::from).collect();
            Json(PingHistoryResponse {
                site_id: site.id,
                site_name: site.name,
                total_count: pings.len(),
                pings,
                timestamp: iso(&Utc::now()),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Error fetching ping history for {}: {}", site_id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch ping history")
        }
    }
}

fn parse_or(raw: Option<&str>, default: u32) -> u32 {
    raw.and_then(|s| s.trim().parse().ok()).unwrap_or(default)
}

// ============================================================================
// Monitoring: all websites
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiLastPing {
    pub is_up: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_time: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<i64>,
    pub checked_at: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiWebsite {
    pub id: Uuid,
    pub name: String,
    pub url: String,
    pub status: SiteStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_ping: Option<ApiLastPing>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebsitesResponse {
    pub websites: Vec<ApiWebsite>,
    pub total_count: usize,
    pub timestamp: String,
}

pub async fn handle_websites(State(state): State<AppState>) -> Response {
    let sites = match state.store.list_sites() {
        Ok(sites) => sites,
        Err(e) => {
            tracing::error!("Error fetching websites: {}", e);
            let empty = WebsitesResponse {
                websites: Vec::new(),
                total_count: 0,
                timestamp: iso(&Utc::now()),
            };
            return (StatusCode::INTERNAL_SERVER_ERROR, Json(empty)).into_response();
        }
    };

    let websites: Vec<ApiWebsite> = sites
        .into_iter()
        .map(|site| {
            let last_ping = match state.store.latest_ping(site.id) {
                Ok(ping) => ping.map(|p| ApiLastPing {
                    is_up: p.is_up,
                    response_time: p.response_time,
                    status_code: p.status_code,
                    checked_at: iso(&p.checked_at),
                }),
                Err(e) => {
                    tracing::warn!("Failed to get ping data for site {}: {}", site.id, e);
                    None
                }
            };

            ApiWebsite {
                id: site.id,
                name: site.name,
                url: site.url,
                status: site.status,
                last_ping,
            }
        })
        .collect();

    Json(WebsitesResponse {
        total_count: websites.len(),
        websites,
        timestamp: iso(&Utc::now()),
    })
    .into_response()
}

// ============================================================================
// Ping triggers
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerRequest {
    #[serde(default)]
    pub site_ids: Option<Vec<Value>>,
}

impl TriggerRequest {
    /// Lenient body parsing: anything unreadable counts as an empty request.
    fn from_body(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }

    fn site_ids(&self) -> Vec<Uuid> {
        let raw: Vec<&str> = self
            .site_ids
            .iter()
            .flatten()
            .filter_map(Value::as_str)
            .collect();
        Dispatcher::parse_site_ids(&raw)
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerResponse {
    pub message: String,
    pub sites_checked: usize,
    pub results: Vec<Value>,
    pub skipped: Vec<Value>,
    pub timestamp: String,
}

pub async fn handle_trigger(State(state): State<AppState>, body: Bytes) -> Response {
    let request = TriggerRequest::from_body(&body);
    let site_ids = request.site_ids();

    match state.dispatcher.trigger(&site_ids) {
        Ok(report) => {
            let message = format!("Triggered {} background pings", report.sites_checked);
            tracing::info!("{}", message);
            Json(TriggerResponse {
                message,
                sites_checked: report.sites_checked,
                results: Vec::new(),
                skipped: Vec::new(),
                timestamp: iso(&report.timestamp),
            })
            .into_response()
        }
        Err(e) => {
            tracing::error!("Error in ping trigger: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to trigger pings")
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteDueStatus {
    pub site_id: Uuid,
    pub site_name: String,
    pub url: String,
    pub interval: String,
    pub next_ping_due: String,
    pub is_due: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerStatusResponse {
    pub total_active_sites: usize,
    pub sites_due: usize,
    pub sites_not_due: usize,
    pub sites: Vec<SiteDueStatus>,
    pub timestamp: String,
}

/// Every active site is reported as due now; intervals are not consulted.
pub async fn handle_trigger_status(State(state): State<AppState>) -> Response {
    let sites = match state.store.find_active_sites(None) {
        Ok(sites) => sites,
        Err(e) => {
            tracing::error!("Error getting trigger status: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to get trigger status");
        }
    };

    let now = iso(&Utc::now());
    let sites: Vec<SiteDueStatus> = sites
        .into_iter()
        .map(|site| SiteDueStatus {
            site_id: site.id,
            site_name: site.name,
            url: site.url,
            interval: site.interval,
            next_ping_due: now.clone(),
            is_due: true,
        })
        .collect();

    Json(TriggerStatusResponse {
        total_active_sites: sites.len(),
        sites_due: sites.len(),
        sites_not_due: 0,
        sites,
        timestamp: now,
    })
    .into_response()
}
