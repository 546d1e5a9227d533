//! Dispatching probes and recording their results.
//!
//! One pipeline per site: probe, store the ping, then fold the outcome into
//! the site's stats. Pipelines never wait on each other.

mod stats;

pub use stats::*;

use crate::config::MonitorLocation;
use crate::db::{DbError, NewPing, Site, SiteStats, Store};
use crate::probe::{ProbeOutcome, Prober};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Errors surfaced by the synchronous single-site check.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("site {0} not found")]
    NotFound(Uuid),
    #[error(transparent)]
    Store(#[from] DbError),
}

/// Full result of one probe pipeline.
#[derive(Debug, Clone)]
pub struct SiteCheck {
    pub site: Site,
    pub outcome: ProbeOutcome,
    pub checked_at: DateTime<Utc>,
    pub ping_id: Uuid,
    pub stats: SiteStats,
}

/// What a trigger resolved and launched. Dropping it leaves the pipelines
/// running.
#[derive(Debug)]
pub struct TriggerReport {
    pub sites_checked: usize,
    pub timestamp: DateTime<Utc>,
    tasks: Vec<JoinHandle<()>>,
}

impl TriggerReport {
    /// Handles of the launched pipelines, for callers that want to wait.
    pub fn into_tasks(self) -> Vec<JoinHandle<()>> {
        self.tasks
    }
}

/// Everything one pipeline needs, cheap to clone into a task.
#[derive(Clone)]
struct Pipeline {
    store: Arc<Store>,
    prober: Prober,
    aggregator: Arc<Aggregator>,
    location: MonitorLocation,
}

impl Pipeline {
    async fn execute(&self, site: &Site) -> Result<SiteCheck, CheckError> {
        tracing::debug!("Probing site {} ({})", site.id, site.url);

        let outcome = self.prober.probe(&site.url).await;
        let checked_at = Utc::now();

        let ping = NewPing::from_outcome(
            site.id,
            checked_at,
            &outcome,
            &self.location.location,
            &self.location.region_code,
        );
        let ping_id = self.store.insert_ping(&ping)?;
        tracing::debug!("Stored ping {} for site {}", ping_id, site.id);

        let stats = self.aggregator.update_stats(site.id, &outcome, checked_at)?;

        tracing::info!(
            "Checked site {}: {} in {}ms",
            site.id,
            outcome.state,
            outcome.elapsed_ms
        );

        Ok(SiteCheck {
            site: site.clone(),
            outcome,
            checked_at,
            ping_id,
            stats,
        })
    }
}

/// Launches probe pipelines for registered sites.
pub struct Dispatcher {
    store: Arc<Store>,
    pipeline: Pipeline,
    permits: Arc<Semaphore>,
}

impl Dispatcher {
    /// Create a dispatcher. At most `max_concurrent` triggered pipelines run
    /// at once; the rest wait for a slot.
    pub fn new(
        store: Arc<Store>,
        prober: Prober,
        location: MonitorLocation,
        max_concurrent: usize,
    ) -> Self {
        let aggregator = Arc::new(Aggregator::new(store.clone()));
        Self {
            pipeline: Pipeline {
                store: store.clone(),
                prober,
                aggregator,
                location,
            },
            store,
            permits: Arc::new(Semaphore::new(max_concurrent.clamp(1, Semaphore::MAX_PERMITS))),
        }
    }

    /// Keep the well-formed ids from a caller-supplied list.
    pub fn parse_site_ids<S: AsRef<str>>(raw: &[S]) -> Vec<Uuid> {
        raw.iter()
            .map(|s| s.as_ref().trim())
            .filter(|s| !s.is_empty())
            .filter_map(|s| Uuid::parse_str(s).ok())
            .collect()
    }

    /// Resolve the eligible sites and launch one pipeline per site without
    /// waiting for any of them.
    ///
    /// An empty `site_ids` selects every active site; otherwise only active
    /// sites among `site_ids` are probed.
    pub fn trigger(&self, site_ids: &[Uuid]) -> Result<TriggerReport, DbError> {
        let filter = if site_ids.is_empty() { None } else { Some(site_ids) };
        let sites = self.store.find_active_sites(filter)?;

        tracing::info!("Triggering {} background pings", sites.len());

        let sites_checked = sites.len();
        let tasks = sites
            .into_iter()
            .map(|site| {
                let pipeline = self.pipeline.clone();
                let permits = self.permits.clone();
                tokio::spawn(async move {
                    let _permit = match permits.acquire_owned().await {
                        Ok(p) => p,
                        Err(_) => return,
                    };
                    if let Err(e) = pipeline.execute(&site).await {
                        tracing::error!("Background ping failed for site {}: {}", site.id, e);
                    }
                })
            })
            .collect();

        Ok(TriggerReport {
            sites_checked,
            timestamp: Utc::now(),
            tasks,
        })
    }

    /// Run the whole pipeline for one registered site and wait for it.
    pub async fn check_single_site(&self, site_id: Uuid) -> Result<SiteCheck, CheckError> {
        let site = self
            .store
            .find_site_by_id(site_id)?
            .ok_or(CheckError::NotFound(site_id))?;

        self.pipeline.execute(&site).await
    }
}
