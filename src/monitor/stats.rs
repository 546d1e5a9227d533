//! Per-site statistics aggregation.
//!
//! Every probe result is folded into the site's single stats row: counters,
//! uptime percentage, running mean of successful response times and the
//! current status.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::db::{DbError, SiteStats, StatsWrite, Store};
use crate::probe::{ProbeOutcome, ProbeState};

/// Folds probe outcomes into the stored statistics of each site.
pub struct Aggregator {
    store: Arc<Store>,
}

impl Aggregator {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Create or update the stats row of `site_id` with one more outcome.
    ///
    /// Storage errors are logged and returned; nothing is retried.
    pub fn update_stats(
        &self,
        site_id: Uuid,
        outcome: &ProbeOutcome,
        checked_at: DateTime<Utc>,
    ) -> Result<SiteStats, DbError> {
        let now = Utc::now();

        let result = self.store.modify_stats(site_id, |current| match current {
            Some(current) => next_stats(current, outcome, checked_at, now),
            None => initial_stats(site_id, outcome, checked_at, now),
        });

        match result {
            Ok((stats, StatsWrite::Inserted)) => {
                tracing::debug!("Created stats for site {}", site_id);
                Ok(stats)
            }
            Ok((stats, StatsWrite::Updated)) => {
                tracing::debug!(
                    "Updated stats for site {}: {}/{} ({:.1}%)",
                    site_id,
                    stats.successful_checks,
                    stats.total_checks,
                    stats.uptime_all_time
                );
                Ok(stats)
            }
            Err(e) => {
                tracing::error!("Failed to update stats for site {}: {}", site_id, e);
                Err(e)
            }
        }
    }
}

/// Stats row for a site's very first probe.
pub fn initial_stats(
    site_id: Uuid,
    outcome: &ProbeOutcome,
    checked_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SiteStats {
    let is_up = outcome.is_up();
    let uptime = if is_up { 100.0 } else { 0.0 };
    let avg = if is_up { outcome.elapsed_ms as i64 } else { 0 };

    SiteStats {
        id: Uuid::new_v4(),
        site_id,
        total_checks: 1,
        successful_checks: if is_up { 1 } else { 0 },
        uptime_1h: uptime,
        uptime_24h: uptime,
        uptime_7d: uptime,
        avg_response_time_1h: avg,
        avg_response_time_24h: avg,
        avg_response_time_7d: avg,
        uptime_all_time: uptime,
        avg_response_time_all_time: avg,
        current_status: outcome.state,
        last_checked: checked_at,
        created_at: now,
        updated_at: now,
    }
}

/// Fold one more outcome into an existing stats row.
///
/// Windowed fields are set to the all-time values.
pub fn next_stats(
    current: &SiteStats,
    outcome: &ProbeOutcome,
    checked_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> SiteStats {
    let is_up = outcome.state == ProbeState::Up;
    let total = current.total_checks + 1;
    let successful = current.successful_checks + if is_up { 1 } else { 0 };
    let uptime = successful as f64 / total as f64 * 100.0;

    let elapsed = outcome.elapsed_ms as i64;
    let avg = if is_up && elapsed > 0 {
        running_average(current.avg_response_time_all_time, elapsed, successful)
    } else {
        current.avg_response_time_all_time
    };

    SiteStats {
        total_checks: total,
        successful_checks: successful,
        uptime_1h: uptime,
        uptime_24h: uptime,
        uptime_7d: uptime,
        avg_response_time_1h: avg,
        avg_response_time_24h: avg,
        avg_response_time_7d: avg,
        uptime_all_time: uptime,
        avg_response_time_all_time: avg,
        current_status: outcome.state,
        last_checked: checked_at,
        updated_at: now,
        ..current.clone()
    }
}

/// Mean after `count` samples, given the mean of the first `count - 1`.
fn running_average(current_avg: i64, new_value: i64, count: i64) -> i64 {
    if count <= 1 {
        return new_value;
    }
    let weighted = current_avg as f64 * (count - 1) as f64 + new_value as f64;
    (weighted / count as f64).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{Site, SiteStatus};
    use crate::test_support::temp_store;
    use chrono::Duration as ChronoDuration;

    fn up(ms: u64) -> ProbeOutcome {
        ProbeOutcome::from_status(200, ms)
    }

    fn down(ms: u64) -> ProbeOutcome {
        ProbeOutcome::failed("Network error".to_string(), ms)
    }

    fn fold(outcomes: &[ProbeOutcome]) -> Vec<SiteStats> {
        let site_id = Uuid::new_v4();
        let now = Utc::now();
        let mut history: Vec<SiteStats> = Vec::new();
        for outcome in outcomes {
            let next = match history.last() {
                Some(current) => next_stats(current, outcome, now, now),
                None => initial_stats(site_id, outcome, now, now),
            };
            history.push(next);
        }
        history
    }

    #[test]
    fn test_first_up_probe_creates_row() {
        let stats = initial_stats(Uuid::new_v4(), &up(120), Utc::now(), Utc::now());
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.successful_checks, 1);
        assert_eq!(stats.uptime_all_time, 100.0);
        assert_eq!(stats.uptime_1h, 100.0);
        assert_eq!(stats.avg_response_time_all_time, 120);
        assert_eq!(stats.avg_response_time_7d, 120);
        assert_eq!(stats.current_status, ProbeState::Up);
    }

    #[test]
    fn test_first_down_probe_creates_row() {
        let stats = initial_stats(Uuid::new_v4(), &down(900), Utc::now(), Utc::now());
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.successful_checks, 0);
        assert_eq!(stats.uptime_all_time, 0.0);
        assert_eq!(stats.avg_response_time_all_time, 0);
        assert_eq!(stats.current_status, ProbeState::Down);
    }

    #[test]
    fn test_existing_row_folds_new_sample() {
        let mut current = initial_stats(Uuid::new_v4(), &up(150), Utc::now(), Utc::now());
        current.total_checks = 4;
        current.successful_checks = 3;
        current.avg_response_time_all_time = 150;

        let next = next_stats(&current, &up(250), Utc::now(), Utc::now());
        assert_eq!(next.total_checks, 5);
        assert_eq!(next.successful_checks, 4);
        assert_eq!(next.avg_response_time_all_time, 175);
        assert_eq!(next.avg_response_time_24h, 175);
        assert!((next.uptime_all_time - 80.0).abs() < 1e-9);
        assert_eq!(next.id, current.id);
        assert_eq!(next.created_at, current.created_at);
    }

    #[test]
    fn test_running_average_sequence() {
        let history = fold(&[up(100), up(200), up(300)]);
        let averages: Vec<i64> = history.iter().map(|s| s.avg_response_time_all_time).collect();
        assert_eq!(averages, vec![100, 150, 200]);
    }

    #[test]
    fn test_down_probe_keeps_average() {
        let history = fold(&[up(100), down(5000), up(300)]);
        assert_eq!(history[1].avg_response_time_all_time, 100);
        assert_eq!(history[1].current_status, ProbeState::Down);
        assert_eq!(history[2].avg_response_time_all_time, 200);
        assert_eq!(history[2].current_status, ProbeState::Up);
    }

    #[test]
    fn test_zero_latency_up_keeps_average() {
        let history = fold(&[up(100), up(0)]);
        assert_eq!(history[1].successful_checks, 2);
        assert_eq!(history[1].avg_response_time_all_time, 100);
    }

    #[test]
    fn test_counters_after_mixed_outcomes() {
        let outcomes = [up(10), down(10), down(10), up(10), up(10), down(10), up(10)];
        let last = fold(&outcomes).pop().unwrap();
        let n = outcomes.len() as i64;
        let k = outcomes.iter().filter(|o| o.is_up()).count() as i64;

        assert_eq!(last.total_checks, n);
        assert_eq!(last.successful_checks, k);
        assert!((last.uptime_all_time - k as f64 / n as f64 * 100.0).abs() < 1e-9);
        assert_eq!(last.uptime_7d, last.uptime_all_time);
        assert!(last.successful_checks <= last.total_checks);
    }

    #[test]
    fn test_aggregator_creates_then_updates() {
        let (_tmp, store) = temp_store();
        let site = Site::new("Example", "https://example.com", SiteStatus::Active);
        store.add_site(&site).unwrap();
        let aggregator = Aggregator::new(store.clone());

        let first_check = Utc::now();
        aggregator.update_stats(site.id, &up(120), first_check).unwrap();
        let stats = store.find_stats(site.id).unwrap().unwrap();
        assert_eq!(stats.total_checks, 1);
        assert_eq!(stats.successful_checks, 1);
        assert_eq!(stats.uptime_all_time, 100.0);
        assert_eq!(stats.avg_response_time_all_time, 120);

        let second_check = first_check + ChronoDuration::seconds(30);
        aggregator.update_stats(site.id, &down(10_000), second_check).unwrap();
        let stats = store.find_stats(site.id).unwrap().unwrap();
        assert_eq!(stats.total_checks, 2);
        assert_eq!(stats.successful_checks, 1);
        assert_eq!(stats.uptime_all_time, 50.0);
        assert_eq!(stats.avg_response_time_all_time, 120);
        assert_eq!(stats.current_status, ProbeState::Down);
        assert_eq!(stats.last_checked, second_check);
    }

    #[test]
    fn test_aggregator_propagates_storage_errors() {
        let (_tmp, store) = temp_store();
        let aggregator = Aggregator::new(store);

        // no such site: the foreign key rejects the insert
        let result = aggregator.update_stats(Uuid::new_v4(), &up(50), Utc::now());
        assert!(matches!(result, Err(DbError::Sqlite(_))));
    }
}
