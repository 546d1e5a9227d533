//! SQLite database store implementation.

use chrono::{DateTime, NaiveDateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Result as SqlResult, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use uuid::Uuid;

use super::models::*;
use crate::config::RetryPolicy;
use crate::probe::ProbeState;

mod embedded {
    refinery::embed_migrations!("migrations");
}

const DB_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

const SITE_COLUMNS: &str = "id, name, url, slug, status, interval, created_at, updated_at";

const PING_COLUMNS: &str = "id, site_id, checked_at, is_up, response_time, status_code, \
                            location, region_code, error, created_at";

const STATS_COLUMNS: &str = "id, site_id, total_checks, successful_checks, \
                             uptime_1h, uptime_24h, uptime_7d, \
                             avg_response_time_1h, avg_response_time_24h, avg_response_time_7d, \
                             uptime_all_time, avg_response_time_all_time, \
                             current_status, last_checked, created_at, updated_at";

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
    #[error("Not found")]
    NotFound,
    #[error("database connection lock poisoned")]
    Poisoned,
}

/// Thread-safe database store shared by every probe pipeline.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;

        embedded::migrations::runner()
            .run(&mut conn)
            .map_err(|e| DbError::Migration(e.to_string()))?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Open the store, retrying according to `retry` before giving up.
    pub async fn connect<P: AsRef<Path>>(path: P, retry: &RetryPolicy) -> Result<Self, DbError> {
        let attempts = retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            match Self::new(path.as_ref()) {
                Ok(store) => return Ok(store),
                Err(e) if attempt < attempts => {
                    tracing::warn!(
                        "Database open failed (attempt {}/{}): {}; retrying in {:?}",
                        attempt,
                        attempts,
                        e,
                        retry.delay
                    );
                    tokio::time::sleep(retry.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>, DbError> {
        self.conn.lock().map_err(|_| DbError::Poisoned)
    }

    // --- Sites ---

    /// Register a site.
    pub fn add_site(&self, site: &Site) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO sites (id, name, url, slug, status, interval, created_at, updated_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                site.id.to_string(),
                site.name,
                site.url,
                site.slug,
                site.status.as_str(),
                site.interval,
                format_db_time(&site.created_at),
                format_db_time(&site.updated_at),
            ],
        )?;
        Ok(())
    }

    /// Delete a site together with its pings and stats.
    pub fn delete_site(&self, id: Uuid) -> Result<(), DbError> {
        let conn = self.lock()?;
        let deleted = conn.execute("DELETE FROM sites WHERE id = ?1", params![id.to_string()])?;
        if deleted == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Get a site by ID.
    pub fn find_site_by_id(&self, id: Uuid) -> Result<Option<Site>, DbError> {
        let conn = self.lock()?;
        let site = conn
            .query_row(
                &format!("SELECT {} FROM sites WHERE id = ?1", SITE_COLUMNS),
                params![id.to_string()],
                site_from_row,
            )
            .optional()?;
        Ok(site)
    }

    /// Get active sites, optionally restricted to the given ids.
    pub fn find_active_sites(&self, ids: Option<&[Uuid]>) -> Result<Vec<Site>, DbError> {
        let conn = self.lock()?;

        let sites = match ids {
            Some([]) => Vec::new(),
            Some(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sites WHERE status = 'active' AND id IN ({}) ORDER BY name",
                    SITE_COLUMNS, placeholders
                ))?;
                let rows = stmt
                    .query_map(params_from_iter(ids.iter().map(|id| id.to_string())), site_from_row)?
                    .collect::<SqlResult<Vec<_>>>()?;
                rows
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM sites WHERE status = 'active' ORDER BY name",
                    SITE_COLUMNS
                ))?;
                let rows = stmt
                    .query_map([], site_from_row)?
                    .collect::<SqlResult<Vec<_>>>()?;
                rows
            }
        };

        Ok(sites)
    }

    /// Get all sites ordered by name.
    pub fn list_sites(&self) -> Result<Vec<Site>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!("SELECT {} FROM sites ORDER BY name", SITE_COLUMNS))?;
        let sites = stmt
            .query_map([], site_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(sites)
    }

    // --- Pings ---

    /// Store a ping and return its generated ID.
    pub fn insert_ping(&self, ping: &NewPing) -> Result<Uuid, DbError> {
        let id = Uuid::new_v4();
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO pings (id, site_id, checked_at, is_up, response_time, status_code, \
             location, region_code, error, created_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id.to_string(),
                ping.site_id.to_string(),
                format_db_time(&ping.checked_at),
                ping.is_up,
                ping.response_time,
                ping.status_code,
                ping.location,
                ping.region_code,
                ping.error,
                format_db_time(&Utc::now()),
            ],
        )?;
        Ok(id)
    }

    /// Get a page of pings for a site, most recent first.
    pub fn site_pings(&self, site_id: Uuid, limit: u32, offset: u32) -> Result<Vec<PingRecord>, DbError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM pings WHERE site_id = ?1 ORDER BY checked_at DESC LIMIT ?2 OFFSET ?3",
            PING_COLUMNS
        ))?;
        let pings = stmt
            .query_map(params![site_id.to_string(), limit, offset], ping_from_row)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(pings)
    }

    /// Get the most recent ping for a site.
    pub fn latest_ping(&self, site_id: Uuid) -> Result<Option<PingRecord>, DbError> {
        let conn = self.lock()?;
        let ping = conn
            .query_row(
                &format!(
                    "SELECT {} FROM pings WHERE site_id = ?1 ORDER BY checked_at DESC LIMIT 1",
                    PING_COLUMNS
                ),
                params![site_id.to_string()],
                ping_from_row,
            )
            .optional()?;
        Ok(ping)
    }

    // --- Site Stats ---

    /// Get the stats row for a site.
    pub fn find_stats(&self, site_id: Uuid) -> Result<Option<SiteStats>, DbError> {
        let conn = self.lock()?;
        Ok(find_stats_in(&conn, site_id)?)
    }

    /// Insert a stats row. Fails if the site already has one.
    pub fn insert_stats(&self, stats: &SiteStats) -> Result<(), DbError> {
        let conn = self.lock()?;
        insert_stats_in(&conn, stats)?;
        Ok(())
    }

    /// Overwrite the mutable columns of a site's stats row.
    pub fn update_stats(&self, stats: &SiteStats) -> Result<(), DbError> {
        let conn = self.lock()?;
        if update_stats_in(&conn, stats)? == 0 {
            return Err(DbError::NotFound);
        }
        Ok(())
    }

    /// Read a site's stats row, compute its replacement and write it back,
    /// all inside one transaction.
    ///
    /// The connection lock is held throughout, so concurrent calls for the
    /// same site are applied one after another.
    pub fn modify_stats<F>(&self, site_id: Uuid, compute: F) -> Result<(SiteStats, StatsWrite), DbError>
    where
        F: FnOnce(Option<&SiteStats>) -> SiteStats,
    {
        let conn = self.lock()?;
        let tx = conn.unchecked_transaction()?;

        let current = find_stats_in(&tx, site_id)?;
        let next = compute(current.as_ref());

        let write = if current.is_some() {
            update_stats_in(&tx, &next)?;
            StatsWrite::Updated
        } else {
            insert_stats_in(&tx, &next)?;
            StatsWrite::Inserted
        };

        tx.commit()?;
        Ok((next, write))
    }
}

fn find_stats_in(conn: &Connection, site_id: Uuid) -> SqlResult<Option<SiteStats>> {
    conn.query_row(
        &format!("SELECT {} FROM site_stats WHERE site_id = ?1", STATS_COLUMNS),
        params![site_id.to_string()],
        stats_from_row,
    )
    .optional()
}

fn insert_stats_in(conn: &Connection, s: &SiteStats) -> SqlResult<usize> {
    conn.execute(
        &format!(
            "INSERT INTO site_stats ({}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            STATS_COLUMNS
        ),
        params![
            s.id.to_string(),
            s.site_id.to_string(),
            s.total_checks,
            s.successful_checks,
            s.uptime_1h,
            s.uptime_24h,
            s.uptime_7d,
            s.avg_response_time_1h,
            s.avg_response_time_24h,
            s.avg_response_time_7d,
            s.uptime_all_time,
            s.avg_response_time_all_time,
            s.current_status.as_str(),
            format_db_time(&s.last_checked),
            format_db_time(&s.created_at),
            format_db_time(&s.updated_at),
        ],
    )
}

fn update_stats_in(conn: &Connection, s: &SiteStats) -> SqlResult<usize> {
    conn.execute(
        "UPDATE site_stats SET total_checks=?1, successful_checks=?2, \
         uptime_1h=?3, uptime_24h=?4, uptime_7d=?5, \
         avg_response_time_1h=?6, avg_response_time_24h=?7, avg_response_time_7d=?8, \
         uptime_all_time=?9, avg_response_time_all_time=?10, \
         current_status=?11, last_checked=?12, updated_at=?13 \
         WHERE site_id=?14",
        params![
            s.total_checks,
            s.successful_checks,
            s.uptime_1h,
            s.uptime_24h,
            s.uptime_7d,
            s.avg_response_time_1h,
            s.avg_response_time_24h,
            s.avg_response_time_7d,
            s.uptime_all_time,
            s.avg_response_time_all_time,
            s.current_status.as_str(),
            format_db_time(&s.last_checked),
            format_db_time(&s.updated_at),
            s.site_id.to_string(),
        ],
    )
}

fn site_from_row(row: &Row<'_>) -> SqlResult<Site> {
    let status: String = row.get(4)?;
    Ok(Site {
        id: uuid_column(row, 0)?,
        name: row.get(1)?,
        url: row.get(2)?,
        slug: row.get(3)?,
        status: status.parse().map_err(|e: String| conversion_error(4, e))?,
        interval: row.get(5)?,
        created_at: time_column(row, 6)?,
        updated_at: time_column(row, 7)?,
    })
}

fn ping_from_row(row: &Row<'_>) -> SqlResult<PingRecord> {
    Ok(PingRecord {
        id: uuid_column(row, 0)?,
        site_id: uuid_column(row, 1)?,
        checked_at: time_column(row, 2)?,
        is_up: row.get(3)?,
        response_time: row.get(4)?,
        status_code: row.get(5)?,
        location: row.get(6)?,
        region_code: row.get(7)?,
        error: row.get(8)?,
        created_at: time_column(row, 9)?,
    })
}

fn stats_from_row(row: &Row<'_>) -> SqlResult<SiteStats> {
    let current_status: String = row.get(12)?;
    Ok(SiteStats {
        id: uuid_column(row, 0)?,
        site_id: uuid_column(row, 1)?,
        total_checks: row.get(2)?,
        successful_checks: row.get(3)?,
        uptime_1h: row.get(4)?,
        uptime_24h: row.get(5)?,
        uptime_7d: row.get(6)?,
        avg_response_time_1h: row.get(7)?,
        avg_response_time_24h: row.get(8)?,
        avg_response_time_7d: row.get(9)?,
        uptime_all_time: row.get(10)?,
        avg_response_time_all_time: row.get(11)?,
        current_status: current_status
            .parse::<ProbeState>()
            .map_err(|e| conversion_error(12, e))?,
        last_checked: time_column(row, 13)?,
        created_at: time_column(row, 14)?,
        updated_at: time_column(row, 15)?,
    })
}

fn uuid_column(row: &Row<'_>, idx: usize) -> SqlResult<Uuid> {
    let raw: String = row.get(idx)?;
    Uuid::parse_str(&raw).map_err(|e| conversion_error(idx, e.to_string()))
}

fn time_column(row: &Row<'_>, idx: usize) -> SqlResult<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_db_time(&raw).ok_or_else(|| conversion_error(idx, format!("invalid timestamp: {}", raw)))
}

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn format_db_time(dt: &DateTime<Utc>) -> String {
    dt.format(DB_TIME_FORMAT).to_string()
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    let formats = [
        DB_TIME_FORMAT,
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
