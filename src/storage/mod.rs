//! SQLite-backed attribution storage
//!
//! `AttributionStorageSql` is the only public entry point. Each public
//! operation:
//! 1. reads the clock once (truncated to microseconds)
//! 2. lazily opens the database
//! 3. runs inside one transaction, rolled back on any error
//! 4. reports failures as `InternalError` / empty results, never as `Err`
//!
//! If the database cannot be opened the engine closes for good and every
//! later call returns its safe default.

mod attribution;
mod clearing;
mod dedup;
mod pragma;
mod rate_limits;
mod reports;
mod schema;
mod sources;
mod sql_util;

pub use clearing::OriginFilter;

use crate::delegate::AttributionStorageDelegate;
use crate::error::StorageError;
use crate::results::{CreateReportResult, StorableSourceResult, StoreSourceResult};
use crate::types::{AttributionReport, Origin, ReportId, SourceRegistration, StoredSource, Trigger};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbStatus {
    /// The file did not exist on a read-only call; not created yet.
    DeferringCreation,
    Open,
    /// Initialization failed. Permanent.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DbCreationPolicy {
    CreateIfAbsent,
    IgnoreIfAbsent,
}

pub struct AttributionStorageSql {
    /// `None` for an in-memory database.
    path: Option<PathBuf>,
    delegate: Box<dyn AttributionStorageDelegate>,
    conn: Option<Connection>,
    db_status: Option<DbStatus>,
    now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>,
}

impl AttributionStorageSql {
    /// Storage backed by the database file at `path`, created on first write.
    pub fn new(path: impl AsRef<Path>, delegate: Box<dyn AttributionStorageDelegate>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            delegate,
            conn: None,
            db_status: None,
            now_fn: Box::new(Utc::now),
        }
    }

    pub fn new_in_memory(delegate: Box<dyn AttributionStorageDelegate>) -> Self {
        Self {
            path: None,
            delegate,
            conn: None,
            db_status: None,
            now_fn: Box::new(Utc::now),
        }
    }

    /// Replaces the clock (for testing).
    pub fn with_timestamp_fn(mut self, now_fn: Box<dyn Fn() -> DateTime<Utc> + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// True once initialization has failed.
    pub fn is_closed(&self) -> bool {
        self.db_status == Some(DbStatus::Closed)
    }

    fn now(&self) -> DateTime<Utc> {
        sql_util::truncate_to_micros((self.now_fn)())
    }

    fn lazy_init(&mut self, policy: DbCreationPolicy) -> bool {
        match self.db_status {
            Some(DbStatus::Open) => return true,
            Some(DbStatus::Closed) => return false,
            Some(DbStatus::DeferringCreation) | None => {}
        }

        if let Some(path) = &self.path {
            if policy == DbCreationPolicy::IgnoreIfAbsent && !path.exists() {
                self.db_status = Some(DbStatus::DeferringCreation);
                return false;
            }
        }

        match self.open_database() {
            Ok(conn) => {
                self.conn = Some(conn);
                self.db_status = Some(DbStatus::Open);
                true
            }
            Err(e) => {
                log::error!("❌ Attribution database initialization failed: {}", e);
                self.conn = None;
                self.db_status = Some(DbStatus::Closed);
                false
            }
        }
    }

    fn open_database(&self) -> Result<Connection, StorageError> {
        let mut conn = match &self.path {
            Some(path) => {
                if let Some(parent) = path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent)?;
                    }
                }
                Connection::open(path)?
            }
            None => Connection::open_in_memory()?,
        };

        pragma::apply_pragmas(&conn, self.path.is_none())?;
        schema::initialize(&mut conn)?;

        match &self.path {
            Some(path) => log::info!("✅ Attribution database ready at {}", path.display()),
            None => log::info!("✅ In-memory attribution database ready"),
        }
        Ok(conn)
    }

    /// Runs `operation` in a transaction. `None` if the database is not
    /// available or the operation failed (logged, rolled back).
    fn transact<T>(
        &mut self,
        policy: DbCreationPolicy,
        name: &str,
        operation: impl FnOnce(&Transaction<'_>, &mut dyn AttributionStorageDelegate) -> Result<T, StorageError>,
    ) -> Option<T> {
        if !self.lazy_init(policy) {
            return None;
        }
        let conn = self.conn.as_mut()?;
        let delegate = self.delegate.as_mut();

        let result = (|| {
            let tx = conn.transaction()?;
            let value = operation(&tx, delegate)?;
            tx.commit()?;
            Ok::<T, StorageError>(value)
        })();

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                log::error!("{} failed: {}", name, e);
                None
            }
        }
    }

    pub fn store_source(&mut self, registration: SourceRegistration) -> StoreSourceResult {
        let now = self.now();
        self.transact(DbCreationPolicy::CreateIfAbsent, "store_source", |tx, delegate| {
            sources::store_source(tx, delegate, registration, now)
        })
        .unwrap_or_else(|| StoreSourceResult::new(StorableSourceResult::InternalError))
    }

    pub fn maybe_create_and_store_report(&mut self, trigger: &Trigger) -> CreateReportResult {
        let now = self.now();
        self.transact(
            DbCreationPolicy::CreateIfAbsent,
            "maybe_create_and_store_report",
            |tx, delegate| attribution::maybe_create_and_store_report(tx, delegate, trigger, now),
        )
        .unwrap_or_else(CreateReportResult::internal_error)
    }

    /// Unexpired sources that have not been deactivated, oldest first.
    pub fn get_active_sources(&mut self, limit: Option<usize>) -> Vec<StoredSource> {
        let now = self.now();
        self.transact(DbCreationPolicy::IgnoreIfAbsent, "get_active_sources", |tx, _| {
            sources::get_active_sources(tx, now, limit)
        })
        .unwrap_or_default()
    }

    /// Reports due at or before `max_report_time`, in delegate-shuffled order.
    pub fn get_attribution_reports(
        &mut self,
        max_report_time: DateTime<Utc>,
        limit: Option<usize>,
    ) -> Vec<AttributionReport> {
        self.transact(DbCreationPolicy::IgnoreIfAbsent, "get_attribution_reports", |tx, delegate| {
            let mut reports = reports::get_reports(tx, max_report_time, limit)?;
            delegate.shuffle_reports(&mut reports);
            Ok(reports)
        })
        .unwrap_or_default()
    }

    pub fn get_report(&mut self, report_id: ReportId) -> Option<AttributionReport> {
        self.transact(DbCreationPolicy::IgnoreIfAbsent, "get_report", |tx, _| {
            reports::get_report(tx, report_id)
        })
        .flatten()
    }

    /// Earliest report time strictly after `after`, across both report kinds.
    pub fn get_next_report_time(&mut self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.transact(DbCreationPolicy::IgnoreIfAbsent, "get_next_report_time", |tx, _| {
            reports::next_report_time(tx, after)
        })
        .flatten()
    }

    /// Deletes a report after it was sent. Dedup keys and rate-limit records
    /// are kept. Returns false only on storage failure.
    pub fn delete_report(&mut self, report_id: ReportId) -> bool {
        let outcome = self.transact(DbCreationPolicy::IgnoreIfAbsent, "delete_report", |tx, _| {
            reports::delete_report(tx, report_id)
        });
        match outcome {
            Some(_) => true,
            None => self.db_status == Some(DbStatus::DeferringCreation),
        }
    }

    /// Counts a failed send and reschedules the report. Returns false if the
    /// report does not exist or storage failed.
    pub fn update_report_for_send_failure(&mut self, report_id: ReportId, new_report_time: DateTime<Utc>) -> bool {
        self.transact(
            DbCreationPolicy::IgnoreIfAbsent,
            "update_report_for_send_failure",
            |tx, _| reports::update_for_send_failure(tx, report_id, new_report_time),
        )
        .unwrap_or(false)
    }

    /// Reschedules reports whose time passed while nothing was sending them.
    /// Returns the earliest pending report time afterwards.
    pub fn adjust_offline_report_times(&mut self) -> Option<DateTime<Utc>> {
        let now = self.now();
        self.transact(
            DbCreationPolicy::IgnoreIfAbsent,
            "adjust_offline_report_times",
            |tx, delegate| reports::adjust_offline_report_times(tx, delegate, now),
        )
        .flatten()
    }

    /// Deletes sources registered and reports triggered within
    /// `[begin, end]` whose origins satisfy `filter`, plus matching rate-limit
    /// records. `None` matches every origin.
    pub fn clear_data(&mut self, begin: DateTime<Utc>, end: DateTime<Utc>, filter: OriginFilter<'_>) {
        let cleared = self.transact(DbCreationPolicy::IgnoreIfAbsent, "clear_data", |tx, _| {
            clearing::clear_data(tx, begin, end, filter)
        });
        if let Some(stats) = cleared {
            log::info!(
                "🧹 Cleared {} sources, {} reports, {} rate-limit records",
                stats.sources,
                stats.reports,
                stats.rate_limits
            );
        }
    }

    /// Reporting origins that currently own stored data.
    pub fn get_all_data_keys(&mut self) -> Vec<Origin> {
        self.transact(DbCreationPolicy::IgnoreIfAbsent, "get_all_data_keys", |tx, _| {
            clearing::all_data_keys(tx)
        })
        .unwrap_or_default()
    }

    /// Clears all-time data touching `origin`.
    pub fn delete_by_data_key(&mut self, origin: &Origin) {
        let matches = |candidate: &Origin| candidate == origin;
        self.clear_data(
            DateTime::<Utc>::MIN_UTC,
            DateTime::<Utc>::MAX_UTC,
            Some(&matches),
        );
    }
}
