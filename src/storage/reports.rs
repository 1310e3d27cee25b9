//! Report factory and scheduler over the `reports` table

use super::sources;
use super::sql_util::{from_micros, to_micros, u64_from_sql, u64_to_sql};
use crate::delegate::AttributionStorageDelegate;
use crate::error::StorageError;
use crate::types::{
    AggregatableData, AggregatableHistogramContribution, AggregationCoordinator, AttributionInfo,
    AttributionReport, EventLevelData, ReportData, ReportId, ReportType, SourceId, StoredSource,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashMap;
use uuid::Uuid;

const TABLE: &str = "reports";

const REPORT_COLUMNS: &str = "report_id, source_id, report_type, trigger_time, report_time, \
     failed_send_attempts, external_report_id, debug_key, trigger_data, priority, \
     randomized_trigger_rate, contributions, aggregation_coordinator, initial_report_time";

struct ReportRow {
    report_id: i64,
    source_id: i64,
    report_type: i64,
    trigger_time: i64,
    report_time: i64,
    failed_send_attempts: i64,
    external_report_id: String,
    debug_key: Option<i64>,
    trigger_data: Option<i64>,
    priority: Option<i64>,
    randomized_trigger_rate: Option<f64>,
    contributions: Option<String>,
    aggregation_coordinator: Option<String>,
    initial_report_time: Option<i64>,
}

impl ReportRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            report_id: row.get(0)?,
            source_id: row.get(1)?,
            report_type: row.get(2)?,
            trigger_time: row.get(3)?,
            report_time: row.get(4)?,
            failed_send_attempts: row.get(5)?,
            external_report_id: row.get(6)?,
            debug_key: row.get(7)?,
            trigger_data: row.get(8)?,
            priority: row.get(9)?,
            randomized_trigger_rate: row.get(10)?,
            contributions: row.get(11)?,
            aggregation_coordinator: row.get(12)?,
            initial_report_time: row.get(13)?,
        })
    }

    fn into_report(self, source: StoredSource) -> Result<AttributionReport, StorageError> {
        let missing = |column: &str| StorageError::corrupt(TABLE, format!("report {} has no {}", self.report_id, column));

        let report_type = ReportType::from_sql(self.report_type)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("report_type {}", self.report_type)))?;

        let data = match report_type {
            ReportType::EventLevel => ReportData::EventLevel(EventLevelData {
                trigger_data: u64_from_sql(self.trigger_data.ok_or_else(|| missing("trigger_data"))?),
                priority: self.priority.ok_or_else(|| missing("priority"))?,
                randomized_trigger_rate: self
                    .randomized_trigger_rate
                    .ok_or_else(|| missing("randomized_trigger_rate"))?,
            }),
            ReportType::Aggregatable => {
                let contributions: Vec<AggregatableHistogramContribution> = serde_json::from_str(
                    self.contributions.as_deref().ok_or_else(|| missing("contributions"))?,
                )?;
                let coordinator = self
                    .aggregation_coordinator
                    .as_deref()
                    .ok_or_else(|| missing("aggregation_coordinator"))?;
                ReportData::Aggregatable(AggregatableData {
                    contributions,
                    aggregation_coordinator: AggregationCoordinator::from_str_opt(coordinator)
                        .ok_or_else(|| StorageError::corrupt(TABLE, format!("coordinator '{}'", coordinator)))?,
                    initial_report_time: from_micros(
                        TABLE,
                        self.initial_report_time.ok_or_else(|| missing("initial_report_time"))?,
                    )?,
                })
            }
        };

        let external_report_id = Uuid::parse_str(&self.external_report_id)
            .map_err(|e| StorageError::corrupt(TABLE, format!("external_report_id: {}", e)))?;

        Ok(AttributionReport {
            id: Some(ReportId(self.report_id)),
            attribution_info: AttributionInfo {
                source,
                time: from_micros(TABLE, self.trigger_time)?,
                debug_key: self.debug_key.map(u64_from_sql),
            },
            report_time: from_micros(TABLE, self.report_time)?,
            failed_send_attempts: self.failed_send_attempts,
            external_report_id,
            data,
        })
    }
}

/// Decodes report rows, loading each owning source once.
fn assemble(conn: &Connection, rows: Vec<ReportRow>) -> Result<Vec<AttributionReport>, StorageError> {
    let mut sources_by_id: HashMap<i64, StoredSource> = HashMap::new();
    let mut reports = Vec::with_capacity(rows.len());

    for row in rows {
        let source = match sources_by_id.get(&row.source_id) {
            Some(source) => source.clone(),
            None => {
                let source = sources::get_source(conn, SourceId(row.source_id))?.ok_or_else(|| {
                    StorageError::corrupt(
                        TABLE,
                        format!("report {} references missing source {}", row.report_id, row.source_id),
                    )
                })?;
                sources_by_id.insert(row.source_id, source.clone());
                source
            }
        };
        reports.push(row.into_report(source)?);
    }
    Ok(reports)
}

pub(crate) fn insert_report(conn: &Connection, report: &AttributionReport) -> Result<ReportId, StorageError> {
    let info = &report.attribution_info;
    let (trigger_data, priority, rate, contributions, coordinator, initial_report_time) = match &report.data {
        ReportData::EventLevel(data) => (
            Some(u64_to_sql(data.trigger_data)),
            Some(data.priority),
            Some(data.randomized_trigger_rate),
            None,
            None,
            None,
        ),
        ReportData::Aggregatable(data) => (
            None,
            None,
            None,
            Some(serde_json::to_string(&data.contributions)?),
            Some(data.aggregation_coordinator.as_str()),
            Some(to_micros(data.initial_report_time)),
        ),
    };

    conn.execute(
        "INSERT INTO reports (
            source_id, report_type, trigger_time, report_time, failed_send_attempts,
            external_report_id, debug_key, trigger_data, priority, randomized_trigger_rate,
            contributions, aggregation_coordinator, initial_report_time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            info.source.source_id.0,
            report.report_type().to_sql(),
            to_micros(info.time),
            to_micros(report.report_time),
            report.failed_send_attempts,
            report.external_report_id.to_string(),
            info.debug_key.map(u64_to_sql),
            trigger_data,
            priority,
            rate,
            contributions,
            coordinator,
            initial_report_time,
        ],
    )?;
    Ok(ReportId(conn.last_insert_rowid()))
}

pub(crate) fn get_report(conn: &Connection, report_id: ReportId) -> Result<Option<AttributionReport>, StorageError> {
    let sql = format!("SELECT {} FROM reports WHERE report_id = ?1", REPORT_COLUMNS);
    let row = conn
        .query_row(&sql, params![report_id.0], ReportRow::from_row)
        .optional()?;
    match row {
        Some(row) => Ok(assemble(conn, vec![row])?.pop()),
        None => Ok(None),
    }
}

/// Reports due at or before `max_report_time`, oldest id first.
pub(crate) fn get_reports(
    conn: &Connection,
    max_report_time: DateTime<Utc>,
    limit: Option<usize>,
) -> Result<Vec<AttributionReport>, StorageError> {
    let sql = format!(
        "SELECT {} FROM reports WHERE report_time <= ?1 ORDER BY report_id LIMIT ?2",
        REPORT_COLUMNS
    );
    let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params![to_micros(max_report_time), limit], ReportRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    assemble(conn, rows)
}

pub(crate) fn next_report_time(
    conn: &Connection,
    after: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    let next: Option<i64> = conn.query_row(
        "SELECT MIN(report_time) FROM reports WHERE report_time > ?1",
        params![to_micros(after)],
        |row| row.get(0),
    )?;
    next.map(|micros| from_micros(TABLE, micros)).transpose()
}

pub(crate) fn delete_report(conn: &Connection, report_id: ReportId) -> Result<usize, StorageError> {
    Ok(conn.execute("DELETE FROM reports WHERE report_id = ?1", params![report_id.0])?)
}

/// Returns false if the report does not exist.
pub(crate) fn update_for_send_failure(
    conn: &Connection,
    report_id: ReportId,
    new_report_time: DateTime<Utc>,
) -> Result<bool, StorageError> {
    let updated = conn.execute(
        "UPDATE reports
         SET failed_send_attempts = failed_send_attempts + 1, report_time = ?1
         WHERE report_id = ?2",
        params![to_micros(new_report_time), report_id.0],
    )?;
    Ok(updated == 1)
}

/// Moves every overdue report to `now` plus a sampled delay and returns the
/// earliest pending report time. `None` if adjustment is disabled.
pub(crate) fn adjust_offline_report_times(
    conn: &Connection,
    delegate: &mut dyn AttributionStorageDelegate,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, StorageError> {
    let Some(delay) = delegate.offline_report_delay_config() else {
        return Ok(None);
    };

    let overdue: Vec<i64> = {
        let mut stmt = conn.prepare("SELECT report_id FROM reports WHERE report_time < ?1")?;
        let ids = stmt
            .query_map(params![to_micros(now)], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        ids
    };

    let mut update = conn.prepare("UPDATE reports SET report_time = ?1 WHERE report_id = ?2")?;
    for report_id in &overdue {
        let new_time = now + delegate.sample_offline_report_delay(&delay);
        update.execute(params![to_micros(new_time), report_id])?;
    }
    if !overdue.is_empty() {
        log::info!("⏰ Rescheduled {} overdue reports", overdue.len());
    }

    next_report_time(conn, DateTime::<Utc>::MIN_UTC)
}

/// Pending reports of `report_type` whose source points at `destination_site`.
pub(crate) fn count_reports_for_destination(
    conn: &Connection,
    report_type: ReportType,
    destination_site: &str,
) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM reports r
         JOIN sources s ON s.source_id = r.source_id
         WHERE r.report_type = ?1 AND s.destination_site = ?2",
        params![report_type.to_sql(), destination_site],
        |row| row.get(0),
    )?)
}

/// Replacement candidate among a source's pending event-level reports in the
/// window ending at `report_time`: lowest priority, most recent trigger on ties.
pub(crate) fn lowest_priority_event_level_report(
    conn: &Connection,
    source_id: SourceId,
    report_time: DateTime<Utc>,
) -> Result<Option<AttributionReport>, StorageError> {
    let report_id: Option<i64> = conn
        .query_row(
            "SELECT report_id FROM reports
             WHERE source_id = ?1 AND report_type = ?2 AND report_time = ?3
             ORDER BY priority ASC, trigger_time DESC, report_id DESC
             LIMIT 1",
            params![source_id.0, ReportType::EventLevel.to_sql(), to_micros(report_time)],
            |row| row.get(0),
        )
        .optional()?;
    match report_id {
        Some(id) => get_report(conn, ReportId(id)),
        None => Ok(None),
    }
}

pub(crate) fn delete_for_sources(conn: &Connection, source_ids: &[SourceId]) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare("DELETE FROM reports WHERE source_id = ?1")?;
    let mut deleted = 0;
    for source_id in source_ids {
        deleted += stmt.execute(params![source_id.0])?;
    }
    Ok(deleted)
}

/// Reports triggered within `[begin, end]`, with the origins of their source
/// as `[source, destination, reporting]`.
pub(crate) fn reports_triggered_between(
    conn: &Connection,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Vec<(ReportId, [String; 3])>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT r.report_id, s.source_origin, s.destination_origin, s.reporting_origin
         FROM reports r
         JOIN sources s ON s.source_id = r.source_id
         WHERE r.trigger_time BETWEEN ?1 AND ?2",
    )?;
    let rows = stmt
        .query_map(params![to_micros(begin), to_micros(end)], |row| {
            Ok((ReportId(row.get(0)?), [row.get(1)?, row.get(2)?, row.get(3)?]))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub(crate) fn delete_all(conn: &Connection) -> Result<usize, StorageError> {
    Ok(conn.execute("DELETE FROM reports", [])?)
}
