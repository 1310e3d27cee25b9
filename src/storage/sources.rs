//! Source registry: the `sources` table and source registration

use super::rate_limits::{self, RateLimitResult, RateLimitScope};
use super::sql_util::{from_micros, parse_origin, to_micros, u64_from_sql, u64_to_sql};
use super::{dedup, reports};
use crate::delegate::AttributionStorageDelegate;
use crate::error::StorageError;
use crate::results::{StorableSourceResult, StoreSourceResult};
use crate::types::{
    ActiveState, AttributionInfo, AttributionLogic, AttributionReport, CommonSourceInfo,
    EventLevelData, Origin, ReportData, ReportType, SourceId, SourceRegistration, SourceType,
    StoredSource,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

const TABLE: &str = "sources";

pub(crate) const SOURCE_COLUMNS: &str = "source_id, source_event_id, source_origin, \
     destination_origin, reporting_origin, source_time, expiry_time, \
     event_report_window_time, aggregatable_report_window_time, source_type, \
     attribution_logic, priority, active_state, num_attributions, \
     num_aggregatable_reports, aggregatable_budget_consumed, filter_data, \
     aggregation_keys, debug_key";

/// Raw `sources` row, decoded into a [`StoredSource`] outside the row closure.
pub(crate) struct SourceRow {
    source_id: i64,
    source_event_id: i64,
    source_origin: String,
    destination_origin: String,
    reporting_origin: String,
    source_time: i64,
    expiry_time: i64,
    event_report_window_time: i64,
    aggregatable_report_window_time: i64,
    source_type: i64,
    attribution_logic: i64,
    priority: i64,
    active_state: i64,
    num_attributions: i64,
    num_aggregatable_reports: i64,
    aggregatable_budget_consumed: i64,
    filter_data: String,
    aggregation_keys: String,
    debug_key: Option<i64>,
}

impl SourceRow {
    pub(crate) fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            source_id: row.get(0)?,
            source_event_id: row.get(1)?,
            source_origin: row.get(2)?,
            destination_origin: row.get(3)?,
            reporting_origin: row.get(4)?,
            source_time: row.get(5)?,
            expiry_time: row.get(6)?,
            event_report_window_time: row.get(7)?,
            aggregatable_report_window_time: row.get(8)?,
            source_type: row.get(9)?,
            attribution_logic: row.get(10)?,
            priority: row.get(11)?,
            active_state: row.get(12)?,
            num_attributions: row.get(13)?,
            num_aggregatable_reports: row.get(14)?,
            aggregatable_budget_consumed: row.get(15)?,
            filter_data: row.get(16)?,
            aggregation_keys: row.get(17)?,
            debug_key: row.get(18)?,
        })
    }

    /// Decodes the row and loads both dedup key sets.
    pub(crate) fn into_source(self, conn: &Connection) -> Result<StoredSource, StorageError> {
        let source_type = SourceType::from_sql(self.source_type)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("source_type {}", self.source_type)))?;
        let attribution_logic = AttributionLogic::from_sql(self.attribution_logic).ok_or_else(|| {
            StorageError::corrupt(TABLE, format!("attribution_logic {}", self.attribution_logic))
        })?;
        let active_state = ActiveState::from_sql(self.active_state)
            .ok_or_else(|| StorageError::corrupt(TABLE, format!("active_state {}", self.active_state)))?;

        let source_id = SourceId(self.source_id);
        let common_info = CommonSourceInfo {
            source_event_id: u64_from_sql(self.source_event_id),
            source_origin: parse_origin(TABLE, &self.source_origin)?,
            destination_origin: parse_origin(TABLE, &self.destination_origin)?,
            reporting_origin: parse_origin(TABLE, &self.reporting_origin)?,
            source_time: from_micros(TABLE, self.source_time)?,
            expiry_time: from_micros(TABLE, self.expiry_time)?,
            event_report_window_time: from_micros(TABLE, self.event_report_window_time)?,
            aggregatable_report_window_time: from_micros(TABLE, self.aggregatable_report_window_time)?,
            source_type,
            priority: self.priority,
            filter_data: serde_json::from_str(&self.filter_data)?,
            aggregation_keys: serde_json::from_str(&self.aggregation_keys)?,
            debug_key: self.debug_key.map(u64_from_sql),
        };

        Ok(StoredSource {
            source_id,
            common_info,
            attribution_logic,
            active_state,
            num_attributions: self.num_attributions,
            num_aggregatable_reports: self.num_aggregatable_reports,
            aggregatable_budget_consumed: self.aggregatable_budget_consumed,
            dedup_keys: dedup::keys_for_source(conn, source_id, ReportType::EventLevel)?,
            aggregatable_dedup_keys: dedup::keys_for_source(conn, source_id, ReportType::Aggregatable)?,
        })
    }
}

fn query_sources(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<StoredSource>, StorageError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, SourceRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(|row| row.into_source(conn)).collect()
}

pub(crate) fn get_source(conn: &Connection, source_id: SourceId) -> Result<Option<StoredSource>, StorageError> {
    let sql = format!("SELECT {} FROM sources WHERE source_id = ?1", SOURCE_COLUMNS);
    let row = conn
        .query_row(&sql, params![source_id.0], SourceRow::from_row)
        .optional()?;
    row.map(|row| row.into_source(conn)).transpose()
}

/// Unexpired, not deactivated sources in registration order.
pub(crate) fn get_active_sources(
    conn: &Connection,
    now: DateTime<Utc>,
    limit: Option<usize>,
) -> Result<Vec<StoredSource>, StorageError> {
    let sql = format!(
        "SELECT {} FROM sources
         WHERE active_state != ?1 AND expiry_time > ?2
         ORDER BY source_id ASC
         LIMIT ?3",
        SOURCE_COLUMNS
    );
    let limit = limit.map(|l| l.min(i64::MAX as usize) as i64).unwrap_or(-1);
    query_sources(
        conn,
        &sql,
        params![ActiveState::Inactive.to_sql(), to_micros(now), limit],
    )
}

/// Attribution candidates for a trigger, best first: priority, then most
/// recent registration, then most recent insertion.
pub(crate) fn find_matching_sources(
    conn: &Connection,
    destination_site: &str,
    reporting_origin: &Origin,
    now: DateTime<Utc>,
) -> Result<Vec<StoredSource>, StorageError> {
    let sql = format!(
        "SELECT {} FROM sources
         WHERE destination_site = ?1
           AND reporting_origin = ?2
           AND active_state != ?3
           AND expiry_time > ?4
         ORDER BY priority DESC, source_time DESC, source_id DESC",
        SOURCE_COLUMNS
    );
    query_sources(
        conn,
        &sql,
        params![
            destination_site,
            reporting_origin.as_str(),
            ActiveState::Inactive.to_sql(),
            to_micros(now)
        ],
    )
}

pub(crate) fn insert_source(
    conn: &Connection,
    info: &CommonSourceInfo,
    attribution_logic: AttributionLogic,
    num_attributions: i64,
) -> Result<SourceId, StorageError> {
    conn.execute(
        "INSERT INTO sources (
            source_event_id, source_origin, source_site, destination_origin,
            destination_site, reporting_origin, source_time, expiry_time,
            event_report_window_time, aggregatable_report_window_time, source_type,
            attribution_logic, priority, active_state, num_attributions,
            num_aggregatable_reports, aggregatable_budget_consumed, filter_data,
            aggregation_keys, debug_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, 0, 0, ?16, ?17, ?18)",
        params![
            u64_to_sql(info.source_event_id),
            info.source_origin.as_str(),
            info.source_site(),
            info.destination_origin.as_str(),
            info.destination_site(),
            info.reporting_origin.as_str(),
            to_micros(info.source_time),
            to_micros(info.expiry_time),
            to_micros(info.event_report_window_time),
            to_micros(info.aggregatable_report_window_time),
            info.source_type.to_sql(),
            attribution_logic.to_sql(),
            info.priority,
            ActiveState::Active.to_sql(),
            num_attributions,
            serde_json::to_string(&info.filter_data)?,
            serde_json::to_string(&info.aggregation_keys)?,
            info.debug_key.map(u64_to_sql),
        ],
    )?;
    Ok(SourceId(conn.last_insert_rowid()))
}

pub(crate) fn set_active_state(
    conn: &Connection,
    source_id: SourceId,
    state: ActiveState,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE sources SET active_state = ?1 WHERE source_id = ?2",
        params![state.to_sql(), source_id.0],
    )?;
    Ok(())
}

pub(crate) fn deactivate_sources(conn: &Connection, source_ids: &[SourceId]) -> Result<(), StorageError> {
    for source_id in source_ids {
        set_active_state(conn, *source_id, ActiveState::Inactive)?;
    }
    Ok(())
}

pub(crate) fn set_num_attributions(
    conn: &Connection,
    source_id: SourceId,
    num_attributions: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE sources SET num_attributions = ?1 WHERE source_id = ?2",
        params![num_attributions, source_id.0],
    )?;
    Ok(())
}

/// Charges `budget` and counts one more aggregatable report.
pub(crate) fn consume_aggregatable_budget(
    conn: &Connection,
    source_id: SourceId,
    budget: i64,
) -> Result<(), StorageError> {
    conn.execute(
        "UPDATE sources
         SET aggregatable_budget_consumed = aggregatable_budget_consumed + ?1,
             num_aggregatable_reports = num_aggregatable_reports + 1
         WHERE source_id = ?2",
        params![budget, source_id.0],
    )?;
    Ok(())
}

fn count_active_sources_for_origin(
    conn: &Connection,
    source_origin: &Origin,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM sources
         WHERE source_origin = ?1 AND active_state != ?2 AND expiry_time > ?3",
        params![source_origin.as_str(), ActiveState::Inactive.to_sql(), to_micros(now)],
        |row| row.get(0),
    )?)
}

/// Distinct destination sites of unexpired sources for this (source site,
/// reporting origin), not counting `destination_site` itself.
fn count_other_destinations(
    conn: &Connection,
    info: &CommonSourceInfo,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT destination_site) FROM sources
         WHERE source_site = ?1
           AND reporting_origin = ?2
           AND expiry_time > ?3
           AND destination_site != ?4",
        params![
            info.source_site(),
            info.reporting_origin.as_str(),
            to_micros(now),
            info.destination_site()
        ],
        |row| row.get(0),
    )?)
}

/// Registers a source: capacity checks, randomized response, then insert.
pub(crate) fn store_source(
    conn: &Connection,
    delegate: &mut dyn AttributionStorageDelegate,
    registration: SourceRegistration,
    now: DateTime<Utc>,
) -> Result<StoreSourceResult, StorageError> {
    let mut info = CommonSourceInfo::from_registration(registration, now);
    info.source_event_id = delegate.sanitize_source_event_id(info.source_event_id);

    let config = delegate.config();

    if count_active_sources_for_origin(conn, &info.source_origin, now)? >= config.max_sources_per_origin {
        log::warn!(
            "Source capacity reached for {} ({} active)",
            info.source_origin,
            config.max_sources_per_origin
        );
        return Ok(StoreSourceResult::new(
            StorableSourceResult::InsufficientSourceCapacity,
        ));
    }

    if count_other_destinations(conn, &info, now)?
        >= config.max_destinations_per_source_site_reporting_origin
    {
        log::warn!(
            "Destination capacity reached for {} via {}",
            info.source_site(),
            info.reporting_origin
        );
        return Ok(StoreSourceResult::new(
            StorableSourceResult::InsufficientUniqueDestinationCapacity,
        ));
    }

    if rate_limits::source_allowed_for_reporting_origin_limit(conn, config, &info, now)?
        == RateLimitResult::NotAllowed
    {
        return Ok(StoreSourceResult::new(
            StorableSourceResult::ExcessiveReportingOrigins,
        ));
    }

    let randomized_response = delegate.randomized_response(&info);
    let attribution_logic = match &randomized_response {
        None => AttributionLogic::Truthfully,
        Some(fakes) if fakes.is_empty() => AttributionLogic::Never,
        Some(_) => AttributionLogic::Falsely,
    };
    let fake_reports = randomized_response.unwrap_or_default();

    let source_id = insert_source(conn, &info, attribution_logic, fake_reports.len() as i64)?;
    rate_limits::add_rate_limit(
        conn,
        RateLimitScope::Source,
        source_id,
        &info,
        &info.destination_origin,
        now,
    )?;

    if attribution_logic == AttributionLogic::Truthfully {
        log::debug!("Stored source {} for {}", source_id, info.destination_site());
        return Ok(StoreSourceResult::new(StorableSourceResult::Success));
    }

    // A noised source pays attribution rate limits up front, as if it had
    // been attributed.
    let stored = get_source(conn, source_id)?
        .ok_or_else(|| StorageError::corrupt(TABLE, format!("source {} vanished", source_id)))?;
    let rate = delegate.randomized_response_rate(info.source_type);
    let mut min_fake_report_time: Option<DateTime<Utc>> = None;

    for fake in &fake_reports {
        let report = AttributionReport {
            id: None,
            attribution_info: AttributionInfo {
                source: stored.clone(),
                time: now,
                debug_key: None,
            },
            report_time: fake.report_time,
            failed_send_attempts: 0,
            external_report_id: delegate.new_report_id(),
            data: ReportData::EventLevel(EventLevelData {
                trigger_data: delegate.sanitize_trigger_data(fake.trigger_data, info.source_type),
                priority: 0,
                randomized_trigger_rate: rate,
            }),
        };
        reports::insert_report(conn, &report)?;
        min_fake_report_time = Some(match min_fake_report_time {
            Some(current) => current.min(fake.report_time),
            None => fake.report_time,
        });
    }

    let charges = fake_reports.len().max(1);
    for _ in 0..charges {
        rate_limits::add_rate_limit(
            conn,
            RateLimitScope::Attribution,
            source_id,
            &info,
            &info.destination_origin,
            now,
        )?;
    }

    log::debug!(
        "Stored noised source {} ({:?}, {} fake reports)",
        source_id,
        attribution_logic,
        fake_reports.len()
    );

    Ok(StoreSourceResult {
        status: StorableSourceResult::SuccessNoised,
        min_fake_report_time,
    })
}
