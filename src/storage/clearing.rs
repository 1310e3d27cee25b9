//! Data clearing across all tables

use super::sql_util::to_micros;
use super::{dedup, rate_limits, reports};
use crate::error::StorageError;
use crate::types::{Origin, SourceId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Origin predicate supplied by the caller; `None` matches everything.
pub type OriginFilter<'a> = Option<&'a dyn Fn(&Origin) -> bool>;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ClearStats {
    pub sources: usize,
    pub reports: usize,
    pub rate_limits: usize,
}

fn origin_matches(filter: OriginFilter<'_>, serialized: &str) -> bool {
    match filter {
        None => true,
        // Rows only ever hold origins that parsed on the way in.
        Some(filter) => Origin::parse(serialized).map(|o| filter(&o)).unwrap_or(false),
    }
}

pub(crate) fn clear_data(
    conn: &Connection,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    filter: OriginFilter<'_>,
) -> Result<ClearStats, StorageError> {
    if filter.is_none() && begin == DateTime::<Utc>::MIN_UTC && end == DateTime::<Utc>::MAX_UTC {
        return clear_all(conn);
    }

    let mut stats = ClearStats::default();

    // Sources registered in range, with everything hanging off them
    let source_ids: Vec<SourceId> = {
        let mut stmt = conn.prepare(
            "SELECT source_id, source_origin, destination_origin, reporting_origin
             FROM sources WHERE source_time BETWEEN ?1 AND ?2",
        )?;
        let rows = stmt
            .query_map(params![to_micros(begin), to_micros(end)], |row| {
                Ok((
                    SourceId(row.get(0)?),
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .filter(|(_, source, destination, reporting)| {
                origin_matches(filter, source)
                    || origin_matches(filter, destination)
                    || origin_matches(filter, reporting)
            })
            .map(|(id, ..)| id)
            .collect()
    };

    stats.reports += reports::delete_for_sources(conn, &source_ids)?;
    dedup::delete_for_sources(conn, &source_ids)?;
    stats.rate_limits += rate_limits::delete_for_sources(conn, &source_ids)?;
    {
        let mut stmt = conn.prepare("DELETE FROM sources WHERE source_id = ?1")?;
        for source_id in &source_ids {
            stats.sources += stmt.execute(params![source_id.0])?;
        }
    }

    // Reports triggered in range, whatever their source's registration time
    for (report_id, origins) in reports::reports_triggered_between(conn, begin, end)? {
        if origins.iter().any(|origin| origin_matches(filter, origin)) {
            stats.reports += reports::delete_report(conn, report_id)?;
        }
    }

    stats.rate_limits += rate_limits::delete_in_range(conn, begin, end, &|origin: &str| {
        origin_matches(filter, origin)
    })?;

    Ok(stats)
}

fn clear_all(conn: &Connection) -> Result<ClearStats, StorageError> {
    let reports = reports::delete_all(conn)?;
    dedup::delete_all(conn)?;
    let rate_limits = rate_limits::delete_all(conn)?;
    let sources = conn.execute("DELETE FROM sources", [])?;
    Ok(ClearStats {
        sources,
        reports,
        rate_limits,
    })
}

/// Reporting origins with any stored data, sorted.
pub(crate) fn all_data_keys(conn: &Connection) -> Result<Vec<Origin>, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT reporting_origin FROM sources
         UNION
         SELECT reporting_origin FROM rate_limits
         ORDER BY 1",
    )?;
    let origins = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    origins
        .iter()
        .map(|origin| super::sql_util::parse_origin("rate_limits", origin))
        .collect()
}
