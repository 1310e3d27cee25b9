//! Rate limiter over the `rate_limits` table
//!
//! Records are kept per (source site, destination site) and are independent
//! of source and report rows, so deleting a sent report does not give its
//! attribution back.

use super::sql_util::{to_micros, window_start};
use crate::config::AttributionConfig;
use crate::error::StorageError;
use crate::types::{CommonSourceInfo, Origin, SourceId};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitScope {
    Source,
    Attribution,
}

impl RateLimitScope {
    fn to_sql(self) -> i64 {
        match self {
            RateLimitScope::Source => 0,
            RateLimitScope::Attribution => 1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RateLimitResult {
    Allowed,
    NotAllowed,
}

impl RateLimitResult {
    fn from_count(count: i64, max: i64) -> Self {
        if count < max {
            RateLimitResult::Allowed
        } else {
            RateLimitResult::NotAllowed
        }
    }
}

pub(crate) fn add_rate_limit(
    conn: &Connection,
    scope: RateLimitScope,
    source_id: SourceId,
    source: &CommonSourceInfo,
    destination_origin: &Origin,
    time: DateTime<Utc>,
) -> Result<(), StorageError> {
    conn.execute(
        "INSERT INTO rate_limits (
            scope, source_id, source_site, source_origin, destination_site,
            destination_origin, reporting_origin, time)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            scope.to_sql(),
            source_id.0,
            source.source_site(),
            source.source_origin.as_str(),
            destination_origin.site(),
            destination_origin.as_str(),
            source.reporting_origin.as_str(),
            to_micros(time)
        ],
    )?;
    Ok(())
}

/// Distinct reporting origins other than `source`'s that recorded `scope`
/// events for the site pair within the window.
fn count_other_reporting_origins(
    conn: &Connection,
    scope: RateLimitScope,
    config: &AttributionConfig,
    source: &CommonSourceInfo,
    now: DateTime<Utc>,
) -> Result<i64, StorageError> {
    Ok(conn.query_row(
        "SELECT COUNT(DISTINCT reporting_origin) FROM rate_limits
         WHERE scope = ?1
           AND source_site = ?2
           AND destination_site = ?3
           AND reporting_origin != ?4
           AND time > ?5",
        params![
            scope.to_sql(),
            source.source_site(),
            source.destination_site(),
            source.reporting_origin.as_str(),
            window_start(now, config.rate_limit.time_window)
        ],
        |row| row.get(0),
    )?)
}

pub(crate) fn source_allowed_for_reporting_origin_limit(
    conn: &Connection,
    config: &AttributionConfig,
    source: &CommonSourceInfo,
    now: DateTime<Utc>,
) -> Result<RateLimitResult, StorageError> {
    let count = count_other_reporting_origins(conn, RateLimitScope::Source, config, source, now)?;
    let result = RateLimitResult::from_count(
        count,
        config.rate_limit.max_source_registration_reporting_origins,
    );
    if result == RateLimitResult::NotAllowed {
        log::warn!(
            "Too many reporting origins registering sources for {} -> {}",
            source.source_site(),
            source.destination_site()
        );
    }
    Ok(result)
}

pub(crate) fn attribution_allowed_for_reporting_origin_limit(
    conn: &Connection,
    config: &AttributionConfig,
    source: &CommonSourceInfo,
    now: DateTime<Utc>,
) -> Result<RateLimitResult, StorageError> {
    let count = count_other_reporting_origins(conn, RateLimitScope::Attribution, config, source, now)?;
    Ok(RateLimitResult::from_count(
        count,
        config.rate_limit.max_attribution_reporting_origins,
    ))
}

/// Attributions of either report kind by this reporting origin for the site
/// pair within the window.
pub(crate) fn attribution_allowed_for_attribution_limit(
    conn: &Connection,
    config: &AttributionConfig,
    source: &CommonSourceInfo,
    now: DateTime<Utc>,
) -> Result<RateLimitResult, StorageError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM rate_limits
         WHERE scope = ?1
           AND source_site = ?2
           AND destination_site = ?3
           AND reporting_origin = ?4
           AND time > ?5",
        params![
            RateLimitScope::Attribution.to_sql(),
            source.source_site(),
            source.destination_site(),
            source.reporting_origin.as_str(),
            window_start(now, config.rate_limit.time_window)
        ],
        |row| row.get(0),
    )?;
    Ok(RateLimitResult::from_count(count, config.rate_limit.max_attributions))
}

pub(crate) fn delete_for_sources(conn: &Connection, source_ids: &[SourceId]) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare("DELETE FROM rate_limits WHERE source_id = ?1")?;
    let mut deleted = 0;
    for source_id in source_ids {
        deleted += stmt.execute(params![source_id.0])?;
    }
    Ok(deleted)
}

/// Deletes records in `[begin, end]` whose origins satisfy `matches`.
pub(crate) fn delete_in_range(
    conn: &Connection,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    matches: &dyn Fn(&str) -> bool,
) -> Result<usize, StorageError> {
    let mut stmt = conn.prepare(
        "SELECT id, source_origin, destination_origin, reporting_origin FROM rate_limits
         WHERE time BETWEEN ?1 AND ?2",
    )?;
    let rows = stmt
        .query_map(params![to_micros(begin), to_micros(end)], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let mut delete = conn.prepare("DELETE FROM rate_limits WHERE id = ?1")?;
    let mut deleted = 0;
    for (id, source_origin, destination_origin, reporting_origin) in rows {
        if matches(&source_origin) || matches(&destination_origin) || matches(&reporting_origin) {
            deleted += delete.execute(params![id])?;
        }
    }
    Ok(deleted)
}

pub(crate) fn delete_all(conn: &Connection) -> Result<usize, StorageError> {
    Ok(conn.execute("DELETE FROM rate_limits", [])?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RateLimitConfig;
    use crate::storage::schema;
    use crate::types::{SourceRegistration, SourceType};
    use chrono::TimeDelta;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn source(reporting: &str) -> CommonSourceInfo {
        CommonSourceInfo::from_registration(
            SourceRegistration::new(
                Origin::parse("https://publisher.example").unwrap(),
                Origin::parse("https://shop.example").unwrap(),
                Origin::parse(reporting).unwrap(),
                SourceType::Navigation,
            ),
            t0(),
        )
    }

    fn conn() -> Connection {
        let mut conn = Connection::open_in_memory().unwrap();
        schema::initialize(&mut conn).unwrap();
        conn
    }

    #[test]
    fn test_attribution_limit_counts_within_window() {
        let conn = conn();
        let mut config = AttributionConfig::default();
        config.rate_limit = RateLimitConfig {
            time_window: TimeDelta::days(1),
            max_attributions: 2,
            ..RateLimitConfig::default()
        };
        let info = source("https://r.example");

        for _ in 0..2 {
            add_rate_limit(&conn, RateLimitScope::Attribution, SourceId(1), &info, &info.destination_origin, t0())
                .unwrap();
        }
        assert_eq!(
            attribution_allowed_for_attribution_limit(&conn, &config, &info, t0()).unwrap(),
            RateLimitResult::NotAllowed
        );
        // Records age out of the window
        assert_eq!(
            attribution_allowed_for_attribution_limit(&conn, &config, &info, t0() + TimeDelta::days(2))
                .unwrap(),
            RateLimitResult::Allowed
        );
    }

    #[test]
    fn test_source_records_do_not_count_as_attributions() {
        let conn = conn();
        let mut config = AttributionConfig::default();
        config.rate_limit.max_attributions = 1;
        let info = source("https://r.example");

        add_rate_limit(&conn, RateLimitScope::Source, SourceId(1), &info, &info.destination_origin, t0()).unwrap();
        assert_eq!(
            attribution_allowed_for_attribution_limit(&conn, &config, &info, t0()).unwrap(),
            RateLimitResult::Allowed
        );
    }

    #[test]
    fn test_reporting_origin_limit_ignores_own_origin() {
        let conn = conn();
        let mut config = AttributionConfig::default();
        config.rate_limit.max_source_registration_reporting_origins = 1;

        let first = source("https://r1.example");
        add_rate_limit(&conn, RateLimitScope::Source, SourceId(1), &first, &first.destination_origin, t0()).unwrap();

        // Same origin again is fine, a second origin is not
        assert_eq!(
            source_allowed_for_reporting_origin_limit(&conn, &config, &first, t0()).unwrap(),
            RateLimitResult::Allowed
        );
        let second = source("https://r2.example");
        assert_eq!(
            source_allowed_for_reporting_origin_limit(&conn, &config, &second, t0()).unwrap(),
            RateLimitResult::NotAllowed
        );
    }

    #[test]
    fn test_unbounded_window_counts_everything() {
        let conn = conn();
        let mut config = AttributionConfig::default();
        config.rate_limit.time_window = TimeDelta::MAX;
        config.rate_limit.max_attributions = 1;
        let info = source("https://r.example");

        add_rate_limit(&conn, RateLimitScope::Attribution, SourceId(1), &info, &info.destination_origin, t0())
            .unwrap();
        assert_eq!(
            attribution_allowed_for_attribution_limit(&conn, &config, &info, t0() + TimeDelta::days(3650))
                .unwrap(),
            RateLimitResult::NotAllowed
        );
    }
}
