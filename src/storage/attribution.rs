//! Attribution matcher and report factory
//!
//! A trigger is attributed to at most one source: the best candidate (see
//! [`sources::find_matching_sources`]) whose filter data passes the
//! trigger's top-level filters. Event-level and aggregatable reports are then
//! decided independently against that source; they only share the
//! attribution rate limit.

use super::rate_limits::{self, RateLimitResult, RateLimitScope};
use super::{dedup, reports, sources};
use crate::delegate::AttributionStorageDelegate;
use crate::error::StorageError;
use crate::results::{AggregatableResult, CreateReportResult, EventLevelResult};
use crate::types::{
    filters_match, ActiveState, AggregatableData, AggregatableHistogramContribution,
    AttributionInfo, AttributionLogic, AttributionReport, EventLevelData, KeyPiece, ReportData,
    ReportType, SourceId, StoredSource, Trigger,
};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

struct EventLevelOutcome {
    status: EventLevelResult,
    new_report: Option<AttributionReport>,
    replaced_report: Option<AttributionReport>,
    dropped_report: Option<AttributionReport>,
}

impl EventLevelOutcome {
    fn status(status: EventLevelResult) -> Self {
        Self {
            status,
            new_report: None,
            replaced_report: None,
            dropped_report: None,
        }
    }
}

struct AggregatableOutcome {
    status: AggregatableResult,
    new_report: Option<AttributionReport>,
}

impl AggregatableOutcome {
    fn status(status: AggregatableResult) -> Self {
        Self {
            status,
            new_report: None,
        }
    }
}

pub(crate) fn maybe_create_and_store_report(
    conn: &rusqlite::Connection,
    delegate: &mut dyn AttributionStorageDelegate,
    trigger: &Trigger,
    now: DateTime<Utc>,
) -> Result<CreateReportResult, StorageError> {
    let event_level_registered = trigger.has_event_level_data();
    let aggregatable_registered = trigger.has_aggregatable_data();

    // Statuses for kinds the trigger carries no data for are final.
    let event_status = |status| {
        if event_level_registered {
            status
        } else {
            EventLevelResult::NotRegistered
        }
    };
    let aggregatable_status = |status| {
        if aggregatable_registered {
            status
        } else {
            AggregatableResult::NotRegistered
        }
    };

    if !event_level_registered && !aggregatable_registered {
        return Ok(CreateReportResult::new(
            EventLevelResult::NotRegistered,
            AggregatableResult::NotRegistered,
        ));
    }

    let candidates = sources::find_matching_sources(
        conn,
        trigger.destination_origin.site(),
        &trigger.reporting_origin,
        now,
    )?;
    if candidates.is_empty() {
        log::debug!(
            "No sources for {} via {}",
            trigger.destination_origin,
            trigger.reporting_origin
        );
        return Ok(CreateReportResult::new(
            event_status(EventLevelResult::NoMatchingImpressions),
            aggregatable_status(AggregatableResult::NoMatchingImpressions),
        ));
    }

    let Some(winner) = candidates.iter().find(|source| {
        filters_match(
            source.common_info.source_type,
            &source.common_info.filter_data,
            &trigger.filters,
            &trigger.not_filters,
        )
    }) else {
        return Ok(CreateReportResult::new(
            event_status(EventLevelResult::NoMatchingSourceFilterData),
            aggregatable_status(AggregatableResult::NoMatchingSourceFilterData),
        ));
    };

    let event_level = if event_level_registered {
        maybe_create_event_level_report(conn, delegate, trigger, winner, now)?
    } else {
        EventLevelOutcome::status(EventLevelResult::NotRegistered)
    };

    let aggregatable = if aggregatable_registered {
        maybe_create_aggregatable_report(conn, delegate, trigger, winner, now)?
    } else {
        AggregatableOutcome::status(AggregatableResult::NotRegistered)
    };

    let winner_accepted = matches!(
        event_level.status,
        EventLevelResult::Success
            | EventLevelResult::SuccessDroppedLowerPriority
            | EventLevelResult::DroppedForNoise
            | EventLevelResult::FalselyAttributedSource
    ) || aggregatable.status == AggregatableResult::Success;

    if winner_accepted {
        let siblings: Vec<SourceId> = candidates
            .iter()
            .map(|source| source.source_id)
            .filter(|id| *id != winner.source_id)
            .collect();
        if !siblings.is_empty() {
            log::debug!(
                "Deactivating {} sources superseded by {}",
                siblings.len(),
                winner.source_id
            );
            sources::deactivate_sources(conn, &siblings)?;
        }
    }

    log::debug!(
        "Trigger for {} attributed to source {}: event_level={:?} aggregatable={:?}",
        trigger.destination_origin,
        winner.source_id,
        event_level.status,
        aggregatable.status
    );

    Ok(CreateReportResult {
        event_level_status: event_level.status,
        aggregatable_status: aggregatable.status,
        new_event_level_report: event_level.new_report,
        replaced_event_level_report: event_level.replaced_report,
        dropped_event_level_report: event_level.dropped_report,
        new_aggregatable_report: aggregatable.new_report,
        source: Some(winner.clone()),
    })
}

fn maybe_create_event_level_report(
    conn: &rusqlite::Connection,
    delegate: &mut dyn AttributionStorageDelegate,
    trigger: &Trigger,
    source: &StoredSource,
    now: DateTime<Utc>,
) -> Result<EventLevelOutcome, StorageError> {
    let info = &source.common_info;

    let Some(event_trigger) = trigger.event_triggers.iter().find(|event_trigger| {
        filters_match(
            info.source_type,
            &info.filter_data,
            &event_trigger.filters,
            &event_trigger.not_filters,
        )
    }) else {
        return Ok(EventLevelOutcome::status(EventLevelResult::NoMatchingConfigurations));
    };

    if let Some(dedup_key) = event_trigger.dedup_key {
        if source.dedup_keys.contains(&dedup_key) {
            return Ok(EventLevelOutcome::status(EventLevelResult::Deduplicated));
        }
    }

    if now > info.event_report_window_time {
        return Ok(EventLevelOutcome::status(EventLevelResult::ReportWindowPassed));
    }

    let noised_status = match source.attribution_logic {
        AttributionLogic::Truthfully => None,
        AttributionLogic::Never => Some(EventLevelResult::DroppedForNoise),
        AttributionLogic::Falsely => Some(EventLevelResult::FalselyAttributedSource),
    };
    if let Some(status) = noised_status {
        if let Some(dedup_key) = event_trigger.dedup_key {
            dedup::store_dedup_key(conn, source.source_id, ReportType::EventLevel, dedup_key)?;
        }
        return Ok(EventLevelOutcome::status(status));
    }

    let config = delegate.config();
    if rate_limits::attribution_allowed_for_attribution_limit(conn, config, info, now)?
        == RateLimitResult::NotAllowed
    {
        return Ok(EventLevelOutcome::status(EventLevelResult::ExcessiveAttributions));
    }
    if rate_limits::attribution_allowed_for_reporting_origin_limit(conn, config, info, now)?
        == RateLimitResult::NotAllowed
    {
        return Ok(EventLevelOutcome::status(EventLevelResult::ExcessiveReportingOrigins));
    }
    if reports::count_reports_for_destination(conn, ReportType::EventLevel, info.destination_site())?
        >= config.event_level_limit.max_reports_per_destination
    {
        return Ok(EventLevelOutcome::status(
            EventLevelResult::NoCapacityForConversionDestination,
        ));
    }

    let mut report = AttributionReport {
        id: None,
        attribution_info: AttributionInfo {
            source: source.clone(),
            time: now,
            debug_key: trigger.debug_key,
        },
        report_time: delegate.event_level_report_time(info, now),
        failed_send_attempts: 0,
        external_report_id: delegate.new_report_id(),
        data: ReportData::EventLevel(EventLevelData {
            trigger_data: delegate.sanitize_trigger_data(event_trigger.data, info.source_type),
            priority: event_trigger.priority,
            randomized_trigger_rate: delegate.randomized_response_rate(info.source_type),
        }),
    };

    let max_attributions = delegate.max_attributions_per_source(info.source_type);
    let mut replaced_report = None;

    if source.num_attributions >= max_attributions {
        let Some(lowest) =
            reports::lowest_priority_event_level_report(conn, source.source_id, report.report_time)?
        else {
            if source.active_state == ActiveState::Active {
                sources::set_active_state(
                    conn,
                    source.source_id,
                    ActiveState::ReachedEventLevelAttributionLimit,
                )?;
            }
            return Ok(EventLevelOutcome::status(EventLevelResult::ExcessiveReports));
        };

        let lowest_priority = lowest.event_level_data().map(|d| d.priority).unwrap_or(i64::MIN);
        if event_trigger.priority <= lowest_priority {
            return Ok(EventLevelOutcome {
                status: EventLevelResult::PriorityTooLow,
                new_report: None,
                replaced_report: None,
                dropped_report: Some(report),
            });
        }

        if let Some(lowest_id) = lowest.id {
            reports::delete_report(conn, lowest_id)?;
        }
        replaced_report = Some(lowest);
    } else {
        let num_attributions = source.num_attributions + 1;
        sources::set_num_attributions(conn, source.source_id, num_attributions)?;
        if num_attributions >= max_attributions && source.active_state == ActiveState::Active {
            sources::set_active_state(
                conn,
                source.source_id,
                ActiveState::ReachedEventLevelAttributionLimit,
            )?;
        }
    }

    report.id = Some(reports::insert_report(conn, &report)?);
    if let Some(dedup_key) = event_trigger.dedup_key {
        dedup::store_dedup_key(conn, source.source_id, ReportType::EventLevel, dedup_key)?;
    }
    rate_limits::add_rate_limit(
        conn,
        RateLimitScope::Attribution,
        source.source_id,
        info,
        &trigger.destination_origin,
        now,
    )?;

    let status = if replaced_report.is_some() {
        EventLevelResult::SuccessDroppedLowerPriority
    } else {
        EventLevelResult::Success
    };
    Ok(EventLevelOutcome {
        status,
        new_report: Some(report),
        replaced_report,
        dropped_report: None,
    })
}

fn maybe_create_aggregatable_report(
    conn: &rusqlite::Connection,
    delegate: &mut dyn AttributionStorageDelegate,
    trigger: &Trigger,
    source: &StoredSource,
    now: DateTime<Utc>,
) -> Result<AggregatableOutcome, StorageError> {
    let info = &source.common_info;

    if let Some(dedup_key) = trigger.aggregatable_dedup_key {
        if source.aggregatable_dedup_keys.contains(&dedup_key) {
            return Ok(AggregatableOutcome::status(AggregatableResult::Deduplicated));
        }
    }

    if now > info.aggregatable_report_window_time {
        return Ok(AggregatableOutcome::status(AggregatableResult::ReportWindowPassed));
    }

    let contributions = build_histograms(source, trigger);
    if contributions.is_empty() {
        return Ok(AggregatableOutcome::status(AggregatableResult::NoHistograms));
    }

    let config = delegate.config();
    if rate_limits::attribution_allowed_for_attribution_limit(conn, config, info, now)?
        == RateLimitResult::NotAllowed
    {
        return Ok(AggregatableOutcome::status(AggregatableResult::ExcessiveAttributions));
    }
    if rate_limits::attribution_allowed_for_reporting_origin_limit(conn, config, info, now)?
        == RateLimitResult::NotAllowed
    {
        return Ok(AggregatableOutcome::status(
            AggregatableResult::ExcessiveReportingOrigins,
        ));
    }
    if reports::count_reports_for_destination(conn, ReportType::Aggregatable, info.destination_site())?
        >= config.aggregate_limit.max_reports_per_destination
    {
        return Ok(AggregatableOutcome::status(
            AggregatableResult::NoCapacityForConversionDestination,
        ));
    }
    if source.num_aggregatable_reports >= config.aggregate_limit.max_aggregatable_reports_per_source {
        return Ok(AggregatableOutcome::status(AggregatableResult::ExcessiveReports));
    }

    let budget = config.aggregate_limit.aggregatable_budget_per_source;
    let required: i64 = contributions.iter().map(|c| i64::from(c.value)).sum();
    if source.aggregatable_budget_consumed.saturating_add(required) > budget {
        log::debug!(
            "Source {} budget exhausted ({} + {} > {})",
            source.source_id,
            source.aggregatable_budget_consumed,
            required,
            budget
        );
        return Ok(AggregatableOutcome::status(AggregatableResult::InsufficientBudget));
    }

    let report_time = delegate.aggregatable_report_time(now);
    let mut report = AttributionReport {
        id: None,
        attribution_info: AttributionInfo {
            source: source.clone(),
            time: now,
            debug_key: trigger.debug_key,
        },
        report_time,
        failed_send_attempts: 0,
        external_report_id: delegate.new_report_id(),
        data: ReportData::Aggregatable(AggregatableData {
            contributions,
            aggregation_coordinator: trigger.aggregation_coordinator,
            initial_report_time: report_time,
        }),
    };

    report.id = Some(reports::insert_report(conn, &report)?);
    sources::consume_aggregatable_budget(conn, source.source_id, required)?;
    if let Some(dedup_key) = trigger.aggregatable_dedup_key {
        dedup::store_dedup_key(conn, source.source_id, ReportType::Aggregatable, dedup_key)?;
    }
    rate_limits::add_rate_limit(
        conn,
        RateLimitScope::Attribution,
        source.source_id,
        info,
        &trigger.destination_origin,
        now,
    )?;

    Ok(AggregatableOutcome {
        status: AggregatableResult::Success,
        new_report: Some(report),
    })
}

/// Histogram contributions for `trigger` against `source`, ordered by source
/// key name. Keys without a value in the trigger contribute nothing.
pub(crate) fn build_histograms(
    source: &StoredSource,
    trigger: &Trigger,
) -> Vec<AggregatableHistogramContribution> {
    let info = &source.common_info;
    let mut keys: BTreeMap<&str, u128> = info
        .aggregation_keys
        .keys()
        .iter()
        .map(|(name, piece)| (name.as_str(), piece.0))
        .collect();

    for data in &trigger.aggregatable_trigger_data {
        if !filters_match(info.source_type, &info.filter_data, &data.filters, &data.not_filters) {
            continue;
        }
        for source_key in &data.source_keys {
            if let Some(key) = keys.get_mut(source_key.as_str()) {
                *key |= data.key_piece.0;
            }
        }
    }

    keys.into_iter()
        .filter_map(|(name, key)| {
            let value = trigger.aggregatable_values.get(name)?;
            (value > 0).then_some(AggregatableHistogramContribution {
                key: KeyPiece(key),
                value,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        AggregatableTriggerData, AggregatableValues, AggregationKeys, CommonSourceInfo, Filters,
        FilterData, Origin, SourceRegistration, SourceType,
    };

    fn stored(keys: &[(&str, u128)], filter_data: FilterData) -> StoredSource {
        let keys = keys.iter().map(|(k, v)| (k.to_string(), KeyPiece(*v))).collect();
        let reg = SourceRegistration::new(
            Origin::parse("https://a.example").unwrap(),
            Origin::parse("https://b.example").unwrap(),
            Origin::parse("https://r.example").unwrap(),
            SourceType::Navigation,
        )
        .with_aggregation_keys(AggregationKeys::new(keys).unwrap())
        .with_filter_data(filter_data);
        StoredSource {
            source_id: SourceId(1),
            common_info: CommonSourceInfo::from_registration(
                reg,
                DateTime::from_timestamp(1_700_000_000, 0).unwrap(),
            ),
            attribution_logic: AttributionLogic::Truthfully,
            active_state: ActiveState::Active,
            num_attributions: 0,
            num_aggregatable_reports: 0,
            aggregatable_budget_consumed: 0,
            dedup_keys: vec![],
            aggregatable_dedup_keys: vec![],
        }
    }

    fn trigger() -> Trigger {
        Trigger::new(
            Origin::parse("https://b.example").unwrap(),
            Origin::parse("https://r.example").unwrap(),
        )
    }

    #[test]
    fn test_histograms_or_trigger_pieces_into_source_keys() {
        let source = stored(&[("campaign", 0x159), ("geo", 0x5)], FilterData::default());
        let trigger = trigger()
            .with_aggregatable_trigger_data(AggregatableTriggerData::new(KeyPiece(0x400), &["campaign"]))
            .with_aggregatable_trigger_data(AggregatableTriggerData::new(KeyPiece(0xA80), &["geo"]))
            .with_aggregatable_values(AggregatableValues::from_pairs(&[("campaign", 32768), ("geo", 1664)]));

        assert_eq!(
            build_histograms(&source, &trigger),
            vec![
                AggregatableHistogramContribution { key: KeyPiece(0x559), value: 32768 },
                AggregatableHistogramContribution { key: KeyPiece(0xA85), value: 1664 },
            ]
        );
    }

    #[test]
    fn test_histograms_skip_filtered_data_and_missing_values() {
        let mut data = std::collections::BTreeMap::new();
        data.insert("product".to_string(), vec!["shoes".to_string()]);
        let source = stored(&[("campaign", 0x1), ("geo", 0x2)], FilterData::new(data).unwrap());

        let trigger = trigger()
            .with_aggregatable_trigger_data(
                AggregatableTriggerData::new(KeyPiece(0x100), &["campaign"])
                    .with_filters(Filters::single("product", &["hats"]).unwrap(), Filters::default()),
            )
            .with_aggregatable_values(AggregatableValues::from_pairs(&[("campaign", 5)]));

        assert_eq!(
            build_histograms(&source, &trigger),
            vec![AggregatableHistogramContribution { key: KeyPiece(0x1), value: 5 }]
        );
    }

    #[test]
    fn test_no_values_means_no_histograms() {
        let source = stored(&[("campaign", 0x1)], FilterData::default());
        let trigger = trigger()
            .with_aggregatable_trigger_data(AggregatableTriggerData::new(KeyPiece(0x2), &["campaign"]));
        assert!(build_histograms(&source, &trigger).is_empty());
    }
}
