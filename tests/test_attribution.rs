//! Trigger attribution tests
//!
//! Drives `maybe_create_and_store_report` through source selection,
//! event-level report replacement, noise, deduplication, rate limits and
//! aggregatable budgets.

mod common;

#[cfg(test)]
mod attribution_tests {
    use crate::common::*;
    use attribution_storage::{
        ActiveState, AggregatableResult, AggregatableTriggerData, AggregatableValues,
        AggregationCoordinator, AggregatableHistogramContribution, ConfigurableStorageDelegate,
        EventLevelResult, EventTriggerData, FakeReport, FilterData, Filters, KeyPiece,
        RateLimitConfig, SourceRegistration, SourceType, Trigger,
    };
    use chrono::{DateTime, TimeDelta, Utc};
    use std::collections::BTreeMap;

    fn aggregatable_trigger() -> Trigger {
        Trigger::new(conversion_origin(), reporting_origin())
            .with_aggregatable_trigger_data(AggregatableTriggerData::new(KeyPiece(0x400), &["campaign"]))
            .with_aggregatable_values(AggregatableValues::from_pairs(&[("campaign", 1024)]))
    }

    fn aggregatable_source() -> SourceRegistration {
        source_builder().with_aggregation_keys(aggregation_keys(&[("campaign", 0x159)]))
    }

    fn all_reports(t: &mut TestStorage) -> Vec<attribution_storage::AttributionReport> {
        t.storage.get_attribution_reports(DateTime::<Utc>::MAX_UTC, None)
    }

    #[test]
    fn test_trigger_with_no_data_is_not_registered() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let result = t
            .storage
            .maybe_create_and_store_report(&Trigger::new(conversion_origin(), reporting_origin()));
        assert_eq!(result.event_level_status, EventLevelResult::NotRegistered);
        assert_eq!(result.aggregatable_status, AggregatableResult::NotRegistered);
        assert!(result.source.is_none());
    }

    #[test]
    fn test_no_matching_impressions() {
        let mut t = TestStorage::with_defaults();

        let result = t.storage.maybe_create_and_store_report(&default_trigger());
        assert_eq!(result.event_level_status, EventLevelResult::NoMatchingImpressions);
        assert_eq!(result.aggregatable_status, AggregatableResult::NotRegistered);

        // Wrong reporting origin
        t.storage.store_source(source_builder());
        let trigger = Trigger::new(conversion_origin(), origin("https://other-reporter.example"))
            .with_event_trigger(EventTriggerData::new(0));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::NoMatchingImpressions
        );
    }

    #[test]
    fn test_matches_on_destination_site() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let trigger = Trigger::new(origin("https://checkout.conversion.example"), reporting_origin())
            .with_event_trigger(EventTriggerData::new(0));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::Success
        );
    }

    #[test]
    fn test_expired_source_is_not_attributed() {
        let mut t = TestStorage::with_defaults();
        t.storage
            .store_source(source_builder().with_expiry(TimeDelta::days(1)));
        t.clock.advance(TimeDelta::days(2));

        assert_eq!(
            t.storage.maybe_create_and_store_report(&default_trigger()).event_level_status,
            EventLevelResult::NoMatchingImpressions
        );
    }

    #[test]
    fn test_event_level_report_is_stored() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder().with_source_event_id(5));
        t.clock.advance(TimeDelta::hours(1));

        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_debug_key(77)
            .with_event_trigger(EventTriggerData::new(3).with_priority(4));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::Success);

        let report = result.new_event_level_report.unwrap();
        assert!(report.id.is_some());
        assert_eq!(report.attribution_info.time, start_time() + TimeDelta::hours(1));
        assert_eq!(report.attribution_info.debug_key, Some(77));
        assert_eq!(report.report_time, start_time() + TimeDelta::days(2) + TimeDelta::hours(1));
        assert_eq!(report.external_report_id, uuid::Uuid::from_u128(1));
        let data = report.event_level_data().unwrap();
        assert_eq!(data.trigger_data, 3);
        assert_eq!(data.priority, 4);
        assert_eq!(data.randomized_trigger_rate, 0.0024);

        // The stored copy carries the source as it is now.
        let stored = t.storage.get_report(report.id.unwrap()).unwrap();
        assert_eq!(stored.report_time, report.report_time);
        assert_eq!(stored.external_report_id, report.external_report_id);
        assert_eq!(stored.data, report.data);
        assert_eq!(stored.attribution_info.source.common_info.source_event_id, 5);
        assert_eq!(stored.attribution_info.source.num_attributions, 1);

        assert_eq!(t.storage.get_active_sources(None)[0].num_attributions, 1);
    }

    #[test]
    fn test_trigger_data_is_sanitized() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(13));
        let report = t
            .storage
            .maybe_create_and_store_report(&trigger)
            .new_event_level_report
            .unwrap();
        assert_eq!(report.event_level_data().unwrap().trigger_data, 13 % 8);
    }

    #[test]
    fn test_highest_priority_source_wins_and_siblings_are_deactivated() {
        let mut t = TestStorage::with_defaults();
        t.storage
            .store_source(source_builder().with_source_event_id(1).with_priority(100));
        t.clock.advance(TimeDelta::minutes(1));
        t.storage
            .store_source(source_builder().with_source_event_id(2).with_priority(200));
        t.clock.advance(TimeDelta::minutes(1));
        t.storage
            .store_source(source_builder().with_source_event_id(3).with_priority(150));
        t.clock.advance(TimeDelta::minutes(1));

        let result = t.storage.maybe_create_and_store_report(&default_trigger());
        assert_eq!(result.event_level_status, EventLevelResult::Success);
        assert_eq!(result.source.unwrap().common_info.source_event_id, 2);

        let active = t.storage.get_active_sources(None);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].common_info.source_event_id, 2);
    }

    #[test]
    fn test_single_report_references_winning_source() {
        let mut t = TestStorage::with_defaults();
        t.storage
            .store_source(source_builder().with_source_event_id(3).with_priority(0));
        t.storage
            .store_source(source_builder().with_source_event_id(5).with_priority(1));

        assert_eq!(
            t.storage.maybe_create_and_store_report(&default_trigger()).event_level_status,
            EventLevelResult::Success
        );

        let reports = all_reports(&mut t);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].attribution_info.source.common_info.source_event_id, 5);

        let active = t.storage.get_active_sources(None);
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].common_info.source_event_id, 5);
    }

    #[test]
    fn test_equal_priority_prefers_most_recent_source() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder().with_source_event_id(1));
        t.clock.advance(TimeDelta::minutes(1));
        t.storage.store_source(source_builder().with_source_event_id(2));

        let result = t.storage.maybe_create_and_store_report(&default_trigger());
        assert_eq!(result.source.unwrap().common_info.source_event_id, 2);
    }

    #[test]
    fn test_top_level_filters_skip_to_next_candidate() {
        let mut data = BTreeMap::new();
        data.insert("product".to_string(), vec!["shoes".to_string()]);
        let shoes = FilterData::new(data).unwrap();

        let mut t = TestStorage::with_defaults();
        t.storage.store_source(
            source_builder()
                .with_source_event_id(1)
                .with_priority(10)
                .with_filter_data(shoes),
        );
        t.storage.store_source(source_builder().with_source_event_id(2));

        let hats = Trigger::new(conversion_origin(), reporting_origin())
            .with_filters(Filters::single("product", &["hats"]).unwrap(), Filters::default())
            .with_event_trigger(EventTriggerData::new(0));

        // The unfiltered source has no "product" key, so it matches.
        let result = t.storage.maybe_create_and_store_report(&hats);
        assert_eq!(result.event_level_status, EventLevelResult::Success);
        assert_eq!(result.source.unwrap().common_info.source_event_id, 2);
        assert_eq!(t.storage.get_active_sources(None).len(), 1);
    }

    #[test]
    fn test_no_matching_source_filter_data() {
        let mut data = BTreeMap::new();
        data.insert("product".to_string(), vec!["shoes".to_string()]);

        let mut t = TestStorage::with_defaults();
        t.storage.store_source(
            aggregatable_source().with_filter_data(FilterData::new(data.clone()).unwrap()),
        );
        t.storage
            .store_source(aggregatable_source().with_filter_data(FilterData::new(data).unwrap()));

        let mut trigger = aggregatable_trigger()
            .with_filters(Filters::single("product", &["hats"]).unwrap(), Filters::default())
            .with_event_trigger(EventTriggerData::new(0));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::NoMatchingSourceFilterData);
        assert_eq!(result.aggregatable_status, AggregatableResult::NoMatchingSourceFilterData);
        assert_eq!(t.storage.get_active_sources(None).len(), 2);

        trigger.filters = Filters::default();
        trigger.not_filters = Filters::single("product", &["shoes"]).unwrap();
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::NoMatchingSourceFilterData
        );
    }

    #[test]
    fn test_source_type_filter() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let event_only = Trigger::new(conversion_origin(), reporting_origin())
            .with_filters(Filters::single("source_type", &["event"]).unwrap(), Filters::default())
            .with_event_trigger(EventTriggerData::new(0));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&event_only).event_level_status,
            EventLevelResult::NoMatchingSourceFilterData
        );
    }

    #[test]
    fn test_first_matching_event_trigger_is_used() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(
                EventTriggerData::new(1)
                    .with_filters(Filters::single("source_type", &["event"]).unwrap(), Filters::default()),
            )
            .with_event_trigger(EventTriggerData::new(2))
            .with_event_trigger(EventTriggerData::new(3));
        let report = t
            .storage
            .maybe_create_and_store_report(&trigger)
            .new_event_level_report
            .unwrap();
        assert_eq!(report.event_level_data().unwrap().trigger_data, 2);
    }

    #[test]
    fn test_no_matching_configurations() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let trigger = Trigger::new(conversion_origin(), reporting_origin()).with_event_trigger(
            EventTriggerData::new(1)
                .with_filters(Filters::single("source_type", &["event"]).unwrap(), Filters::default()),
        );
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::NoMatchingConfigurations
        );
    }

    #[test]
    fn test_event_level_report_window_passed() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(
            aggregatable_source().with_event_report_window(TimeDelta::hours(1)),
        );
        t.clock.advance(TimeDelta::hours(2));

        let trigger = aggregatable_trigger().with_event_trigger(EventTriggerData::new(0));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::ReportWindowPassed);
        assert_eq!(result.aggregatable_status, AggregatableResult::Success);
    }

    #[test]
    fn test_aggregatable_report_window_passed() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(
            aggregatable_source().with_aggregatable_report_window(TimeDelta::hours(1)),
        );
        t.clock.advance(TimeDelta::hours(2));

        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable_trigger()).aggregatable_status,
            AggregatableResult::ReportWindowPassed
        );
    }

    #[test]
    fn test_higher_priority_trigger_replaces_report() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_max_attributions_per_source(1);
        delegate
            .config_mut()
            .event_level_limit
            .navigation_source_trigger_data_cardinality = 64;
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(source_builder());

        let first = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(20).with_priority(0));
        let result = t.storage.maybe_create_and_store_report(&first);
        assert_eq!(result.event_level_status, EventLevelResult::Success);
        let first_report = result.new_event_level_report.unwrap();
        assert_eq!(
            t.storage.get_active_sources(None)[0].active_state,
            ActiveState::ReachedEventLevelAttributionLimit
        );

        let second = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(21).with_priority(2));
        let result = t.storage.maybe_create_and_store_report(&second);
        assert_eq!(result.event_level_status, EventLevelResult::SuccessDroppedLowerPriority);
        assert_eq!(result.replaced_event_level_report.unwrap().id, first_report.id);

        let reports = all_reports(&mut t);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].event_level_data().unwrap().trigger_data, 21);
        assert_eq!(t.storage.get_active_sources(None)[0].num_attributions, 1);
    }

    #[test]
    fn test_equal_priority_trigger_is_dropped() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_max_attributions_per_source(1);
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(source_builder());

        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(1).with_priority(5));
        t.storage.maybe_create_and_store_report(&trigger);

        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::PriorityTooLow);
        let dropped = result.dropped_event_level_report.unwrap();
        assert!(dropped.id.is_none());
        assert_eq!(dropped.event_level_data().unwrap().priority, 5);
        assert_eq!(all_reports(&mut t).len(), 1);
    }

    #[test]
    fn test_replacement_evicts_latest_stored_among_equal_priorities() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_max_attributions_per_source(2);
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(source_builder());

        for data in [1, 2] {
            let trigger = Trigger::new(conversion_origin(), reporting_origin())
                .with_event_trigger(EventTriggerData::new(data).with_priority(0));
            assert_eq!(
                t.storage.maybe_create_and_store_report(&trigger).event_level_status,
                EventLevelResult::Success
            );
        }

        let higher = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(3).with_priority(5));
        let result = t.storage.maybe_create_and_store_report(&higher);
        assert_eq!(result.event_level_status, EventLevelResult::SuccessDroppedLowerPriority);
        let replaced = result.replaced_event_level_report.unwrap();
        assert_eq!(replaced.event_level_data().unwrap().trigger_data, 2);

        let mut remaining: Vec<u64> = all_reports(&mut t)
            .iter()
            .map(|r| r.event_level_data().unwrap().trigger_data)
            .collect();
        remaining.sort();
        assert_eq!(remaining, vec![1, 3]);
    }

    #[test]
    fn test_excessive_reports_in_later_window() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_max_attributions_per_source(1);
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(source_builder());

        assert_eq!(
            t.storage.maybe_create_and_store_report(&default_trigger()).event_level_status,
            EventLevelResult::Success
        );

        // Past the first deadline: the pending report sits in another window.
        t.clock.advance(TimeDelta::days(3));
        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(1).with_priority(100));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::ExcessiveReports
        );
        assert_eq!(all_reports(&mut t).len(), 1);
    }

    #[test]
    fn test_noised_never_source_drops_event_level_but_keeps_aggregatable() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_randomized_response(Some(vec![]));
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(aggregatable_source());

        let trigger = aggregatable_trigger()
            .with_event_trigger(EventTriggerData::new(0).with_dedup_key(9));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::DroppedForNoise);
        assert_eq!(result.aggregatable_status, AggregatableResult::Success);
        assert!(result.new_event_level_report.is_none());
        assert!(result.new_aggregatable_report.is_some());

        let reports = all_reports(&mut t);
        assert_eq!(reports.len(), 1);
        assert!(reports[0].aggregatable_data().is_some());

        // The dedup key was still recorded.
        let source = &t.storage.get_active_sources(None)[0];
        assert_eq!(source.dedup_keys, vec![9]);
    }

    #[test]
    fn test_falsely_attributed_source() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_randomized_response(Some(vec![FakeReport {
            trigger_data: 0,
            report_time: start_time() + TimeDelta::days(2) + TimeDelta::hours(1),
        }]));
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(source_builder());

        let result = t.storage.maybe_create_and_store_report(&default_trigger());
        assert_eq!(result.event_level_status, EventLevelResult::FalselyAttributedSource);
        assert_eq!(all_reports(&mut t).len(), 1);
    }

    #[test]
    fn test_event_level_dedup() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(1).with_dedup_key(7));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::Success
        );
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::Deduplicated
        );
        assert_eq!(all_reports(&mut t).len(), 1);
        assert_eq!(t.storage.get_active_sources(None)[0].dedup_keys, vec![7]);
    }

    #[test]
    fn test_dedup_keys_are_independent_per_report_kind() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(aggregatable_source());

        let event_level = Trigger::new(conversion_origin(), reporting_origin())
            .with_event_trigger(EventTriggerData::new(1).with_dedup_key(7));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&event_level).event_level_status,
            EventLevelResult::Success
        );

        let aggregatable = aggregatable_trigger().with_aggregatable_dedup_key(7);
        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable).aggregatable_status,
            AggregatableResult::Success
        );
        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable).aggregatable_status,
            AggregatableResult::Deduplicated
        );

        let source = &t.storage.get_active_sources(None)[0];
        assert_eq!(source.dedup_keys, vec![7]);
        assert_eq!(source.aggregatable_dedup_keys, vec![7]);
    }

    #[test]
    fn test_aggregatable_report_contents() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(
            source_builder()
                .with_aggregation_keys(aggregation_keys(&[("campaign", 0x159), ("geo", 0x5)])),
        );

        let trigger = Trigger::new(conversion_origin(), reporting_origin())
            .with_aggregatable_trigger_data(AggregatableTriggerData::new(KeyPiece(0x400), &["campaign"]))
            .with_aggregatable_trigger_data(AggregatableTriggerData::new(KeyPiece(0xA80), &["geo"]))
            .with_aggregatable_values(AggregatableValues::from_pairs(&[("campaign", 32768), ("geo", 1664)]));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::NotRegistered);
        assert_eq!(result.aggregatable_status, AggregatableResult::Success);

        let report = result.new_aggregatable_report.unwrap();
        assert_eq!(report.report_time, start_time() + TimeDelta::minutes(10));
        let data = report.aggregatable_data().unwrap();
        assert_eq!(
            data.contributions,
            vec![
                AggregatableHistogramContribution { key: KeyPiece(0x559), value: 32768 },
                AggregatableHistogramContribution { key: KeyPiece(0xA85), value: 1664 },
            ]
        );
        assert_eq!(data.aggregation_coordinator, AggregationCoordinator::AwsCloud);
        assert_eq!(data.initial_report_time, report.report_time);

        let stored = t.storage.get_report(report.id.unwrap()).unwrap();
        assert_eq!(stored.aggregatable_data(), Some(data));

        let source = &t.storage.get_active_sources(None)[0];
        assert_eq!(source.aggregatable_budget_consumed, 32768 + 1664);
        assert_eq!(source.num_aggregatable_reports, 1);
    }

    #[test]
    fn test_no_histograms() {
        let mut t = TestStorage::with_defaults();
        t.storage.store_source(source_builder());

        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable_trigger()).aggregatable_status,
            AggregatableResult::NoHistograms
        );
    }

    #[test]
    fn test_insufficient_budget_consumes_nothing() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_aggregatable_budget_per_source(1500);
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(aggregatable_source());

        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable_trigger()).aggregatable_status,
            AggregatableResult::Success
        );
        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable_trigger()).aggregatable_status,
            AggregatableResult::InsufficientBudget
        );

        let source = &t.storage.get_active_sources(None)[0];
        assert_eq!(source.aggregatable_budget_consumed, 1024);
        assert_eq!(source.num_aggregatable_reports, 1);
    }

    #[test]
    fn test_aggregatable_reports_per_source_limit() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.config_mut().aggregate_limit.max_aggregatable_reports_per_source = 1;
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(aggregatable_source());

        t.storage.maybe_create_and_store_report(&aggregatable_trigger());
        assert_eq!(
            t.storage.maybe_create_and_store_report(&aggregatable_trigger()).aggregatable_status,
            AggregatableResult::ExcessiveReports
        );
    }

    #[test]
    fn test_destination_report_capacity() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_max_event_level_reports_per_destination(1);
        delegate.set_max_aggregatable_reports_per_destination(1);
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(aggregatable_source());

        let trigger = aggregatable_trigger().with_event_trigger(EventTriggerData::new(0));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::Success);
        assert_eq!(result.aggregatable_status, AggregatableResult::Success);

        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::NoCapacityForConversionDestination);
        assert_eq!(
            result.aggregatable_status,
            AggregatableResult::NoCapacityForConversionDestination
        );
    }

    #[test]
    fn test_attribution_rate_limit_is_shared_between_kinds() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_rate_limits(RateLimitConfig {
            max_attributions: 1,
            ..RateLimitConfig::default()
        });
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(aggregatable_source());

        let trigger = aggregatable_trigger().with_event_trigger(EventTriggerData::new(0));
        let result = t.storage.maybe_create_and_store_report(&trigger);
        assert_eq!(result.event_level_status, EventLevelResult::Success);
        assert_eq!(result.aggregatable_status, AggregatableResult::ExcessiveAttributions);
    }

    #[test]
    fn test_sent_reports_still_count_against_rate_limit() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_rate_limits(RateLimitConfig {
            max_attributions: 1,
            ..RateLimitConfig::default()
        });
        let mut t = TestStorage::new(delegate);
        t.storage.store_source(source_builder());

        let report = t
            .storage
            .maybe_create_and_store_report(&default_trigger())
            .new_event_level_report
            .unwrap();
        assert!(t.storage.delete_report(report.id.unwrap()));

        assert_eq!(
            t.storage.maybe_create_and_store_report(&default_trigger()).event_level_status,
            EventLevelResult::ExcessiveAttributions
        );
    }

    #[test]
    fn test_attribution_reporting_origin_limit() {
        let mut delegate = ConfigurableStorageDelegate::new();
        delegate.set_rate_limits(RateLimitConfig {
            max_attribution_reporting_origins: 1,
            ..RateLimitConfig::default()
        });
        let mut t = TestStorage::new(delegate);

        let other_reporter = origin("https://other-reporter.example");
        t.storage.store_source(source_builder());
        t.storage.store_source(SourceRegistration::new(
            impression_origin(),
            conversion_origin(),
            other_reporter.clone(),
            SourceType::Navigation,
        ));

        assert_eq!(
            t.storage.maybe_create_and_store_report(&default_trigger()).event_level_status,
            EventLevelResult::Success
        );

        let trigger = Trigger::new(conversion_origin(), other_reporter)
            .with_event_trigger(EventTriggerData::new(0));
        assert_eq!(
            t.storage.maybe_create_and_store_report(&trigger).event_level_status,
            EventLevelResult::ExcessiveReportingOrigins
        );
    }
}
