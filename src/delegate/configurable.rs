use super::AttributionStorageDelegate;
use crate::config::{AttributionConfig, OfflineReportDelayConfig, RateLimitConfig};
use crate::noise::RandomizedResponse;
use crate::types::{AttributionReport, CommonSourceInfo};
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

/// Deterministic delegate for tests and tooling.
///
/// Randomized response is whatever was set last (truthful by default),
/// aggregatable reports go out exactly `min_delay` after the trigger, offline
/// delays are always the window minimum, and report ids count up from 1.
pub struct ConfigurableStorageDelegate {
    config: AttributionConfig,
    randomized_response: RandomizedResponse,
    reverse_reports_on_shuffle: bool,
    next_report_id: u128,
}

impl ConfigurableStorageDelegate {
    pub fn new() -> Self {
        Self::with_config(AttributionConfig::default())
    }

    pub fn with_config(config: AttributionConfig) -> Self {
        Self {
            config,
            randomized_response: None,
            reverse_reports_on_shuffle: false,
            next_report_id: 1,
        }
    }

    pub fn config_mut(&mut self) -> &mut AttributionConfig {
        &mut self.config
    }

    pub fn set_randomized_response(&mut self, response: RandomizedResponse) {
        self.randomized_response = response;
    }

    pub fn set_reverse_reports_on_shuffle(&mut self, reverse: bool) {
        self.reverse_reports_on_shuffle = reverse;
    }

    /// Applies to both source types.
    pub fn set_max_attributions_per_source(&mut self, max: i64) {
        self.config.event_level_limit.max_attributions_per_navigation_source = max;
        self.config.event_level_limit.max_attributions_per_event_source = max;
    }

    pub fn set_max_sources_per_origin(&mut self, max: i64) {
        self.config.max_sources_per_origin = max;
    }

    pub fn set_max_destinations_per_source_site_reporting_origin(&mut self, max: i64) {
        self.config.max_destinations_per_source_site_reporting_origin = max;
    }

    pub fn set_rate_limits(&mut self, rate_limit: RateLimitConfig) {
        self.config.rate_limit = rate_limit;
    }

    pub fn set_aggregatable_budget_per_source(&mut self, budget: i64) {
        self.config.aggregate_limit.aggregatable_budget_per_source = budget;
    }

    pub fn set_max_aggregatable_reports_per_destination(&mut self, max: i64) {
        self.config.aggregate_limit.max_reports_per_destination = max;
    }

    pub fn set_max_event_level_reports_per_destination(&mut self, max: i64) {
        self.config.event_level_limit.max_reports_per_destination = max;
    }

    pub fn set_offline_report_delay(&mut self, delay: Option<OfflineReportDelayConfig>) {
        self.config.offline_report_delay = delay;
    }
}

impl Default for ConfigurableStorageDelegate {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributionStorageDelegate for ConfigurableStorageDelegate {
    fn config(&self) -> &AttributionConfig {
        &self.config
    }

    fn aggregatable_report_time(&mut self, trigger_time: DateTime<Utc>) -> DateTime<Utc> {
        trigger_time + self.config.aggregate_limit.min_delay
    }

    fn randomized_response(&mut self, _source: &CommonSourceInfo) -> RandomizedResponse {
        self.randomized_response.clone()
    }

    fn sample_offline_report_delay(&mut self, delay: &OfflineReportDelayConfig) -> TimeDelta {
        delay.min
    }

    fn shuffle_reports(&mut self, reports: &mut [AttributionReport]) {
        if self.reverse_reports_on_shuffle {
            reports.reverse();
        }
    }

    fn new_report_id(&mut self) -> Uuid {
        let id = Uuid::from_u128(self.next_report_id);
        self.next_report_id += 1;
        id
    }
}
