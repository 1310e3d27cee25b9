//! Strategy seam for everything random or policy-dependent
//!
//! The storage engine never touches an RNG or reads limits directly; it asks
//! its delegate. Production code uses [`DefaultStorageDelegate`], tests use
//! [`ConfigurableStorageDelegate`] for fixed, predictable answers.

mod configurable;
mod default;

pub use configurable::ConfigurableStorageDelegate;
pub use default::DefaultStorageDelegate;

use crate::config::{AttributionConfig, OfflineReportDelayConfig};
use crate::noise::RandomizedResponse;
use crate::report_time;
use crate::types::{AttributionReport, CommonSourceInfo, SourceType};
use chrono::{DateTime, TimeDelta, Utc};
use uuid::Uuid;

pub trait AttributionStorageDelegate: Send {
    fn config(&self) -> &AttributionConfig;

    /// Report time of an aggregatable report for a trigger at `trigger_time`.
    fn aggregatable_report_time(&mut self, trigger_time: DateTime<Utc>) -> DateTime<Utc>;

    /// Decided once per source, before it is stored.
    fn randomized_response(&mut self, source: &CommonSourceInfo) -> RandomizedResponse;

    fn sample_offline_report_delay(&mut self, delay: &OfflineReportDelayConfig) -> TimeDelta;

    /// Reorders reports handed to the sender so storage order does not leak.
    fn shuffle_reports(&mut self, reports: &mut [AttributionReport]);

    /// Client-visible id of a new report.
    fn new_report_id(&mut self) -> Uuid;

    fn event_level_report_time(
        &self,
        source: &CommonSourceInfo,
        trigger_time: DateTime<Utc>,
    ) -> DateTime<Utc> {
        report_time::event_level_report_time(source, trigger_time)
    }

    fn randomized_response_rate(&self, source_type: SourceType) -> f64 {
        self.config().randomized_response_rate(source_type)
    }

    fn max_attributions_per_source(&self, source_type: SourceType) -> i64 {
        self.config().max_attributions_per_source(source_type)
    }

    fn sanitize_trigger_data(&self, trigger_data: u64, source_type: SourceType) -> u64 {
        let cardinality = self.config().trigger_data_cardinality(source_type);
        if cardinality == 0 {
            return 0;
        }
        trigger_data % cardinality
    }

    fn sanitize_source_event_id(&self, source_event_id: u64) -> u64 {
        match self.config().event_level_limit.source_event_id_cardinality {
            Some(cardinality) if cardinality > 0 => source_event_id % cardinality,
            _ => source_event_id,
        }
    }

    fn offline_report_delay_config(&self) -> Option<OfflineReportDelayConfig> {
        self.config().offline_report_delay
    }
}
