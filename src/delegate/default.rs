use super::AttributionStorageDelegate;
use crate::config::{AttributionConfig, OfflineReportDelayConfig};
use crate::noise::{self, RandomizedResponse};
use crate::types::{AttributionReport, CommonSourceInfo};
use chrono::{DateTime, TimeDelta, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

/// Production delegate: configured limits plus an owned, seedable RNG.
pub struct DefaultStorageDelegate {
    config: AttributionConfig,
    rng: StdRng,
}

impl DefaultStorageDelegate {
    pub fn new(config: AttributionConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible noise and jitter for a given seed.
    pub fn with_seed(config: AttributionConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn uniform_delay(&mut self, min: TimeDelta, max: TimeDelta) -> TimeDelta {
        let lo = min.num_microseconds().unwrap_or(0);
        let hi = max.num_microseconds().unwrap_or(lo).max(lo);
        TimeDelta::microseconds(self.rng.gen_range(lo..=hi))
    }
}

impl Default for DefaultStorageDelegate {
    fn default() -> Self {
        Self::new(AttributionConfig::default())
    }
}

impl AttributionStorageDelegate for DefaultStorageDelegate {
    fn config(&self) -> &AttributionConfig {
        &self.config
    }

    fn aggregatable_report_time(&mut self, trigger_time: DateTime<Utc>) -> DateTime<Utc> {
        let min = self.config.aggregate_limit.min_delay;
        let span = self.config.aggregate_limit.delay_span;
        let jitter = self.uniform_delay(TimeDelta::zero(), span);
        trigger_time + min + jitter
    }

    fn randomized_response(&mut self, source: &CommonSourceInfo) -> RandomizedResponse {
        let rate = self.randomized_response_rate(source.source_type);
        let cardinality = self.config.trigger_data_cardinality(source.source_type);
        let max_reports = self.max_attributions_per_source(source.source_type).max(0) as u64;
        noise::randomized_response(&mut self.rng, source, rate, cardinality, max_reports)
    }

    fn sample_offline_report_delay(&mut self, delay: &OfflineReportDelayConfig) -> TimeDelta {
        self.uniform_delay(delay.min, delay.max)
    }

    fn shuffle_reports(&mut self, reports: &mut [AttributionReport]) {
        reports.shuffle(&mut self.rng);
    }

    fn new_report_id(&mut self) -> Uuid {
        uuid::Builder::from_random_bytes(self.rng.gen()).into_uuid()
    }
}
