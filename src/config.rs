//! Engine limits and privacy parameters
//!
//! Loaded from environment variables with sensible defaults, the same way the
//! pipeline runtime is configured.

use crate::error::ConfigError;
use crate::types::SourceType;
use chrono::TimeDelta;
use std::env;

/// Sliding-window limits applied per (source site, destination site).
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitConfig {
    /// Window over which rate-limit records are counted.
    /// `TimeDelta::MAX` means unbounded.
    pub time_window: TimeDelta,

    /// Distinct reporting origins that may register sources.
    pub max_source_registration_reporting_origins: i64,

    /// Distinct reporting origins that may create reports.
    pub max_attribution_reporting_origins: i64,

    /// Reports (of either kind) per reporting origin.
    pub max_attributions: i64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            time_window: TimeDelta::days(30),
            max_source_registration_reporting_origins: 100,
            max_attribution_reporting_origins: 10,
            max_attributions: 100,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EventLevelLimit {
    pub navigation_source_trigger_data_cardinality: u64,
    pub event_source_trigger_data_cardinality: u64,
    pub navigation_source_randomized_response_rate: f64,
    pub event_source_randomized_response_rate: f64,
    pub max_reports_per_destination: i64,
    pub max_attributions_per_navigation_source: i64,
    pub max_attributions_per_event_source: i64,
    /// `None` keeps the full 64-bit source event id.
    pub source_event_id_cardinality: Option<u64>,
}

impl Default for EventLevelLimit {
    fn default() -> Self {
        Self {
            navigation_source_trigger_data_cardinality: 8,
            event_source_trigger_data_cardinality: 2,
            navigation_source_randomized_response_rate: 0.0024,
            event_source_randomized_response_rate: 0.0000025,
            max_reports_per_destination: 1024,
            max_attributions_per_navigation_source: 3,
            max_attributions_per_event_source: 1,
            source_event_id_cardinality: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateLimit {
    pub max_reports_per_destination: i64,
    pub aggregatable_budget_per_source: i64,
    pub max_aggregatable_reports_per_source: i64,
    /// Lower bound of the aggregatable report delay.
    pub min_delay: TimeDelta,
    /// Width of the uniform jitter added on top of `min_delay`.
    pub delay_span: TimeDelta,
}

impl Default for AggregateLimit {
    fn default() -> Self {
        Self {
            max_reports_per_destination: 1024,
            aggregatable_budget_per_source: 65536,
            max_aggregatable_reports_per_source: 20,
            min_delay: TimeDelta::minutes(10),
            delay_span: TimeDelta::minutes(50),
        }
    }
}

/// Jitter window applied to reports that missed their time while offline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OfflineReportDelayConfig {
    pub min: TimeDelta,
    pub max: TimeDelta,
}

impl Default for OfflineReportDelayConfig {
    fn default() -> Self {
        Self {
            min: TimeDelta::zero(),
            max: TimeDelta::minutes(1),
        }
    }
}

/// Complete configuration for the attribution storage engine
#[derive(Debug, Clone, PartialEq)]
pub struct AttributionConfig {
    /// Active sources allowed per source origin.
    pub max_sources_per_origin: i64,

    /// Distinct destination sites per (source site, reporting origin)
    /// across unexpired sources.
    pub max_destinations_per_source_site_reporting_origin: i64,

    pub rate_limit: RateLimitConfig,
    pub event_level_limit: EventLevelLimit,
    pub aggregate_limit: AggregateLimit,

    /// `None` disables offline report time adjustment.
    pub offline_report_delay: Option<OfflineReportDelayConfig>,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            max_sources_per_origin: 1024,
            max_destinations_per_source_site_reporting_origin: 100,
            rate_limit: RateLimitConfig::default(),
            event_level_limit: EventLevelLimit::default(),
            aggregate_limit: AggregateLimit::default(),
            offline_report_delay: Some(OfflineReportDelayConfig::default()),
        }
    }
}

impl AttributionConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables (all optional):
    /// - `ATTRIBUTION_MAX_SOURCES_PER_ORIGIN` (default: 1024)
    /// - `ATTRIBUTION_MAX_DESTINATIONS_PER_SOURCE_SITE_REPORTING_ORIGIN` (default: 100)
    /// - `ATTRIBUTION_RATE_LIMIT_WINDOW_DAYS` (default: 30, `0` = unbounded)
    /// - `ATTRIBUTION_MAX_SOURCE_REGISTRATION_REPORTING_ORIGINS` (default: 100)
    /// - `ATTRIBUTION_MAX_ATTRIBUTION_REPORTING_ORIGINS` (default: 10)
    /// - `ATTRIBUTION_MAX_ATTRIBUTIONS` (default: 100)
    /// - `ATTRIBUTION_NAVIGATION_RANDOMIZED_RESPONSE_RATE` (default: 0.0024)
    /// - `ATTRIBUTION_EVENT_RANDOMIZED_RESPONSE_RATE` (default: 0.0000025)
    /// - `ATTRIBUTION_AGGREGATABLE_BUDGET_PER_SOURCE` (default: 65536)
    /// - `ATTRIBUTION_OFFLINE_DELAY_MAX_SECS` (default: 60, `-1` disables)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();

        let parsed = |name: &str| -> Option<i64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<i64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("Invalid {} '{}', using default", name, raw);
                    None
                }
            }
        };
        let parsed_rate = |name: &str| -> Option<f64> {
            let raw = lookup(name)?;
            match raw.trim().parse::<f64>() {
                Ok(value) => Some(value),
                Err(_) => {
                    log::warn!("Invalid {} '{}', using default", name, raw);
                    None
                }
            }
        };

        if let Some(v) = parsed("ATTRIBUTION_MAX_SOURCES_PER_ORIGIN") {
            config.max_sources_per_origin = v;
        }
        if let Some(v) = parsed("ATTRIBUTION_MAX_DESTINATIONS_PER_SOURCE_SITE_REPORTING_ORIGIN") {
            config.max_destinations_per_source_site_reporting_origin = v;
        }
        if let Some(days) = parsed("ATTRIBUTION_RATE_LIMIT_WINDOW_DAYS") {
            if days == 0 {
                config.rate_limit.time_window = TimeDelta::MAX;
            } else if let Some(window) = TimeDelta::try_days(days) {
                config.rate_limit.time_window = window;
            } else {
                log::warn!("ATTRIBUTION_RATE_LIMIT_WINDOW_DAYS {} out of range, using default", days);
            }
        }
        if let Some(v) = parsed("ATTRIBUTION_MAX_SOURCE_REGISTRATION_REPORTING_ORIGINS") {
            config.rate_limit.max_source_registration_reporting_origins = v;
        }
        if let Some(v) = parsed("ATTRIBUTION_MAX_ATTRIBUTION_REPORTING_ORIGINS") {
            config.rate_limit.max_attribution_reporting_origins = v;
        }
        if let Some(v) = parsed("ATTRIBUTION_MAX_ATTRIBUTIONS") {
            config.rate_limit.max_attributions = v;
        }
        if let Some(v) = parsed_rate("ATTRIBUTION_NAVIGATION_RANDOMIZED_RESPONSE_RATE") {
            config.event_level_limit.navigation_source_randomized_response_rate = v;
        }
        if let Some(v) = parsed_rate("ATTRIBUTION_EVENT_RANDOMIZED_RESPONSE_RATE") {
            config.event_level_limit.event_source_randomized_response_rate = v;
        }
        if let Some(v) = parsed("ATTRIBUTION_AGGREGATABLE_BUDGET_PER_SOURCE") {
            config.aggregate_limit.aggregatable_budget_per_source = v;
        }
        if let Some(secs) = parsed("ATTRIBUTION_OFFLINE_DELAY_MAX_SECS") {
            if secs < 0 {
                config.offline_report_delay = None;
            } else if let Some(max) = TimeDelta::try_seconds(secs) {
                config.offline_report_delay = Some(OfflineReportDelayConfig {
                    min: TimeDelta::zero(),
                    max,
                });
            } else {
                log::warn!("ATTRIBUTION_OFFLINE_DELAY_MAX_SECS {} out of range, using default", secs);
            }
        }

        config
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive: [(&'static str, i64); 10] = [
            ("max_sources_per_origin", self.max_sources_per_origin),
            (
                "max_destinations_per_source_site_reporting_origin",
                self.max_destinations_per_source_site_reporting_origin,
            ),
            (
                "rate_limit.max_source_registration_reporting_origins",
                self.rate_limit.max_source_registration_reporting_origins,
            ),
            (
                "rate_limit.max_attribution_reporting_origins",
                self.rate_limit.max_attribution_reporting_origins,
            ),
            ("rate_limit.max_attributions", self.rate_limit.max_attributions),
            (
                "event_level_limit.max_reports_per_destination",
                self.event_level_limit.max_reports_per_destination,
            ),
            (
                "event_level_limit.max_attributions_per_navigation_source",
                self.event_level_limit.max_attributions_per_navigation_source,
            ),
            (
                "event_level_limit.max_attributions_per_event_source",
                self.event_level_limit.max_attributions_per_event_source,
            ),
            (
                "aggregate_limit.max_reports_per_destination",
                self.aggregate_limit.max_reports_per_destination,
            ),
            (
                "aggregate_limit.aggregatable_budget_per_source",
                self.aggregate_limit.aggregatable_budget_per_source,
            ),
        ];
        for (field, value) in positive {
            if value <= 0 {
                return Err(ConfigError::invalid(field, format!("must be positive, got {}", value)));
            }
        }

        if self.rate_limit.time_window <= TimeDelta::zero() {
            return Err(ConfigError::invalid("rate_limit.time_window", "must be positive"));
        }

        for (field, rate) in [
            (
                "event_level_limit.navigation_source_randomized_response_rate",
                self.event_level_limit.navigation_source_randomized_response_rate,
            ),
            (
                "event_level_limit.event_source_randomized_response_rate",
                self.event_level_limit.event_source_randomized_response_rate,
            ),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::invalid(field, format!("must be within [0, 1], got {}", rate)));
            }
        }

        if self.event_level_limit.navigation_source_trigger_data_cardinality == 0
            || self.event_level_limit.event_source_trigger_data_cardinality == 0
            || self.event_level_limit.source_event_id_cardinality == Some(0)
        {
            return Err(ConfigError::invalid("event_level_limit", "cardinalities must be non-zero"));
        }

        if self.aggregate_limit.min_delay < TimeDelta::zero()
            || self.aggregate_limit.delay_span < TimeDelta::zero()
        {
            return Err(ConfigError::invalid("aggregate_limit", "delays must not be negative"));
        }

        if let Some(delay) = self.offline_report_delay {
            if delay.min < TimeDelta::zero() || delay.min > delay.max {
                return Err(ConfigError::invalid(
                    "offline_report_delay",
                    "min must be non-negative and not exceed max",
                ));
            }
        }

        Ok(())
    }

    pub fn trigger_data_cardinality(&self, source_type: SourceType) -> u64 {
        match source_type {
            SourceType::Navigation => self.event_level_limit.navigation_source_trigger_data_cardinality,
            SourceType::Event => self.event_level_limit.event_source_trigger_data_cardinality,
        }
    }

    pub fn randomized_response_rate(&self, source_type: SourceType) -> f64 {
        match source_type {
            SourceType::Navigation => self.event_level_limit.navigation_source_randomized_response_rate,
            SourceType::Event => self.event_level_limit.event_source_randomized_response_rate,
        }
    }

    pub fn max_attributions_per_source(&self, source_type: SourceType) -> i64 {
        match source_type {
            SourceType::Navigation => self.event_level_limit.max_attributions_per_navigation_source,
            SourceType::Event => self.event_level_limit.max_attributions_per_event_source,
        }
    }
}
