//! Source registrations and their stored form

use super::filters::FilterData;
use super::key_piece::KeyPiece;
use super::origin::Origin;
use crate::error::RegistrationError;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

pub const MIN_SOURCE_EXPIRY: TimeDelta = TimeDelta::days(1);
pub const MAX_SOURCE_EXPIRY: TimeDelta = TimeDelta::days(30);
pub const MIN_REPORT_WINDOW: TimeDelta = TimeDelta::hours(1);

pub const MAX_AGGREGATION_KEYS: usize = 20;
pub const MAX_AGGREGATION_KEY_ID_BYTES: usize = 25;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Navigation,
    Event,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Navigation => "navigation",
            SourceType::Event => "event",
        }
    }

    pub(crate) fn to_sql(self) -> i64 {
        match self {
            SourceType::Navigation => 0,
            SourceType::Event => 1,
        }
    }

    pub(crate) fn from_sql(value: i64) -> Option<Self> {
        match value {
            0 => Some(SourceType::Navigation),
            1 => Some(SourceType::Event),
            _ => None,
        }
    }
}

impl fmt::Display for SourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How real triggers are treated for event-level attribution, decided once
/// by randomized response when the source is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributionLogic {
    /// No event-level reports, real or fake.
    Never,
    Truthfully,
    /// Fake reports were scheduled at registration; real triggers are dropped.
    Falsely,
}

impl AttributionLogic {
    pub(crate) fn to_sql(self) -> i64 {
        match self {
            AttributionLogic::Never => 0,
            AttributionLogic::Truthfully => 1,
            AttributionLogic::Falsely => 2,
        }
    }

    pub(crate) fn from_sql(value: i64) -> Option<Self> {
        match value {
            0 => Some(AttributionLogic::Never),
            1 => Some(AttributionLogic::Truthfully),
            2 => Some(AttributionLogic::Falsely),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActiveState {
    Active,
    /// Deactivated by a newer attribution to a sibling; never attributable again.
    Inactive,
    /// No more event-level reports; still eligible for aggregatable reports.
    ReachedEventLevelAttributionLimit,
}

impl ActiveState {
    pub(crate) fn to_sql(self) -> i64 {
        match self {
            ActiveState::Active => 0,
            ActiveState::Inactive => 1,
            ActiveState::ReachedEventLevelAttributionLimit => 2,
        }
    }

    pub(crate) fn from_sql(value: i64) -> Option<Self> {
        match value {
            0 => Some(ActiveState::Active),
            1 => Some(ActiveState::Inactive),
            2 => Some(ActiveState::ReachedEventLevelAttributionLimit),
            _ => None,
        }
    }
}

/// Named 128-bit aggregation key pieces declared by a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregationKeys(BTreeMap<String, KeyPiece>);

impl AggregationKeys {
    pub fn new(keys: BTreeMap<String, KeyPiece>) -> Result<Self, RegistrationError> {
        if keys.len() > MAX_AGGREGATION_KEYS {
            return Err(RegistrationError::TooManyAggregationKeys(keys.len()));
        }
        if let Some(id) = keys.keys().find(|id| id.len() > MAX_AGGREGATION_KEY_ID_BYTES) {
            return Err(RegistrationError::AggregationKeyIdTooLong(id.clone()));
        }
        Ok(Self(keys))
    }

    pub fn keys(&self) -> &BTreeMap<String, KeyPiece> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A parsed `Attribution-Reporting-Register-Source` registration, as handed
/// over by the header parser. Durations are relative to registration time.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceRegistration {
    pub source_origin: Origin,
    pub destination_origin: Origin,
    pub reporting_origin: Origin,
    pub source_type: SourceType,
    pub source_event_id: u64,
    pub expiry: Option<TimeDelta>,
    pub event_report_window: Option<TimeDelta>,
    pub aggregatable_report_window: Option<TimeDelta>,
    pub priority: i64,
    pub filter_data: FilterData,
    pub aggregation_keys: AggregationKeys,
    pub debug_key: Option<u64>,
}

impl SourceRegistration {
    pub fn new(
        source_origin: Origin,
        destination_origin: Origin,
        reporting_origin: Origin,
        source_type: SourceType,
    ) -> Self {
        Self {
            source_origin,
            destination_origin,
            reporting_origin,
            source_type,
            source_event_id: 0,
            expiry: None,
            event_report_window: None,
            aggregatable_report_window: None,
            priority: 0,
            filter_data: FilterData::default(),
            aggregation_keys: AggregationKeys::default(),
            debug_key: None,
        }
    }

    pub fn with_source_event_id(mut self, id: u64) -> Self {
        self.source_event_id = id;
        self
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_expiry(mut self, expiry: TimeDelta) -> Self {
        self.expiry = Some(expiry);
        self
    }

    pub fn with_event_report_window(mut self, window: TimeDelta) -> Self {
        self.event_report_window = Some(window);
        self
    }

    pub fn with_aggregatable_report_window(mut self, window: TimeDelta) -> Self {
        self.aggregatable_report_window = Some(window);
        self
    }

    pub fn with_filter_data(mut self, filter_data: FilterData) -> Self {
        self.filter_data = filter_data;
        self
    }

    pub fn with_aggregation_keys(mut self, keys: AggregationKeys) -> Self {
        self.aggregation_keys = keys;
        self
    }

    pub fn with_debug_key(mut self, debug_key: u64) -> Self {
        self.debug_key = Some(debug_key);
        self
    }
}

/// Registration data resolved against the registration time.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonSourceInfo {
    pub source_event_id: u64,
    pub source_origin: Origin,
    pub destination_origin: Origin,
    pub reporting_origin: Origin,
    pub source_time: DateTime<Utc>,
    pub expiry_time: DateTime<Utc>,
    pub event_report_window_time: DateTime<Utc>,
    pub aggregatable_report_window_time: DateTime<Utc>,
    pub source_type: SourceType,
    pub priority: i64,
    pub filter_data: FilterData,
    pub aggregation_keys: AggregationKeys,
    pub debug_key: Option<u64>,
}

impl CommonSourceInfo {
    /// Resolves relative durations into absolute times.
    ///
    /// Expiry defaults to 30 days, is clamped to [1 day, 30 days] and is
    /// rounded to whole days for event sources. Report windows default to
    /// the expiry and are clamped to [1 hour, expiry].
    pub fn from_registration(registration: SourceRegistration, source_time: DateTime<Utc>) -> Self {
        let expiry = source_expiry(registration.expiry, registration.source_type);
        let window = |requested: Option<TimeDelta>| {
            requested
                .map(|w| w.clamp(MIN_REPORT_WINDOW, expiry))
                .unwrap_or(expiry)
        };
        let event_report_window = window(registration.event_report_window);
        let aggregatable_report_window = window(registration.aggregatable_report_window);

        Self {
            source_event_id: registration.source_event_id,
            source_origin: registration.source_origin,
            destination_origin: registration.destination_origin,
            reporting_origin: registration.reporting_origin,
            source_time,
            expiry_time: source_time + expiry,
            event_report_window_time: source_time + event_report_window,
            aggregatable_report_window_time: source_time + aggregatable_report_window,
            source_type: registration.source_type,
            priority: registration.priority,
            filter_data: registration.filter_data,
            aggregation_keys: registration.aggregation_keys,
            debug_key: registration.debug_key,
        }
    }

    pub fn source_site(&self) -> &str {
        self.source_origin.site()
    }

    pub fn destination_site(&self) -> &str {
        self.destination_origin.site()
    }
}

fn source_expiry(requested: Option<TimeDelta>, source_type: SourceType) -> TimeDelta {
    let expiry = requested
        .unwrap_or(MAX_SOURCE_EXPIRY)
        .clamp(MIN_SOURCE_EXPIRY, MAX_SOURCE_EXPIRY);
    match source_type {
        SourceType::Navigation => expiry,
        SourceType::Event => {
            let days = (expiry + TimeDelta::hours(12)).num_days();
            TimeDelta::days(days).clamp(MIN_SOURCE_EXPIRY, MAX_SOURCE_EXPIRY)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub i64);

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A source row with its attribution state.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredSource {
    pub source_id: SourceId,
    pub common_info: CommonSourceInfo,
    pub attribution_logic: AttributionLogic,
    pub active_state: ActiveState,
    /// Event-level attributions ever made, including fake and deleted reports.
    pub num_attributions: i64,
    pub num_aggregatable_reports: i64,
    pub aggregatable_budget_consumed: i64,
    /// Event-level dedup keys in match order.
    pub dedup_keys: Vec<u64>,
    /// Aggregatable dedup keys in match order, independent of `dedup_keys`.
    pub aggregatable_dedup_keys: Vec<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn origin(s: &str) -> Origin {
        Origin::parse(s).unwrap()
    }

    fn registration(source_type: SourceType) -> SourceRegistration {
        SourceRegistration::new(
            origin("https://impression.example"),
            origin("https://conversion.example"),
            origin("https://report.example"),
            source_type,
        )
    }

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    #[test]
    fn test_defaults_to_thirty_days() {
        let info = CommonSourceInfo::from_registration(registration(SourceType::Navigation), t0());
        assert_eq!(info.expiry_time, t0() + TimeDelta::days(30));
        assert_eq!(info.event_report_window_time, info.expiry_time);
        assert_eq!(info.aggregatable_report_window_time, info.expiry_time);
    }

    #[test]
    fn test_expiry_is_clamped() {
        let short = registration(SourceType::Navigation).with_expiry(TimeDelta::hours(2));
        let info = CommonSourceInfo::from_registration(short, t0());
        assert_eq!(info.expiry_time, t0() + TimeDelta::days(1));

        let long = registration(SourceType::Navigation).with_expiry(TimeDelta::days(90));
        let info = CommonSourceInfo::from_registration(long, t0());
        assert_eq!(info.expiry_time, t0() + TimeDelta::days(30));
    }

    #[test]
    fn test_event_source_expiry_rounds_to_days() {
        let reg = registration(SourceType::Event).with_expiry(TimeDelta::days(2) + TimeDelta::hours(13));
        let info = CommonSourceInfo::from_registration(reg, t0());
        assert_eq!(info.expiry_time, t0() + TimeDelta::days(3));

        let reg = registration(SourceType::Event).with_expiry(TimeDelta::days(2) + TimeDelta::hours(11));
        let info = CommonSourceInfo::from_registration(reg, t0());
        assert_eq!(info.expiry_time, t0() + TimeDelta::days(2));

        // Navigation sources keep sub-day precision
        let reg = registration(SourceType::Navigation).with_expiry(TimeDelta::days(2) + TimeDelta::hours(11));
        let info = CommonSourceInfo::from_registration(reg, t0());
        assert_eq!(info.expiry_time, t0() + TimeDelta::days(2) + TimeDelta::hours(11));
    }

    #[test]
    fn test_report_windows_clamped_to_expiry() {
        let reg = registration(SourceType::Navigation)
            .with_expiry(TimeDelta::days(10))
            .with_event_report_window(TimeDelta::days(20))
            .with_aggregatable_report_window(TimeDelta::minutes(5));
        let info = CommonSourceInfo::from_registration(reg, t0());
        assert_eq!(info.event_report_window_time, t0() + TimeDelta::days(10));
        assert_eq!(info.aggregatable_report_window_time, t0() + TimeDelta::hours(1));
    }

    #[test]
    fn test_aggregation_key_limits() {
        let too_many: BTreeMap<String, KeyPiece> = (0..=MAX_AGGREGATION_KEYS)
            .map(|i| (format!("key{}", i), KeyPiece(i as u128)))
            .collect();
        assert!(AggregationKeys::new(too_many).is_err());

        let mut long_id = BTreeMap::new();
        long_id.insert("k".repeat(26), KeyPiece(1));
        assert!(matches!(
            AggregationKeys::new(long_id),
            Err(RegistrationError::AggregationKeyIdTooLong(_))
        ));
    }

    #[test]
    fn test_sql_codes_round_trip() {
        for state in [
            ActiveState::Active,
            ActiveState::Inactive,
            ActiveState::ReachedEventLevelAttributionLimit,
        ] {
            assert_eq!(ActiveState::from_sql(state.to_sql()), Some(state));
        }
        assert_eq!(AttributionLogic::from_sql(7), None);
        assert_eq!(SourceType::from_sql(SourceType::Event.to_sql()), Some(SourceType::Event));
    }
}
