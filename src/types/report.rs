//! Stored attribution reports

use super::key_piece::KeyPiece;
use super::source::StoredSource;
use super::trigger::AggregationCoordinator;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ReportId(pub i64);

impl fmt::Display for ReportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportType {
    EventLevel,
    Aggregatable,
}

impl ReportType {
    pub(crate) fn to_sql(self) -> i64 {
        match self {
            ReportType::EventLevel => 0,
            ReportType::Aggregatable => 1,
        }
    }

    pub(crate) fn from_sql(value: i64) -> Option<Self> {
        match value {
            0 => Some(ReportType::EventLevel),
            1 => Some(ReportType::Aggregatable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventLevelData {
    pub trigger_data: u64,
    pub priority: i64,
    pub randomized_trigger_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct AggregatableHistogramContribution {
    pub key: KeyPiece,
    pub value: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregatableData {
    /// Ordered by source key name.
    pub contributions: Vec<AggregatableHistogramContribution>,
    pub aggregation_coordinator: AggregationCoordinator,
    /// First scheduled report time, kept across send failures and offline
    /// adjustment.
    pub initial_report_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportData {
    EventLevel(EventLevelData),
    Aggregatable(AggregatableData),
}

impl ReportData {
    pub fn report_type(&self) -> ReportType {
        match self {
            ReportData::EventLevel(_) => ReportType::EventLevel,
            ReportData::Aggregatable(_) => ReportType::Aggregatable,
        }
    }
}

/// The source a report was attributed to, and when.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionInfo {
    pub source: StoredSource,
    pub time: DateTime<Utc>,
    pub debug_key: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttributionReport {
    /// `None` until the report has been stored.
    pub id: Option<ReportId>,
    pub attribution_info: AttributionInfo,
    pub report_time: DateTime<Utc>,
    pub failed_send_attempts: i64,
    pub external_report_id: Uuid,
    pub data: ReportData,
}

impl AttributionReport {
    pub fn report_type(&self) -> ReportType {
        self.data.report_type()
    }

    pub fn event_level_data(&self) -> Option<&EventLevelData> {
        match &self.data {
            ReportData::EventLevel(data) => Some(data),
            ReportData::Aggregatable(_) => None,
        }
    }

    pub fn aggregatable_data(&self) -> Option<&AggregatableData> {
        match &self.data {
            ReportData::Aggregatable(data) => Some(data),
            ReportData::EventLevel(_) => None,
        }
    }
}
