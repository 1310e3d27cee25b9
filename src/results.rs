//! Tagged outcomes of the public engine operations
//!
//! Every operation reports its outcome through these types; storage failures
//! show up as `InternalError` rather than as a `Result`.

use crate::types::{AttributionReport, StoredSource};
use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StorableSourceResult {
    Success,
    /// Stored, with randomized response replacing truthful attribution.
    SuccessNoised,
    InternalError,
    InsufficientSourceCapacity,
    InsufficientUniqueDestinationCapacity,
    ExcessiveReportingOrigins,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoreSourceResult {
    pub status: StorableSourceResult,
    /// Earliest report time among fake reports scheduled at registration.
    pub min_fake_report_time: Option<DateTime<Utc>>,
}

impl StoreSourceResult {
    pub fn new(status: StorableSourceResult) -> Self {
        Self {
            status,
            min_fake_report_time: None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self.status,
            StorableSourceResult::Success | StorableSourceResult::SuccessNoised
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventLevelResult {
    Success,
    /// Stored after evicting a lower-priority report of the same source.
    SuccessDroppedLowerPriority,
    InternalError,
    NoCapacityForConversionDestination,
    NoMatchingImpressions,
    Deduplicated,
    ExcessiveAttributions,
    PriorityTooLow,
    DroppedForNoise,
    ExcessiveReportingOrigins,
    NoMatchingSourceFilterData,
    ExcessiveReports,
    FalselyAttributedSource,
    ReportWindowPassed,
    NoMatchingConfigurations,
    NotRegistered,
}

impl EventLevelResult {
    pub fn is_success(self) -> bool {
        matches!(
            self,
            EventLevelResult::Success | EventLevelResult::SuccessDroppedLowerPriority
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AggregatableResult {
    Success,
    InternalError,
    NoCapacityForConversionDestination,
    NoMatchingImpressions,
    ExcessiveAttributions,
    ExcessiveReportingOrigins,
    NoHistograms,
    InsufficientBudget,
    NoMatchingSourceFilterData,
    NotRegistered,
    Deduplicated,
    ReportWindowPassed,
    ExcessiveReports,
}

/// Outcome of `maybe_create_and_store_report`. The two statuses are decided
/// independently; the report fields carry side data for the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreateReportResult {
    pub event_level_status: EventLevelResult,
    pub aggregatable_status: AggregatableResult,
    pub new_event_level_report: Option<AttributionReport>,
    /// Report evicted to make room for `new_event_level_report`.
    pub replaced_event_level_report: Option<AttributionReport>,
    /// Report that would have been stored but lost on priority.
    pub dropped_event_level_report: Option<AttributionReport>,
    pub new_aggregatable_report: Option<AttributionReport>,
    /// The attributed source, as it was before this trigger.
    pub source: Option<StoredSource>,
}

impl CreateReportResult {
    pub fn new(event_level_status: EventLevelResult, aggregatable_status: AggregatableResult) -> Self {
        Self {
            event_level_status,
            aggregatable_status,
            new_event_level_report: None,
            replaced_event_level_report: None,
            dropped_event_level_report: None,
            new_aggregatable_report: None,
            source: None,
        }
    }

    pub fn internal_error() -> Self {
        Self::new(EventLevelResult::InternalError, AggregatableResult::InternalError)
    }
}
