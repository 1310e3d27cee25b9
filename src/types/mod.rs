//! Data model shared by the storage components

pub mod filters;
pub mod key_piece;
pub mod origin;
pub mod report;
pub mod source;
pub mod trigger;

pub use filters::{filters_match, FilterData, Filters, SOURCE_TYPE_FILTER_KEY};
pub use key_piece::KeyPiece;
pub use origin::Origin;
pub use report::{
    AggregatableData, AggregatableHistogramContribution, AttributionInfo, AttributionReport,
    EventLevelData, ReportData, ReportId, ReportType,
};
pub use source::{
    ActiveState, AggregationKeys, AttributionLogic, CommonSourceInfo, SourceId,
    SourceRegistration, SourceType, StoredSource,
};
pub use trigger::{
    AggregatableTriggerData, AggregatableValues, AggregationCoordinator, EventTriggerData,
    Trigger,
};
