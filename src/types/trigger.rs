//! Conversion triggers. Never persisted.

use super::filters::Filters;
use super::key_piece::KeyPiece;
use super::origin::Origin;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One candidate event-level configuration. The first entry whose filters
/// match the attributed source is used.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EventTriggerData {
    pub data: u64,
    pub priority: i64,
    pub dedup_key: Option<u64>,
    pub filters: Filters,
    pub not_filters: Filters,
}

impl EventTriggerData {
    pub fn new(data: u64) -> Self {
        Self {
            data,
            ..Default::default()
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_dedup_key(mut self, dedup_key: u64) -> Self {
        self.dedup_key = Some(dedup_key);
        self
    }

    pub fn with_filters(mut self, filters: Filters, not_filters: Filters) -> Self {
        self.filters = filters;
        self.not_filters = not_filters;
        self
    }
}

/// Key piece ORed into the named source keys when the filters match.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregatableTriggerData {
    pub key_piece: KeyPiece,
    pub source_keys: BTreeSet<String>,
    pub filters: Filters,
    pub not_filters: Filters,
}

impl AggregatableTriggerData {
    pub fn new(key_piece: KeyPiece, source_keys: &[&str]) -> Self {
        Self {
            key_piece,
            source_keys: source_keys.iter().map(|k| k.to_string()).collect(),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: Filters, not_filters: Filters) -> Self {
        self.filters = filters;
        self.not_filters = not_filters;
        self
    }
}

/// Contribution value per source key name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AggregatableValues(BTreeMap<String, u32>);

impl AggregatableValues {
    pub fn new(values: BTreeMap<String, u32>) -> Self {
        Self(values)
    }

    pub fn from_pairs(pairs: &[(&str, u32)]) -> Self {
        Self(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    pub fn get(&self, key: &str) -> Option<u32> {
        self.0.get(key).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AggregationCoordinator {
    #[default]
    #[serde(rename = "aws-cloud")]
    AwsCloud,
}

impl AggregationCoordinator {
    pub fn as_str(&self) -> &'static str {
        match self {
            AggregationCoordinator::AwsCloud => "aws-cloud",
        }
    }

    pub(crate) fn from_str_opt(value: &str) -> Option<Self> {
        match value {
            "aws-cloud" => Some(AggregationCoordinator::AwsCloud),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trigger {
    pub destination_origin: Origin,
    pub reporting_origin: Origin,
    pub filters: Filters,
    pub not_filters: Filters,
    pub debug_key: Option<u64>,
    pub aggregatable_dedup_key: Option<u64>,
    pub event_triggers: Vec<EventTriggerData>,
    pub aggregatable_trigger_data: Vec<AggregatableTriggerData>,
    pub aggregatable_values: AggregatableValues,
    pub aggregation_coordinator: AggregationCoordinator,
}

impl Trigger {
    /// A trigger with no event-level or aggregatable data.
    pub fn new(destination_origin: Origin, reporting_origin: Origin) -> Self {
        Self {
            destination_origin,
            reporting_origin,
            filters: Filters::default(),
            not_filters: Filters::default(),
            debug_key: None,
            aggregatable_dedup_key: None,
            event_triggers: Vec::new(),
            aggregatable_trigger_data: Vec::new(),
            aggregatable_values: AggregatableValues::default(),
            aggregation_coordinator: AggregationCoordinator::default(),
        }
    }

    pub fn with_filters(mut self, filters: Filters, not_filters: Filters) -> Self {
        self.filters = filters;
        self.not_filters = not_filters;
        self
    }

    pub fn with_debug_key(mut self, debug_key: u64) -> Self {
        self.debug_key = Some(debug_key);
        self
    }

    pub fn with_aggregatable_dedup_key(mut self, dedup_key: u64) -> Self {
        self.aggregatable_dedup_key = Some(dedup_key);
        self
    }

    pub fn with_event_trigger(mut self, event_trigger: EventTriggerData) -> Self {
        self.event_triggers.push(event_trigger);
        self
    }

    pub fn with_aggregatable_trigger_data(mut self, data: AggregatableTriggerData) -> Self {
        self.aggregatable_trigger_data.push(data);
        self
    }

    pub fn with_aggregatable_values(mut self, values: AggregatableValues) -> Self {
        self.aggregatable_values = values;
        self
    }

    pub fn has_event_level_data(&self) -> bool {
        !self.event_triggers.is_empty()
    }

    pub fn has_aggregatable_data(&self) -> bool {
        !self.aggregatable_trigger_data.is_empty() || !self.aggregatable_values.is_empty()
    }
}
