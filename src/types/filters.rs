//! Source filter data and trigger filter matching
//!
//! Matching is a pure function of the source's filter data, its type and the
//! trigger's `filters` / `not_filters`; it never touches storage.

use super::source::SourceType;
use crate::error::RegistrationError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Implicit filter key populated from the source type.
pub const SOURCE_TYPE_FILTER_KEY: &str = "source_type";

pub const MAX_FILTER_KEYS: usize = 50;
pub const MAX_VALUES_PER_FILTER: usize = 50;
pub const MAX_FILTER_STRING_BYTES: usize = 25;

/// Filter data attached to a source. The reserved `source_type` key is
/// rejected; it is supplied implicitly during matching.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FilterData(BTreeMap<String, Vec<String>>);

impl FilterData {
    pub fn new(values: BTreeMap<String, Vec<String>>) -> Result<Self, RegistrationError> {
        if values.contains_key(SOURCE_TYPE_FILTER_KEY) {
            return Err(RegistrationError::ReservedFilterKey(
                SOURCE_TYPE_FILTER_KEY.to_string(),
            ));
        }
        check_limits(&values)?;
        Ok(Self(values))
    }

    pub fn values(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Trigger-side filters. Unlike [`FilterData`] these may reference
/// `source_type`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filters(BTreeMap<String, Vec<String>>);

impl Filters {
    pub fn new(values: BTreeMap<String, Vec<String>>) -> Result<Self, RegistrationError> {
        check_limits(&values)?;
        Ok(Self(values))
    }

    /// Convenience for a single `key -> values` filter.
    pub fn single(key: &str, values: &[&str]) -> Result<Self, RegistrationError> {
        let mut map = BTreeMap::new();
        map.insert(
            key.to_string(),
            values.iter().map(|v| v.to_string()).collect(),
        );
        Self::new(map)
    }

    pub fn values(&self) -> &BTreeMap<String, Vec<String>> {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

fn check_limits(values: &BTreeMap<String, Vec<String>>) -> Result<(), RegistrationError> {
    if values.len() > MAX_FILTER_KEYS {
        return Err(RegistrationError::TooManyFilterKeys(values.len()));
    }
    for (key, list) in values {
        if key.len() > MAX_FILTER_STRING_BYTES {
            return Err(RegistrationError::FilterStringTooLong(key.clone()));
        }
        if list.len() > MAX_VALUES_PER_FILTER {
            return Err(RegistrationError::TooManyFilterValues {
                key: key.clone(),
                count: list.len(),
            });
        }
        if let Some(value) = list.iter().find(|v| v.len() > MAX_FILTER_STRING_BYTES) {
            return Err(RegistrationError::FilterStringTooLong(value.clone()));
        }
    }
    Ok(())
}

/// Returns true if the source passes both `filters` and `not_filters`.
///
/// Keys absent from the source are ignored. For a present key:
/// - positive filter with an empty list matches only an empty source list,
///   otherwise it needs a shared value;
/// - negated filter with an empty list matches only a non-empty source list,
///   otherwise it needs no shared value.
pub fn filters_match(
    source_type: SourceType,
    filter_data: &FilterData,
    filters: &Filters,
    not_filters: &Filters,
) -> bool {
    match_values(source_type, filter_data, filters, false)
        && match_values(source_type, filter_data, not_filters, true)
}

fn match_values(
    source_type: SourceType,
    filter_data: &FilterData,
    filters: &Filters,
    negated: bool,
) -> bool {
    let implicit = [source_type.as_str().to_string()];

    filters.values().iter().all(|(key, trigger_values)| {
        let source_values: &[String] = if key == SOURCE_TYPE_FILTER_KEY {
            &implicit
        } else {
            match filter_data.values().get(key) {
                Some(values) => values,
                None => return true,
            }
        };

        if trigger_values.is_empty() {
            source_values.is_empty() != negated
        } else {
            let intersects = trigger_values.iter().any(|v| source_values.contains(v));
            intersects != negated
        }
    })
}
