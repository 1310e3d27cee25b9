//! Shared fixtures for the attribution storage integration tests
#![allow(dead_code)]

use attribution_storage::{
    AggregationKeys, AttributionStorageSql, ConfigurableStorageDelegate, EventTriggerData,
    KeyPiece, Origin, SourceRegistration, SourceType, Trigger,
};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

/// Manually advanced clock shared between a test and the storage under test.
#[derive(Clone)]
pub struct TestClock {
    micros: Arc<AtomicI64>,
}

impl TestClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            micros: Arc::new(AtomicI64::new(start.timestamp_micros())),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst)).unwrap()
    }

    pub fn advance(&self, delta: TimeDelta) {
        self.micros
            .fetch_add(delta.num_microseconds().unwrap(), Ordering::SeqCst);
    }

    pub fn timestamp_fn(&self) -> Box<dyn Fn() -> DateTime<Utc> + Send + Sync> {
        let micros = Arc::clone(&self.micros);
        Box::new(move || DateTime::from_timestamp_micros(micros.load(Ordering::SeqCst)).unwrap())
    }
}

pub fn start_time() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

pub fn origin(s: &str) -> Origin {
    Origin::parse(s).unwrap()
}

pub fn impression_origin() -> Origin {
    origin("https://impression.example")
}

pub fn conversion_origin() -> Origin {
    origin("https://conversion.example")
}

pub fn reporting_origin() -> Origin {
    origin("https://report.example")
}

/// Navigation source from impression.example to conversion.example.
pub fn source_builder() -> SourceRegistration {
    SourceRegistration::new(
        impression_origin(),
        conversion_origin(),
        reporting_origin(),
        SourceType::Navigation,
    )
}

pub fn aggregation_keys(pairs: &[(&str, u128)]) -> AggregationKeys {
    let keys: BTreeMap<String, KeyPiece> = pairs
        .iter()
        .map(|(name, key)| (name.to_string(), KeyPiece(*key)))
        .collect();
    AggregationKeys::new(keys).unwrap()
}

/// Trigger on conversion.example with a single event-level entry.
pub fn default_trigger() -> Trigger {
    Trigger::new(conversion_origin(), reporting_origin())
        .with_event_trigger(EventTriggerData::new(0))
}

pub struct TestStorage {
    pub dir: TempDir,
    pub path: PathBuf,
    pub clock: TestClock,
    pub storage: AttributionStorageSql,
}

impl TestStorage {
    pub fn new(delegate: ConfigurableStorageDelegate) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("attribution.db");
        let clock = TestClock::new(start_time());
        let storage = open_storage(&path, delegate, &clock);
        Self {
            dir,
            path,
            clock,
            storage,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(ConfigurableStorageDelegate::new())
    }

    /// Reopens the same database file with a different delegate.
    pub fn reopen(&mut self, delegate: ConfigurableStorageDelegate) {
        self.storage = open_storage(&self.path, delegate, &self.clock);
    }
}

pub fn open_storage(
    path: &Path,
    delegate: ConfigurableStorageDelegate,
    clock: &TestClock,
) -> AttributionStorageSql {
    AttributionStorageSql::new(path, Box::new(delegate)).with_timestamp_fn(clock.timestamp_fn())
}
