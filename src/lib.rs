//! Attribution measurement storage engine
//!
//! Persists ad sources, attributes conversion triggers to at most one of
//! them, and schedules the resulting event-level and aggregatable reports for
//! delayed delivery.
//!
//! ```no_run
//! use attribution_storage::{
//!     AttributionStorageSql, DefaultStorageDelegate, EventTriggerData, Origin,
//!     SourceRegistration, SourceType, Trigger,
//! };
//!
//! let mut storage = AttributionStorageSql::new(
//!     "attribution.db",
//!     Box::new(DefaultStorageDelegate::default()),
//! );
//!
//! let publisher = Origin::parse("https://news.example").unwrap();
//! let shop = Origin::parse("https://shop.example").unwrap();
//! let reporter = Origin::parse("https://reporter.example").unwrap();
//!
//! storage.store_source(SourceRegistration::new(
//!     publisher,
//!     shop.clone(),
//!     reporter.clone(),
//!     SourceType::Navigation,
//! ));
//! let result = storage.maybe_create_and_store_report(
//!     &Trigger::new(shop, reporter).with_event_trigger(EventTriggerData::new(1)),
//! );
//! println!("{:?}", result.event_level_status);
//! ```

pub mod config;
pub mod delegate;
pub mod error;
pub mod noise;
pub mod report_time;
pub mod results;
pub mod storage;
pub mod types;

pub use config::{
    AggregateLimit, AttributionConfig, EventLevelLimit, OfflineReportDelayConfig, RateLimitConfig,
};
pub use delegate::{AttributionStorageDelegate, ConfigurableStorageDelegate, DefaultStorageDelegate};
pub use error::{ConfigError, OriginError, RegistrationError, StorageError};
pub use noise::{FakeReport, RandomizedResponse};
pub use results::{
    AggregatableResult, CreateReportResult, EventLevelResult, StorableSourceResult,
    StoreSourceResult,
};
pub use storage::{AttributionStorageSql, OriginFilter};
pub use types::*;
