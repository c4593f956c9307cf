//! FieldOps statistics engine
//!
//! ```text
//! ┌──────────────────┐   LifecycleEvent   ┌────────────────────┐
//! │  AccessGateway   │ ─────────────────► │  StatsDispatcher   │
//! └──────────────────┘   (EventSink)      └─────────┬──────────┘
//!                                                   │ worker
//!                          ┌────────────────────────┼──────────────────────┐
//!                          ▼                        ▼                      ▼
//!                 ┌─────────────────┐     ┌──────────────────┐   ┌──────────────────┐
//!                 │ StatsAggregator │     │ UsagePartitioner │   │ failure channel  │
//!                 │ company/client/ │     │ daily..all_time  │   └──────────────────┘
//!                 │ server months   │     └──────────────────┘
//!                 └─────────────────┘
//! ```
//!
//! Counters only move through atomic store increments. Rates and
//! period-over-period deltas are derived and may lag their counters.

pub mod aggregator;
pub mod analytics;
pub mod buckets;
pub mod dispatch;
pub mod record;
pub mod usage;

pub use aggregator::StatsAggregator;
pub use analytics::{percent_change, PerformanceChanges};
pub use buckets::{keys_for, scopes_for, BucketKeys, Granularity, Period, StatsScope};
pub use dispatch::{
    DispatcherHandle, DispatcherSnapshot, DispatcherStats, FailureReport, StatsDispatcher,
};
pub use record::{ClientStats, CompanyStats, PartitionMeta, ServerStats};
pub use usage::UsagePartitioner;
