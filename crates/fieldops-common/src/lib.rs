//! FieldOps shared kernel
//!
//! Types every FieldOps crate agrees on:
//!
//! - **Principals**: the authenticated actor and its role
//! - **Queries**: typed filter predicates and tenant-scoped queries
//! - **Store**: the document store port plus an in-memory adapter
//! - **Events**: entity lifecycle events feeding the statistics engine
//! - **Config**: JSON configuration with defaults

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod principal;
pub mod query;
pub mod store;

pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{FieldOpsConfig, StatsConfig, UsageConfig};
pub use error::{FieldOpsError, FieldOpsResult, StoreError, StoreResult};
pub use events::{BufferedEventSink, EventSink, LifecycleEvent, NoopEventSink};
pub use principal::{Principal, PrincipalSource, Role, StaticPrincipalSource, TenantId};
pub use query::{Direction, Filter, OrderBy, Query, ScopedQuery, TENANT_FIELD};
pub use store::{Delta, Document, DocumentStore, InMemoryStore, WriteOp};
