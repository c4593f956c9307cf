//! FieldOps Multi-Tenant Access Layer
//!
//! Row-level, role-based isolation for every tenant-scoped entity.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ACCESS GATEWAY                        │
//! │                                                              │
//! │  Principal ──► TenantResolver ──► TenantScope                │
//! │                                      │                       │
//! │          ┌───────────────────────────┼──────────────┐        │
//! │          ▼                           ▼              ▼        │
//! │   ScopedQuery per tenant      membership check   stamping    │
//! │          │                           │              │        │
//! │          ▼                           ▼              ▼        │
//! │                      DocumentStore port                      │
//! │                                                              │
//! │  Job reads by contractors ──► sanitizer (allow-list view)    │
//! │  Job status transitions   ──► lifecycle ──► EventSink        │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod entity;
pub mod gateway;
pub mod lifecycle;
pub mod resolver;
pub mod sanitize;

pub use entity::EntityKind;
pub use gateway::{AccessGateway, EntityGateway};
pub use lifecycle::JobStatus;
pub use resolver::{TenantResolver, TenantScope};
