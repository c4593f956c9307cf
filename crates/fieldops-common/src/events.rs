//! Entity lifecycle events
//!
//! The access layer publishes these after an entity write commits. They are
//! the only input to the statistics engine.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::principal::TenantId;

/// Lifecycle events that move statistics counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEvent {
    JobCreated {
        company: TenantId,
        client_id: String,
        server_id: Option<String>,
        job_id: String,
        occurred_at: DateTime<Utc>,
    },
    /// Job reached `completed` (successful) or `unable_to_serve` (failed)
    JobCompleted {
        company: TenantId,
        client_id: String,
        server_id: Option<String>,
        job_id: String,
        successful: bool,
        completion_days: Option<f64>,
        occurred_at: DateTime<Utc>,
    },
    JobCancelled {
        company: TenantId,
        client_id: String,
        server_id: Option<String>,
        job_id: String,
        occurred_at: DateTime<Utc>,
    },
    /// Job moved from `unable_to_serve` back to `assigned` for another attempt
    JobReopened {
        company: TenantId,
        client_id: String,
        server_id: Option<String>,
        job_id: String,
        occurred_at: DateTime<Utc>,
    },
    InvoiceCreated {
        company: TenantId,
        client_id: String,
        invoice_id: String,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    },
    PaymentReceived {
        company: TenantId,
        client_id: String,
        payment_id: String,
        amount: Decimal,
        occurred_at: DateTime<Utc>,
    },
}

impl LifecycleEvent {
    pub fn company(&self) -> &TenantId {
        match self {
            Self::JobCreated { company, .. }
            | Self::JobCompleted { company, .. }
            | Self::JobCancelled { company, .. }
            | Self::JobReopened { company, .. }
            | Self::InvoiceCreated { company, .. }
            | Self::PaymentReceived { company, .. } => company,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            Self::JobCreated { occurred_at, .. }
            | Self::JobCompleted { occurred_at, .. }
            | Self::JobCancelled { occurred_at, .. }
            | Self::JobReopened { occurred_at, .. }
            | Self::InvoiceCreated { occurred_at, .. }
            | Self::PaymentReceived { occurred_at, .. } => *occurred_at,
        }
    }

    /// Event type name
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::JobCreated { .. } => "job.created",
            Self::JobCompleted { successful: true, .. } => "job.completed",
            Self::JobCompleted { successful: false, .. } => "job.unable_to_serve",
            Self::JobCancelled { .. } => "job.cancelled",
            Self::JobReopened { .. } => "job.reopened",
            Self::InvoiceCreated { .. } => "invoice.created",
            Self::PaymentReceived { .. } => "payment.received",
        }
    }
}

/// Non-blocking event publication.
///
/// Implementations must return immediately; delivery failures are the sink's
/// concern and never reach the publisher.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Sink that discards everything
#[derive(Debug, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: LifecycleEvent) {}
}

/// Sink that keeps events in memory
#[derive(Debug, Default)]
pub struct BufferedEventSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl BufferedEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain buffered events
    pub fn take(&self) -> Vec<LifecycleEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventSink for BufferedEventSink {
    fn publish(&self, event: LifecycleEvent) {
        self.events.lock().push(event);
    }
}
