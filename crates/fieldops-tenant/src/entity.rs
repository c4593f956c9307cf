//! Tenant-scoped entity catalogue

use serde::{Deserialize, Serialize};

/// Every tenant-scoped entity type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Job,
    Client,
    Invoice,
    Payment,
    Court,
    CourtCase,
    Employee,
    ServerPayRecord,
}

impl EntityKind {
    pub const ALL: [EntityKind; 8] = [
        Self::Job,
        Self::Client,
        Self::Invoice,
        Self::Payment,
        Self::Court,
        Self::CourtCase,
        Self::Employee,
        Self::ServerPayRecord,
    ];

    /// Backing collection
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Job => "jobs",
            Self::Client => "clients",
            Self::Invoice => "invoices",
            Self::Payment => "payments",
            Self::Court => "courts",
            Self::CourtCase => "court_cases",
            Self::Employee => "employees",
            Self::ServerPayRecord => "server_pay_records",
        }
    }
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.collection())
    }
}

/// Fields stamped by the gateway; never accepted from non-privileged callers
pub const PROTECTED_FIELDS: &[&str] = &["id", "tenant_id", "created_by", "created_at"];

/// Job fields
pub mod job {
    pub const STATUS: &str = "status";
    pub const CLIENT_ID: &str = "client_id";
    pub const ASSIGNED_SERVER: &str = "assigned_server";
    pub const CREATED_AT: &str = "created_at";

    /// Fields a contractor who is not the assigned server may see
    pub const CONTRACTOR_VISIBLE: &[&str] = &[
        "id",
        "tenant_id",
        "job_number",
        "status",
        "priority",
        "assigned_server",
        "service_type",
        "recipient_name",
        "service_address",
        "due_date",
        "notes",
        "attempts",
        "completion_date",
        "completion_notes",
        "created_at",
        "updated_at",
    ];

    /// Fields a contractor may change
    pub const CONTRACTOR_MUTABLE: &[&str] = &[
        "status",
        "notes",
        "attempts",
        "completion_date",
        "completion_notes",
        "completion_latitude",
        "completion_longitude",
    ];
}

/// Invoice fields
pub mod invoice {
    pub const CLIENT_ID: &str = "client_id";
    pub const TOTAL: &str = "total";
}

/// Payment fields
pub mod payment {
    pub const CLIENT_ID: &str = "client_id";
    pub const AMOUNT: &str = "amount";
}
