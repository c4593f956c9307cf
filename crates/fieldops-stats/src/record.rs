//! Stats partition records
//!
//! Typed views of the documents kept in the company, client and server
//! collections. Counters are only ever moved by store increments; the
//! derived fields here are recomputed from them.

use fieldops_common::store::to_document;
use fieldops_common::{Document, StoreResult};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::buckets::{Period, StatsScope};

/// Dotted counter paths
pub mod paths {
    pub const JOBS_TOTAL: &str = "jobs.total";
    pub const JOBS_IN_PROGRESS: &str = "jobs.in_progress";
    pub const JOBS_COMPLETED: &str = "jobs.completed";
    pub const JOBS_SUCCESSFUL: &str = "jobs.successful";
    pub const JOBS_FAILED: &str = "jobs.failed";
    pub const JOBS_CANCELLED: &str = "jobs.cancelled";

    pub const FIN_TOTAL_BILLED: &str = "financial.total_billed";
    pub const FIN_TOTAL_COLLECTED: &str = "financial.total_collected";
    pub const FIN_OUTSTANDING: &str = "financial.outstanding";
    pub const FIN_INVOICE_COUNT: &str = "financial.invoice_count";
    pub const FIN_PAYMENT_COUNT: &str = "financial.payment_count";
    pub const FIN_AVERAGE_JOB_VALUE: &str = "financial.average_job_value";
    pub const FIN_COLLECTION_RATE: &str = "financial.collection_rate";

    pub const PERF_SUCCESS_RATE: &str = "performance.success_rate";
    pub const PERF_CANCELLATION_RATE: &str = "performance.cancellation_rate";
    pub const PERF_AVG_COMPLETION_DAYS: &str = "performance.avg_completion_days";
    pub const PERF_JOBS_CHANGE_MOM: &str = "performance.jobs_change_mom";
    pub const PERF_JOBS_CHANGE_YOY: &str = "performance.jobs_change_yoy";
    pub const PERF_BILLING_CHANGE_MOM: &str = "performance.billing_change_mom";
    pub const PERF_BILLING_CHANGE_YOY: &str = "performance.billing_change_yoy";
    pub const PERF_COLLECTION_CHANGE_MOM: &str = "performance.collection_change_mom";
    pub const PERF_COLLECTION_CHANGE_YOY: &str = "performance.collection_change_yoy";

    pub const CLIENT_JOBS_SENT: &str = "metrics.jobs_sent";
    pub const CLIENT_JOBS_COMPLETED: &str = "metrics.jobs_completed";
    pub const CLIENT_JOBS_SUCCESSFUL: &str = "metrics.jobs_successful";
    pub const CLIENT_JOBS_CANCELLED: &str = "metrics.jobs_cancelled";
    pub const CLIENT_TOTAL_BILLED: &str = "metrics.total_billed";
    pub const CLIENT_TOTAL_PAID: &str = "metrics.total_paid";
    pub const CLIENT_OUTSTANDING: &str = "metrics.outstanding";
    pub const CLIENT_SUCCESS_RATE: &str = "metrics.success_rate";

    pub const SERVER_JOBS_ASSIGNED: &str = "performance.jobs_assigned";
    pub const SERVER_JOBS_COMPLETED: &str = "performance.jobs_completed";
    pub const SERVER_JOBS_SUCCESSFUL: &str = "performance.jobs_successful";
    pub const SERVER_JOBS_FAILED: &str = "performance.jobs_failed";
    pub const SERVER_JOBS_CANCELLED: &str = "performance.jobs_cancelled";
    pub const SERVER_SUCCESS_RATE: &str = "performance.success_rate";
    pub const SERVER_AVG_COMPLETION_DAYS: &str = "performance.avg_completion_days";
}

/// Identity fields shared by every partition record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionMeta {
    pub scope_id: String,
    pub company_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server_id: Option<String>,
    /// `None` on all-time aggregates
    pub year: Option<i32>,
    /// `None` on yearly and all-time aggregates
    pub month: Option<u32>,
    /// `YYYY-MM`, `YYYY` or `all_time`
    pub period: String,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl PartitionMeta {
    /// Meta for a stored monthly partition
    pub fn for_partition(scope: &StatsScope, period: Period, now: &str) -> Self {
        let (client_id, server_id) = match scope {
            StatsScope::Company(_) => (None, None),
            StatsScope::Client { client, .. } => (Some(client.clone()), None),
            StatsScope::Server { server, .. } => (None, Some(server.clone())),
        };
        Self {
            scope_id: scope.scope_id(),
            company_id: scope.company().to_string(),
            client_id,
            server_id,
            year: Some(period.year),
            month: Some(period.month),
            period: period.label(),
            created_at: Some(now.to_string()),
            updated_at: Some(now.to_string()),
        }
    }

    /// Meta for an in-memory aggregate over several partitions
    pub fn aggregate(scope: &StatsScope, year: Option<i32>) -> Self {
        let mut meta = Self::for_partition(scope, Period { year: 0, month: 1 }, "");
        meta.year = year;
        meta.month = None;
        meta.period = year.map(|y| format!("{y:04}")).unwrap_or_else(|| "all_time".into());
        meta.created_at = None;
        meta.updated_at = None;
        meta
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobCounters {
    pub total: i64,
    pub in_progress: i64,
    pub completed: i64,
    pub successful: i64,
    pub failed: i64,
    pub cancelled: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinancialCounters {
    pub total_billed: Decimal,
    pub total_collected: Decimal,
    /// Not clamped; over-payment goes negative
    pub outstanding: Decimal,
    pub invoice_count: i64,
    pub payment_count: i64,
    pub average_job_value: Decimal,
    pub collection_rate: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyPerformance {
    pub success_rate: f64,
    pub cancellation_rate: f64,
    pub avg_completion_days: f64,
    /// Percent changes; `None` when there is nothing to compare against
    pub jobs_change_mom: Option<f64>,
    pub jobs_change_yoy: Option<f64>,
    pub billing_change_mom: Option<f64>,
    pub billing_change_yoy: Option<f64>,
    pub collection_change_mom: Option<f64>,
    pub collection_change_yoy: Option<f64>,
}

/// Company-wide monthly partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompanyStats {
    #[serde(flatten)]
    pub meta: PartitionMeta,
    pub jobs: JobCounters,
    pub financial: FinancialCounters,
    pub performance: CompanyPerformance,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientMetrics {
    pub jobs_sent: i64,
    pub jobs_completed: i64,
    pub jobs_successful: i64,
    pub jobs_cancelled: i64,
    pub total_billed: Decimal,
    pub total_paid: Decimal,
    pub outstanding: Decimal,
    pub success_rate: f64,
}

/// Company+client monthly partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientStats {
    #[serde(flatten)]
    pub meta: PartitionMeta,
    pub metrics: ClientMetrics,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerPerformance {
    pub jobs_assigned: i64,
    pub jobs_completed: i64,
    pub jobs_successful: i64,
    pub jobs_failed: i64,
    pub jobs_cancelled: i64,
    pub success_rate: f64,
    pub avg_completion_days: f64,
}

/// Company+server monthly partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerStats {
    #[serde(flatten)]
    pub meta: PartitionMeta,
    pub performance: ServerPerformance,
}

/// Zeroed document for a new partition
pub fn seed_document(scope: &StatsScope, period: Period, now: &str) -> StoreResult<Document> {
    let meta = PartitionMeta::for_partition(scope, period, now);
    match scope {
        StatsScope::Company(_) => to_document(&CompanyStats::empty(meta)),
        StatsScope::Client { .. } => to_document(&ClientStats::empty(meta)),
        StatsScope::Server { .. } => to_document(&ServerStats::empty(meta)),
    }
}

/// `num / den`, or 0 when the denominator is empty
pub fn ratio(num: f64, den: f64) -> f64 {
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

/// Money ratio as a plain rate
pub fn money_ratio(num: Decimal, den: Decimal) -> f64 {
    if den.is_zero() {
        0.0
    } else {
        (num / den).to_f64().unwrap_or(0.0)
    }
}

/// Billed amount per invoice, to the cent
pub fn average_value(billed: Decimal, invoices: i64) -> Decimal {
    if invoices == 0 {
        Decimal::ZERO
    } else {
        (billed / Decimal::from(invoices)).round_dp(2)
    }
}

impl CompanyStats {
    pub fn empty(meta: PartitionMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    /// Sum partitions and recompute every rate over the sums
    pub fn sum(meta: PartitionMeta, parts: &[CompanyStats]) -> Self {
        let mut total = Self::empty(meta);
        let mut completion_days = 0.0;

        for part in parts {
            let (j, f) = (&part.jobs, &part.financial);
            total.jobs.total += j.total;
            total.jobs.in_progress += j.in_progress;
            total.jobs.completed += j.completed;
            total.jobs.successful += j.successful;
            total.jobs.failed += j.failed;
            total.jobs.cancelled += j.cancelled;

            total.financial.total_billed += f.total_billed;
            total.financial.total_collected += f.total_collected;
            total.financial.outstanding += f.outstanding;
            total.financial.invoice_count += f.invoice_count;
            total.financial.payment_count += f.payment_count;

            completion_days += part.performance.avg_completion_days * j.completed as f64;
        }

        total.refresh_rates();
        total.performance.avg_completion_days = ratio(completion_days, total.jobs.completed as f64);
        total
    }

    pub fn refresh_rates(&mut self) {
        let (j, f) = (&self.jobs, &mut self.financial);
        self.performance.success_rate = ratio(j.successful as f64, j.completed as f64);
        self.performance.cancellation_rate = ratio(j.cancelled as f64, j.total as f64);
        f.average_job_value = average_value(f.total_billed, f.invoice_count);
        f.collection_rate = money_ratio(f.total_collected, f.total_billed);
    }
}

impl ClientStats {
    pub fn empty(meta: PartitionMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    pub fn sum(meta: PartitionMeta, parts: &[ClientStats]) -> Self {
        let mut total = Self::empty(meta);
        for part in parts {
            let (t, m) = (&mut total.metrics, &part.metrics);
            t.jobs_sent += m.jobs_sent;
            t.jobs_completed += m.jobs_completed;
            t.jobs_successful += m.jobs_successful;
            t.jobs_cancelled += m.jobs_cancelled;
            t.total_billed += m.total_billed;
            t.total_paid += m.total_paid;
            t.outstanding += m.outstanding;
        }
        total.metrics.success_rate = ratio(
            total.metrics.jobs_successful as f64,
            total.metrics.jobs_completed as f64,
        );
        total
    }
}

impl ServerStats {
    pub fn empty(meta: PartitionMeta) -> Self {
        Self {
            meta,
            ..Default::default()
        }
    }

    pub fn sum(meta: PartitionMeta, parts: &[ServerStats]) -> Self {
        let mut total = Self::empty(meta);
        let mut completion_days = 0.0;
        for part in parts {
            let (t, p) = (&mut total.performance, &part.performance);
            t.jobs_assigned += p.jobs_assigned;
            t.jobs_completed += p.jobs_completed;
            t.jobs_successful += p.jobs_successful;
            t.jobs_failed += p.jobs_failed;
            t.jobs_cancelled += p.jobs_cancelled;
            completion_days += p.avg_completion_days * p.jobs_completed as f64;
        }
        let completed = total.performance.jobs_completed as f64;
        total.performance.success_rate = ratio(total.performance.jobs_successful as f64, completed);
        total.performance.avg_completion_days = ratio(completion_days, completed);
        total
    }
}
