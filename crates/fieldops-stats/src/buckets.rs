//! Partition keys
//!
//! Pure mapping from a timestamp (and a company/client/server dimension) to
//! the identifiers of the partitions an event touches. Nothing here reads the
//! wall clock; callers pass "now" explicitly.

use chrono::{DateTime, Datelike, Utc};
use fieldops_common::TenantId;
use serde::{Deserialize, Serialize};

/// Key of the single all-time usage partition
pub const ALL_TIME_KEY: &str = "all_time";

/// Usage bucket granularity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Granularity {
    Daily,
    Weekly,
    Monthly,
    Yearly,
    AllTime,
}

impl Granularity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Daily => "daily",
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Yearly => "yearly",
            Self::AllTime => "all_time",
        }
    }
}

/// Bucket ids for every granularity of one instant
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketKeys {
    pub daily: String,
    pub weekly: String,
    pub monthly: String,
    pub yearly: String,
    pub all_time: String,
}

impl BucketKeys {
    /// `(granularity, bucket id)` pairs, finest first
    pub fn entries(&self) -> [(Granularity, &str); 5] {
        [
            (Granularity::Daily, self.daily.as_str()),
            (Granularity::Weekly, self.weekly.as_str()),
            (Granularity::Monthly, self.monthly.as_str()),
            (Granularity::Yearly, self.yearly.as_str()),
            (Granularity::AllTime, self.all_time.as_str()),
        ]
    }
}

/// Bucket ids for `at` (UTC).
///
/// Weekly keys follow ISO-8601: weeks start on Monday and belong to the
/// week-year containing their Thursday, so 2021-01-01 is `weekly_2020-W53`.
pub fn keys_for(at: DateTime<Utc>) -> BucketKeys {
    let date = at.date_naive();
    let week = date.iso_week();
    BucketKeys {
        daily: format!("daily_{}", date.format("%Y-%m-%d")),
        weekly: format!("weekly_{:04}-W{:02}", week.year(), week.week()),
        monthly: format!("monthly_{:04}-{:02}", date.year(), date.month()),
        yearly: format!("yearly_{:04}", date.year()),
        all_time: ALL_TIME_KEY.to_string(),
    }
}

/// Calendar month a stats partition covers
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    /// 1-12
    pub month: u32,
}

impl Period {
    /// Returns `None` for a month outside 1-12
    pub fn new(year: i32, month: u32) -> Option<Self> {
        (1..=12).contains(&month).then_some(Self { year, month })
    }

    pub fn from_timestamp(at: DateTime<Utc>) -> Self {
        Self {
            year: at.year(),
            month: at.month(),
        }
    }

    pub fn previous_month(&self) -> Self {
        if self.month == 1 {
            Self { year: self.year - 1, month: 12 }
        } else {
            Self { year: self.year, month: self.month - 1 }
        }
    }

    pub fn same_month_prior_year(&self) -> Self {
        Self { year: self.year - 1, month: self.month }
    }

    /// `YYYY-MM`
    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// Dimension a stats partition is kept for
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StatsScope {
    Company(TenantId),
    Client { company: TenantId, client: String },
    Server { company: TenantId, server: String },
}

impl StatsScope {
    pub fn company(&self) -> &TenantId {
        match self {
            Self::Company(company)
            | Self::Client { company, .. }
            | Self::Server { company, .. } => company,
        }
    }

    /// `company`, `company_client` or `company_server`.
    ///
    /// Each segment is escaped so `_` only ever appears as the separator.
    pub fn scope_id(&self) -> String {
        match self {
            Self::Company(company) => escape_segment(company.as_str()),
            Self::Client { company, client } => {
                format!("{}_{}", escape_segment(company.as_str()), escape_segment(client))
            }
            Self::Server { company, server } => {
                format!("{}_{}", escape_segment(company.as_str()), escape_segment(server))
            }
        }
    }

    /// `{scope_id}_{year}_{month}`
    pub fn partition_id(&self, period: Period) -> String {
        format!("{}_{:04}_{:02}", self.scope_id(), period.year, period.month)
    }
}

/// Percent-encode `%` and `_`; ids without either pass through unchanged
fn escape_segment(raw: &str) -> String {
    if !raw.contains(['%', '_']) {
        return raw.to_string();
    }
    let mut out = String::with_capacity(raw.len() + 4);
    for ch in raw.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '_' => out.push_str("%5F"),
            other => out.push(other),
        }
    }
    out
}

/// Scopes one job-level event touches
pub fn scopes_for(company: &TenantId, client: &str, server: Option<&str>) -> Vec<StatsScope> {
    let mut scopes = vec![
        StatsScope::Company(company.clone()),
        StatsScope::Client {
            company: company.clone(),
            client: client.to_string(),
        },
    ];
    if let Some(server) = server {
        scopes.push(StatsScope::Server {
            company: company.clone(),
            server: server.to_string(),
        });
    }
    scopes
}
