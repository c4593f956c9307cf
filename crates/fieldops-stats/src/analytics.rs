//! Read side of the stats engine
//!
//! Period reads, year and all-time rollups, top-N rankings and the
//! month-over-month / year-over-year deltas written back into the current
//! company partition.

use std::collections::BTreeMap;

use fieldops_common::store::{from_document, get_decimal};
use fieldops_common::{
    Direction, Document, FieldOpsError, FieldOpsResult, Filter, Query, StoreError, TenantId,
};
use rust_decimal::prelude::ToPrimitive;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, warn};

use crate::aggregator::StatsAggregator;
use crate::buckets::{Period, StatsScope};
use crate::record::{paths, ClientStats, CompanyStats, PartitionMeta, ServerStats};

/// Percent changes written into a company partition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceChanges {
    pub jobs_change_mom: Option<f64>,
    pub jobs_change_yoy: Option<f64>,
    pub billing_change_mom: Option<f64>,
    pub billing_change_yoy: Option<f64>,
    pub collection_change_mom: Option<f64>,
    pub collection_change_yoy: Option<f64>,
}

/// `(current - prior) / prior * 100`; `None` without a non-zero prior value
pub fn percent_change(current: f64, prior: Option<f64>) -> Option<f64> {
    match prior {
        Some(prior) if prior != 0.0 => Some((current - prior) / prior * 100.0),
        _ => None,
    }
}

/// Partition kinds that can be ranked within a company
trait Ranked: DeserializeOwned + Send {
    const RANK_FIELD: &'static str;

    fn rank(&self) -> i64;
    /// Client or server id
    fn dimension(&self) -> Option<&str>;
    fn scope(company: &TenantId, dimension: &str) -> StatsScope;
    fn sum(meta: PartitionMeta, parts: &[Self]) -> Self;
}

impl Ranked for ClientStats {
    const RANK_FIELD: &'static str = paths::CLIENT_JOBS_SENT;

    fn rank(&self) -> i64 {
        self.metrics.jobs_sent
    }

    fn dimension(&self) -> Option<&str> {
        self.meta.client_id.as_deref()
    }

    fn scope(company: &TenantId, dimension: &str) -> StatsScope {
        StatsScope::Client {
            company: company.clone(),
            client: dimension.to_string(),
        }
    }

    fn sum(meta: PartitionMeta, parts: &[Self]) -> Self {
        ClientStats::sum(meta, parts)
    }
}

impl Ranked for ServerStats {
    const RANK_FIELD: &'static str = paths::SERVER_JOBS_COMPLETED;

    fn rank(&self) -> i64 {
        self.performance.jobs_completed
    }

    fn dimension(&self) -> Option<&str> {
        self.meta.server_id.as_deref()
    }

    fn scope(company: &TenantId, dimension: &str) -> StatsScope {
        StatsScope::Server {
            company: company.clone(),
            server: dimension.to_string(),
        }
    }

    fn sum(meta: PartitionMeta, parts: &[Self]) -> Self {
        ServerStats::sum(meta, parts)
    }
}

fn month_period(year: i32, month: u32) -> FieldOpsResult<Period> {
    Period::new(year, month)
        .ok_or_else(|| FieldOpsError::Validation(format!("invalid month {month}")))
}

/// Counter or money field as a plain number for percent math
fn field_value(doc: &Document, path: &str) -> f64 {
    get_decimal(doc, path).to_f64().unwrap_or(0.0)
}

fn parse_all<T: DeserializeOwned>(docs: Vec<Document>) -> FieldOpsResult<Vec<T>> {
    docs.into_iter()
        .map(|doc| from_document(doc).map_err(FieldOpsError::from))
        .collect()
}

impl StatsAggregator {
    /// Company stats for one month, or the sum of a year when `month` is `None`.
    ///
    /// Read-only: a month without a partition reads as zeros.
    pub async fn get_stats_for_period(
        &self,
        company: &TenantId,
        year: i32,
        month: Option<u32>,
    ) -> FieldOpsResult<CompanyStats> {
        let scope = StatsScope::Company(company.clone());

        if let Some(month) = month {
            let period = month_period(year, month)?;
            return Ok(self
                .load_company(&scope, period)
                .await?
                .unwrap_or_else(|| CompanyStats::empty(unsaved_meta(&scope, period))));
        }

        let query = Query::new()
            .filter(Filter::eq("company_id", company.as_str()))
            .filter(Filter::eq("year", year));
        let docs = self.store.find(&self.config.company_collection, &query).await?;
        let parts: Vec<CompanyStats> = parse_all(docs)?;

        Ok(CompanyStats::sum(PartitionMeta::aggregate(&scope, Some(year)), &parts))
    }

    /// Sum of every company partition ever written
    pub async fn get_all_time_stats(&self, company: &TenantId) -> FieldOpsResult<CompanyStats> {
        let scope = StatsScope::Company(company.clone());
        let query = Query::new().filter(Filter::eq("company_id", company.as_str()));
        let docs = self.store.find(&self.config.company_collection, &query).await?;
        let parts: Vec<CompanyStats> = parse_all(docs)?;

        Ok(CompanyStats::sum(PartitionMeta::aggregate(&scope, None), &parts))
    }

    /// Clients by jobs sent, descending
    pub async fn get_top_clients(
        &self,
        company: &TenantId,
        year: i32,
        month: Option<u32>,
        limit: usize,
    ) -> FieldOpsResult<Vec<ClientStats>> {
        self.top(&self.config.client_collection, company, year, month, limit).await
    }

    /// Servers by jobs completed, descending
    pub async fn get_top_servers(
        &self,
        company: &TenantId,
        year: i32,
        month: Option<u32>,
        limit: usize,
    ) -> FieldOpsResult<Vec<ServerStats>> {
        self.top(&self.config.server_collection, company, year, month, limit).await
    }

    /// Deltas for the clock's current month
    pub async fn calculate_performance_changes(
        &self,
        company: &TenantId,
    ) -> FieldOpsResult<PerformanceChanges> {
        let period = Period::from_timestamp(self.clock.now());
        self.calculate_performance_changes_for(company, period).await
    }

    /// Compare `period` against the previous month and the same month a year
    /// earlier, and write the deltas into the `period` partition.
    pub async fn calculate_performance_changes_for(
        &self,
        company: &TenantId,
        period: Period,
    ) -> FieldOpsResult<PerformanceChanges> {
        let scope = StatsScope::Company(company.clone());
        self.ensure_partitions(std::slice::from_ref(&scope), period).await?;

        let collection = &self.config.company_collection;
        let id = scope.partition_id(period);
        let current = self.store.find_by_id(collection, &id).await?.unwrap_or_default();
        let prev = self
            .store
            .find_by_id(collection, &scope.partition_id(period.previous_month()))
            .await?;
        let prior = self
            .store
            .find_by_id(collection, &scope.partition_id(period.same_month_prior_year()))
            .await?;

        let change = |path: &str, base: &Option<Document>| {
            let prior = base.as_ref().map(|doc| field_value(doc, path));
            percent_change(field_value(&current, path), prior)
        };
        let changes = PerformanceChanges {
            jobs_change_mom: change(paths::JOBS_TOTAL, &prev),
            jobs_change_yoy: change(paths::JOBS_TOTAL, &prior),
            billing_change_mom: change(paths::FIN_TOTAL_BILLED, &prev),
            billing_change_yoy: change(paths::FIN_TOTAL_BILLED, &prior),
            collection_change_mom: change(paths::FIN_TOTAL_COLLECTED, &prev),
            collection_change_yoy: change(paths::FIN_TOTAL_COLLECTED, &prior),
        };

        let mut fields: Document = [
            (paths::PERF_JOBS_CHANGE_MOM, changes.jobs_change_mom),
            (paths::PERF_JOBS_CHANGE_YOY, changes.jobs_change_yoy),
            (paths::PERF_BILLING_CHANGE_MOM, changes.billing_change_mom),
            (paths::PERF_BILLING_CHANGE_YOY, changes.billing_change_yoy),
            (paths::PERF_COLLECTION_CHANGE_MOM, changes.collection_change_mom),
            (paths::PERF_COLLECTION_CHANGE_YOY, changes.collection_change_yoy),
        ]
        .into_iter()
        .map(|(path, change)| (path.to_string(), json!(change)))
        .collect();
        fields.insert("updated_at".into(), json!(self.clock.now().to_rfc3339()));
        self.store.update(collection, &id, fields).await?;

        debug!(company = %company, partition = %id, "performance changes updated");
        Ok(changes)
    }

    async fn load_company(
        &self,
        scope: &StatsScope,
        period: Period,
    ) -> FieldOpsResult<Option<CompanyStats>> {
        let doc = self
            .store
            .find_by_id(self.collection(scope), &scope.partition_id(period))
            .await?;
        doc.map(|doc| from_document(doc).map_err(FieldOpsError::from)).transpose()
    }

    async fn top<T: Ranked>(
        &self,
        collection: &str,
        company: &TenantId,
        year: i32,
        month: Option<u32>,
        limit: usize,
    ) -> FieldOpsResult<Vec<T>> {
        let limit = limit.min(self.config.top_limit_cap);
        let mut query = Query::new()
            .filter(Filter::eq("company_id", company.as_str()))
            .filter(Filter::eq("year", year));

        if let Some(month) = month {
            month_period(year, month)?;
            query = query
                .filter(Filter::eq("month", month))
                .order_by(T::RANK_FIELD, Direction::Desc)
                .limit(limit);
        } else {
            query = query.order_by(T::RANK_FIELD, Direction::Desc);
        }

        let docs = match self.store.find(collection, &query).await {
            Ok(docs) => docs,
            Err(StoreError::IndexMissing { collection, fields }) => {
                warn!(
                    collection = %collection,
                    fields = %fields,
                    company = %company,
                    "ranking index missing, returning no results"
                );
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };
        let parts: Vec<T> = parse_all(docs)?;

        if month.is_some() {
            return Ok(parts);
        }

        let mut grouped: BTreeMap<String, Vec<T>> = BTreeMap::new();
        for part in parts {
            let Some(dimension) = part.dimension().map(str::to_string) else {
                continue;
            };
            grouped.entry(dimension).or_default().push(part);
        }

        let mut ranked: Vec<T> = grouped
            .into_iter()
            .map(|(dimension, parts)| {
                let meta = PartitionMeta::aggregate(&T::scope(company, &dimension), Some(year));
                T::sum(meta, &parts)
            })
            .collect();
        // stable: ties keep dimension order
        ranked.sort_by(|a, b| b.rank().cmp(&a.rank()));
        ranked.truncate(limit);
        Ok(ranked)
    }
}

fn unsaved_meta(scope: &StatsScope, period: Period) -> PartitionMeta {
    let mut meta = PartitionMeta::for_partition(scope, period, "");
    meta.created_at = None;
    meta.updated_at = None;
    meta
}
