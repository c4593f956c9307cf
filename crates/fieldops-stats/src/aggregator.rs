//! Stats aggregator
//!
//! Turns lifecycle events into counter movements on the monthly partitions:
//!
//! 1. `ensure_partitions` creates any missing partition zeroed (create-if-absent)
//! 2. one atomic batch moves every raw counter the event touches
//! 3. derived rates are recomputed by read-then-write
//!
//! Step 3 is not race-safe; concurrent events can leave a rate briefly stale
//! relative to its counters. Raw counters are always exact.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldops_common::store::{get_decimal, get_f64};
use fieldops_common::{
    Clock, Delta, Document, DocumentStore, FieldOpsError, FieldOpsResult, LifecycleEvent,
    StatsConfig, StoreError, SystemClock, TenantId, WriteOp,
};
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, error};

use crate::buckets::{scopes_for, Period, StatsScope};
use crate::record::{average_value, money_ratio, paths, ratio, seed_document};

type Increments = Vec<(&'static str, Delta)>;

/// Time-partitioned statistics engine
pub struct StatsAggregator {
    pub(crate) store: Arc<dyn DocumentStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: StatsConfig,
}

impl StatsAggregator {
    pub fn new(store: Arc<dyn DocumentStore>, config: StatsConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &StatsConfig {
        &self.config
    }

    pub(crate) fn collection(&self, scope: &StatsScope) -> &str {
        match scope {
            StatsScope::Company(_) => &self.config.company_collection,
            StatsScope::Client { .. } => &self.config.client_collection,
            StatsScope::Server { .. } => &self.config.server_collection,
        }
    }

    /// Create every missing partition zeroed. Existing partitions are never touched.
    pub async fn ensure_partitions(
        &self,
        scopes: &[StatsScope],
        period: Period,
    ) -> FieldOpsResult<()> {
        let now = self.clock.now().to_rfc3339();
        for scope in scopes {
            let collection = self.collection(scope);
            let id = scope.partition_id(period);
            let seed = seed_document(scope, period, &now)?;

            match self.store.create_with_id(collection, &id, seed).await {
                Ok(_) => debug!(collection, partition = %id, "stats partition initialised"),
                Err(StoreError::AlreadyExists { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    // =========================================================================
    // Recording
    // =========================================================================

    pub async fn record_job_created(
        &self,
        company: &TenantId,
        client: &str,
        server: Option<&str>,
    ) -> FieldOpsResult<()> {
        self.job_created_at(company, client, server, self.clock.now()).await
    }

    pub async fn record_job_completed(
        &self,
        company: &TenantId,
        client: &str,
        server: Option<&str>,
        was_successful: bool,
        completion_days: Option<f64>,
    ) -> FieldOpsResult<()> {
        let at = self.clock.now();
        self.job_completed_at(company, client, server, was_successful, completion_days, at)
            .await
    }

    pub async fn record_job_cancelled(
        &self,
        company: &TenantId,
        client: &str,
        server: Option<&str>,
    ) -> FieldOpsResult<()> {
        self.job_cancelled_at(company, client, server, self.clock.now()).await
    }

    /// A failed job went back to `assigned`; it counts as open again
    pub async fn record_job_reopened(
        &self,
        company: &TenantId,
        server: Option<&str>,
    ) -> FieldOpsResult<()> {
        self.job_reopened_at(company, server, self.clock.now()).await
    }

    pub async fn record_invoice_created(
        &self,
        company: &TenantId,
        client: &str,
        amount: Decimal,
    ) -> FieldOpsResult<()> {
        self.invoice_created_at(company, client, amount, self.clock.now()).await
    }

    pub async fn record_payment_received(
        &self,
        company: &TenantId,
        client: &str,
        amount: Decimal,
    ) -> FieldOpsResult<()> {
        self.payment_received_at(company, client, amount, self.clock.now()).await
    }

    /// Record a lifecycle event into the partition of its `occurred_at`
    pub async fn apply(&self, event: &LifecycleEvent) -> FieldOpsResult<()> {
        match event {
            LifecycleEvent::JobCreated { company, client_id, server_id, occurred_at, .. } => {
                self.job_created_at(company, client_id, server_id.as_deref(), *occurred_at).await
            }
            LifecycleEvent::JobCompleted {
                company,
                client_id,
                server_id,
                successful,
                completion_days,
                occurred_at,
                ..
            } => {
                self.job_completed_at(
                    company,
                    client_id,
                    server_id.as_deref(),
                    *successful,
                    *completion_days,
                    *occurred_at,
                )
                .await
            }
            LifecycleEvent::JobCancelled { company, client_id, server_id, occurred_at, .. } => {
                self.job_cancelled_at(company, client_id, server_id.as_deref(), *occurred_at).await
            }
            LifecycleEvent::JobReopened { company, server_id, occurred_at, .. } => {
                self.job_reopened_at(company, server_id.as_deref(), *occurred_at).await
            }
            LifecycleEvent::InvoiceCreated { company, client_id, amount, occurred_at, .. } => {
                self.invoice_created_at(company, client_id, *amount, *occurred_at).await
            }
            LifecycleEvent::PaymentReceived { company, client_id, amount, occurred_at, .. } => {
                self.payment_received_at(company, client_id, *amount, *occurred_at).await
            }
        }
    }

    async fn job_created_at(
        &self,
        company: &TenantId,
        client: &str,
        server: Option<&str>,
        at: DateTime<Utc>,
    ) -> FieldOpsResult<()> {
        let plan: Vec<(StatsScope, Increments)> = scopes_for(company, client, server)
            .into_iter()
            .map(|scope| {
                let increments = match &scope {
                    StatsScope::Company(_) => vec![
                        (paths::JOBS_TOTAL, Delta::Int(1)),
                        (paths::JOBS_IN_PROGRESS, Delta::Int(1)),
                    ],
                    StatsScope::Client { .. } => vec![(paths::CLIENT_JOBS_SENT, Delta::Int(1))],
                    StatsScope::Server { .. } => vec![(paths::SERVER_JOBS_ASSIGNED, Delta::Int(1))],
                };
                (scope, increments)
            })
            .collect();

        self.guarded("record_job_created", company, async {
            let period = Period::from_timestamp(at);
            let scopes = self.commit(plan, period).await?;
            self.refresh_derived(&scopes, period, None).await
        })
        .await
    }

    async fn job_completed_at(
        &self,
        company: &TenantId,
        client: &str,
        server: Option<&str>,
        was_successful: bool,
        completion_days: Option<f64>,
        at: DateTime<Utc>,
    ) -> FieldOpsResult<()> {
        let plan: Vec<(StatsScope, Increments)> = scopes_for(company, client, server)
            .into_iter()
            .map(|scope| {
                let increments = match &scope {
                    StatsScope::Company(_) => vec![
                        (paths::JOBS_IN_PROGRESS, Delta::Int(-1)),
                        (paths::JOBS_COMPLETED, Delta::Int(1)),
                        if was_successful {
                            (paths::JOBS_SUCCESSFUL, Delta::Int(1))
                        } else {
                            (paths::JOBS_FAILED, Delta::Int(1))
                        },
                    ],
                    StatsScope::Client { .. } => {
                        let mut incs = vec![(paths::CLIENT_JOBS_COMPLETED, Delta::Int(1))];
                        if was_successful {
                            incs.push((paths::CLIENT_JOBS_SUCCESSFUL, Delta::Int(1)));
                        }
                        incs
                    }
                    StatsScope::Server { .. } => vec![
                        (paths::SERVER_JOBS_COMPLETED, Delta::Int(1)),
                        if was_successful {
                            (paths::SERVER_JOBS_SUCCESSFUL, Delta::Int(1))
                        } else {
                            (paths::SERVER_JOBS_FAILED, Delta::Int(1))
                        },
                    ],
                };
                (scope, increments)
            })
            .collect();

        self.guarded("record_job_completed", company, async {
            let period = Period::from_timestamp(at);
            let scopes = self.commit(plan, period).await?;
            self.refresh_derived(&scopes, period, completion_days).await
        })
        .await
    }

    async fn job_cancelled_at(
        &self,
        company: &TenantId,
        client: &str,
        server: Option<&str>,
        at: DateTime<Utc>,
    ) -> FieldOpsResult<()> {
        let plan: Vec<(StatsScope, Increments)> = scopes_for(company, client, server)
            .into_iter()
            .map(|scope| {
                let increments = match &scope {
                    StatsScope::Company(_) => vec![
                        (paths::JOBS_IN_PROGRESS, Delta::Int(-1)),
                        (paths::JOBS_CANCELLED, Delta::Int(1)),
                    ],
                    StatsScope::Client { .. } => {
                        vec![(paths::CLIENT_JOBS_CANCELLED, Delta::Int(1))]
                    }
                    StatsScope::Server { .. } => {
                        vec![(paths::SERVER_JOBS_CANCELLED, Delta::Int(1))]
                    }
                };
                (scope, increments)
            })
            .collect();

        self.guarded("record_job_cancelled", company, async {
            let period = Period::from_timestamp(at);
            let scopes = self.commit(plan, period).await?;
            self.refresh_derived(&scopes, period, None).await
        })
        .await
    }

    /// Undo the in-progress decrement of the failed attempt. Completion
    /// counters keep the failure; the retry is a fresh assignment for the
    /// server. Rates do not depend on either counter, so nothing is refreshed.
    async fn job_reopened_at(
        &self,
        company: &TenantId,
        server: Option<&str>,
        at: DateTime<Utc>,
    ) -> FieldOpsResult<()> {
        let mut plan: Vec<(StatsScope, Increments)> = vec![(
            StatsScope::Company(company.clone()),
            vec![(paths::JOBS_IN_PROGRESS, Delta::Int(1))],
        )];
        if let Some(server) = server {
            plan.push((
                StatsScope::Server {
                    company: company.clone(),
                    server: server.to_string(),
                },
                vec![(paths::SERVER_JOBS_ASSIGNED, Delta::Int(1))],
            ));
        }

        self.guarded("record_job_reopened", company, async {
            self.commit(plan, Period::from_timestamp(at)).await?;
            Ok(())
        })
        .await
    }

    async fn invoice_created_at(
        &self,
        company: &TenantId,
        client: &str,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> FieldOpsResult<()> {
        let plan = vec![
            (
                StatsScope::Company(company.clone()),
                vec![
                    (paths::FIN_TOTAL_BILLED, Delta::Decimal(amount)),
                    (paths::FIN_OUTSTANDING, Delta::Decimal(amount)),
                    (paths::FIN_INVOICE_COUNT, Delta::Int(1)),
                ],
            ),
            (
                client_scope(company, client),
                vec![
                    (paths::CLIENT_TOTAL_BILLED, Delta::Decimal(amount)),
                    (paths::CLIENT_OUTSTANDING, Delta::Decimal(amount)),
                ],
            ),
        ];

        self.guarded("record_invoice_created", company, async {
            let period = Period::from_timestamp(at);
            let scopes = self.commit(plan, period).await?;
            self.refresh_derived(&scopes[..1], period, None).await
        })
        .await
    }

    async fn payment_received_at(
        &self,
        company: &TenantId,
        client: &str,
        amount: Decimal,
        at: DateTime<Utc>,
    ) -> FieldOpsResult<()> {
        let plan = vec![
            (
                StatsScope::Company(company.clone()),
                vec![
                    (paths::FIN_TOTAL_COLLECTED, Delta::Decimal(amount)),
                    (paths::FIN_OUTSTANDING, Delta::Decimal(-amount)),
                    (paths::FIN_PAYMENT_COUNT, Delta::Int(1)),
                ],
            ),
            (
                client_scope(company, client),
                vec![
                    (paths::CLIENT_TOTAL_PAID, Delta::Decimal(amount)),
                    (paths::CLIENT_OUTSTANDING, Delta::Decimal(-amount)),
                ],
            ),
        ];

        self.guarded("record_payment_received", company, async {
            let period = Period::from_timestamp(at);
            let scopes = self.commit(plan, period).await?;
            self.refresh_derived(&scopes[..1], period, None).await
        })
        .await
    }

    // =========================================================================
    // Internals
    // =========================================================================

    /// Log a failed recording and surface it as an aggregation failure
    async fn guarded<F>(
        &self,
        operation: &'static str,
        company: &TenantId,
        fut: F,
    ) -> FieldOpsResult<()>
    where
        F: Future<Output = FieldOpsResult<()>>,
    {
        fut.await.map_err(|err| {
            error!(operation, company = %company, error = %err, "stats aggregation failed");
            match err {
                e @ FieldOpsError::AggregationFailure(_) => e,
                other => {
                    FieldOpsError::AggregationFailure(format!("{operation} for {company}: {other}"))
                }
            }
        })
    }

    /// Ensure the partitions, then move every counter in one batch
    async fn commit(
        &self,
        plan: Vec<(StatsScope, Increments)>,
        period: Period,
    ) -> FieldOpsResult<Vec<StatsScope>> {
        let scopes: Vec<StatsScope> = plan.iter().map(|(scope, _)| scope.clone()).collect();
        self.ensure_partitions(&scopes, period).await?;

        let ops = plan
            .into_iter()
            .map(|(scope, increments)| WriteOp::Increment {
                collection: self.collection(&scope).to_string(),
                id: scope.partition_id(period),
                increments: increments
                    .into_iter()
                    .map(|(path, delta)| (path.to_string(), delta))
                    .collect(),
            })
            .collect();

        self.store.batch_write(ops).await?;
        Ok(scopes)
    }

    /// Recompute rates from the committed counters.
    ///
    /// `completion_days` feeds the running completion average on company and
    /// server partitions; the average is weighted by the completed count.
    async fn refresh_derived(
        &self,
        scopes: &[StatsScope],
        period: Period,
        completion_days: Option<f64>,
    ) -> FieldOpsResult<()> {
        let now = self.clock.now().to_rfc3339();

        for scope in scopes {
            let collection = self.collection(scope);
            let id = scope.partition_id(period);
            let Some(doc) = self.store.find_by_id(collection, &id).await? else {
                continue;
            };

            let mut fields = Document::new();
            match scope {
                StatsScope::Company(_) => {
                    let completed = get_f64(&doc, paths::JOBS_COMPLETED);
                    let cancelled = get_f64(&doc, paths::JOBS_CANCELLED);
                    let billed = get_decimal(&doc, paths::FIN_TOTAL_BILLED);
                    let collected = get_decimal(&doc, paths::FIN_TOTAL_COLLECTED);
                    let invoices = get_f64(&doc, paths::FIN_INVOICE_COUNT) as i64;
                    fields.insert(
                        paths::PERF_SUCCESS_RATE.into(),
                        json!(ratio(get_f64(&doc, paths::JOBS_SUCCESSFUL), completed)),
                    );
                    fields.insert(
                        paths::PERF_CANCELLATION_RATE.into(),
                        json!(ratio(cancelled, get_f64(&doc, paths::JOBS_TOTAL))),
                    );
                    fields.insert(
                        paths::FIN_AVERAGE_JOB_VALUE.into(),
                        json!(average_value(billed, invoices)),
                    );
                    fields.insert(
                        paths::FIN_COLLECTION_RATE.into(),
                        json!(money_ratio(collected, billed)),
                    );
                    if let Some(days) = completion_days {
                        let old = get_f64(&doc, paths::PERF_AVG_COMPLETION_DAYS);
                        fields.insert(
                            paths::PERF_AVG_COMPLETION_DAYS.into(),
                            json!(running_average(old, completed, days)),
                        );
                    }
                }
                StatsScope::Client { .. } => {
                    fields.insert(
                        paths::CLIENT_SUCCESS_RATE.into(),
                        json!(ratio(
                            get_f64(&doc, paths::CLIENT_JOBS_SUCCESSFUL),
                            get_f64(&doc, paths::CLIENT_JOBS_COMPLETED)
                        )),
                    );
                }
                StatsScope::Server { .. } => {
                    let completed = get_f64(&doc, paths::SERVER_JOBS_COMPLETED);
                    fields.insert(
                        paths::SERVER_SUCCESS_RATE.into(),
                        json!(ratio(get_f64(&doc, paths::SERVER_JOBS_SUCCESSFUL), completed)),
                    );
                    if let Some(days) = completion_days {
                        let old = get_f64(&doc, paths::SERVER_AVG_COMPLETION_DAYS);
                        fields.insert(
                            paths::SERVER_AVG_COMPLETION_DAYS.into(),
                            json!(running_average(old, completed, days)),
                        );
                    }
                }
            }
            fields.insert("updated_at".into(), json!(now));

            self.store.update(collection, &id, fields).await?;
        }
        Ok(())
    }
}

fn client_scope(company: &TenantId, client: &str) -> StatsScope {
    StatsScope::Client {
        company: company.clone(),
        client: client.to_string(),
    }
}

/// Fold one more sample into an average over `n` samples (`n` includes it)
fn running_average(old: f64, n: f64, sample: f64) -> f64 {
    if n <= 1.0 {
        sample
    } else {
        (old * (n - 1.0) + sample) / n
    }
}
