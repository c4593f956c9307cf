//! Stats dispatch
//!
//! Decouples the access layer from the stats engine. `publish` never blocks
//! and never fails the caller; a worker task applies events in order.
//!
//! ```text
//! AccessGateway ──publish──► [bounded queue] ──► worker ──► StatsAggregator
//!                                 │ full                 │ AggregationFailure
//!                                 ▼                      ▼
//!                           dropped + warn        failure channel
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use fieldops_common::{EventSink, FieldOpsError, LifecycleEvent, StatsConfig};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::aggregator::StatsAggregator;
use crate::usage::UsagePartitioner;

/// An event the worker could not apply
#[derive(Debug, Clone)]
pub struct FailureReport {
    pub event: LifecycleEvent,
    pub error: FieldOpsError,
}

/// Dispatcher counters
#[derive(Debug, Default)]
pub struct DispatcherStats {
    pub received: AtomicU64,
    pub applied: AtomicU64,
    pub failed: AtomicU64,
    pub dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherSnapshot {
    pub received: u64,
    pub applied: u64,
    pub failed: u64,
    pub dropped: u64,
}

impl DispatcherStats {
    pub fn snapshot(&self) -> DispatcherSnapshot {
        DispatcherSnapshot {
            received: self.received.load(Ordering::Relaxed),
            applied: self.applied.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// [`EventSink`] feeding the stats worker
pub struct StatsDispatcher {
    tx: mpsc::Sender<LifecycleEvent>,
    stats: Arc<DispatcherStats>,
}

/// Owner side of a running dispatcher.
///
/// Dropping the handle without calling [`DispatcherHandle::shutdown`] also
/// stops the worker once the queue is drained.
pub struct DispatcherHandle {
    worker: JoinHandle<()>,
    shutdown: Option<oneshot::Sender<()>>,
    failures: mpsc::UnboundedReceiver<FailureReport>,
    stats: Arc<DispatcherStats>,
}

impl StatsDispatcher {
    /// Start the worker on the current runtime
    pub fn spawn(
        aggregator: Arc<StatsAggregator>,
        config: &StatsConfig,
    ) -> (Arc<Self>, DispatcherHandle) {
        Self::spawn_with_usage(aggregator, None, config)
    }

    /// Start the worker and also meter each applied event type
    pub fn spawn_with_usage(
        aggregator: Arc<StatsAggregator>,
        usage: Option<Arc<UsagePartitioner>>,
        config: &StatsConfig,
    ) -> (Arc<Self>, DispatcherHandle) {
        let (tx, rx) = mpsc::channel(config.dispatcher_queue_size.max(1));
        let (failure_tx, failures) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let stats = Arc::new(DispatcherStats::default());

        let worker = Worker {
            aggregator,
            usage,
            failures: failure_tx,
            stats: stats.clone(),
        };
        let worker = tokio::spawn(worker.run(rx, shutdown_rx));

        info!(queue_size = config.dispatcher_queue_size, "stats dispatcher started");

        let dispatcher = Arc::new(Self {
            tx,
            stats: stats.clone(),
        });
        let handle = DispatcherHandle {
            worker,
            shutdown: Some(shutdown_tx),
            failures,
            stats,
        };
        (dispatcher, handle)
    }

    pub fn stats(&self) -> &DispatcherStats {
        &self.stats
    }
}

impl EventSink for StatsDispatcher {
    fn publish(&self, event: LifecycleEvent) {
        self.stats.received.fetch_add(1, Ordering::Relaxed);

        if let Err(e) = self.tx.try_send(event) {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            let (reason, event) = match e {
                mpsc::error::TrySendError::Full(event) => ("queue full", event),
                mpsc::error::TrySendError::Closed(event) => ("dispatcher stopped", event),
            };
            warn!(
                event = event.event_type(),
                company = %event.company(),
                reason,
                "stats event dropped"
            );
        }
    }
}

impl DispatcherHandle {
    pub fn stats(&self) -> DispatcherSnapshot {
        self.stats.snapshot()
    }

    /// Next failure report, if one is waiting
    pub fn try_next_failure(&mut self) -> Option<FailureReport> {
        self.failures.try_recv().ok()
    }

    /// Receiver of every failure report
    pub fn failures(&mut self) -> &mut mpsc::UnboundedReceiver<FailureReport> {
        &mut self.failures
    }

    /// Stop accepting events, apply everything already queued, then stop
    pub async fn shutdown(mut self) -> DispatcherSnapshot {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.worker).await {
            error!(error = %e, "stats worker panicked");
        }
        let snapshot = self.stats.snapshot();
        info!(
            applied = snapshot.applied,
            failed = snapshot.failed,
            dropped = snapshot.dropped,
            "stats dispatcher stopped"
        );
        snapshot
    }
}

struct Worker {
    aggregator: Arc<StatsAggregator>,
    usage: Option<Arc<UsagePartitioner>>,
    failures: mpsc::UnboundedSender<FailureReport>,
    stats: Arc<DispatcherStats>,
}

impl Worker {
    async fn run(
        self,
        mut rx: mpsc::Receiver<LifecycleEvent>,
        mut shutdown: oneshot::Receiver<()>,
    ) {
        loop {
            tokio::select! {
                event = rx.recv() => match event {
                    Some(event) => self.handle(event).await,
                    None => break,
                },
                _ = &mut shutdown => {
                    rx.close();
                    while let Some(event) = rx.recv().await {
                        self.handle(event).await;
                    }
                    break;
                }
            }
        }
    }

    async fn handle(&self, event: LifecycleEvent) {
        match self.aggregator.apply(&event).await {
            Ok(()) => {
                self.stats.applied.fetch_add(1, Ordering::Relaxed);
                debug!(
                    event = event.event_type(),
                    company = %event.company(),
                    "stats event applied"
                );
            }
            Err(error) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                // already logged by the aggregator
                let _ = self.failures.send(FailureReport { event: event.clone(), error });
            }
        }

        if let Some(usage) = &self.usage {
            let operation = event.event_type().replace('.', "_");
            if let Err(e) = usage.record_at(&operation, event.occurred_at()).await {
                error!(operation = %operation, error = %e, "usage metering failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use fieldops_common::store::get_decimal;
    use fieldops_common::{
        Document, DocumentStore, FixedClock, InMemoryStore, Principal, TenantId, UsageConfig,
    };
    use fieldops_tenant::AccessGateway;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use serde_json::{json, Value};

    fn invoice(amount: Decimal) -> LifecycleEvent {
        LifecycleEvent::InvoiceCreated {
            company: TenantId::new("acme"),
            client_id: "c1".into(),
            invoice_id: "i1".into(),
            amount,
            occurred_at: Utc.with_ymd_and_hms(2024, 3, 7, 10, 0, 0).unwrap(),
        }
    }

    fn aggregator(store: &Arc<InMemoryStore>) -> Arc<StatsAggregator> {
        Arc::new(StatsAggregator::new(store.clone(), StatsConfig::default()))
    }

    fn body(v: Value) -> Document {
        v.as_object().cloned().unwrap()
    }

    /// Store, stats engine and gateway wired through a running dispatcher
    struct Pipeline {
        clock: Arc<FixedClock>,
        stats: Arc<StatsAggregator>,
        gateway: AccessGateway,
        handle: DispatcherHandle,
        owner: Principal,
    }

    fn pipeline() -> Pipeline {
        let store = Arc::new(InMemoryStore::new());
        let clock =
            Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap()));
        let stats = Arc::new(
            StatsAggregator::new(store.clone(), StatsConfig::default()).with_clock(clock.clone()),
        );
        let (dispatcher, handle) = StatsDispatcher::spawn(stats.clone(), &StatsConfig::default());
        let gateway = AccessGateway::new(store, dispatcher).with_clock(clock.clone());
        Pipeline {
            clock,
            stats,
            gateway,
            handle,
            owner: Principal::owner("o1", "acme"),
        }
    }

    impl Pipeline {
        async fn set_status(&self, job_id: &str, status: &str) {
            self.gateway
                .jobs()
                .update(&self.owner, job_id, body(json!({ "status": status })))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_events_are_applied_and_drained_on_shutdown() {
        let store = Arc::new(InMemoryStore::new());
        let (dispatcher, handle) =
            StatsDispatcher::spawn(aggregator(&store), &StatsConfig::default());

        for _ in 0..5 {
            dispatcher.publish(invoice(dec!(10.10)));
        }
        let snapshot = handle.shutdown().await;

        assert_eq!(snapshot.received, 5);
        assert_eq!(snapshot.applied, 5);
        assert_eq!(snapshot.dropped, 0);

        let doc = store.find_by_id("company_stats", "acme_2024_03").await.unwrap().unwrap();
        assert_eq!(get_decimal(&doc, "financial.total_billed"), dec!(50.50));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let store = Arc::new(InMemoryStore::new());
        let config = StatsConfig {
            dispatcher_queue_size: 2,
            ..Default::default()
        };
        let (dispatcher, handle) = StatsDispatcher::spawn(aggregator(&store), &config);

        // the worker cannot run until this task yields
        for _ in 0..5 {
            dispatcher.publish(invoice(dec!(1)));
        }
        assert_eq!(dispatcher.stats().dropped.load(Ordering::Relaxed), 3);

        let snapshot = handle.shutdown().await;
        assert_eq!(snapshot.applied, 2);
        assert_eq!(snapshot.received, 5);
    }

    #[tokio::test]
    async fn test_failures_reach_the_failure_channel() {
        let store = Arc::new(InMemoryStore::new());
        let (dispatcher, mut handle) =
            StatsDispatcher::spawn(aggregator(&store), &StatsConfig::default());

        store.set_fail_writes(true);
        dispatcher.publish(invoice(dec!(10)));
        let report = handle.failures().recv().await.unwrap();

        assert!(matches!(report.error, FieldOpsError::AggregationFailure(_)));
        assert_eq!(report.event, invoice(dec!(10)));
        assert!(handle.try_next_failure().is_none());
        assert_eq!(handle.shutdown().await.failed, 1);
    }

    #[tokio::test]
    async fn test_publish_after_shutdown_is_dropped() {
        let store = Arc::new(InMemoryStore::new());
        let (dispatcher, handle) =
            StatsDispatcher::spawn(aggregator(&store), &StatsConfig::default());
        handle.shutdown().await;

        dispatcher.publish(invoice(dec!(10)));
        assert_eq!(dispatcher.stats().dropped.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_usage_metering() {
        let store = Arc::new(InMemoryStore::new());
        let usage = Arc::new(UsagePartitioner::new(store.clone(), &UsageConfig::default()));
        let (dispatcher, handle) = StatsDispatcher::spawn_with_usage(
            aggregator(&store),
            Some(usage.clone()),
            &StatsConfig::default(),
        );

        dispatcher.publish(invoice(dec!(10)));
        dispatcher.publish(invoice(dec!(5)));
        handle.shutdown().await;

        let counts = usage.usage_for("monthly_2024-03").await.unwrap();
        assert_eq!(counts.get("invoice_created"), Some(&2));
    }

    #[tokio::test]
    async fn test_gateway_writes_flow_into_stats() {
        let p = pipeline();
        let job = p
            .gateway
            .jobs()
            .create(&p.owner, body(json!({"client_id": "c1", "assigned_server": "s1"})))
            .await
            .unwrap();
        let job_id = job["id"].as_str().unwrap().to_string();
        p.set_status(&job_id, "in_progress").await;
        p.clock.advance(Duration::days(2));
        p.set_status(&job_id, "completed").await;
        p.gateway
            .invoices()
            .create(&p.owner, body(json!({"client_id": "c1", "total": "120.10"})))
            .await
            .unwrap();
        for amount in [json!(0.1), json!(120)] {
            p.gateway
                .payments()
                .create(&p.owner, body(json!({"client_id": "c1", "amount": amount})))
                .await
                .unwrap();
        }

        let snapshot = p.handle.shutdown().await;
        assert_eq!(snapshot.applied, 5);

        let acme = TenantId::new("acme");
        let month = p.stats.get_stats_for_period(&acme, 2024, Some(3)).await.unwrap();
        assert_eq!(month.jobs.total, 1);
        assert_eq!(month.jobs.completed, 1);
        assert_eq!(month.jobs.in_progress, 0);
        assert_eq!(month.performance.avg_completion_days, 2.0);
        assert_eq!(month.financial.total_billed, dec!(120.10));
        assert!(month.financial.outstanding.is_zero());
        assert_eq!(month.financial.collection_rate, 1.0);

        let servers = p.stats.get_top_servers(&acme, 2024, Some(3), 5).await.unwrap();
        assert_eq!(servers[0].performance.jobs_completed, 1);
    }

    #[tokio::test]
    async fn test_retried_job_flows_into_stats() {
        let p = pipeline();
        let job = p
            .gateway
            .jobs()
            .create(&p.owner, body(json!({"client_id": "c1", "assigned_server": "s1"})))
            .await
            .unwrap();
        let job_id = job["id"].as_str().unwrap().to_string();

        for status in ["in_progress", "unable_to_serve", "assigned", "in_progress", "completed"] {
            p.set_status(&job_id, status).await;
        }

        let snapshot = p.handle.shutdown().await;
        // created, unable_to_serve, reopened, completed
        assert_eq!(snapshot.applied, 4);
        assert_eq!(snapshot.failed, 0);

        let acme = TenantId::new("acme");
        let month = p.stats.get_stats_for_period(&acme, 2024, Some(3)).await.unwrap();
        assert_eq!(month.jobs.total, 1);
        assert_eq!(month.jobs.in_progress, 0);
        assert_eq!(month.jobs.completed, 2);
        assert_eq!(month.jobs.failed, 1);
        assert_eq!(month.jobs.successful, 1);

        let servers = p.stats.get_top_servers(&acme, 2024, Some(3), 5).await.unwrap();
        assert_eq!(servers[0].performance.jobs_assigned, 2);
        assert_eq!(servers[0].performance.jobs_completed, 2);
    }
}
