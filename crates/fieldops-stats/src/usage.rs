//! Platform usage counters
//!
//! Each tracked operation bumps `counts.{operation}` in five buckets (day,
//! ISO week, month, year, all time). Buckets are created on first write by
//! merge-upsert and never deleted.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use fieldops_common::store::get_path;
use fieldops_common::{
    Clock, Delta, Document, DocumentStore, FieldOpsError, FieldOpsResult, SystemClock,
    UsageConfig, WriteOp,
};
use serde_json::{json, Value};
use tokio::task::JoinHandle;
use tracing::{debug, error};

use crate::buckets::{keys_for, Granularity};

pub struct UsagePartitioner {
    store: Arc<dyn DocumentStore>,
    clock: Arc<dyn Clock>,
    collection: String,
}

impl UsagePartitioner {
    pub fn new(store: Arc<dyn DocumentStore>, config: &UsageConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            collection: config.collection.clone(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Fire-and-forget increment for "now". Failures are logged only.
    pub fn track(self: &Arc<Self>, operation: impl Into<String>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        let operation = operation.into();
        let at = self.clock.now();
        tokio::spawn(async move {
            if let Err(e) = this.record_at(&operation, at).await {
                error!(operation = %operation, error = %e, "usage tracking failed");
            }
        })
    }

    /// Increment every bucket containing `at`; the five upserts run concurrently
    pub async fn record_at(&self, operation: &str, at: DateTime<Utc>) -> FieldOpsResult<()> {
        validate_operation(operation)?;
        let keys = keys_for(at);
        let updated_at = at.to_rfc3339();
        let [daily, weekly, monthly, yearly, all_time] = keys.entries();

        let results = tokio::join!(
            self.bump(daily, operation, &updated_at),
            self.bump(weekly, operation, &updated_at),
            self.bump(monthly, operation, &updated_at),
            self.bump(yearly, operation, &updated_at),
            self.bump(all_time, operation, &updated_at),
        );
        results.0?;
        results.1?;
        results.2?;
        results.3?;
        results.4?;

        debug!(operation, bucket = %keys.daily, "usage recorded");
        Ok(())
    }

    /// Per-operation counts of one bucket; empty when the bucket was never written
    pub async fn usage_for(&self, bucket_id: &str) -> FieldOpsResult<BTreeMap<String, i64>> {
        let Some(doc) = self.store.find_by_id(&self.collection, bucket_id).await? else {
            return Ok(BTreeMap::new());
        };
        let counts = match get_path(&doc, "counts") {
            Some(Value::Object(counts)) => counts
                .iter()
                .filter_map(|(op, n)| n.as_i64().map(|n| (op.clone(), n)))
                .collect(),
            _ => BTreeMap::new(),
        };
        Ok(counts)
    }

    async fn bump(
        &self,
        (granularity, bucket): (Granularity, &str),
        operation: &str,
        updated_at: &str,
    ) -> FieldOpsResult<()> {
        let mut seed = Document::new();
        seed.insert("granularity".into(), json!(granularity.as_str()));
        seed.insert("counts".into(), json!({}));

        // last-writer-wins; the timestamp is informational
        let mut touch = Document::new();
        touch.insert("updated_at".into(), json!(updated_at));

        self.store
            .batch_write(vec![
                WriteOp::UpsertIncrement {
                    collection: self.collection.clone(),
                    id: bucket.to_string(),
                    seed,
                    increments: vec![(format!("counts.{operation}"), Delta::Int(1))],
                },
                WriteOp::Update {
                    collection: self.collection.clone(),
                    id: bucket.to_string(),
                    fields: touch,
                },
            ])
            .await?;
        Ok(())
    }
}

fn validate_operation(operation: &str) -> FieldOpsResult<()> {
    if operation.is_empty() || operation.contains('.') {
        return Err(FieldOpsError::Validation(format!(
            "usage operation must be a non-empty name without dots: {operation:?}"
        )));
    }
    Ok(())
}
