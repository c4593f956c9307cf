//! In-memory document store (for testing and embedding)

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use super::{get_path, set_path, Delta, Document, DocumentStore, WriteOp, ID_FIELD};
use crate::error::{StoreError, StoreResult};
use crate::query::{compare_values, Direction, Filter, Query};

type Collection = BTreeMap<String, Document>;

/// In-memory document store.
///
/// A single lock guards all collections, so every batch is applied against a
/// staged copy of the touched documents and committed in one step.
#[derive(Default)]
pub struct InMemoryStore {
    collections: RwLock<HashMap<String, Collection>>,
    /// Collections whose ordered queries must be backed by a declared index
    strict_indexes: RwLock<HashSet<String>>,
    indexes: RwLock<HashMap<String, Vec<Vec<String>>>>,
    /// Fault injection
    fail_writes: AtomicBool,
    failing_filters: RwLock<Vec<(String, Filter)>>,
    /// Committed `batch_write` calls
    batches: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ordered queries on `collection` fail with [`StoreError::IndexMissing`]
    /// unless a matching index was declared with [`InMemoryStore::add_index`].
    pub fn require_indexes(&self, collection: &str) {
        self.strict_indexes.write().insert(collection.to_string());
    }

    /// Declare a composite index (equality fields followed by the sort field)
    pub fn add_index(&self, collection: &str, fields: &[&str]) {
        self.indexes
            .write()
            .entry(collection.to_string())
            .or_default()
            .push(fields.iter().map(|f| f.to_string()).collect());
    }

    /// Make every subsequent write fail
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `find` on `collection` fail whenever the query carries `filter`
    pub fn fail_find_on(&self, collection: &str, filter: Filter) {
        self.failing_filters
            .write()
            .push((collection.to_string(), filter));
    }

    /// Number of committed batches, a proxy for backend round trips
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::SeqCst)
    }

    /// Number of documents in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map(|c| c.len())
            .unwrap_or(0)
    }

    fn check_write(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("injected write failure".into()));
        }
        Ok(())
    }

    fn check_index(&self, collection: &str, query: &Query) -> StoreResult<()> {
        let Some(order) = &query.order_by else {
            return Ok(());
        };
        if !self.strict_indexes.read().contains(collection) {
            return Ok(());
        }

        let mut wanted: Vec<String> = query.filters.iter().map(|f| f.field().to_string()).collect();
        wanted.push(order.field.clone());

        let indexes = self.indexes.read();
        let covered = indexes
            .get(collection)
            .map(|list| list.iter().any(|index| same_fields(index, &wanted)))
            .unwrap_or(false);

        if covered {
            Ok(())
        } else {
            Err(StoreError::IndexMissing {
                collection: collection.to_string(),
                fields: wanted.join(","),
            })
        }
    }
}

fn same_fields(index: &[String], wanted: &[String]) -> bool {
    let a: HashSet<&String> = index.iter().collect();
    let b: HashSet<&String> = wanted.iter().collect();
    a == b
}

fn not_found(collection: &str, id: &str) -> StoreError {
    StoreError::NotFound {
        collection: collection.to_string(),
        id: id.to_string(),
    }
}

fn merge_fields(doc: &mut Document, fields: Document) -> StoreResult<()> {
    for (path, value) in fields {
        if path == ID_FIELD {
            continue;
        }
        set_path(doc, &path, value)?;
    }
    Ok(())
}

fn apply_increments(doc: &mut Document, increments: &[(String, Delta)]) -> StoreResult<()> {
    for (path, delta) in increments {
        let next = delta.apply(get_path(doc, path), path)?;
        set_path(doc, path, next)?;
    }
    Ok(())
}

fn sort_documents(docs: &mut [Document], field: &str, direction: Direction) {
    docs.sort_by(|a, b| {
        let ord = match (get_path(a, field), get_path(b, field)) {
            (Some(x), Some(y)) => compare_values(x, y).unwrap_or(std::cmp::Ordering::Equal),
            (None, Some(_)) => std::cmp::Ordering::Less,
            (Some(_), None) => std::cmp::Ordering::Greater,
            (None, None) => std::cmp::Ordering::Equal,
        };
        match direction {
            Direction::Asc => ord,
            Direction::Desc => ord.reverse(),
        }
    });
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn find(&self, collection: &str, query: &Query) -> StoreResult<Vec<Document>> {
        tokio::task::yield_now().await;

        let injected = self
            .failing_filters
            .read()
            .iter()
            .any(|(c, f)| c == collection && query.filters.contains(f));
        if injected {
            return Err(StoreError::Backend(format!("injected query failure on {collection}")));
        }
        self.check_index(collection, query)?;

        let mut docs: Vec<Document> = self
            .collections
            .read()
            .get(collection)
            .map(|c| c.values().filter(|d| query.matches(d)).cloned().collect())
            .unwrap_or_default();

        if let Some(order) = &query.order_by {
            sort_documents(&mut docs, &order.field, order.direction);
        }
        if let Some(limit) = query.limit {
            docs.truncate(limit);
        }
        Ok(docs)
    }

    async fn find_by_id(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        tokio::task::yield_now().await;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(id))
            .cloned())
    }

    async fn create(&self, collection: &str, data: Document) -> StoreResult<Document> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        self.create_with_id(collection, &id, data).await
    }

    async fn create_with_id(
        &self,
        collection: &str,
        id: &str,
        mut data: Document,
    ) -> StoreResult<Document> {
        tokio::task::yield_now().await;
        self.check_write()?;

        let mut collections = self.collections.write();
        let docs = collections.entry(collection.to_string()).or_default();
        if docs.contains_key(id) {
            return Err(StoreError::AlreadyExists {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        data.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        docs.insert(id.to_string(), data.clone());
        Ok(data)
    }

    async fn update(&self, collection: &str, id: &str, fields: Document) -> StoreResult<Document> {
        tokio::task::yield_now().await;
        self.check_write()?;

        let mut collections = self.collections.write();
        let doc = collections
            .get_mut(collection)
            .and_then(|c| c.get_mut(id))
            .ok_or_else(|| not_found(collection, id))?;

        let mut staged = doc.clone();
        merge_fields(&mut staged, fields)?;
        *doc = staged.clone();
        Ok(staged)
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> StoreResult<()> {
        tokio::task::yield_now().await;
        self.check_write()?;

        let mut collections = self.collections.write();

        // Stage every touched document; nothing is visible until all ops succeed.
        let mut staged: HashMap<(String, String), Option<Document>> = HashMap::new();
        for op in &ops {
            let key = (op.collection().to_string(), op.id().to_string());
            let current = staged.entry(key).or_insert_with(|| {
                collections
                    .get(op.collection())
                    .and_then(|c| c.get(op.id()))
                    .cloned()
            });

            match op {
                WriteOp::CreateIfAbsent { id, data, .. } => {
                    if current.is_none() {
                        let mut doc = data.clone();
                        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                        *current = Some(doc);
                    }
                }
                WriteOp::Update { collection, id, fields } => {
                    let doc = current.as_mut().ok_or_else(|| not_found(collection, id))?;
                    merge_fields(doc, fields.clone())?;
                }
                WriteOp::Increment { collection, id, increments } => {
                    let doc = current.as_mut().ok_or_else(|| not_found(collection, id))?;
                    apply_increments(doc, increments)?;
                }
                WriteOp::UpsertIncrement { id, seed, increments, .. } => {
                    let doc = current.get_or_insert_with(|| {
                        let mut doc = seed.clone();
                        doc.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                        doc
                    });
                    apply_increments(doc, increments)?;
                }
            }
        }

        for ((collection, id), doc) in staged {
            if let Some(doc) = doc {
                collections.entry(collection).or_default().insert(id, doc);
            }
        }
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
