use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::{CancelHandle, DocId, Document, DocumentStore, Fields, Filter, Order, StoreError, Subscription};

/// Per-watcher batch buffer. A full result set is one message, so a
/// slow reader only ever lags by whole snapshots.
const BATCH_CHANNEL_CAPACITY: usize = 64;

struct Watcher {
    collection: String,
    filter: Filter,
    order: Order,
    tx: mpsc::Sender<Vec<Document>>,
    cancel: CancelHandle,
    last_batch: Vec<Document>,
}

/// In-memory implementation of `DocumentStore` with live queries.
///
/// Reference backend for tests and local runs: collections are plain
/// maps, ids are UUIDv4, and every mutation re-materializes each
/// watcher's view. A watcher is only woken when its materialized result
/// set actually changed; cancelled or dropped watchers are released on
/// the next notification pass.
#[derive(Default)]
pub struct InMemoryStore {
    collections: Mutex<HashMap<String, HashMap<DocId, Fields>>>,
    watchers: Mutex<Vec<Watcher>>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Number of watchers still registered. Test hook.
    pub async fn watcher_count(&self) -> usize {
        self.watchers.lock().await.len()
    }

    async fn snapshot(&self, collection: &str) -> HashMap<DocId, Fields> {
        let collections = self.collections.lock().await;
        collections.get(collection).cloned().unwrap_or_default()
    }

    /// Re-materialize and deliver every watcher view of `collection`.
    async fn notify(&self, collection: &str) {
        let docs = self.snapshot(collection).await;
        let mut watchers = self.watchers.lock().await;

        let mut kept = Vec::with_capacity(watchers.len());
        for mut w in watchers.drain(..) {
            if w.cancel.is_cancelled() || w.tx.is_closed() {
                tracing::debug!(collection = %w.collection, "releasing watcher");
                continue;
            }
            if w.collection != collection {
                kept.push(w);
                continue;
            }

            let batch = materialize(&docs, &w.filter, &w.order);
            if batch == w.last_batch {
                kept.push(w);
                continue;
            }

            w.last_batch = batch.clone();
            if w.tx.send(batch).await.is_ok() {
                kept.push(w);
            }
        }

        *watchers = kept;
    }
}

/// Filtered, ordered view over a collection snapshot.
fn materialize(docs: &HashMap<DocId, Fields>, filter: &Filter, order: &Order) -> Vec<Document> {
    let mut matched: Vec<Document> = docs
        .iter()
        .filter(|(_, fields)| filter.matches(fields))
        .map(|(id, fields)| Document {
            id: id.clone(),
            fields: fields.clone(),
        })
        .collect();

    matched.sort_by(|a, b| {
        let ka = a.fields.get(&order.field);
        let kb = b.fields.get(&order.field);
        // Descending on the order field; id as a deterministic tiebreak.
        value_cmp(kb, ka).then_with(|| a.id.cmp(&b.id))
    });

    matched
}

fn value_cmp(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(a), Some(b)) => match (a, b) {
            (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x.cmp(&y),
                _ => x
                    .as_f64()
                    .partial_cmp(&y.as_f64())
                    .unwrap_or(Ordering::Equal),
            },
            (Value::String(x), Value::String(y)) => x.cmp(y),
            (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
            _ => Ordering::Equal,
        },
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert(&self, collection: &str, fields: Fields) -> Result<DocId, StoreError> {
        let id = Uuid::new_v4().to_string();

        {
            let mut collections = self.collections.lock().await;
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.clone(), fields);
        }

        self.notify(collection).await;
        Ok(id)
    }

    async fn patch(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        {
            let mut collections = self.collections.lock().await;
            let existing = collections
                .get_mut(collection)
                .and_then(|docs| docs.get_mut(id))
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;

            for (key, value) in fields {
                existing.insert(key, value);
            }
        }

        self.notify(collection).await;
        Ok(())
    }

    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError> {
        {
            let mut collections = self.collections.lock().await;
            collections
                .get_mut(collection)
                .and_then(|docs| docs.remove(id))
                .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
        }

        self.notify(collection).await;
        Ok(())
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError> {
        let collections = self.collections.lock().await;

        collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document {
                id: id.to_string(),
                fields: fields.clone(),
            })
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }

    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
        order: Order,
    ) -> Result<Subscription, StoreError> {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let cancel = CancelHandle::default();

        let initial = materialize(&self.snapshot(collection).await, &filter, &order);

        // Initial load is delivered through the same channel as change
        // batches; the channel is empty here so this cannot block.
        tx.send(initial.clone())
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;

        let mut watchers = self.watchers.lock().await;
        watchers.push(Watcher {
            collection: collection.to_string(),
            filter,
            order,
            tx,
            cancel: cancel.clone(),
            last_batch: initial,
        });

        Ok(Subscription::new(rx, cancel))
    }
}
