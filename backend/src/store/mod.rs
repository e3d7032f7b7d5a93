pub mod memory;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::mpsc::Receiver;

pub type DocId = String;

/// Schemaless field map, as stored by the document database.
pub type Fields = serde_json::Map<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: DocId,
    pub fields: Fields,
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(DocId),

    #[error("permission denied for document: {0}")]
    PermissionDenied(DocId),

    #[error("store backend failure: {0}")]
    Backend(String),
}

/// Equality filter on a single field.
#[derive(Debug, Clone)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        fields.get(&self.field) == Some(&self.value)
    }
}

/// Single-field descending sort for live-query result sets.
#[derive(Debug, Clone)]
pub struct Order {
    pub field: String,
}

impl Order {
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }
}

/// Token that stops a live query.
///
/// `cancel` returns immediately; the store releases the watcher on its
/// next notification pass. Clones share the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Live query over one collection.
///
/// Yields the full matching result set as a batch: once on initial load,
/// then again after every change that alters the result set. Yields
/// `None` once cancelled or once the store drops the watcher.
pub struct Subscription {
    batches: Receiver<Vec<Document>>,
    cancel: CancelHandle,
}

impl Subscription {
    pub fn new(batches: Receiver<Vec<Document>>, cancel: CancelHandle) -> Self {
        Self { batches, cancel }
    }

    pub async fn recv(&mut self) -> Option<Vec<Document>> {
        if self.cancel.is_cancelled() {
            return None;
        }
        self.batches.recv().await
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }
}

/// Hosted document database, as seen by the task client.
///
/// Writes are last-write-wins; any consistency guarantee between
/// concurrent calls belongs to the implementation.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, fields: Fields) -> Result<DocId, StoreError>;

    /// Partial merge into an existing document.
    async fn patch(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    async fn remove(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError>;

    async fn subscribe(
        &self,
        collection: &str,
        filter: Filter,
        order: Order,
    ) -> Result<Subscription, StoreError>;
}
