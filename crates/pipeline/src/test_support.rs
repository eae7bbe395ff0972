//! Store wrapper that fails selected writes, for failure-path tests.

use async_trait::async_trait;
use kenning_core::error::StoreError;
use kenning_core::record::Collection;
use kenning_core::store::{Query, Store, StoreChange};
use kenning_store::InMemoryStore;
use serde_json::Value;
use tokio::sync::broadcast;

type Rule = Box<dyn Fn(Collection, &str, &Value) -> bool + Send + Sync>;

/// Delegates to an [`InMemoryStore`], except that inserts and patches for
/// which `rule(collection, id, body)` holds fail with a storage error.
pub(crate) struct FailingStore {
    inner: InMemoryStore,
    rule: Rule,
}

impl FailingStore {
    pub(crate) fn new(rule: impl Fn(Collection, &str, &Value) -> bool + Send + Sync + 'static) -> Self {
        Self {
            inner: InMemoryStore::new(),
            rule: Box::new(rule),
        }
    }

    fn check(&self, collection: Collection, id: &str, body: &Value) -> Result<(), StoreError> {
        if (self.rule)(collection, id, body) {
            return Err(StoreError::Storage("disk full".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl Store for FailingStore {
    fn name(&self) -> &str {
        "failing"
    }

    async fn get_document(&self, collection: Collection, id: &str) -> Result<Option<Value>, StoreError> {
        self.inner.get_document(collection, id).await
    }

    async fn insert_document(&self, collection: Collection, id: &str, document: Value) -> Result<(), StoreError> {
        self.check(collection, id, &document)?;
        self.inner.insert_document(collection, id, document).await
    }

    async fn patch_document(&self, collection: Collection, id: &str, patch: Value) -> Result<bool, StoreError> {
        self.check(collection, id, &patch)?;
        self.inner.patch_document(collection, id, patch).await
    }

    async fn delete_document(&self, collection: Collection, id: &str) -> Result<bool, StoreError> {
        self.inner.delete_document(collection, id).await
    }

    async fn query_documents(&self, collection: Collection, query: &Query) -> Result<Vec<Value>, StoreError> {
        self.inner.query_documents(collection, query).await
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.subscribe()
    }
}
