//! In-process document store
//!
//! Behaves like a single deployment shared by every connection opened from
//! the same connector. Reachability and insert failures can be switched on
//! to exercise the loader's failure paths.

use super::{DocumentStore, StoreConnector};
use async_trait::async_trait;
use evt_common::{EtlError, Result};
use mongodb::bson::oid::ObjectId;
use mongodb::bson::{doc, Document};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

type Collections = HashMap<(String, String), Vec<Document>>;

#[derive(Debug)]
struct State {
    collections: Mutex<Collections>,
    reachable: AtomicBool,
    reject_inserts: AtomicBool,
    connects: AtomicUsize,
    insert_calls: AtomicUsize,
}

#[derive(Debug, Clone)]
pub struct MemoryConnector {
    state: Arc<State>,
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self {
            state: Arc::new(State {
                collections: Mutex::new(HashMap::new()),
                reachable: AtomicBool::new(true),
                reject_inserts: AtomicBool::new(false),
                connects: AtomicUsize::new(0),
                insert_calls: AtomicUsize::new(0),
            }),
        }
    }

    /// An unreachable deployment fails every ping
    pub fn set_reachable(&self, reachable: bool) {
        self.state.reachable.store(reachable, Ordering::SeqCst);
    }

    /// A rejecting deployment fails every bulk insert
    pub fn set_reject_inserts(&self, reject: bool) {
        self.state.reject_inserts.store(reject, Ordering::SeqCst);
    }

    pub fn connection_attempts(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    pub fn insert_calls(&self) -> usize {
        self.state.insert_calls.load(Ordering::SeqCst)
    }

    pub fn documents(&self, database: &str, collection: &str) -> Vec<Document> {
        self.state
            .lock()
            .map(|collections| {
                collections
                    .get(&(database.to_string(), collection.to_string()))
                    .cloned()
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    pub fn count(&self, database: &str, collection: &str) -> usize {
        self.documents(database, collection).len()
    }
}

impl State {
    fn lock(&self) -> Result<MutexGuard<'_, Collections>> {
        self.collections
            .lock()
            .map_err(|_| EtlError::Load("memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl StoreConnector for MemoryConnector {
    async fn connect(&self, _connection_string: &str) -> Result<Box<dyn DocumentStore>> {
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryStore {
            state: Arc::clone(&self.state),
        }))
    }
}

struct MemoryStore {
    state: Arc<State>,
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn ping(&self) -> Result<()> {
        if self.state.reachable.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EtlError::Connectivity("deployment unreachable".to_string()))
        }
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64> {
        self.state.insert_calls.fetch_add(1, Ordering::SeqCst);

        if !self.state.reachable.load(Ordering::SeqCst) {
            return Err(EtlError::Load("deployment unreachable".to_string()));
        }
        if self.state.reject_inserts.load(Ordering::SeqCst) {
            return Err(EtlError::Load(format!(
                "bulk insert into {}.{} rejected",
                database, collection
            )));
        }

        let inserted = documents.len() as u64;
        let mut collections = self.state.lock()?;
        let stored = collections
            .entry((database.to_string(), collection.to_string()))
            .or_default();

        for document in documents {
            let mut with_id = doc! { "_id": ObjectId::new() };
            for (key, value) in document {
                if key != "_id" {
                    with_id.insert(key, value);
                }
            }
            stored.push(with_id);
        }

        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_inserts_assign_fresh_ids() {
        let connector = MemoryConnector::new();
        let store = connector.connect("memory://").await.unwrap();

        store.ping().await.unwrap();
        let docs = vec![doc! { "user": "a" }, doc! { "user": "a" }];
        assert_eq!(store.insert_many("etl_db", "events", docs).await.unwrap(), 2);

        let stored = connector.documents("etl_db", "events");
        assert_eq!(stored.len(), 2);
        let first = stored[0].get_object_id("_id").unwrap();
        let second = stored[1].get_object_id("_id").unwrap();
        assert_ne!(first, second);
        assert_eq!(connector.connection_attempts(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_fails_ping() {
        let connector = MemoryConnector::new();
        connector.set_reachable(false);

        let store = connector.connect("memory://").await.unwrap();
        assert!(matches!(store.ping().await.unwrap_err(), EtlError::Connectivity(_)));
    }

    #[tokio::test]
    async fn test_rejected_insert_is_load_error() {
        let connector = MemoryConnector::new();
        connector.set_reject_inserts(true);

        let store = connector.connect("memory://").await.unwrap();
        let err = store
            .insert_many("etl_db", "events", vec![doc! { "a": 1 }])
            .await
            .unwrap_err();
        assert!(matches!(err, EtlError::Load(_)));
        assert_eq!(connector.count("etl_db", "events"), 0);
    }
}
