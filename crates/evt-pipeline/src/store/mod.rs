//! Document store seam
//!
//! The loader reaches the store only through [`StoreConnector`] and
//! [`DocumentStore`]; MongoDB is the production implementation and
//! [`memory::MemoryConnector`] an in-process one.

pub mod memory;
pub mod mongo;

pub use memory::MemoryConnector;
pub use mongo::MongoConnector;

use async_trait::async_trait;
use evt_common::Result;
use mongodb::bson::Document;

/// Opens store connections from a connection string
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn DocumentStore>>;
}

/// An open connection to a document store
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Liveness check; fails with `EtlError::Connectivity`
    async fn ping(&self) -> Result<()>;

    /// Insert all documents in one bulk call and return the inserted count.
    ///
    /// Not atomic: on failure some documents may already be stored.
    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64>;
}
