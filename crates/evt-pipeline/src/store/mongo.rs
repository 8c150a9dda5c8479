//! MongoDB document store

use super::{DocumentStore, StoreConnector};
use async_trait::async_trait;
use evt_common::{EtlError, Result};
use mongodb::bson::{doc, Document};
use mongodb::error::ErrorKind;
use mongodb::options::{ClientOptions, ServerApi, ServerApiVersion};
use mongodb::Client;
use tracing::{debug, info};

const APP_NAME: &str = "evt-pipeline";

/// Connects with the stable Server API (version 1)
#[derive(Debug, Clone, Copy, Default)]
pub struct MongoConnector;

impl MongoConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl StoreConnector for MongoConnector {
    async fn connect(&self, connection_string: &str) -> Result<Box<dyn DocumentStore>> {
        let mut options = ClientOptions::parse(connection_string)
            .await
            .map_err(|e| match *e.kind {
                ErrorKind::InvalidArgument { .. } => {
                    EtlError::Configuration(format!("invalid connection string: {}", e))
                },
                _ => EtlError::Connectivity(format!("failed to resolve deployment: {}", e)),
            })?;

        options.server_api = Some(ServerApi::builder().version(ServerApiVersion::V1).build());
        options.app_name = Some(APP_NAME.to_string());

        let client = Client::with_options(options)
            .map_err(|e| EtlError::Connectivity(format!("failed to create client: {}", e)))?;
        debug!("MongoDB client created");

        Ok(Box::new(MongoStore { client }))
    }
}

/// A MongoDB deployment
pub struct MongoStore {
    client: Client,
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn ping(&self) -> Result<()> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| EtlError::Connectivity(format!("ping failed: {}", e)))?;

        info!("Pinged deployment, connection is live");
        Ok(())
    }

    async fn insert_many(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
    ) -> Result<u64> {
        let result = self
            .client
            .database(database)
            .collection::<Document>(collection)
            .insert_many(documents)
            .await
            .map_err(|e| {
                EtlError::Load(format!("bulk insert into {}.{} failed: {}", database, collection, e))
            })?;

        Ok(result.inserted_ids.len() as u64)
    }
}
