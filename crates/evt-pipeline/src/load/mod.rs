//! Load stage: normalized artifact into the document store

pub mod documents;

pub use documents::record_batch_to_documents;

use crate::config::{StagingLayout, StoreTarget};
use crate::store::StoreConnector;
use crate::transform::read_parquet;
use crate::variables::ConnectionResolver;
use evt_common::{ArtifactKind, ArtifactLocation, EtlError, Result};
use tracing::{info, instrument, warn};

/// Inserts the staged normalized batch into the target collection
pub struct Loader<C> {
    connector: C,
    staging: StagingLayout,
    target: StoreTarget,
    resolver: ConnectionResolver,
}

impl<C: StoreConnector> Loader<C> {
    pub fn new(
        connector: C,
        staging: StagingLayout,
        target: StoreTarget,
        resolver: ConnectionResolver,
    ) -> Self {
        Self {
            connector,
            staging,
            target,
            resolver,
        }
    }

    /// Resolve the connection string without touching the network
    pub fn resolve_connection_string(&self) -> Result<String> {
        self.resolver.resolve()
    }

    /// Connect, verify the deployment answers a ping, then insert every row
    /// of the normalized artifact in a single bulk call.
    ///
    /// Returns the inserted count. An empty artifact skips the insert.
    #[instrument(skip(self), fields(database = %self.target.database, collection = %self.target.collection))]
    pub async fn load(&self, normalized: Option<&ArtifactLocation>) -> Result<u64> {
        let connection_string = self.resolve_connection_string()?;
        let path = self.staging.resolve(ArtifactKind::Normalized, normalized)?;

        let store = self.connector.connect(&connection_string).await?;
        store.ping().await?;

        let read_path = path.clone();
        let documents = tokio::task::spawn_blocking(move || -> Result<Vec<_>> {
            let mut documents = Vec::new();
            for batch in read_parquet(&read_path)? {
                documents.extend(record_batch_to_documents(&batch)?);
            }
            Ok(documents)
        })
        .await
        .map_err(|e| EtlError::Artifact(format!("artifact read task failed: {}", e)))??;

        if documents.is_empty() {
            warn!(path = %path.display(), "Normalized artifact has no rows, skipping insert");
            return Ok(0);
        }

        let rows = documents.len();
        let inserted = store
            .insert_many(&self.target.database, &self.target.collection, documents)
            .await?;

        info!(rows, inserted, "Bulk insert complete");
        Ok(inserted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryConnector;
    use crate::transform::Transformer;
    use crate::variables::StaticVariables;

    const SCENARIO_A: &str =
        r#"[{"timestamp":"2024-01-01T00:00:00Z","amount":"10.5","metadata":{"user":"a"}}]"#;

    fn resolver(connection: Option<&str>) -> ConnectionResolver {
        let runtime = match connection {
            Some(value) => StaticVariables::new().with("mongodb_conn_string", value),
            None => StaticVariables::new(),
        };
        ConnectionResolver::new("mongodb_conn_string", runtime, StaticVariables::new())
    }

    async fn staged(dir: &tempfile::TempDir) -> StagingLayout {
        let staging = StagingLayout::new(dir.path());
        std::fs::write(staging.raw_path(), SCENARIO_A).unwrap();
        Transformer::new(staging.clone()).transform(None).await.unwrap();
        staging
    }

    #[tokio::test]
    async fn test_load_inserts_rows() {
        let dir = tempfile::tempdir().unwrap();
        let staging = staged(&dir).await;
        let connector = MemoryConnector::new();
        let loader = Loader::new(
            connector.clone(),
            staging,
            StoreTarget::default(),
            resolver(Some("memory://")),
        );

        assert_eq!(loader.load(None).await.unwrap(), 1);
        let stored = connector.documents("etl_db", "events");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].get_str("user").unwrap(), "a");
        assert_eq!(stored[0].get_f64("amount").unwrap(), 10.5);
    }

    #[tokio::test]
    async fn test_missing_connection_string_never_connects() {
        let dir = tempfile::tempdir().unwrap();
        let staging = staged(&dir).await;
        let connector = MemoryConnector::new();
        let loader = Loader::new(connector.clone(), staging, StoreTarget::default(), resolver(None));

        let err = loader.load(None).await.unwrap_err();
        assert!(matches!(err, EtlError::Configuration(_)));
        assert_eq!(connector.connection_attempts(), 0);
    }

    #[tokio::test]
    async fn test_failed_ping_skips_insert() {
        let dir = tempfile::tempdir().unwrap();
        let staging = staged(&dir).await;
        let connector = MemoryConnector::new();
        connector.set_reachable(false);
        let loader = Loader::new(
            connector.clone(),
            staging,
            StoreTarget::default(),
            resolver(Some("memory://")),
        );

        let err = loader.load(None).await.unwrap_err();
        assert!(matches!(err, EtlError::Connectivity(_)));
        assert_eq!(connector.insert_calls(), 0);
    }

    #[tokio::test]
    async fn test_rejected_insert_is_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let staging = staged(&dir).await;
        let connector = MemoryConnector::new();
        connector.set_reject_inserts(true);
        let loader = Loader::new(
            connector.clone(),
            staging,
            StoreTarget::default(),
            resolver(Some("memory://")),
        );

        assert!(matches!(loader.load(None).await.unwrap_err(), EtlError::Load(_)));
    }

    #[tokio::test]
    async fn test_missing_artifact_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let connector = MemoryConnector::new();
        let loader = Loader::new(
            connector.clone(),
            StagingLayout::new(dir.path()),
            StoreTarget::default(),
            resolver(Some("memory://")),
        );

        assert!(matches!(loader.load(None).await.unwrap_err(), EtlError::Io(_)));
        assert_eq!(connector.insert_calls(), 0);
    }
}
