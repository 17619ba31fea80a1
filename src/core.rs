use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::migrate::{MigrationEngine, MigrationReport};
use crate::remote::{RemoteContentSource, RemoteMirror};
use crate::render::Renderer;
use crate::replication::{
    HealthMonitor, HttpReplicationClient, ReplicationService, RequestCoordinator, SyncService,
    Thresholds,
};
use crate::repo::ContentRepository;
use crate::store::TransactionCoordinator;

/// Composition root. Everything is explicitly constructed and handed
/// down; no component reaches for ambient global state.
pub struct ReaderCore {
    pub repository: Arc<ContentRepository>,
    pub health: Arc<HealthMonitor>,
    pub requests: Arc<RequestCoordinator>,
    pub sync: Option<SyncService>,
    pub mirror: Option<RemoteMirror>,
    coordinator: Arc<TransactionCoordinator>,
    migration: MigrationEngine,
}

impl ReaderCore {
    /// Wire the core from host configuration plus injected
    /// collaborators. `remote` and `replica` are optional: without a
    /// remote source the core serves what it already has, without a
    /// replica it runs local-only.
    pub async fn new(
        config: &Config,
        renderer: Arc<dyn Renderer>,
        remote: Option<Arc<dyn RemoteContentSource>>,
        replica: Option<Arc<dyn ReplicationService>>,
    ) -> Result<Self> {
        let coordinator = Arc::new(TransactionCoordinator::open(&config.db_path).await?);
        let repository = Arc::new(ContentRepository::new(
            Arc::clone(&coordinator),
            renderer,
            config.render_timeout(),
        ));

        let health = Arc::new(HealthMonitor::new(
            Thresholds {
                healthy: config.healthy_threshold,
                failed: config.failed_threshold,
            },
            config.push_backoff(),
        ));
        let requests = Arc::new(RequestCoordinator::new(
            Arc::clone(&health),
            config.queue_capacity,
        ));

        let replica = replica.or_else(|| Self::replica_from_config(config));
        let sync = replica.map(|service| {
            SyncService::new(
                Arc::clone(&repository),
                Arc::clone(&requests),
                Arc::clone(&health),
                service,
            )
        });

        let mirror = remote.map(|source| RemoteMirror::new(source, Arc::clone(&repository)));

        let migration = MigrationEngine::new(Arc::clone(&coordinator), config.batch_size);

        Ok(Self {
            repository,
            health,
            requests,
            sync,
            mirror,
            coordinator,
            migration,
        })
    }

    fn replica_from_config(config: &Config) -> Option<Arc<dyn ReplicationService>> {
        let url = config.replica_url.as_ref()?;
        let token = config.replica_token.as_ref()?;
        Some(Arc::new(HttpReplicationClient::new(
            url.clone(),
            token.clone(),
            config.replica_timeout(),
        )))
    }

    /// One-time startup work: run (or resume) the legacy migration,
    /// then drop any query results cached before it ran.
    pub async fn startup(&self) -> Result<MigrationReport> {
        let report = self.migration.run().await?;
        if !matches!(report, MigrationReport::AlreadyCompleted) {
            self.repository.invalidate_all().await;
        }
        Ok(report)
    }

    pub fn coordinator(&self) -> &Arc<TransactionCoordinator> {
        &self.coordinator
    }
}
