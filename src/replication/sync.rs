use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::repo::ContentRepository;

use super::coordinator::{Priority, RequestCoordinator};
use super::health::{HealthMonitor, OperationType};
use super::service::ReplicationService;

const PUSH_CHUNK: usize = 256;
const SCHEMA_VERSION: u32 = 2;

/// Bridges the local store and the cloud replica: drains the mutation
/// journal into pushed change sets and applies pulled ones, always
/// going through the request coordinator so health tracking sees every
/// outcome.
pub struct SyncService {
    repo: Arc<ContentRepository>,
    requests: Arc<RequestCoordinator>,
    monitor: Arc<HealthMonitor>,
    service: Arc<dyn ReplicationService>,
}

impl SyncService {
    pub fn new(
        repo: Arc<ContentRepository>,
        requests: Arc<RequestCoordinator>,
        monitor: Arc<HealthMonitor>,
        service: Arc<dyn ReplicationService>,
    ) -> Self {
        Self {
            repo,
            requests,
            monitor,
            service,
        }
    }

    /// One-time replica schema handshake.
    pub async fn ensure_setup(&self) -> Result<()> {
        let service = Arc::clone(&self.service);
        self.requests
            .submit(OperationType::Setup, Priority::High, async move {
                service.setup(SCHEMA_VERSION).await
            })
            .await?;
        Ok(())
    }

    /// Push queued local mutations. Journal rows are only cleared once
    /// the replica acknowledged them, so a failed push retries the same
    /// rows later.
    pub async fn push_pending(&self) -> Result<usize> {
        let (row_ids, change_set) = self.repo.take_pending(PUSH_CHUNK).await?;
        if change_set.is_empty() {
            return Ok(0);
        }

        let service = Arc::clone(&self.service);
        let outbound = change_set.clone();
        let receipt = self
            .requests
            .submit(OperationType::Export, Priority::Normal, async move {
                service.push(outbound).await
            })
            .await?;

        self.repo.clear_pending(row_ids).await?;
        tracing::debug!("pushed {} changes, replica accepted {}", change_set.len(), receipt.accepted);
        Ok(change_set.len())
    }

    /// Pull remote change sets and apply them locally. Skipped while
    /// the import type is degraded or failed: the local store stays
    /// authoritative until the replica proves itself again.
    pub async fn pull_remote(&self, since: Option<DateTime<Utc>>) -> Result<usize> {
        if self.monitor.local_only(OperationType::Import) {
            tracing::debug!("replica degraded, staying local-only for reads");
            return Ok(0);
        }

        let service = Arc::clone(&self.service);
        let change_sets = self
            .requests
            .submit(OperationType::Import, Priority::Normal, async move {
                service.pull(since).await
            })
            .await?;

        let mut applied = 0;
        for change_set in change_sets {
            applied += self.repo.apply_changes(change_set).await?;
        }
        Ok(applied)
    }
}
