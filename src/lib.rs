//! Client-side data-consistency core for an offline-first reader: a
//! serialized transaction coordinator over SQLite, a read-through
//! article repository with a derived-content cache, a health-tracked
//! cloud replication layer with local-only fallback, and a resumable
//! legacy-schema migration engine.

pub mod config;
pub mod core;
pub mod error;
pub mod migrate;
pub mod models;
pub mod remote;
pub mod render;
pub mod replication;
pub mod repo;
pub mod store;

pub use crate::core::ReaderCore;
pub use config::Config;
pub use error::{AppError, MigrationError, RenderError, ReplicationError, Result, StoreError};
pub use migrate::{MigrationEngine, MigrationReport};
pub use models::{
    Article, ArticleFilter, ChangeKind, ChangeSet, FormattedContent, MigrationProgress,
    NewArticle, RenderedField, SortKey,
};
pub use remote::{HttpContentSource, RemoteContentSource, RemoteMirror};
pub use render::Renderer;
pub use replication::{
    HealthMonitor, HealthState, HttpReplicationClient, OperationType, Outcome, Priority,
    ReplicationService, RequestCoordinator, SyncService, Thresholds,
};
pub use repo::ContentRepository;
pub use store::TransactionCoordinator;
