use chrono::{DateTime, Utc};

/// Durable migration bookkeeping. `completed = true` is the single
/// source of truth that migration must never run again; it is only ever
/// reset by explicit developer action.
#[derive(Debug, Clone, Default)]
pub struct MigrationProgress {
    pub completed: bool,
    pub attempt_count: i64,
    /// Opaque resume token: the last legacy rowid whose batch committed.
    pub last_cursor: Option<String>,
    pub last_run_at: Option<DateTime<Utc>>,
}
