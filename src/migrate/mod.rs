use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, OptionalExtension};
use uuid::Uuid;

use crate::error::MigrationError;
use crate::models::{LegacyArticle, MigrationProgress};
use crate::store::TransactionCoordinator;

const LEGACY_TABLE: &str = "legacy_articles";

/// Outcome of one migration run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MigrationReport {
    /// A previous run already marked migration complete.
    AlreadyCompleted,
    /// No legacy area exists on this device.
    NothingToMigrate,
    /// Legacy records were processed (possibly resuming mid-way).
    Migrated { created: usize, updated: usize },
    /// Legacy area exists but could not be read; migration was
    /// force-completed so it never retries forever.
    ForcedComplete { anomaly: String },
}

/// One-shot, resumable batch mover from the legacy schema into the
/// current one. All writes go through the transaction coordinator; the
/// cursor is persisted only after a batch commits, so a crash loses at
/// most one redoable batch. Legacy data is never deleted here.
pub struct MigrationEngine {
    coordinator: Arc<TransactionCoordinator>,
    batch_size: usize,
}

impl MigrationEngine {
    pub fn new(coordinator: Arc<TransactionCoordinator>, batch_size: usize) -> Self {
        Self {
            coordinator,
            batch_size: batch_size.max(1),
        }
    }

    pub async fn run(&self) -> Result<MigrationReport, MigrationError> {
        let progress = self.load_progress().await?;
        if progress.completed {
            return Ok(MigrationReport::AlreadyCompleted);
        }

        self.bump_attempt().await?;

        let legacy_exists = self
            .coordinator
            .read(|conn| {
                let found: Option<String> = conn
                    .query_row(
                        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
                        params![LEGACY_TABLE],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(found.is_some())
            })
            .await?;

        if !legacy_exists {
            tracing::debug!("no legacy area found, marking migration complete");
            self.mark_completed().await?;
            return Ok(MigrationReport::NothingToMigrate);
        }

        // Resume from the persisted cursor: the last legacy rowid whose
        // batch committed.
        let mut cursor: i64 = match progress.last_cursor.as_deref() {
            Some(token) => token
                .parse()
                .map_err(|_| MigrationError::Resume(format!("bad cursor token {:?}", token)))?,
            None => 0,
        };

        let mut created = 0usize;
        let mut updated = 0usize;

        loop {
            let batch_size = self.batch_size;
            let batch = self
                .coordinator
                .perform("migrate_batch", move |tx| migrate_batch(tx, cursor, batch_size))
                .await;

            let batch = match batch {
                Ok(batch) => batch,
                Err(e) if created == 0 && updated == 0 && cursor == 0 => {
                    // Legacy area present but unreadable. Force-complete
                    // rather than retrying forever; the legacy data is
                    // left in place for a later explicit recovery.
                    let anomaly = e.to_string();
                    tracing::warn!("legacy source unreadable, force-completing migration: {}", anomaly);
                    self.mark_completed().await?;
                    return Ok(MigrationReport::ForcedComplete { anomaly });
                }
                Err(e) => return Err(e.into()),
            };

            created += batch.created;
            updated += batch.updated;

            if batch.processed == 0 {
                break;
            }
            cursor = batch.last_rowid;

            // Cursor moves only after the batch committed; redoing the
            // batch after a crash is safe because of the existence
            // check inside migrate_batch.
            self.save_cursor(cursor).await?;

            if batch.processed < self.batch_size {
                break;
            }
        }

        self.mark_completed().await?;
        tracing::info!("migration complete: {} created, {} updated", created, updated);
        Ok(MigrationReport::Migrated { created, updated })
    }

    async fn load_progress(&self) -> Result<MigrationProgress, MigrationError> {
        let progress = self
            .coordinator
            .perform("load_migration_progress", |tx| {
                tx.execute(
                    "INSERT OR IGNORE INTO migration_progress (id, completed, attempt_count) \
                     VALUES (1, 0, 0)",
                    [],
                )?;
                tx.query_row(
                    "SELECT completed, attempt_count, last_cursor, last_run_at \
                     FROM migration_progress WHERE id = 1",
                    [],
                    |row| {
                        Ok(MigrationProgress {
                            completed: row.get::<_, i64>(0)? != 0,
                            attempt_count: row.get(1)?,
                            last_cursor: row.get(2)?,
                            last_run_at: row
                                .get::<_, Option<String>>(3)?
                                .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                                .map(|dt| dt.with_timezone(&Utc)),
                        })
                    },
                )
            })
            .await?;
        Ok(progress)
    }

    async fn bump_attempt(&self) -> Result<(), MigrationError> {
        self.coordinator
            .perform("bump_migration_attempt", |tx| {
                tx.execute(
                    "UPDATE migration_progress \
                     SET attempt_count = attempt_count + 1, last_run_at = ?1 WHERE id = 1",
                    params![Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn save_cursor(&self, cursor: i64) -> Result<(), MigrationError> {
        self.coordinator
            .perform("save_migration_cursor", move |tx| {
                tx.execute(
                    "UPDATE migration_progress SET last_cursor = ?1 WHERE id = 1",
                    params![cursor.to_string()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    async fn mark_completed(&self) -> Result<(), MigrationError> {
        self.coordinator
            .perform("mark_migration_completed", |tx| {
                tx.execute(
                    "UPDATE migration_progress SET completed = 1, last_run_at = ?1 WHERE id = 1",
                    params![Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    #[cfg(test)]
    async fn progress(&self) -> MigrationProgress {
        self.load_progress().await.unwrap()
    }
}

struct BatchResult {
    processed: usize,
    created: usize,
    updated: usize,
    last_rowid: i64,
}

/// Process one batch inside an open transaction. Idempotent: an
/// existing current record (matched by url, the stable external key)
/// only has its mutable flags updated; its content fields are never
/// overwritten. Absent records are copied wholesale under a new uuid.
fn migrate_batch(
    tx: &rusqlite::Transaction<'_>,
    cursor: i64,
    batch_size: usize,
) -> rusqlite::Result<BatchResult> {
    let mut stmt = tx.prepare(
        "SELECT id, link, headline, body_text, digest, published, read, starred, archived \
         FROM legacy_articles WHERE id > ?1 ORDER BY id LIMIT ?2",
    )?;
    let legacy: Vec<LegacyArticle> = stmt
        .query_map(params![cursor, batch_size as i64], |row| {
            Ok(LegacyArticle {
                id: row.get(0)?,
                link: row.get(1)?,
                headline: row.get(2)?,
                body_text: row.get(3)?,
                digest: row.get(4)?,
                published: row
                    .get::<_, Option<String>>(5)?
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(&s).ok())
                    .map(|dt| dt.with_timezone(&Utc)),
                read: row.get::<_, i64>(6)? != 0,
                starred: row.get::<_, i64>(7)? != 0,
                archived: row.get::<_, i64>(8)? != 0,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    drop(stmt);

    let mut result = BatchResult {
        processed: legacy.len(),
        created: 0,
        updated: 0,
        last_rowid: cursor,
    };

    for record in legacy {
        result.last_rowid = record.id;

        let existing: Option<i64> = tx
            .query_row(
                "SELECT id FROM articles WHERE url = ?1",
                params![record.link],
                |row| row.get(0),
            )
            .optional()?;

        match existing {
            Some(article_id) => {
                tx.execute(
                    "UPDATE articles SET is_read = ?1, is_bookmarked = ?2, is_archived = ?3 \
                     WHERE id = ?4",
                    params![record.read, record.starred, record.archived, article_id],
                )?;
                result.updated += 1;
            }
            None => {
                tx.execute(
                    "INSERT INTO articles \
                         (uuid, url, published_at, is_read, is_bookmarked, is_archived, \
                          title, body, summary, analysis_sections) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '[]')",
                    params![
                        Uuid::new_v4().to_string(),
                        record.link,
                        record.published.map(|dt| dt.to_rfc3339()),
                        record.read,
                        record.starred,
                        record.archived,
                        record.headline,
                        record.body_text,
                        record.digest,
                    ],
                )?;
                result.created += 1;
            }
        }
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use crate::store::LEGACY_SCHEMA;

    use super::*;

    async fn coordinator_with_legacy(count: usize) -> Arc<TransactionCoordinator> {
        let coordinator = Arc::new(TransactionCoordinator::open_in_memory().await.unwrap());
        coordinator
            .perform("seed_legacy", move |tx| {
                tx.execute_batch(LEGACY_SCHEMA)?;
                for i in 0..count {
                    tx.execute(
                        "INSERT INTO legacy_articles (link, headline, body_text, read, starred) \
                         VALUES (?1, ?2, ?3, ?4, 0)",
                        params![
                            format!("https://example.com/{}", i),
                            format!("legacy headline {}", i),
                            "legacy body",
                            (i % 2 == 0) as i64,
                        ],
                    )?;
                }
                Ok(())
            })
            .await
            .unwrap();
        coordinator
    }

    async fn current_count(coordinator: &TransactionCoordinator) -> i64 {
        coordinator
            .read(|conn| {
                conn.query_row("SELECT COUNT(*) FROM articles", [], |row| row.get(0))
            })
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn migrates_in_batches_and_marks_completed() {
        let coordinator = coordinator_with_legacy(25).await;
        let engine = MigrationEngine::new(Arc::clone(&coordinator), 10);

        let report = engine.run().await.unwrap();
        assert_eq!(report, MigrationReport::Migrated { created: 25, updated: 0 });
        assert_eq!(current_count(&coordinator).await, 25);

        let progress = engine.progress().await;
        assert!(progress.completed);
        assert_eq!(progress.attempt_count, 1);
    }

    #[tokio::test]
    async fn second_run_is_a_no_op() {
        let coordinator = coordinator_with_legacy(5).await;
        let engine = MigrationEngine::new(Arc::clone(&coordinator), 10);

        engine.run().await.unwrap();
        let report = engine.run().await.unwrap();
        assert_eq!(report, MigrationReport::AlreadyCompleted);
        assert_eq!(current_count(&coordinator).await, 5);
    }

    #[tokio::test]
    async fn rerunning_a_batch_is_idempotent() {
        let coordinator = coordinator_with_legacy(8).await;

        // Simulate a crash after the first batch committed but before
        // its cursor was persisted: run the same batch twice by hand.
        coordinator
            .perform("redo_batch", |tx| {
                migrate_batch(tx, 0, 8).map(|_| ())
            })
            .await
            .unwrap();
        coordinator
            .perform("redo_batch_again", |tx| {
                migrate_batch(tx, 0, 8).map(|_| ())
            })
            .await
            .unwrap();

        assert_eq!(current_count(&coordinator).await, 8, "redo duplicated records");
    }

    #[tokio::test]
    async fn existing_current_record_keeps_content_but_adopts_flags() {
        let coordinator = coordinator_with_legacy(0).await;
        coordinator
            .perform("seed_both", |tx| {
                tx.execute(
                    "INSERT INTO legacy_articles (link, headline, read, starred, archived) \
                     VALUES ('https://example.com/shared', 'old headline', 1, 1, 0)",
                    [],
                )?;
                tx.execute(
                    "INSERT INTO articles (uuid, url, title) \
                     VALUES (?1, 'https://example.com/shared', 'current title')",
                    params![Uuid::new_v4().to_string()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let engine = MigrationEngine::new(Arc::clone(&coordinator), 10);
        let report = engine.run().await.unwrap();
        assert_eq!(report, MigrationReport::Migrated { created: 0, updated: 1 });

        let (title, is_read, is_bookmarked): (String, bool, bool) = coordinator
            .read(|conn| {
                conn.query_row(
                    "SELECT title, is_read, is_bookmarked FROM articles \
                     WHERE url = 'https://example.com/shared'",
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
                )
            })
            .await
            .unwrap();
        assert_eq!(title, "current title", "content field was overwritten");
        assert!(is_read);
        assert!(is_bookmarked);
    }

    #[tokio::test]
    async fn resumes_from_the_persisted_cursor() {
        let coordinator = coordinator_with_legacy(6).await;

        // First run with a sabotaged cursor save path is hard to
        // arrange; instead persist a mid-way cursor directly and check
        // the engine picks up after it.
        let mid_rowid: i64 = coordinator
            .read(|conn| {
                conn.query_row(
                    "SELECT id FROM legacy_articles ORDER BY id LIMIT 1 OFFSET 2",
                    [],
                    |row| row.get(0),
                )
            })
            .await
            .unwrap();
        coordinator
            .perform("seed_progress", move |tx| {
                tx.execute(
                    "INSERT INTO migration_progress (id, completed, attempt_count, last_cursor) \
                     VALUES (1, 0, 1, ?1)",
                    params![mid_rowid.to_string()],
                )?;
                Ok(())
            })
            .await
            .unwrap();

        let engine = MigrationEngine::new(Arc::clone(&coordinator), 10);
        let report = engine.run().await.unwrap();
        assert_eq!(report, MigrationReport::Migrated { created: 3, updated: 0 });
        assert_eq!(current_count(&coordinator).await, 3);
    }

    #[tokio::test]
    async fn missing_legacy_area_completes_immediately() {
        let coordinator = Arc::new(TransactionCoordinator::open_in_memory().await.unwrap());
        let engine = MigrationEngine::new(Arc::clone(&coordinator), 10);

        let report = engine.run().await.unwrap();
        assert_eq!(report, MigrationReport::NothingToMigrate);
        assert!(engine.progress().await.completed);
    }

    #[tokio::test]
    async fn unreadable_legacy_source_force_completes() {
        let coordinator = Arc::new(TransactionCoordinator::open_in_memory().await.unwrap());
        // A legacy table with the wrong shape: reads will fail.
        coordinator
            .perform("bad_legacy", |tx| {
                tx.execute("CREATE TABLE legacy_articles (only_column TEXT)", [])?;
                Ok(())
            })
            .await
            .unwrap();

        let engine = MigrationEngine::new(Arc::clone(&coordinator), 10);
        let report = engine.run().await.unwrap();
        assert!(matches!(report, MigrationReport::ForcedComplete { .. }));
        assert!(engine.progress().await.completed);

        // And it stays completed on the next run.
        assert_eq!(engine.run().await.unwrap(), MigrationReport::AlreadyCompleted);
    }
}
