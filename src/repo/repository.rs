use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::StoreError;
use crate::models::{
    Article, ArticleChange, ArticleFilter, ChangeKind, ChangeSet, FormattedContent, NewArticle,
    RenderedField,
};
use crate::render::{render_with_timeout, Renderer};
use crate::store::TransactionCoordinator;

use super::cache::QueryCache;

const ARTICLE_COLUMNS: &str = "id, uuid, url, topic, published_at, fetched_at, \
     is_read, is_bookmarked, is_archived, title, body, summary, analysis_sections";

/// Read-through article repository. Resolves queries through a
/// signature-keyed result cache, derives formatted content lazily, and
/// journals every mutation for the replication layer.
///
/// The cache mutex is a separate critical section from the store lock
/// and is never held across a store await, so cache lookups cannot
/// queue behind a long transaction.
pub struct ContentRepository {
    coordinator: Arc<TransactionCoordinator>,
    renderer: Arc<dyn Renderer>,
    render_timeout: Duration,
    cache: Mutex<QueryCache>,
}

impl ContentRepository {
    pub fn new(
        coordinator: Arc<TransactionCoordinator>,
        renderer: Arc<dyn Renderer>,
        render_timeout: Duration,
    ) -> Self {
        Self {
            coordinator,
            renderer,
            render_timeout,
            cache: Mutex::new(QueryCache::default()),
        }
    }

    // Queries

    /// Fetch articles matching `filter`, cache-first. Results are
    /// ordered by the filter's sort key with a uuid tie-break.
    pub async fn fetch_articles(&self, filter: &ArticleFilter) -> Result<Vec<Article>, StoreError> {
        let signature = filter.signature();

        let (cached_ids, generation) = {
            let cache = self.cache.lock().await;
            (
                cache.get(&signature).map(|entry| entry.ids.clone()),
                cache.generation(),
            )
        };

        if let Some(ids) = cached_ids {
            return self.fetch_by_ids(&ids).await;
        }

        let (where_sql, params_vec) = filter.where_clause();
        let order_by = filter.sort.order_by();
        let articles = self
            .coordinator
            .read(move |conn| {
                let sql = format!(
                    "SELECT {} FROM articles {} ORDER BY {}",
                    ARTICLE_COLUMNS, where_sql, order_by
                );
                let mut stmt = conn.prepare(&sql)?;
                let articles = stmt
                    .query_map(rusqlite::params_from_iter(params_vec), |row| {
                        Ok(article_from_row(row))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;

        let ids: Vec<i64> = articles.iter().map(|a| a.id).collect();
        let mut cache = self.cache.lock().await;
        // Dropped if an invalidation ran while the store read was in
        // flight: the snapshot may predate that mutation's commit.
        cache.insert(signature, ids, filter.topic.clone(), generation);

        Ok(articles)
    }

    /// Materialize a cached id list, preserving its order. Ids that
    /// vanished since caching are skipped; the next invalidation will
    /// refresh the entry.
    async fn fetch_by_ids(&self, ids: &[i64]) -> Result<Vec<Article>, StoreError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids = ids.to_vec();
        let articles = self
            .coordinator
            .read(move |conn| {
                let placeholders = ids
                    .iter()
                    .map(|_| "?")
                    .collect::<Vec<_>>()
                    .join(", ");
                let sql = format!(
                    "SELECT {} FROM articles WHERE id IN ({})",
                    ARTICLE_COLUMNS, placeholders
                );
                let mut stmt = conn.prepare(&sql)?;
                let mut by_id = std::collections::HashMap::new();
                let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                    Ok(article_from_row(row))
                })?;
                for article in rows {
                    let article = article?;
                    by_id.insert(article.id, article);
                }
                Ok(ids.iter().filter_map(|id| by_id.remove(id)).collect())
            })
            .await?;
        Ok(articles)
    }

    pub async fn get_article(&self, article_id: i64) -> Result<Option<Article>, StoreError> {
        let article = self
            .coordinator
            .read(move |conn| {
                let sql = format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS);
                let mut stmt = conn.prepare(&sql)?;
                let article = stmt
                    .query_row(params![article_id], |row| Ok(article_from_row(row)))
                    .optional()?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    // Formatted content

    /// Three-tier resolution: persisted blob, then a bounded renderer
    /// invocation with write-back, then an unstyled plain-text wrap.
    /// The plain tier is never persisted, so a failed render is retried
    /// on the next access.
    pub async fn formatted_content(
        &self,
        article_id: i64,
        field: RenderedField,
    ) -> Result<FormattedContent, StoreError> {
        let key = field.key();

        // Blob tier
        let key_for_read = key.clone();
        let blob = self
            .coordinator
            .read(move |conn| {
                let blob: Option<Vec<u8>> = conn
                    .query_row(
                        "SELECT blob FROM rendered_blobs WHERE article_id = ?1 AND field = ?2",
                        params![article_id, key_for_read],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(blob)
            })
            .await?;

        if let Some(blob) = blob {
            match FormattedContent::from_blob(&blob) {
                Ok(content) => return Ok(content),
                Err(e) => {
                    // An undecodable blob is treated as absent; it will
                    // be overwritten by the render tier below.
                    tracing::debug!("discarding corrupt blob for article {}: {}", article_id, e);
                }
            }
        }

        let article = self
            .get_article(article_id)
            .await?
            .ok_or(StoreError::Sqlite(rusqlite::Error::QueryReturnedNoRows))?;
        let raw = match field.raw_text(&article) {
            Some(raw) => raw.to_string(),
            None => return Ok(FormattedContent::plain("")),
        };

        // Render tier
        match render_with_timeout(
            Arc::clone(&self.renderer),
            raw.clone(),
            field.style().to_string(),
            self.render_timeout,
        )
        .await
        {
            Ok(content) => {
                // Write the blob back before returning: derivation cost
                // dominates storage cost, so even a transient read pays
                // for the next caller.
                let blob = content.to_blob().map_err(|e| {
                    StoreError::Connection(format!("blob encode failed: {}", e))
                })?;
                self.coordinator
                    .perform("persist_rendered_blob", move |tx| {
                        tx.execute(
                            "INSERT INTO rendered_blobs (article_id, field, blob) \
                             VALUES (?1, ?2, ?3) \
                             ON CONFLICT(article_id, field) DO UPDATE SET \
                                 blob = excluded.blob, \
                                 rendered_at = datetime('now')",
                            params![article_id, key, blob],
                        )?;
                        Ok(())
                    })
                    .await?;
                Ok(content)
            }
            Err(e) => {
                // Plain-text tier: degrade silently, retry next access.
                tracing::debug!("render failed for article {} ({}): {}", article_id, key, e);
                Ok(FormattedContent::plain(raw))
            }
        }
    }

    /// Drop all derived blobs for an article. Hosts call this after
    /// editing raw text, since blob staleness is presence-only.
    pub async fn clear_rendered(&self, article_id: i64) -> Result<(), StoreError> {
        self.coordinator
            .perform("clear_rendered", move |tx| {
                tx.execute(
                    "DELETE FROM rendered_blobs WHERE article_id = ?1",
                    params![article_id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    // Mutations. Each commits first, then invalidates the cache, then
    // leaves a journal row for the replication layer (written in the
    // same transaction as the flag).

    pub async fn upsert_article(&self, article: NewArticle) -> Result<i64, StoreError> {
        let topic = article.topic.clone();
        let uuid = Uuid::new_v4();
        let id = self
            .coordinator
            .perform("upsert_article", move |tx| {
                let existing: Option<i64> = tx
                    .query_row(
                        "SELECT id FROM articles WHERE url = ?1",
                        params![article.url],
                        |row| row.get(0),
                    )
                    .optional()?;
                tx.execute(
                    "INSERT INTO articles \
                         (uuid, url, topic, published_at, title, body, summary, analysis_sections) \
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8) \
                     ON CONFLICT(url) DO UPDATE SET \
                         topic = excluded.topic, \
                         published_at = excluded.published_at, \
                         title = excluded.title, \
                         body = excluded.body, \
                         summary = excluded.summary, \
                         analysis_sections = excluded.analysis_sections",
                    params![
                        uuid.to_string(),
                        article.url,
                        article.topic,
                        article.published_at.map(|dt| dt.to_rfc3339()),
                        article.title,
                        article.body,
                        article.summary,
                        serde_json::to_string(&article.analysis_sections)
                            .unwrap_or_else(|_| "[]".to_string()),
                    ],
                )?;
                match existing {
                    Some(id) => {
                        // The raw text may have changed; derived blobs
                        // for it are stale now.
                        tx.execute(
                            "DELETE FROM rendered_blobs WHERE article_id = ?1",
                            params![id],
                        )?;
                        Ok(id)
                    }
                    None => tx.query_row(
                        "SELECT id FROM articles WHERE url = ?1",
                        params![article.url],
                        |row| row.get(0),
                    ),
                }
            })
            .await?;
        self.invalidate_topic(topic.as_deref()).await;
        Ok(id)
    }

    pub async fn mark_read(&self, article_id: i64, is_read: bool) -> Result<(), StoreError> {
        self.set_flag(article_id, "is_read", ChangeKind::Read, is_read)
            .await
    }

    pub async fn set_bookmarked(&self, article_id: i64, bookmarked: bool) -> Result<(), StoreError> {
        self.set_flag(article_id, "is_bookmarked", ChangeKind::Bookmarked, bookmarked)
            .await
    }

    pub async fn set_archived(&self, article_id: i64, archived: bool) -> Result<(), StoreError> {
        self.set_flag(article_id, "is_archived", ChangeKind::Archived, archived)
            .await
    }

    async fn set_flag(
        &self,
        article_id: i64,
        column: &'static str,
        kind: ChangeKind,
        value: bool,
    ) -> Result<(), StoreError> {
        let topic = self
            .coordinator
            .perform("set_flag", move |tx| {
                let (uuid, topic): (String, Option<String>) = tx.query_row(
                    "SELECT uuid, topic FROM articles WHERE id = ?1",
                    params![article_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                tx.execute(
                    &format!("UPDATE articles SET {} = ?1 WHERE id = ?2", column),
                    params![value, article_id],
                )?;
                tx.execute(
                    "INSERT INTO pending_changes (article_uuid, kind, value) VALUES (?1, ?2, ?3)",
                    params![uuid, kind.as_str(), value],
                )?;
                Ok(topic)
            })
            .await?;
        self.invalidate_topic(topic.as_deref()).await;
        Ok(())
    }

    pub async fn delete_article(&self, article_id: i64) -> Result<(), StoreError> {
        let topic = self
            .coordinator
            .perform("delete_article", move |tx| {
                let (uuid, topic): (String, Option<String>) = tx.query_row(
                    "SELECT uuid, topic FROM articles WHERE id = ?1",
                    params![article_id],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )?;
                // Blobs and topic joins cascade with the row.
                tx.execute("DELETE FROM articles WHERE id = ?1", params![article_id])?;
                tx.execute(
                    "INSERT INTO pending_changes (article_uuid, kind, value) VALUES (?1, ?2, 1)",
                    params![uuid, ChangeKind::Deleted.as_str()],
                )?;
                Ok(topic)
            })
            .await?;
        self.invalidate_topic(topic.as_deref()).await;
        Ok(())
    }

    // Topic tags

    pub async fn tag_article(&self, article_id: i64, topic: &str) -> Result<(), StoreError> {
        let topic = topic.to_string();
        self.coordinator
            .perform("tag_article", move |tx| {
                tx.execute(
                    "INSERT OR IGNORE INTO topics (name) VALUES (?1)",
                    params![topic],
                )?;
                tx.execute(
                    "INSERT OR IGNORE INTO article_topics (article_id, topic_id) \
                     SELECT ?1, id FROM topics WHERE name = ?2",
                    params![article_id, topic],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Remove a topic tag. Join rows go with it; articles never do.
    pub async fn delete_topic(&self, topic: &str) -> Result<(), StoreError> {
        let name = topic.to_string();
        self.coordinator
            .perform("delete_topic", move |tx| {
                tx.execute("DELETE FROM topics WHERE name = ?1", params![name])?;
                Ok(())
            })
            .await?;
        self.invalidate_topic(Some(topic)).await;
        Ok(())
    }

    // Replication plumbing

    /// Drain the mutation journal: returns the journal row ids together
    /// with the change set to push. Rows stay queued until
    /// [`clear_pending`](Self::clear_pending) confirms the push.
    pub async fn take_pending(&self, limit: usize) -> Result<(Vec<i64>, ChangeSet), StoreError> {
        let rows = self
            .coordinator
            .read(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, article_uuid, kind, value, queued_at \
                     FROM pending_changes ORDER BY id LIMIT ?1",
                )?;
                let rows = stmt
                    .query_map(params![limit as i64], |row| {
                        let id: i64 = row.get(0)?;
                        let uuid: String = row.get(1)?;
                        let kind: String = row.get(2)?;
                        let value: bool = row.get(3)?;
                        let queued_at: String = row.get(4)?;
                        Ok((id, uuid, kind, value, queued_at))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut ids = Vec::with_capacity(rows.len());
        let mut changes = Vec::with_capacity(rows.len());
        for (id, uuid, kind, value, queued_at) in rows {
            let (Ok(uuid), Some(kind)) = (Uuid::parse_str(&uuid), ChangeKind::parse(&kind)) else {
                tracing::warn!("dropping unreadable pending change {}", id);
                ids.push(id);
                continue;
            };
            ids.push(id);
            changes.push(ArticleChange {
                uuid,
                kind,
                value,
                changed_at: parse_datetime(&queued_at).unwrap_or_else(Utc::now),
            });
        }
        Ok((ids, ChangeSet { changes }))
    }

    pub async fn clear_pending(&self, ids: Vec<i64>) -> Result<(), StoreError> {
        if ids.is_empty() {
            return Ok(());
        }
        self.coordinator
            .perform("clear_pending", move |tx| {
                for id in &ids {
                    tx.execute("DELETE FROM pending_changes WHERE id = ?1", params![id])?;
                }
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Apply change sets pulled from the replica in one transaction.
    /// Remote changes are not re-journaled, so a pull never echoes back
    /// as a push.
    pub async fn apply_changes(&self, change_set: ChangeSet) -> Result<usize, StoreError> {
        if change_set.is_empty() {
            return Ok(0);
        }
        let applied = self
            .coordinator
            .perform("apply_changes", move |tx| {
                let mut applied = 0usize;
                for change in &change_set.changes {
                    let uuid = change.uuid.to_string();
                    let n = match change.kind {
                        ChangeKind::Read => tx.execute(
                            "UPDATE articles SET is_read = ?1 WHERE uuid = ?2",
                            params![change.value, uuid],
                        )?,
                        ChangeKind::Bookmarked => tx.execute(
                            "UPDATE articles SET is_bookmarked = ?1 WHERE uuid = ?2",
                            params![change.value, uuid],
                        )?,
                        ChangeKind::Archived => tx.execute(
                            "UPDATE articles SET is_archived = ?1 WHERE uuid = ?2",
                            params![change.value, uuid],
                        )?,
                        ChangeKind::Deleted => tx.execute(
                            "DELETE FROM articles WHERE uuid = ?1",
                            params![uuid],
                        )?,
                    };
                    applied += n;
                }
                Ok(applied)
            })
            .await?;
        self.invalidate_all().await;
        Ok(applied)
    }

    // Cache invalidation

    pub async fn invalidate_topic(&self, topic: Option<&str>) {
        let mut cache = self.cache.lock().await;
        cache.invalidate_topic(topic);
    }

    pub async fn invalidate_all(&self) {
        let mut cache = self.cache.lock().await;
        cache.invalidate_all();
    }

    #[cfg(test)]
    pub async fn cached_entry_count(&self) -> usize {
        self.cache.lock().await.len()
    }
}

fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

fn article_from_row(row: &Row) -> Article {
    Article {
        id: row.get(0).unwrap(),
        uuid: row
            .get::<_, String>(1)
            .ok()
            .and_then(|s| Uuid::parse_str(&s).ok())
            .unwrap_or_else(Uuid::nil),
        url: row.get(2).unwrap(),
        topic: row.get(3).unwrap(),
        published_at: row
            .get::<_, Option<String>>(4)
            .unwrap()
            .and_then(|s| parse_datetime(&s)),
        fetched_at: row
            .get::<_, String>(5)
            .ok()
            .and_then(|s| parse_datetime(&s))
            .unwrap_or_else(Utc::now),
        is_read: row.get::<_, i64>(6).unwrap() != 0,
        is_bookmarked: row.get::<_, i64>(7).unwrap() != 0,
        is_archived: row.get::<_, i64>(8).unwrap() != 0,
        title: row.get(9).unwrap(),
        body: row.get(10).unwrap(),
        summary: row.get(11).unwrap(),
        analysis_sections: row
            .get::<_, String>(12)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default(),
    }
}
