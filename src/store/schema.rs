pub const SCHEMA: &str = r#"
-- articles table (current schema)
CREATE TABLE IF NOT EXISTS articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    uuid TEXT NOT NULL UNIQUE,
    url TEXT NOT NULL UNIQUE,
    topic TEXT,
    published_at TEXT,
    fetched_at TEXT NOT NULL DEFAULT (datetime('now')),
    is_read INTEGER NOT NULL DEFAULT 0,
    is_bookmarked INTEGER NOT NULL DEFAULT 0,
    is_archived INTEGER NOT NULL DEFAULT 0,
    title TEXT NOT NULL,
    body TEXT,
    summary TEXT,
    analysis_sections TEXT NOT NULL DEFAULT '[]'
);

CREATE INDEX IF NOT EXISTS idx_articles_url ON articles(url);
CREATE INDEX IF NOT EXISTS idx_articles_topic ON articles(topic);
CREATE INDEX IF NOT EXISTS idx_articles_published_at ON articles(published_at DESC);
CREATE INDEX IF NOT EXISTS idx_articles_is_read ON articles(is_read);

-- derived formatted-content blobs, one row per renderable field
CREATE TABLE IF NOT EXISTS rendered_blobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    field TEXT NOT NULL,
    blob BLOB NOT NULL,
    rendered_at TEXT NOT NULL DEFAULT (datetime('now')),
    UNIQUE(article_id, field)
);

CREATE INDEX IF NOT EXISTS idx_rendered_blobs_article ON rendered_blobs(article_id);

-- topic tags; deleting a topic must never delete articles
CREATE TABLE IF NOT EXISTS topics (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS article_topics (
    article_id INTEGER NOT NULL REFERENCES articles(id) ON DELETE CASCADE,
    topic_id INTEGER NOT NULL REFERENCES topics(id) ON DELETE CASCADE,
    UNIQUE(article_id, topic_id)
);

-- mutation journal drained by the replication layer
CREATE TABLE IF NOT EXISTS pending_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    article_uuid TEXT NOT NULL,
    kind TEXT NOT NULL,
    value INTEGER NOT NULL,
    queued_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- single-row migration bookkeeping
CREATE TABLE IF NOT EXISTS migration_progress (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    completed INTEGER NOT NULL DEFAULT 0,
    attempt_count INTEGER NOT NULL DEFAULT 0,
    last_cursor TEXT,
    last_run_at TEXT
);
"#;

/// Legacy-schema fixture used by migration tests. The real legacy table
/// is created by the previous application version, never by this crate.
#[cfg(test)]
pub const LEGACY_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS legacy_articles (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    link TEXT NOT NULL,
    headline TEXT NOT NULL,
    body_text TEXT,
    digest TEXT,
    published TEXT,
    read INTEGER NOT NULL DEFAULT 0,
    starred INTEGER NOT NULL DEFAULT 0,
    archived INTEGER NOT NULL DEFAULT 0
);
"#;
