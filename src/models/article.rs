use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A mirrored article in the current schema. Owned by the persistent
/// store; mutated only inside coordinator transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: i64,
    pub uuid: Uuid,
    /// Stable external key. Migration matches legacy records on this,
    /// never on uuid.
    pub url: String,
    pub topic: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub is_read: bool,
    pub is_bookmarked: bool,
    pub is_archived: bool,
    pub title: String,
    pub body: Option<String>,
    pub summary: Option<String>,
    /// Auxiliary analysis sections, stored as a JSON array column.
    pub analysis_sections: Vec<String>,
}

/// An article as delivered by the remote content source, before it has
/// a local identity.
#[derive(Debug, Clone)]
pub struct NewArticle {
    pub url: String,
    pub topic: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub title: String,
    pub body: Option<String>,
    pub summary: Option<String>,
    pub analysis_sections: Vec<String>,
}

/// Pre-migration record shape. Read-only once migration starts.
#[derive(Debug, Clone)]
pub struct LegacyArticle {
    pub id: i64,
    pub link: String,
    pub headline: String,
    pub body_text: Option<String>,
    pub digest: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub read: bool,
    pub starred: bool,
    pub archived: bool,
}

/// The renderable fields of an article. Each may carry a derived blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RenderedField {
    Title,
    Body,
    Summary,
    Analysis(usize),
}

impl RenderedField {
    /// Column key used in the rendered_blobs table.
    pub fn key(&self) -> String {
        match self {
            RenderedField::Title => "title".to_string(),
            RenderedField::Body => "body".to_string(),
            RenderedField::Summary => "summary".to_string(),
            RenderedField::Analysis(i) => format!("analysis.{}", i),
        }
    }

    /// The raw text this field renders from, if the article has any.
    pub fn raw_text<'a>(&self, article: &'a Article) -> Option<&'a str> {
        match self {
            RenderedField::Title => Some(article.title.as_str()),
            RenderedField::Body => article.body.as_deref(),
            RenderedField::Summary => article.summary.as_deref(),
            RenderedField::Analysis(i) => {
                article.analysis_sections.get(*i).map(|s| s.as_str())
            }
        }
    }

    /// Render style passed to the renderer for this field.
    pub fn style(&self) -> &'static str {
        match self {
            RenderedField::Title => "headline",
            RenderedField::Body => "article",
            RenderedField::Summary => "digest",
            RenderedField::Analysis(_) => "analysis",
        }
    }
}

/// Pre-rendered representation of a text field, persisted as a blob so
/// the renderer is not invoked twice for the same text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedContent {
    pub style: String,
    pub text: String,
}

impl FormattedContent {
    /// Unstyled fallback used when rendering fails or times out.
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            style: "plain".to_string(),
            text: text.into(),
        }
    }

    pub fn is_plain(&self) -> bool {
        self.style == "plain"
    }

    pub fn to_blob(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn from_blob(blob: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(blob)
    }
}
