use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::error::Result;
use crate::models::NewArticle;
use crate::repo::ContentRepository;

const USER_AGENT_STRING: &str = "steady-reader/1.0";
const MAX_CONCURRENT_DOWNLOADS: usize = 5;

/// Per-item progress callback for batch downloads.
pub type ProgressFn = dyn Fn(usize, usize) + Send + Sync;

/// The remote content store this core mirrors. Not part of the core
/// itself; injected by the host.
#[async_trait]
pub trait RemoteContentSource: Send + Sync + 'static {
    async fn fetch_changed_article_urls(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<String>>;

    async fn fetch_article_body(&self, url: &str) -> anyhow::Result<NewArticle>;
}

#[derive(Debug, Deserialize)]
struct ChangedResponse {
    urls: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ArticleDoc {
    url: String,
    topic: Option<String>,
    published_at: Option<DateTime<Utc>>,
    title: String,
    body: Option<String>,
    summary: Option<String>,
    #[serde(default)]
    analysis_sections: Vec<String>,
}

pub struct HttpContentSource {
    client: Client,
    base_url: Url,
}

impl HttpContentSource {
    pub fn new(base_url: Url) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT_STRING)
            .build()
            .expect("Failed to create HTTP client");
        Self { client, base_url }
    }
}

#[async_trait]
impl RemoteContentSource for HttpContentSource {
    async fn fetch_changed_article_urls(
        &self,
        since: Option<DateTime<Utc>>,
    ) -> anyhow::Result<Vec<String>> {
        let endpoint = self.base_url.join("articles/changed")?;
        let mut request = self.client.get(endpoint);
        if let Some(since) = since {
            request = request.query(&[("since", since.to_rfc3339())]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to fetch changed articles: HTTP {}",
                response.status()
            ));
        }

        let changed: ChangedResponse = response.json().await?;
        Ok(changed.urls)
    }

    async fn fetch_article_body(&self, url: &str) -> anyhow::Result<NewArticle> {
        let url = Url::parse(url)?;
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Failed to fetch article: HTTP {}",
                response.status()
            ));
        }

        let doc: ArticleDoc = response.json().await?;
        Ok(NewArticle {
            url: doc.url,
            topic: doc.topic,
            published_at: doc.published_at,
            title: doc.title,
            body: doc.body,
            summary: doc.summary,
            analysis_sections: doc.analysis_sections,
        })
    }
}

/// Mirrors changed remote articles into the local store. Downloads run
/// with bounded concurrency; writes go through the repository one at a
/// time so each upsert commits and invalidates before the next.
pub struct RemoteMirror {
    source: Arc<dyn RemoteContentSource>,
    repo: Arc<ContentRepository>,
}

impl RemoteMirror {
    pub fn new(source: Arc<dyn RemoteContentSource>, repo: Arc<ContentRepository>) -> Self {
        Self { source, repo }
    }

    /// Fetch everything changed since `since` and upsert it locally.
    /// Individual download failures are logged and skipped; the
    /// progress callback fires once per item, as its download
    /// completes.
    pub async fn refresh(
        &self,
        since: Option<DateTime<Utc>>,
        on_progress: Option<&ProgressFn>,
    ) -> Result<usize> {
        let urls = self
            .source
            .fetch_changed_article_urls(since)
            .await
            .map_err(crate::error::AppError::Other)?;
        let total = urls.len();

        let source = Arc::clone(&self.source);
        let completed = AtomicUsize::new(0);
        let bodies: Vec<Option<NewArticle>> = stream::iter(urls)
            .map(|url| {
                let source = Arc::clone(&source);
                let completed = &completed;
                async move {
                    let body = match source.fetch_article_body(&url).await {
                        Ok(article) => Some(article),
                        Err(e) => {
                            tracing::debug!("Failed to fetch {}: {}", url, e);
                            None
                        }
                    };
                    // Reported as each download finishes, while the
                    // rest of the batch is still in flight.
                    let current = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    if let Some(progress) = on_progress {
                        progress(current, total);
                    }
                    body
                }
            })
            .buffer_unordered(MAX_CONCURRENT_DOWNLOADS)
            .collect()
            .await;

        let mut mirrored = 0;
        for article in bodies.into_iter().flatten() {
            self.repo.upsert_article(article).await?;
            mirrored += 1;
        }

        tracing::debug!("mirrored {}/{} changed articles", mirrored, total);
        Ok(mirrored)
    }
}
