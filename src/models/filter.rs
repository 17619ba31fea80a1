/// Sort order for article queries. The uuid tie-break keeps results
/// stable when timestamps collide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    #[default]
    PublishedDesc,
    PublishedAsc,
    FetchedDesc,
    TitleAsc,
}

impl SortKey {
    pub fn order_by(&self) -> &'static str {
        match self {
            SortKey::PublishedDesc => "published_at DESC NULLS LAST, uuid ASC",
            SortKey::PublishedAsc => "published_at ASC NULLS LAST, uuid ASC",
            SortKey::FetchedDesc => "fetched_at DESC, uuid ASC",
            SortKey::TitleAsc => "title ASC, uuid ASC",
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            SortKey::PublishedDesc => "published_desc",
            SortKey::PublishedAsc => "published_asc",
            SortKey::FetchedDesc => "fetched_desc",
            SortKey::TitleAsc => "title_asc",
        }
    }
}

/// Query shape for article fetches. Also the cache key, via
/// [`ArticleFilter::signature`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArticleFilter {
    pub topic: Option<String>,
    pub read: Option<bool>,
    pub bookmarked: Option<bool>,
    pub archived: Option<bool>,
    pub sort: SortKey,
}

impl ArticleFilter {
    pub fn unread() -> Self {
        Self {
            read: Some(false),
            ..Self::default()
        }
    }

    pub fn bookmarked() -> Self {
        Self {
            bookmarked: Some(true),
            ..Self::default()
        }
    }

    pub fn topic(topic: impl Into<String>) -> Self {
        Self {
            topic: Some(topic.into()),
            ..Self::default()
        }
    }

    /// Canonical cache-key signature. Two filters with the same
    /// signature return the same result set.
    pub fn signature(&self) -> String {
        fn flag(value: Option<bool>) -> &'static str {
            match value {
                Some(true) => "1",
                Some(false) => "0",
                None => "*",
            }
        }
        format!(
            "topic={}|read={}|bookmarked={}|archived={}|sort={}",
            self.topic.as_deref().unwrap_or("*"),
            flag(self.read),
            flag(self.bookmarked),
            flag(self.archived),
            self.sort.tag(),
        )
    }

    /// WHERE clause plus positional string params. Boolean flags are
    /// inlined as literals; only the topic needs a bound parameter.
    pub fn where_clause(&self) -> (String, Vec<String>) {
        let mut clauses = Vec::new();
        let mut params = Vec::new();

        if let Some(topic) = &self.topic {
            params.push(topic.clone());
            clauses.push(format!("topic = ?{}", params.len()));
        }
        if let Some(read) = self.read {
            clauses.push(format!("is_read = {}", read as i64));
        }
        if let Some(bookmarked) = self.bookmarked {
            clauses.push(format!("is_bookmarked = {}", bookmarked as i64));
        }
        if let Some(archived) = self.archived {
            clauses.push(format!("is_archived = {}", archived as i64));
        }

        if clauses.is_empty() {
            (String::new(), params)
        } else {
            (format!("WHERE {}", clauses.join(" AND ")), params)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_distinguishes_read_state() {
        let unread = ArticleFilter::unread();
        let any = ArticleFilter::default();
        assert_ne!(unread.signature(), any.signature());
    }

    #[test]
    fn equal_filters_share_a_signature() {
        let a = ArticleFilter::topic("rust");
        let b = ArticleFilter::topic("rust");
        assert_eq!(a.signature(), b.signature());
    }

    #[test]
    fn where_clause_binds_topic_only() {
        let filter = ArticleFilter {
            topic: Some("science".to_string()),
            read: Some(false),
            ..ArticleFilter::default()
        };
        let (sql, params) = filter.where_clause();
        assert!(sql.contains("topic = ?1"));
        assert!(sql.contains("is_read = 0"));
        assert_eq!(params, vec!["science".to_string()]);
    }
}
