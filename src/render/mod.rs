use std::sync::Arc;
use std::time::Duration;

use crate::error::RenderError;
use crate::models::FormattedContent;

/// Black-box markdown-to-richtext renderer supplied by the host. Pure
/// and synchronous; returning None means the text could not be
/// rendered.
pub trait Renderer: Send + Sync + 'static {
    fn render(&self, text: &str, style: &str) -> Option<FormattedContent>;
}

/// Run the renderer on a blocking worker with a hard deadline. On
/// timeout the blocking call keeps running to completion somewhere in
/// the pool, but its result is discarded.
pub async fn render_with_timeout(
    renderer: Arc<dyn Renderer>,
    text: String,
    style: String,
    timeout: Duration,
) -> Result<FormattedContent, RenderError> {
    let task = tokio::task::spawn_blocking(move || renderer.render(&text, &style));

    match tokio::time::timeout(timeout, task).await {
        Ok(Ok(Some(content))) => Ok(content),
        Ok(Ok(None)) => Err(RenderError::Failed),
        Ok(Err(join_err)) => {
            tracing::debug!("renderer task failed: {}", join_err);
            Err(RenderError::Failed)
        }
        Err(_) => Err(RenderError::Timeout(timeout.as_millis() as u64)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Uppercase;

    impl Renderer for Uppercase {
        fn render(&self, text: &str, style: &str) -> Option<FormattedContent> {
            Some(FormattedContent {
                style: style.to_string(),
                text: text.to_uppercase(),
            })
        }
    }

    struct Stuck;

    impl Renderer for Stuck {
        fn render(&self, _text: &str, _style: &str) -> Option<FormattedContent> {
            std::thread::sleep(Duration::from_secs(5));
            None
        }
    }

    #[tokio::test]
    async fn renders_within_budget() {
        let content = render_with_timeout(
            Arc::new(Uppercase),
            "hello".to_string(),
            "article".to_string(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();
        assert_eq!(content.text, "HELLO");
        assert_eq!(content.style, "article");
    }

    #[tokio::test]
    async fn slow_renderer_times_out() {
        let result = render_with_timeout(
            Arc::new(Stuck),
            "hello".to_string(),
            "article".to_string(),
            Duration::from_millis(50),
        )
        .await;
        assert!(matches!(result, Err(RenderError::Timeout(_))));
    }
}
