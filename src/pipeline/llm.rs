//! The classification client: one page image in, one result out.
//!
//! The priming history is built once and shared. [`ClassificationClient::query_for`]
//! encodes a page into the query turn; [`ClassificationClient::classify`]
//! replays the history, appends that turn and decodes the reply via
//! [`super::parse`].
//!
//! ## Retry Strategy
//!
//! Each backend call is bounded by `api_timeout_secs`. Timeouts and request
//! failures are retried with exponential backoff
//! (`retry_backoff_ms * 2^(attempt-1)`): with a 500 ms base and 3 retries the
//! waits are 500 ms → 1 s → 2 s. The wait saturates instead of overflowing
//! for very large retry counts. Authentication failures are not retried.

use super::encode::encode_image;
use super::parse::{parse_reply, BackendReply};
use super::render::PageImage;
use crate::backend::{Turn, VisionBackend};
use crate::config::RunConfig;
use crate::error::{BackendError, RenderError};
use crate::output::ClassificationResult;
use crate::prompts::CLASSIFY_INSTRUCTION;
use std::sync::Arc;
use std::time::Instant;
use tokio::time::{sleep, timeout, Duration};
use tracing::{debug, warn};

pub struct ClassificationClient {
    backend: Arc<dyn VisionBackend>,
    history: Arc<Vec<Turn>>,
    max_retries: u32,
    retry_backoff_ms: u64,
    api_timeout_secs: u64,
    max_edge: u32,
}

impl ClassificationClient {
    pub fn new(backend: Arc<dyn VisionBackend>, history: Vec<Turn>, config: &RunConfig) -> Self {
        Self {
            backend,
            history: Arc::new(history),
            max_retries: config.max_retries,
            retry_backoff_ms: config.retry_backoff_ms,
            api_timeout_secs: config.api_timeout_secs,
            max_edge: config.max_rendered_pixels,
        }
    }

    /// Number of priming turns replayed before each page.
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Encode `page` into the turn sent after the priming history.
    pub fn query_for(&self, page: &PageImage) -> Result<Turn, RenderError> {
        let image = encode_image(&page.image, self.max_edge).map_err(|e| {
            RenderError::EncodeFailed {
                path: page.source.path.clone(),
                page: page.page_num,
                detail: e.to_string(),
            }
        })?;
        Ok(Turn::user(CLASSIFY_INSTRUCTION, image))
    }

    /// Classify one page, sending `query` (see [`Self::query_for`]).
    ///
    /// A malformed reply is never an error; it becomes the UNKNOWN sentinel.
    /// `Err` means the backend itself could not be reached (after retries)
    /// or refused the credentials.
    pub async fn classify(
        &self,
        page: &PageImage,
        query: &Turn,
    ) -> Result<ClassificationResult, BackendError> {
        let reply = self.converse_with_retry(&page.source.label, page.page_num, query).await?;

        match parse_reply(&reply) {
            BackendReply::Parsed(result) => Ok(result),
            unparseable => {
                warn!(
                    "{} page {}: unparseable reply, recording UNKNOWN",
                    page.source.label, page.page_num
                );
                Ok(unparseable.into_result())
            }
        }
    }

    async fn converse_with_retry(
        &self,
        label: &str,
        page_num: usize,
        query: &Turn,
    ) -> Result<String, BackendError> {
        let start = Instant::now();
        let mut last_err = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let backoff = backoff_ms(self.retry_backoff_ms, attempt);
                warn!(
                    "{} page {}: retry {}/{} after {}ms",
                    label, page_num, attempt, self.max_retries, backoff
                );
                sleep(Duration::from_millis(backoff)).await;
            }

            let call = self.backend.converse(&self.history, query);
            let outcome = match timeout(Duration::from_secs(self.api_timeout_secs), call).await {
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout {
                    secs: self.api_timeout_secs,
                }),
            };

            match outcome {
                Ok(reply) => {
                    debug!(
                        "{} page {}: {} chars in {:?}",
                        label,
                        page_num,
                        reply.len(),
                        start.elapsed()
                    );
                    return Ok(reply);
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    warn!("{} page {}: attempt {} failed: {}", label, page_num, attempt + 1, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| BackendError::Request("no attempt was made".to_string())))
    }
}

/// Wait before retry number `attempt` (1-based).
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Category;
    use crate::pipeline::input::{DocumentKind, RawDocument};
    use async_trait::async_trait;
    use edgequake_llm::ImageData;
    use image::{DynamicImage, Rgb, RgbImage};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays scripted outcomes, then repeats the last one.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        calls: AtomicUsize,
        seen_history: AtomicUsize,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                seen_history: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VisionBackend for Scripted {
        async fn converse(&self, history: &[Turn], query: &Turn) -> Result<String, BackendError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen_history.store(history.len(), Ordering::SeqCst);
            assert!(query.image.is_some());
            let mut replies = self.replies.lock().unwrap();
            if replies.len() > 1 {
                replies.pop_front().unwrap()
            } else {
                replies.front().cloned().unwrap()
            }
        }
    }

    fn page() -> PageImage {
        PageImage {
            image: DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 8, Rgb([1, 2, 3]))),
            source: RawDocument {
                path: "doc.png".into(),
                kind: DocumentKind::Image,
                label: "doc.png".to_string(),
            },
            page_num: 1,
            saved_path: None,
        }
    }

    fn query() -> Turn {
        Turn::user(CLASSIFY_INSTRUCTION, ImageData::new("AAAA", "image/png"))
    }

    fn client(backend: Arc<Scripted>, history: Vec<Turn>) -> ClassificationClient {
        let config = RunConfig::builder()
            .vision_backend(backend.clone())
            .max_retries(2)
            .retry_backoff_ms(1)
            .build()
            .unwrap();
        ClassificationClient::new(backend, history, &config)
    }

    #[tokio::test]
    async fn malformed_reply_is_unknown_not_error() {
        let backend = Scripted::new(vec![Ok("This is not JSON".to_string())]);
        let result = client(backend, vec![]).classify(&page(), &query()).await.unwrap();
        assert_eq!(result.category, Category::Unknown);
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn fenced_reply_is_parsed() {
        let backend = Scripted::new(vec![Ok(
            "```json\n{\"category\": \"INVOICE\", \"confidence\": 0.95, \"reasoning\": \"Looks like an invoice\"}\n```"
                .to_string(),
        )]);
        let result = client(backend, vec![]).classify(&page(), &query()).await.unwrap();
        assert_eq!(result.category, Category::Invoice);
        assert_eq!(result.confidence, 0.95);
    }

    #[tokio::test]
    async fn history_is_replayed_on_every_call() {
        let backend = Scripted::new(vec![Ok(r#"{"category":"ID","confidence":0.9,"reasoning":"x"}"#.to_string())]);
        let history = vec![Turn::assistant("a"), Turn::assistant("b")];
        let client = client(backend.clone(), history);
        client.classify(&page(), &query()).await.unwrap();
        client.classify(&page(), &query()).await.unwrap();
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
        assert_eq!(backend.seen_history.load(Ordering::SeqCst), 2);
        assert_eq!(client.history_len(), 2);
    }

    #[test]
    fn transient_failures_are_retried() {
        let backend = Scripted::new(vec![
            Err(BackendError::Request("503".to_string())),
            Err(BackendError::Timeout { secs: 1 }),
            Ok(r#"{"category":"TAX","confidence":0.8,"reasoning":"return"}"#.to_string()),
        ]);
        let client = client(backend.clone(), vec![]);
        let result = tokio_test::block_on(client.classify(&page(), &query())).unwrap();
        assert_eq!(result.category, Category::Tax);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let backend = Scripted::new(vec![Err(BackendError::Request("connection reset".to_string()))]);
        let err = client(backend.clone(), vec![]).classify(&page(), &query()).await.unwrap_err();
        assert!(matches!(err, BackendError::Request(_)));
        // One initial attempt plus two retries.
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn auth_failure_is_not_retried() {
        let backend = Scripted::new(vec![Err(BackendError::Auth("401 unauthorized".to_string()))]);
        let err = client(backend.clone(), vec![]).classify(&page(), &query()).await.unwrap_err();
        assert!(matches!(err, BackendError::Auth(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn query_carries_the_encoded_page() {
        let backend = Scripted::new(vec![Ok(String::new())]);
        let query = client(backend, vec![]).query_for(&page()).unwrap();
        assert_eq!(query.text, CLASSIFY_INSTRUCTION);
        assert_eq!(query.image.map(|i| i.mime_type), Some("image/png".to_string()));
    }

    #[test]
    fn unencodable_page_is_a_render_error() {
        let backend = Scripted::new(vec![Ok(String::new())]);
        let mut empty = page();
        empty.image = DynamicImage::ImageRgb8(RgbImage::new(0, 0));
        let err = client(backend.clone(), vec![]).query_for(&empty).unwrap_err();
        assert!(matches!(err, RenderError::EncodeFailed { page: 1, .. }), "got {err:?}");
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_doubles_then_saturates() {
        assert_eq!(backoff_ms(500, 1), 500);
        assert_eq!(backoff_ms(500, 2), 1000);
        assert_eq!(backoff_ms(500, 3), 2000);
        assert_eq!(backoff_ms(500, 60), u64::MAX);
        assert_eq!(backoff_ms(1, 200), u64::MAX);
    }
}
