//! Page Content Cache - fetches page markup at most once per URL
//!
//! Design decisions:
//! 1. One `OnceCell` per URL: concurrent requests for the same URL wait on
//!    the same fetch instead of starting another
//! 2. Failures are not cached, the next request retries
//! 3. No eviction: a session visits a bounded number of pages
//! 4. The map guard is never held across an await

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::OnceCell;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error fetching {url}: {message}")]
    Network { url: String, message: String },

    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("Response for {url} is not text")]
    NotText { url: String },
}

/// Network collaborator: fetch the text of a page
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch_text(&self, url: &str) -> Result<String, FetchError>;
}

/// URL-keyed cache of page markup in front of a `PageFetcher`
#[derive(Clone)]
pub struct PageCache {
    fetcher: Arc<dyn PageFetcher>,

    /// Key: URL, Value: cell filled by the first successful fetch
    entries: Arc<DashMap<String, Arc<OnceCell<Arc<str>>>>>,
}

impl PageCache {
    pub fn new(fetcher: Arc<dyn PageFetcher>) -> Self {
        Self {
            fetcher,
            entries: Arc::new(DashMap::new()),
        }
    }

    /// Markup for `url`, fetched on first use
    pub async fn load(&self, url: &str) -> Result<Arc<str>, FetchError> {
        let cell = self
            .entries
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let text = cell
            .get_or_try_init(|| async {
                tracing::debug!("Fetching {}", url);
                let text = self.fetcher.fetch_text(url).await.map_err(|err| {
                    tracing::warn!("Failed to fetch {}: {}", url, err);
                    err
                })?;
                Ok::<_, FetchError>(Arc::<str>::from(text))
            })
            .await?;

        Ok(Arc::clone(text))
    }

    /// Already fetched successfully
    pub fn contains(&self, url: &str) -> bool {
        self.entries
            .get(url)
            .map(|cell| cell.initialized())
            .unwrap_or(false)
    }

    /// Number of URLs with cached markup
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("cached", &self.len())
            .finish()
    }
}
