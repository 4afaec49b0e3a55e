use thiserror::Error;

#[derive(Error, Debug)]
pub enum SpyError {
    #[error("invalid config: {0}")]
    Config(String),
    #[error("fetch failed for {url}: {reason}")]
    Fetch { url: String, reason: String },
    #[error("publish failed: {0}")]
    Publish(String),
}

/// Counters collected over one crawl, returned when the queue drains.
#[derive(Debug, Default, Clone)]
pub struct CrawlStats {
    pub pages_fetched: usize,
    pub pages_failed: usize,
    pub urls_seen: usize,
}
