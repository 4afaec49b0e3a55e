use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

use anyhow::Context;
use futures::StreamExt;
use reqwest::Url;
use scraper::{Html, Selector};
use tokio::{sync::mpsc, time::sleep};

use crate::{
    config::ScraperConfig,
    fetcher::PageFetcher,
    output::{BatchSink, OutputAggregator},
    text::{direct_text, TextFilter},
    types::{CrawlStats, SpyError},
    utils::jitter,
};

/// Link-acceptance predicate derived from the seed url. A candidate is in
/// scope when its host contains the seed domain, the site name, or one of the
/// extra allowed domains as a substring.
pub struct CrawlScope {
    site_name: String,
    site_domain: String,
    extra_domains: Vec<String>,
}

impl CrawlScope {
    pub fn new(seed: &Url, site_name: &str, extra_domains: &[String]) -> Self {
        CrawlScope {
            site_name: site_name.to_lowercase(),
            site_domain: seed.host_str().unwrap_or_default().to_lowercase(),
            extra_domains: extra_domains.to_vec(),
        }
    }

    fn accepts(&self, link: &Url) -> bool {
        let host = match link.host_str() {
            Some(h) => h.to_lowercase(),
            None => return false,
        };

        if !self.site_domain.is_empty() && host.contains(&self.site_domain) {
            return true;
        }
        if !self.site_name.is_empty() && host.contains(&self.site_name) {
            return true;
        }
        self.extra_domains.iter().any(|d| host.contains(d))
    }
}

/// Dedup and scoping for one crawl. Check-then-insert holds the lock so that
/// of two concurrent callers with the same url exactly one gets an accept.
pub struct CrawlState {
    visited: Mutex<HashSet<String>>,
    scope: CrawlScope,
}

impl CrawlState {
    pub fn new(scope: CrawlScope) -> Self {
        CrawlState {
            visited: Mutex::new(HashSet::new()),
            scope,
        }
    }

    /// True when the link is in scope and seen for the first time; records it
    /// as visited in that case. Out-of-scope links are not recorded.
    pub fn accept_link(&self, link: &Url) -> bool {
        let mut visited = self.visited.lock().unwrap();

        if visited.contains(link.as_str()) {
            return false;
        }
        if !self.scope.accepts(link) {
            return false;
        }

        visited.insert(link.as_str().to_string());
        true
    }

    pub fn mark_visited(&self, url: &Url) {
        self.visited.lock().unwrap().insert(url.as_str().to_string());
    }

    pub fn visited_count(&self) -> usize {
        self.visited.lock().unwrap().len()
    }
}

/// How a crawl walks its pending queue.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CrawlMode {
    /// one fetch at a time, in queue order
    Sequential,
    /// up to `limit` fetches in flight, each preceded by a jittered delay
    Concurrent { limit: usize, delay: Duration },
}

impl CrawlMode {
    pub fn from_config(cfg: &ScraperConfig) -> Self {
        if cfg.is_async {
            CrawlMode::Concurrent {
                limit: cfg.async_request_limit.max(1),
                delay: Duration::from_secs(cfg.async_delay_secs),
            }
        } else {
            CrawlMode::Sequential
        }
    }
}

/// One site traversal: fetch a page, harvest direct text of the configured
/// tags into the aggregator, discover anchors, enqueue accepted links one
/// level deeper. Every `visit` owns a fresh visited set, queue and
/// aggregator; whatever an earlier crawl left unflushed is discarded when a
/// new one begins.
pub struct Crawler {
    config: Arc<ScraperConfig>,
    fetcher: PageFetcher,
    filter: TextFilter,
    tag_selector: Selector,
    link_selector: Selector,
    sink: Arc<dyn BatchSink>,
    output: Mutex<Arc<OutputAggregator>>,
}

impl Crawler {
    pub fn new(config: Arc<ScraperConfig>, sink: Arc<dyn BatchSink>) -> anyhow::Result<Self> {
        let filter = TextFilter::new(&config.filter_pattern)?;

        let tag_selector = Selector::parse(&config.tags_to_parse.join(", "))
            .map_err(|e| SpyError::Config(format!("invalid tag selector: {e}")))?;
        let link_selector = Selector::parse("a[href]")
            .map_err(|e| SpyError::Config(format!("invalid link selector: {e}")))?;

        let fetcher = PageFetcher::new(&config)?;
        let output = Mutex::new(Arc::new(OutputAggregator::new(
            config.output_every,
            sink.clone(),
        )));

        Ok(Crawler {
            config,
            fetcher,
            filter,
            tag_selector,
            link_selector,
            sink,
            output,
        })
    }

    /// Runs a full crawl from `seed` until the pending queue drains. The mode
    /// comes from the config; both modes share the same page processing and
    /// dedup path.
    pub async fn visit(&self, seed: &str, site_name: Option<&str>) -> anyhow::Result<CrawlStats> {
        let seed_url = Url::parse(seed).context(format!("invalid seed url {seed}"))?;

        let scope = CrawlScope::new(
            &seed_url,
            site_name.unwrap_or_default(),
            &self.config.allowed_domains,
        );
        let state = CrawlState::new(scope);
        state.mark_visited(&seed_url);

        // fresh aggregator per crawl; anything a previous visit left
        // unflushed is dropped with the old one
        let output = Arc::new(OutputAggregator::new(
            self.config.output_every,
            self.sink.clone(),
        ));
        *self.output.lock().unwrap() = output.clone();

        let mut stats = match CrawlMode::from_config(&self.config) {
            CrawlMode::Sequential => self.crawl_sequential(seed_url, &state, &output).await,
            CrawlMode::Concurrent { limit, delay } => {
                self.crawl_concurrent(seed_url, &state, &output, limit, delay)
                    .await
            }
        };

        stats.urls_seen = state.visited_count();
        debug!(
            "crawl of {} done: {} fetched, {} failed, {} urls seen",
            seed, stats.pages_fetched, stats.pages_failed, stats.urls_seen
        );
        Ok(stats)
    }

    /// Flushes whatever is still buffered. Called unconditionally at job end
    /// so no words are lost when a crawl fails halfway.
    pub fn flush(&self) {
        let output = self.output.lock().unwrap().clone();
        output.flush();
    }

    async fn crawl_sequential(
        &self,
        seed: Url,
        state: &CrawlState,
        output: &OutputAggregator,
    ) -> CrawlStats {
        let mut stats = CrawlStats::default();
        let mut queue: VecDeque<(Url, i32)> = VecDeque::new();
        queue.push_back((seed, 0));

        while let Some((url, depth)) = queue.pop_front() {
            let body = match self.fetcher.fetch(url.as_str()).await {
                Ok(b) => b,
                Err(e) => {
                    error!("{e}");
                    stats.pages_failed += 1;
                    continue;
                }
            };
            stats.pages_fetched += 1;

            for link in self.process_page(&url, &body, output) {
                if depth + 1 > self.config.max_depth {
                    continue;
                }
                if state.accept_link(&link) {
                    queue.push_back((link, depth + 1));
                }
            }
        }

        stats
    }

    async fn crawl_concurrent(
        &self,
        seed: Url,
        state: &CrawlState,
        output: &OutputAggregator,
        limit: usize,
        delay: Duration,
    ) -> CrawlStats {
        // fetched pages come back as (url, links found, depth, failed)
        let (scraped_tx, mut scraped_rx) = mpsc::channel::<(Url, Vec<Url>, i32, bool)>(limit + 10);
        let (visit_tx, visit_rx) = mpsc::channel::<(Url, i32)>(1000);

        let mut stats = CrawlStats::default();

        if let Err(e) = visit_tx.send((seed, 0)).await {
            error!("could not enqueue seed url: {e}");
            return stats;
        }

        let pump = tokio_stream::wrappers::ReceiverStream::new(visit_rx).for_each_concurrent(
            limit,
            |(url, depth)| {
                let scraped_tx = scraped_tx.clone();
                async move {
                    if !delay.is_zero() {
                        sleep(jitter(delay)).await;
                    }

                    debug!("fetching {} at depth {}", url, depth);
                    let (links, failed) = match self.fetcher.fetch(url.as_str()).await {
                        Ok(body) => (self.process_page(&url, &body, output), false),
                        Err(e) => {
                            error!("{e}");
                            (vec![], true)
                        }
                    };

                    if let Err(e) = scraped_tx.send((url, links, depth, failed)).await {
                        error!("could not send to scraped channel: {e}");
                    }
                }
            },
        );

        let coordinator = async {
            let visit_tx = visit_tx;
            // every url sent to the pump comes back as exactly one scraped
            // message, so this counter hitting zero means the crawl drained
            let mut pending: usize = 1;
            // accepted links wait here when the visit channel is full; the
            // drain loop must never block on visit_tx, or the workers back
            // up on scraped_tx and both sides wedge
            let mut backlog: VecDeque<(Url, i32)> = VecDeque::new();

            loop {
                while let Some(entry) = backlog.pop_front() {
                    match visit_tx.try_send(entry) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(entry)) => {
                            backlog.push_front(entry);
                            break;
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            error!(
                                "visit channel closed with {} links still queued",
                                backlog.len() + 1
                            );
                            pending = pending.saturating_sub(backlog.len() + 1);
                            backlog.clear();
                            break;
                        }
                    }
                }

                loop {
                    match scraped_rx.try_recv() {
                        Ok((url, links, depth, failed)) => {
                            pending -= 1;
                            if failed {
                                stats.pages_failed += 1;
                            } else {
                                stats.pages_fetched += 1;
                            }
                            debug!("visited {} at depth {}", url, depth);

                            for link in links {
                                if depth + 1 > self.config.max_depth {
                                    continue;
                                }
                                if state.accept_link(&link) {
                                    pending += 1;
                                    backlog.push_back((link, depth + 1));
                                }
                            }
                        }
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => break,
                    }
                }

                // backlog entries are counted in pending, so zero pending
                // also means an empty backlog
                if pending == 0 {
                    break;
                }
                sleep(Duration::from_millis(10)).await;
            }
            // dropping visit_tx here ends the pump stream
        };

        futures::join!(pump, coordinator);

        stats
    }

    /// Parses one page: harvests direct text of the configured tags into the
    /// aggregator and returns the resolved absolute links found on it. The
    /// parsed dom stays local so it never crosses an await point.
    fn process_page(&self, page_url: &Url, body: &str, output: &OutputAggregator) -> Vec<Url> {
        let doc = Html::parse_document(body);

        for el in doc.select(&self.tag_selector) {
            let words = self.filter.filter(&direct_text(el));
            output.append(words);
        }

        let mut links = vec![];
        for el in doc.select(&self.link_selector) {
            let href = match el.value().attr("href") {
                Some(h) => h,
                None => continue,
            };
            match page_url.join(href) {
                Ok(mut url) => {
                    url.set_fragment(None);
                    if url.scheme() == "http" || url.scheme() == "https" {
                        links.push(url);
                    }
                }
                Err(e) => {
                    warn!("skipping malformed link {} on {}: {}", href, page_url, e);
                }
            }
        }
        links
    }
}
