use std::{collections::HashMap, fs, path::Path};

use anyhow::Context;
use scraper::Selector;
use serde::Deserialize;

use crate::{text::TextFilter, types::SpyError};

pub const DEFAULT_FILTER_PATTERN: &str = "^[A-Za-zА-Яа-яЁё]+$";
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";

lazy_static! {
    pub static ref DEFAULT_TAGS: Vec<String> = {
        ["div", "span", "p", "a", "h1", "h2", "h3", "h4", "h5", "h6"]
            .iter()
            .map(|t| t.to_string())
            .collect()
    };
    pub static ref DEFAULT_HEADERS: HashMap<String, String> = {
        HashMap::from([
            (
                "Accept".into(),
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8".into(),
            ),
            ("Accept-Encoding".into(), "gzip, deflate, br".into()),
            ("Connection".into(), "keep-alive".into()),
        ])
    };
}

/// Per-crawl settings, immutable once a crawl starts.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScraperConfig {
    /// flush the output batch once it holds at least this many words
    pub output_every: usize,
    /// links one hop beyond this depth are dropped, not enqueued
    pub max_depth: i32,
    /// regex a lowercased token must fully match to be kept
    pub filter_pattern: String,
    /// html tags whose direct text is harvested
    pub tags_to_parse: Vec<String>,
    /// bounded-parallel fetching when true, sequential queue otherwise
    pub is_async: bool,
    /// upper bound of the randomized delay before each async fetch, seconds
    pub async_delay_secs: u64,
    /// parallelism cap for async fetching
    pub async_request_limit: usize,
    pub request_timeout_secs: u64,
    pub headers: HashMap<String, String>,
    /// extra host substrings the link filter accepts besides the seed domain
    pub allowed_domains: Vec<String>,
    pub user_agent: String,
}

impl Default for ScraperConfig {
    fn default() -> Self {
        ScraperConfig {
            output_every: 1000,
            max_depth: 10,
            filter_pattern: DEFAULT_FILTER_PATTERN.into(),
            tags_to_parse: DEFAULT_TAGS.clone(),
            is_async: true,
            async_delay_secs: 5,
            async_request_limit: 5,
            request_timeout_secs: 30,
            headers: DEFAULT_HEADERS.clone(),
            allowed_domains: vec![],
            user_agent: DEFAULT_USER_AGENT.into(),
        }
    }
}

impl ScraperConfig {
    /// Checks everything that must be fatal before any crawl runs.
    pub fn validate(&self) -> Result<(), SpyError> {
        TextFilter::new(&self.filter_pattern)?;

        if self.tags_to_parse.is_empty() {
            return Err(SpyError::Config("tags_to_parse is empty".into()));
        }
        Selector::parse(&self.tags_to_parse.join(", "))
            .map_err(|e| SpyError::Config(format!("invalid tag selector: {e}")))?;

        if self.output_every == 0 {
            return Err(SpyError::Config("output_every must be positive".into()));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Site {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum PublisherConfig {
    #[default]
    Log,
    Redis {
        url: String,
        channel: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub cron_pattern: String,
    pub workers_count: usize,
    pub sites: Vec<Site>,
    #[serde(default)]
    pub scraper: ScraperConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = fs::read_to_string(path)
            .context(format!("could not read config file {}", path.display()))?;
        Self::from_str(&raw)
    }

    pub fn from_str(raw: &str) -> anyhow::Result<Self> {
        let cfg: AppConfig = serde_yaml::from_str(raw).context("could not parse config")?;
        cfg.scraper.validate()?;
        Ok(cfg)
    }
}
