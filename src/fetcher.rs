use std::time::Duration;

use anyhow::Context;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

use crate::{config::ScraperConfig, types::SpyError};

/// Thin wrapper over the http client: configured headers and user agent go
/// out with every request, non-2xx responses come back as fetch errors.
pub struct PageFetcher {
    client: reqwest::Client,
}

impl PageFetcher {
    pub fn new(cfg: &ScraperConfig) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        for (k, v) in &cfg.headers {
            let name = HeaderName::from_bytes(k.as_bytes())
                .map_err(|e| SpyError::Config(format!("invalid header name {k}: {e}")))?;
            let value = HeaderValue::from_str(v)
                .map_err(|e| SpyError::Config(format!("invalid header value for {k}: {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .user_agent(cfg.user_agent.clone())
            .default_headers(headers)
            .timeout(Duration::from_secs(cfg.request_timeout_secs))
            .build()
            .context("could not build http client")?;

        Ok(PageFetcher { client })
    }

    pub async fn fetch(&self, url: &str) -> Result<String, SpyError> {
        let res = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SpyError::Fetch {
                url: url.into(),
                reason: e.to_string(),
            })?;

        let status = res.status();
        if !status.is_success() {
            return Err(SpyError::Fetch {
                url: url.into(),
                reason: format!("status {status}"),
            });
        }

        res.text().await.map_err(|e| SpyError::Fetch {
            url: url.into(),
            reason: e.to_string(),
        })
    }
}
