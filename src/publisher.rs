use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::output::BatchSink;

/// Unit handed to the downstream broker: one flushed batch for one site,
/// stamped with the date of the scheduler tick that started the crawl.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScraperEvent {
    pub site_name: String,
    pub msg: String,
    pub date: String,
}

/// Durable delivery of one event. Called once per flush, synchronously from
/// the worker that flushed; failures are logged upstream, never retried.
pub trait Publisher: Send + Sync {
    fn publish(&self, event: &ScraperEvent) -> anyhow::Result<()>;
}

/// Fallback publisher that just logs the batch.
pub struct LogPublisher;

impl Publisher for LogPublisher {
    fn publish(&self, event: &ScraperEvent) -> anyhow::Result<()> {
        info!(
            "RESULT [{}] ({}): {}",
            event.site_name,
            event.date,
            event.msg
        );
        Ok(())
    }
}

/// Publishes events as JSON on a redis channel.
pub struct RedisPublisher {
    client: redis::Client,
    channel: String,
}

impl RedisPublisher {
    pub fn new(url: &str, channel: &str) -> anyhow::Result<Self> {
        let client =
            redis::Client::open(url).context(format!("invalid redis url {url}"))?;
        Ok(RedisPublisher {
            client,
            channel: channel.into(),
        })
    }
}

impl Publisher for RedisPublisher {
    fn publish(&self, event: &ScraperEvent) -> anyhow::Result<()> {
        let payload = serde_json::to_string(event).context("could not encode event")?;

        let mut con = self
            .client
            .get_connection()
            .context("could not connect to redis")?;

        let _: i64 = redis::cmd("PUBLISH")
            .arg(&self.channel)
            .arg(payload)
            .query(&mut con)
            .context(format!("could not publish to channel {}", self.channel))?;

        Ok(())
    }
}

/// Sink installed into each crawler by the worker pool: stamps a flushed
/// batch with the site identity and tick date and forwards it.
pub struct EventSink {
    site_name: String,
    date: String,
    publisher: Arc<dyn Publisher>,
}

impl EventSink {
    pub fn new(site_name: &str, date: &str, publisher: Arc<dyn Publisher>) -> Self {
        EventSink {
            site_name: site_name.into(),
            date: date.into(),
            publisher,
        }
    }
}

impl BatchSink for EventSink {
    fn deliver(&self, batch: String) -> anyhow::Result<()> {
        self.publisher.publish(&ScraperEvent {
            site_name: self.site_name.clone(),
            msg: batch,
            date: self.date.clone(),
        })
    }
}
