use std::{
    path::PathBuf,
    sync::{atomic::AtomicBool, Arc},
};

use anyhow::Context;
use clap::Parser;
use log::debug;
use signal_hook::consts::{SIGINT, SIGTERM};

use wordspy::{
    config::{AppConfig, PublisherConfig},
    publisher::{LogPublisher, Publisher, RedisPublisher},
    scheduler::Scheduler,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Scheduled website word scraper", long_about = None)]
struct Args {
    /// Path to the yaml config file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,
    /// Run a single tick immediately and exit instead of following the cron schedule
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();

    let cfg = AppConfig::load(&args.config)?;
    debug!(
        "loaded config with {} sites, cron pattern {}",
        cfg.sites.len(),
        cfg.cron_pattern
    );

    let publisher: Arc<dyn Publisher> = match &cfg.publisher {
        PublisherConfig::Log => Arc::new(LogPublisher),
        PublisherConfig::Redis { url, channel } => Arc::new(
            RedisPublisher::new(url, channel).context("could not create redis publisher")?,
        ),
    };

    let scheduler = Scheduler::new(
        &cfg.cron_pattern,
        cfg.sites.clone(),
        cfg.workers_count,
        cfg.scraper.clone(),
        publisher,
    )?;

    let should_terminate = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(SIGTERM, Arc::clone(&should_terminate))?;
    signal_hook::flag::register(SIGINT, Arc::clone(&should_terminate))?;

    if args.once {
        scheduler.run_tick(should_terminate).await;
        return Ok(());
    }

    scheduler.run(should_terminate).await
}
