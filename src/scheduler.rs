use std::{
    str::FromStr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use cron::Schedule;
use futures::StreamExt;
use tokio::{sync::mpsc, time::sleep};

use crate::{
    config::{ScraperConfig, Site},
    crawler::Crawler,
    publisher::{EventSink, Publisher},
    types::SpyError,
    utils::DATE_FORMAT,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerState {
    NotStarted,
    Running,
    ShuttingDown,
    Stopped,
}

/// One unit of scheduler work, consumed by exactly one worker.
#[derive(Debug, Clone)]
pub struct SiteJob {
    pub site_name: String,
    pub url: String,
}

/// Cron-driven fan-out: on every tick one job per configured site goes into a
/// bounded channel and a fixed number of workers drain it, each running a
/// fresh crawler wired to the publisher. A failing job never takes the tick
/// or its sibling jobs down with it.
pub struct Scheduler {
    schedule: Schedule,
    sites: Vec<Site>,
    workers: usize,
    scraper_config: Arc<ScraperConfig>,
    publisher: Arc<dyn Publisher>,
    state: Mutex<SchedulerState>,
}

impl Scheduler {
    pub fn new(
        cron_pattern: &str,
        sites: Vec<Site>,
        workers: usize,
        scraper_config: ScraperConfig,
        publisher: Arc<dyn Publisher>,
    ) -> anyhow::Result<Self> {
        let schedule = Schedule::from_str(cron_pattern)
            .map_err(|e| SpyError::Config(format!("invalid cron pattern {cron_pattern}: {e}")))?;

        if workers == 0 {
            return Err(SpyError::Config("workers_count must be positive".into()).into());
        }
        scraper_config.validate()?;

        Ok(Scheduler {
            schedule,
            sites,
            workers,
            scraper_config: Arc::new(scraper_config),
            publisher,
            state: Mutex::new(SchedulerState::NotStarted),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: SchedulerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Runs ticks on the cron cadence until the termination flag is raised.
    /// The flag is polled between ticks and observed by workers at job
    /// receive; a job already picked up is allowed to finish. State is held
    /// behind a mutex so a holder of an `Arc<Scheduler>` can watch the
    /// lifecycle while `run` is in progress.
    pub async fn run(&self, should_terminate: Arc<AtomicBool>) -> anyhow::Result<()> {
        self.set_state(SchedulerState::Running);
        info!(
            "scheduler running with {} sites and {} workers",
            self.sites.len(),
            self.workers
        );

        'ticks: loop {
            if should_terminate.load(Ordering::Relaxed) {
                self.set_state(SchedulerState::ShuttingDown);
                break;
            }

            let next = match self.schedule.upcoming(Utc).next() {
                Some(n) => n,
                None => {
                    warn!("cron schedule has no upcoming fire time");
                    self.set_state(SchedulerState::ShuttingDown);
                    break;
                }
            };
            debug!("next tick at {}", next);

            while Utc::now() < next {
                if should_terminate.load(Ordering::Relaxed) {
                    self.set_state(SchedulerState::ShuttingDown);
                    break 'ticks;
                }
                sleep(Duration::from_millis(500)).await;
            }

            self.run_tick(should_terminate.clone()).await;
        }

        info!("shutting down scheduler");
        self.set_state(SchedulerState::Stopped);
        Ok(())
    }

    /// One tick: queue a job per site, close the channel, let the workers
    /// drain it with at most `workers` crawls in flight.
    pub async fn run_tick(&self, should_terminate: Arc<AtomicBool>) {
        let (job_tx, job_rx) = mpsc::channel::<SiteJob>(self.sites.len().max(1));

        let sites = self.sites.clone();
        tokio::spawn(async move {
            for site in sites {
                let job = SiteJob {
                    site_name: site.name,
                    url: site.url,
                };
                if job_tx.send(job).await.is_err() {
                    error!("job channel closed before all sites were queued");
                    return;
                }
            }
            // job_tx drops here, closing the channel once exhausted
        });

        let started = Utc::now().format(DATE_FORMAT).to_string();

        tokio_stream::wrappers::ReceiverStream::new(job_rx)
            .for_each_concurrent(self.workers, |job| {
                let should_terminate = should_terminate.clone();
                let started = started.clone();
                async move {
                    if should_terminate.load(Ordering::Relaxed) {
                        debug!("termination requested, skipping job for {}", job.site_name);
                        return;
                    }

                    info!("start scraping site {}", job.site_name);
                    if let Err(e) = self.run_job(&job, &started).await {
                        error!("job for {} failed: {e:#}", job.site_name);
                    }
                }
            })
            .await;
    }

    async fn run_job(&self, job: &SiteJob, started: &str) -> anyhow::Result<()> {
        let sink = Arc::new(EventSink::new(&job.site_name, started, self.publisher.clone()));
        let crawler = Crawler::new(self.scraper_config.clone(), sink)?;

        let res = crawler.visit(&job.url, Some(&job.site_name)).await;

        // flush buffered words even when the crawl failed
        crawler.flush();

        let stats = res?;
        info!(
            "finished {}: {} pages fetched, {} failed, {} urls seen",
            job.site_name, stats.pages_fetched, stats.pages_failed, stats.urls_seen
        );
        Ok(())
    }
}
