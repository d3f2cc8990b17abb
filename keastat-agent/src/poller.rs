//! Periodic collection over every configured target
//!
//! Each target gets its own collector, HTTP session and sink, and runs as a
//! separate task. A failing target is logged and skipped.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

use crate::collector::{CycleReport, StatisticsCollector};
use crate::config::{AgentConfig, TargetConfig};
use crate::error::CollectionError;
use crate::sink::{CarbonSink, MetricSink};

/// Result of one cycle against one target
#[derive(Debug)]
pub struct TargetSummary {
    pub target: String,
    pub outcome: Result<CycleReport, CollectionError>,
    pub elapsed: Duration,
}

impl TargetSummary {
    pub fn emitted(&self) -> usize {
        self.outcome.as_ref().map(CycleReport::emitted).unwrap_or(0)
    }

    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub struct Poller {
    config: Arc<AgentConfig>,
    carbon: CarbonSink,
}

impl Poller {
    pub fn new(config: AgentConfig) -> Self {
        let carbon = CarbonSink::from_config(&config.carbon);
        Self { config: Arc::new(config), carbon }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Collect from every target once and write to carbon.
    pub async fn run_once(&self) -> Vec<TargetSummary> {
        let carbon = self.carbon.clone();
        self.run_once_with(|target| carbon.for_target(target)).await
    }

    /// Collect from every target once, with one sink per target built by
    /// `make_sink`. Summaries come back in target order.
    pub async fn run_once_with<S, F>(&self, make_sink: F) -> Vec<TargetSummary>
    where
        S: MetricSink + Send + 'static,
        F: Fn(&TargetConfig) -> S,
    {
        let started = Instant::now();
        let semaphore = Arc::new(Semaphore::new(self.config.poller.max_parallel_targets));
        let mut tasks = JoinSet::new();

        for (index, target) in self.config.targets.iter().enumerate() {
            let semaphore = semaphore.clone();
            let config = self.config.clone();
            let target = target.clone();
            let mut sink = make_sink(&target);

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let summary = collect_target(&target, &config, &mut sink).await;
                (index, summary)
            });
        }

        let mut summaries = Vec::with_capacity(self.config.targets.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(summary) => summaries.push(summary),
                Err(e) => error!("Collection task failed: {}", e),
            }
        }
        summaries.sort_by_key(|(index, _)| *index);

        info!(
            "Collecting metrics from {} target(s) took {:.3} seconds",
            summaries.len(),
            started.elapsed().as_secs_f64()
        );
        summaries.into_iter().map(|(_, summary)| summary).collect()
    }

    /// Run a pass every `interval_secs` until ctrl-c.
    pub async fn run(&self) {
        let shutdown = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Could not listen for ctrl-c: {}", e);
            }
        };
        self.run_until(shutdown).await;
    }

    /// Run a pass every `interval_secs` until `shutdown` completes. A pass in
    /// progress is abandoned.
    pub async fn run_until<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        if self.config.targets.is_empty() {
            warn!("No Kea Control Agent targets configured");
        }

        let mut ticker = interval(Duration::from_secs(self.config.poller.interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    tokio::select! {
                        summaries = self.run_once() => {
                            let failed = summaries.iter().filter(|s| !s.is_success()).count();
                            if failed > 0 {
                                warn!("{} of {} target(s) failed this pass", failed, summaries.len());
                            }
                        }
                        _ = &mut shutdown => break,
                    }
                }
                _ = &mut shutdown => break,
            }
        }
        info!("Shutting down poller");
    }
}

async fn collect_target<S>(target: &TargetConfig, config: &AgentConfig, sink: &mut S) -> TargetSummary
where
    S: MetricSink + Send,
{
    let started = Instant::now();
    let label = target.label();

    let outcome = match StatisticsCollector::for_target(target, &config.collector) {
        Ok(collector) => collector.run(sink).await,
        Err(e) => Err(e.into()),
    };
    let elapsed = started.elapsed();

    match &outcome {
        Ok(report) => info!(
            "Fetching metrics from {} took {:.3} seconds ({} emitted)",
            label,
            elapsed.as_secs_f64(),
            report.emitted()
        ),
        Err(CollectionError::Sink(e)) => {
            error!("Could not write metrics from {} to carbon: {}", label, e)
        }
        Err(e) => warn!("Could not fetch metrics from Kea server {}: {}", label, e),
    }

    TargetSummary { target: label, outcome, elapsed }
}
