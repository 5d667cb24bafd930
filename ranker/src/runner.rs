//! Poll loop and the state carried between ticks
//!
//! One [`Runner`] owns every capability and cache. Each tick it refreshes the
//! schema, reloads the operator tables, fetches the directory, evaluates all
//! candidates concurrently on the current task, applies the resulting cache
//! updates and publishes the ranking. A failing or panicking tick is logged
//! and the loop carries on after the usual interval.

use crate::cache::{apply_updates, CacheUpdate, JitterCache, TrendCache};
use crate::classifier::{Classifier, Rejection};
use crate::directory::{Directory, Probe};
use crate::error::Result;
use crate::geo::{GeoEstimator, GeoLocator};
use crate::pipeline::{Evaluation, Pipeline};
use crate::publisher::{Notifier, RankPublisher};
use crate::schema::{SchemaSource, SchemaSync};
use crate::scoring::Scorer;
use crate::store::{KeyValueStore, TickTables};
use crate::utils::{chaos, get_timestamp};
use chrono::{Datelike, Utc};
use futures::future::join_all;
use futures::FutureExt;
use log::{debug, error, info, warn};
use shared::{GeoPoint, PublishedServer, RawCandidate};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

/// Extra seconds a published ranking stays valid past the next poll
pub const UNTIL_MARGIN_SECS: f64 = 1.0;

/// Tuning that doesn't belong to any single capability
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub origin: GeoPoint,
    pub probe_timeout: Duration,
    /// Base seconds between ticks
    pub query_interval: f64,
    /// Upper bound of random seconds added to each interval
    pub query_interval_variance: f64,
}

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// No schema was available, so nothing was evaluated or published
    pub skipped: bool,
    pub schema_changed: bool,
    /// Directory fetch failed and the previous candidates were re-probed
    pub stale: bool,
    pub candidates: usize,
    pub published: Vec<PublishedServer>,
    pub rejected_count: usize,
    /// Rejection records, kept in diagnostic mode only
    pub rejected: Vec<Rejection>,
}

/// Per-process ranker state
pub struct Runner<D, P, G, S, N, K> {
    directory: D,
    probe: P,
    locator: G,
    schema: SchemaSync<S>,
    publisher: RankPublisher<N>,
    store: K,
    trend: TrendCache,
    jitter: JitterCache,
    /// Candidates of the last successful fetch, narrowed to accepted ones after each tick
    pending: Vec<RawCandidate>,
    /// Last operator tables that loaded cleanly
    tables: TickTables,
    settings: RunnerSettings,
    ticks: u64,
}

impl<D, P, G, S, N, K> Runner<D, P, G, S, N, K>
where
    D: Directory,
    P: Probe,
    G: GeoLocator,
    S: SchemaSource,
    N: Notifier,
    K: KeyValueStore,
{
    pub fn new(
        directory: D,
        probe: P,
        locator: G,
        schema: SchemaSync<S>,
        publisher: RankPublisher<N>,
        store: K,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            directory,
            probe,
            locator,
            schema,
            publisher,
            store,
            trend: TrendCache::new(),
            jitter: JitterCache::new(),
            pending: Vec::new(),
            tables: TickTables::default(),
            settings,
            ticks: 0,
        }
    }

    pub fn trend(&self) -> &TrendCache {
        &self.trend
    }

    pub fn jitter(&self) -> &JitterCache {
        &self.jitter
    }

    pub fn pending(&self) -> &[RawCandidate] {
        &self.pending
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Base interval plus random variance
    pub fn next_interval(&self) -> Duration {
        next_interval(
            self.settings.query_interval,
            self.settings.query_interval_variance,
        )
    }

    /// Runs one poll. `next_interval` sets how long the published ranking
    /// stays valid.
    pub async fn tick(&mut self, next_interval: Duration) -> Result<TickReport> {
        let (snapshot, schema_changed) = self.schema.poll(Utc::now().month()).await;
        let Some(snapshot) = snapshot else {
            warn!("No schema available yet, skipping tick");
            return Ok(TickReport {
                skipped: true,
                ..TickReport::default()
            });
        };
        if schema_changed {
            self.publisher.publish_schema(snapshot.to_tables()).await;
        }

        match self
            .store
            .reload()
            .and_then(|_| TickTables::load(&mut self.store))
        {
            Ok(tables) => self.tables = tables,
            Err(e) => warn!("Operator tables unreadable, keeping previous copy: {}", e),
        }
        let tables = &self.tables;

        let stale = match self.directory.fetch().await {
            Ok(servers) => {
                self.pending = servers;
                false
            }
            Err(e) => {
                warn!(
                    "Directory fetch failed, re-probing {} known servers: {}",
                    self.pending.len(),
                    e
                );
                true
            }
        };

        let swept = self.trend.sweep() + self.jitter.sweep();
        if swept > 0 {
            debug!("Swept {} expired cache entries", swept);
        }

        self.ticks += 1;
        let now = Instant::now();
        let tick_seed = rand::random::<u64>();
        let candidates = self.pending.len();

        let evaluations = {
            let pipeline = Pipeline {
                classifier: Classifier::new(&snapshot, tables, self.schema.min_version()),
                scorer: Scorer::new(tables, &self.trend, &self.jitter, tick_seed, now),
                geo: GeoEstimator::new(&self.locator, self.settings.origin, &tables.geo_overrides),
                probe: &self.probe,
                probe_timeout: self.settings.probe_timeout,
                stale,
            };
            join_all(
                self.pending
                    .iter()
                    .cloned()
                    .map(|candidate| pipeline.evaluate(candidate)),
            )
            .await
        };

        let mut scored = Vec::new();
        let mut rejected = Vec::new();
        let mut updates = Vec::new();
        for evaluation in evaluations {
            match evaluation {
                Evaluation::Scored {
                    server,
                    updates: server_updates,
                } => {
                    updates.extend(server_updates);
                    scored.push(server);
                }
                Evaluation::Rejected(rejection) => rejected.push(rejection),
            }
        }
        // Rejected servers that filled up lose their draw too
        updates.extend(
            self.pending
                .iter()
                .filter(|c| c.players > 0 && self.jitter.draw_at(&c.steamid, now).is_some())
                .map(|c| CacheUpdate::ClearJitter {
                    identity: c.steamid.clone(),
                }),
        );
        apply_updates(&mut self.trend, &mut self.jitter, updates, now);
        self.pending = scored
            .iter()
            .map(|server| server.server.candidate.clone())
            .collect();

        let rejected_count = rejected.len();
        if !self.publisher.debug() {
            rejected.clear();
        }
        let until = get_timestamp() + next_interval.as_secs_f64() + UNTIL_MARGIN_SECS;
        let published = self.publisher.publish(scored, &rejected, until).await?;

        info!(
            "Tick {}: {} candidates, {} ranked, {} rejected{}",
            self.ticks,
            candidates,
            published.len(),
            rejected_count,
            if stale { " (stale directory)" } else { "" }
        );

        Ok(TickReport {
            skipped: false,
            schema_changed,
            stale,
            candidates,
            published,
            rejected_count,
            rejected,
        })
    }

    /// Ticks until interrupted
    pub async fn run(&mut self) {
        info!("Ranker started");
        loop {
            let next = self.next_interval();
            match AssertUnwindSafe(self.tick(next)).catch_unwind().await {
                Ok(Ok(report)) => debug!(
                    "Tick finished: {} published, next in {:.1}s",
                    report.published.len(),
                    next.as_secs_f64()
                ),
                Ok(Err(e)) => error!("Tick failed: {}", e),
                Err(panic) => error!("Tick panicked: {}", panic_message(panic.as_ref())),
            }

            tokio::select! {
                _ = tokio::time::sleep(next) => {}
                _ = tokio::signal::ctrl_c() => {
                    info!("Ranker shutting down");
                    break;
                }
            }
        }
    }
}

pub fn next_interval(base: f64, variance: f64) -> Duration {
    Duration::from_secs_f64((base + chaos(variance)).max(0.0))
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_interval_bounds() {
        for _ in 0..100 {
            let interval = next_interval(10.0, 5.0).as_secs_f64();
            assert!((10.0..15.0).contains(&interval), "{}", interval);
        }
        assert_eq!(next_interval(10.0, 0.0), Duration::from_secs(10));
    }

    #[test]
    fn test_panic_message() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(boxed.as_ref()), "bang");
        let boxed: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic");
    }
}
