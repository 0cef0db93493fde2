use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::driver::{Connector, Session, Tab};
use crate::league::{CoordinatorSettings, LeagueCoordinator, LeagueStatus};
use crate::store::{Store, StoreStats};
use crate::tasks::retry::{backoff_with_jitter, pause};
use crate::tasks::{inc, Metrics, MetricsSnapshot, TaskContext, TaskEvent};
use crate::timer::{HistoryEntry, TimerWatcher};

const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(10);
const RESTART_BASE_DELAY: Duration = Duration::from_secs(2);
const RESTART_MAX_DELAY: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize)]
pub struct TimerStatus {
    pub league: String,
    pub slot: usize,
    #[serde(flatten)]
    pub reading: HistoryEntry,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub started_at: DateTime<Utc>,
    pub uptime_secs: i64,
    pub session_restarts: u32,
    pub timer_polls: u64,
    pub leagues: Vec<LeagueStatus>,
    pub timers: Vec<TimerStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub counters: MetricsSnapshot,
    pub store: StoreStats,
}

impl MetricsReport {
    pub fn collect(metrics: &Metrics, store: &Store) -> Self {
        MetricsReport {
            counters: metrics.snapshot(),
            store: store.stats(),
        }
    }
}

/// Owns the browser session and the store, polls every league's countdowns
/// and routes what it sees to the league coordinators.
pub struct Orchestrator {
    config: Config,
    session: Arc<Session>,
    store: Store,
    connector: Arc<dyn Connector>,
    metrics: Arc<Metrics>,
    watcher: TimerWatcher,
    coordinators: Vec<LeagueCoordinator>,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    shutdown: CancellationToken,
    started_at: DateTime<Utc>,
    restarts: u32,
    status_tx: watch::Sender<StatusReport>,
}

impl Orchestrator {
    pub fn new(
        config: &Config,
        session: Arc<Session>,
        store: Store,
        connector: Arc<dyn Connector>,
        shutdown: CancellationToken,
    ) -> Self {
        let metrics = Arc::new(Metrics::default());
        let (events_tx, events) = mpsc::unbounded_channel();
        let ctx = TaskContext {
            session: session.clone(),
            store: store.clone(),
            metrics: metrics.clone(),
            events: events_tx,
        };
        let settings = CoordinatorSettings::from(config);
        let coordinators = config
            .leagues
            .iter()
            .map(|l| {
                LeagueCoordinator::new(&l.id, ctx.clone(), settings.clone(), shutdown.child_token())
            })
            .collect();
        let started_at = Utc::now();
        let (status_tx, _) = watch::channel(StatusReport {
            started_at,
            uptime_secs: 0,
            session_restarts: 0,
            timer_polls: 0,
            leagues: Vec::new(),
            timers: Vec::new(),
        });

        Orchestrator {
            config: config.clone(),
            watcher: TimerWatcher::new(config.thresholds(), store.clone()),
            session,
            store,
            connector,
            metrics,
            coordinators,
            events,
            shutdown,
            started_at,
            restarts: 0,
            status_tx,
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Status as of the last timer tick, for readers outside the loop.
    pub fn subscribe_status(&self) -> watch::Receiver<StatusReport> {
        self.status_tx.subscribe()
    }

    /// Run until the shutdown token fires or the browser is lost for good.
    /// Everything is stopped and backed up before returning either way.
    pub async fn run(&mut self) -> Result<()> {
        self.session
            .open()
            .await
            .with_context(|| format!("cannot open {}", self.config.target_url))?;
        info!(
            "🚀 Watching {} league(s) on {}",
            self.coordinators.len(),
            self.config.target_url
        );

        let mut timer_tick = interval(self.config.timer_interval());
        timer_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let stats_every = Duration::from_secs(self.config.stats_interval_secs);
        let mut stats_tick = interval_at(Instant::now() + stats_every, stats_every);
        let backup_every = Duration::from_secs(self.config.backup_interval_secs);
        let mut backup_tick = interval_at(Instant::now() + backup_every, backup_every);
        let mut health_tick =
            interval_at(Instant::now() + HEALTH_CHECK_INTERVAL, HEALTH_CHECK_INTERVAL);

        let result = loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Shutdown requested");
                    break Ok(());
                }
                _ = timer_tick.tick() => self.tick().await,
                Some(event) = self.events.recv() => self.route(event).await,
                _ = stats_tick.tick() => self.log_stats(),
                _ = backup_tick.tick() => self.backup(),
                _ = health_tick.tick() => {
                    if let Err(e) = self.check_session().await {
                        error!("💀 {:#}", e);
                        break Err(e);
                    }
                }
            }
        };

        self.stop().await;
        result
    }

    /// One pass over every league's countdowns.
    async fn tick(&mut self) {
        for i in 0..self.coordinators.len() {
            let league = self.coordinators[i].league().to_string();
            let observations = {
                let mut turn = self.session.turn().await;
                if let Err(e) = turn.ensure(&league, Tab::Matchday).await {
                    inc(&self.metrics.navigation_failures);
                    warn!("[{}] Countdowns unavailable: {}", league, e);
                    continue;
                }
                self.watcher.poll_league(&turn, &league).await
            };

            for obs in observations {
                if !self.coordinators[i].on_observation(&obs).await {
                    self.watcher.forget(&league, obs.slot);
                }
            }
            self.coordinators[i].reap();
        }
        self.publish_status();
    }

    async fn route(&mut self, event: TaskEvent) {
        match self
            .coordinators
            .iter_mut()
            .find(|c| c.league() == event.league())
        {
            Some(coordinator) => coordinator.on_event(event).await,
            None => warn!("Event for unknown league {}: {:?}", event.league(), event),
        }
    }

    /// Restart the browser if it stopped answering. Fails once
    /// `max_session_restarts` attempts have been used up.
    async fn check_session(&mut self) -> Result<()> {
        if self.session.is_alive().await {
            return Ok(());
        }
        warn!("Browser session lost");

        loop {
            if self.restarts >= self.config.max_session_restarts {
                anyhow::bail!(
                    "browser session lost and {} restart(s) exhausted",
                    self.restarts
                );
            }
            self.restarts += 1;
            inc(&self.metrics.session_restarts);
            let delay = backoff_with_jitter(self.restarts, RESTART_BASE_DELAY, RESTART_MAX_DELAY);
            info!(
                "🔄 Restarting browser (attempt {}/{}) in {:.1}s",
                self.restarts,
                self.config.max_session_restarts,
                delay.as_secs_f64()
            );
            if !pause(delay, &self.shutdown).await {
                return Ok(());
            }
            match self.session.reconnect(self.connector.as_ref()).await {
                Ok(()) => {
                    info!("✅ Browser session restored");
                    return Ok(());
                }
                Err(e) => warn!("Browser restart failed: {}", e),
            }
        }
    }

    fn log_stats(&self) {
        let MetricsReport {
            counters: m,
            store: s,
        } = self.get_metrics();
        let active: usize = self
            .coordinators
            .iter()
            .map(|c| c.status().active_tasks.len())
            .sum();
        info!(
            "📊 tasks={} odds={} goals={} results={} standings={} | nav_failures={} write_failures={} stop_timeouts={}",
            active,
            m.odds_written,
            m.goals_written,
            m.results_written,
            m.standings_written,
            m.navigation_failures,
            s.write_failures,
            m.stop_timeouts
        );
        debug!("Store counts: {:?}", s.counts);
    }

    fn backup(&self) {
        match self.store.backup() {
            Ok(path) => info!("💾 Backup written to {}", path.display()),
            Err(e) => error!("Backup failed: {}", e),
        }
    }

    async fn stop(&mut self) {
        for coordinator in &mut self.coordinators {
            coordinator.shutdown().await;
        }
        if let Err(e) = self.store.flush() {
            error!("Final flush failed: {}", e);
        }
        self.backup();
        self.session.close().await;
        self.publish_status();
        info!("Stopped after {}s", self.uptime_secs());
    }

    fn uptime_secs(&self) -> i64 {
        (Utc::now() - self.started_at).num_seconds()
    }

    fn publish_status(&self) {
        self.status_tx.send_replace(self.get_status());
    }

    pub fn get_status(&self) -> StatusReport {
        StatusReport {
            started_at: self.started_at,
            uptime_secs: self.uptime_secs(),
            session_restarts: self.restarts,
            timer_polls: self.watcher.polls(),
            leagues: self.coordinators.iter().map(|c| c.status()).collect(),
            timers: self
                .watcher
                .latest()
                .into_iter()
                .map(|(league, slot, reading)| TimerStatus {
                    league,
                    slot,
                    reading,
                })
                .collect(),
        }
    }

    pub fn get_metrics(&self) -> MetricsReport {
        MetricsReport::collect(&self.metrics, &self.store)
    }
}
