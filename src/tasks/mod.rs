//! Per-match scraping tasks and the bookkeeping shared between them.
//!
//! ```text
//!  LeagueCoordinator ──start/stop──▶ TaskRegistry ──spawn──▶ MatchdayTask
//!        ▲                                                   LiveTask
//!        │                                                   ResultsTask
//!        └──────────────── TaskEvent (mpsc) ◀─────────────── StandingsTask
//! ```
//! Every task reads the page through the shared `Session`, writes through
//! the shared `Store`, and counts what it does in the shared `Metrics`.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::driver::Session;
use crate::store::Store;

pub mod live;
pub mod matchday;
pub mod registry;
pub mod results;
pub mod retry;
pub mod standings;

pub use registry::{TaskHandle, TaskRegistry};

/// Kind of work a task does; at most one task per `(scope, phase)` runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Phase {
    Matchday,
    Live,
    Results,
    Standings,
}

/// Registry key. `scope` is the match id, or the league id for standings.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskKey {
    pub scope: String,
    pub phase: Phase,
}

impl TaskKey {
    pub fn new(scope: impl Into<String>, phase: Phase) -> Self {
        TaskKey {
            scope: scope.into(),
            phase,
        }
    }
}

impl fmt::Display for TaskKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}", self.scope, self.phase)
    }
}

/// Why a live task ended on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FinishReason {
    /// Full-time marker seen
    FullTime,
    /// Match disappeared from the live view after being tracked
    Vanished,
    /// Tracking hit the configured maximum duration
    DurationBound,
}

/// Completion reports sent from tasks back to their coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum TaskEvent {
    LiveFinished {
        league: String,
        match_id: String,
        reason: FinishReason,
    },
    ResultsDone {
        league: String,
        match_id: String,
        validated: bool,
    },
    ResultsFailed {
        league: String,
        match_id: String,
    },
    StandingsDone {
        league: String,
        ok: bool,
    },
}

impl TaskEvent {
    pub fn league(&self) -> &str {
        match self {
            TaskEvent::LiveFinished { league, .. }
            | TaskEvent::ResultsDone { league, .. }
            | TaskEvent::ResultsFailed { league, .. }
            | TaskEvent::StandingsDone { league, .. } => league,
        }
    }
}

macro_rules! counters {
    ($($name:ident),* $(,)?) => {
        /// Process-wide counters. Every task failure lands in one of these.
        #[derive(Debug, Default)]
        pub struct Metrics {
            $(pub $name: AtomicU64,)*
        }

        #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
        pub struct MetricsSnapshot {
            $(pub $name: u64,)*
        }

        impl Metrics {
            pub fn snapshot(&self) -> MetricsSnapshot {
                MetricsSnapshot {
                    $($name: self.$name.load(Ordering::Relaxed),)*
                }
            }
        }
    };
}

counters!(
    odds_cycles,
    odds_failed_cycles,
    odds_retries,
    odds_duplicates,
    odds_written,
    live_polls,
    live_errors,
    goals_written,
    live_finished,
    results_written,
    results_failed,
    validation_mismatches,
    standings_written,
    standings_failed,
    navigation_failures,
    store_write_errors,
    tasks_started,
    stop_timeouts,
    session_restarts,
);

pub fn inc(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

/// Everything a task needs from the outside world.
#[derive(Clone)]
pub struct TaskContext {
    pub session: Arc<Session>,
    pub store: Store,
    pub metrics: Arc<Metrics>,
    pub events: mpsc::UnboundedSender<TaskEvent>,
}

impl TaskContext {
    /// Report to the coordinator. A closed channel only happens during
    /// shutdown, when nobody is listening any more.
    pub fn report(&self, event: TaskEvent) {
        let _ = self.events.send(event);
    }
}
