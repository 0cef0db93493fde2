//! Per-league match lifecycle.
//!
//! A `LeagueCoordinator` owns every match seen in one league. Timer cues and
//! task completion events drive each match forward through
//! `NOT_STARTED → MATCHDAY → PRE_LIVE → LIVE → FINISHED → VALIDATED`; a
//! request that would not move a match forward is logged and ignored.
//!
//! Slot indices only identify a match until it goes live. After that the
//! cached team names are its identity, and a new countdown in the same slot
//! belongs to a new match.

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::driver::Tab;
use crate::error::ScrapeError;
use crate::store::models::{MatchRecord, MatchState, Teams};
use crate::store::Collection;
use crate::tasks::live::{LiveTask, LiveTiming};
use crate::tasks::matchday::{self, MatchdayTask, MatchdayTiming};
use crate::tasks::results::{ResultsTask, ResultsTiming};
use crate::tasks::standings::{StandingsTask, STANDINGS_STOP_TIMEOUT};
use crate::tasks::{inc, Phase, TaskContext, TaskEvent, TaskHandle, TaskKey, TaskRegistry};
use crate::timer::{Cue, Observation, PhaseSignal};

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub matchday: MatchdayTiming,
    pub live: LiveTiming,
    pub results: ResultsTiming,
    /// Start a standings scrape after every N finished matches
    pub standings_trigger: u32,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        CoordinatorSettings {
            matchday: MatchdayTiming::default(),
            live: LiveTiming::default(),
            results: ResultsTiming::default(),
            standings_trigger: 5,
        }
    }
}

impl From<&Config> for CoordinatorSettings {
    fn from(config: &Config) -> Self {
        CoordinatorSettings {
            matchday: config.matchday_timing(),
            live: config.live_timing(),
            results: config.results_timing(),
            standings_trigger: config.standings_trigger,
        }
    }
}

struct Tracked {
    record: MatchRecord,
    /// Current state, watched by the match's tasks to gate their writes
    gate: watch::Sender<MatchState>,
    /// Team names as last published by the matchday task
    teams: Option<watch::Receiver<Option<Teams>>>,
    results_failed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct LeagueStatus {
    pub league: String,
    pub matches_by_state: BTreeMap<String, usize>,
    pub active_tasks: Vec<String>,
    pub completed: u32,
    pub standings_started: u32,
    pub rejected_transitions: u64,
    pub abandoned: u64,
    pub retired: BTreeMap<String, u64>,
}

pub struct LeagueCoordinator {
    league: String,
    ctx: TaskContext,
    settings: CoordinatorSettings,
    root: CancellationToken,
    slots: HashMap<usize, String>,
    matches: HashMap<String, Tracked>,
    registry: TaskRegistry,
    completed: u32,
    standings_started: u32,
    rejected: u64,
    abandoned: u64,
    retired: BTreeMap<MatchState, u64>,
}

impl LeagueCoordinator {
    pub fn new(
        league: &str,
        ctx: TaskContext,
        settings: CoordinatorSettings,
        root: CancellationToken,
    ) -> Self {
        let registry = TaskRegistry::new(ctx.metrics.clone());
        LeagueCoordinator {
            league: league.to_string(),
            ctx,
            settings,
            root,
            slots: HashMap::new(),
            matches: HashMap::new(),
            registry,
            completed: 0,
            standings_started: 0,
            rejected: 0,
            abandoned: 0,
            retired: BTreeMap::new(),
        }
    }

    pub fn league(&self) -> &str {
        &self.league
    }

    // ── Timer cues ────────────────────────────────────────────────────────────

    /// Apply one timer cue. Returns false when the step could not be taken
    /// because the page could not be switched to the view it needs; the
    /// caller should deliver the cue again on a later tick.
    pub async fn on_observation(&mut self, obs: &Observation) -> bool {
        let current = self.slots.get(&obs.slot).cloned();
        let state = current
            .as_ref()
            .and_then(|id| self.matches.get(id))
            .map(|t| t.record.state);

        match (obs.cue, current, state) {
            (Cue::Live, None, _) => {
                debug!("[{}] slot {} is live but no match was tracked there", self.league, obs.slot);
                true
            }
            (Cue::Matchday, None, _) => {
                let id = self.create(obs);
                self.begin_matchday(&id).await
            }
            (Cue::PreLive, None, _) => {
                let id = self.create(obs);
                self.begin_prelive(&id).await
            }
            // The previous occupant of this slot has moved on.
            (Cue::Matchday | Cue::PreLive, Some(_), Some(s)) if s.is_detached_from_slot() => {
                let id = self.create(obs);
                if obs.cue == Cue::Matchday {
                    self.begin_matchday(&id).await
                } else {
                    self.begin_prelive(&id).await
                }
            }
            (Cue::Matchday, Some(id), Some(MatchState::NotStarted)) => self.begin_matchday(&id).await,
            (Cue::PreLive, Some(id), Some(MatchState::NotStarted | MatchState::Matchday)) => {
                self.begin_prelive(&id).await
            }
            (Cue::Live, Some(id), Some(s)) if s < MatchState::Live => self.begin_live(&id).await,
            (cue, Some(id), Some(s)) => {
                self.rejected += 1;
                debug!(
                    "[{}] ignoring {:?} cue for {} in state {}",
                    self.league, cue, id, s
                );
                true
            }
            (_, Some(id), None) => {
                warn!("[{}] slot {} points at unknown match {}", self.league, obs.slot, id);
                self.slots.remove(&obs.slot);
                true
            }
        }
    }

    /// Register a new match first seen in `obs.slot`.
    fn create(&mut self, obs: &Observation) -> String {
        let secs = match obs.signal {
            PhaseSignal::Countdown(s) => s,
            _ => 0,
        };
        let base = format!("{}_{}_{:02}{:02}", self.league, obs.slot, secs / 60, secs % 60);
        let mut id = base.clone();
        let mut n = 2;
        while self.matches.contains_key(&id) || self.ctx.store.get(Collection::Matches, &id).is_some() {
            id = format!("{}-{}", base, n);
            n += 1;
        }

        let record = MatchRecord::new(&id, &self.league, obs.slot);
        self.persist(&record);
        info!(
            "[{}] 🆕 New match {} in slot {} ({})",
            self.league, id, obs.slot, obs.signal
        );
        let (gate, _) = watch::channel(MatchState::NotStarted);
        self.slots.insert(obs.slot, id.clone());
        self.matches.insert(
            id.clone(),
            Tracked {
                record,
                gate,
                teams: None,
                results_failed: false,
            },
        );
        id
    }

    async fn check_view(&self, tab: Tab) -> bool {
        let mut turn = self.ctx.session.turn().await;
        match turn.ensure(&self.league, tab).await {
            Ok(()) => true,
            Err(e) => {
                inc(&self.ctx.metrics.navigation_failures);
                error!("[{}] Cannot open {} view: {}", self.league, tab, e);
                false
            }
        }
    }

    async fn begin_matchday(&mut self, id: &str) -> bool {
        if !self.check_view(Tab::Matchday).await {
            return false;
        }
        if !self.transition(id, MatchState::Matchday) {
            return true;
        }
        let Some(tracked) = self.matches.get_mut(id) else {
            return true;
        };

        let (teams_tx, teams_rx) = watch::channel(None);
        tracked.teams = Some(teams_rx);
        let task = MatchdayTask::new(
            self.ctx.clone(),
            &self.league,
            tracked.record.slot,
            id,
            self.settings.matchday.clone(),
            tracked.gate.subscribe(),
            teams_tx,
        );
        let handle = TaskHandle::spawn(
            TaskKey::new(id, Phase::Matchday),
            &self.root,
            self.settings.matchday.stop_timeout,
            |cancel| task.run(cancel),
        );
        self.registry.start(handle).await;
        true
    }

    async fn begin_prelive(&mut self, id: &str) -> bool {
        let Some(state) = self.matches.get(id).map(|t| t.record.state) else {
            return true;
        };

        if state == MatchState::NotStarted {
            // First seen inside the pre-live window: read the names once.
            match self.read_slot_teams(id).await {
                Ok(Some(teams)) => self.cache_teams(id, &teams),
                Ok(None) => {}
                Err(()) => return false,
            }
        }
        if !self.transition(id, MatchState::PreLive) {
            return true;
        }

        if state == MatchState::Matchday {
            self.registry.stop(&TaskKey::new(id, Phase::Matchday)).await;
            let published = self
                .matches
                .get(id)
                .and_then(|t| t.teams.as_ref())
                .and_then(|rx| rx.borrow().clone());
            match published {
                Some(teams) => self.cache_teams(id, &teams),
                None => {
                    if let Ok(Some(teams)) = self.read_slot_teams(id).await {
                        self.cache_teams(id, &teams);
                    }
                }
            }
        }
        true
    }

    async fn begin_live(&mut self, id: &str) -> bool {
        let Some(state) = self.matches.get(id).map(|t| t.record.state) else {
            return true;
        };
        if state < MatchState::PreLive && !self.begin_prelive(id).await {
            return false;
        }

        let Some(tracked) = self.matches.get(id) else {
            return true;
        };
        let Some(teams) = tracked.record.teams() else {
            warn!(
                "[{}] No team names cached for {}, cannot follow it live",
                self.league, id
            );
            self.abandon(id);
            return true;
        };

        if !self.check_view(Tab::Live).await {
            return false;
        }
        if !self.transition(id, MatchState::Live) {
            return true;
        }
        let Some(tracked) = self.matches.get(id) else {
            return true;
        };
        let task = LiveTask::new(
            self.ctx.clone(),
            &self.league,
            id,
            teams,
            self.settings.live.clone(),
            tracked.gate.subscribe(),
        );
        let handle = TaskHandle::spawn(
            TaskKey::new(id, Phase::Live),
            &self.root,
            self.settings.live.stop_timeout,
            |cancel| task.run(cancel),
        );
        self.registry.start(handle).await;
        true
    }

    /// One-shot read of the names in the match's slot. `Err` only when the
    /// matchday view could not be opened.
    async fn read_slot_teams(&self, id: &str) -> Result<Option<Teams>, ()> {
        let Some(slot) = self.matches.get(id).map(|t| t.record.slot) else {
            return Ok(None);
        };
        let mut turn = self.ctx.session.turn().await;
        match matchday::read_teams(&mut turn, &self.league, slot).await {
            Ok(teams) => Ok(Some(teams)),
            Err(ScrapeError::Navigation(e)) => {
                inc(&self.ctx.metrics.navigation_failures);
                error!("[{}] Cannot open Matchday view: {}", self.league, e);
                Err(())
            }
            Err(e) => {
                warn!("[{}] Team names for {} unavailable: {}", self.league, id, e);
                Ok(None)
            }
        }
    }

    fn cache_teams(&mut self, id: &str, teams: &Teams) {
        let Some(tracked) = self.matches.get_mut(id) else {
            return;
        };
        if tracked.record.set_teams(teams) {
            info!("[{}] {} is {}", self.league, id, teams);
            let record = tracked.record.clone();
            self.persist(&record);
        }
    }

    /// Stop following a match that can no longer be located.
    fn abandon(&mut self, id: &str) {
        self.abandoned += 1;
        self.slots.retain(|_, v| v.as_str() != id);
        self.matches.remove(id);
    }

    // ── Task events ───────────────────────────────────────────────────────────

    pub async fn on_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::LiveFinished { match_id, reason, .. } => {
                if !self.transition(&match_id, MatchState::Finished) {
                    return;
                }
                self.registry.stop(&TaskKey::new(&match_id, Phase::Live)).await;
                self.completed += 1;
                debug!(
                    "[{}] {} finished ({:?}), {} completed so far",
                    self.league, match_id, reason, self.completed
                );
                if self.completed % self.settings.standings_trigger == 0 {
                    self.start_standings().await;
                }
                self.start_results(&match_id).await;
            }
            TaskEvent::ResultsDone {
                match_id,
                validated,
                ..
            } => {
                if !validated {
                    debug!("[{}] {} validated with a score mismatch", self.league, match_id);
                }
                self.transition(&match_id, MatchState::Validated);
            }
            TaskEvent::ResultsFailed { match_id, .. } => {
                warn!("[{}] {} stays FINISHED without a result", self.league, match_id);
                if let Some(t) = self.matches.get_mut(&match_id) {
                    t.results_failed = true;
                }
            }
            TaskEvent::StandingsDone { ok, .. } => {
                debug!("[{}] standings run done (ok: {})", self.league, ok);
            }
        }
    }

    async fn start_results(&mut self, id: &str) {
        let Some(teams) = self.matches.get(id).and_then(|t| t.record.teams()) else {
            warn!("[{}] No team names for {}, skipping results", self.league, id);
            return;
        };
        let task = ResultsTask::new(
            self.ctx.clone(),
            &self.league,
            id,
            teams,
            self.settings.results.clone(),
        );
        let handle = TaskHandle::spawn(
            TaskKey::new(id, Phase::Results),
            &self.root,
            self.settings.results.stop_timeout(),
            |cancel| task.run(cancel),
        );
        self.registry.start(handle).await;
    }

    /// Fire-and-forget table refresh; skipped while one is still running.
    async fn start_standings(&mut self) {
        let key = TaskKey::new(&self.league, Phase::Standings);
        if self.registry.is_active(&key) {
            info!("[{}] Standings scrape still running, skipping", self.league);
            return;
        }
        info!(
            "[{}] 🏆 {} matches completed, scraping standings",
            self.league, self.completed
        );
        self.standings_started += 1;
        let task = StandingsTask::new(self.ctx.clone(), &self.league);
        let handle = TaskHandle::spawn(key, &self.root, STANDINGS_STOP_TIMEOUT, |cancel| {
            task.run(cancel)
        });
        self.registry.start(handle).await;
    }

    // ── State machine ─────────────────────────────────────────────────────────

    /// Move a match to `next`, refusing unless its current state is one of
    /// `next`'s predecessors. The gate is updated before anything else so
    /// tasks of the previous phase stop writing immediately.
    fn transition(&mut self, id: &str, next: MatchState) -> bool {
        let Some(tracked) = self.matches.get_mut(id) else {
            debug!("[{}] transition to {} for unknown match {}", self.league, next, id);
            return false;
        };
        let current = tracked.record.state;
        match tracked.record.advance(next) {
            Some(prev) => {
                tracked.gate.send_replace(next);
                info!(
                    "[{}] slot {} {}: {} → {}",
                    self.league, tracked.record.slot, id, prev, next
                );
                let record = tracked.record.clone();
                self.persist(&record);
                true
            }
            None => {
                self.rejected += 1;
                debug!(
                    "[{}] rejected transition {} → {} for {}",
                    self.league, current, next, id
                );
                false
            }
        }
    }

    fn persist(&self, record: &MatchRecord) {
        if self
            .ctx
            .store
            .upsert(Collection::Matches, &record.match_id, record)
            .is_err()
        {
            inc(&self.ctx.metrics.store_write_errors);
        }
    }

    // ── Housekeeping ──────────────────────────────────────────────────────────

    /// Drop finished task handles and retire matches nothing will touch again.
    pub fn reap(&mut self) {
        self.registry.reap();
        let done: Vec<String> = self
            .matches
            .iter()
            .filter(|(_, t)| {
                t.record.state == MatchState::Validated
                    || (t.record.state == MatchState::Finished && t.results_failed)
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in done {
            if let Some(t) = self.matches.remove(&id) {
                *self.retired.entry(t.record.state).or_default() += 1;
                self.slots.retain(|_, v| *v != id);
            }
        }
    }

    pub async fn shutdown(&mut self) {
        let active = self.registry.active().len();
        if active > 0 {
            info!("[{}] Stopping {} task(s)", self.league, active);
        }
        self.registry.stop_all().await;
    }

    pub fn record(&self, id: &str) -> Option<&MatchRecord> {
        self.matches.get(id).map(|t| &t.record)
    }

    pub fn match_in_slot(&self, slot: usize) -> Option<&MatchRecord> {
        self.slots.get(&slot).and_then(|id| self.record(id))
    }

    pub fn active_tasks(&self, phase: Phase) -> usize {
        self.registry.count(phase)
    }

    pub fn status(&self) -> LeagueStatus {
        let mut matches_by_state = BTreeMap::new();
        for t in self.matches.values() {
            *matches_by_state
                .entry(t.record.state.as_str().to_string())
                .or_insert(0) += 1;
        }
        LeagueStatus {
            league: self.league.clone(),
            matches_by_state,
            active_tasks: self.registry.active().iter().map(|k| k.to_string()).collect(),
            completed: self.completed,
            standings_started: self.standings_started,
            rejected_transitions: self.rejected,
            abandoned: self.abandoned,
            retired: self
                .retired
                .iter()
                .map(|(s, n)| (s.as_str().to_string(), *n))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::fake::{LiveMatch, Market};
    use crate::store::models::{LiveState, OddsSnapshot};
    use crate::tasks::testing::{harness, Harness, LEAGUE};
    use crate::tasks::FinishReason;
    use crate::timer::Thresholds;
    use std::time::Duration;

    const ODDS: Market<'static> = Market {
        class: "m3",
        options: &[("1", "2.10"), ("X", "3.40"), ("2", "3.05")],
    };

    fn obs(slot: usize, raw: &str) -> Observation {
        let signal = PhaseSignal::parse(raw);
        Observation {
            league: LEAGUE.into(),
            slot,
            signal,
            cue: Thresholds::default().classify(signal).unwrap(),
        }
    }

    fn coordinator(h: &Harness) -> LeagueCoordinator {
        LeagueCoordinator::new(
            LEAGUE,
            h.ctx.clone(),
            CoordinatorSettings::default(),
            CancellationToken::new(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    /// Drive a match in `slot` from first sighting to LIVE.
    async fn bring_live(c: &mut LeagueCoordinator, slot: usize) -> String {
        assert!(c.on_observation(&obs(slot, "01:30")).await);
        settle().await;
        assert!(c.on_observation(&obs(slot, "00:08")).await);
        assert!(c.on_observation(&obs(slot, "LIVE")).await);
        c.match_in_slot(slot).unwrap().match_id.clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_countdown_starts_matchday_task() {
        let h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        let mut c = coordinator(&h);

        assert!(c.on_observation(&obs(0, "01:30")).await);
        let rec = c.match_in_slot(0).unwrap();
        assert_eq!(rec.match_id, "english_0_0130");
        assert_eq!(rec.state, MatchState::Matchday);
        assert_eq!(c.active_tasks(Phase::Matchday), 1);

        // Identical cycles: only the first is stored.
        tokio::time::sleep(Duration::from_secs(13)).await;
        assert_eq!(h.ctx.store.list(Collection::Odds).len(), 1);
        assert_eq!(h.ctx.metrics.snapshot().odds_cycles, 3);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_threshold_stops_odds_and_caches_teams() {
        let h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        let mut c = coordinator(&h);

        c.on_observation(&obs(0, "01:30")).await;
        settle().await;
        assert!(c.on_observation(&obs(0, "00:08")).await);

        let rec = c.match_in_slot(0).unwrap().clone();
        assert_eq!(rec.state, MatchState::PreLive);
        assert_eq!(rec.teams(), Some(Teams::new("Red FC", "Blue FC")));
        assert_eq!(c.active_tasks(Phase::Matchday), 0);

        let before = h.ctx.store.list(Collection::Odds).len();
        h.page.clear_games();
        h.page.add_game("Red FC", "Blue FC", &[Market { class: "m3", options: &[("1", "1.50")] }]);
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(h.ctx.store.list(Collection::Odds).len(), before);

        let stored: MatchRecord = h.ctx.store.get_as(Collection::Matches, &rec.match_id).unwrap();
        assert_eq!(stored.home_team.as_deref(), Some("Red FC"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_task_finds_match_by_name() {
        let h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        // In the live view the match is listed second.
        h.page.add_live_match(&LiveMatch {
            home: "Green FC",
            away: "Gold FC",
            score: "3 - 0",
            home_goals: &["4'", "9'", "12'"],
            away_goals: &[],
            halftime: None,
            status: None,
        });
        h.page.add_live_match(&LiveMatch {
            home: "Red FC",
            away: "Blue FC",
            score: "0 - 1",
            home_goals: &[],
            away_goals: &["17'"],
            halftime: None,
            status: None,
        });
        let mut c = coordinator(&h);

        let id = bring_live(&mut c, 0).await;
        assert_eq!(c.record(&id).unwrap().state, MatchState::Live);
        assert_eq!(c.active_tasks(Phase::Live), 1);
        settle().await;

        let live: LiveState = h.ctx.store.get_as(Collection::Live, &id).unwrap();
        assert_eq!(live.home_team, "Red FC");
        assert_eq!((live.home_score, live.away_score), (0, 1));
        assert_eq!(h.ctx.store.list(Collection::Goals).len(), 1);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_live_cue_during_matchday_passes_through_prelive() {
        let h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        let mut c = coordinator(&h);

        c.on_observation(&obs(0, "01:30")).await;
        settle().await;
        assert!(c.on_observation(&obs(0, "LIVE")).await);

        let rec = c.match_in_slot(0).unwrap();
        assert_eq!(rec.state, MatchState::Live);
        assert!(rec.teams().is_some());
        assert_eq!(c.active_tasks(Phase::Matchday), 0);
        assert_eq!(c.active_tasks(Phase::Live), 1);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_backward_cues_are_ignored() {
        let h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        let mut c = coordinator(&h);
        c.on_observation(&obs(0, "01:30")).await;
        settle().await;
        c.on_observation(&obs(0, "00:08")).await;
        let id = c.match_in_slot(0).unwrap().match_id.clone();

        // A late countdown above the stop threshold must not restart odds.
        assert!(c.on_observation(&obs(0, "00:40")).await);
        assert_eq!(c.record(&id).unwrap().state, MatchState::PreLive);
        assert_eq!(c.active_tasks(Phase::Matchday), 0);
        assert_eq!(c.status().rejected_transitions, 1);

        // A finish for a match that never went live changes nothing.
        c.on_event(TaskEvent::LiveFinished {
            league: LEAGUE.into(),
            match_id: id.clone(),
            reason: FinishReason::FullTime,
        })
        .await;
        assert_eq!(c.record(&id).unwrap().state, MatchState::PreLive);
        assert_eq!(c.status().completed, 0);
        assert_eq!(c.active_tasks(Phase::Results), 0);
        assert_eq!(c.status().rejected_transitions, 2);

        c.on_event(TaskEvent::ResultsDone {
            league: LEAGUE.into(),
            match_id: id.clone(),
            validated: true,
        })
        .await;
        assert_eq!(c.record(&id).unwrap().state, MatchState::PreLive);
        assert_eq!(c.status().rejected_transitions, 3);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_events_out_of_order_do_not_move_matches() {
        let h = harness();
        h.page.set_timers(&["01:30", "01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        h.page.add_game("Green FC", "Gold FC", &[ODDS]);
        let mut c = coordinator(&h);
        c.on_observation(&obs(1, "01:30")).await;
        let matchday = c.match_in_slot(1).unwrap().match_id.clone();
        let live = bring_live(&mut c, 0).await;

        c.on_event(TaskEvent::LiveFinished {
            league: LEAGUE.into(),
            match_id: matchday.clone(),
            reason: FinishReason::FullTime,
        })
        .await;
        assert_eq!(c.record(&matchday).unwrap().state, MatchState::Matchday);
        assert_eq!(c.active_tasks(Phase::Matchday), 1);

        // Results cannot validate a match that is still being followed live.
        c.on_event(TaskEvent::ResultsDone {
            league: LEAGUE.into(),
            match_id: live.clone(),
            validated: true,
        })
        .await;
        assert_eq!(c.record(&live).unwrap().state, MatchState::Live);
        assert_eq!(c.active_tasks(Phase::Live), 1);

        c.reap();
        assert!(c.record(&live).is_some());
        let status = c.status();
        assert_eq!(status.completed, 0);
        assert_eq!(status.standings_started, 0);
        assert_eq!(status.rejected_transitions, 2);
        assert!(status.retired.is_empty());
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_seen_in_prelive_reads_teams_once() {
        let h = harness();
        h.page.set_timers(&["00:07"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        let mut c = coordinator(&h);

        assert!(c.on_observation(&obs(0, "00:07")).await);
        let rec = c.match_in_slot(0).unwrap();
        assert_eq!(rec.state, MatchState::PreLive);
        assert_eq!(rec.teams(), Some(Teams::new("Red FC", "Blue FC")));
        assert_eq!(c.active_tasks(Phase::Matchday), 0);
        assert!(h.ctx.store.list(Collection::Odds).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_navigation_failure_leaves_state_for_retry() {
        let h = harness();
        let mut c = LeagueCoordinator::new(
            "german",
            h.ctx.clone(),
            CoordinatorSettings::default(),
            CancellationToken::new(),
        );
        let mut o = obs(0, "01:30");
        o.league = "german".into();

        assert!(!c.on_observation(&o).await);
        assert_eq!(c.match_in_slot(0).unwrap().state, MatchState::NotStarted);
        assert_eq!(c.active_tasks(Phase::Matchday), 0);
        assert_eq!(h.ctx.metrics.snapshot().navigation_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slot_reuse_creates_new_match() {
        let h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        let mut c = coordinator(&h);
        let first = bring_live(&mut c, 0).await;

        assert!(c.on_observation(&obs(0, "01:30")).await);
        let second = c.match_in_slot(0).unwrap().match_id.clone();
        assert_ne!(first, second);
        assert_eq!(second, "english_0_0130-2");
        assert_eq!(c.record(&first).unwrap().state, MatchState::Live);
        assert_eq!(c.active_tasks(Phase::Live), 1);
        assert_eq!(c.active_tasks(Phase::Matchday), 1);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fifth_finish_starts_one_standings_scrape() {
        let h = harness();
        h.page.set_timers(&["01:30"; 6]);
        for i in 0..6 {
            h.page
                .add_game(&format!("Home {}", i), &format!("Away {}", i), &[ODDS]);
        }
        let mut c = coordinator(&h);

        let mut ids = Vec::new();
        for slot in 0..5 {
            ids.push(bring_live(&mut c, slot).await);
        }
        // Another match still collecting odds.
        c.on_observation(&obs(5, "01:30")).await;

        for (n, id) in ids.iter().enumerate() {
            c.on_event(TaskEvent::LiveFinished {
                league: LEAGUE.into(),
                match_id: id.clone(),
                reason: FinishReason::FullTime,
            })
            .await;
            let expected = if n < 4 { 0 } else { 1 };
            assert_eq!(c.status().standings_started, expected);
        }

        assert_eq!(c.status().completed, 5);
        assert_eq!(c.active_tasks(Phase::Matchday), 1);
        assert_eq!(c.active_tasks(Phase::Live), 0);
        assert_eq!(c.match_in_slot(5).unwrap().state, MatchState::Matchday);
        c.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_event_validates_and_retires() {
        let mut h = harness();
        h.page.set_timers(&["01:30"]);
        h.page.add_game("Red FC", "Blue FC", &[ODDS]);
        h.page
            .add_results_block("WEEK 4", "12:00", &[("Red FC", "Blue FC", "1", "0")]);
        let mut c = coordinator(&h);
        let id = bring_live(&mut c, 0).await;

        c.on_event(TaskEvent::LiveFinished {
            league: LEAGUE.into(),
            match_id: id.clone(),
            reason: FinishReason::FullTime,
        })
        .await;
        assert_eq!(c.active_tasks(Phase::Results), 1);

        let done = loop {
            match h.events.recv().await.unwrap() {
                ev @ TaskEvent::ResultsDone { .. } => break ev,
                _ => continue,
            }
        };
        c.on_event(done).await;
        assert_eq!(c.record(&id).unwrap().state, MatchState::Validated);

        c.reap();
        assert!(c.record(&id).is_none());
        assert_eq!(c.status().retired.get("VALIDATED"), Some(&1));
        let stored: MatchRecord = h.ctx.store.get_as(Collection::Matches, &id).unwrap();
        assert_eq!(stored.state, MatchState::Validated);
        let odds: Vec<OddsSnapshot> = h.ctx.store.list_as(Collection::Odds);
        assert!(odds.iter().all(|o| o.match_id == id));
    }
}
