//! In-play tracking of one match.
//!
//! The live view reorders matches, so the task finds its match by the team
//! names cached during the matchday phase. Every poll re-reads all goals
//! shown so far; an in-memory `(side, minute)` set decides which are new.

use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::pause;
use super::{inc, FinishReason, TaskContext, TaskEvent};
use crate::driver::{selectors as sel, Element, Tab, Turn};
use crate::error::ScrapeError;
use crate::store::models::{GoalEvent, LivePhase, LiveState, MatchState, Side, Teams};
use crate::store::Collection;

#[derive(Debug, Clone)]
pub struct LiveTiming {
    pub poll_interval: Duration,
    pub max_duration: Duration,
    /// Pause after a failed poll before trying again
    pub error_pause: Duration,
    /// Consecutive polls without the match before it counts as finished
    pub vanish_limit: u32,
    pub stop_timeout: Duration,
}

impl Default for LiveTiming {
    fn default() -> Self {
        LiveTiming {
            poll_interval: Duration::from_secs(2),
            max_duration: Duration::from_secs(120 * 60),
            error_pause: Duration::from_secs(1),
            vanish_limit: 5,
            stop_timeout: Duration::from_secs(4),
        }
    }
}

/// What one poll read off the match card.
#[derive(Debug, Clone, PartialEq)]
pub struct LiveReading {
    pub home_score: u32,
    pub away_score: u32,
    pub halftime: Option<String>,
    pub status: Option<String>,
    pub goals: Vec<(Side, String)>,
}

impl LiveReading {
    pub fn phase(&self) -> LivePhase {
        if self
            .status
            .as_deref()
            .is_some_and(|s| s.to_uppercase().contains("FT"))
        {
            return LivePhase::FullTime;
        }
        match self.halftime.as_deref() {
            Some(ht) if ht.to_uppercase().contains("HT") => LivePhase::HalfTime,
            Some(ht) if !ht.is_empty() => LivePhase::SecondHalf,
            _ => LivePhase::FirstHalf,
        }
    }

    /// Half-time score without the marker, e.g. `"HT 1-0"` → `"1-0"`.
    pub fn halftime_score(&self) -> Option<String> {
        let ht = self.halftime.as_deref()?;
        let score = ht.replace("HT", "").replace("ht", "");
        let score = score.trim();
        (!score.is_empty()).then(|| score.to_string())
    }
}

pub struct LiveTask {
    ctx: TaskContext,
    league: String,
    match_id: String,
    teams: Teams,
    timing: LiveTiming,
    state: watch::Receiver<MatchState>,
}

impl LiveTask {
    pub fn new(
        ctx: TaskContext,
        league: &str,
        match_id: &str,
        teams: Teams,
        timing: LiveTiming,
        state: watch::Receiver<MatchState>,
    ) -> Self {
        LiveTask {
            ctx,
            league: league.to_string(),
            match_id: match_id.to_string(),
            teams,
            timing,
            state,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "[{}] 🔴 Live tracking started for {} ({})",
            self.league, self.match_id, self.teams
        );
        let started = Instant::now();
        let mut goals = self.goals_already_stored();
        let mut seen = false;
        let mut misses = 0u32;

        let reason = loop {
            if cancel.is_cancelled() {
                debug!("[{}] Live tracking of {} cancelled", self.league, self.match_id);
                return;
            }
            if started.elapsed() >= self.timing.max_duration {
                break FinishReason::DurationBound;
            }

            inc(&self.ctx.metrics.live_polls);
            match self.poll().await {
                Ok(Some(reading)) => {
                    seen = true;
                    misses = 0;
                    if !self.record(&reading, &mut goals, &cancel) {
                        return;
                    }
                    if reading.phase() == LivePhase::FullTime {
                        break FinishReason::FullTime;
                    }
                }
                Ok(None) if seen => {
                    misses += 1;
                    debug!(
                        "[{}] {} not in live view ({}/{})",
                        self.league, self.match_id, misses, self.timing.vanish_limit
                    );
                    if misses >= self.timing.vanish_limit {
                        break FinishReason::Vanished;
                    }
                }
                Ok(None) => debug!("[{}] waiting for {} to appear live", self.league, self.teams),
                Err(e) => {
                    inc(&self.ctx.metrics.live_errors);
                    warn!("[{}] Live poll failed for {}: {}", self.league, self.match_id, e);
                    if !pause(self.timing.error_pause, &cancel).await {
                        return;
                    }
                    continue;
                }
            }

            if !pause(self.timing.poll_interval, &cancel).await {
                return;
            }
        };

        info!(
            "[{}] 🏁 {} finished ({:?}) after {:.0}s, {} goal(s)",
            self.league,
            self.match_id,
            reason,
            started.elapsed().as_secs_f64(),
            goals.len()
        );
        inc(&self.ctx.metrics.live_finished);
        self.ctx.report(TaskEvent::LiveFinished {
            league: self.league.clone(),
            match_id: self.match_id.clone(),
            reason,
        });
    }

    /// Goals persisted by an earlier run for this match.
    fn goals_already_stored(&self) -> HashSet<(Side, String)> {
        self.ctx
            .store
            .list_as::<GoalEvent>(Collection::Goals)
            .into_iter()
            .filter(|g| g.match_id == self.match_id)
            .map(|g| (g.team, g.minute))
            .collect()
    }

    /// Write the live state and any new goals. Returns false once the match
    /// no longer accepts live writes.
    fn record(
        &self,
        reading: &LiveReading,
        goals: &mut HashSet<(Side, String)>,
        cancel: &CancellationToken,
    ) -> bool {
        if cancel.is_cancelled() || !self.state.borrow().accepts_goals() {
            return false;
        }

        for (side, minute) in &reading.goals {
            if goals.contains(&(*side, minute.clone())) {
                continue;
            }
            let event = match GoalEvent::new(&self.match_id, *side, minute) {
                Ok(e) => e,
                Err(e) => {
                    debug!("[{}] ignoring goal entry: {}", self.league, e);
                    continue;
                }
            };
            match self.ctx.store.append(Collection::Goals, &event) {
                Ok(()) => {
                    let team = match side {
                        Side::Home => &self.teams.home,
                        Side::Away => &self.teams.away,
                    };
                    info!("[{}] ⚽ GOAL! {} at {}'", self.league, team, minute);
                    inc(&self.ctx.metrics.goals_written);
                    goals.insert((*side, minute.clone()));
                }
                Err(_) => inc(&self.ctx.metrics.store_write_errors),
            }
        }

        let state = LiveState {
            match_id: self.match_id.clone(),
            league: self.league.clone(),
            home_team: self.teams.home.clone(),
            away_team: self.teams.away.clone(),
            home_score: reading.home_score,
            away_score: reading.away_score,
            halftime_score: reading.halftime_score(),
            phase: reading.phase(),
            goals_recorded: goals.len(),
            updated_at: Utc::now(),
        };
        if self
            .ctx
            .store
            .upsert(Collection::Live, &self.match_id, &state)
            .is_err()
        {
            inc(&self.ctx.metrics.store_write_errors);
        }
        true
    }

    async fn poll(&self) -> Result<Option<LiveReading>, ScrapeError> {
        let mut turn = self.ctx.session.turn().await;
        turn.ensure(&self.league, Tab::Live).await?;
        let Some(card) = find_match(&turn, &self.teams).await else {
            return Ok(None);
        };
        read_card(&turn, &card).await.map(Some)
    }
}

async fn find_match(turn: &Turn<'_>, teams: &Teams) -> Option<Element> {
    for card in turn.find_all(sel::LIVE_MATCH).await {
        let home = turn.text_within(&card, sel::LIVE_TEAM_HOME).await;
        let away = turn.text_within(&card, sel::LIVE_TEAM_AWAY).await;
        if let (Some(home), Some(away)) = (home, away) {
            if teams.matches(&home, &away) {
                return Some(card);
            }
        }
    }
    None
}

async fn read_card(turn: &Turn<'_>, card: &Element) -> Result<LiveReading, ScrapeError> {
    let raw_score = turn
        .text_within(card, sel::LIVE_SCORE)
        .await
        .ok_or_else(|| ScrapeError::NotFound("live score".into()))?;
    let (home_score, away_score) =
        parse_score(&raw_score).ok_or_else(|| ScrapeError::parse("live score", &raw_score))?;

    let mut goals = Vec::new();
    let sides = turn.within(card, sel::LIVE_GOAL_SIDES).await;
    for (side, container) in [Side::Home, Side::Away].into_iter().zip(sides.iter()) {
        for raw in turn.texts_within(container, sel::LIVE_GOAL_MINUTE).await {
            let minute = normalize_minute(&raw);
            if !minute.is_empty() {
                goals.push((side, minute));
            }
        }
    }

    Ok(LiveReading {
        home_score,
        away_score,
        halftime: turn.text_within(card, sel::LIVE_HALFTIME_SCORE).await,
        status: turn.text_within(card, sel::LIVE_STATUS).await,
        goals,
    })
}

/// `"2 - 1"`, `"2:1"` or `"2-1"` → `(2, 1)`.
pub fn parse_score(raw: &str) -> Option<(u32, u32)> {
    let nums: Vec<u32> = raw
        .split(|c: char| !c.is_ascii_digit())
        .filter(|p| !p.is_empty())
        .map(|p| p.parse().ok())
        .collect::<Option<Vec<u32>>>()?;
    match nums.as_slice() {
        [home, away] => Some((*home, *away)),
        _ => None,
    }
}

/// `"23'"` → `"23"`, `" 45+2' "` → `"45+2"`.
pub fn normalize_minute(raw: &str) -> String {
    raw.trim()
        .trim_end_matches(&['\'', '’'][..])
        .trim()
        .to_string()
}
