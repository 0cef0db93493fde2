use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ScrapeError;
use crate::timer::PhaseSignal;

/// Lifecycle of a single match, declared in lifecycle order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchState {
    NotStarted,
    Matchday,
    PreLive,
    Live,
    Finished,
    Validated,
}

impl MatchState {
    pub fn as_str(self) -> &'static str {
        match self {
            MatchState::NotStarted => "NOT_STARTED",
            MatchState::Matchday => "MATCHDAY",
            MatchState::PreLive => "PRE_LIVE",
            MatchState::Live => "LIVE",
            MatchState::Finished => "FINISHED",
            MatchState::Validated => "VALIDATED",
        }
    }

    /// States a match may move to `self` from. A match first seen inside the
    /// pre-live window goes straight from NOT_STARTED to PRE_LIVE; every
    /// other step has exactly one predecessor.
    pub fn predecessors(self) -> &'static [MatchState] {
        match self {
            MatchState::NotStarted => &[],
            MatchState::Matchday => &[MatchState::NotStarted],
            MatchState::PreLive => &[MatchState::NotStarted, MatchState::Matchday],
            MatchState::Live => &[MatchState::PreLive],
            MatchState::Finished => &[MatchState::Live],
            MatchState::Validated => &[MatchState::Finished],
        }
    }

    /// Odds may only be captured before the match leaves the matchday phase.
    pub fn accepts_odds(self) -> bool {
        matches!(self, MatchState::NotStarted | MatchState::Matchday)
    }

    pub fn accepts_goals(self) -> bool {
        self == MatchState::Live
    }

    /// Past this point the slot index no longer identifies the match.
    pub fn is_detached_from_slot(self) -> bool {
        self >= MatchState::Live
    }
}

impl fmt::Display for MatchState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Home/away team names as shown on the page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Teams {
    pub home: String,
    pub away: String,
}

impl Teams {
    pub fn new(home: impl Into<String>, away: impl Into<String>) -> Self {
        Teams {
            home: home.into(),
            away: away.into(),
        }
    }

    /// Case- and whitespace-insensitive comparison against names read from
    /// another view of the page.
    pub fn matches(&self, home: &str, away: &str) -> bool {
        normalize_name(&self.home) == normalize_name(home)
            && normalize_name(&self.away) == normalize_name(away)
    }
}

impl fmt::Display for Teams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.home, self.away)
    }
}

pub fn normalize_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// One match tracked by a league coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub match_id: String,
    pub league: String,
    /// Slot the match was first observed in. Only meaningful before LIVE.
    pub slot: usize,
    pub home_team: Option<String>,
    pub away_team: Option<String>,
    pub state: MatchState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MatchRecord {
    pub fn new(match_id: impl Into<String>, league: impl Into<String>, slot: usize) -> Self {
        let now = Utc::now();
        MatchRecord {
            match_id: match_id.into(),
            league: league.into(),
            slot,
            home_team: None,
            away_team: None,
            state: MatchState::NotStarted,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` if the current state is one of its predecessors.
    /// Returns the previous state on success.
    pub fn advance(&mut self, next: MatchState) -> Option<MatchState> {
        if !next.predecessors().contains(&self.state) {
            return None;
        }
        let prev = self.state;
        self.state = next;
        self.updated_at = Utc::now();
        Some(prev)
    }

    /// Team names are write-once. Returns false if they were already set.
    pub fn set_teams(&mut self, teams: &Teams) -> bool {
        if self.home_team.is_some() && self.away_team.is_some() {
            return false;
        }
        self.home_team = Some(teams.home.clone());
        self.away_team = Some(teams.away.clone());
        self.updated_at = Utc::now();
        true
    }

    pub fn teams(&self) -> Option<Teams> {
        match (&self.home_team, &self.away_team) {
            (Some(home), Some(away)) => Some(Teams::new(home.clone(), away.clone())),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsOption {
    pub label: String,
    pub price: f64,
}

/// Prices of one market for one match at one instant. Never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OddsSnapshot {
    pub match_id: String,
    /// e.g. "1X2", "GG/NG"
    pub market_type: String,
    /// Outcome label → decimal price, in page order
    pub options: Vec<OddsOption>,
    pub captured_at: DateTime<Utc>,
}

impl OddsSnapshot {
    pub fn new(
        match_id: &str,
        market_type: &str,
        options: Vec<OddsOption>,
    ) -> Result<Self, ScrapeError> {
        if match_id.is_empty() {
            return Err(ScrapeError::Missing {
                record: "OddsSnapshot",
                field: "match_id",
            });
        }
        if options.is_empty() {
            return Err(ScrapeError::Missing {
                record: "OddsSnapshot",
                field: "options",
            });
        }
        Ok(OddsSnapshot {
            match_id: match_id.to_string(),
            market_type: market_type.to_string(),
            options,
            captured_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Home => f.write_str("home"),
            Side::Away => f.write_str("away"),
        }
    }
}

/// A goal as reported by the site. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoalEvent {
    pub match_id: String,
    pub team: Side,
    /// Site-reported minute, normalised ("23'" → "23")
    pub minute: String,
    pub recorded_at: DateTime<Utc>,
}

impl GoalEvent {
    pub fn new(match_id: &str, team: Side, minute: &str) -> Result<Self, ScrapeError> {
        if minute.is_empty() {
            return Err(ScrapeError::Missing {
                record: "GoalEvent",
                field: "minute",
            });
        }
        Ok(GoalEvent {
            match_id: match_id.to_string(),
            team,
            minute: minute.to_string(),
            recorded_at: Utc::now(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LivePhase {
    FirstHalf,
    HalfTime,
    SecondHalf,
    FullTime,
}

/// Latest in-play state of a match, upserted on every live poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub match_id: String,
    pub league: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    pub halftime_score: Option<String>,
    pub phase: LivePhase,
    pub goals_recorded: usize,
    pub updated_at: DateTime<Utc>,
}

/// Settled result read from the results view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub match_id: String,
    pub league: String,
    pub week: String,
    pub match_time: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: u32,
    pub away_score: u32,
    /// Whether the score agrees with the last live score seen
    pub validated: bool,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingsEntry {
    pub position: u32,
    pub team: String,
    pub points: i32,
    /// e.g. ["W", "D", "L", "W", "W"]
    pub form: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandingsSnapshot {
    pub league: String,
    pub season_label: String,
    pub entries: Vec<StandingsEntry>,
    pub captured_at: DateTime<Utc>,
}

impl StandingsSnapshot {
    pub fn new(
        league: &str,
        season_label: &str,
        entries: Vec<StandingsEntry>,
    ) -> Result<Self, ScrapeError> {
        if entries.is_empty() {
            return Err(ScrapeError::Missing {
                record: "StandingsSnapshot",
                field: "entries",
            });
        }
        Ok(StandingsSnapshot {
            league: league.to_string(),
            season_label: season_label.to_string(),
            entries,
            captured_at: Utc::now(),
        })
    }
}

/// A countdown reading that caused a phase decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerReading {
    pub league: String,
    pub slot: usize,
    pub raw: String,
    pub signal: PhaseSignal,
    pub recorded_at: DateTime<Utc>,
}
