//! Countdown reading and phase classification.
//!
//! Each league shows a row of countdown slots, one per upcoming match. The
//! watcher reads every slot on each tick, keeps a bounded history per slot,
//! and reports a [`Cue`] only when the classification of a slot changes from
//! the last one acted upon. Unchanged countdowns (`01:30`, `01:29`, …) are
//! recorded but not re-delivered.

use std::collections::{HashMap, VecDeque};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::driver::{selectors as sel, Element, Turn};
use crate::store::models::TimerReading;
use crate::store::{Collection, Store};

/// Readings kept in memory per slot.
pub const HISTORY_LIMIT: usize = 256;

/// What one countdown slot says right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PhaseSignal {
    /// Seconds left before kick-off
    Countdown(u32),
    Live,
    /// Nothing readable this tick
    Unknown,
}

impl PhaseSignal {
    /// Parse countdown text (`MM:SS`, `HH:MM:SS` or bare seconds). Blank text
    /// is a slot that has not rendered yet and says nothing. Any other text,
    /// such as the site's "LIVE" badge, means the countdown has run out.
    pub fn parse(raw: &str) -> PhaseSignal {
        let text = raw.trim();
        if text.is_empty() {
            return PhaseSignal::Unknown;
        }
        match parse_countdown(text) {
            Some(secs) => PhaseSignal::Countdown(secs),
            None => PhaseSignal::Live,
        }
    }
}

impl fmt::Display for PhaseSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseSignal::Countdown(s) => write!(f, "{:02}:{:02}", s / 60, s % 60),
            PhaseSignal::Live => f.write_str("LIVE"),
            PhaseSignal::Unknown => f.write_str("UNKNOWN"),
        }
    }
}

fn parse_countdown(text: &str) -> Option<u32> {
    if text.is_empty() {
        return None;
    }
    let parts: Vec<&str> = text.split(':').collect();
    let nums: Option<Vec<u32>> = parts.iter().map(|p| p.trim().parse::<u32>().ok()).collect();
    let nums = nums?;
    match nums.as_slice() {
        [s] => Some(*s),
        [m, s] if *s < 60 => Some(m * 60 + s),
        [h, m, s] if *m < 60 && *s < 60 => Some(h * 3600 + m * 60 + s),
        _ => None,
    }
}

/// Which lifecycle step a signal calls for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Cue {
    /// Countdown above the stop threshold: odds may be scraped
    Matchday,
    /// Countdown at or below the stop threshold: odds scraping must cease
    PreLive,
    Live,
}

/// Countdown boundaries, in seconds. Expected to satisfy
/// `live < matchday_stop < matchday_start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Thresholds {
    pub matchday_start: u32,
    pub matchday_stop: u32,
    pub live: u32,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            matchday_start: 60,
            matchday_stop: 10,
            live: 5,
        }
    }
}

impl Thresholds {
    pub fn classify(&self, signal: PhaseSignal) -> Option<Cue> {
        match signal {
            PhaseSignal::Unknown => None,
            PhaseSignal::Live => Some(Cue::Live),
            PhaseSignal::Countdown(s) if s <= self.live => Some(Cue::Live),
            PhaseSignal::Countdown(s) if s <= self.matchday_stop => Some(Cue::PreLive),
            PhaseSignal::Countdown(_) => Some(Cue::Matchday),
        }
    }
}

/// One raw poll of one slot.
#[derive(Debug, Clone, Serialize)]
pub struct HistoryEntry {
    pub raw: Option<String>,
    pub signal: PhaseSignal,
    pub acted: bool,
    pub at: DateTime<Utc>,
}

/// A slot whose classification changed this tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub league: String,
    pub slot: usize,
    pub signal: PhaseSignal,
    pub cue: Cue,
}

pub struct TimerWatcher {
    thresholds: Thresholds,
    store: Store,
    history: HashMap<(String, usize), VecDeque<HistoryEntry>>,
    last_acted: HashMap<(String, usize), Cue>,
    polls: u64,
}

impl TimerWatcher {
    pub fn new(thresholds: Thresholds, store: Store) -> Self {
        TimerWatcher {
            thresholds,
            store,
            history: HashMap::new(),
            last_acted: HashMap::new(),
            polls: 0,
        }
    }

    /// Read one slot of the league the turn is currently showing.
    /// Never fails: an absent or unreadable slot is `Unknown`.
    pub async fn read_phase(turn: &Turn<'_>, slot: usize) -> (Option<String>, PhaseSignal) {
        let slots = turn.find_all(sel::TIMER_SLOT).await;
        match slots.get(slot) {
            Some(el) => Self::read_element(turn, el).await,
            None => (None, PhaseSignal::Unknown),
        }
    }

    async fn read_element(turn: &Turn<'_>, el: &Element) -> (Option<String>, PhaseSignal) {
        match turn.text(el).await {
            Some(raw) => {
                let signal = PhaseSignal::parse(&raw);
                (Some(raw), signal)
            }
            None => (None, PhaseSignal::Unknown),
        }
    }

    /// Read every countdown slot for `league` and return the slots whose
    /// classification changed.
    pub async fn poll_league(&mut self, turn: &Turn<'_>, league: &str) -> Vec<Observation> {
        let slots = turn.find_all(sel::TIMER_SLOT).await;
        if slots.is_empty() {
            debug!("[{}] no countdown slots visible", league);
        }
        let mut out = Vec::new();
        for (i, el) in slots.iter().enumerate() {
            let (raw, signal) = Self::read_element(turn, el).await;
            if let Some(obs) = self.observe(league, i, raw, signal) {
                out.push(obs);
            }
        }
        out
    }

    /// Record one reading and decide whether it is acted upon.
    pub fn observe(
        &mut self,
        league: &str,
        slot: usize,
        raw: Option<String>,
        signal: PhaseSignal,
    ) -> Option<Observation> {
        self.polls += 1;
        let key = (league.to_string(), slot);
        let cue = self.thresholds.classify(signal);
        let acted = match cue {
            Some(c) => self.last_acted.get(&key) != Some(&c),
            None => false,
        };

        let history = self.history.entry(key.clone()).or_default();
        if history.len() == HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(HistoryEntry {
            raw: raw.clone(),
            signal,
            acted,
            at: Utc::now(),
        });

        let cue = cue.filter(|_| acted)?;
        self.last_acted.insert(key, cue);

        let reading = TimerReading {
            league: league.to_string(),
            slot,
            raw: raw.unwrap_or_default(),
            signal,
            recorded_at: Utc::now(),
        };
        if let Err(e) = self.store.append(Collection::TimerReadings, &reading) {
            warn!("[{}] could not record timer reading: {}", league, e);
        }
        debug!("[{}] slot {} → {:?} ({})", league, slot, cue, signal);

        Some(Observation {
            league: league.to_string(),
            slot,
            signal,
            cue,
        })
    }

    /// Drop the last acted-upon cue for a slot so the next reading is
    /// delivered again even if it classifies the same.
    pub fn forget(&mut self, league: &str, slot: usize) {
        self.last_acted.remove(&(league.to_string(), slot));
    }

    #[cfg(test)]
    pub fn history(&self, league: &str, slot: usize) -> Vec<HistoryEntry> {
        self.history
            .get(&(league.to_string(), slot))
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Latest reading per slot, for the status report.
    pub fn latest(&self) -> Vec<(String, usize, HistoryEntry)> {
        let mut out: Vec<_> = self
            .history
            .iter()
            .filter_map(|((league, slot), h)| h.back().map(|e| (league.clone(), *slot, e.clone())))
            .collect();
        out.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));
        out
    }

    pub fn polls(&self) -> u64 {
        self.polls
    }
}
