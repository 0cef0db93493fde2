//! Pre-match odds scraping for one match slot.
//!
//! The task refreshes faster as kick-off approaches and backs off while the
//! page keeps showing exactly the same data. Writes are gated on the match
//! state it is handed: once the coordinator moves the match past MATCHDAY,
//! no further snapshot is written even if a cycle was already in flight.

use std::time::Duration;

use sha2::{Digest, Sha256};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::{pause, with_retry};
use super::{inc, TaskContext};
use crate::driver::{selectors as sel, Element, Tab, Turn};
use crate::error::ScrapeError;
use crate::store::models::{MatchState, OddsOption, OddsSnapshot, Teams};
use crate::store::Collection;
use crate::timer::{PhaseSignal, TimerWatcher};

#[derive(Debug, Clone)]
pub struct MatchdayTiming {
    /// Countdown below which the fastest tier applies
    pub start_threshold_secs: u32,
    /// Countdown above which the slowest tier applies
    pub far_threshold_secs: u32,
    pub far_interval: Duration,
    pub mid_interval: Duration,
    pub near_interval: Duration,
    /// Cap for the duplicate back-off
    pub max_interval: Duration,
    pub backoff_factor: f64,
    pub retries: u32,
    pub retry_base: Duration,
    pub stop_timeout: Duration,
}

impl Default for MatchdayTiming {
    fn default() -> Self {
        MatchdayTiming {
            start_threshold_secs: 60,
            far_threshold_secs: 300,
            far_interval: Duration::from_secs(10),
            mid_interval: Duration::from_secs(5),
            near_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(30),
            backoff_factor: 1.5,
            retries: 2,
            retry_base: Duration::from_millis(500),
            stop_timeout: Duration::from_secs(20),
        }
    }
}

impl MatchdayTiming {
    /// Base refresh interval for the given countdown.
    pub fn base_interval(&self, signal: PhaseSignal) -> Duration {
        match signal {
            PhaseSignal::Countdown(s) if s > self.far_threshold_secs => self.far_interval,
            PhaseSignal::Countdown(s) if s > self.start_threshold_secs => self.mid_interval,
            _ => self.near_interval,
        }
    }

    fn backed_off(&self, current: Duration) -> Duration {
        current.mul_f64(self.backoff_factor).min(self.max_interval)
    }
}

/// Everything one cycle read off the game card.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchdayScrape {
    pub teams: Teams,
    pub timer: String,
    pub countdown: PhaseSignal,
    pub markets: Vec<(String, Vec<OddsOption>)>,
}

impl MatchdayScrape {
    /// SHA-256 over team names, timer text and every market's prices.
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.teams.home.as_bytes());
        hasher.update([0]);
        hasher.update(self.teams.away.as_bytes());
        hasher.update([0]);
        hasher.update(self.timer.as_bytes());
        for (market, options) in &self.markets {
            hasher.update([1]);
            hasher.update(market.as_bytes());
            for opt in options {
                hasher.update([0]);
                hasher.update(opt.label.as_bytes());
                hasher.update(opt.price.to_bits().to_le_bytes());
            }
        }
        hex::encode(hasher.finalize())
    }
}

pub struct MatchdayTask {
    ctx: TaskContext,
    league: String,
    slot: usize,
    match_id: String,
    timing: MatchdayTiming,
    state: watch::Receiver<MatchState>,
    teams: watch::Sender<Option<Teams>>,
}

impl MatchdayTask {
    pub fn new(
        ctx: TaskContext,
        league: &str,
        slot: usize,
        match_id: &str,
        timing: MatchdayTiming,
        state: watch::Receiver<MatchState>,
        teams: watch::Sender<Option<Teams>>,
    ) -> Self {
        MatchdayTask {
            ctx,
            league: league.to_string(),
            slot,
            match_id: match_id.to_string(),
            timing,
            state,
            teams,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!(
            "[{}] 📋 Matchday scraping started for {} (slot {})",
            self.league, self.match_id, self.slot
        );
        let mut interval = self.timing.near_interval;
        let mut last_hash: Option<String> = None;

        while !cancel.is_cancelled() {
            let (outcome, retries) = with_retry(
                self.timing.retries,
                self.timing.retry_base,
                &cancel,
                || self.extract(),
            )
            .await;
            for _ in 0..retries {
                inc(&self.ctx.metrics.odds_retries);
            }

            match outcome {
                Ok(scrape) => {
                    inc(&self.ctx.metrics.odds_cycles);
                    self.publish_teams(&scrape.teams);
                    let base = self.timing.base_interval(scrape.countdown);
                    let hash = scrape.content_hash();

                    if last_hash.as_deref() == Some(hash.as_str()) {
                        inc(&self.ctx.metrics.odds_duplicates);
                        interval = self.timing.backed_off(interval.max(base));
                        debug!(
                            "[{}] {} odds unchanged, next check in {:?}",
                            self.league, self.match_id, interval
                        );
                    } else {
                        if cancel.is_cancelled() || !self.state.borrow().accepts_odds() {
                            break;
                        }
                        self.persist(&scrape);
                        last_hash = Some(hash);
                        interval = base;
                    }
                }
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    inc(&self.ctx.metrics.odds_failed_cycles);
                    warn!(
                        "[{}] Odds cycle failed for {} after {} retries: {}",
                        self.league, self.match_id, retries, e
                    );
                }
            }

            if !pause(interval, &cancel).await {
                break;
            }
        }
        info!("[{}] Matchday scraping ended for {}", self.league, self.match_id);
    }

    fn publish_teams(&self, teams: &Teams) {
        self.teams.send_if_modified(|current| {
            if current.as_ref() == Some(teams) {
                return false;
            }
            *current = Some(teams.clone());
            true
        });
    }

    fn persist(&self, scrape: &MatchdayScrape) {
        for (market, options) in &scrape.markets {
            let snapshot = match OddsSnapshot::new(&self.match_id, market, options.clone()) {
                Ok(s) => s,
                Err(e) => {
                    debug!("[{}] skipping market {}: {}", self.league, market, e);
                    continue;
                }
            };
            match self.ctx.store.append(Collection::Odds, &snapshot) {
                Ok(()) => inc(&self.ctx.metrics.odds_written),
                Err(_) => inc(&self.ctx.metrics.store_write_errors),
            }
        }
        debug!(
            "[{}] Saved {} market(s) for {} ({})",
            self.league,
            scrape.markets.len(),
            self.match_id,
            scrape.teams
        );
    }

    async fn extract(&self) -> Result<MatchdayScrape, ScrapeError> {
        let mut turn = self.ctx.session.turn().await;
        turn.ensure(&self.league, Tab::Matchday).await?;

        let (raw_timer, countdown) = TimerWatcher::read_phase(&turn, self.slot).await;
        let game = game_card(&turn, self.slot).await?;
        let teams = read_card_teams(&turn, &game).await?;
        let markets = read_markets(&turn, &game).await;
        if markets.is_empty() {
            return Err(ScrapeError::NotFound(format!("odds for {}", teams)));
        }

        Ok(MatchdayScrape {
            teams,
            timer: raw_timer.unwrap_or_default(),
            countdown,
            markets,
        })
    }
}

async fn game_card(turn: &Turn<'_>, slot: usize) -> Result<Element, ScrapeError> {
    turn.find_all(sel::GAME_CONTAINER)
        .await
        .into_iter()
        .nth(slot)
        .ok_or_else(|| ScrapeError::NotFound(format!("game card for slot {}", slot)))
}

async fn read_card_teams(turn: &Turn<'_>, game: &Element) -> Result<Teams, ScrapeError> {
    let names = turn.texts_within(game, sel::TEAM_NAMES).await;
    match names.as_slice() {
        [home, away, ..] if !home.is_empty() && !away.is_empty() => Ok(Teams::new(home, away)),
        _ => Err(ScrapeError::Missing {
            record: "game card",
            field: "team names",
        }),
    }
}

/// One-shot read of the team names shown in `slot`, for matches first seen
/// after their odds window.
pub async fn read_teams(turn: &mut Turn<'_>, league: &str, slot: usize) -> Result<Teams, ScrapeError> {
    turn.ensure(league, Tab::Matchday).await?;
    let game = game_card(turn, slot).await?;
    read_card_teams(turn, &game).await
}

async fn read_markets(turn: &Turn<'_>, game: &Element) -> Vec<(String, Vec<OddsOption>)> {
    let mut markets = Vec::new();
    let Some(odds) = turn.first_within(game, sel::ODDS_CONTAINER).await else {
        return markets;
    };

    for section in turn.within(&odds, sel::ODDS_SECTION).await {
        let market = market_type(
            turn.attribute(&section, "class").await.as_deref(),
            turn.attribute(&section, "data-market").await.as_deref(),
        );

        let mut options = Vec::new();
        for button in turn.within(&section, sel::ODDS_BUTTON).await {
            if turn.attribute(&button, "disabled").await.is_some() {
                continue;
            }
            let label = turn.text_within(&button, sel::ODDS_LABEL).await;
            let price = turn.text_within(&button, sel::ODDS_PRICE).await;
            if let (Some(label), Some(price)) = (label, price.as_deref().and_then(parse_price)) {
                options.push(OddsOption { label, price });
            }
        }
        if !options.is_empty() {
            markets.push((market, options));
        }
    }
    markets
}

/// Resolve a market section's name from its `mN` class, then `data-market`.
pub fn market_type(class: Option<&str>, data_market: Option<&str>) -> String {
    let from_class = class.and_then(|c| {
        c.split_whitespace().find_map(|token| match token {
            "m2" => Some("GG/NG"),
            "m3" => Some("1X2"),
            "m4" => Some("Over/Under"),
            "m5" => Some("Handicap"),
            "m6" => Some("Double Chance"),
            "m7" => Some("Draw No Bet"),
            "m8" => Some("Half Time/Full Time"),
            "m9" => Some("Correct Score"),
            "m10" => Some("Asian Handicap"),
            _ => None,
        })
    });
    match (from_class, data_market) {
        (Some(name), _) => name.to_string(),
        (None, Some(dm)) if !dm.trim().is_empty() => dm.trim().to_string(),
        _ => "Unknown".to_string(),
    }
}

/// Decimal (`1.85`) or fractional (`5/2` → 3.5) odds.
pub fn parse_price(raw: &str) -> Option<f64> {
    let raw = raw.trim();
    let price = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den == 0.0 {
                return None;
            }
            num / den + 1.0
        }
        None => raw.parse().ok()?,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}
