use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::pause;
use super::{inc, TaskContext, TaskEvent};
use crate::driver::{selectors as sel, Tab};
use crate::error::ScrapeError;
use crate::store::models::{LiveState, ResultRecord, Teams};
use crate::store::Collection;
use crate::tasks::live::parse_score;

#[derive(Debug, Clone)]
pub struct ResultsTiming {
    pub attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ResultsTiming {
    fn default() -> Self {
        ResultsTiming {
            attempts: 3,
            retry_delay: Duration::from_secs(5),
        }
    }
}

impl ResultsTiming {
    /// Long enough for one scan plus its retry pause.
    pub fn stop_timeout(&self) -> Duration {
        self.retry_delay * 2
    }
}

/// A finished match as listed in the results view.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub week: String,
    pub match_time: String,
    pub home_score: u32,
    pub away_score: u32,
}

/// One-shot: find the match in the results view, store the settled score,
/// and compare it with the last live score.
pub struct ResultsTask {
    ctx: TaskContext,
    league: String,
    match_id: String,
    teams: Teams,
    timing: ResultsTiming,
}

impl ResultsTask {
    pub fn new(
        ctx: TaskContext,
        league: &str,
        match_id: &str,
        teams: Teams,
        timing: ResultsTiming,
    ) -> Self {
        ResultsTask {
            ctx,
            league: league.to_string(),
            match_id: match_id.to_string(),
            teams,
            timing,
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        for attempt in 1..=self.timing.attempts {
            if cancel.is_cancelled() {
                return;
            }
            match self.scan().await {
                Ok(Some(entry)) => {
                    let validated = self.persist(&entry);
                    self.ctx.report(TaskEvent::ResultsDone {
                        league: self.league.clone(),
                        match_id: self.match_id.clone(),
                        validated,
                    });
                    return;
                }
                Ok(None) => debug!(
                    "[{}] {} not in results yet (attempt {}/{})",
                    self.league, self.teams, attempt, self.timing.attempts
                ),
                Err(e) => {
                    if matches!(e, ScrapeError::Navigation(_)) {
                        inc(&self.ctx.metrics.navigation_failures);
                    }
                    warn!(
                        "[{}] Results scan failed for {} (attempt {}/{}): {}",
                        self.league, self.match_id, attempt, self.timing.attempts, e
                    );
                }
            }
            if attempt < self.timing.attempts && !pause(self.timing.retry_delay, &cancel).await {
                return;
            }
        }

        inc(&self.ctx.metrics.results_failed);
        warn!(
            "[{}] ❌ No result found for {} ({}) after {} attempts",
            self.league, self.match_id, self.teams, self.timing.attempts
        );
        self.ctx.report(TaskEvent::ResultsFailed {
            league: self.league.clone(),
            match_id: self.match_id.clone(),
        });
    }

    async fn scan(&self) -> Result<Option<ResultEntry>, ScrapeError> {
        let mut turn = self.ctx.session.turn().await;
        turn.ensure(&self.league, Tab::Results).await?;

        for block in turn.find_all(sel::RESULTS_CONTAINER).await {
            let title = turn.text_within(&block, sel::RESULTS_TITLE).await.unwrap_or_default();
            let time = turn.text_within(&block, sel::RESULTS_TIME).await.unwrap_or_default();

            for game in turn.within(&block, sel::RESULTS_MATCH).await {
                let names = turn.texts_within(&game, sel::RESULTS_TEAM).await;
                let [home, away, ..] = names.as_slice() else {
                    continue;
                };
                if !self.teams.matches(home, away) {
                    continue;
                }
                let scores = turn.texts_within(&game, sel::RESULTS_SCORE).await;
                let (home_score, away_score) = parse_result_score(&scores)
                    .ok_or_else(|| ScrapeError::parse("result score", scores.join(" ")))?;
                return Ok(Some(ResultEntry {
                    week: parse_week(&title),
                    match_time: time,
                    home_score,
                    away_score,
                }));
            }
        }
        Ok(None)
    }

    /// Store the result; returns whether it agrees with the live score.
    fn persist(&self, entry: &ResultEntry) -> bool {
        let live: Option<LiveState> = self.ctx.store.get_as(Collection::Live, &self.match_id);
        let validated = match &live {
            Some(l) => (l.home_score, l.away_score) == (entry.home_score, entry.away_score),
            None => false,
        };

        match &live {
            Some(l) if !validated => {
                inc(&self.ctx.metrics.validation_mismatches);
                warn!(
                    "[{}] ⚠️ Result mismatch for {}: live {}-{}, results {}-{}",
                    self.league,
                    self.match_id,
                    l.home_score,
                    l.away_score,
                    entry.home_score,
                    entry.away_score
                );
            }
            None => warn!(
                "[{}] No live score for {}, result stored unvalidated",
                self.league, self.match_id
            ),
            _ => {}
        }

        // Scores are written once; a later scan may only revise `validated`.
        let existing = self.ctx.store.get(Collection::Results, &self.match_id);
        let written = if existing.is_some() {
            self.ctx
                .store
                .upsert(Collection::Results, &self.match_id, &json!({ "validated": validated }))
        } else {
            let record = ResultRecord {
                match_id: self.match_id.clone(),
                league: self.league.clone(),
                week: entry.week.clone(),
                match_time: entry.match_time.clone(),
                home_team: self.teams.home.clone(),
                away_team: self.teams.away.clone(),
                home_score: entry.home_score,
                away_score: entry.away_score,
                validated,
                recorded_at: Utc::now(),
            };
            self.ctx
                .store
                .upsert(Collection::Results, &self.match_id, &record)
        };

        match written {
            Ok(()) => {
                inc(&self.ctx.metrics.results_written);
                info!(
                    "[{}] 📊 Result {} {}-{} {} ({}, validated: {})",
                    self.league,
                    self.teams.home,
                    entry.home_score,
                    entry.away_score,
                    self.teams.away,
                    entry.week,
                    validated
                );
            }
            Err(_) => inc(&self.ctx.metrics.store_write_errors),
        }
        validated
    }
}

/// Either two score cells (`["2", "1"]`) or one combined cell (`["2 - 1"]`).
fn parse_result_score(cells: &[String]) -> Option<(u32, u32)> {
    match cells {
        [single] => parse_score(single),
        [home, away, ..] => Some((home.trim().parse().ok()?, away.trim().parse().ok()?)),
        [] => None,
    }
}

/// `"English League WEEK 16 - #2031"` → `"WEEK 16"`; falls back to the title.
pub fn parse_week(title: &str) -> String {
    let upper = title.to_uppercase();
    if let Some(idx) = upper.find("WEEK") {
        let digits: String = upper[idx + 4..]
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if !digits.is_empty() {
            return format!("WEEK {}", digits);
        }
    }
    title.trim().to_string()
}
