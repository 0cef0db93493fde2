use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{inc, TaskContext, TaskEvent};
use crate::driver::{selectors as sel, Element, Tab, Turn};
use crate::error::ScrapeError;
use crate::store::models::{StandingsEntry, StandingsSnapshot};
use crate::store::Collection;

pub const STANDINGS_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// One-shot capture of a league table.
pub struct StandingsTask {
    ctx: TaskContext,
    league: String,
}

impl StandingsTask {
    pub fn new(ctx: TaskContext, league: &str) -> Self {
        StandingsTask {
            ctx,
            league: league.to_string(),
        }
    }

    pub async fn run(self, cancel: CancellationToken) {
        let ok = match self.scrape().await {
            Ok(snapshot) if !cancel.is_cancelled() => {
                match self.ctx.store.append(Collection::Standings, &snapshot) {
                    Ok(()) => {
                        inc(&self.ctx.metrics.standings_written);
                        info!(
                            "[{}] 🏆 Standings saved: {} team(s), leader {}",
                            self.league,
                            snapshot.entries.len(),
                            snapshot.entries[0].team
                        );
                        true
                    }
                    Err(_) => {
                        inc(&self.ctx.metrics.store_write_errors);
                        false
                    }
                }
            }
            Ok(_) => return,
            Err(e) => {
                inc(&self.ctx.metrics.standings_failed);
                if matches!(e, ScrapeError::Navigation(_)) {
                    inc(&self.ctx.metrics.navigation_failures);
                }
                warn!("[{}] Standings scrape failed: {}", self.league, e);
                false
            }
        };
        self.ctx.report(TaskEvent::StandingsDone {
            league: self.league.clone(),
            ok,
        });
    }

    async fn scrape(&self) -> Result<StandingsSnapshot, ScrapeError> {
        let mut turn = self.ctx.session.turn().await;
        turn.ensure(&self.league, Tab::Standings).await?;

        let table = turn
            .find_one(sel::STANDINGS_CONTAINER)
            .await
            .ok_or_else(|| ScrapeError::NotFound("standings table".into()))?;
        let title = turn
            .text_within(&table, sel::STANDINGS_TITLE)
            .await
            .unwrap_or_default();

        let mut entries = Vec::new();
        for row in turn.within(&table, sel::STANDINGS_ROW).await {
            if let Some(entry) = read_row(&turn, &row).await {
                entries.push(entry);
            }
        }
        StandingsSnapshot::new(&self.league, &title, entries)
    }
}

/// Row layout is `position | team | … | points | form`. Points is the last
/// numeric cell before the form cell, so extra stat columns are tolerated.
async fn read_row(turn: &Turn<'_>, row: &Element) -> Option<StandingsEntry> {
    let cells = turn.within(row, sel::STANDINGS_CELL).await;
    if cells.len() < 3 {
        return None;
    }

    let position: u32 = turn.text(&cells[0]).await?.trim_end_matches('.').parse().ok()?;
    let team = turn.text(&cells[1]).await.filter(|t| !t.is_empty())?;

    let mut form = Vec::new();
    let mut points = None;
    for cell in cells[2..].iter().rev() {
        let markers = turn.texts_within(cell, sel::STANDINGS_FORM).await;
        if form.is_empty() && !markers.is_empty() && points.is_none() {
            form = markers;
            continue;
        }
        if let Some(p) = turn.text(cell).await.and_then(|t| t.parse::<i32>().ok()) {
            points = Some(p);
            break;
        }
    }

    Some(StandingsEntry {
        position,
        team,
        points: points?,
        form,
    })
}
