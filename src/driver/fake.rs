//! Scripted in-memory page used by task and coordinator tests.
//!
//! The DOM is a tree of `(parent, selector) → children` edges; a selector only
//! matches the exact string it was registered under. Every tab and league is
//! visible at once, so `Turn::ensure` only needs the logos and tab buttons.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::page::{Connector, Element, PageDriver};
use super::selectors as sel;
use crate::error::DriverError;

#[derive(Default)]
struct Dom {
    next_id: u64,
    children: HashMap<(String, String), Vec<Element>>,
    text: HashMap<String, String>,
    attrs: HashMap<(String, String), String>,
    clicks: Vec<String>,
    navigations: Vec<String>,
    dead: bool,
    fail_navigate: bool,
    closed: bool,
}

#[derive(Default)]
pub struct FakePage {
    dom: Mutex<Dom>,
}

pub struct Market<'a> {
    pub class: &'a str,
    pub options: &'a [(&'a str, &'a str)],
}

pub struct LiveMatch<'a> {
    pub home: &'a str,
    pub away: &'a str,
    pub score: &'a str,
    pub home_goals: &'a [&'a str],
    pub away_goals: &'a [&'a str],
    pub halftime: Option<&'a str>,
    pub status: Option<&'a str>,
}

impl FakePage {
    pub fn new() -> Arc<Self> {
        Arc::new(FakePage::default())
    }

    /// Page with league logos and tab buttons in place.
    pub fn with_layout(leagues: &[&str]) -> Arc<Self> {
        let page = FakePage::new();
        let root = Self::root();
        for name in leagues {
            page.add(&root, sel::LEAGUE_LOGO, name);
        }
        for tab in [
            sel::TAB_MATCHDAY,
            sel::TAB_LIVE,
            sel::TAB_RESULTS,
            sel::TAB_STANDINGS,
        ] {
            page.add(&root, tab, tab);
        }
        page
    }

    pub fn root() -> Element {
        Element::new("root")
    }

    pub fn add(&self, parent: &Element, selector: &str, text: &str) -> Element {
        let mut dom = self.dom.lock();
        dom.next_id += 1;
        let el = Element::new(format!("e{}", dom.next_id));
        dom.text.insert(el.id().to_string(), text.to_string());
        dom.children
            .entry((parent.id().to_string(), selector.to_string()))
            .or_default()
            .push(el.clone());
        el
    }

    pub fn set_attr(&self, el: &Element, name: &str, value: &str) {
        self.dom
            .lock()
            .attrs
            .insert((el.id().to_string(), name.to_string()), value.to_string());
    }

    pub fn set_text(&self, el: &Element, text: &str) {
        self.dom.lock().text.insert(el.id().to_string(), text.to_string());
    }

    /// Drop every element registered under `selector` at `parent`.
    pub fn clear(&self, parent: &Element, selector: &str) {
        self.dom
            .lock()
            .children
            .remove(&(parent.id().to_string(), selector.to_string()));
    }

    pub fn clicks(&self) -> Vec<String> {
        self.dom.lock().clicks.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.dom.lock().navigations.clone()
    }

    pub fn set_dead(&self, dead: bool) {
        self.dom.lock().dead = dead;
    }

    pub fn fail_navigation(&self, fail: bool) {
        self.dom.lock().fail_navigate = fail;
    }

    pub fn is_closed(&self) -> bool {
        self.dom.lock().closed
    }

    // ── Page fixtures ─────────────────────────────────────────────────────────

    /// Replace the countdown row with one slot per entry.
    pub fn set_timers(&self, values: &[&str]) {
        let root = Self::root();
        self.clear(&root, sel::TIMER_SLOT);
        for v in values {
            self.add(&root, sel::TIMER_SLOT, v);
        }
    }

    /// Append one matchday game card with its odds markets.
    pub fn add_game(&self, home: &str, away: &str, markets: &[Market<'_>]) -> Element {
        let root = Self::root();
        let game = self.add(&root, sel::GAME_CONTAINER, "");
        self.add(&game, sel::TEAM_NAMES, home);
        self.add(&game, sel::TEAM_NAMES, away);
        let odds = self.add(&game, sel::ODDS_CONTAINER, "");
        for market in markets {
            let section = self.add(&odds, sel::ODDS_SECTION, "");
            self.set_attr(&section, "class", &format!("o {}", market.class));
            for (label, price) in market.options {
                let button = self.add(&section, sel::ODDS_BUTTON, "");
                self.add(&button, sel::ODDS_LABEL, label);
                self.add(&button, sel::ODDS_PRICE, price);
            }
        }
        game
    }

    pub fn clear_games(&self) {
        self.clear(&Self::root(), sel::GAME_CONTAINER);
    }

    pub fn add_live_match(&self, m: &LiveMatch<'_>) -> Element {
        let root = Self::root();
        let el = self.add(&root, sel::LIVE_MATCH, "");
        self.add(&el, sel::LIVE_TEAM_HOME, m.home);
        self.add(&el, sel::LIVE_TEAM_AWAY, m.away);
        self.add(&el, sel::LIVE_SCORE, m.score);
        let home_side = self.add(&el, sel::LIVE_GOAL_SIDES, "");
        for g in m.home_goals {
            self.add(&home_side, sel::LIVE_GOAL_MINUTE, g);
        }
        let away_side = self.add(&el, sel::LIVE_GOAL_SIDES, "");
        for g in m.away_goals {
            self.add(&away_side, sel::LIVE_GOAL_MINUTE, g);
        }
        if let Some(ht) = m.halftime {
            self.add(&el, sel::LIVE_HALFTIME_SCORE, ht);
        }
        if let Some(status) = m.status {
            self.add(&el, sel::LIVE_STATUS, status);
        }
        el
    }

    pub fn clear_live(&self) {
        self.clear(&Self::root(), sel::LIVE_MATCH);
    }

    /// One results block: `(home, away, home_score, away_score)` per game.
    pub fn add_results_block(&self, title: &str, time: &str, games: &[(&str, &str, &str, &str)]) {
        let root = Self::root();
        let block = self.add(&root, sel::RESULTS_CONTAINER, "");
        self.add(&block, sel::RESULTS_TITLE, title);
        self.add(&block, sel::RESULTS_TIME, time);
        for (home, away, hs, aws) in games {
            let game = self.add(&block, sel::RESULTS_MATCH, "");
            self.add(&game, sel::RESULTS_TEAM, home);
            self.add(&game, sel::RESULTS_TEAM, away);
            self.add(&game, sel::RESULTS_SCORE, hs);
            self.add(&game, sel::RESULTS_SCORE, aws);
        }
    }

    /// Standings table: `(position, team, points, form)` per row.
    pub fn set_standings(&self, title: &str, rows: &[(&str, &str, &str, &[&str])]) {
        let root = Self::root();
        self.clear(&root, sel::STANDINGS_CONTAINER);
        let table = self.add(&root, sel::STANDINGS_CONTAINER, "");
        self.add(&table, sel::STANDINGS_TITLE, title);
        for (pos, team, pts, form) in rows {
            let row = self.add(&table, sel::STANDINGS_ROW, "");
            self.add(&row, sel::STANDINGS_CELL, pos);
            self.add(&row, sel::STANDINGS_CELL, team);
            self.add(&row, sel::STANDINGS_CELL, pts);
            let form_cell = self.add(&row, sel::STANDINGS_CELL, "");
            for f in *form {
                self.add(&form_cell, sel::STANDINGS_FORM, f);
            }
        }
    }

    fn lookup(&self, parent: &str, selector: &str) -> Vec<Element> {
        let dom = self.dom.lock();
        if dom.dead {
            return Vec::new();
        }
        dom.children
            .get(&(parent.to_string(), selector.to_string()))
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl PageDriver for FakePage {
    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        let mut dom = self.dom.lock();
        if dom.dead || dom.fail_navigate {
            return Err(DriverError::SessionLost);
        }
        dom.navigations.push(url.to_string());
        Ok(())
    }

    async fn find_one(&self, selector: &str, _timeout: Duration) -> Option<Element> {
        self.lookup("root", selector).into_iter().next()
    }

    async fn find_all(&self, selector: &str, _timeout: Duration) -> Vec<Element> {
        self.lookup("root", selector)
    }

    async fn find_within(&self, parent: &Element, selector: &str) -> Vec<Element> {
        self.lookup(parent.id(), selector)
    }

    async fn text(&self, element: &Element) -> Option<String> {
        let dom = self.dom.lock();
        if dom.dead {
            return None;
        }
        dom.text.get(element.id()).cloned()
    }

    async fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        self.dom
            .lock()
            .attrs
            .get(&(element.id().to_string(), name.to_string()))
            .cloned()
    }

    async fn click(&self, element: &Element) -> bool {
        let mut dom = self.dom.lock();
        if dom.dead {
            return false;
        }
        let label = dom.text.get(element.id()).cloned().unwrap_or_default();
        dom.clicks.push(label);
        true
    }

    async fn refresh(&self) -> bool {
        !self.dom.lock().dead
    }

    async fn is_alive(&self) -> bool {
        !self.dom.lock().dead
    }

    async fn close(&self) {
        self.dom.lock().closed = true;
    }

    fn name(&self) -> &str {
        "fake"
    }
}

/// Hands out pre-built pages in order; fails once they run out.
pub struct FakeConnector {
    pages: Mutex<Vec<Arc<FakePage>>>,
    pub attempts: Mutex<usize>,
}

impl FakeConnector {
    pub fn new(mut pages: Vec<Arc<FakePage>>) -> Self {
        pages.reverse();
        FakeConnector {
            pages: Mutex::new(pages),
            attempts: Mutex::new(0),
        }
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self) -> Result<Arc<dyn PageDriver>, DriverError> {
        *self.attempts.lock() += 1;
        match self.pages.lock().pop() {
            Some(page) => Ok(page as Arc<dyn PageDriver>),
            None => Err(DriverError::Protocol("no browser available".into())),
        }
    }
}
