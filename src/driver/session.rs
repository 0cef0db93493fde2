use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::page::{Connector, Element, PageDriver};
use super::selectors as sel;
use crate::config::League;
use crate::error::{DriverError, ScrapeError};
use crate::store::models::normalize_name;

/// Section of the page a task needs to be looking at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Tab {
    Matchday,
    Live,
    Results,
    Standings,
}

impl Tab {
    fn selector(self) -> &'static str {
        match self {
            Tab::Matchday => sel::TAB_MATCHDAY,
            Tab::Live => sel::TAB_LIVE,
            Tab::Results => sel::TAB_RESULTS,
            Tab::Standings => sel::TAB_STANDINGS,
        }
    }
}

impl fmt::Display for Tab {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What the browser is currently showing. `None` means "unknown, click again".
#[derive(Debug, Default)]
struct View {
    league: Option<String>,
    tab: Option<Tab>,
}

/// The single shared browser page.
///
/// Tasks never hold the page across a sleep: each scrape cycle takes a
/// [`Turn`], switches to the view it needs, performs its reads, and drops the
/// turn. The view is tracked so consecutive turns on the same view skip the
/// clicks.
pub struct Session {
    driver: RwLock<Arc<dyn PageDriver>>,
    view: Mutex<View>,
    target_url: String,
    league_names: HashMap<String, String>,
    element_timeout: Duration,
}

impl Session {
    pub fn new(
        driver: Arc<dyn PageDriver>,
        target_url: &str,
        leagues: &[League],
        element_timeout: Duration,
    ) -> Self {
        Session {
            driver: RwLock::new(driver),
            view: Mutex::new(View::default()),
            target_url: target_url.to_string(),
            league_names: leagues
                .iter()
                .map(|l| (l.id.clone(), l.name.clone()))
                .collect(),
            element_timeout,
        }
    }

    pub fn driver(&self) -> Arc<dyn PageDriver> {
        Arc::clone(&self.driver.read())
    }

    /// Load the target page and dismiss the roadblock popup if one shows.
    pub async fn open(&self) -> Result<(), DriverError> {
        let mut view = self.view.lock().await;
        *view = View::default();
        let driver = self.driver();
        driver.navigate(&self.target_url).await?;

        if let Some(close) = driver.find_one(sel::POPUP_CLOSE, self.element_timeout).await {
            if driver.click(&close).await {
                info!("Dismissed roadblock popup");
            }
        }
        Ok(())
    }

    /// Wait for exclusive use of the page for one bounded read sequence.
    pub async fn turn(&self) -> Turn<'_> {
        let view = self.view.lock().await;
        Turn {
            driver: self.driver(),
            view,
            session: self,
        }
    }

    pub async fn is_alive(&self) -> bool {
        self.driver().is_alive().await
    }

    /// Replace the browser with a fresh one from `connector` and reload.
    pub async fn reconnect(&self, connector: &dyn Connector) -> Result<(), DriverError> {
        let fresh = connector.connect().await?;
        let old = {
            let mut guard = self.driver.write();
            std::mem::replace(&mut *guard, fresh)
        };
        old.close().await;
        self.open().await
    }

    pub async fn close(&self) {
        let driver = self.driver();
        info!("Closing browser session ({})", driver.name());
        driver.close().await;
    }
}

/// Exclusive access to the page for one scrape cycle.
pub struct Turn<'a> {
    session: &'a Session,
    driver: Arc<dyn PageDriver>,
    view: MutexGuard<'a, View>,
}

impl Turn<'_> {
    /// Switch to `league`'s `tab` unless the page already shows it.
    pub async fn ensure(&mut self, league: &str, tab: Tab) -> Result<(), ScrapeError> {
        if self.view.league.as_deref() != Some(league) {
            if let Err(e) = self.select_league(league).await {
                *self.view = View::default();
                return Err(e);
            }
            self.view.league = Some(league.to_string());
            self.view.tab = None;
        }

        if self.view.tab != Some(tab) {
            let clicked = match self.find_one(tab.selector()).await {
                Some(button) => self.driver.click(&button).await,
                None => false,
            };
            if !clicked {
                self.view.tab = None;
                return Err(ScrapeError::Navigation(format!(
                    "{} tab unavailable for {}",
                    tab, league
                )));
            }
            debug!("Switched {} to {} tab", league, tab);
            self.view.tab = Some(tab);
        }
        Ok(())
    }

    async fn select_league(&self, league: &str) -> Result<(), ScrapeError> {
        let name = self
            .session
            .league_names
            .get(league)
            .ok_or_else(|| ScrapeError::Navigation(format!("unknown league {}", league)))?;
        let wanted = normalize_name(name);

        for logo in self.find_all(sel::LEAGUE_LOGO).await {
            let Some(text) = self.text(&logo).await else {
                continue;
            };
            if normalize_name(&text).contains(&wanted) {
                if self.driver.click(&logo).await {
                    debug!("Selected league {}", name);
                    return Ok(());
                }
                break;
            }
        }
        warn!("League '{}' not found in available logos", name);
        Err(ScrapeError::Navigation(format!("cannot select league {}", name)))
    }

    pub async fn find_one(&self, selector: &str) -> Option<Element> {
        self.driver
            .find_one(selector, self.session.element_timeout)
            .await
    }

    pub async fn find_all(&self, selector: &str) -> Vec<Element> {
        self.driver
            .find_all(selector, self.session.element_timeout)
            .await
    }

    pub async fn within(&self, parent: &Element, selector: &str) -> Vec<Element> {
        self.driver.find_within(parent, selector).await
    }

    pub async fn first_within(&self, parent: &Element, selector: &str) -> Option<Element> {
        self.within(parent, selector).await.into_iter().next()
    }

    /// Element text with surrounding whitespace removed.
    pub async fn text(&self, element: &Element) -> Option<String> {
        self.driver
            .text(element)
            .await
            .map(|t| t.trim().to_string())
    }

    pub async fn text_within(&self, parent: &Element, selector: &str) -> Option<String> {
        let el = self.first_within(parent, selector).await?;
        self.text(&el).await
    }

    pub async fn texts_within(&self, parent: &Element, selector: &str) -> Vec<String> {
        let mut out = Vec::new();
        for el in self.within(parent, selector).await {
            if let Some(t) = self.text(&el).await {
                out.push(t);
            }
        }
        out
    }

    pub async fn attribute(&self, element: &Element, name: &str) -> Option<String> {
        self.driver.attribute(element, name).await
    }
}
