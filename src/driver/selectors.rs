//! CSS selectors for the virtual league page.

// ── General ───────────────────────────────────────────────────────────────────
pub const POPUP_CLOSE: &str = "div.roadblock-close button";
pub const LEAGUE_LOGO: &str = "div.virtual-logos div.logo";

// ── Timers ────────────────────────────────────────────────────────────────────
pub const TIMER_SLOT: &str = "div.virtual-timer div.ss";

// ── Tabs ──────────────────────────────────────────────────────────────────────
pub const TAB_MATCHDAY: &str = "ul.tbs li:nth-child(1)";
pub const TAB_LIVE: &str = "ul.tbs li.live";
pub const TAB_RESULTS: &str = "ul.tbs li:nth-child(2)";
pub const TAB_STANDINGS: &str = "ul.tbs li:nth-child(3)";

// ── Matchday ──────────────────────────────────────────────────────────────────
pub const GAME_CONTAINER: &str = "div.game";
pub const TEAM_NAMES: &str = "div.t div.t-l";
pub const ODDS_CONTAINER: &str = "div.odds";
pub const ODDS_SECTION: &str = "div.o";
pub const ODDS_BUTTON: &str = "button";
pub const ODDS_LABEL: &str = "small.o-1";
pub const ODDS_PRICE: &str = "span.o-2";

// ── Live ──────────────────────────────────────────────────────────────────────
pub const LIVE_MATCH: &str = "div.gm";
pub const LIVE_SCORE: &str = "div.gm-s div.d";
pub const LIVE_STATUS: &str = "div.gm-s div.m";
pub const LIVE_TEAM_HOME: &str = "div.t-1 span.t-1-j";
pub const LIVE_TEAM_AWAY: &str = "div.t-2 span.t-2-j";
pub const LIVE_GOAL_SIDES: &str = "div.gm-h div.hi";
pub const LIVE_GOAL_MINUTE: &str = "span";
pub const LIVE_HALFTIME_SCORE: &str = "div.gm-h div.dv span";

// ── Results ───────────────────────────────────────────────────────────────────
pub const RESULTS_CONTAINER: &str = "div.rs";
pub const RESULTS_TITLE: &str = "div.rs-t div.t";
pub const RESULTS_TIME: &str = "div.rs-t div.b";
pub const RESULTS_MATCH: &str = "div.rs-g";
pub const RESULTS_TEAM: &str = "div.g-t";
pub const RESULTS_SCORE: &str = "div.g-s span";

// ── Standings ─────────────────────────────────────────────────────────────────
pub const STANDINGS_CONTAINER: &str = "div.virtual-standings";
pub const STANDINGS_TITLE: &str = "div.title";
pub const STANDINGS_ROW: &str = "tbody tr";
pub const STANDINGS_CELL: &str = "td";
pub const STANDINGS_FORM: &str = "div";
