use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use clap::Parser;
use url::Url;

use crate::tasks::live::LiveTiming;
use crate::tasks::matchday::MatchdayTiming;
use crate::tasks::results::ResultsTiming;
use crate::timer::Thresholds;

/// One league as it appears on the page: a short id used in match ids and
/// logs, and the display name shown on its logo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct League {
    pub id: String,
    pub name: String,
}

impl League {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        League {
            id: id.into(),
            name: name.into(),
        }
    }
}

impl FromStr for League {
    type Err = String;

    /// `english=English League`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, name) = s
            .split_once('=')
            .ok_or_else(|| format!("expected id=Display Name, got {:?}", s))?;
        let (id, name) = (id.trim(), name.trim());
        if id.is_empty() || name.is_empty() {
            return Err(format!("league id and name must be non-empty in {:?}", s));
        }
        Ok(League::new(id, name))
    }
}

/// Virtual league scraper: odds, live scores, results and standings
#[derive(Parser, Debug, Clone)]
#[command(name = "virtual-league-scraper", version, about)]
pub struct Config {
    /// Page hosting the virtual league
    #[arg(long, env = "TARGET_URL", default_value = "https://odibets.com/odileague")]
    pub target_url: String,

    /// WebDriver endpoint (chromedriver / geckodriver / Selenium)
    #[arg(long, env = "WEBDRIVER_URL", default_value = "http://localhost:9515")]
    pub webdriver_url: String,

    /// Run the browser without a window
    #[arg(long, env = "HEADLESS", default_value = "false")]
    pub headless: bool,

    /// Leagues to follow, as comma-separated `id=Display Name` pairs
    #[arg(
        long,
        env = "LEAGUES",
        value_delimiter = ',',
        default_value = "english=English League,spanish=Spanish League,kenyan=Kenyan League,italian=Italian League"
    )]
    pub leagues: Vec<League>,

    /// Countdown (seconds) above which odds are refreshed at the slower tiers
    #[arg(long, env = "MATCHDAY_START_THRESHOLD_SECS", default_value = "60")]
    pub matchday_start_threshold_secs: u32,

    /// Countdown (seconds) at or below which odds scraping must stop
    #[arg(long, env = "MATCHDAY_STOP_THRESHOLD_SECS", default_value = "10")]
    pub matchday_stop_threshold_secs: u32,

    /// Countdown (seconds) at or below which the match counts as live
    #[arg(long, env = "LIVE_THRESHOLD_SECS", default_value = "5")]
    pub live_threshold_secs: u32,

    /// How often every league's countdowns are polled (milliseconds)
    #[arg(long, env = "TIMER_CHECK_INTERVAL_MS", default_value = "500")]
    pub timer_check_interval_ms: u64,

    /// Live score polling interval in seconds
    #[arg(long, env = "LIVE_POLL_INTERVAL_SECS", default_value = "2")]
    pub live_poll_interval_secs: u64,

    /// Upper bound on how long one match is tracked live (minutes)
    #[arg(long, env = "LIVE_MAX_DURATION_MINS", default_value = "120")]
    pub live_max_duration_mins: u64,

    /// Scrape standings after every N finished matches per league
    #[arg(long, env = "STANDINGS_TRIGGER", default_value = "5")]
    pub standings_trigger: u32,

    /// Directory for collection files and backups
    #[arg(long, env = "DATA_DIR", default_value = "data")]
    pub data_dir: PathBuf,

    /// Seconds between periodic store backups
    #[arg(long, env = "BACKUP_INTERVAL_SECS", default_value = "600")]
    pub backup_interval_secs: u64,

    /// Seconds between stats log lines
    #[arg(long, env = "STATS_INTERVAL_SECS", default_value = "30")]
    pub stats_interval_secs: u64,

    /// Browser restarts attempted before giving up
    #[arg(long, env = "MAX_SESSION_RESTARTS", default_value = "3")]
    pub max_session_restarts: u32,

    /// How long element lookups wait (milliseconds)
    #[arg(long, env = "ELEMENT_TIMEOUT_MS", default_value = "2000")]
    pub element_timeout_ms: u64,

    /// Attempts at finding a finished match in the results view
    #[arg(long, env = "RESULTS_ATTEMPTS", default_value = "3")]
    pub results_attempts: u32,

    /// Seconds between results attempts
    #[arg(long, env = "RESULTS_RETRY_DELAY_SECS", default_value = "5")]
    pub results_retry_delay_secs: u64,

    /// Status endpoint listen address (disabled when unset)
    #[arg(long, env = "STATUS_ADDR")]
    pub status_addr: Option<SocketAddr>,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.leagues.is_empty() {
            anyhow::bail!("at least one league must be configured");
        }
        for (i, league) in self.leagues.iter().enumerate() {
            if self.leagues[..i].iter().any(|l| l.id == league.id) {
                anyhow::bail!("league id {} is configured twice", league.id);
            }
        }
        if Url::parse(&self.target_url).is_err() {
            anyhow::bail!("target_url is not a valid URL: {}", self.target_url);
        }
        if Url::parse(&self.webdriver_url).is_err() {
            anyhow::bail!("webdriver_url is not a valid URL: {}", self.webdriver_url);
        }
        if !(self.live_threshold_secs < self.matchday_stop_threshold_secs
            && self.matchday_stop_threshold_secs < self.matchday_start_threshold_secs)
        {
            anyhow::bail!(
                "thresholds must satisfy live ({}) < matchday stop ({}) < matchday start ({})",
                self.live_threshold_secs,
                self.matchday_stop_threshold_secs,
                self.matchday_start_threshold_secs
            );
        }
        if self.timer_check_interval_ms == 0
            || self.live_poll_interval_secs == 0
            || self.backup_interval_secs == 0
            || self.stats_interval_secs == 0
        {
            anyhow::bail!("polling, backup and stats intervals must be non-zero");
        }
        if self.live_max_duration_mins == 0 {
            anyhow::bail!("live_max_duration_mins must be non-zero");
        }
        if self.standings_trigger == 0 {
            anyhow::bail!("standings_trigger must be at least 1");
        }
        if self.results_attempts == 0 {
            anyhow::bail!("results_attempts must be at least 1");
        }
        Ok(())
    }

    // ── Derived views ─────────────────────────────────────────────────────────

    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            matchday_start: self.matchday_start_threshold_secs,
            matchday_stop: self.matchday_stop_threshold_secs,
            live: self.live_threshold_secs,
        }
    }

    pub fn matchday_timing(&self) -> MatchdayTiming {
        MatchdayTiming {
            start_threshold_secs: self.matchday_start_threshold_secs,
            ..MatchdayTiming::default()
        }
    }

    pub fn live_timing(&self) -> LiveTiming {
        let poll_interval = Duration::from_secs(self.live_poll_interval_secs);
        LiveTiming {
            poll_interval,
            max_duration: Duration::from_secs(self.live_max_duration_mins * 60),
            stop_timeout: poll_interval * 2,
            ..LiveTiming::default()
        }
    }

    pub fn results_timing(&self) -> ResultsTiming {
        ResultsTiming {
            attempts: self.results_attempts,
            retry_delay: Duration::from_secs(self.results_retry_delay_secs),
        }
    }

    pub fn timer_interval(&self) -> Duration {
        Duration::from_millis(self.timer_check_interval_ms)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_millis(self.element_timeout_ms)
    }
}
