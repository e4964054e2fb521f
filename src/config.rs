use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, Result};
use crate::types::ActiveCategory;

/// Lower bound (inclusive) of the jittered delay between feed ticks.
pub const TICK_DELAY_MIN_MS: u64 = 3_000;

/// Upper bound (exclusive) of the jittered delay between feed ticks.
pub const TICK_DELAY_MAX_MS: u64 = 5_000;

/// Entities perturbed per tick, drawn uniformly from this inclusive range.
pub const MIN_UPDATES_PER_TICK: usize = 3;
pub const MAX_UPDATES_PER_TICK: usize = 5;

/// A tick moves a price by at most this many percent either way.
pub const MAX_PRICE_SWING_PCT: f64 = 5.0;

/// Channel capacity for intents sent to the engine task.
pub const COMMAND_CHANNEL_CAPACITY: usize = 256;

/// Per-subscriber notification queue. A slow reader loses notifications
/// rather than stalling the engine.
pub const SUBSCRIBER_CHANNEL_CAPACITY: usize = 64;

/// Mock batch shape (per category) and simulated fetch latency.
pub const MOCK_NEW_COUNT: usize = 15;
pub const MOCK_TRANSITIONING_COUNT: usize = 12;
pub const MOCK_SETTLED_COUNT: usize = 10;
pub const MOCK_FETCH_LATENCY_MS: u64 = 1_000;

/// Knobs for the simulated price feed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedConfig {
    pub tick_min: Duration,
    pub tick_max: Duration,
    pub min_updates: usize,
    pub max_updates: usize,
    pub max_swing_pct: f64,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            tick_min: Duration::from_millis(TICK_DELAY_MIN_MS),
            tick_max: Duration::from_millis(TICK_DELAY_MAX_MS),
            min_updates: MIN_UPDATES_PER_TICK,
            max_updates: MAX_UPDATES_PER_TICK,
            max_swing_pct: MAX_PRICE_SWING_PCT,
        }
    }
}

impl FeedConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_min >= self.tick_max {
            return Err(AppError::Config(
                "FEED_TICK_MIN_MS must be below FEED_TICK_MAX_MS".to_string(),
            ));
        }
        if self.min_updates == 0 || self.min_updates > self.max_updates {
            return Err(AppError::Config(
                "FEED_MIN_UPDATES must be at least 1 and not above FEED_MAX_UPDATES".to_string(),
            ));
        }
        if !(self.max_swing_pct > 0.0 && self.max_swing_pct < 100.0) {
            return Err(AppError::Config(
                "FEED_MAX_SWING_PCT must be in (0, 100)".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Seed for the feed and mock source RNG (FEED_SEED). None = OS entropy.
    pub seed: Option<u64>,
    pub feed: FeedConfig,
    /// Mock batch size per category (MOCK_NEW_COUNT, MOCK_TRANSITIONING_COUNT, MOCK_SETTLED_COUNT)
    pub mock_new: usize,
    pub mock_transitioning: usize,
    pub mock_settled: usize,
    /// Simulated fetch latency of the mock source (MOCK_FETCH_LATENCY_MS)
    pub mock_latency: Duration,
    /// Tab selected at startup (INITIAL_CATEGORY)
    pub initial_category: ActiveCategory,
    /// Rows the headless runner prints per projection change (REPORT_ROWS)
    pub report_rows: usize,
    /// JSON entity batch to load instead of the mock source (FIXTURE_FILE)
    pub fixture_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            seed: None,
            feed: FeedConfig::default(),
            mock_new: MOCK_NEW_COUNT,
            mock_transitioning: MOCK_TRANSITIONING_COUNT,
            mock_settled: MOCK_SETTLED_COUNT,
            mock_latency: Duration::from_millis(MOCK_FETCH_LATENCY_MS),
            initial_category: ActiveCategory::default(),
            report_rows: 5,
            fixture_path: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup so parsing can be exercised without
    /// touching the process environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();

        let feed = FeedConfig {
            tick_min: Duration::from_millis(parse_or(
                &lookup,
                "FEED_TICK_MIN_MS",
                TICK_DELAY_MIN_MS,
            )?),
            tick_max: Duration::from_millis(parse_or(
                &lookup,
                "FEED_TICK_MAX_MS",
                TICK_DELAY_MAX_MS,
            )?),
            min_updates: parse_or(&lookup, "FEED_MIN_UPDATES", MIN_UPDATES_PER_TICK)?,
            max_updates: parse_or(&lookup, "FEED_MAX_UPDATES", MAX_UPDATES_PER_TICK)?,
            max_swing_pct: parse_or(&lookup, "FEED_MAX_SWING_PCT", MAX_PRICE_SWING_PCT)?,
        };
        feed.validate()?;

        let initial_category = match lookup("INITIAL_CATEGORY") {
            Some(raw) => raw
                .parse::<ActiveCategory>()
                .map_err(|e| AppError::Config(format!("INITIAL_CATEGORY: {e}")))?,
            None => defaults.initial_category,
        };

        Ok(Self {
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            seed: match lookup("FEED_SEED") {
                Some(raw) => Some(raw.trim().parse::<u64>().map_err(|_| {
                    AppError::Config("FEED_SEED must be an unsigned integer".to_string())
                })?),
                None => None,
            },
            feed,
            mock_new: parse_or(&lookup, "MOCK_NEW_COUNT", MOCK_NEW_COUNT)?,
            mock_transitioning: parse_or(
                &lookup,
                "MOCK_TRANSITIONING_COUNT",
                MOCK_TRANSITIONING_COUNT,
            )?,
            mock_settled: parse_or(&lookup, "MOCK_SETTLED_COUNT", MOCK_SETTLED_COUNT)?,
            mock_latency: Duration::from_millis(parse_or(
                &lookup,
                "MOCK_FETCH_LATENCY_MS",
                MOCK_FETCH_LATENCY_MS,
            )?),
            initial_category,
            report_rows: parse_or(&lookup, "REPORT_ROWS", defaults.report_rows)?,
            fixture_path: lookup("FIXTURE_FILE")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
        })
    }
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| AppError::Config(format!("{key} has an invalid value: {raw}"))),
        None => Ok(default),
    }
}
