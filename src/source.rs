use std::future::Future;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rand::Rng;
use tracing::info;

use crate::config::Config;
use crate::error::Result;
use crate::types::{Category, Entity};

/// Producer of the initial entity batch (an API client, a fixture file, a
/// generator). Called once at startup.
pub trait EntitySource {
    fn fetch(&mut self) -> impl Future<Output = Result<Vec<Entity>>> + Send;
}

/// Hands out a prepared batch, e.g. one decoded from a fixture.
pub struct StaticSource {
    entities: Option<Vec<Entity>>,
}

impl StaticSource {
    pub fn new(entities: Vec<Entity>) -> Self {
        Self { entities: Some(entities) }
    }

    /// Decode a JSON array of entities (camelCase fields).
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(Self::new(serde_json::from_str(json)?))
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)?;
        let source = Self::from_json(&json)?;
        info!(path = %path.display(), "fixture loaded");
        Ok(source)
    }
}

impl EntitySource for StaticSource {
    async fn fetch(&mut self) -> Result<Vec<Entity>> {
        Ok(self.entities.take().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

const TOKEN_NAMES: &[(&str, &str, &str)] = &[
    ("PEPE", "Pepe Coin", "🐸"),
    ("WOJAK", "Wojak Finance", "😐"),
    ("DOGE", "Dogecoin", "🐕"),
    ("SHIB", "Shiba Inu", "🐶"),
    ("FLOKI", "Floki Inu", "🐕"),
    ("BONK", "Bonk Inu", "🐶"),
    ("WIF", "Dogwifhat", "🐕"),
    ("MEME", "Meme Coin", "😂"),
    ("TURBO", "Turbo Token", "⚡"),
    ("AIDOGE", "ArbDoge AI", "🤖"),
];

const CHAINS: &[&str] = &["ETH", "BSC", "SOL", "BASE", "ARB"];

/// Oldest a mock token can be.
const MAX_AGE_MS: i64 = 48 * 3_600 * 1_000;

/// Generates a plausible batch of meme tokens after a simulated fetch delay.
pub struct MockSource<R> {
    rng: R,
    counts: [(Category, usize); 3],
    latency: Duration,
}

impl<R: Rng> MockSource<R> {
    pub fn new(rng: R, new: usize, transitioning: usize, settled: usize) -> Self {
        Self {
            rng,
            counts: [
                (Category::New, new),
                (Category::Transitioning, transitioning),
                (Category::Settled, settled),
            ],
            latency: Duration::ZERO,
        }
    }

    pub fn from_config(rng: R, cfg: &Config) -> Self {
        Self::new(rng, cfg.mock_new, cfg.mock_transitioning, cfg.mock_settled)
            .with_latency(cfg.mock_latency)
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Build the batch without waiting.
    pub fn generate(&mut self, now_ms: i64) -> Vec<Entity> {
        let counts = self.counts;
        let mut entities = Vec::with_capacity(counts.iter().map(|(_, n)| n).sum());
        for (category, count) in counts {
            for index in 0..count {
                entities.push(self.token(category, index, now_ms));
            }
        }
        entities
    }

    fn token(&mut self, category: Category, index: usize, now_ms: i64) -> Entity {
        let (symbol, name, logo) = TOKEN_NAMES[index % TOKEN_NAMES.len()];
        let rng = &mut self.rng;

        let trending_tag = rng.gen_bool(0.3);
        Entity {
            id: format!("token-{category}-{index}"),
            symbol: format!("{symbol}{index}"),
            name: format!("{name} {index}"),
            chain: CHAINS[rng.gen_range(0..CHAINS.len())].to_string(),
            contract_address: address(&mut *rng),
            created_at_ms: now_ms - rng.gen_range(0..MAX_AGE_MS),
            category,
            verified: rng.gen_bool(0.5),
            trending: rng.gen_bool(0.3),
            tags: if trending_tag { vec!["🔥 Trending".to_string()] } else { Vec::new() },
            logo: Some(logo.to_string()),
            price: rng.gen_range(0.0001..100.0),
            price_change_percent: rng.gen_range(-50.0..150.0),
            volume: rng.gen_range(10_000.0..10_000_000.0),
            market_cap: rng.gen_range(100_000.0..100_000_000.0),
            liquidity: rng.gen_range(50_000.0..5_000_000.0),
            holders: rng.gen_range(100..50_000),
        }
    }
}

impl<R: Rng + Send> EntitySource for MockSource<R> {
    async fn fetch(&mut self) -> Result<Vec<Entity>> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let entities = self.generate(now_ms());
        info!(entities = entities.len(), "mock batch generated");
        Ok(entities)
    }
}

fn address(rng: &mut impl Rng) -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for _ in 0..40 {
        out.push(HEX[rng.gen_range(0..16)] as char);
    }
    out
}

pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
