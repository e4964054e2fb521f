use std::time::Duration;

use rand::seq::index;
use rand::Rng;

use crate::config::FeedConfig;
use crate::error::Result;
use crate::types::{Entity, EntityPatch};

/// One planned price move, ready to hand to the store.
pub type PlannedUpdate = (String, EntityPatch);

/// Stand-in for a real-time price feed.
///
/// The scheduler only decides *what* a tick does and *how long* to wait
/// before the next one. It owns no entities and no timer: callers read the
/// current entities, ask for a plan, and apply it through the store.
pub struct UpdateScheduler<R> {
    rng: R,
    cfg: FeedConfig,
    ticks_planned: u64,
}

impl<R: Rng> UpdateScheduler<R> {
    /// Rejects a config whose ranges the RNG could not sample from.
    pub fn new(rng: R, cfg: FeedConfig) -> Result<Self> {
        cfg.validate()?;
        Ok(Self { rng, cfg, ticks_planned: 0 })
    }

    pub fn config(&self) -> &FeedConfig {
        &self.cfg
    }

    pub fn ticks_planned(&self) -> u64 {
        self.ticks_planned
    }

    /// Delay before the next tick, uniform over `[tick_min, tick_max)` at
    /// millisecond resolution.
    pub fn next_delay(&mut self) -> Duration {
        let min = self.cfg.tick_min.as_millis() as u64;
        let max = self.cfg.tick_max.as_millis() as u64;
        if max <= min {
            return self.cfg.tick_min;
        }
        Duration::from_millis(self.rng.gen_range(min..max))
    }

    /// Pick `k` distinct entities (k uniform over `min_updates..=max_updates`,
    /// clamped to the entity count) and compute a new price for each.
    pub fn plan_tick(&mut self, entities: &[Entity]) -> Vec<PlannedUpdate> {
        if entities.is_empty() {
            return Vec::new();
        }
        self.ticks_planned += 1;

        let k = self
            .rng
            .gen_range(self.cfg.min_updates..=self.cfg.max_updates)
            .min(entities.len());
        let picks = index::sample(&mut self.rng, entities.len(), k);
        let swing = self.cfg.max_swing_pct;

        picks
            .iter()
            .map(|i| {
                let entity = &entities[i];
                let u = self.rng.gen_range(-swing..=swing);
                let (price, change) = drift(entity.price, entity.price_change_percent, u);
                (entity.id.clone(), EntityPatch::price(price, change))
            })
            .collect()
    }
}

/// Move `price` by `u` percent and fold the move into the running change
/// percentage. The change accumulates across ticks; it is never rebased.
pub fn drift(price: f64, change_percent: f64, u: f64) -> (f64, f64) {
    let new_price = price * (1.0 + u / 100.0);
    if price == 0.0 {
        return (new_price, change_percent);
    }
    let new_change = ((new_price - price) / price) * 100.0 + change_percent;
    (new_price, new_change)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
