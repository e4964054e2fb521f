use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::Rng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::FeedConfig;
use crate::error::Result;
use crate::feed::UpdateScheduler;
use crate::metrics::LatencySummary;
use crate::state::{EntityStore, Snapshot};
use crate::types::{ActiveCategory, CategoryCounts, Entity, EntityPatch, FilterSpec, SortField, SortSpec};
use crate::view::{Projection, ViewState};

pub type SubscriptionId = u64;

/// What moved the projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeCause {
    Loaded,
    FeedTick,
    Update,
    ViewChanged,
}

impl std::fmt::Display for ChangeCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChangeCause::Loaded => "loaded",
            ChangeCause::FeedTick => "feed_tick",
            ChangeCause::Update => "update",
            ChangeCause::ViewChanged => "view_changed",
        };
        write!(f, "{s}")
    }
}

/// Sent to listeners after a change that altered the projection. Carries no
/// rows: listeners re-read through `projection()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ProjectionChanged {
    /// Increments once per published change.
    pub revision: u64,
    pub cause: ChangeCause,
    /// Rows in the new projection.
    pub visible: usize,
    /// Entities in the store.
    pub total: usize,
}

/// Status of the initial batch, owned by the engine for the presentation layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "state", content = "reason")]
pub enum LoadState {
    #[default]
    Pending,
    Ready,
    Failed(String),
}

/// Outcome of one feed tick.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub updated: Vec<String>,
}

type Listener = Box<dyn FnMut(&ProjectionChanged) + Send>;

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// Single owner of the live table: entity store, view selection, feed
/// scheduler and listeners. Every mutation goes through a method here, and
/// every method runs to completion before the next one starts, so readers
/// only ever see whole updates.
///
/// The engine has no clock. Whoever drives it (see `service`) asks for
/// [`Engine::next_tick_delay`] and calls [`Engine::run_tick`] when that
/// delay elapses, as long as [`Engine::feed_active`] holds.
pub struct Engine<R = StdRng> {
    store: EntityStore,
    view: ViewState,
    scheduler: UpdateScheduler<R>,
    feed_requested: bool,
    load_state: LoadState,
    listeners: Vec<(SubscriptionId, Listener)>,
    next_subscription: SubscriptionId,
    /// Last projection handed to listeners.
    published: Option<Projection>,
    projection_revision: u64,
    ticks_applied: u64,
}

impl<R: Rng> Engine<R> {
    /// Fails with `AppError::Config` when `feed` does not pass
    /// [`FeedConfig::validate`].
    pub fn new(rng: R, feed: FeedConfig) -> Result<Self> {
        Self::with_view(rng, feed, ViewState::new())
    }

    pub fn with_view(rng: R, feed: FeedConfig, view: ViewState) -> Result<Self> {
        Ok(Self {
            store: EntityStore::new(),
            view,
            scheduler: UpdateScheduler::new(rng, feed)?,
            feed_requested: false,
            load_state: LoadState::Pending,
            listeners: Vec::new(),
            next_subscription: 1,
            published: None,
            projection_revision: 0,
            ticks_applied: 0,
        })
    }

    // --- store ---

    /// Replace the entity set with the initial batch. A duplicate id rejects
    /// the batch with the store untouched.
    pub fn initialize(&mut self, entities: Vec<Entity>) -> Result<()> {
        let count = entities.len();
        if let Err(e) = self.store.load(entities) {
            warn!("initial batch rejected: {e}");
            if self.load_state == LoadState::Pending {
                self.load_state = LoadState::Failed(e.to_string());
            }
            return Err(e);
        }

        self.load_state = LoadState::Ready;
        info!(
            entities = count,
            feed_active = self.feed_active(),
            "entity store initialized"
        );
        self.publish(ChangeCause::Loaded);
        Ok(())
    }

    /// Record that the data source never produced a batch.
    pub fn mark_load_failed(&mut self, reason: impl Into<String>) {
        if self.load_state == LoadState::Pending {
            self.load_state = LoadState::Failed(reason.into());
        }
    }

    /// Merge volatile fields into one entity. An unknown id is dropped
    /// silently and returns false.
    pub fn apply_update(&mut self, id: &str, patch: &EntityPatch) -> bool {
        let applied = self.store.apply_update(id, patch);
        if applied {
            self.publish(ChangeCause::Update);
        }
        applied
    }

    // --- feed ---

    /// Request the simulated feed. Idempotent; returns whether the request
    /// flag changed. The schedule runs only while the store is non-empty.
    pub fn activate_feed(&mut self) -> bool {
        if self.feed_requested {
            return false;
        }
        self.feed_requested = true;
        info!(entities = self.store.len(), "feed activated");
        true
    }

    pub fn deactivate_feed(&mut self) -> bool {
        if !self.feed_requested {
            return false;
        }
        self.feed_requested = false;
        info!(ticks_applied = self.ticks_applied, "feed deactivated");
        true
    }

    pub fn feed_requested(&self) -> bool {
        self.feed_requested
    }

    pub fn feed_active(&self) -> bool {
        self.feed_requested && !self.store.is_empty()
    }

    pub fn next_tick_delay(&mut self) -> Duration {
        self.scheduler.next_delay()
    }

    /// Perturb a random subset of entities and apply all of it as one write.
    pub fn run_tick(&mut self) -> TickReport {
        let plan = self.scheduler.plan_tick(self.store.entities());
        if plan.is_empty() {
            return TickReport::default();
        }

        let applied = self.store.apply_batch(&plan);
        self.ticks_applied += 1;
        debug!(
            tick = self.ticks_applied,
            updated = applied,
            "feed tick applied"
        );
        self.publish(ChangeCause::FeedTick);

        TickReport {
            updated: plan.into_iter().map(|(id, _)| id).collect(),
        }
    }

    pub fn ticks_applied(&self) -> u64 {
        self.ticks_applied
    }

    // --- view ---

    pub fn set_active_category(&mut self, active: ActiveCategory) -> bool {
        let changed = self.view.set_active_category(active);
        if changed {
            self.publish(ChangeCause::ViewChanged);
        }
        changed
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) -> bool {
        let changed = self.view.set_sort(sort);
        if changed {
            self.publish(ChangeCause::ViewChanged);
        }
        changed
    }

    pub fn set_sort_by_name(&mut self, field: &str, direction: &str) -> Result<bool> {
        let changed = self.view.set_sort_by_name(field, direction)?;
        if changed {
            self.publish(ChangeCause::ViewChanged);
        }
        Ok(changed)
    }

    pub fn toggle_sort(&mut self, field: SortField) -> SortSpec {
        let spec = self.view.toggle_sort(field);
        self.publish(ChangeCause::ViewChanged);
        spec
    }

    pub fn set_filter(&mut self, filter: FilterSpec) -> bool {
        let changed = self.view.set_filter(filter);
        if changed {
            self.publish(ChangeCause::ViewChanged);
        }
        changed
    }

    // --- reads ---

    /// Current rows; safe before `initialize` (empty).
    pub fn projection(&mut self) -> Projection {
        self.view.projection(&self.store)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.store.snapshot()
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    pub fn store(&self) -> &EntityStore {
        &self.store
    }

    pub fn category_counts(&self) -> CategoryCounts {
        self.store.category_counts()
    }

    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    pub fn recompute_latency(&self) -> LatencySummary {
        self.view.recompute_latency()
    }

    pub fn projection_revision(&self) -> u64 {
        self.projection_revision
    }

    // --- subscriptions ---

    /// Register a listener called after every change that alters the
    /// projection. The current projection becomes the listener's baseline.
    pub fn subscribe(&mut self, listener: impl FnMut(&ProjectionChanged) + Send + 'static) -> SubscriptionId {
        let id = self.next_subscription;
        self.next_subscription += 1;
        if self.listeners.is_empty() {
            self.published = Some(self.view.projection(&self.store));
        }
        self.listeners.push((id, Box::new(listener)));
        debug!(subscription = id, listeners = self.listeners.len(), "listener subscribed");
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        let removed = self.listeners.len() != before;
        if removed {
            debug!(subscription = id, listeners = self.listeners.len(), "listener removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }

    /// Stop the feed, drop listeners and empty the store.
    pub fn teardown(&mut self) {
        self.feed_requested = false;
        self.listeners.clear();
        self.published = None;
        self.store.clear();
        self.view.invalidate();
        info!(ticks_applied = self.ticks_applied, "engine torn down");
    }

    /// Recompute (only when someone is listening) and notify if the rows
    /// differ by value from what was last published.
    fn publish(&mut self, cause: ChangeCause) {
        if self.listeners.is_empty() {
            return;
        }
        let rows = self.view.projection(&self.store);
        if let Some(prev) = &self.published {
            if Arc::ptr_eq(prev, &rows) || **prev == *rows {
                return;
            }
        }

        self.projection_revision += 1;
        let change = ProjectionChanged {
            revision: self.projection_revision,
            cause,
            visible: rows.len(),
            total: self.store.len(),
        };
        self.published = Some(rows);
        for (_, listener) in self.listeners.iter_mut() {
            listener(&change);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::AppError;
    use crate::types::Category;
    use rand::SeedableRng;
    use std::sync::Mutex;

    fn entity(id: &str, price: f64, category: Category) -> Entity {
        Entity {
            id: id.to_string(),
            symbol: id.to_uppercase(),
            name: format!("{id} token"),
            chain: "ARB".to_string(),
            contract_address: format!("0x{id}"),
            created_at_ms: 0,
            category,
            verified: false,
            trending: false,
            tags: Vec::new(),
            logo: None,
            price,
            price_change_percent: 0.0,
            volume: 50.0,
            market_cap: 0.0,
            liquidity: 0.0,
            holders: 0,
        }
    }

    fn engine() -> Engine<StdRng> {
        Engine::new(StdRng::seed_from_u64(5), FeedConfig::default()).unwrap()
    }

    fn ids(rows: &Projection) -> Vec<&str> {
        rows.iter().map(|e| e.id.as_str()).collect()
    }

    fn recorder(engine: &mut Engine<StdRng>) -> Arc<Mutex<Vec<ProjectionChanged>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        engine.subscribe(move |change| sink.lock().unwrap().push(*change));
        seen
    }

    #[test]
    fn projection_before_initialize_is_empty() {
        let mut engine = engine();
        assert!(engine.projection().is_empty());
        assert_eq!(engine.load_state(), &LoadState::Pending);
    }

    #[test]
    fn tab_sort_update_filter_scenario() {
        let mut engine = engine();
        engine
            .initialize(vec![
                entity("A", 1.0, Category::New),
                entity("B", 2.0, Category::New),
                entity("C", 3.0, Category::Settled),
            ])
            .unwrap();

        engine.set_active_category(Category::New.into());
        assert_eq!(ids(&engine.projection()), ["A", "B"]);

        engine.set_sort(Some(SortSpec::desc(SortField::Price)));
        assert_eq!(ids(&engine.projection()), ["B", "A"]);

        assert!(engine.apply_update("A", &EntityPatch { price: Some(5.0), ..Default::default() }));
        assert_eq!(ids(&engine.projection()), ["A", "B"]);

        engine.set_filter(FilterSpec { min_volume: Some(100.0), ..Default::default() });
        assert!(engine.projection().is_empty());
    }

    #[test]
    fn duplicate_batch_marks_failed_only_while_pending() {
        let mut engine = engine();
        let err = engine
            .initialize(vec![entity("A", 1.0, Category::New), entity("A", 2.0, Category::New)])
            .unwrap_err();
        assert!(matches!(err, AppError::InvalidBatch { .. }));
        assert!(matches!(engine.load_state(), LoadState::Failed(_)));
        assert!(engine.snapshot().is_empty());

        engine.initialize(vec![entity("A", 1.0, Category::New)]).unwrap();
        assert_eq!(engine.load_state(), &LoadState::Ready);

        assert!(engine
            .initialize(vec![entity("B", 1.0, Category::New), entity("B", 1.0, Category::New)])
            .is_err());
        assert_eq!(engine.load_state(), &LoadState::Ready);
        assert_eq!(ids(&engine.projection()), ["A"]);
    }

    #[test]
    fn missing_update_target_changes_nothing() {
        let mut engine = engine();
        engine.initialize(vec![entity("A", 1.0, Category::New)]).unwrap();
        let seen = recorder(&mut engine);
        let before = engine.projection();

        assert!(!engine.apply_update("Z", &EntityPatch::price(3.0, 1.0)));
        let after = engine.projection();
        assert!(Arc::ptr_eq(&before, &after));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn listeners_fire_only_when_projection_changes() {
        let mut engine = engine();
        engine
            .initialize(vec![entity("A", 1.0, Category::New), entity("S", 1.0, Category::Settled)])
            .unwrap();
        let seen = recorder(&mut engine);

        // Settled entity is off the current tab: store changes, projection doesn't.
        engine.apply_update("S", &EntityPatch::price(2.0, 100.0));
        assert!(seen.lock().unwrap().is_empty());

        engine.apply_update("A", &EntityPatch::price(2.0, 100.0));
        engine.set_active_category(ActiveCategory::All);
        // A sort that leaves the order as-is publishes nothing.
        engine.set_sort(Some(SortSpec::asc(SortField::Symbol)));

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].cause, ChangeCause::Update);
        assert_eq!(seen[1].cause, ChangeCause::ViewChanged);
        assert_eq!((seen[1].revision, seen[1].visible, seen[1].total), (2, 2, 2));
    }

    #[test]
    fn unsubscribe_stops_notifications() {
        let mut engine = engine();
        engine.initialize(vec![entity("A", 1.0, Category::New)]).unwrap();
        let seen = Arc::new(Mutex::new(0usize));
        let sink = Arc::clone(&seen);
        let id = engine.subscribe(move |_| *sink.lock().unwrap() += 1);

        engine.apply_update("A", &EntityPatch::price(2.0, 0.0));
        assert!(engine.unsubscribe(id));
        assert!(!engine.unsubscribe(id));
        engine.apply_update("A", &EntityPatch::price(3.0, 0.0));

        assert_eq!(*seen.lock().unwrap(), 1);
        assert_eq!(engine.subscriber_count(), 0);
    }

    #[test]
    fn tick_touches_k_entities_and_only_volatile_fields() {
        let mut engine = engine();
        let batch: Vec<Entity> = (0..10)
            .map(|i| entity(&format!("t{i}"), 1.0 + i as f64, Category::New))
            .collect();
        engine.initialize(batch).unwrap();
        let before = engine.snapshot();

        let report = engine.run_tick();
        let after = engine.snapshot();

        assert!((3..=5).contains(&report.updated.len()));
        let changed: Vec<&Entity> = after
            .iter()
            .zip(before.iter())
            .filter(|(a, b)| a != b)
            .map(|(a, _)| a)
            .collect();
        assert_eq!(changed.len(), report.updated.len());
        for (a, b) in after.iter().zip(before.iter()) {
            assert_eq!(a.id, b.id);
            assert_eq!(a.category, b.category);
            if report.updated.contains(&a.id) {
                assert_ne!(a.price, b.price);
            } else {
                assert_eq!(a, b);
            }
        }
        assert_eq!(engine.ticks_applied(), 1);
    }

    #[test]
    fn feed_is_active_only_with_entities() {
        let mut engine = engine();
        assert!(engine.activate_feed());
        assert!(!engine.activate_feed());
        assert!(engine.feed_requested());
        assert!(!engine.feed_active());
        assert!(engine.run_tick().updated.is_empty());

        engine.initialize(vec![entity("A", 1.0, Category::New)]).unwrap();
        assert!(engine.feed_active());

        engine.initialize(Vec::new()).unwrap();
        assert!(!engine.feed_active());

        assert!(engine.deactivate_feed());
        assert!(!engine.deactivate_feed());
    }

    #[test]
    fn inverted_feed_config_is_refused_before_any_tick() {
        let inverted = FeedConfig { min_updates: 5, max_updates: 3, ..FeedConfig::default() };
        let err = Engine::new(StdRng::seed_from_u64(1), inverted).err();
        assert!(matches!(err, Some(AppError::Config(_))));

        let negative_swing = FeedConfig { max_swing_pct: -2.0, ..FeedConfig::default() };
        let err = Engine::with_view(StdRng::seed_from_u64(1), negative_swing, ViewState::new()).err();
        assert!(matches!(err, Some(AppError::Config(_))));
    }

    #[test]
    fn teardown_clears_everything() {
        let mut engine = engine();
        engine.initialize(vec![entity("A", 1.0, Category::New)]).unwrap();
        engine.activate_feed();
        let _ = recorder(&mut engine);
        engine.teardown();
        assert!(!engine.feed_active());
        assert_eq!(engine.subscriber_count(), 0);
        assert!(engine.projection().is_empty());
    }
}
