use std::pin::Pin;

use rand::Rng;
use serde::Serialize;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Sleep;
use tracing::{debug, info, warn};

use crate::config::{COMMAND_CHANNEL_CAPACITY, SUBSCRIBER_CHANNEL_CAPACITY};
use crate::engine::{Engine, LoadState, ProjectionChanged, SubscriptionId, TickReport};
use crate::error::{AppError, Result};
use crate::metrics::LatencySummary;
use crate::source::EntitySource;
use crate::state::Snapshot;
use crate::types::{ActiveCategory, CategoryCounts, Entity, EntityPatch, FilterSpec, SortField, SortSpec};
use crate::view::Projection;

// ---------------------------------------------------------------------------
// Intents
// ---------------------------------------------------------------------------

enum Command {
    Initialize { entities: Vec<Entity>, reply: oneshot::Sender<Result<()>> },
    LoadFailed { reason: String },
    ApplyUpdate { id: String, patch: EntityPatch, reply: oneshot::Sender<bool> },
    ActivateFeed { reply: oneshot::Sender<bool> },
    DeactivateFeed { reply: oneshot::Sender<bool> },
    SetActiveCategory { active: ActiveCategory, reply: oneshot::Sender<bool> },
    SetSort { sort: Option<SortSpec>, reply: oneshot::Sender<bool> },
    SetSortByName { field: String, direction: String, reply: oneshot::Sender<Result<bool>> },
    ToggleSort { field: SortField, reply: oneshot::Sender<SortSpec> },
    SetFilter { filter: FilterSpec, reply: oneshot::Sender<bool> },
    Projection { reply: oneshot::Sender<Projection> },
    Snapshot { reply: oneshot::Sender<Snapshot> },
    Status { reply: oneshot::Sender<EngineStatus> },
    Subscribe { tx: mpsc::Sender<ProjectionChanged>, reply: oneshot::Sender<SubscriptionId> },
    Unsubscribe { id: SubscriptionId },
    Shutdown { reply: oneshot::Sender<()> },
}

/// Everything a presentation layer needs besides the rows themselves.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineStatus {
    pub active_category: ActiveCategory,
    pub filter: FilterSpec,
    pub sort: Option<SortSpec>,
    pub counts: CategoryCounts,
    pub load_state: LoadState,
    pub feed_requested: bool,
    pub feed_active: bool,
    /// True while a tick timer is outstanding. Never more than one.
    pub tick_armed: bool,
    pub ticks_applied: u64,
    pub projection_revision: u64,
    pub subscribers: usize,
    pub recompute: LatencySummary,
}

// ---------------------------------------------------------------------------
// EngineService: the task that owns the engine and the tick timer
// ---------------------------------------------------------------------------

pub struct EngineService<R> {
    engine: Engine<R>,
    rx: mpsc::Receiver<Command>,
    /// The only tick timer. Armed while the feed is active, cleared the
    /// moment it fires, re-armed after the tick has been applied.
    next_tick: Option<Pin<Box<Sleep>>>,
}

/// Move `engine` onto its own task and return a handle to it. The task ends
/// (and the timer with it) on `shutdown()` or once every handle and
/// subscription is dropped.
pub fn spawn<R>(engine: Engine<R>) -> (EngineHandle, JoinHandle<()>)
where
    R: Rng + Send + 'static,
{
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let service = EngineService { engine, rx, next_tick: None };
    let task = tokio::spawn(async move { service.run().await });
    (EngineHandle { tx }, task)
}

impl<R: Rng> EngineService<R> {
    pub async fn run(mut self) {
        loop {
            self.sync_timer();
            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if !self.handle(cmd) {
                            return;
                        }
                    }
                    None => break,
                },
                () = wait_tick(&mut self.next_tick) => {
                    self.next_tick = None;
                    let report = self.engine.run_tick();
                    log_tick(&report);
                }
            }
        }
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.next_tick = None;
        self.engine.teardown();
        info!("engine service stopped");
    }

    /// Arm the timer if the feed should be running and none is outstanding;
    /// drop it if the feed should not be running.
    fn sync_timer(&mut self) {
        match (self.engine.feed_active(), self.next_tick.is_some()) {
            (true, false) => {
                let delay = self.engine.next_tick_delay();
                debug!(delay_ms = delay.as_millis() as u64, "next feed tick armed");
                self.next_tick = Some(Box::pin(tokio::time::sleep(delay)));
            }
            (false, true) => {
                self.next_tick = None;
                debug!("feed tick timer cancelled");
            }
            _ => {}
        }
    }

    /// Apply one intent. Returns false once the service should stop.
    fn handle(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Initialize { entities, reply } => {
                let result = self.engine.initialize(entities);
                self.sync_timer();
                let _ = reply.send(result);
            }
            Command::LoadFailed { reason } => {
                warn!(reason = %reason, "entity source failed");
                self.engine.mark_load_failed(reason);
            }
            Command::ApplyUpdate { id, patch, reply } => {
                let _ = reply.send(self.engine.apply_update(&id, &patch));
            }
            Command::ActivateFeed { reply } => {
                let changed = self.engine.activate_feed();
                self.sync_timer();
                let _ = reply.send(changed);
            }
            Command::DeactivateFeed { reply } => {
                let changed = self.engine.deactivate_feed();
                // Timer must be gone before the caller hears back.
                self.sync_timer();
                let _ = reply.send(changed);
            }
            Command::SetActiveCategory { active, reply } => {
                let _ = reply.send(self.engine.set_active_category(active));
            }
            Command::SetSort { sort, reply } => {
                let _ = reply.send(self.engine.set_sort(sort));
            }
            Command::SetSortByName { field, direction, reply } => {
                let _ = reply.send(self.engine.set_sort_by_name(&field, &direction));
            }
            Command::ToggleSort { field, reply } => {
                let _ = reply.send(self.engine.toggle_sort(field));
            }
            Command::SetFilter { filter, reply } => {
                let _ = reply.send(self.engine.set_filter(filter));
            }
            Command::Projection { reply } => {
                let _ = reply.send(self.engine.projection());
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::Status { reply } => {
                let _ = reply.send(self.status());
            }
            Command::Subscribe { tx, reply } => {
                let id = self.engine.subscribe(move |change| match tx.try_send(*change) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        warn!(revision = change.revision, "subscriber queue full, dropping notification");
                    }
                    Err(TrySendError::Closed(_)) => {}
                });
                let _ = reply.send(id);
            }
            Command::Unsubscribe { id } => {
                self.engine.unsubscribe(id);
            }
            Command::Shutdown { reply } => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            }
        }
        true
    }

    fn status(&self) -> EngineStatus {
        let view = self.engine.view();
        EngineStatus {
            active_category: view.active_category(),
            filter: view.filter().clone(),
            sort: view.sort(),
            counts: self.engine.category_counts(),
            load_state: self.engine.load_state().clone(),
            feed_requested: self.engine.feed_requested(),
            feed_active: self.engine.feed_active(),
            tick_armed: self.next_tick.is_some(),
            ticks_applied: self.engine.ticks_applied(),
            projection_revision: self.engine.projection_revision(),
            subscribers: self.engine.subscriber_count(),
            recompute: self.engine.recompute_latency(),
        }
    }
}

async fn wait_tick(slot: &mut Option<Pin<Box<Sleep>>>) {
    match slot {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending::<()>().await,
    }
}

fn log_tick(report: &TickReport) {
    debug!(
        updated = report.updated.len(),
        ids = ?report.updated,
        "feed tick"
    );
}

// ---------------------------------------------------------------------------
// EngineHandle
// ---------------------------------------------------------------------------

/// Cloneable front door to the engine task. Every call is answered after the
/// engine has fully applied it.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<Command>,
}

impl EngineHandle {
    async fn request<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| AppError::ServiceClosed)?;
        rx.await.map_err(|_| AppError::ServiceClosed)
    }

    pub async fn initialize(&self, entities: Vec<Entity>) -> Result<()> {
        self.request(|reply| Command::Initialize { entities, reply }).await?
    }

    pub async fn report_load_failure(&self, reason: impl Into<String>) -> Result<()> {
        self.tx
            .send(Command::LoadFailed { reason: reason.into() })
            .await
            .map_err(|_| AppError::ServiceClosed)
    }

    pub async fn apply_update(&self, id: impl Into<String>, patch: EntityPatch) -> Result<bool> {
        let id = id.into();
        self.request(|reply| Command::ApplyUpdate { id, patch, reply }).await
    }

    pub async fn activate_feed(&self) -> Result<bool> {
        self.request(|reply| Command::ActivateFeed { reply }).await
    }

    /// Returns once the tick timer has been dropped: no tick fires after this.
    pub async fn deactivate_feed(&self) -> Result<bool> {
        self.request(|reply| Command::DeactivateFeed { reply }).await
    }

    pub async fn set_active_category(&self, active: ActiveCategory) -> Result<bool> {
        self.request(|reply| Command::SetActiveCategory { active, reply }).await
    }

    pub async fn set_sort(&self, sort: Option<SortSpec>) -> Result<bool> {
        self.request(|reply| Command::SetSort { sort, reply }).await
    }

    pub async fn set_sort_by_name(&self, field: &str, direction: &str) -> Result<bool> {
        let (field, direction) = (field.to_string(), direction.to_string());
        self.request(|reply| Command::SetSortByName { field, direction, reply })
            .await?
    }

    pub async fn toggle_sort(&self, field: SortField) -> Result<SortSpec> {
        self.request(|reply| Command::ToggleSort { field, reply }).await
    }

    pub async fn set_filter(&self, filter: FilterSpec) -> Result<bool> {
        self.request(|reply| Command::SetFilter { filter, reply }).await
    }

    pub async fn projection(&self) -> Result<Projection> {
        self.request(|reply| Command::Projection { reply }).await
    }

    pub async fn snapshot(&self) -> Result<Snapshot> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus> {
        self.request(|reply| Command::Status { reply }).await
    }

    pub async fn subscribe(&self) -> Result<Subscription> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_CHANNEL_CAPACITY);
        let id = self.request(|reply| Command::Subscribe { tx, reply }).await?;
        Ok(Subscription { id, rx, commands: self.tx.clone() })
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| Command::Shutdown { reply }).await
    }
}

/// Projection change notifications for one listener. Dropping it unsubscribes.
pub struct Subscription {
    id: SubscriptionId,
    rx: mpsc::Receiver<ProjectionChanged>,
    commands: mpsc::Sender<Command>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next change, or None once the engine has stopped.
    pub async fn changed(&mut self) -> Option<ProjectionChanged> {
        self.rx.recv().await
    }

    pub fn try_changed(&mut self) -> Option<ProjectionChanged> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        let _ = self.commands.try_send(Command::Unsubscribe { id: self.id });
    }
}

// ---------------------------------------------------------------------------
// Bootstrap
// ---------------------------------------------------------------------------

/// Fetch the initial batch from `source` and hand it to the engine. A fetch
/// failure is recorded as the engine's load state before being returned.
pub async fn bootstrap<S: EntitySource>(source: &mut S, handle: &EngineHandle) -> Result<usize> {
    match source.fetch().await {
        Ok(entities) => {
            let count = entities.len();
            handle.initialize(entities).await?;
            Ok(count)
        }
        Err(e) => {
            handle.report_load_failure(e.to_string()).await?;
            Err(e)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FeedConfig;
    use crate::types::Category;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::time::Duration;

    fn batch(n: usize) -> Vec<Entity> {
        (0..n)
            .map(|i| Entity {
                id: format!("token-new-{i}"),
                symbol: format!("PEPE{i}"),
                name: format!("Pepe Coin {i}"),
                chain: "ETH".to_string(),
                contract_address: format!("0x{i:040x}"),
                created_at_ms: 0,
                category: Category::New,
                verified: false,
                trending: false,
                tags: Vec::new(),
                logo: None,
                price: 1.0 + i as f64,
                price_change_percent: 0.0,
                volume: 1_000.0,
                market_cap: 0.0,
                liquidity: 0.0,
                holders: 0,
            })
            .collect()
    }

    fn start(seed: u64) -> (EngineHandle, JoinHandle<()>) {
        spawn(Engine::new(StdRng::seed_from_u64(seed), FeedConfig::default()).unwrap())
    }

    struct FailingSource;

    impl EntitySource for FailingSource {
        async fn fetch(&mut self) -> Result<Vec<Entity>> {
            Err(AppError::Source("upstream unavailable".to_string()))
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_tick_per_jittered_delay() {
        let (handle, _task) = start(1);
        handle.initialize(batch(10)).await.unwrap();
        handle.activate_feed().await.unwrap();

        let status = handle.status().await.unwrap();
        assert!(status.feed_active && status.tick_armed);

        // First tick lands in [3s, 5s); the next cannot come before 6s.
        tokio::time::sleep(Duration::from_millis(5_001)).await;
        let status = handle.status().await.unwrap();
        assert_eq!(status.ticks_applied, 1);
        assert!(status.tick_armed, "next tick re-armed after the update");
    }

    #[tokio::test(start_paused = true)]
    async fn no_tick_after_deactivate_returns() {
        let (handle, _task) = start(2);
        handle.initialize(batch(10)).await.unwrap();
        handle.activate_feed().await.unwrap();
        tokio::time::sleep(Duration::from_millis(2_000)).await;

        assert!(handle.deactivate_feed().await.unwrap());
        let frozen = handle.snapshot().await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(!status.tick_armed);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(*handle.snapshot().await.unwrap(), *frozen);
        assert_eq!(handle.status().await.unwrap().ticks_applied, status.ticks_applied);

        // Idempotent.
        assert!(!handle.deactivate_feed().await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn reactivation_starts_a_fresh_schedule() {
        let (handle, _task) = start(3);
        handle.initialize(batch(6)).await.unwrap();
        handle.activate_feed().await.unwrap();
        handle.deactivate_feed().await.unwrap();
        assert!(!handle.status().await.unwrap().tick_armed);

        handle.activate_feed().await.unwrap();
        assert!(handle.status().await.unwrap().tick_armed);
        tokio::time::sleep(Duration::from_millis(5_000)).await;
        assert_eq!(handle.status().await.unwrap().ticks_applied, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn activation_waits_for_entities_and_empty_load_cancels() {
        let (handle, _task) = start(4);
        handle.activate_feed().await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(status.feed_requested && !status.feed_active && !status.tick_armed);

        handle.initialize(batch(4)).await.unwrap();
        assert!(handle.status().await.unwrap().tick_armed);

        handle.initialize(Vec::new()).await.unwrap();
        let status = handle.status().await.unwrap();
        assert!(!status.feed_active && !status.tick_armed);
    }

    #[tokio::test(start_paused = true)]
    async fn subscription_sees_feed_ticks_and_unsubscribes_on_drop() {
        let (handle, _task) = start(5);
        handle.initialize(batch(10)).await.unwrap();
        let mut sub = handle.subscribe().await.unwrap();
        handle.activate_feed().await.unwrap();

        let change = sub.changed().await.unwrap();
        assert_eq!(change.cause, crate::engine::ChangeCause::FeedTick);
        assert_eq!((change.visible, change.total), (10, 10));
        assert_eq!(handle.status().await.unwrap().subscribers, 1);

        drop(sub);
        assert_eq!(handle.status().await.unwrap().subscribers, 0);
    }

    #[tokio::test]
    async fn invalid_sort_is_reported_and_previous_kept() {
        let (handle, _task) = start(6);
        handle.set_sort(Some(SortSpec::desc(SortField::Volume))).await.unwrap();
        let err = handle.set_sort_by_name("mood", "asc").await.unwrap_err();
        assert!(matches!(err, AppError::InvalidSortField(_)));
        assert_eq!(handle.status().await.unwrap().sort, Some(SortSpec::desc(SortField::Volume)));
    }

    #[tokio::test]
    async fn bootstrap_failure_sets_load_state() {
        let (handle, _task) = start(7);
        assert!(bootstrap(&mut FailingSource, &handle).await.is_err());
        match handle.status().await.unwrap().load_state {
            LoadState::Failed(reason) => assert!(reason.contains("upstream unavailable")),
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn shutdown_closes_the_handle() {
        let (handle, task) = start(8);
        handle.initialize(batch(3)).await.unwrap();
        handle.shutdown().await.unwrap();
        task.await.unwrap();
        assert!(matches!(handle.projection().await, Err(AppError::ServiceClosed)));
    }
}
