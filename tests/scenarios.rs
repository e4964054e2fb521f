//! End-to-end behaviour through `EngineHandle`, with a seeded feed and paused
//! tokio time.

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use token_screener::config::FeedConfig;
use token_screener::engine::{ChangeCause, Engine, LoadState};
use token_screener::error::AppError;
use token_screener::service::{self, bootstrap, EngineHandle};
use token_screener::source::{MockSource, StaticSource};
use token_screener::types::{
    ActiveCategory, Category, Entity, EntityPatch, FilterSpec, SortField, SortSpec,
};

fn entity(id: &str, price: f64, volume: f64, category: Category) -> Entity {
    Entity {
        id: id.to_string(),
        symbol: id.to_uppercase(),
        name: format!("{id} token"),
        chain: "ETH".to_string(),
        contract_address: format!("0x{id}"),
        created_at_ms: 1_700_000_000_000,
        category,
        verified: false,
        trending: false,
        tags: Vec::new(),
        logo: None,
        price,
        price_change_percent: 0.0,
        volume,
        market_cap: 1_000_000.0,
        liquidity: 50_000.0,
        holders: 100,
    }
}

fn start(seed: u64) -> EngineHandle {
    let (handle, _task) = service::spawn(
        Engine::new(StdRng::seed_from_u64(seed), FeedConfig::default()).unwrap(),
    );
    handle
}

async fn projected_ids(handle: &EngineHandle) -> Vec<String> {
    handle
        .projection()
        .await
        .unwrap()
        .iter()
        .map(|e| e.id.clone())
        .collect()
}

#[tokio::test]
async fn category_sort_update_and_filter_walkthrough() {
    let handle = start(1);
    handle
        .initialize(vec![
            entity("a", 1.0, 10.0, Category::New),
            entity("b", 2.0, 20.0, Category::New),
            entity("c", 3.0, 30.0, Category::Settled),
        ])
        .await
        .unwrap();

    handle.set_active_category(Category::New.into()).await.unwrap();
    assert_eq!(projected_ids(&handle).await, ["a", "b"]);

    handle.set_sort(Some(SortSpec::desc(SortField::Price))).await.unwrap();
    assert_eq!(projected_ids(&handle).await, ["b", "a"]);

    assert!(handle.apply_update("a", EntityPatch::price(5.0, 0.0)).await.unwrap());
    assert_eq!(projected_ids(&handle).await, ["a", "b"]);

    handle
        .set_filter(FilterSpec::default().with_volume_range(Some(100.0), None))
        .await
        .unwrap();
    assert!(projected_ids(&handle).await.is_empty());
}

#[tokio::test]
async fn projection_before_initialize_is_empty() {
    let handle = start(2);
    assert!(handle.projection().await.unwrap().is_empty());
    assert_eq!(handle.status().await.unwrap().load_state, LoadState::Pending);
}

#[tokio::test]
async fn duplicate_ids_reject_the_batch_and_keep_the_store() {
    let handle = start(3);
    handle
        .initialize(vec![entity("a", 1.0, 1.0, Category::New)])
        .await
        .unwrap();
    let before = handle.snapshot().await.unwrap();

    let err = handle
        .initialize(vec![
            entity("x", 1.0, 1.0, Category::New),
            entity("x", 2.0, 1.0, Category::New),
        ])
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::InvalidBatch { ref id } if id == "x"));
    assert!(Arc::ptr_eq(&before, &handle.snapshot().await.unwrap()));
    assert_eq!(handle.status().await.unwrap().load_state, LoadState::Ready);
}

#[tokio::test]
async fn update_for_missing_id_changes_nothing() {
    let handle = start(4);
    handle
        .initialize(vec![entity("a", 1.0, 1.0, Category::New)])
        .await
        .unwrap();
    let before = handle.projection().await.unwrap();

    assert!(!handle.apply_update("ghost", EntityPatch::price(9.0, 9.0)).await.unwrap());
    assert!(Arc::ptr_eq(&before, &handle.projection().await.unwrap()));
}

#[tokio::test(start_paused = true)]
async fn one_tick_moves_three_to_five_prices_and_nothing_else() {
    let handle = start(5);
    let batch: Vec<Entity> = (0..10)
        .map(|i| entity(&format!("t{i}"), 10.0 + i as f64, 1_000.0, Category::New))
        .collect();
    handle.initialize(batch).await.unwrap();
    let before = handle.snapshot().await.unwrap();

    handle.activate_feed().await.unwrap();
    // First tick fires in [3s, 5s); a second one cannot land before 6s.
    tokio::time::sleep(Duration::from_millis(5_000)).await;
    assert_eq!(handle.status().await.unwrap().ticks_applied, 1);
    let after = handle.snapshot().await.unwrap();

    assert_eq!(after.len(), 10);
    let mut moved = 0;
    for (old, new) in before.iter().zip(after.iter()) {
        assert_eq!(old.id, new.id);
        assert_eq!(old.category, new.category);
        if old == new {
            continue;
        }
        moved += 1;
        assert_ne!(old.price, new.price);
        let step = (new.price - old.price) / old.price * 100.0;
        assert!(step.abs() <= 5.0 + 1e-9, "swing {step} out of bounds");
        assert!((new.price_change_percent - (old.price_change_percent + step)).abs() < 1e-9);
    }
    assert!((3..=5).contains(&moved), "moved {moved}");
}

#[tokio::test(start_paused = true)]
async fn deactivated_feed_leaves_entities_alone() {
    let handle = start(6);
    handle
        .initialize((0..10).map(|i| entity(&format!("t{i}"), 1.0, 1.0, Category::New)).collect())
        .await
        .unwrap();
    handle.activate_feed().await.unwrap();
    handle.deactivate_feed().await.unwrap();
    let frozen = handle.snapshot().await.unwrap();

    tokio::time::sleep(Duration::from_millis(5_000)).await;
    tokio::time::sleep(Duration::from_millis(20_000)).await;

    assert_eq!(*handle.snapshot().await.unwrap(), *frozen);
    assert_eq!(handle.status().await.unwrap().ticks_applied, 0);
}

#[tokio::test(start_paused = true)]
async fn subscribers_hear_about_loads_view_changes_and_ticks() {
    let handle = start(7);
    let mut sub = handle.subscribe().await.unwrap();

    let mut source = StaticSource::new(vec![
        entity("a", 1.0, 1.0, Category::New),
        entity("b", 2.0, 1.0, Category::Transitioning),
    ]);
    assert_eq!(bootstrap(&mut source, &handle).await.unwrap(), 2);
    let loaded = sub.changed().await.unwrap();
    assert_eq!(loaded.cause, ChangeCause::Loaded);
    assert_eq!((loaded.visible, loaded.total), (1, 2));

    // Same value twice: only one notification.
    handle.set_active_category(ActiveCategory::All).await.unwrap();
    handle.set_active_category(ActiveCategory::All).await.unwrap();
    let switched = sub.changed().await.unwrap();
    assert_eq!(switched.cause, ChangeCause::ViewChanged);
    assert_eq!(switched.visible, 2);
    assert!(sub.try_changed().is_none());

    handle.activate_feed().await.unwrap();
    let tick = sub.changed().await.unwrap();
    assert_eq!(tick.cause, ChangeCause::FeedTick);
    assert!(tick.revision > switched.revision);
}

#[tokio::test(start_paused = true)]
async fn mock_bootstrap_fills_every_tab() {
    let handle = start(8);
    let mut source = MockSource::new(StdRng::seed_from_u64(80), 15, 12, 10)
        .with_latency(Duration::from_millis(1_000));
    assert_eq!(bootstrap(&mut source, &handle).await.unwrap(), 37);

    let status = handle.status().await.unwrap();
    assert_eq!(status.load_state, LoadState::Ready);
    assert_eq!(
        (status.counts.new, status.counts.transitioning, status.counts.settled, status.counts.all),
        (15, 12, 10, 37)
    );
    assert_eq!(handle.projection().await.unwrap().len(), 15);

    handle.set_active_category(ActiveCategory::All).await.unwrap();
    handle.set_sort_by_name("marketCap", "desc").await.unwrap();
    let rows = handle.projection().await.unwrap();
    assert_eq!(rows.len(), 37);
    assert!(rows.windows(2).all(|w| w[0].market_cap >= w[1].market_cap));
}
