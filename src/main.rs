use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use token_screener::config::Config;
use token_screener::engine::{Engine, ProjectionChanged};
use token_screener::error::Result;
use token_screener::format::{currency, large_number, micros, percentage};
use token_screener::service::{self, EngineHandle};
use token_screener::source::{MockSource, StaticSource};
use token_screener::view::ViewState;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    let (feed_rng, source_rng) = match cfg.seed {
        Some(seed) => (StdRng::seed_from_u64(seed), StdRng::seed_from_u64(seed.wrapping_add(1))),
        None => (StdRng::from_entropy(), StdRng::from_entropy()),
    };

    let engine = Engine::with_view(feed_rng, cfg.feed, ViewState::with_category(cfg.initial_category))?;
    let (handle, task) = service::spawn(engine);
    info!(
        tab = %cfg.initial_category,
        tick_min_ms = cfg.feed.tick_min.as_millis() as u64,
        tick_max_ms = cfg.feed.tick_max.as_millis() as u64,
        seed = ?cfg.seed,
        "engine started"
    );

    let mut subscription = handle.subscribe().await?;

    // --- Initial batch ---
    let loaded = match &cfg.fixture_path {
        Some(path) => service::bootstrap(&mut StaticSource::from_file(path)?, &handle).await?,
        None => {
            let mut source = MockSource::from_config(source_rng, &cfg);
            service::bootstrap(&mut source, &handle).await?
        }
    };
    let status = handle.status().await?;
    info!(
        entities = loaded,
        new = status.counts.new,
        transitioning = status.counts.transitioning,
        settled = status.counts.settled,
        "initial batch loaded"
    );

    handle.activate_feed().await?;

    loop {
        tokio::select! {
            change = subscription.changed() => match change {
                Some(change) => report(&handle, &change, cfg.report_rows).await?,
                None => {
                    warn!("engine stopped unexpectedly");
                    break;
                }
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    warn!("ctrl-c handler failed: {e}");
                }
                info!("shutting down");
                break;
            }
        }
    }

    drop(subscription);
    handle.deactivate_feed().await.ok();
    handle.shutdown().await.ok();
    if let Err(e) = task.await {
        warn!("engine task ended abnormally: {e}");
    }
    Ok(())
}

/// Log one projection change followed by its leading rows.
async fn report(handle: &EngineHandle, change: &ProjectionChanged, rows: usize) -> Result<()> {
    let projection = handle.projection().await?;
    let status = handle.status().await?;

    info!(
        revision = change.revision,
        cause = %change.cause,
        "showing {} of {} | recompute p50={} p99={}",
        change.visible,
        change.total,
        micros(status.recompute.p50_us),
        micros(status.recompute.p99_us),
    );
    for (rank, e) in projection.iter().take(rows).enumerate() {
        info!(
            "  {:>2}. {:<10} {:>14} {:>9}  vol {:>9}  mcap {:>9}",
            rank + 1,
            e.symbol,
            currency(e.price, 2),
            percentage(e.price_change_percent, 2),
            large_number(e.volume),
            large_number(e.market_cap),
        );
    }
    Ok(())
}
