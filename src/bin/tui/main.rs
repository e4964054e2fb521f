mod app;

use std::fs::OpenOptions;
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Clear, Paragraph, Row, Table},
    Frame, Terminal,
};
use tracing_subscriber::EnvFilter;

use app::{tristate_label, AppState, InputMode, TABS};
use token_screener::config::Config;
use token_screener::engine::{Engine, LoadState};
use token_screener::error::Result;
use token_screener::format::{
    compact_number, currency, large_number, micros, percentage, time_ago, truncate,
    truncate_address,
};
use token_screener::service::{self, EngineHandle, Subscription};
use token_screener::source::{now_ms, EntitySource, MockSource, StaticSource};
use token_screener::types::{ActiveCategory, Entity, SortDirection, SortField};
use token_screener::view::ViewState;

/// Upper bound on how long a key press or a feed change waits to be drawn.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };
    init_logging(&cfg)?;

    let (feed_rng, source_rng) = match cfg.seed {
        Some(seed) => (StdRng::seed_from_u64(seed), StdRng::seed_from_u64(seed.wrapping_add(1))),
        None => (StdRng::from_entropy(), StdRng::from_entropy()),
    };
    let engine = Engine::with_view(feed_rng, cfg.feed, ViewState::with_category(cfg.initial_category))?;
    let (handle, task) = service::spawn(engine);
    let mut subscription = handle.subscribe().await?;

    // Load in the background so the first frame shows the pending state.
    let loader = handle.clone();
    match &cfg.fixture_path {
        Some(path) => {
            let mut source = StaticSource::from_file(path)?;
            tokio::spawn(async move { load(&mut source, &loader).await });
        }
        None => {
            let mut source = MockSource::from_config(source_rng, &cfg);
            tokio::spawn(async move { load(&mut source, &loader).await });
        }
    }

    let mut app = AppState::new();
    app.refresh(&handle).await?;

    // Terminal setup
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let result = run_loop(&mut terminal, &mut app, &handle, &mut subscription).await;

    // Restore terminal regardless of result
    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    drop(subscription);
    handle.shutdown().await.ok();
    task.await.ok();
    result
}

async fn load<S: EntitySource>(source: &mut S, handle: &EngineHandle) {
    if service::bootstrap(source, handle).await.is_ok() {
        handle.activate_feed().await.ok();
    }
}

/// Logs go to `LOG_FILE` when set; otherwise the terminal belongs to the UI
/// and nothing is logged.
fn init_logging(cfg: &Config) -> Result<()> {
    let Ok(path) = std::env::var("LOG_FILE") else {
        return Ok(());
    };
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .init();
    Ok(())
}

// ---------------------------------------------------------------------------
// Main event loop
// ---------------------------------------------------------------------------

async fn run_loop(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    app: &mut AppState,
    handle: &EngineHandle,
    subscription: &mut Subscription,
) -> Result<()> {
    loop {
        terminal.draw(|f| render(f, app))?;

        if event::poll(POLL_INTERVAL)? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match app.handle_key(handle, key).await {
                        Ok(true) => {}
                        Ok(false) => return Ok(()),
                        Err(e) => app.notice = Some(e.to_string()),
                    }
                }
            }
        }

        // Coalesce however many changes piled up into one re-read.
        let mut changed = false;
        while subscription.try_changed().is_some() {
            changed = true;
        }
        if changed || app.status.as_ref().is_some_and(|s| s.load_state == LoadState::Pending) {
            app.refresh(handle).await?;
        }
    }
}

// ---------------------------------------------------------------------------
// Rendering
// ---------------------------------------------------------------------------

fn render(f: &mut Frame, app: &mut AppState) {
    let area = f.area();

    // Outer vertical split: header | body | footer
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // header
            Constraint::Min(0),    // body
            Constraint::Length(2), // footer
        ])
        .split(area);

    render_header(f, app, chunks[0]);
    render_table(f, app, chunks[1]);
    render_footer(f, app, chunks[2]);

    if let Some(entity) = app.detail_entity() {
        render_detail(f, entity, area);
    }
}

fn render_header(f: &mut Frame, app: &AppState, area: Rect) {
    let (state_text, state_color) = match app.status.as_ref().map(|s| (&s.load_state, s.feed_active)) {
        Some((LoadState::Ready, true)) => ("● live".to_string(), Color::Green),
        Some((LoadState::Ready, false)) => ("○ paused".to_string(), Color::Yellow),
        Some((LoadState::Failed(reason), _)) => (format!("✗ {}", truncate(reason, 40)), Color::Red),
        _ => ("◌ loading".to_string(), Color::Yellow),
    };

    let mut spans = vec![
        Span::styled(
            " Token Screener  ",
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(state_text, Style::default().fg(state_color)),
    ];

    if let Some(status) = &app.status {
        for (i, tab) in TABS.iter().enumerate() {
            let label = match tab {
                ActiveCategory::All => "All".to_string(),
                ActiveCategory::Only(c) => c.label().to_string(),
            };
            let style = if *tab == status.active_category {
                Style::default().fg(Color::Black).bg(Color::Cyan).add_modifier(Modifier::BOLD)
            } else {
                Style::default().fg(Color::White)
            };
            spans.push(Span::raw("  │  "));
            spans.push(Span::styled(
                format!("[{}] {} ({})", i + 1, label, status.counts.get(*tab)),
                style,
            ));
        }
    }

    let paragraph = Paragraph::new(Line::from(spans)).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::DarkGray)),
    );
    f.render_widget(paragraph, area);
}

/// Column label, the sort field it maps to (if any) and its width.
const COLUMNS: [(&str, Option<SortField>, Constraint); 11] = [
    ("#", None, Constraint::Length(3)),
    ("Token", Some(SortField::Symbol), Constraint::Length(10)),
    ("Name", Some(SortField::Name), Constraint::Min(12)),
    ("Chain", Some(SortField::Chain), Constraint::Length(6)),
    ("Price", Some(SortField::Price), Constraint::Length(14)),
    ("24h", Some(SortField::PriceChangePercent), Constraint::Length(9)),
    ("Volume", Some(SortField::Volume), Constraint::Length(9)),
    ("MCap", Some(SortField::MarketCap), Constraint::Length(9)),
    ("Liq", Some(SortField::Liquidity), Constraint::Length(9)),
    ("Holders", Some(SortField::Holders), Constraint::Length(8)),
    ("Age", Some(SortField::CreatedAt), Constraint::Length(9)),
];

fn render_table(f: &mut Frame, app: &mut AppState, area: Rect) {
    let sort = app.status.as_ref().and_then(|s| s.sort);
    let header_cells = COLUMNS.iter().map(|(label, field, _)| {
        let arrow = match sort {
            Some(s) if Some(s.field) == *field => match s.direction {
                SortDirection::Asc => " ▲",
                SortDirection::Desc => " ▼",
            },
            _ => "",
        };
        Cell::from(format!("{label}{arrow}"))
            .style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD))
    });
    let header = Row::new(header_cells).height(1);

    let now = now_ms();
    let rows: Vec<Row> = app
        .rows
        .iter()
        .enumerate()
        .map(|(i, e)| {
            let change_color = if e.price_change_percent >= 0.0 { Color::Green } else { Color::Red };
            let mut symbol = e.symbol.clone();
            if e.verified {
                symbol.push('✓');
            }
            let row = Row::new(vec![
                Cell::from(format!("{}", i + 1)).style(Style::default().fg(Color::DarkGray)),
                Cell::from(symbol).style(Style::default().add_modifier(Modifier::BOLD)),
                Cell::from(truncate(&e.name, 20)),
                Cell::from(e.chain.clone()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(currency(e.price, 2)).style(Style::default().fg(change_color)),
                Cell::from(percentage(e.price_change_percent, 2)).style(Style::default().fg(change_color)),
                Cell::from(large_number(e.volume)),
                Cell::from(large_number(e.market_cap)),
                Cell::from(large_number(e.liquidity)),
                Cell::from(compact_number(e.holders as f64)),
                Cell::from(time_ago(e.created_at_ms, now)).style(Style::default().fg(Color::DarkGray)),
            ]);
            if app.is_flashing(&e.id) {
                row.style(Style::default().bg(Color::Rgb(40, 40, 70)))
            } else {
                row
            }
        })
        .collect();

    let title = match app.status.as_ref().map(|s| s.active_category) {
        Some(tab) => format!(" {} ", tab.to_string().to_uppercase()),
        None => " TOKENS ".to_string(),
    };
    let widths = COLUMNS.map(|(_, _, width)| width);
    let table = Table::new(rows, widths)
        .header(header)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::DarkGray))
                .title(Span::styled(
                    title,
                    Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
                )),
        )
        .row_highlight_style(Style::default().bg(Color::DarkGray).add_modifier(Modifier::BOLD));

    f.render_stateful_widget(table, area, &mut app.table);
}

fn render_footer(f: &mut Frame, app: &AppState, area: Rect) {
    let lines = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(1), Constraint::Length(1)])
        .split(area);

    let (verified, trending) = app
        .status
        .as_ref()
        .map_or((None, None), |s| (s.filter.verified, s.filter.trending));
    let search_style = if app.mode == InputMode::Search {
        Style::default().fg(Color::Black).bg(Color::Yellow)
    } else {
        Style::default().fg(Color::White)
    };
    let cursor = if app.mode == InputMode::Search { "▏" } else { "" };

    let mut filter_spans = vec![
        Span::styled(" search: ", Style::default().fg(Color::DarkGray)),
        Span::styled(format!("{}{cursor}", app.search), search_style),
        Span::styled("  verified: ", Style::default().fg(Color::DarkGray)),
        Span::raw(tristate_label(verified)),
        Span::styled("  trending: ", Style::default().fg(Color::DarkGray)),
        Span::raw(tristate_label(trending)),
    ];
    if let Some(status) = &app.status {
        filter_spans.push(Span::styled(
            format!(
                "  │  showing {} of {}  │  recompute p50 {} p99 {}",
                app.rows.len(),
                status.counts.all,
                micros(status.recompute.p50_us),
                micros(status.recompute.p99_us)
            ),
            Style::default().fg(Color::Cyan),
        ));
    }
    if let Some(notice) = &app.notice {
        filter_spans.push(Span::styled(format!("  {notice}"), Style::default().fg(Color::Red)));
    }
    f.render_widget(Paragraph::new(Line::from(filter_spans)), lines[0]);

    let keys = Line::from(vec![
        Span::styled(" [q] ", Style::default().fg(Color::Yellow)),
        Span::raw("quit  "),
        Span::styled("[1-4] ", Style::default().fg(Color::Yellow)),
        Span::raw("tab  "),
        Span::styled("[/] ", Style::default().fg(Color::Yellow)),
        Span::raw("search  "),
        Span::styled("[v t] ", Style::default().fg(Color::Yellow)),
        Span::raw("verified/trending  "),
        Span::styled("[p c o m l h a s n k] ", Style::default().fg(Color::Yellow)),
        Span::raw("sort  "),
        Span::styled("[space] ", Style::default().fg(Color::Yellow)),
        Span::raw("feed  "),
        Span::styled("[x] ", Style::default().fg(Color::Yellow)),
        Span::raw("reset  "),
        Span::styled("[↑↓ enter] ", Style::default().fg(Color::Yellow)),
        Span::raw("details"),
    ]);
    f.render_widget(Paragraph::new(keys).style(Style::default().fg(Color::White)), lines[1]);
}

fn render_detail(f: &mut Frame, e: &Entity, area: Rect) {
    let popup = centered(area, 60, 14);
    let label = Style::default().fg(Color::DarkGray);
    let field = |name: &'static str, value: String| {
        Line::from(vec![Span::styled(format!("{name:>12}  "), label), Span::raw(value)])
    };

    let lines = vec![
        field("name", format!("{} {}", e.logo.as_deref().unwrap_or(""), e.name)),
        field("symbol", e.symbol.clone()),
        field("category", e.category.label().to_string()),
        field("chain", e.chain.clone()),
        field("address", truncate_address(&e.contract_address)),
        field("price", currency(e.price, 2)),
        field("24h", percentage(e.price_change_percent, 2)),
        field("volume", currency(e.volume, 0)),
        field("market cap", currency(e.market_cap, 0)),
        field("liquidity", currency(e.liquidity, 0)),
        field("holders", e.holders.to_string()),
        field(
            "flags",
            format!(
                "{}{}{}",
                if e.verified { "verified " } else { "" },
                if e.trending { "trending " } else { "" },
                e.tags.join(" ")
            ),
        ),
    ];

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(Span::styled(
                format!(" {} ", e.symbol),
                Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
            )),
    );
    f.render_widget(Clear, popup);
    f.render_widget(paragraph, popup);
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}
