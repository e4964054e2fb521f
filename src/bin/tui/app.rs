use std::collections::HashMap;
use std::time::{Duration, Instant};

use crossterm::event::{KeyCode, KeyEvent};
use ratatui::widgets::TableState;
use tracing::warn;

use token_screener::error::Result;
use token_screener::service::{EngineHandle, EngineStatus};
use token_screener::types::{ActiveCategory, Category, Entity, FilterSpec, SortField};
use token_screener::view::Projection;

/// How long a row stays highlighted after its price moved.
pub const FLASH_FOR: Duration = Duration::from_millis(900);

/// Number keys map onto tabs in this order.
pub const TABS: [ActiveCategory; 4] = [
    ActiveCategory::Only(Category::New),
    ActiveCategory::Only(Category::Transitioning),
    ActiveCategory::Only(Category::Settled),
    ActiveCategory::All,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Search,
}

pub struct AppState {
    pub rows: Projection,
    pub status: Option<EngineStatus>,
    pub table: TableState,
    pub mode: InputMode,
    /// Search box contents; pushed to the engine on every keystroke.
    pub search: String,
    /// Id of the row shown in the detail popup.
    pub detail: Option<String>,
    /// Last rejected action, shown in the footer until the next key.
    pub notice: Option<String>,
    last_prices: HashMap<String, f64>,
    flashes: HashMap<String, Instant>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            rows: Projection::from(Vec::new()),
            status: None,
            table: TableState::default(),
            mode: InputMode::Normal,
            search: String::new(),
            detail: None,
            notice: None,
            last_prices: HashMap::new(),
            flashes: HashMap::new(),
        }
    }

    /// Re-read rows and status from the engine.
    pub async fn refresh(&mut self, handle: &EngineHandle) -> Result<()> {
        let rows = handle.projection().await?;
        self.status = Some(handle.status().await?);
        self.track_price_moves(&rows, Instant::now());
        self.rows = rows;
        self.clamp_selection();
        Ok(())
    }

    fn track_price_moves(&mut self, rows: &[Entity], now: Instant) {
        for row in rows {
            match self.last_prices.insert(row.id.clone(), row.price) {
                Some(previous) if previous != row.price => {
                    self.flashes.insert(row.id.clone(), now);
                }
                _ => {}
            }
        }
        self.flashes.retain(|_, at| now.duration_since(*at) < FLASH_FOR);
    }

    pub fn is_flashing(&self, id: &str) -> bool {
        self.flashes
            .get(id)
            .is_some_and(|at| at.elapsed() < FLASH_FOR)
    }

    pub fn selected(&self) -> Option<&Entity> {
        self.table.selected().and_then(|i| self.rows.get(i))
    }

    pub fn detail_entity(&self) -> Option<&Entity> {
        let id = self.detail.as_deref()?;
        self.rows.iter().find(|e| e.id == id)
    }

    fn clamp_selection(&mut self) {
        match self.table.selected() {
            Some(_) if self.rows.is_empty() => self.table.select(None),
            Some(i) if i >= self.rows.len() => self.table.select(Some(self.rows.len() - 1)),
            _ => {}
        }
    }

    fn filter(&self) -> FilterSpec {
        self.status
            .as_ref()
            .map(|s| s.filter.clone())
            .unwrap_or_default()
    }

    /// Apply one key press. Returns false when the user asked to quit.
    pub async fn handle_key(&mut self, handle: &EngineHandle, key: KeyEvent) -> Result<bool> {
        self.notice = None;
        if self.mode == InputMode::Search {
            self.search_key(handle, key.code).await?;
            return Ok(true);
        }
        if self.detail.is_some() {
            if matches!(key.code, KeyCode::Esc | KeyCode::Enter | KeyCode::Char('q')) {
                self.detail = None;
            }
            return Ok(true);
        }

        match key.code {
            KeyCode::Char('q') | KeyCode::Char('Q') => return Ok(false),
            KeyCode::Char(c @ '1'..='4') => {
                let tab = TABS[(c as usize) - ('1' as usize)];
                handle.set_active_category(tab).await?;
                self.table.select(None);
            }
            KeyCode::Char('/') => self.mode = InputMode::Search,
            KeyCode::Char('v') => {
                let mut filter = self.filter();
                filter.verified = cycle(filter.verified);
                handle.set_filter(filter).await?;
            }
            KeyCode::Char('t') => {
                let mut filter = self.filter();
                filter.trending = cycle(filter.trending);
                handle.set_filter(filter).await?;
            }
            KeyCode::Char(' ') => {
                let running = self.status.as_ref().is_some_and(|s| s.feed_requested);
                if running {
                    handle.deactivate_feed().await?;
                } else {
                    handle.activate_feed().await?;
                }
            }
            KeyCode::Char('x') => {
                self.search.clear();
                handle.set_filter(FilterSpec::default()).await?;
                handle.set_sort(None).await?;
            }
            KeyCode::Down | KeyCode::Char('j') => {
                let max = self.rows.len().saturating_sub(1);
                let next = self.table.selected().map_or(0, |i| (i + 1).min(max));
                self.table.select(Some(next));
            }
            KeyCode::Char(c) => {
                if let Some(field) = sort_key(c) {
                    handle.toggle_sort(field).await?;
                }
            }
            KeyCode::Enter => {
                self.detail = self.selected().map(|e| e.id.clone());
            }
            KeyCode::Up => {
                let prev = self.table.selected().map_or(0, |i| i.saturating_sub(1));
                self.table.select(Some(prev));
            }
            KeyCode::Esc => self.table.select(None),
            _ => {}
        }
        self.refresh(handle).await?;
        Ok(true)
    }

    async fn search_key(&mut self, handle: &EngineHandle, code: KeyCode) -> Result<()> {
        match code {
            KeyCode::Enter => {
                self.mode = InputMode::Normal;
                return Ok(());
            }
            KeyCode::Esc => {
                self.mode = InputMode::Normal;
                self.search.clear();
            }
            KeyCode::Backspace => {
                self.search.pop();
            }
            KeyCode::Char(c) => self.search.push(c),
            _ => return Ok(()),
        }

        let term = self.search.trim();
        let mut filter = self.filter();
        filter.search = (!term.is_empty()).then(|| term.to_string());
        if let Err(e) = handle.set_filter(filter).await {
            warn!("search not applied: {e}");
            self.notice = Some(e.to_string());
            return Err(e);
        }
        self.refresh(handle).await
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

/// Sort hotkeys. Letters taken by other actions (`v`, `t`, `x`, `q`, `j`)
/// are not used here.
pub fn sort_key(c: char) -> Option<SortField> {
    let field = match c {
        'p' => SortField::Price,
        'c' => SortField::PriceChangePercent,
        'o' => SortField::Volume,
        'm' => SortField::MarketCap,
        'l' => SortField::Liquidity,
        'h' => SortField::Holders,
        'a' => SortField::CreatedAt,
        's' => SortField::Symbol,
        'n' => SortField::Name,
        'k' => SortField::Chain,
        _ => return None,
    };
    Some(field)
}

/// Any → yes → no → any.
pub fn cycle(value: Option<bool>) -> Option<bool> {
    match value {
        None => Some(true),
        Some(true) => Some(false),
        Some(false) => None,
    }
}

pub fn tristate_label(value: Option<bool>) -> &'static str {
    match value {
        None => "any",
        Some(true) => "yes",
        Some(false) => "no",
    }
}
