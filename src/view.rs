use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, warn};

use crate::error::Result;
use crate::metrics::{LatencySummary, RecomputeStats};
use crate::projection::project;
use crate::state::EntityStore;
use crate::types::{ActiveCategory, Entity, FilterSpec, SortField, SortSpec};

/// Ordered rows currently shown to the user. Cheap to clone and share.
pub type Projection = Arc<[Entity]>;

struct CachedProjection {
    /// Store revision the rows were derived from.
    store_revision: u64,
    rows: Projection,
}

/// The user's selection plus the last projection derived from it.
///
/// Setters compare by value and report whether anything changed; an unchanged
/// value keeps the cache. The cache is also dropped implicitly whenever the
/// store revision moves past the one it was built from.
pub struct ViewState {
    active: ActiveCategory,
    filter: FilterSpec,
    sort: Option<SortSpec>,
    cache: Option<CachedProjection>,
    stats: RecomputeStats,
}

impl ViewState {
    pub fn new() -> Self {
        Self::with_category(ActiveCategory::default())
    }

    pub fn with_category(active: ActiveCategory) -> Self {
        Self {
            active,
            filter: FilterSpec::default(),
            sort: None,
            cache: None,
            stats: RecomputeStats::new(),
        }
    }

    pub fn active_category(&self) -> ActiveCategory {
        self.active
    }

    pub fn filter(&self) -> &FilterSpec {
        &self.filter
    }

    pub fn sort(&self) -> Option<SortSpec> {
        self.sort
    }

    pub fn set_active_category(&mut self, active: ActiveCategory) -> bool {
        if self.active == active {
            return false;
        }
        self.active = active;
        self.invalidate();
        true
    }

    pub fn set_sort(&mut self, sort: Option<SortSpec>) -> bool {
        if self.sort == sort {
            return false;
        }
        self.sort = sort;
        self.invalidate();
        true
    }

    /// Sort by names coming from outside (a header label, a config value).
    /// An unknown field or direction is rejected and the current sort kept.
    pub fn set_sort_by_name(&mut self, field: &str, direction: &str) -> Result<bool> {
        let spec = SortSpec::parse(field, direction).inspect_err(|e| {
            warn!(field, direction, "sort request rejected: {e}");
        })?;
        Ok(self.set_sort(Some(spec)))
    }

    /// Header-click sort on `field`. Returns the sort now in effect.
    pub fn toggle_sort(&mut self, field: SortField) -> SortSpec {
        let next = SortSpec::toggle(self.sort, field);
        self.set_sort(Some(next));
        next
    }

    pub fn set_filter(&mut self, filter: FilterSpec) -> bool {
        if self.filter == filter {
            return false;
        }
        self.filter = filter;
        self.invalidate();
        true
    }

    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn is_stale(&self, store: &EntityStore) -> bool {
        self.cache
            .as_ref()
            .map_or(true, |c| c.store_revision != store.revision())
    }

    /// Current projection over `store`, recomputed only when stale.
    pub fn projection(&mut self, store: &EntityStore) -> Projection {
        if let Some(cached) = &self.cache {
            if cached.store_revision == store.revision() {
                return Arc::clone(&cached.rows);
            }
        }

        let started = Instant::now();
        let rows: Projection = project(store.entities(), self.active, &self.filter, self.sort).into();
        let elapsed = started.elapsed();
        self.stats.record(elapsed);
        debug!(
            rows = rows.len(),
            total = store.len(),
            elapsed_us = elapsed.as_micros() as u64,
            "projection recomputed"
        );

        self.cache = Some(CachedProjection {
            store_revision: store.revision(),
            rows: Arc::clone(&rows),
        });
        rows
    }

    pub fn recompute_latency(&self) -> LatencySummary {
        self.stats.summary()
    }

    pub fn recompute_count(&self) -> u64 {
        self.stats.len()
    }
}

impl Default for ViewState {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
