//! Pure projection: (entities, tab, filter, sort) → ordered rows.
//!
//! Nothing in here holds state. Identical inputs always produce identical
//! output, which is what lets the view cache a result and compare
//! successive results by value.

use std::cmp::Ordering;

use crate::types::{ActiveCategory, Entity, FilterSpec, SortDirection, SortField, SortSpec};

/// Sort key for a single column, borrowed from the entity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SortKey<'a> {
    Number(f64),
    Text(&'a str),
}

impl SortKey<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            (SortKey::Text(a), SortKey::Text(b)) => locale_cmp(a, b),
            // A field is either always numeric or always text.
            _ => Ordering::Equal,
        }
    }
}

pub fn sort_key(entity: &Entity, field: SortField) -> SortKey<'_> {
    match field {
        SortField::Price => SortKey::Number(entity.price),
        SortField::PriceChangePercent => SortKey::Number(entity.price_change_percent),
        SortField::Volume => SortKey::Number(entity.volume),
        SortField::MarketCap => SortKey::Number(entity.market_cap),
        SortField::Liquidity => SortKey::Number(entity.liquidity),
        SortField::Holders => SortKey::Number(entity.holders as f64),
        SortField::CreatedAt => SortKey::Number(entity.created_at_ms as f64),
        SortField::Symbol => SortKey::Text(&entity.symbol),
        SortField::Name => SortKey::Text(&entity.name),
        SortField::Chain => SortKey::Text(&entity.chain),
    }
}

/// Dictionary-style ordering: letters compare case-insensitively first,
/// then lowercase sorts before uppercase, then raw code points break any
/// remaining tie.
///
/// Accents are not folded: `é` is its own letter and orders by code point,
/// so "éa" lands after "zz" rather than next to "ea".
pub fn locale_cmp(a: &str, b: &str) -> Ordering {
    let folded = a
        .chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase));
    folded
        .then_with(|| {
            a.chars()
                .map(char::is_uppercase)
                .cmp(b.chars().map(char::is_uppercase))
        })
        .then_with(|| a.cmp(b))
}

impl FilterSpec {
    /// True when `entity` satisfies every present constraint.
    pub fn matches(&self, entity: &Entity) -> bool {
        if let Some(term) = self.search_term() {
            let needle = term.to_lowercase();
            let hit = entity.symbol.to_lowercase().contains(&needle)
                || entity.name.to_lowercase().contains(&needle)
                || entity.contract_address.to_lowercase().contains(&needle);
            if !hit {
                return false;
            }
        }
        if self.verified.is_some_and(|v| entity.verified != v) {
            return false;
        }
        if self.trending.is_some_and(|t| entity.trending != t) {
            return false;
        }
        in_range(entity.volume, self.min_volume, self.max_volume)
            && in_range(entity.market_cap, self.min_market_cap, self.max_market_cap)
    }
}

fn in_range(value: f64, min: Option<f64>, max: Option<f64>) -> bool {
    min.map_or(true, |m| value >= m) && max.map_or(true, |m| value <= m)
}

/// Category filter, then predicate filter, then an optional stable sort.
/// Without a sort the store's arrival order is kept.
pub fn project(
    entities: &[Entity],
    active: ActiveCategory,
    filter: &FilterSpec,
    sort: Option<SortSpec>,
) -> Vec<Entity> {
    let mut rows: Vec<Entity> = entities
        .iter()
        .filter(|e| active.admits(e.category))
        .filter(|e| filter.matches(e))
        .cloned()
        .collect();

    if let Some(spec) = sort {
        // `sort_by` is stable: equal keys keep their filtered order in
        // both directions.
        rows.sort_by(|a, b| {
            let ord = sort_key(a, spec.field).compare(&sort_key(b, spec.field));
            match spec.direction {
                SortDirection::Asc => ord,
                SortDirection::Desc => ord.reverse(),
            }
        });
    }

    rows
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
