use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::AppError;

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A tracked token. `id` and the descriptive fields are fixed at creation;
/// only the volatile numeric block is ever rewritten (through [`EntityPatch`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub symbol: String,
    pub name: String,
    pub chain: String,
    pub contract_address: String,
    /// Milliseconds since the UTC epoch.
    pub created_at_ms: i64,
    pub category: Category,
    pub verified: bool,
    pub trending: bool,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub logo: Option<String>,

    pub price: f64,
    pub price_change_percent: f64,
    pub volume: f64,
    pub market_cap: f64,
    pub liquidity: f64,
    pub holders: u64,
}

impl Entity {
    /// Merge every present field of `patch` into the volatile block.
    pub fn apply(&mut self, patch: &EntityPatch) {
        if let Some(price) = patch.price {
            self.price = price;
        }
        if let Some(change) = patch.price_change_percent {
            self.price_change_percent = change;
        }
        if let Some(volume) = patch.volume {
            self.volume = volume;
        }
        if let Some(market_cap) = patch.market_cap {
            self.market_cap = market_cap;
        }
        if let Some(liquidity) = patch.liquidity {
            self.liquidity = liquidity;
        }
        if let Some(holders) = patch.holders {
            self.holders = holders;
        }
    }
}

/// Partial update of an entity's volatile fields. Absent fields are left alone.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPatch {
    pub price: Option<f64>,
    pub price_change_percent: Option<f64>,
    pub volume: Option<f64>,
    pub market_cap: Option<f64>,
    pub liquidity: Option<f64>,
    pub holders: Option<u64>,
}

impl EntityPatch {
    pub fn price(price: f64, price_change_percent: f64) -> Self {
        Self {
            price: Some(price),
            price_change_percent: Some(price_change_percent),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ---------------------------------------------------------------------------
// Category
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    New,
    Transitioning,
    Settled,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::New, Category::Transitioning, Category::Settled];

    pub fn label(self) -> &'static str {
        match self {
            Category::New => "New Pairs",
            Category::Transitioning => "Final Stretch",
            Category::Settled => "Migrated",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Category::New => "new",
            Category::Transitioning => "transitioning",
            Category::Settled => "settled",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Category {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "new" => Ok(Category::New),
            "transitioning" | "final-stretch" => Ok(Category::Transitioning),
            "settled" | "migrated" => Ok(Category::Settled),
            _ => Err(AppError::InvalidCategory(s.to_string())),
        }
    }
}

/// The tab the user is looking at: one category, or everything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActiveCategory {
    All,
    #[serde(untagged)]
    Only(Category),
}

impl ActiveCategory {
    pub fn admits(self, category: Category) -> bool {
        match self {
            ActiveCategory::All => true,
            ActiveCategory::Only(c) => c == category,
        }
    }
}

impl Default for ActiveCategory {
    fn default() -> Self {
        ActiveCategory::Only(Category::New)
    }
}

impl From<Category> for ActiveCategory {
    fn from(c: Category) -> Self {
        ActiveCategory::Only(c)
    }
}

impl std::fmt::Display for ActiveCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActiveCategory::All => write!(f, "all"),
            ActiveCategory::Only(c) => write!(f, "{c}"),
        }
    }
}

impl FromStr for ActiveCategory {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.trim().eq_ignore_ascii_case("all") {
            return Ok(ActiveCategory::All);
        }
        s.parse::<Category>().map(ActiveCategory::Only)
    }
}

/// Tab badge counts over the whole store, independent of any filter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CategoryCounts {
    pub new: usize,
    pub transitioning: usize,
    pub settled: usize,
    pub all: usize,
}

impl CategoryCounts {
    pub fn tally<'a>(entities: impl IntoIterator<Item = &'a Entity>) -> Self {
        let mut counts = Self::default();
        for entity in entities {
            match entity.category {
                Category::New => counts.new += 1,
                Category::Transitioning => counts.transitioning += 1,
                Category::Settled => counts.settled += 1,
            }
            counts.all += 1;
        }
        counts
    }

    pub fn get(&self, active: ActiveCategory) -> usize {
        match active {
            ActiveCategory::All => self.all,
            ActiveCategory::Only(Category::New) => self.new,
            ActiveCategory::Only(Category::Transitioning) => self.transitioning,
            ActiveCategory::Only(Category::Settled) => self.settled,
        }
    }
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

/// Optional predicates, ANDed together. `None` means "no constraint".
/// Volume and market cap ranges are inclusive on both ends.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterSpec {
    pub search: Option<String>,
    pub verified: Option<bool>,
    pub trending: Option<bool>,
    pub min_volume: Option<f64>,
    pub max_volume: Option<f64>,
    pub min_market_cap: Option<f64>,
    pub max_market_cap: Option<f64>,
}

impl FilterSpec {
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        self.search = Some(term.into());
        self
    }

    pub fn with_verified(mut self, verified: bool) -> Self {
        self.verified = Some(verified);
        self
    }

    pub fn with_trending(mut self, trending: bool) -> Self {
        self.trending = Some(trending);
        self
    }

    pub fn with_volume_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_volume = min;
        self.max_volume = max;
        self
    }

    pub fn with_market_cap_range(mut self, min: Option<f64>, max: Option<f64>) -> Self {
        self.min_market_cap = min;
        self.max_market_cap = max;
        self
    }

    /// The search term, if it would actually constrain anything.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }

    pub fn is_empty(&self) -> bool {
        self.search_term().is_none()
            && self.verified.is_none()
            && self.trending.is_none()
            && self.min_volume.is_none()
            && self.max_volume.is_none()
            && self.min_market_cap.is_none()
            && self.max_market_cap.is_none()
    }
}

// ---------------------------------------------------------------------------
// Sorting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    Price,
    PriceChangePercent,
    Volume,
    MarketCap,
    Liquidity,
    Holders,
    CreatedAt,
    Symbol,
    Name,
    Chain,
}

impl SortField {
    pub const ALL: [SortField; 10] = [
        SortField::Price,
        SortField::PriceChangePercent,
        SortField::Volume,
        SortField::MarketCap,
        SortField::Liquidity,
        SortField::Holders,
        SortField::CreatedAt,
        SortField::Symbol,
        SortField::Name,
        SortField::Chain,
    ];

    pub fn is_numeric(self) -> bool {
        !matches!(self, SortField::Symbol | SortField::Name | SortField::Chain)
    }
}

impl std::fmt::Display for SortField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SortField::Price => "price",
            SortField::PriceChangePercent => "price_change_percent",
            SortField::Volume => "volume",
            SortField::MarketCap => "market_cap",
            SortField::Liquidity => "liquidity",
            SortField::Holders => "holders",
            SortField::CreatedAt => "created_at",
            SortField::Symbol => "symbol",
            SortField::Name => "name",
            SortField::Chain => "chain",
        };
        write!(f, "{s}")
    }
}

impl FromStr for SortField {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let field = match s.trim() {
            "price" => SortField::Price,
            "price_change_percent" | "priceChangePercent" | "priceChange24h" => {
                SortField::PriceChangePercent
            }
            "volume" | "volume24h" => SortField::Volume,
            "market_cap" | "marketCap" => SortField::MarketCap,
            "liquidity" => SortField::Liquidity,
            "holders" => SortField::Holders,
            "created_at" | "createdAt" | "timestamp" => SortField::CreatedAt,
            "symbol" => SortField::Symbol,
            "name" => SortField::Name,
            "chain" => SortField::Chain,
            _ => return Err(AppError::InvalidSortField(s.to_string())),
        };
        Ok(field)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    Desc,
}

impl std::fmt::Display for SortDirection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SortDirection::Asc => write!(f, "asc"),
            SortDirection::Desc => write!(f, "desc"),
        }
    }
}

impl FromStr for SortDirection {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Asc),
            "desc" => Ok(SortDirection::Desc),
            _ => Err(AppError::InvalidSortField(format!("direction {s}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn asc(field: SortField) -> Self {
        Self { field, direction: SortDirection::Asc }
    }

    pub fn desc(field: SortField) -> Self {
        Self { field, direction: SortDirection::Desc }
    }

    /// Parse a `(field, direction)` pair coming from outside the type system.
    pub fn parse(field: &str, direction: &str) -> Result<Self, AppError> {
        Ok(Self {
            field: field.parse()?,
            direction: direction.parse()?,
        })
    }

    /// Header-click behaviour: a field already sorted `desc` flips to `asc`,
    /// everything else starts at `desc`.
    pub fn toggle(current: Option<SortSpec>, field: SortField) -> SortSpec {
        match current {
            Some(s) if s.field == field && s.direction == SortDirection::Desc => Self::asc(field),
            _ => Self::desc(field),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
