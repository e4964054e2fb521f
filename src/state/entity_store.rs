use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::error::{AppError, Result};
use crate::types::{CategoryCounts, Entity, EntityPatch};

/// Point-in-time view of every entity in arrival order. Never mutated after
/// it has been handed out.
pub type Snapshot = Arc<Vec<Entity>>;

// ---------------------------------------------------------------------------
// EntityStore
// ---------------------------------------------------------------------------

/// Canonical keyed collection of entities.
///
/// Records live in an `Arc<Vec<_>>` in arrival order. Writes go through
/// `Arc::make_mut`, so a snapshot taken before a write keeps the old records
/// and one taken after sees every field of that write: readers can never
/// observe half of an update.
#[derive(Debug, Default)]
pub struct EntityStore {
    /// Arrival order.
    entities: Snapshot,
    /// id → position in `entities`
    index: HashMap<String, usize>,
    /// Bumped on every successful load or applied update.
    revision: u64,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole store. A duplicated id rejects the batch and leaves
    /// the current contents untouched.
    pub fn load(&mut self, entities: Vec<Entity>) -> Result<()> {
        let mut index = HashMap::with_capacity(entities.len());
        for (pos, entity) in entities.iter().enumerate() {
            if index.insert(entity.id.clone(), pos).is_some() {
                return Err(AppError::InvalidBatch { id: entity.id.clone() });
            }
        }

        self.entities = Arc::new(entities);
        self.index = index;
        self.revision += 1;
        Ok(())
    }

    /// Merge `patch` into the entity with this id. Returns false, and changes
    /// nothing, when the id is not in the store.
    pub fn apply_update(&mut self, id: &str, patch: &EntityPatch) -> bool {
        let Some(&pos) = self.index.get(id) else {
            debug!(entity_id = %id, "update target missing, dropped");
            return false;
        };
        Arc::make_mut(&mut self.entities)[pos].apply(patch);
        self.revision += 1;
        true
    }

    /// Apply a batch of updates as one write: a single revision bump, and no
    /// snapshot can land between two of them. Returns how many were applied.
    pub fn apply_batch(&mut self, updates: &[(String, EntityPatch)]) -> usize {
        let positions: Vec<(usize, &EntityPatch)> = updates
            .iter()
            .filter_map(|(id, patch)| match self.index.get(id) {
                Some(&pos) => Some((pos, patch)),
                None => {
                    debug!(entity_id = %id, "update target missing, dropped");
                    None
                }
            })
            .collect();

        if positions.is_empty() {
            return 0;
        }

        let entities = Arc::make_mut(&mut self.entities);
        for &(pos, patch) in &positions {
            entities[pos].apply(patch);
        }
        self.revision += 1;
        positions.len()
    }

    pub fn snapshot(&self) -> Snapshot {
        Arc::clone(&self.entities)
    }

    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.index.get(id).map(|&pos| &self.entities[pos])
    }

    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn category_counts(&self) -> CategoryCounts {
        CategoryCounts::tally(self.entities.iter())
    }

    /// Drop every record (teardown). Counts as a write.
    pub fn clear(&mut self) {
        self.entities = Arc::new(Vec::new());
        self.index.clear();
        self.revision += 1;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Category;

    fn entity(id: &str, price: f64, category: Category) -> Entity {
        Entity {
            id: id.to_string(),
            symbol: id.to_uppercase(),
            name: format!("{id} token"),
            chain: "SOL".to_string(),
            contract_address: format!("0x{id}"),
            created_at_ms: 0,
            category,
            verified: false,
            trending: false,
            tags: Vec::new(),
            logo: None,
            price,
            price_change_percent: 0.0,
            volume: 0.0,
            market_cap: 0.0,
            liquidity: 0.0,
            holders: 0,
        }
    }

    #[test]
    fn load_keeps_arrival_order() {
        let mut store = EntityStore::new();
        store
            .load(vec![
                entity("c", 3.0, Category::Settled),
                entity("a", 1.0, Category::New),
                entity("b", 2.0, Category::New),
            ])
            .unwrap();

        let ids: Vec<&str> = store.entities().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        assert_eq!(store.get("a").map(|e| e.price), Some(1.0));
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn duplicate_id_rejects_batch_and_keeps_old_contents() {
        let mut store = EntityStore::new();
        store.load(vec![entity("a", 1.0, Category::New)]).unwrap();

        let err = store
            .load(vec![
                entity("x", 1.0, Category::New),
                entity("y", 1.0, Category::New),
                entity("x", 2.0, Category::New),
            ])
            .unwrap_err();

        match err {
            AppError::InvalidBatch { id } => assert_eq!(id, "x"),
            other => panic!("expected InvalidBatch, got {other:?}"),
        }
        assert_eq!(store.len(), 1);
        assert!(store.contains("a"));
        assert!(!store.contains("x"));
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn update_to_missing_id_is_a_silent_noop() {
        let mut store = EntityStore::new();
        store.load(vec![entity("a", 1.0, Category::New)]).unwrap();
        let before = store.snapshot();

        assert!(!store.apply_update("ghost", &EntityPatch::price(9.0, 0.0)));
        assert_eq!(store.revision(), 1);
        assert_eq!(*store.snapshot(), *before);
    }

    #[test]
    fn snapshot_is_isolated_from_later_writes() {
        let mut store = EntityStore::new();
        store
            .load(vec![entity("a", 1.0, Category::New), entity("b", 2.0, Category::New)])
            .unwrap();
        let before = store.snapshot();

        let mut patch = EntityPatch::price(5.0, 400.0);
        patch.volume = Some(1000.0);
        assert!(store.apply_update("a", &patch));

        assert_eq!(before[0].price, 1.0);
        assert_eq!(before[0].volume, 0.0);
        let after = store.snapshot();
        assert_eq!(after[0].price, 5.0);
        assert_eq!(after[0].price_change_percent, 400.0);
        assert_eq!(after[0].volume, 1000.0);
        assert_eq!(after[0].category, Category::New);
    }

    #[test]
    fn batch_is_one_revision_and_skips_missing() {
        let mut store = EntityStore::new();
        store
            .load(vec![entity("a", 1.0, Category::New), entity("b", 2.0, Category::New)])
            .unwrap();

        let applied = store.apply_batch(&[
            ("a".to_string(), EntityPatch::price(1.5, 50.0)),
            ("gone".to_string(), EntityPatch::price(0.0, 0.0)),
            ("b".to_string(), EntityPatch::price(2.5, 25.0)),
        ]);

        assert_eq!(applied, 2);
        assert_eq!(store.revision(), 2);
        assert_eq!(store.get("a").unwrap().price, 1.5);
        assert_eq!(store.get("b").unwrap().price, 2.5);

        assert_eq!(store.apply_batch(&[("gone".to_string(), EntityPatch::default())]), 0);
        assert_eq!(store.revision(), 2);
    }

    #[test]
    fn counts_per_category() {
        let mut store = EntityStore::new();
        store
            .load(vec![
                entity("a", 1.0, Category::New),
                entity("b", 1.0, Category::New),
                entity("c", 1.0, Category::Settled),
            ])
            .unwrap();
        let counts = store.category_counts();
        assert_eq!((counts.new, counts.transitioning, counts.settled, counts.all), (2, 0, 1, 3));
    }
}
