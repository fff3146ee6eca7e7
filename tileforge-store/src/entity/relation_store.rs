//! Relation store: outer/inner way memberships keyed by relation id.

use std::sync::RwLock;

use tileforge_common::{Error, OsmEntity, Result};
use tileforge_workflow::PhasePool;

use super::{RelationData, RelationStore, sort_by_id};
use crate::ids::RelationId;

pub struct BinarySearchRelationStore {
    data: RwLock<Vec<(RelationId, RelationData)>>,
}

impl BinarySearchRelationStore {
    pub fn new() -> BinarySearchRelationStore {
        BinarySearchRelationStore {
            data: RwLock::new(Vec::new()),
        }
    }
}

impl Default for BinarySearchRelationStore {
    fn default() -> BinarySearchRelationStore {
        BinarySearchRelationStore::new()
    }
}

impl RelationStore for BinarySearchRelationStore {
    fn insert(&self, mut batch: Vec<(RelationId, RelationData)>) {
        self.data.write().unwrap().append(&mut batch);
    }

    fn at(&self, id: RelationId) -> Result<RelationData> {
        let data = self.data.read().unwrap();
        match data.binary_search_by_key(&id, |e| e.0) {
            Ok(i) => Ok(data[i].1.clone()),
            Err(_) => Err(Error::missing_entity(OsmEntity::Relation, id)),
        }
    }

    fn finalize(&self, pool: &PhasePool) {
        let mut data = self.data.write().unwrap();
        let mut sorted = sort_by_id(std::mem::take(&mut *data), pool, |e| e.0);
        sorted.dedup_by(|a, b| a.0 == b.0);
        *data = sorted;
    }

    fn len(&self) -> usize {
        self.data.read().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_and_lookup() {
        let store = BinarySearchRelationStore::new();
        store.insert(vec![(
            9,
            RelationData {
                outers: vec![1, 2],
                inners: vec![3],
            },
        )]);
        store.finalize(&PhasePool::new(2));
        let data = store.at(9).unwrap();
        assert_eq!(data.outers, vec![1, 2]);
        assert_eq!(data.inners, vec![3]);
        assert!(store.at(10).unwrap_err().is_missing_entity());
    }
}
