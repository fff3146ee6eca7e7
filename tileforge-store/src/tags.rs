//! A borrowed, allocation-free view over one entity's tags.
//!
//! Tags arrive as parallel arrays of indexes into the owning block's string
//! table. Most OSM objects have only a handful of tags, and most tags are
//! never queried by a given profile, so the view defers everything: a
//! lookup is a linear scan comparing full byte slices, and values are
//! returned as borrowed strings that must not outlive the entity's
//! processing. [`TagView::export_owned`] produces the owning copy kept for
//! scan-accepted relations.

use std::collections::BTreeMap;

/// Position of a tag within the entity's tag arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TagSlot(pub u32);

/// Non-owning tag view over a block's string table.
#[derive(Clone, Copy)]
pub struct TagView<'a> {
    string_table: &'a [String],
    key_indexes: &'a [u32],
    value_indexes: &'a [u32],
}

impl<'a> TagView<'a> {
    /// Builds a view over parallel `(key, value)` index arrays.
    ///
    /// # Panics
    ///
    /// Panics if the arrays differ in length.
    pub fn new(
        string_table: &'a [String],
        key_indexes: &'a [u32],
        value_indexes: &'a [u32],
    ) -> TagView<'a> {
        assert_eq!(key_indexes.len(), value_indexes.len());
        TagView {
            string_table,
            key_indexes,
            value_indexes,
        }
    }

    pub fn len(&self) -> usize {
        self.key_indexes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.key_indexes.is_empty()
    }

    /// Finds the tag with the given key. Byte-slice comparison over the
    /// full length; tag arity is small, so this is a linear scan.
    pub fn find_key(&self, key: &[u8]) -> Option<TagSlot> {
        for (i, &key_index) in self.key_indexes.iter().enumerate() {
            if self.string_table[key_index as usize].as_bytes() == key {
                return Some(TagSlot(i as u32));
            }
        }
        None
    }

    /// Finds a tag whose *value* equals the given bytes. Used to hand an
    /// already-interned string back to the caller without allocating.
    pub fn find_value(&self, value: &[u8]) -> Option<TagSlot> {
        for (i, &value_index) in self.value_indexes.iter().enumerate() {
            if self.string_table[value_index as usize].as_bytes() == value {
                return Some(TagSlot(i as u32));
            }
        }
        None
    }

    /// The key interned at `slot`.
    pub fn key(&self, slot: TagSlot) -> &'a str {
        &self.string_table[self.key_indexes[slot.0 as usize] as usize]
    }

    /// The value interned at `slot`. Borrowed from the block's string
    /// table; do not retain past the current entity.
    pub fn value(&self, slot: TagSlot) -> &'a str {
        &self.string_table[self.value_indexes[slot.0 as usize] as usize]
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        (0..self.len() as u32).map(|i| (self.key(TagSlot(i)), self.value(TagSlot(i))))
    }

    /// Copies the tags into an owned map for long-lived use.
    pub fn export_owned(&self) -> BTreeMap<String, String> {
        self.iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> Vec<String> {
        ["", "highway", "primary", "name", "Main Street", "primar"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }

    #[test]
    fn test_key_lookup() {
        let table = table();
        let keys = [1u32, 3];
        let values = [2u32, 4];
        let view = TagView::new(&table, &keys, &values);

        let slot = view.find_key(b"highway").unwrap();
        assert_eq!(view.value(slot), "primary");
        assert_eq!(view.key(slot), "highway");
        let slot = view.find_key(b"name").unwrap();
        assert_eq!(view.value(slot), "Main Street");
        assert!(view.find_key(b"building").is_none());
        // A prefix of a stored key must not match.
        assert!(view.find_key(b"high").is_none());
    }

    #[test]
    fn test_value_lookup_compares_full_slice() {
        let table = table();
        let keys = [1u32];
        let values = [2u32];
        let view = TagView::new(&table, &keys, &values);
        assert_eq!(view.find_value(b"primary"), Some(TagSlot(0)));
        // Neither a prefix nor an extension may match.
        assert!(view.find_value(b"primar").is_none());
        assert!(view.find_value(b"primaryy").is_none());
    }

    #[test]
    fn test_export_owned() {
        let table = table();
        let keys = [1u32, 3];
        let values = [2u32, 4];
        let view = TagView::new(&table, &keys, &values);
        let owned = view.export_owned();
        assert_eq!(owned.len(), 2);
        assert_eq!(owned["highway"], "primary");
        assert_eq!(owned["name"], "Main Street");
    }

    #[test]
    fn test_empty() {
        let table = table();
        let view = TagView::new(&table, &[], &[]);
        assert!(view.is_empty());
        assert!(view.find_key(b"highway").is_none());
    }
}
