//! The output layer registry.

use std::collections::BTreeMap;
use std::sync::Mutex;

use ahash::AHashMap;

/// Value-type tag recorded in the vector-layers metadata: 0 string,
/// 1 number, 2 boolean.
pub type AttributeTypeTag = u8;

/// One output layer's configuration.
pub struct Layer {
    pub name: String,
    pub min_zoom: u8,
    /// True when the layer's z-order sorts ascending.
    pub z_order_ascending: bool,
    /// `key -> value-type` of every attribute ever written to the layer,
    /// for the archive's vector-layers metadata table.
    attribute_types: Mutex<BTreeMap<String, AttributeTypeTag>>,
}

impl Layer {
    pub fn attribute_types(&self) -> BTreeMap<String, AttributeTypeTag> {
        self.attribute_types.lock().unwrap().clone()
    }
}

/// The registered layers, by definition order and by name.
#[derive(Default)]
pub struct Layers {
    layers: Vec<Layer>,
    by_name: AHashMap<String, u16>,
}

impl Layers {
    pub fn new() -> Layers {
        Layers::default()
    }

    /// Registers a layer; returns its index. Re-registering a name
    /// returns the existing index.
    pub fn add(&mut self, name: &str, min_zoom: u8, z_order_ascending: bool) -> u16 {
        if let Some(&index) = self.by_name.get(name) {
            return index;
        }
        let index = self.layers.len() as u16;
        self.layers.push(Layer {
            name: name.to_string(),
            min_zoom,
            z_order_ascending,
            attribute_types: Mutex::new(BTreeMap::new()),
        });
        self.by_name.insert(name.to_string(), index);
        index
    }

    pub fn index_of(&self, name: &str) -> Option<u16> {
        self.by_name.get(name).copied()
    }

    pub fn get(&self, index: u16) -> &Layer {
        &self.layers[index as usize]
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    /// Per-layer z-order direction bits, indexed by layer, for the
    /// per-tile sort.
    pub fn sort_orders(&self) -> Vec<bool> {
        self.layers.iter().map(|l| l.z_order_ascending).collect()
    }

    /// Records that `key` was written to `layer` with the given type.
    pub fn note_attribute(&self, layer: u16, key: &str, type_tag: AttributeTypeTag) {
        self.layers[layer as usize]
            .attribute_types
            .lock()
            .unwrap()
            .insert(key.to_string(), type_tag);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry() {
        let mut layers = Layers::new();
        let roads = layers.add("roads", 6, true);
        let pois = layers.add("pois", 12, false);
        assert_eq!(layers.add("roads", 9, false), roads);
        assert_eq!(layers.len(), 2);
        assert_eq!(layers.index_of("roads"), Some(roads));
        assert_eq!(layers.index_of("water"), None);
        assert_eq!(layers.get(pois).min_zoom, 12);
        assert_eq!(layers.sort_orders(), vec![true, false]);
    }

    #[test]
    fn test_attribute_metadata() {
        let mut layers = Layers::new();
        let roads = layers.add("roads", 6, true);
        layers.note_attribute(roads, "name", 0);
        layers.note_attribute(roads, "lanes", 1);
        let types = layers.get(roads).attribute_types();
        assert_eq!(types["name"], 0);
        assert_eq!(types["lanes"], 1);
    }
}
