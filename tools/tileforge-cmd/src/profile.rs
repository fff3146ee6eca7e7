//! The built-in tag-processing profile.
//!
//! The canonical deployment hosts the user's script through an external
//! embedding implementing [`ScriptRuntime`]; this built-in profile keeps
//! the binary usable on its own with a small general-purpose schema
//! (roads, buildings, water, points of interest).

use tileforge_common::Result;
use tileforge_pipeline::layers::Layers;
use tileforge_pipeline::{Feature, ScriptRuntime, ScriptRuntimeFactory};

pub fn builtin_layers() -> Layers {
    let mut layers = Layers::new();
    layers.add("poi", 12, true);
    layers.add("road", 6, true);
    layers.add("building", 13, true);
    layers.add("water", 4, true);
    layers
}

pub struct BuiltinProfile;

impl ScriptRuntime for BuiltinProfile {
    fn node_keys(&self) -> Vec<String> {
        vec!["amenity".to_string(), "shop".to_string(), "tourism".to_string()]
    }

    fn node_function(&mut self, feature: &mut Feature<'_>) -> Result<()> {
        for key in ["amenity", "shop", "tourism"] {
            let value = feature.find(key);
            if !value.is_empty() {
                feature.layer("poi", false)?;
                feature.attribute(key, value, 0)?;
                let name = feature.find("name");
                feature.attribute("name", name, 14)?;
                return Ok(());
            }
        }
        Ok(())
    }

    fn way_function(&mut self, feature: &mut Feature<'_>) -> Result<()> {
        if feature.find("natural") == "water" || feature.find("waterway") == "riverbank" {
            feature.layer("water", true)?;
            feature.attribute_boolean("water", true, 0)?;
            return Ok(());
        }

        if feature.holds("building") {
            feature.layer("building", true)?;
            feature.attribute_boolean("building", true, 0)?;
            return Ok(());
        }

        let highway = feature.find("highway");
        if !highway.is_empty() {
            feature.layer("road", false)?;
            feature.attribute("highway", highway, 0)?;
            let name = feature.find("name");
            if !name.is_empty() {
                feature.layer("road", false)?;
                feature.attribute("name", name, 12)?;
            }
            let layer_tag = feature.find("layer");
            if let Ok(z) = layer_tag.parse::<f64>() {
                feature.z_order(z)?;
            }
        }
        Ok(())
    }
}

pub struct BuiltinProfileFactory;

impl ScriptRuntimeFactory for BuiltinProfileFactory {
    fn create(&self) -> Result<Box<dyn ScriptRuntime>> {
        Ok(Box::new(BuiltinProfile))
    }
}
