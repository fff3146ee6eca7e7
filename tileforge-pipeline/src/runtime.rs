//! The call contract between the pipeline and the user profile.
//!
//! The profile is a script (canonically Lua) hosted by an external
//! embedding; the pipeline only depends on this trait. Each worker owns
//! its own runtime instance, created by the factory, so no runtime state
//! is ever shared across threads; the binding between a runtime and its
//! worker is the `Feature` argument, never a thread-local.
//!
//! Shapefile attribute remapping (`attribute_function`) belongs to the
//! external shapefile loader and has no hook here.

use tileforge_common::Result;

use crate::processing::Feature;

/// One worker's instance of the user profile.
///
/// The `*_function` methods mirror the script globals of the same names;
/// the optional ones are gated by the `can_*` queries so the driver can
/// skip whole phases for profiles that never use relations.
pub trait ScriptRuntime: Send {
    /// Called once per runtime before any entity, with the project name.
    fn init_function(&mut self, _project_name: &str) -> Result<()> {
        Ok(())
    }

    /// Tag keys that make an otherwise anonymous node "significant"
    /// (worth a `node_function` call).
    fn node_keys(&self) -> Vec<String>;

    fn node_function(&mut self, feature: &mut Feature<'_>) -> Result<()>;

    fn way_function(&mut self, feature: &mut Feature<'_>) -> Result<()>;

    /// Whether the profile implements `relation_scan_function`.
    fn can_read_relations(&self) -> bool {
        false
    }

    /// Whether the profile implements `relation_function`.
    fn can_write_relations(&self) -> bool {
        false
    }

    /// Relation-scan pass: call [`Feature::accept`] to keep the relation.
    fn relation_scan_function(&mut self, _feature: &mut Feature<'_>) -> Result<()> {
        Ok(())
    }

    /// Non-multipolygon relation emission.
    fn relation_function(&mut self, _feature: &mut Feature<'_>) -> Result<()> {
        Ok(())
    }

    /// Called once per runtime after the read finishes.
    fn exit_function(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Creates one [`ScriptRuntime`] per worker.
pub trait ScriptRuntimeFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn ScriptRuntime>>;
}

impl<F> ScriptRuntimeFactory for F
where
    F: Fn() -> Result<Box<dyn ScriptRuntime>> + Send + Sync,
{
    fn create(&self) -> Result<Box<dyn ScriptRuntime>> {
        self()
    }
}
