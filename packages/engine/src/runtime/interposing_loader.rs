// packages/engine/src/runtime/interposing_loader.rs
//! Loader that rewrites call sites of matching modules
//!
//! For a name accepted by the predicate the loader takes the raw bytes from
//! its parent's resources, applies the registry's rules and defines the
//! result in its own space. Every other name goes to the parent untouched,
//! so the parent's caching and identity are preserved.

use crate::interception::registry::RuleRegistry;
use crate::module::format::resource_path;
use crate::module::transform;
use crate::runtime::loader::ModuleLoader;
use crate::runtime::space::{Module, ModuleSpace};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use std::sync::{Arc, Weak};
use tracing::{debug, info};

pub type NamePredicate = Arc<dyn Fn(&str) -> bool + Send + Sync>;

pub struct InterposingLoader {
    label: String,
    parent: Arc<dyn ModuleLoader>,
    predicate: NamePredicate,
    registry: RuleRegistry,
    space: ModuleSpace,
    this: Weak<InterposingLoader>,
}

impl InterposingLoader {
    pub fn new(
        parent: Arc<dyn ModuleLoader>,
        predicate: impl Fn(&str) -> bool + Send + Sync + 'static,
        registry: RuleRegistry,
    ) -> Arc<Self> {
        let label = format!("interpose({})", parent.label());
        Arc::new_cyclic(|this| Self {
            space: ModuleSpace::new(label.clone()),
            label,
            parent,
            predicate: Arc::new(predicate),
            registry,
            this: this.clone(),
        })
    }

    /// Rewrite modules whose name starts with any of `prefixes`
    pub fn with_prefixes(
        parent: Arc<dyn ModuleLoader>,
        prefixes: Vec<String>,
        registry: RuleRegistry,
    ) -> Arc<Self> {
        Self::new(
            parent,
            move |name: &str| prefixes.iter().any(|prefix| name.starts_with(prefix.as_str())),
            registry,
        )
    }

    pub fn parent(&self) -> &Arc<dyn ModuleLoader> {
        &self.parent
    }

    pub fn matches(&self, name: &str) -> bool {
        (self.predicate)(name)
    }

    pub fn space(&self) -> &ModuleSpace {
        &self.space
    }

    fn load_rewritten(&self, name: &str) -> Result<Arc<Module>> {
        let rules = self.registry.freeze();

        if self.space.contains(name) {
            return Err(EngineError::DefineConflict(name.to_string()));
        }

        let bytes = self
            .parent
            .resource(&resource_path(name))?
            .ok_or_else(|| EngineError::ResourceNotFound(name.to_string()))?;

        let (rewritten, report) = transform(&bytes, &rules)?;
        debug!(
            "Rewrote {} call sites in {} ({} -> {} bytes)",
            report.call_sites(),
            name,
            bytes.len(),
            rewritten.len()
        );

        let owner: Weak<dyn ModuleLoader> = self.this.clone();
        let module = self.space.define(name, rewritten, true, owner)?;
        if !report.is_unchanged() {
            info!("Interposed {} call sites in {}", report.call_sites(), name);
        }
        Ok(module)
    }
}

impl ModuleLoader for InterposingLoader {
    fn label(&self) -> &str {
        &self.label
    }

    fn load(&self, name: &str) -> Result<Arc<Module>> {
        if !self.matches(name) {
            // The registry freezes on the first load either way.
            self.registry.freeze();
            return self.parent.load(name);
        }
        self.load_rewritten(name)
    }

    fn find_loaded(&self, name: &str) -> Option<Arc<Module>> {
        if self.matches(name) {
            self.space.get(name)
        } else {
            self.parent.find_loaded(name)
        }
    }

    fn resource(&self, path: &str) -> Result<Option<Bytes>> {
        self.parent.resource(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interception::registry::RegistryError;
    use crate::interception::symbol::{CallKind, Signature};
    use crate::module::builder::ModuleBuilder;
    use crate::module::format::ACC_STATIC;
    use crate::module::instruction::Instruction;
    use crate::runtime::loader::BundleLoader;

    fn exiting_module(name: &str, code: i64) -> Bytes {
        let mut builder = ModuleBuilder::new(name);
        builder
            .method("main", "()V", ACC_STATIC)
            .const_int(code)
            .invoke_static("core.System", "exit", "(I)V")
            .ret()
            .finish();
        builder.build().unwrap().to_bytes().unwrap()
    }

    fn exit_registry() -> RuleRegistry {
        let registry = RuleRegistry::new();
        registry
            .reroute_static(
                "core.System",
                "exit",
                Signature::parse("(I)V").unwrap(),
                "sandbox.Trap",
                "handleExit",
            )
            .unwrap();
        registry
    }

    fn parent() -> Arc<BundleLoader> {
        BundleLoader::from_modules([
            ("app.Main", exiting_module("app.Main", 2)),
            ("app.Worker", exiting_module("app.Worker", 3)),
            ("lib.Util", exiting_module("lib.Util", 4)),
        ])
    }

    fn first_invoke(module: &Module) -> String {
        let image = module.image();
        image.methods[0]
            .code
            .iter()
            .find_map(|insn| match insn {
                Instruction::Invoke {
                    kind: CallKind::Static,
                    index,
                } => image.pool.method(*index).map(|m| format!("{}.{}", m.owner, m.name)),
                _ => None,
            })
            .unwrap()
    }

    #[test]
    fn test_matched_module_is_rewritten() {
        let loader = InterposingLoader::with_prefixes(parent(), vec!["app.".into()], exit_registry());
        let module = loader.load("app.Main").unwrap();
        assert!(module.is_derived());
        assert_eq!(first_invoke(&module), "sandbox.Trap.handleExit");

        // References from inside resolve through the interposing loader
        let defining = module.defining_loader().unwrap();
        assert_eq!(defining.label(), loader.label());
    }

    #[test]
    fn test_unmatched_module_is_parents() {
        let parent = parent();
        let loader = InterposingLoader::with_prefixes(parent.clone(), vec!["app.".into()], exit_registry());

        let through_parent = parent.load("lib.Util").unwrap();
        let through_loader = loader.load("lib.Util").unwrap();
        assert!(Arc::ptr_eq(&through_parent, &through_loader));
        assert!(!through_loader.is_derived());
        assert_eq!(first_invoke(&through_loader), "core.System.exit");
        assert!(loader.space().is_empty());
    }

    #[test]
    fn test_second_load_conflicts() {
        let loader = InterposingLoader::with_prefixes(parent(), vec!["app.".into()], exit_registry());
        let first = loader.load("app.Main").unwrap();
        let err = loader.load("app.Main").unwrap_err();
        assert!(matches!(err, EngineError::DefineConflict(_)));

        // Resolution finds the existing definition instead
        let resolved = loader.resolve("app.Main").unwrap();
        assert!(Arc::ptr_eq(&first, &resolved));
    }

    #[test]
    fn test_missing_resource() {
        let loader = InterposingLoader::with_prefixes(parent(), vec!["app.".into()], exit_registry());
        let err = loader.load("app.Absent").unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(name) if name == "app.Absent"));
    }

    #[test]
    fn test_malformed_resource() {
        let parent = BundleLoader::from_modules([("app.Bad", Bytes::from_static(b"RMOD\x00"))]);
        let loader = InterposingLoader::with_prefixes(parent, vec!["app.".into()], exit_registry());
        assert!(matches!(loader.load("app.Bad"), Err(EngineError::Parse(_))));
    }

    #[test]
    fn test_first_load_freezes_registry() {
        let registry = exit_registry();
        let loader = InterposingLoader::with_prefixes(parent(), vec!["app.".into()], registry.clone());
        assert!(!registry.is_frozen());

        loader.load("lib.Util").unwrap();
        assert!(registry.is_frozen());

        let err = registry
            .reroute_static(
                "core.Boolean",
                "getBoolean",
                Signature::parse("(T)Z").unwrap(),
                "sandbox.Trap",
                "handleGetBoolean",
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::RegistryFrozen { .. }));
    }

    #[test]
    fn test_concurrent_loads_of_distinct_names() {
        use std::thread;

        let loader = InterposingLoader::with_prefixes(parent(), vec!["app.".into()], exit_registry());
        let handles: Vec<_> = ["app.Main", "app.Worker"]
            .into_iter()
            .map(|name| {
                let loader = Arc::clone(&loader);
                thread::spawn(move || loader.load(name))
            })
            .collect();

        for handle in handles {
            let module = handle.join().unwrap().unwrap();
            assert!(module.is_derived());
            assert_eq!(first_invoke(&module), "sandbox.Trap.handleExit");
        }
        assert_eq!(loader.space().names(), vec!["app.Main", "app.Worker"]);
    }
}
