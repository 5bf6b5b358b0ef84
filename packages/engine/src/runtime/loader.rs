// packages/engine/src/runtime/loader.rs
//! Module resolution contract and the artifact-backed loader
//!
//! Every loader owns a [`ModuleSpace`]. Modules remember the loader that
//! defined them and resolve their own references through it, so a module
//! defined by a wrapping loader sees the wrapper's view of its siblings.

use crate::module::format::resource_path;
use crate::runtime::space::{Module, ModuleSpace};
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Module resolution contract.
///
/// Implementations are shared across threads; `load` may run concurrently
/// for different names.
pub trait ModuleLoader: Send + Sync {
    /// Name used in logs
    fn label(&self) -> &str;

    /// Produce the module named `name`
    fn load(&self, name: &str) -> Result<Arc<Module>>;

    /// Module already defined under `name` in this loader's view
    fn find_loaded(&self, name: &str) -> Option<Arc<Module>>;

    /// Raw bytes of a resource, `None` when absent
    fn resource(&self, path: &str) -> Result<Option<Bytes>>;

    /// Find-then-load, used for on-demand resolution.
    ///
    /// A concurrent define of the same name between the two steps resolves
    /// to the module that won.
    fn resolve(&self, name: &str) -> Result<Arc<Module>> {
        if let Some(module) = self.find_loaded(name) {
            return Ok(module);
        }
        match self.load(name) {
            Err(EngineError::DefineConflict(conflict)) => self
                .find_loaded(name)
                .ok_or(EngineError::DefineConflict(conflict)),
            other => other,
        }
    }
}

enum BundleSource {
    Directory(PathBuf),
    Memory(HashMap<String, Bytes>),
}

/// Serves modules from an artifact directory or an in-memory bundle and
/// defines them unmodified
pub struct BundleLoader {
    label: String,
    source: BundleSource,
    space: ModuleSpace,
    this: Weak<BundleLoader>,
}

impl BundleLoader {
    /// Loader over an unpacked artifact directory
    pub fn from_dir(root: impl Into<PathBuf>) -> Arc<Self> {
        let root = root.into();
        let label = format!("bundle:{}", root.display());
        Self::with_source(label, BundleSource::Directory(root))
    }

    /// Loader over resources held in memory, keyed by resource path
    pub fn in_memory<I, K>(resources: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, Bytes)>,
        K: Into<String>,
    {
        let resources = resources.into_iter().map(|(k, v)| (k.into(), v)).collect();
        Self::with_source("bundle:memory".to_string(), BundleSource::Memory(resources))
    }

    /// In-memory loader keyed by module name instead of resource path
    pub fn from_modules<I, K>(modules: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (K, Bytes)>,
        K: AsRef<str>,
    {
        Self::in_memory(
            modules
                .into_iter()
                .map(|(name, bytes)| (resource_path(name.as_ref()), bytes)),
        )
    }

    fn with_source(label: String, source: BundleSource) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            space: ModuleSpace::new(label.clone()),
            label,
            source,
            this: this.clone(),
        })
    }

    pub fn space(&self) -> &ModuleSpace {
        &self.space
    }

    fn read(&self, path: &str) -> Result<Option<Bytes>> {
        match &self.source {
            BundleSource::Memory(resources) => Ok(resources.get(path).cloned()),
            BundleSource::Directory(root) => {
                let Some(relative) = safe_relative(path) else {
                    return Ok(None);
                };
                match std::fs::read(root.join(relative)) {
                    Ok(bytes) => Ok(Some(Bytes::from(bytes))),
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
                    Err(e) => Err(e.into()),
                }
            }
        }
    }
}

/// Resource paths stay inside the artifact root
fn safe_relative(path: &str) -> Option<&Path> {
    let path = Path::new(path);
    path.components()
        .all(|c| matches!(c, Component::Normal(_)))
        .then_some(path)
}

impl ModuleLoader for BundleLoader {
    fn label(&self) -> &str {
        &self.label
    }

    fn load(&self, name: &str) -> Result<Arc<Module>> {
        if let Some(module) = self.space.get(name) {
            return Ok(module);
        }

        let bytes = self
            .read(&resource_path(name))?
            .ok_or_else(|| EngineError::ResourceNotFound(name.to_string()))?;
        debug!("{} loading {} ({} bytes)", self.label, name, bytes.len());

        let owner: Weak<dyn ModuleLoader> = self.this.clone();
        match self.space.define(name, bytes, false, owner) {
            // Lost a race with another thread loading the same name
            Err(EngineError::DefineConflict(_)) => self
                .space
                .get(name)
                .ok_or_else(|| EngineError::DefineConflict(name.to_string())),
            other => other,
        }
    }

    fn find_loaded(&self, name: &str) -> Option<Arc<Module>> {
        self.space.get(name)
    }

    fn resource(&self, path: &str) -> Result<Option<Bytes>> {
        self.read(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::builder::ModuleBuilder;
    use crate::module::format::ACC_STATIC;

    fn module_bytes(name: &str) -> Bytes {
        let mut builder = ModuleBuilder::new(name);
        builder.method("main", "()V", ACC_STATIC).ret().finish();
        builder.build().unwrap().to_bytes().unwrap()
    }

    #[test]
    fn test_load_is_cached() {
        let loader = BundleLoader::from_modules([("app.Main", module_bytes("app.Main"))]);
        let first = loader.load("app.Main").unwrap();
        let second = loader.load("app.Main").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(!first.is_derived());

        let defining = first.defining_loader().unwrap();
        assert_eq!(defining.label(), loader.label());
    }

    #[test]
    fn test_missing_module() {
        let loader = BundleLoader::from_modules(Vec::<(&str, Bytes)>::new());
        let err = loader.load("app.Missing").unwrap_err();
        assert!(matches!(err, EngineError::ResourceNotFound(name) if name == "app.Missing"));
        assert!(loader.resolve("app.Missing").is_err());
    }

    #[test]
    fn test_directory_bundle() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("app")).unwrap();
        std::fs::write(dir.path().join("app/Main.rmod"), module_bytes("app.Main")).unwrap();
        std::fs::write(dir.path().join("notes.txt"), b"hi").unwrap();

        let loader = BundleLoader::from_dir(dir.path());
        assert_eq!(loader.resolve("app.Main").unwrap().name(), "app.Main");
        assert_eq!(loader.resource("notes.txt").unwrap().unwrap(), Bytes::from_static(b"hi"));
        assert!(loader.resource("absent.txt").unwrap().is_none());
        assert!(loader.resource("../escape").unwrap().is_none());
    }

    #[test]
    fn test_concurrent_resolve_same_name() {
        use std::thread;

        let loader = BundleLoader::from_modules([("app.Main", module_bytes("app.Main"))]);
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let loader = Arc::clone(&loader);
                thread::spawn(move || loader.resolve("app.Main").unwrap())
            })
            .collect();
        let modules: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert!(modules.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    }
}
