// packages/engine/src/runtime/space.rs
//! Symbol space: the set of modules defined by one loader
//!
//! Defining is the only write. It verifies the image first and then claims
//! the name through a single map entry, so two racing definitions of one
//! name cannot both succeed.

use crate::module::instruction::offsets;
use crate::module::verifier::verify_named;
use crate::module::ModuleImage;
use crate::runtime::loader::ModuleLoader;
use crate::utils::errors::{EngineError, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::info;

/// A defined module
pub struct Module {
    name: String,
    bytes: Bytes,
    image: ModuleImage,
    /// Byte offset of every instruction, per method
    offsets: Vec<Vec<u32>>,
    derived: bool,
    loader: Weak<dyn ModuleLoader>,
}

impl Module {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The bytes this module was defined from
    pub fn bytes(&self) -> &Bytes {
        &self.bytes
    }

    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    pub fn offsets(&self, method: usize) -> &[u32] {
        self.offsets.get(method).map(Vec::as_slice).unwrap_or_default()
    }

    /// Produced by a rewrite rather than loaded verbatim
    pub fn is_derived(&self) -> bool {
        self.derived
    }

    /// Loader that resolves references made from inside this module
    pub fn defining_loader(&self) -> Option<Arc<dyn ModuleLoader>> {
        self.loader.upgrade()
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.image.find_method(name, descriptor)
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("name", &self.name)
            .field("bytes", &self.bytes.len())
            .field("methods", &self.image.methods.len())
            .field("derived", &self.derived)
            .finish()
    }
}

pub struct ModuleSpace {
    label: String,
    modules: DashMap<String, Arc<Module>>,
}

impl ModuleSpace {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            modules: DashMap::new(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Parse, verify and define `bytes` under `name`.
    ///
    /// Fails with `DefineConflict` when `name` is already defined here.
    pub fn define(
        &self,
        name: &str,
        bytes: Bytes,
        derived: bool,
        loader: Weak<dyn ModuleLoader>,
    ) -> Result<Arc<Module>> {
        let image = ModuleImage::parse(&bytes)?;
        verify_named(&image, name).map_err(|error| EngineError::Verify {
            module: name.to_string(),
            error,
        })?;

        let offsets = image.methods.iter().map(|m| offsets(&m.code)).collect();
        let module = Arc::new(Module {
            name: name.to_string(),
            bytes,
            image,
            offsets,
            derived,
            loader,
        });

        match self.modules.entry(name.to_string()) {
            Entry::Occupied(_) => Err(EngineError::DefineConflict(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&module));
                info!(
                    "Defined module {} in {} ({} bytes{})",
                    name,
                    self.label,
                    module.bytes.len(),
                    if derived { ", rewritten" } else { "" }
                );
                Ok(module)
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Module>> {
        self.modules.get(name).map(|entry| Arc::clone(entry.value()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.modules.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }
}
