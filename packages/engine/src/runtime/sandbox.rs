// packages/engine/src/runtime/sandbox.rs
//! Entry-point invocation under execution limits
//!
//! The sandbox resolves the entry through its loader, runs it on the calling
//! thread and classifies the result at the boundary. Problems finding the
//! entry are launch errors; anything that goes wrong once it runs is an
//! [`Outcome`].

use crate::interception::symbol::Signature;
use crate::runtime::host::HostLibrary;
use crate::runtime::interpreter::{Interpreter, Limits};
use crate::runtime::loader::ModuleLoader;
use crate::runtime::value::Value;
use crate::trap::boundary::{classify, Outcome};
use crate::utils::errors::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};

/// Method to start a subsystem from
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntryPoint {
    pub module: String,
    pub method: String,
    pub descriptor: String,
}

impl EntryPoint {
    pub fn new(module: impl Into<String>, method: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
            descriptor: descriptor.into(),
        }
    }

    /// `main()V` of `module`
    pub fn main(module: impl Into<String>) -> Self {
        Self::new(module, "main", "()V")
    }
}

impl fmt::Display for EntryPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{}", self.module, self.method, self.descriptor)
    }
}

/// Runs an entry point and reports how it ended
pub trait EntryInvoker: Send + Sync {
    fn invoke(&self, entry: &EntryPoint, args: Vec<Value>) -> Result<Outcome>;
}

#[derive(Debug, Clone, Default)]
pub struct SandboxConfig {
    pub limits: Limits,
}

pub struct Sandbox {
    loader: Arc<dyn ModuleLoader>,
    host: Arc<HostLibrary>,
    config: SandboxConfig,
}

impl Sandbox {
    pub fn new(loader: Arc<dyn ModuleLoader>, host: Arc<HostLibrary>, config: SandboxConfig) -> Self {
        Self { loader, host, config }
    }

    pub fn loader(&self) -> &Arc<dyn ModuleLoader> {
        &self.loader
    }

    pub fn host(&self) -> &Arc<HostLibrary> {
        &self.host
    }
}

impl EntryInvoker for Sandbox {
    fn invoke(&self, entry: &EntryPoint, args: Vec<Value>) -> Result<Outcome> {
        let module = self.loader.resolve(&entry.module).map_err(|e| match e {
            EngineError::ResourceNotFound(_) => EngineError::entry_point(entry, "module not found"),
            other => other,
        })?;

        let index = module
            .find_method(&entry.method, &entry.descriptor)
            .ok_or_else(|| EngineError::entry_point(entry, "method not found"))?;
        if !module.image().methods[index].is_static() {
            return Err(EngineError::entry_point(entry, "method is not static"));
        }

        let signature = Signature::parse(&entry.descriptor)
            .map_err(|e| EngineError::entry_point(entry, e.to_string()))?;
        if signature.arity() != args.len() {
            return Err(EngineError::entry_point(
                entry,
                format!("expects {} arguments, got {}", signature.arity(), args.len()),
            ));
        }
        if let Some(position) = args
            .iter()
            .zip(&signature.params)
            .position(|(arg, ty)| !arg.conforms_to(ty))
        {
            return Err(EngineError::entry_point(
                entry,
                format!("argument {} is not {}", position, signature.params[position].descriptor()),
            ));
        }

        info!("Invoking {} through {}", entry, self.loader.label());
        let started = Instant::now();
        let mut interpreter = Interpreter::new(Arc::clone(&self.host), self.config.limits);
        let result = interpreter.call(&module, index, args);
        debug!(
            "{} finished after {} instructions in {:?}",
            entry,
            interpreter.executed(),
            started.elapsed()
        );

        Ok(classify(entry.to_string(), result))
    }
}
