// packages/engine/src/interception/registry.rs
//! Rule registry with a build-then-freeze lifecycle
//!
//! Rules are registered during setup. The first load performed by a loader
//! built from the registry freezes it; from then on lookups go through an
//! immutable [`RuleSet`] without taking any lock, and `register` fails.

use crate::interception::rule::{InterpositionRule, RuleError};
use crate::interception::symbol::{Signature, Symbol};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

/// Setup-time registry misuse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("{symbol} is already redirected to {existing}, refusing {requested}")]
    RuleConflict {
        symbol: Symbol,
        existing: Symbol,
        requested: Symbol,
    },

    #[error("registry is frozen, cannot register {symbol}")]
    RegistryFrozen { symbol: Symbol },

    #[error(transparent)]
    InvalidRule(#[from] RuleError),
}

/// Immutable view of the registered rules
#[derive(Debug, Default)]
pub struct RuleSet {
    rules: HashMap<Symbol, InterpositionRule>,
}

impl RuleSet {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Find the rule for a call site
    pub fn lookup(&self, call_site: &Symbol) -> Option<&InterpositionRule> {
        self.rules.get(call_site)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &InterpositionRule> {
        self.rules.values()
    }
}

impl FromIterator<InterpositionRule> for RuleSet {
    fn from_iter<I: IntoIterator<Item = InterpositionRule>>(iter: I) -> Self {
        let rules = iter
            .into_iter()
            .map(|rule| (rule.source().clone(), rule))
            .collect();
        Self { rules }
    }
}

#[derive(Debug, Default)]
struct RegistryInner {
    pending: Mutex<HashMap<Symbol, InterpositionRule>>,
    frozen: OnceCell<Arc<RuleSet>>,
}

/// Shared handle to the rule registry.
///
/// Cloning the handle shares the same registry, so the orchestrator can keep
/// one while a loader holds another.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    inner: Arc<RegistryInner>,
}

impl RuleRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an explicit rule. Chainable with `?`.
    pub fn register(&self, source: Symbol, target: Symbol) -> Result<&Self, RegistryError> {
        let rule = InterpositionRule::new(source, target)?;
        self.insert(rule)?;
        Ok(self)
    }

    /// Redirect `source` to a static `target_owner.target_name`; the target
    /// signature is derived from the source's calling convention.
    pub fn redirect(
        &self,
        source: Symbol,
        target_owner: &str,
        target_name: &str,
    ) -> Result<&Self, RegistryError> {
        self.insert(InterpositionRule::redirect(source, target_owner, target_name))?;
        Ok(self)
    }

    /// Redirect a static call `owner.name` with `signature`
    pub fn reroute_static(
        &self,
        owner: &str,
        name: &str,
        signature: Signature,
        target_owner: &str,
        target_name: &str,
    ) -> Result<&Self, RegistryError> {
        self.redirect(Symbol::new_static(owner, name, signature), target_owner, target_name)
    }

    /// Redirect an instance call `owner.name` with `signature`; the target
    /// receives the receiver first.
    pub fn reroute_instance(
        &self,
        owner: &str,
        name: &str,
        signature: Signature,
        target_owner: &str,
        target_name: &str,
    ) -> Result<&Self, RegistryError> {
        self.redirect(Symbol::new_instance(owner, name, signature), target_owner, target_name)
    }

    fn insert(&self, rule: InterpositionRule) -> Result<(), RegistryError> {
        let mut pending = self.inner.pending.lock();

        // Checked under the lock: `freeze` snapshots while holding it.
        if self.inner.frozen.get().is_some() {
            return Err(RegistryError::RegistryFrozen {
                symbol: rule.source().clone(),
            });
        }

        if let Some(existing) = pending.get(rule.source()) {
            if existing.target() == rule.target() {
                return Ok(());
            }
            return Err(RegistryError::RuleConflict {
                symbol: rule.source().clone(),
                existing: existing.target().clone(),
                requested: rule.target().clone(),
            });
        }

        debug!("Registering rule: {} -> {}", rule.source(), rule.target());
        pending.insert(rule.source().clone(), rule);
        Ok(())
    }

    /// Freeze the registry and return the immutable rule set.
    ///
    /// Idempotent; every call returns the same set.
    pub fn freeze(&self) -> Arc<RuleSet> {
        if let Some(rules) = self.inner.frozen.get() {
            return Arc::clone(rules);
        }
        // Held until the cell is set so no `insert` lands between snapshot and store.
        let pending = self.inner.pending.lock();
        Arc::clone(self.inner.frozen.get_or_init(|| {
            let rules: RuleSet = pending.values().cloned().collect();
            info!("Rule registry frozen with {} rules", rules.len());
            Arc::new(rules)
        }))
    }

    pub fn is_frozen(&self) -> bool {
        self.inner.frozen.get().is_some()
    }

    /// Number of registered rules
    pub fn len(&self) -> usize {
        match self.inner.frozen.get() {
            Some(rules) => rules.len(),
            None => self.inner.pending.lock().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
