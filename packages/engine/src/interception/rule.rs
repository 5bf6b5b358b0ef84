// packages/engine/src/interception/rule.rs
//! Interposition rules
//!
//! A rule maps a call-site [`Symbol`] to the static call that replaces it.

use crate::interception::symbol::{CallKind, Signature, Symbol};
use thiserror::Error;

/// A rule whose shape cannot be applied to a call site
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule target {0} must be a static call")]
    TargetNotStatic(Symbol),

    #[error("rule target {target} has signature {actual}, call site {call_site} needs {expected}")]
    SignatureMismatch {
        call_site: Symbol,
        target: Symbol,
        expected: Signature,
        actual: Signature,
    },
}

/// Rewrite from `source` to `target`.
///
/// `target.kind` is always [`CallKind::Static`]. For an instance source the
/// target takes the receiver as its first parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InterpositionRule {
    source: Symbol,
    target: Symbol,
}

impl InterpositionRule {
    /// Validate an explicit source/target pair
    pub fn new(source: Symbol, target: Symbol) -> Result<Self, RuleError> {
        if target.kind != CallKind::Static {
            return Err(RuleError::TargetNotStatic(target));
        }

        let expected = Self::target_signature(&source);
        if target.signature != expected {
            return Err(RuleError::SignatureMismatch {
                actual: target.signature.clone(),
                call_site: source,
                target,
                expected,
            });
        }

        Ok(Self { source, target })
    }

    /// Redirect `source` to `target_owner.target_name`, deriving the target
    /// signature from the source's calling convention.
    pub fn redirect(
        source: Symbol,
        target_owner: impl Into<String>,
        target_name: impl Into<String>,
    ) -> Self {
        let signature = Self::target_signature(&source);
        let target = Symbol::new_static(target_owner, target_name, signature);
        Self { source, target }
    }

    /// The signature a static replacement for `source` must have
    pub fn target_signature(source: &Symbol) -> Signature {
        match source.kind {
            CallKind::Static => source.signature.clone(),
            CallKind::Instance => source.signature.with_receiver(&source.owner),
        }
    }

    pub fn source(&self) -> &Symbol {
        &self.source
    }

    pub fn target(&self) -> &Symbol {
        &self.target
    }
}
