// packages/engine/src/interception/mod.rs
//! Call-site interposition rules
//!
//! - **Symbol**: identity of a call target (owner, name, signature, kind)
//! - **Rule**: a redirect from one call site to a static target
//! - **Registry**: mutable during setup, frozen into a [`RuleSet`] on first use
//!
//! # Architecture
//!
//! ```text
//! setup ── register ──▶ RuleRegistry ── freeze (first load) ──▶ Arc<RuleSet>
//!                                                                   │
//!                                          rewriter lookups ◀───────┘
//! ```

pub mod registry;
pub mod rule;
pub mod symbol;

pub use registry::{RegistryError, RuleRegistry, RuleSet};
pub use rule::{InterpositionRule, RuleError};
pub use symbol::{CallKind, Signature, Symbol, ValueType};
