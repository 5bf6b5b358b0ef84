// packages/engine/src/lib.rs
//! Interpose Engine Library
//!
//! Runs a pre-compiled subsystem inside a host process while rewriting the
//! subsystem's calls to process-level services (exit, console output,
//! boolean properties) so they land on host handlers instead.
//!
//! # Architecture
//!
//! - **interception**: symbols, interposition rules and the rule registry
//! - **module**: module image format, verifier, rewriter and assembler
//! - **runtime**: loaders, module spaces, interpreter and sandbox
//! - **trap**: exit signal, boundary classification, handlers and sinks
//! - **provider**: artifact discovery, version stamp and the launcher
//! - **observability**: tracing and metrics setup
//! - **utils**: configuration and the error taxonomy

// Public module exports
pub mod interception;
pub mod module;
pub mod observability;
pub mod provider;
pub mod runtime;
pub mod trap;
pub mod utils;

// Re-export commonly used types
pub use interception::registry::{RuleRegistry, RuleSet};
pub use provider::launcher::{LaunchReport, Launcher};
pub use runtime::interposing_loader::InterposingLoader;
pub use runtime::sandbox::{EntryPoint, Sandbox};
pub use trap::boundary::Outcome;
pub use utils::config::EngineConfig;
pub use utils::errors::{EngineError, Result};

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
