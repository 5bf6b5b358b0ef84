// packages/engine/src/runtime/mod.rs
//! Module execution runtime
//!
//! - **Space**: the modules one loader has defined, keyed by name
//! - **Loader**: the resolution contract and the artifact-backed loader
//! - **Interposing loader**: rewrites matching modules before defining them
//! - **Interpreter**: executes defined methods under fuel and depth limits
//! - **Host**: natives and static fields of the `core` library
//! - **Sandbox**: resolves an entry point and classifies how it ended
//!
//! # Architecture
//!
//! ```text
//!            resolve(name)
//! module ───────────────────▶ defining loader
//!                               │
//!              ┌────────────────┴───────────────┐
//!              ▼                                ▼
//!     InterposingLoader (match)          parent BundleLoader
//!     resource ─▶ rewrite ─▶ define      define verbatim
//! ```

pub mod host;
pub mod interposing_loader;
pub mod interpreter;
pub mod loader;
pub mod sandbox;
pub mod space;
pub mod value;

// Re-export commonly used types
pub use host::HostLibrary;
pub use interposing_loader::InterposingLoader;
pub use interpreter::{ExecError, Interpreter, Limits};
pub use loader::{BundleLoader, ModuleLoader};
pub use sandbox::{EntryInvoker, EntryPoint, Sandbox, SandboxConfig};
pub use space::{Module, ModuleSpace};
pub use value::Value;
