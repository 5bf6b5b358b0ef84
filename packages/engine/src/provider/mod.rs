// packages/engine/src/provider/mod.rs
//! Locating and launching a packaged subsystem
//!
//! - **Discovery**: finds the artifact on disk
//! - **Version**: reads the artifact's version stamp
//! - **Launcher**: wires loaders, trap handlers and the sandbox together and
//!   runs the entry point on a blocking worker

pub mod discovery;
pub mod launcher;
pub mod version;

pub use discovery::{Artifact, ArtifactLocator, DiscoveryError};
pub use launcher::{LaunchReport, Launcher};
pub use version::VersionInfo;
