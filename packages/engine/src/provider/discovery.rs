// packages/engine/src/provider/discovery.rs
//! Artifact discovery
//!
//! An explicit path is tried first, then each default candidate in order.
//! The first location that exists wins. Every failure is reported as a
//! distinct error instead of an empty result.

use crate::module::format::resource_path;
use crate::utils::config::ArtifactConfig;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("no subsystem artifact found (searched: {})", display_paths(.searched))]
    NotFound { searched: Vec<PathBuf> },

    #[error("cannot inspect artifact location {}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        error: io::Error,
    },

    #[error("artifact {} has no entry module `{entry}`", .artifact.display())]
    MissingEntry { artifact: PathBuf, entry: String },
}

fn display_paths(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// An unpacked artifact directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    pub root: PathBuf,
}

impl Artifact {
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fail unless the artifact carries a resource for `module`
    pub fn ensure_entry(&self, module: &str) -> Result<(), DiscoveryError> {
        let path = self.root.join(resource_path(module));
        match path.try_exists() {
            Ok(true) => Ok(()),
            Ok(false) => Err(DiscoveryError::MissingEntry {
                artifact: self.root.clone(),
                entry: module.to_string(),
            }),
            Err(error) => Err(DiscoveryError::Io { path, error }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    explicit: Option<PathBuf>,
    candidates: Vec<PathBuf>,
}

impl ArtifactLocator {
    pub fn new(explicit: Option<PathBuf>, candidates: Vec<PathBuf>) -> Self {
        Self { explicit, candidates }
    }

    pub fn from_config(config: &ArtifactConfig) -> Self {
        Self::new(config.path.clone(), config.candidates.clone())
    }

    /// Locations in search order
    pub fn search_order(&self) -> Vec<PathBuf> {
        self.explicit
            .iter()
            .chain(self.candidates.iter())
            .cloned()
            .collect()
    }

    pub fn locate(&self) -> Result<Artifact, DiscoveryError> {
        let searched = self.search_order();
        for path in &searched {
            match path.try_exists() {
                Ok(true) if path.is_dir() => {
                    info!("Using subsystem artifact at {}", path.display());
                    return Ok(Artifact { root: path.clone() });
                }
                Ok(_) => debug!("No artifact at {}", path.display()),
                Err(error) => {
                    return Err(DiscoveryError::Io {
                        path: path.clone(),
                        error,
                    })
                }
            }
        }
        Err(DiscoveryError::NotFound { searched })
    }
}
