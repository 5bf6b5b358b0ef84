// packages/engine/src/utils/config.rs
//! Engine configuration
//!
//! Layered with the `config` crate, later layers winning:
//!
//! 1. built-in defaults
//! 2. `interpose.toml` in the working directory, or the file named by
//!    `INTERPOSE_CONFIG` (required when set)
//! 3. environment variables such as `INTERPOSE_LIMITS__FUEL=1000`
//!
//! List values taken from the environment are comma separated.

use crate::runtime::interpreter::Limits;
use crate::utils::errors::{EngineError, Result};
use ::config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const CONFIG_ENV: &str = "INTERPOSE_CONFIG";
pub const DEFAULT_CONFIG_FILE: &str = "interpose.toml";
const ENV_PREFIX: &str = "INTERPOSE";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub artifact: ArtifactConfig,

    #[serde(default)]
    pub subsystem: SubsystemConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    #[serde(default)]
    pub observability: ObservabilityConfig,
}

/// Where to look for the subsystem artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactConfig {
    /// Searched before the candidates
    pub path: Option<PathBuf>,

    /// Default locations, in search order
    pub candidates: Vec<PathBuf>,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            path: None,
            candidates: vec![PathBuf::from("./subsystem"), PathBuf::from("./subsystem.bundle")],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubsystemConfig {
    pub entry_module: String,
    pub entry_method: String,
    pub entry_descriptor: String,

    /// Modules whose names start with one of these are rewritten
    pub transform_prefixes: Vec<String>,

    /// Tag attached to captured console output
    pub label: String,

    /// Boolean properties the subsystem always sees as `true`
    pub forced_properties: Vec<String>,
}

impl Default for SubsystemConfig {
    fn default() -> Self {
        Self {
            entry_module: "subsystem.Main".to_string(),
            entry_method: "main".to_string(),
            entry_descriptor: "()V".to_string(),
            transform_prefixes: vec!["subsystem.".to_string()],
            label: "subsystem".to_string(),
            forced_properties: vec!["patchonly".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Instruction budget for one invocation
    pub fuel: u64,
    pub max_call_depth: usize,

    /// Launcher deadline; unset means wait for completion
    pub timeout_secs: Option<u64>,

    /// Capacity of the captured-output queue
    pub sink_capacity: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            fuel: 50_000_000,
            max_call_depth: 512,
            timeout_secs: None,
            sink_capacity: 1024,
        }
    }
}

impl LimitsConfig {
    pub fn interpreter_limits(&self) -> Limits {
        Limits {
            fuel: self.fuel,
            max_call_depth: self.max_call_depth,
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Emit JSON log lines instead of the human-readable format
    pub json_logs: bool,

    /// Default filter when `RUST_LOG` is unset
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            json_logs: false,
            log_level: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from defaults, the config file and the environment
    pub fn load() -> Result<Self> {
        match std::env::var(CONFIG_ENV) {
            Ok(path) => Self::load_from(&path, true),
            Err(_) => Self::load_from(DEFAULT_CONFIG_FILE, false),
        }
    }

    pub fn load_from(path: &str, required: bool) -> Result<Self> {
        let settings = Config::builder()
            .add_source(Config::try_from(&EngineConfig::default())?)
            .add_source(File::with_name(path).required(required))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("artifact.candidates")
                    .with_list_parse_key("subsystem.transform_prefixes")
                    .with_list_parse_key("subsystem.forced_properties"),
            )
            .build()?;

        let config: EngineConfig = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.subsystem.entry_module.is_empty() {
            return Err(EngineError::Config("subsystem.entry_module is empty".into()));
        }
        if self.subsystem.transform_prefixes.iter().any(String::is_empty) {
            return Err(EngineError::Config(
                "subsystem.transform_prefixes contains an empty prefix".into(),
            ));
        }
        if self.limits.fuel == 0 {
            return Err(EngineError::Config("limits.fuel must be positive".into()));
        }
        if self.limits.sink_capacity == 0 {
            return Err(EngineError::Config("limits.sink_capacity must be positive".into()));
        }
        Ok(())
    }
}
