// packages/engine/src/utils/errors.rs
//! Engine error taxonomy
//!
//! Every fatal condition aborts only the load or invocation it belongs to.
//! A trapped exit is not an error at this level: it is an
//! [`Outcome`](crate::trap::boundary::Outcome) variant.

use crate::interception::registry::RegistryError;
use crate::interception::symbol::Symbol;
use crate::module::reader::ParseError;
use crate::module::rewriter::RewriteError;
use crate::module::verifier::VerifyError;
use crate::module::writer::SerializeError;
use crate::provider::discovery::DiscoveryError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no resource for module `{0}`")]
    ResourceNotFound(String),

    #[error("malformed module image: {0}")]
    Parse(#[from] ParseError),

    #[error("rewrite failed: {0}")]
    Rewrite(#[from] RewriteError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] SerializeError),

    #[error("module `{module}` failed verification: {error}")]
    Verify {
        module: String,
        #[source]
        error: VerifyError,
    },

    #[error("module `{0}` is already defined")]
    DefineConflict(String),

    #[error("{symbol} is already redirected to {existing}, refusing {requested}")]
    RuleConflict {
        symbol: Symbol,
        existing: Symbol,
        requested: Symbol,
    },

    #[error("rule registry is frozen, cannot register {0}")]
    RegistryFrozen(Symbol),

    #[error("invalid rule: {0}")]
    InvalidRule(String),

    #[error("entry point {entry}: {reason}")]
    EntryPoint { entry: String, reason: String },

    #[error(transparent)]
    Discovery(#[from] DiscoveryError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("observability setup failed: {0}")]
    Observability(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("execution timed out")]
    ExecutionTimeout,

    #[error("worker failed: {0}")]
    Worker(String),

    #[error("subsystem exited with a non-zero code ({0})")]
    NonZeroExit(i32),

    #[error("subsystem crashed: {}", .chain.join(": "))]
    SubsystemCrash { chain: Vec<String> },
}

impl From<RegistryError> for EngineError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::RuleConflict {
                symbol,
                existing,
                requested,
            } => EngineError::RuleConflict {
                symbol,
                existing,
                requested,
            },
            RegistryError::RegistryFrozen { symbol } => EngineError::RegistryFrozen(symbol),
            RegistryError::InvalidRule(rule) => EngineError::InvalidRule(rule.to_string()),
        }
    }
}

impl From<::config::ConfigError> for EngineError {
    fn from(e: ::config::ConfigError) -> Self {
        EngineError::Config(e.to_string())
    }
}

impl EngineError {
    pub fn entry_point(entry: impl ToString, reason: impl Into<String>) -> Self {
        EngineError::EntryPoint {
            entry: entry.to_string(),
            reason: reason.into(),
        }
    }
}
