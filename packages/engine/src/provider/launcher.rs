// packages/engine/src/provider/launcher.rs
//! Subsystem launcher
//!
//! ```text
//! discover ─▶ BundleLoader ─▶ TrapHandlers ─▶ InterposingLoader ─▶ Sandbox
//!                                                                    │
//!                                  spawn_blocking (+ deadline) ◀─────┘
//!                                                                    │
//!                                                          LaunchReport
//! ```
//!
//! The interpreter cannot be interrupted, so a deadline only stops waiting
//! for the worker. The fuel limit is what eventually stops it.
//!
//! Console output is buffered in a [`QueueSink`] of `limits.sink_capacity`
//! lines while the subsystem runs, then logged and attached to the report.

use crate::interception::registry::RuleRegistry;
use crate::provider::discovery::ArtifactLocator;
use crate::provider::version::{VersionInfo, VERSIONS_RESOURCE};
use crate::runtime::host::HostLibrary;
use crate::runtime::interposing_loader::InterposingLoader;
use crate::runtime::loader::{BundleLoader, ModuleLoader};
use crate::runtime::sandbox::{EntryInvoker, EntryPoint, Sandbox, SandboxConfig};
use crate::runtime::value::Value;
use crate::trap::boundary::Outcome;
use crate::trap::handlers::TrapHandlers;
use crate::trap::sink::{LogSink, QueueSink, SinkRecord, TracingSink};
use crate::utils::config::EngineConfig;
use crate::utils::errors::{EngineError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use ulid::Ulid;

/// How a launched subsystem ended, in serializable form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutcomeSummary {
    Success { value: Option<String> },
    ControlledFailure { code: i32 },
    Crash { chain: Vec<String> },
}

impl From<&Outcome> for OutcomeSummary {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Success(Value::Void) => OutcomeSummary::Success { value: None },
            Outcome::Success(value) => OutcomeSummary::Success {
                value: Some(value.to_string()),
            },
            Outcome::ControlledFailure(code) => OutcomeSummary::ControlledFailure { code: *code },
            Outcome::Crash(failure) => OutcomeSummary::Crash {
                chain: failure.chain(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaunchReport {
    pub run_id: String,
    pub entry: String,
    pub artifact: PathBuf,
    pub version: Option<VersionInfo>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub outcome: OutcomeSummary,
    pub exit_code: i32,
    /// Captured console lines, oldest first
    pub console: Vec<SinkRecord>,
    /// Lines lost because the capture buffer was full
    pub console_dropped: u64,
}

impl LaunchReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, OutcomeSummary::Success { .. })
    }

    /// `Ok` for success; a nonzero exit or a crash becomes an error
    pub fn into_result(self) -> Result<LaunchReport> {
        match &self.outcome {
            OutcomeSummary::Success { .. } => Ok(self),
            OutcomeSummary::ControlledFailure { code } => Err(EngineError::NonZeroExit(*code)),
            OutcomeSummary::Crash { chain } => Err(EngineError::SubsystemCrash { chain: chain.clone() }),
        }
    }
}

pub struct Launcher {
    config: EngineConfig,
    sink: Option<Arc<dyn LogSink>>,
    timeout: Option<Duration>,
}

impl Launcher {
    pub fn new(config: EngineConfig) -> Self {
        let timeout = config.limits.timeout();
        Self {
            config,
            sink: None,
            timeout,
        }
    }

    /// Send console output straight to `sink`; the report's `console` stays empty
    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Override the configured deadline
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn entry_point(&self) -> EntryPoint {
        let subsystem = &self.config.subsystem;
        EntryPoint::new(
            subsystem.entry_module.clone(),
            subsystem.entry_method.clone(),
            subsystem.entry_descriptor.clone(),
        )
    }

    pub async fn launch(&self) -> Result<LaunchReport> {
        self.config.validate()?;
        let subsystem = &self.config.subsystem;
        let entry = self.entry_point();

        let artifact = ArtifactLocator::from_config(&self.config.artifact).locate()?;
        artifact.ensure_entry(&entry.module)?;

        let bundle = BundleLoader::from_dir(artifact.root());
        let version = read_version(bundle.as_ref())?;
        match &version {
            Some(version) => info!("Starting {} {}", subsystem.label, version),
            None => info!("Starting {} (no version stamp)", subsystem.label),
        }

        let capture = Arc::new(QueueSink::new(self.config.limits.sink_capacity));
        let sink: Arc<dyn LogSink> = match &self.sink {
            Some(sink) => Arc::clone(sink),
            None => capture.clone(),
        };

        let host = Arc::new(HostLibrary::core());
        let registry = RuleRegistry::new();
        subsystem
            .forced_properties
            .iter()
            .fold(
                TrapHandlers::new(subsystem.label.clone(), sink),
                |handlers, property| handlers.force_true(property.clone()),
            )
            .install(&host, &registry)?;

        let loader = InterposingLoader::with_prefixes(bundle, subsystem.transform_prefixes.clone(), registry);
        let sandbox = Sandbox::new(
            loader,
            host,
            SandboxConfig {
                limits: self.config.limits.interpreter_limits(),
            },
        );

        let run_id = Ulid::new().to_string();
        let started_at = Utc::now();
        let clock = Instant::now();
        info!("Run {} invoking {}", run_id, entry);

        let worker_entry = entry.clone();
        let worker = tokio::task::spawn_blocking(move || sandbox.invoke(&worker_entry, Vec::new()));
        let joined = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, worker).await {
                Ok(joined) => joined,
                Err(_) => {
                    warn!("Run {} exceeded its {:?} deadline", run_id, limit);
                    forward_console(&capture);
                    return Err(EngineError::ExecutionTimeout);
                }
            },
            None => worker.await,
        };
        let outcome = joined.map_err(|e| EngineError::Worker(e.to_string()))??;
        let console = forward_console(&capture);
        let console_dropped = capture.stats().dropped;
        if console_dropped > 0 {
            warn!("Run {} lost {} console lines", run_id, console_dropped);
        }

        let report = LaunchReport {
            run_id,
            entry: entry.to_string(),
            artifact: artifact.root,
            version,
            started_at,
            finished_at: Utc::now(),
            elapsed_ms: clock.elapsed().as_millis() as u64,
            outcome: OutcomeSummary::from(&outcome),
            exit_code: outcome.exit_code(),
            console,
            console_dropped,
        };

        match &report.outcome {
            OutcomeSummary::Success { .. } => info!("Run {} finished in {}ms", report.run_id, report.elapsed_ms),
            OutcomeSummary::ControlledFailure { code } => {
                warn!("{} exited with a non-zero code ({})", subsystem.label, code)
            }
            OutcomeSummary::Crash { chain } => error!("{} crashed: {}", subsystem.label, chain.join(": ")),
        }
        Ok(report)
    }
}

/// Log buffered console lines and hand them back for the report
fn forward_console(capture: &QueueSink) -> Vec<SinkRecord> {
    let lines = capture.drain();
    for line in &lines {
        TracingSink.emit(&line.tag, &line.message);
    }
    lines
}

fn read_version(loader: &dyn ModuleLoader) -> Result<Option<VersionInfo>> {
    let Some(bytes) = loader.resource(VERSIONS_RESOURCE)? else {
        return Ok(None);
    };
    let version = VersionInfo::parse(&String::from_utf8_lossy(&bytes));
    if version.is_none() {
        warn!("Ignoring malformed {}", VERSIONS_RESOURCE);
    }
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::builder::ModuleBuilder;
    use crate::module::format::{resource_path, ACC_STATIC};
    use crate::trap::sink::QueueSink;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    fn write_module(root: &Path, builder: ModuleBuilder, name: &str) {
        let path = root.join(resource_path(name));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, builder.build().unwrap().to_bytes().unwrap()).unwrap();
    }

    fn artifact(main: impl FnOnce(&mut ModuleBuilder)) -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let mut builder = ModuleBuilder::new("subsystem.Main");
        main(&mut builder);
        write_module(dir.path(), builder, "subsystem.Main");
        fs::create_dir_all(dir.path().join("META-INF")).unwrap();
        fs::write(dir.path().join(VERSIONS_RESOURCE), "0123456789abcdef 1.4.2\n").unwrap();
        dir
    }

    fn config_for(dir: &TempDir) -> EngineConfig {
        let mut config = EngineConfig::default();
        config.artifact.path = Some(dir.path().to_path_buf());
        config.artifact.candidates.clear();
        config
    }

    #[tokio::test]
    async fn test_launch_prints_and_exits() {
        let dir = artifact(|b| {
            b.method("main", "()V", ACC_STATIC)
                .get_static("core.System", "out", "Lcore.PrintStream;")
                .const_str("Downloading vanilla")
                .invoke_instance("core.PrintStream", "println", "(T)V")
                .const_int(3)
                .invoke_static("core.System", "exit", "(I)V")
                .ret()
                .finish();
        });
        let sink = Arc::new(QueueSink::new(8));
        let report = Launcher::new(config_for(&dir))
            .with_sink(sink.clone())
            .launch()
            .await
            .unwrap();

        assert_eq!(report.outcome, OutcomeSummary::ControlledFailure { code: 3 });
        assert_eq!(report.exit_code, 3);
        assert_eq!(report.entry, "subsystem.Main.main()V");
        assert_eq!(report.version.as_ref().unwrap().to_string(), "1.4.2-01234567");
        assert_eq!(report.run_id.len(), 26);
        assert!(report.finished_at >= report.started_at);

        let lines = sink.drain();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].tag, "subsystem");
        assert_eq!(lines[0].message, "Downloading vanilla");
        assert!(report.console.is_empty());

        assert!(matches!(report.into_result(), Err(EngineError::NonZeroExit(3))));
    }

    #[tokio::test]
    async fn test_launch_success_report_serializes() {
        let dir = artifact(|b| {
            b.method("main", "()V", ACC_STATIC).ret().finish();
        });
        let report = Launcher::new(config_for(&dir)).launch().await.unwrap();
        assert!(report.is_success());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"]["kind"], "success");
        assert_eq!(json["exit_code"], 0);
        assert_eq!(json["version"]["version"], "1.4.2");
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_launch_crash_carries_chain() {
        let dir = artifact(|b| {
            b.method("main", "()V", ACC_STATIC).const_str("patch failed").throw().finish();
        });
        let report = Launcher::new(config_for(&dir)).launch().await.unwrap();
        let OutcomeSummary::Crash { chain } = &report.outcome else {
            panic!("expected crash, got {:?}", report.outcome);
        };
        assert_eq!(chain.last().unwrap(), "patch failed");

        match report.into_result() {
            Err(EngineError::SubsystemCrash { chain }) => assert!(chain.len() >= 3),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_console_is_bounded_by_sink_capacity() {
        let dir = artifact(|b| {
            let mut m = b.method("main", "()V", ACC_STATIC);
            for line in ["one", "two", "three"] {
                m.get_static("core.System", "out", "Lcore.PrintStream;")
                    .const_str(line)
                    .invoke_instance("core.PrintStream", "println", "(T)V");
            }
            m.ret().finish();
        });
        let mut config = config_for(&dir);
        config.limits.sink_capacity = 2;
        let report = Launcher::new(config).launch().await.unwrap();

        assert!(report.is_success());
        let lines: Vec<_> = report.console.iter().map(|r| r.message.as_str()).collect();
        assert_eq!(lines, vec!["one", "two"]);
        assert!(report.console.iter().all(|r| r.tag == "subsystem"));
        assert_eq!(report.console_dropped, 1);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["console"][0]["message"], "one");
    }

    #[tokio::test]
    async fn test_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = EngineConfig::default();
        config.artifact.path = None;
        config.artifact.candidates = vec![dir.path().join("nowhere")];
        let err = Launcher::new(config).launch().await.unwrap_err();
        assert!(matches!(err, EngineError::Discovery(_)));
    }

    #[tokio::test]
    async fn test_missing_entry_module() {
        let dir = tempfile::tempdir().unwrap();
        let err = Launcher::new(config_for(&dir)).launch().await.unwrap_err();
        assert!(matches!(err, EngineError::Discovery(_)));
        assert!(err.to_string().contains("subsystem.Main"));
    }

    #[tokio::test]
    async fn test_deadline() {
        let dir = artifact(|b| {
            let mut m = b.method("main", "()V", ACC_STATIC);
            let top = m.new_label();
            m.bind(top).jump(top).finish();
        });
        let mut config = config_for(&dir);
        config.limits.fuel = 20_000_000;
        let err = Launcher::new(config)
            .with_timeout(Some(Duration::from_millis(10)))
            .launch()
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::ExecutionTimeout));
    }
}
