// packages/engine/src/observability/mod.rs
//! Logging and metrics setup
//!
//! Counters recorded by the engine:
//!
//! - `interpose_modules_rewritten_total`: modules with at least one call site rewritten
//! - `interpose_call_sites_rewritten_total`: call sites rewritten
//! - `interpose_traps_total`: exits trapped at the boundary

use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. `RUST_LOG` overrides `default_level`.
pub fn init_tracing(json: bool, default_level: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .map_err(|e| EngineError::Observability(e.to_string()))?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    let installed = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| EngineError::Observability(e.to_string()))
}

/// Install the Prometheus recorder and return its render handle
pub fn init_metrics() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| EngineError::Observability(e.to_string()))
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_render_engine_counters() {
        let handle = init_metrics().unwrap();
        metrics::counter!("interpose_traps_total").increment(1);
        assert!(handle.render().contains("interpose_traps_total"));
    }
}
