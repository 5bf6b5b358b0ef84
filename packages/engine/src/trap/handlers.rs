// packages/engine/src/trap/handlers.rs
//! Host handlers that stand in for a subsystem's system calls
//!
//! | call site                          | redirected to                                      |
//! |------------------------------------|----------------------------------------------------|
//! | `core.System.exit(I)V`             | `sandbox.Trap.handleExit(I)V`                      |
//! | `core.PrintStream.println(T)V`     | `sandbox.Trap.handlePrint(Lcore.PrintStream;T)V`   |
//! | `core.Boolean.getBoolean(T)Z`      | `sandbox.Trap.handleGetBoolean(T)Z`                |

use crate::interception::registry::RuleRegistry;
use crate::interception::symbol::{Signature, Symbol, ValueType};
use crate::runtime::host::{clamp_exit_code, int_arg, str_arg, HostLibrary, BOOLEAN, PRINT_STREAM, SYSTEM};
use crate::runtime::interpreter::ExecError;
use crate::runtime::value::Value;
use crate::trap::signal::TrapSignal;
use crate::trap::sink::LogSink;
use crate::utils::errors::Result;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const TRAP_OWNER: &str = "sandbox.Trap";

pub struct TrapHandlers {
    label: String,
    sink: Arc<dyn LogSink>,
    forced: HashSet<String>,
}

impl TrapHandlers {
    /// Handlers tagging output with `label`
    pub fn new(label: impl Into<String>, sink: Arc<dyn LogSink>) -> Self {
        Self {
            label: label.into(),
            sink,
            forced: HashSet::new(),
        }
    }

    /// Report `property` as true regardless of the property table
    pub fn force_true(mut self, property: impl Into<String>) -> Self {
        self.forced.insert(property.into());
        self
    }

    /// Register the natives on `host` and the three rules on `registry`
    pub fn install(self, host: &HostLibrary, registry: &RuleRegistry) -> Result<()> {
        let exit = Signature::new(vec![ValueType::Int], None);
        let print = Signature::new(vec![ValueType::Str], None);
        let get_boolean = Signature::new(vec![ValueType::Str], Some(ValueType::Bool));

        registry
            .reroute_static(SYSTEM, "exit", exit.clone(), TRAP_OWNER, "handleExit")?
            .reroute_instance(PRINT_STREAM, "println", print.clone(), TRAP_OWNER, "handlePrint")?
            .reroute_static(BOOLEAN, "getBoolean", get_boolean.clone(), TRAP_OWNER, "handleGetBoolean")?;

        host.register(Symbol::new_static(TRAP_OWNER, "handleExit", exit), |args| {
            let code = clamp_exit_code(int_arg(args, 0, "sandbox.Trap.handleExit")?);
            debug!("Trapped exit({})", code);
            metrics::counter!("interpose_traps_total").increment(1);
            Err(ExecError::Trap(TrapSignal::new(code)))
        });

        let sink = Arc::clone(&self.sink);
        let label = self.label.clone();
        host.register(
            Symbol::new_static(TRAP_OWNER, "handlePrint", print.with_receiver(PRINT_STREAM)),
            move |args| {
                let line = str_arg(args, 1, "sandbox.Trap.handlePrint")?;
                sink.emit(&label, line);
                Ok(Value::Void)
            },
        );

        let properties = Arc::clone(host.properties());
        let forced = self.forced;
        host.register(
            Symbol::new_static(TRAP_OWNER, "handleGetBoolean", get_boolean),
            move |args| {
                let key = str_arg(args, 0, "sandbox.Trap.handleGetBoolean")?;
                Ok(Value::Bool(forced.contains(key) || properties.get_boolean(key)))
            },
        );

        info!("Installed trap handlers for {}", self.label);
        Ok(())
    }
}
