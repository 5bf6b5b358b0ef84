// packages/engine/src/runtime/host.rs
//! Host-provided natives and static fields
//!
//! The `core` library is the system surface a subsystem links against:
//!
//! | symbol                              | behavior                          |
//! |-------------------------------------|-----------------------------------|
//! | `core.System.exit(I)V`              | ends the host process             |
//! | `core.System.out` / `err`           | console stream objects            |
//! | `core.PrintStream.println(T)V`      | writes a line to the real stream  |
//! | `core.Boolean.getBoolean(T)Z`       | reads the property table          |

use crate::interception::symbol::{Signature, Symbol, ValueType};
use crate::runtime::interpreter::ExecError;
use crate::runtime::value::{Object, Value};
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use tracing::{debug, warn};

pub const SYSTEM: &str = "core.System";
pub const PRINT_STREAM: &str = "core.PrintStream";
pub const BOOLEAN: &str = "core.Boolean";

pub type NativeFn = Arc<dyn Fn(&[Value]) -> Result<Value, ExecError> + Send + Sync>;

/// System property table read by `core.Boolean.getBoolean`
#[derive(Debug, Default)]
pub struct Properties {
    values: RwLock<HashMap<String, String>>,
}

impl Properties {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.write().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }

    /// `true` iff the property is set to "true", ignoring case
    pub fn get_boolean(&self, key: &str) -> bool {
        self.values
            .read()
            .get(key)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false)
    }
}

/// Natives keyed by full symbol identity, plus static fields keyed by
/// `(owner, name)`
pub struct HostLibrary {
    natives: DashMap<Symbol, NativeFn>,
    fields: DashMap<(String, String), Value>,
    properties: Arc<Properties>,
}

impl Default for HostLibrary {
    fn default() -> Self {
        Self::new()
    }
}

impl HostLibrary {
    /// Library with no natives
    pub fn new() -> Self {
        Self {
            natives: DashMap::new(),
            fields: DashMap::new(),
            properties: Arc::new(Properties::new()),
        }
    }

    /// Library with the `core` system natives installed
    pub fn core() -> Self {
        let host = Self::new();
        host.install_core();
        host
    }

    pub fn properties(&self) -> &Arc<Properties> {
        &self.properties
    }

    pub fn register(
        &self,
        symbol: Symbol,
        native: impl Fn(&[Value]) -> Result<Value, ExecError> + Send + Sync + 'static,
    ) {
        debug!("Registering native {}", symbol);
        if self.natives.insert(symbol.clone(), Arc::new(native)).is_some() {
            warn!("Native {} replaced", symbol);
        }
    }

    pub fn set_field(&self, owner: &str, name: &str, value: Value) {
        self.fields.insert((owner.to_string(), name.to_string()), value);
    }

    pub fn native(&self, symbol: &Symbol) -> Option<NativeFn> {
        self.natives.get(symbol).map(|entry| Arc::clone(entry.value()))
    }

    pub fn field(&self, owner: &str, name: &str) -> Option<Value> {
        self.fields
            .get(&(owner.to_string(), name.to_string()))
            .map(|entry| entry.value().clone())
    }

    pub fn has_native(&self, symbol: &Symbol) -> bool {
        self.natives.contains_key(symbol)
    }

    fn install_core(&self) {
        self.set_field(SYSTEM, "out", Value::Object(Object::tagged(PRINT_STREAM, "stdout")));
        self.set_field(SYSTEM, "err", Value::Object(Object::tagged(PRINT_STREAM, "stderr")));

        self.register(
            Symbol::new_static(SYSTEM, "exit", Signature::new(vec![ValueType::Int], None)),
            |args| {
                let code = int_arg(args, 0, "core.System.exit")?;
                warn!("Subsystem called core.System.exit({}), terminating host", code);
                std::process::exit(clamp_exit_code(code))
            },
        );

        self.register(
            Symbol::new_instance(PRINT_STREAM, "println", Signature::new(vec![ValueType::Str], None)),
            |args| {
                let stream = args
                    .first()
                    .and_then(Value::as_object)
                    .ok_or_else(|| ExecError::native("core.PrintStream.println", "missing receiver"))?;
                let line = str_arg(args, 1, "core.PrintStream.println")?;

                let written = match stream.tag() {
                    Some("stderr") => writeln!(std::io::stderr().lock(), "{}", line),
                    _ => writeln!(std::io::stdout().lock(), "{}", line),
                };
                written.map_err(|e| ExecError::native("core.PrintStream.println", e.to_string()))?;
                Ok(Value::Void)
            },
        );

        let properties = Arc::clone(&self.properties);
        self.register(
            Symbol::new_static(
                BOOLEAN,
                "getBoolean",
                Signature::new(vec![ValueType::Str], Some(ValueType::Bool)),
            ),
            move |args| {
                let key = str_arg(args, 0, "core.Boolean.getBoolean")?;
                Ok(Value::Bool(properties.get_boolean(key)))
            },
        );
    }
}

/// Exit codes are 32-bit; wider values saturate.
pub fn clamp_exit_code(code: i64) -> i32 {
    code.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

pub fn int_arg(args: &[Value], index: usize, native: &str) -> Result<i64, ExecError> {
    args.get(index)
        .and_then(Value::as_int)
        .ok_or_else(|| ExecError::native(native, format!("argument {} must be an int", index)))
}

pub fn str_arg<'a>(args: &'a [Value], index: usize, native: &str) -> Result<&'a str, ExecError> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ExecError::native(native, format!("argument {} must be a string", index)))
}
