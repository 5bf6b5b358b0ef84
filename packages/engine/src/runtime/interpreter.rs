// packages/engine/src/runtime/interpreter.rs
//! Stack interpreter for defined modules
//!
//! Each call runs in its own frame with a locals array and an operand stack.
//! References are resolved lazily through the defining loader of the module
//! making the call, natives first.
//!
//! Failures unwind frame by frame. A handler range covering the failing
//! instruction catches ordinary failures and receives the message on a fresh
//! stack. A [`TrapSignal`] and exhausted limits are never caught. Each frame
//! an error leaves wraps it with its location, which builds the cause chain.

use crate::interception::symbol::{CallKind, Signature, Symbol};
use crate::module::constant_pool::Constant;
use crate::module::instruction::Instruction;
use crate::runtime::host::HostLibrary;
use crate::runtime::space::Module;
use crate::runtime::value::{Object, Value};
use crate::trap::signal::TrapSignal;
use crate::utils::errors::EngineError;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

/// Execution budget for one invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Instructions that may execute
    pub fuel: u64,
    pub max_call_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            fuel: 50_000_000,
            max_call_depth: 512,
        }
    }
}

#[derive(Debug, Error)]
pub enum ExecError {
    #[error(transparent)]
    Trap(#[from] TrapSignal),

    /// Raised by `THROW`
    #[error("{0}")]
    Raised(String),

    #[error("{native} failed: {message}")]
    Native { native: String, message: String },

    #[error("unresolved reference {0}")]
    Unresolved(String),

    #[error("cannot link `{module}`")]
    Link {
        module: String,
        #[source]
        error: Box<EngineError>,
    },

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: String, found: String },

    #[error("malformed code: {0}")]
    Malformed(String),

    #[error("fuel exhausted after {0} instructions")]
    FuelExhausted(u64),

    #[error("call depth limit {0} exceeded")]
    CallDepthExceeded(usize),

    #[error("at {module}.{method} @{offset}")]
    Frame {
        module: String,
        method: String,
        offset: u32,
        #[source]
        error: Box<ExecError>,
    },
}

impl ExecError {
    pub fn native(native: impl Into<String>, message: impl Into<String>) -> Self {
        ExecError::Native {
            native: native.into(),
            message: message.into(),
        }
    }

    fn mismatch(expected: &str, found: &Value) -> Self {
        ExecError::TypeMismatch {
            expected: expected.to_string(),
            found: found.type_name().to_string(),
        }
    }

    /// Innermost error beneath the frame wrappers
    pub fn root(&self) -> &ExecError {
        match self {
            ExecError::Frame { error, .. } => error.root(),
            other => other,
        }
    }

    /// Trap signal carried by this error, looking through frames
    pub fn trap(&self) -> Option<TrapSignal> {
        match self.root() {
            ExecError::Trap(signal) => Some(*signal),
            _ => None,
        }
    }

    /// Whether a handler range may catch this error
    pub fn is_catchable(&self) -> bool {
        !matches!(
            self.root(),
            ExecError::Trap(_) | ExecError::FuelExhausted(_) | ExecError::CallDepthExceeded(_)
        )
    }
}

enum Flow {
    Next,
    Jump(u32),
    Return(Value),
}

pub struct Interpreter {
    host: Arc<HostLibrary>,
    limits: Limits,
    executed: u64,
}

impl Interpreter {
    pub fn new(host: Arc<HostLibrary>, limits: Limits) -> Self {
        Self {
            host,
            limits,
            executed: 0,
        }
    }

    /// Instructions executed so far
    pub fn executed(&self) -> u64 {
        self.executed
    }

    /// Call method `index` of `module` with `args` (receiver first for
    /// instance methods)
    pub fn call(&mut self, module: &Arc<Module>, index: usize, args: Vec<Value>) -> Result<Value, ExecError> {
        self.call_at_depth(module, index, args, 0)
    }

    fn call_at_depth(
        &mut self,
        module: &Arc<Module>,
        index: usize,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ExecError> {
        if depth >= self.limits.max_call_depth {
            return Err(ExecError::CallDepthExceeded(self.limits.max_call_depth));
        }

        let image = module.image();
        let method = image
            .methods
            .get(index)
            .ok_or_else(|| ExecError::Malformed(format!("no method #{} in {}", index, module.name())))?;
        let offsets = module.offsets(index);

        let mut locals = vec![Value::Void; method.max_locals as usize];
        if args.len() > locals.len() {
            return Err(ExecError::Malformed(format!(
                "{} arguments for {} local slots",
                args.len(),
                locals.len()
            )));
        }
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = arg;
        }

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        loop {
            let insn = *method
                .code
                .get(pc)
                .ok_or_else(|| ExecError::Malformed("control ran off the end of the code".into()))?;
            let offset = offsets.get(pc).copied().unwrap_or_default();

            let step = self
                .charge()
                .and_then(|_| self.step(module, insn, &mut locals, &mut stack, depth));

            let target = match step {
                Ok(Flow::Next) => {
                    pc += 1;
                    continue;
                }
                Ok(Flow::Return(value)) => return Ok(value),
                Ok(Flow::Jump(target)) => target,
                Err(error) => {
                    let handler = if error.is_catchable() {
                        method.handlers.iter().find(|h| h.covers(offset))
                    } else {
                        None
                    };
                    match handler {
                        Some(handler) => {
                            trace!("Handler at {} caught: {}", handler.target, error.root());
                            stack.clear();
                            stack.push(Value::str(&error.root().to_string()));
                            handler.target
                        }
                        None => {
                            return Err(ExecError::Frame {
                                module: module.name().to_string(),
                                method: image.describe_method(index),
                                offset,
                                error: Box::new(error),
                            })
                        }
                    }
                }
            };

            pc = offsets
                .binary_search(&target)
                .map_err(|_| ExecError::Malformed(format!("branch to {} is not an instruction", target)))?;
        }
    }

    fn charge(&mut self) -> Result<(), ExecError> {
        if self.executed >= self.limits.fuel {
            return Err(ExecError::FuelExhausted(self.executed));
        }
        self.executed += 1;
        Ok(())
    }

    fn step(
        &mut self,
        module: &Arc<Module>,
        insn: Instruction,
        locals: &mut [Value],
        stack: &mut Vec<Value>,
        depth: usize,
    ) -> Result<Flow, ExecError> {
        let pool = &module.image().pool;

        match insn {
            Instruction::Nop => {}
            Instruction::Const(index) => {
                let value = match pool.get(index) {
                    Some(Constant::Int(v)) => Value::Int(*v),
                    Some(Constant::Str(_)) => Value::str(pool.string(index).unwrap_or_default()),
                    _ => return Err(ExecError::Malformed(format!("constant #{} is not loadable", index))),
                };
                stack.push(value);
            }
            Instruction::True => stack.push(Value::Bool(true)),
            Instruction::False => stack.push(Value::Bool(false)),
            Instruction::Load(slot) => {
                let value = locals
                    .get(slot as usize)
                    .cloned()
                    .ok_or_else(|| ExecError::Malformed(format!("local {} out of range", slot)))?;
                stack.push(value);
            }
            Instruction::Store(slot) => {
                let value = pop(stack)?;
                let local = locals
                    .get_mut(slot as usize)
                    .ok_or_else(|| ExecError::Malformed(format!("local {} out of range", slot)))?;
                *local = value;
            }
            Instruction::Pop => {
                pop(stack)?;
            }
            Instruction::Dup => {
                let top = stack.last().cloned().ok_or_else(underflow)?;
                stack.push(top);
            }
            Instruction::Add | Instruction::Sub => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                let (a, b) = match (lhs.as_int(), rhs.as_int()) {
                    (Some(a), Some(b)) => (a, b),
                    (None, _) => return Err(ExecError::mismatch("int", &lhs)),
                    (_, None) => return Err(ExecError::mismatch("int", &rhs)),
                };
                let result = if insn == Instruction::Add {
                    a.wrapping_add(b)
                } else {
                    a.wrapping_sub(b)
                };
                stack.push(Value::Int(result));
            }
            Instruction::Eq => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                stack.push(Value::Bool(lhs == rhs));
            }
            Instruction::Not => {
                let value = pop(stack)?;
                let b = value.as_bool().ok_or_else(|| ExecError::mismatch("bool", &value))?;
                stack.push(Value::Bool(!b));
            }
            Instruction::Concat => {
                let rhs = pop(stack)?;
                let lhs = pop(stack)?;
                stack.push(Value::str(&format!("{}{}", lhs, rhs)));
            }
            Instruction::GetStatic(index) => {
                let field = pool
                    .field(index)
                    .ok_or_else(|| ExecError::Malformed(format!("constant #{} is not a field", index)))?;
                let value = self
                    .host
                    .field(field.owner, field.name)
                    .ok_or_else(|| ExecError::Unresolved(format!("{}.{}", field.owner, field.name)))?;
                stack.push(value);
            }
            Instruction::New(index) => {
                let type_name = pool
                    .utf8(index)
                    .ok_or_else(|| ExecError::Malformed(format!("constant #{} is not a type name", index)))?;
                stack.push(Value::Object(Object::new(type_name)));
            }
            Instruction::Jump(target) => return Ok(Flow::Jump(target)),
            Instruction::JumpIfFalse(target) => {
                let value = pop(stack)?;
                let b = value.as_bool().ok_or_else(|| ExecError::mismatch("bool", &value))?;
                if !b {
                    return Ok(Flow::Jump(target));
                }
            }
            Instruction::Invoke { kind, index } => {
                let result = self.invoke(module, kind, index, stack, depth)?;
                if let Some(value) = result {
                    stack.push(value);
                }
            }
            Instruction::Return => return Ok(Flow::Return(Value::Void)),
            Instruction::ReturnValue => return Ok(Flow::Return(pop(stack)?)),
            Instruction::Throw => {
                let value = pop(stack)?;
                return Err(ExecError::Raised(value.to_string()));
            }
        }
        Ok(Flow::Next)
    }

    /// Perform a call; `None` for void
    fn invoke(
        &mut self,
        caller: &Arc<Module>,
        kind: CallKind,
        index: u16,
        stack: &mut Vec<Value>,
        depth: usize,
    ) -> Result<Option<Value>, ExecError> {
        let member = caller
            .image()
            .pool
            .method(index)
            .ok_or_else(|| ExecError::Malformed(format!("constant #{} is not a method", index)))?;
        let signature = Signature::parse(member.descriptor)
            .map_err(|e| ExecError::Malformed(e.to_string()))?;

        let arity = signature.arity() + usize::from(kind == CallKind::Instance);
        if stack.len() < arity {
            return Err(underflow());
        }
        let args = stack.split_off(stack.len() - arity);

        // Instance calls dispatch on the receiver's type
        let owner = match kind {
            CallKind::Static => member.owner.to_string(),
            CallKind::Instance => match &args[0] {
                Value::Object(object) => object.type_name().to_string(),
                other => return Err(ExecError::mismatch(member.owner, other)),
            },
        };
        let symbol = Symbol::new(owner, member.name, signature, kind);

        let value = if let Some(native) = self.host.native(&symbol) {
            trace!("Calling native {}", symbol);
            native(args.as_slice())?
        } else {
            self.invoke_module(caller, &symbol, member.descriptor, args, depth)?
        };

        Ok((!symbol.signature.is_void()).then_some(value))
    }

    fn invoke_module(
        &mut self,
        caller: &Arc<Module>,
        symbol: &Symbol,
        descriptor: &str,
        args: Vec<Value>,
        depth: usize,
    ) -> Result<Value, ExecError> {
        let loader = caller
            .defining_loader()
            .ok_or_else(|| ExecError::Unresolved(format!("{} (loader of {} is gone)", symbol, caller.name())))?;
        let target = loader.resolve(&symbol.owner).map_err(|e| match e {
            EngineError::ResourceNotFound(_) => ExecError::Unresolved(symbol.to_string()),
            other => ExecError::Link {
                module: symbol.owner.clone(),
                error: Box::new(other),
            },
        })?;

        let index = target
            .find_method(&symbol.name, descriptor)
            .filter(|&i| target.image().methods[i].is_static() == symbol.is_static())
            .ok_or_else(|| ExecError::Unresolved(symbol.to_string()))?;

        self.call_at_depth(&target, index, args, depth + 1)
    }
}

fn underflow() -> ExecError {
    ExecError::Malformed("operand stack underflow".into())
}

fn pop(stack: &mut Vec<Value>) -> Result<Value, ExecError> {
    stack.pop().ok_or_else(underflow)
}
