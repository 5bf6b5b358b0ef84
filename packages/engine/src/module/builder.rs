// packages/engine/src/module/builder.rs
//! Assembler for module images
//!
//! ```ignore
//! let mut builder = ModuleBuilder::new("app.Main");
//! builder
//!     .method("main", "()V", ACC_STATIC)
//!     .const_int(2)
//!     .invoke_static("core.System", "exit", "(I)V")
//!     .ret()
//!     .finish();
//! let image = builder.build()?;
//! ```
//!
//! Emit methods chain and record the first failure; `build` reports it.

use crate::interception::symbol::{CallKind, DescriptorError, Signature};
use crate::module::constant_pool::{Constant, ConstantPool, PoolOverflow};
use crate::module::format::{ACC_STATIC, MAJOR_VERSION, MINOR_VERSION};
use crate::module::instruction::Instruction;
use crate::module::{Handler, MethodImage, ModuleImage};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error(transparent)]
    Pool(#[from] PoolOverflow),

    #[error(transparent)]
    Descriptor(#[from] DescriptorError),

    #[error("method {method}: label {label} was never bound")]
    UnboundLabel { method: String, label: usize },
}

/// Branch target placeholder, resolved to a byte offset when the method is
/// finished
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Label(usize);

#[derive(Debug, Clone, Copy)]
enum Item {
    Insn(Instruction),
    Jump(Label),
    JumpIfFalse(Label),
}

impl Item {
    fn width(&self) -> usize {
        match self {
            Item::Insn(insn) => insn.width(),
            Item::Jump(_) => Instruction::Jump(0).width(),
            Item::JumpIfFalse(_) => Instruction::JumpIfFalse(0).width(),
        }
    }
}

pub struct ModuleBuilder {
    pool: ConstantPool,
    this_name: u16,
    methods: Vec<MethodImage>,
    error: Option<BuildError>,
}

impl ModuleBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            pool: ConstantPool::from_entries(vec![Constant::Utf8(name.to_string())]),
            this_name: 0,
            methods: Vec::new(),
            error: None,
        }
    }

    /// Start a method. Nothing is added until [`MethodBuilder::finish`].
    pub fn method(&mut self, name: &str, descriptor: &str, flags: u16) -> MethodBuilder<'_> {
        let mut method = MethodBuilder {
            label: format!("{}{}", name, descriptor),
            flags,
            name: 0,
            descriptor: 0,
            min_locals: 0,
            max_locals: None,
            items: Vec::new(),
            labels: Vec::new(),
            handlers: Vec::new(),
            module: self,
        };

        match Signature::parse(descriptor) {
            Ok(signature) => {
                method.min_locals = signature.arity() + usize::from(flags & ACC_STATIC == 0);
            }
            Err(e) => method.module.fail(e.into()),
        }
        method.name = method.module.intern(|pool| pool.intern_utf8(name));
        method.descriptor = method.module.intern(|pool| pool.intern_utf8(descriptor));
        method
    }

    /// Access the pool directly, for entries the emit methods do not cover
    pub fn pool_mut(&mut self) -> &mut ConstantPool {
        &mut self.pool
    }

    pub fn build(self) -> Result<ModuleImage, BuildError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(ModuleImage {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            pool: self.pool,
            this_name: self.this_name,
            methods: self.methods,
        })
    }

    fn fail(&mut self, error: BuildError) {
        self.error.get_or_insert(error);
    }

    fn intern(&mut self, f: impl FnOnce(&mut ConstantPool) -> Result<u16, PoolOverflow>) -> u16 {
        match f(&mut self.pool) {
            Ok(index) => index,
            Err(e) => {
                self.fail(e.into());
                0
            }
        }
    }
}

pub struct MethodBuilder<'a> {
    module: &'a mut ModuleBuilder,
    label: String,
    flags: u16,
    name: u16,
    descriptor: u16,
    min_locals: usize,
    max_locals: Option<u16>,
    items: Vec<Item>,
    labels: Vec<Option<usize>>,
    handlers: Vec<(Label, Label, Label)>,
}

impl<'a> MethodBuilder<'a> {
    fn push(&mut self, insn: Instruction) -> &mut Self {
        self.items.push(Item::Insn(insn));
        self
    }

    /// Override the computed local slot count
    pub fn locals(&mut self, count: u16) -> &mut Self {
        self.max_locals = Some(count);
        self
    }

    pub fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    /// Bind `label` to the next emitted instruction
    pub fn bind(&mut self, label: Label) -> &mut Self {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.items.len());
        }
        self
    }

    /// Catch ordinary failures raised in `[start, end)` at `target`
    pub fn handler(&mut self, start: Label, end: Label, target: Label) -> &mut Self {
        self.handlers.push((start, end, target));
        self
    }

    pub fn nop(&mut self) -> &mut Self {
        self.push(Instruction::Nop)
    }

    pub fn const_int(&mut self, value: i64) -> &mut Self {
        let index = self.module.intern(|pool| pool.intern_int(value));
        self.push(Instruction::Const(index))
    }

    pub fn const_str(&mut self, value: &str) -> &mut Self {
        let index = self.module.intern(|pool| pool.intern_str(value));
        self.push(Instruction::Const(index))
    }

    pub fn const_bool(&mut self, value: bool) -> &mut Self {
        self.push(if value { Instruction::True } else { Instruction::False })
    }

    pub fn load(&mut self, slot: u16) -> &mut Self {
        self.push(Instruction::Load(slot))
    }

    pub fn store(&mut self, slot: u16) -> &mut Self {
        self.push(Instruction::Store(slot))
    }

    pub fn pop(&mut self) -> &mut Self {
        self.push(Instruction::Pop)
    }

    pub fn dup(&mut self) -> &mut Self {
        self.push(Instruction::Dup)
    }

    pub fn add(&mut self) -> &mut Self {
        self.push(Instruction::Add)
    }

    pub fn sub(&mut self) -> &mut Self {
        self.push(Instruction::Sub)
    }

    pub fn eq(&mut self) -> &mut Self {
        self.push(Instruction::Eq)
    }

    pub fn not(&mut self) -> &mut Self {
        self.push(Instruction::Not)
    }

    pub fn concat(&mut self) -> &mut Self {
        self.push(Instruction::Concat)
    }

    pub fn get_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.module.intern(|pool| pool.intern_field(owner, name, descriptor));
        self.push(Instruction::GetStatic(index))
    }

    pub fn new_object(&mut self, type_name: &str) -> &mut Self {
        let index = self.module.intern(|pool| pool.intern_utf8(type_name));
        self.push(Instruction::New(index))
    }

    pub fn jump(&mut self, label: Label) -> &mut Self {
        self.items.push(Item::Jump(label));
        self
    }

    pub fn jump_if_false(&mut self, label: Label) -> &mut Self {
        self.items.push(Item::JumpIfFalse(label));
        self
    }

    pub fn invoke_static(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(CallKind::Static, owner, name, descriptor)
    }

    pub fn invoke_instance(&mut self, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        self.invoke(CallKind::Instance, owner, name, descriptor)
    }

    fn invoke(&mut self, kind: CallKind, owner: &str, name: &str, descriptor: &str) -> &mut Self {
        let index = self.module.intern(|pool| pool.intern_method(owner, name, descriptor));
        self.push(Instruction::Invoke { kind, index })
    }

    pub fn ret(&mut self) -> &mut Self {
        self.push(Instruction::Return)
    }

    pub fn ret_value(&mut self) -> &mut Self {
        self.push(Instruction::ReturnValue)
    }

    pub fn throw(&mut self) -> &mut Self {
        self.push(Instruction::Throw)
    }

    /// Resolve labels and add the method to the module
    pub fn finish(&mut self) {
        match self.assemble() {
            Ok(method) => self.module.methods.push(method),
            Err(e) => self.module.fail(e),
        }
    }

    fn assemble(&self) -> Result<MethodImage, BuildError> {
        let mut offsets = Vec::with_capacity(self.items.len() + 1);
        let mut offset = 0u32;
        for item in &self.items {
            offsets.push(offset);
            offset += item.width() as u32;
        }
        // A label bound after the last instruction points at the end of code.
        offsets.push(offset);

        let resolve = |label: Label| -> Result<u32, BuildError> {
            self.labels
                .get(label.0)
                .copied()
                .flatten()
                .map(|position| offsets[position])
                .ok_or_else(|| BuildError::UnboundLabel {
                    method: self.label.clone(),
                    label: label.0,
                })
        };

        let mut code = Vec::with_capacity(self.items.len());
        let mut highest_slot = None;
        for item in &self.items {
            let insn = match *item {
                Item::Insn(insn) => insn,
                Item::Jump(label) => Instruction::Jump(resolve(label)?),
                Item::JumpIfFalse(label) => Instruction::JumpIfFalse(resolve(label)?),
            };
            if let Instruction::Load(slot) | Instruction::Store(slot) = insn {
                highest_slot = highest_slot.max(Some(slot));
            }
            code.push(insn);
        }

        let mut handlers = Vec::with_capacity(self.handlers.len());
        for &(start, end, target) in &self.handlers {
            handlers.push(Handler {
                start: resolve(start)?,
                end: resolve(end)?,
                target: resolve(target)?,
            });
        }

        let used = highest_slot.map_or(0, |slot| slot as usize + 1);
        let max_locals = self
            .max_locals
            .unwrap_or_else(|| used.max(self.min_locals).min(u16::MAX as usize) as u16);

        Ok(MethodImage {
            flags: self.flags,
            name: self.name,
            descriptor: self.descriptor,
            max_locals,
            code,
            handlers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::verifier::verify;

    #[test]
    fn test_labels_resolve_to_offsets() {
        let mut builder = ModuleBuilder::new("app.Branch");
        {
            let mut method = builder.method("pick", "(Z)I", ACC_STATIC);
            let other = method.new_label();
            method
                .load(0)
                .jump_if_false(other)
                .const_int(1)
                .ret_value()
                .bind(other)
                .const_int(2)
                .ret_value()
                .finish();
        }
        let image = builder.build().unwrap();
        let method = &image.methods[0];

        // load(3) + jump_if_false(5) + const(3) + ret_value(1)
        assert_eq!(method.code[1], Instruction::JumpIfFalse(12));
        assert_eq!(method.max_locals, 1);
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn test_handler_range() {
        let mut builder = ModuleBuilder::new("app.Catch");
        {
            let mut method = builder.method("run", "()T", ACC_STATIC);
            let start = method.new_label();
            let end = method.new_label();
            let caught = method.new_label();
            method
                .bind(start)
                .const_str("boom")
                .throw()
                .bind(end)
                .bind(caught)
                .ret_value()
                .handler(start, end, caught)
                .finish();
        }
        let image = builder.build().unwrap();
        assert_eq!(
            image.methods[0].handlers,
            vec![Handler {
                start: 0,
                end: 4,
                target: 4
            }]
        );
        assert!(verify(&image).is_ok());
    }

    #[test]
    fn test_unbound_label() {
        let mut builder = ModuleBuilder::new("app.Broken");
        {
            let mut method = builder.method("main", "()V", ACC_STATIC);
            let nowhere = method.new_label();
            method.jump(nowhere).finish();
        }
        assert!(matches!(builder.build(), Err(BuildError::UnboundLabel { .. })));
    }

    #[test]
    fn test_bad_descriptor() {
        let mut builder = ModuleBuilder::new("app.Broken");
        builder.method("main", "(Q)V", ACC_STATIC).ret().finish();
        assert!(matches!(builder.build(), Err(BuildError::Descriptor(_))));
    }

    #[test]
    fn test_instance_method_reserves_receiver() {
        let mut builder = ModuleBuilder::new("app.Greeter");
        builder.method("greet", "(T)V", 0).ret().finish();
        let image = builder.build().unwrap();
        assert_eq!(image.methods[0].max_locals, 2);
        assert!(!image.methods[0].is_static());
    }
}
