// packages/engine/src/module/verifier.rs
//! Well-formedness check run before a module is defined
//!
//! Checks pool references and descriptors, local slots, branch and handler
//! targets, then runs an abstract stack-height pass over every method:
//! no underflow, equal heights where control merges, call arity taken from
//! the call descriptor, return kind matching the method descriptor and no
//! path running off the end of the code.

use crate::interception::symbol::{CallKind, DescriptorError, Signature, ValueType};
use crate::module::constant_pool::{Constant, ConstantPool};
use crate::module::instruction::{offsets, Instruction};
use crate::module::{MethodImage, ModuleImage};
use std::collections::{HashSet, VecDeque};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("constant #{index} should be {expected}")]
    BadConstant { index: u16, expected: &'static str },

    #[error("constant #{index}: {error}")]
    BadDescriptor {
        index: u16,
        #[source]
        error: DescriptorError,
    },

    #[error("module is named `{found}`, expected `{expected}`")]
    NameMismatch { expected: String, found: String },

    #[error("duplicate method {0}")]
    DuplicateMethod(String),

    #[error("{method}: max_locals {max_locals} is smaller than the {needed} argument slots")]
    TooFewLocals {
        method: String,
        needed: usize,
        max_locals: u16,
    },

    #[error("{method} @{offset}: operand #{index} should be {expected}")]
    BadOperand {
        method: String,
        offset: u32,
        index: u16,
        expected: &'static str,
    },

    #[error("{method} @{offset}: local slot {slot} out of range")]
    LocalOutOfRange { method: String, offset: u32, slot: u16 },

    #[error("{method} @{offset}: branch target {target} is not an instruction boundary")]
    BadBranchTarget { method: String, offset: u32, target: u32 },

    #[error("{method}: handler #{index} has an invalid range or target")]
    BadHandler { method: String, index: usize },

    #[error("{method} @{offset}: stack underflow")]
    StackUnderflow { method: String, offset: u32 },

    #[error("{method} @{offset}: stack height {found} differs from {expected} on another path")]
    StackMismatch {
        method: String,
        offset: u32,
        expected: usize,
        found: usize,
    },

    #[error("{method} @{offset}: return kind does not match the descriptor")]
    ReturnMismatch { method: String, offset: u32 },

    #[error("{method}: control reaches the end of the code")]
    FallsOffEnd { method: String },
}

type Result<T> = std::result::Result<T, VerifyError>;

/// Verify `image`
pub fn verify(image: &ModuleImage) -> Result<()> {
    check_pool(&image.pool)?;

    if image.name().is_none() {
        return Err(VerifyError::BadConstant {
            index: image.this_name,
            expected: "Utf8",
        });
    }

    let mut seen = HashSet::new();
    for (index, method) in image.methods.iter().enumerate() {
        let label = image.describe_method(index);
        if !seen.insert(label.clone()) {
            return Err(VerifyError::DuplicateMethod(label));
        }
        MethodVerifier::new(image, method, label)?.run()?;
    }
    Ok(())
}

/// Verify `image` and check it is named `expected`
pub fn verify_named(image: &ModuleImage, expected: &str) -> Result<()> {
    verify(image)?;
    match image.name() {
        Some(found) if found == expected => Ok(()),
        found => Err(VerifyError::NameMismatch {
            expected: expected.to_string(),
            found: found.unwrap_or_default().to_string(),
        }),
    }
}

fn check_pool(pool: &ConstantPool) -> Result<()> {
    let utf8 = |index: u16| {
        pool.utf8(index).ok_or(VerifyError::BadConstant {
            index,
            expected: "Utf8",
        })
    };

    for (i, constant) in pool.entries().iter().enumerate() {
        let index = i as u16;
        match constant {
            Constant::Utf8(_) | Constant::Int(_) => {}
            Constant::Str(target) => {
                utf8(*target)?;
            }
            Constant::Method(member) => {
                utf8(member.owner)?;
                utf8(member.name)?;
                Signature::parse(utf8(member.descriptor)?)
                    .map_err(|error| VerifyError::BadDescriptor { index, error })?;
            }
            Constant::Field(member) => {
                utf8(member.owner)?;
                utf8(member.name)?;
                ValueType::parse(utf8(member.descriptor)?)
                    .map_err(|error| VerifyError::BadDescriptor { index, error })?;
            }
        }
    }
    Ok(())
}

struct MethodVerifier<'a> {
    pool: &'a ConstantPool,
    method: &'a MethodImage,
    label: String,
    returns_value: bool,
    offsets: Vec<u32>,
    code_len: u32,
}

impl<'a> MethodVerifier<'a> {
    fn new(image: &'a ModuleImage, method: &'a MethodImage, label: String) -> Result<Self> {
        let descriptor = image.pool.utf8(method.descriptor).ok_or(VerifyError::BadConstant {
            index: method.descriptor,
            expected: "Utf8",
        })?;
        if image.pool.utf8(method.name).is_none() {
            return Err(VerifyError::BadConstant {
                index: method.name,
                expected: "Utf8",
            });
        }

        let signature = Signature::parse(descriptor).map_err(|error| VerifyError::BadDescriptor {
            index: method.descriptor,
            error,
        })?;

        let needed = signature.arity() + usize::from(!method.is_static());
        if (method.max_locals as usize) < needed {
            return Err(VerifyError::TooFewLocals {
                method: label,
                needed,
                max_locals: method.max_locals,
            });
        }

        let offsets = offsets(&method.code);
        let code_len = offsets
            .last()
            .zip(method.code.last())
            .map(|(offset, insn)| offset + insn.width() as u32)
            .unwrap_or(0);

        Ok(Self {
            pool: &image.pool,
            method,
            label,
            returns_value: !signature.is_void(),
            offsets,
            code_len,
        })
    }

    fn position(&self, offset: u32) -> Option<usize> {
        self.offsets.binary_search(&offset).ok()
    }

    fn run(&self) -> Result<()> {
        self.check_handlers()?;

        if self.method.code.is_empty() {
            return Err(VerifyError::FallsOffEnd {
                method: self.label.clone(),
            });
        }

        let mut heights: Vec<Option<usize>> = vec![None; self.method.code.len()];
        let mut queue = VecDeque::new();

        self.merge(&mut heights, &mut queue, 0, 0)?;
        for handler in &self.method.handlers {
            // Handlers start on a fresh stack holding the failure message.
            let target = self.position(handler.target).unwrap_or_default();
            self.merge(&mut heights, &mut queue, target, 1)?;
        }

        while let Some(position) = queue.pop_front() {
            let height = heights[position].unwrap_or_default();
            let insn = self.method.code[position];
            let offset = self.offsets[position];

            let (pops, pushes) = self.effect(&insn, offset)?;
            if height < pops {
                return Err(VerifyError::StackUnderflow {
                    method: self.label.clone(),
                    offset,
                });
            }
            let after = height - pops + pushes;

            if let Some(target) = insn.jump_target() {
                let to = self.position(target).ok_or_else(|| VerifyError::BadBranchTarget {
                    method: self.label.clone(),
                    offset,
                    target,
                })?;
                self.merge(&mut heights, &mut queue, to, after)?;
            }

            if !insn.is_terminal() {
                let next = position + 1;
                if next >= self.method.code.len() {
                    return Err(VerifyError::FallsOffEnd {
                        method: self.label.clone(),
                    });
                }
                self.merge(&mut heights, &mut queue, next, after)?;
            }
        }

        Ok(())
    }

    fn merge(
        &self,
        heights: &mut [Option<usize>],
        queue: &mut VecDeque<usize>,
        position: usize,
        height: usize,
    ) -> Result<()> {
        match heights[position] {
            Some(existing) if existing != height => Err(VerifyError::StackMismatch {
                method: self.label.clone(),
                offset: self.offsets[position],
                expected: existing,
                found: height,
            }),
            Some(_) => Ok(()),
            None => {
                heights[position] = Some(height);
                queue.push_back(position);
                Ok(())
            }
        }
    }

    fn check_handlers(&self) -> Result<()> {
        for (index, handler) in self.method.handlers.iter().enumerate() {
            let end_ok = handler.end == self.code_len || self.position(handler.end).is_some();
            let valid = handler.start < handler.end
                && self.position(handler.start).is_some()
                && end_ok
                && self.position(handler.target).is_some();
            if !valid {
                return Err(VerifyError::BadHandler {
                    method: self.label.clone(),
                    index,
                });
            }
        }
        Ok(())
    }

    fn operand_error(&self, offset: u32, index: u16, expected: &'static str) -> VerifyError {
        VerifyError::BadOperand {
            method: self.label.clone(),
            offset,
            index,
            expected,
        }
    }

    fn check_local(&self, offset: u32, slot: u16) -> Result<()> {
        if slot >= self.method.max_locals {
            return Err(VerifyError::LocalOutOfRange {
                method: self.label.clone(),
                offset,
                slot,
            });
        }
        Ok(())
    }

    /// `(pops, pushes)` for one instruction
    fn effect(&self, insn: &Instruction, offset: u32) -> Result<(usize, usize)> {
        let effect = match *insn {
            Instruction::Nop | Instruction::Jump(_) => (0, 0),
            Instruction::True | Instruction::False => (0, 1),
            Instruction::Const(index) => match self.pool.get(index) {
                Some(Constant::Int(_)) | Some(Constant::Str(_)) => (0, 1),
                _ => return Err(self.operand_error(offset, index, "Int or Str")),
            },
            Instruction::Load(slot) => {
                self.check_local(offset, slot)?;
                (0, 1)
            }
            Instruction::Store(slot) => {
                self.check_local(offset, slot)?;
                (1, 0)
            }
            Instruction::Pop | Instruction::JumpIfFalse(_) | Instruction::Throw => (1, 0),
            Instruction::Dup => (1, 2),
            Instruction::Add | Instruction::Sub | Instruction::Eq | Instruction::Concat => (2, 1),
            Instruction::Not => (1, 1),
            Instruction::GetStatic(index) => {
                self.pool
                    .field(index)
                    .ok_or_else(|| self.operand_error(offset, index, "Field"))?;
                (0, 1)
            }
            Instruction::New(index) => {
                self.pool
                    .utf8(index)
                    .ok_or_else(|| self.operand_error(offset, index, "Utf8"))?;
                (0, 1)
            }
            Instruction::Invoke { kind, index } => {
                let member = self
                    .pool
                    .method(index)
                    .ok_or_else(|| self.operand_error(offset, index, "Method"))?;
                let signature = Signature::parse(member.descriptor)
                    .map_err(|error| VerifyError::BadDescriptor { index, error })?;
                let receiver = usize::from(kind == CallKind::Instance);
                (signature.arity() + receiver, usize::from(!signature.is_void()))
            }
            Instruction::Return => {
                if self.returns_value {
                    return Err(self.return_error(offset));
                }
                (0, 0)
            }
            Instruction::ReturnValue => {
                if !self.returns_value {
                    return Err(self.return_error(offset));
                }
                (1, 0)
            }
        };
        Ok(effect)
    }

    fn return_error(&self, offset: u32) -> VerifyError {
        VerifyError::ReturnMismatch {
            method: self.label.clone(),
            offset,
        }
    }
}
