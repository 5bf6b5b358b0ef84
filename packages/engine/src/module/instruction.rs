// packages/engine/src/module/instruction.rs
//! Instruction-level representation of method code
//!
//! Every opcode has a fixed operand width, so an instruction's encoded size
//! depends only on its opcode. `INVOKE_STATIC` and `INVOKE_INSTANCE` share
//! a width, which lets a rewrite swap one for the other in place.

use crate::interception::symbol::CallKind;
use crate::module::format::opcode;
use bytes::{Buf, BufMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Nop,
    /// Push an `Int` or `Str` pool entry
    Const(u16),
    True,
    False,
    Load(u16),
    Store(u16),
    Pop,
    Dup,
    Add,
    Sub,
    Eq,
    Not,
    Concat,
    /// Push a static field (`Field` pool entry)
    GetStatic(u16),
    /// Allocate an instance of the type named by a `Utf8` entry
    New(u16),
    Jump(u32),
    JumpIfFalse(u32),
    /// Call through a `Method` pool entry
    Invoke { kind: CallKind, index: u16 },
    Return,
    ReturnValue,
    Throw,
}

/// Opcode not in the instruction set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownOpcode(pub u8);

impl Instruction {
    pub fn opcode(&self) -> u8 {
        match self {
            Instruction::Nop => opcode::NOP,
            Instruction::Const(_) => opcode::CONST,
            Instruction::True => opcode::TRUE,
            Instruction::False => opcode::FALSE,
            Instruction::Load(_) => opcode::LOAD,
            Instruction::Store(_) => opcode::STORE,
            Instruction::Pop => opcode::POP,
            Instruction::Dup => opcode::DUP,
            Instruction::Add => opcode::ADD,
            Instruction::Sub => opcode::SUB,
            Instruction::Eq => opcode::EQ,
            Instruction::Not => opcode::NOT,
            Instruction::Concat => opcode::CONCAT,
            Instruction::GetStatic(_) => opcode::GET_STATIC,
            Instruction::New(_) => opcode::NEW,
            Instruction::Jump(_) => opcode::JUMP,
            Instruction::JumpIfFalse(_) => opcode::JUMP_IF_FALSE,
            Instruction::Invoke {
                kind: CallKind::Static,
                ..
            } => opcode::INVOKE_STATIC,
            Instruction::Invoke {
                kind: CallKind::Instance,
                ..
            } => opcode::INVOKE_INSTANCE,
            Instruction::Return => opcode::RETURN,
            Instruction::ReturnValue => opcode::RETURN_VALUE,
            Instruction::Throw => opcode::THROW,
        }
    }

    /// Operand width in bytes for `opcode`
    pub fn operand_width(op: u8) -> Result<usize, UnknownOpcode> {
        let width = match op {
            opcode::NOP
            | opcode::TRUE
            | opcode::FALSE
            | opcode::POP
            | opcode::DUP
            | opcode::ADD
            | opcode::SUB
            | opcode::EQ
            | opcode::NOT
            | opcode::CONCAT
            | opcode::RETURN
            | opcode::RETURN_VALUE
            | opcode::THROW => 0,
            opcode::CONST
            | opcode::LOAD
            | opcode::STORE
            | opcode::GET_STATIC
            | opcode::NEW
            | opcode::INVOKE_STATIC
            | opcode::INVOKE_INSTANCE => 2,
            opcode::JUMP | opcode::JUMP_IF_FALSE => 4,
            other => return Err(UnknownOpcode(other)),
        };
        Ok(width)
    }

    /// Encoded size including the opcode byte
    pub fn width(&self) -> usize {
        // Every variant maps to a known opcode.
        1 + Self::operand_width(self.opcode()).unwrap_or(0)
    }

    /// Decode one instruction. The caller guarantees `buf` holds the full
    /// operand (see [`Instruction::operand_width`]).
    pub fn decode(op: u8, buf: &mut impl Buf) -> Result<Self, UnknownOpcode> {
        let insn = match op {
            opcode::NOP => Instruction::Nop,
            opcode::CONST => Instruction::Const(buf.get_u16()),
            opcode::TRUE => Instruction::True,
            opcode::FALSE => Instruction::False,
            opcode::LOAD => Instruction::Load(buf.get_u16()),
            opcode::STORE => Instruction::Store(buf.get_u16()),
            opcode::POP => Instruction::Pop,
            opcode::DUP => Instruction::Dup,
            opcode::ADD => Instruction::Add,
            opcode::SUB => Instruction::Sub,
            opcode::EQ => Instruction::Eq,
            opcode::NOT => Instruction::Not,
            opcode::CONCAT => Instruction::Concat,
            opcode::GET_STATIC => Instruction::GetStatic(buf.get_u16()),
            opcode::NEW => Instruction::New(buf.get_u16()),
            opcode::JUMP => Instruction::Jump(buf.get_u32()),
            opcode::JUMP_IF_FALSE => Instruction::JumpIfFalse(buf.get_u32()),
            opcode::INVOKE_STATIC => Instruction::Invoke {
                kind: CallKind::Static,
                index: buf.get_u16(),
            },
            opcode::INVOKE_INSTANCE => Instruction::Invoke {
                kind: CallKind::Instance,
                index: buf.get_u16(),
            },
            opcode::RETURN => Instruction::Return,
            opcode::RETURN_VALUE => Instruction::ReturnValue,
            opcode::THROW => Instruction::Throw,
            other => return Err(UnknownOpcode(other)),
        };
        Ok(insn)
    }

    pub fn encode(&self, out: &mut impl BufMut) {
        out.put_u8(self.opcode());
        match *self {
            Instruction::Const(index)
            | Instruction::Load(index)
            | Instruction::Store(index)
            | Instruction::GetStatic(index)
            | Instruction::New(index)
            | Instruction::Invoke { index, .. } => out.put_u16(index),
            Instruction::Jump(target) | Instruction::JumpIfFalse(target) => out.put_u32(target),
            _ => {}
        }
    }

    /// Pool index this instruction refers to, if any
    pub fn pool_operand(&self) -> Option<u16> {
        match *self {
            Instruction::Const(index)
            | Instruction::GetStatic(index)
            | Instruction::New(index)
            | Instruction::Invoke { index, .. } => Some(index),
            _ => None,
        }
    }

    pub fn jump_target(&self) -> Option<u32> {
        match *self {
            Instruction::Jump(target) | Instruction::JumpIfFalse(target) => Some(target),
            _ => None,
        }
    }

    /// Control never reaches the following instruction
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Instruction::Jump(_) | Instruction::Return | Instruction::ReturnValue | Instruction::Throw
        )
    }
}

/// Byte offset of each instruction in `code`
pub fn offsets(code: &[Instruction]) -> Vec<u32> {
    let mut offsets = Vec::with_capacity(code.len());
    let mut offset = 0u32;
    for insn in code {
        offsets.push(offset);
        offset += insn.width() as u32;
    }
    offsets
}

/// Total encoded length of `code`
pub fn code_len(code: &[Instruction]) -> usize {
    code.iter().map(Instruction::width).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoke_kinds_share_width() {
        let stat = Instruction::Invoke {
            kind: CallKind::Static,
            index: 7,
        };
        let inst = Instruction::Invoke {
            kind: CallKind::Instance,
            index: 7,
        };
        assert_eq!(stat.width(), inst.width());
        assert_eq!(stat.width(), 3);
    }

    #[test]
    fn test_encode_decode() {
        let insn = Instruction::JumpIfFalse(0x0102_0304);
        let mut out = Vec::new();
        insn.encode(&mut out);
        assert_eq!(out, vec![opcode::JUMP_IF_FALSE, 1, 2, 3, 4]);

        let mut buf = &out[1..];
        assert_eq!(Instruction::decode(out[0], &mut buf).unwrap(), insn);
    }

    #[test]
    fn test_unknown_opcode() {
        assert_eq!(Instruction::operand_width(0xFF), Err(UnknownOpcode(0xFF)));
        let mut empty: &[u8] = &[];
        assert!(Instruction::decode(0xEE, &mut empty).is_err());
    }

    #[test]
    fn test_offsets() {
        let code = [
            Instruction::Const(0),
            Instruction::Pop,
            Instruction::Jump(0),
            Instruction::Return,
        ];
        assert_eq!(offsets(&code), vec![0, 3, 4, 9]);
        assert_eq!(code_len(&code), 10);
    }
}
