// packages/engine/src/module/writer.rs
//! Module image encoder
//!
//! The format has one encoding per image, so encoding a freshly parsed
//! image reproduces its input byte for byte.

use crate::module::constant_pool::Constant;
use crate::module::format::{tag, MAGIC, MAX_POOL_ENTRIES};
use crate::module::instruction::{code_len, Instruction};
use crate::module::{MethodImage, ModuleImage};
use bytes::{BufMut, Bytes, BytesMut};
use thiserror::Error;

/// Image cannot be encoded
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SerializeError {
    #[error("constant pool has {0} entries, the format allows {max}", max = MAX_POOL_ENTRIES)]
    PoolTooLarge(usize),

    #[error("constant #{index} is {len} bytes, longer than a u16 length")]
    StringTooLong { index: usize, len: usize },

    #[error("{0} methods exceed the u16 method table")]
    TooManyMethods(usize),

    #[error("method #{method} code is {len} bytes, longer than a u32 length")]
    CodeTooLarge { method: usize, len: usize },

    #[error("method #{method} has {count} handlers, more than a u16 table")]
    TooManyHandlers { method: usize, count: usize },

    #[error("method #{method}: operand at instruction {position} refers to missing constant #{index}")]
    DanglingOperand {
        method: usize,
        position: usize,
        index: u16,
    },

    #[error("module name refers to missing constant #{0}")]
    DanglingName(u16),
}

/// Encode `image`
pub fn write(image: &ModuleImage) -> Result<Bytes, SerializeError> {
    let pool_len = image.pool.len();
    if pool_len > MAX_POOL_ENTRIES {
        return Err(SerializeError::PoolTooLarge(pool_len));
    }
    if image.this_name as usize >= pool_len {
        return Err(SerializeError::DanglingName(image.this_name));
    }
    if image.methods.len() > u16::MAX as usize {
        return Err(SerializeError::TooManyMethods(image.methods.len()));
    }

    let mut out = BytesMut::with_capacity(estimate_size(image));
    out.put_u32(MAGIC);
    out.put_u16(image.major);
    out.put_u16(image.minor);

    out.put_u16(pool_len as u16);
    for (index, constant) in image.pool.entries().iter().enumerate() {
        write_constant(&mut out, index, constant)?;
    }

    out.put_u16(image.this_name);
    out.put_u16(image.methods.len() as u16);
    for (index, method) in image.methods.iter().enumerate() {
        write_method(&mut out, index, method, pool_len)?;
    }

    Ok(out.freeze())
}

fn write_constant(out: &mut BytesMut, index: usize, constant: &Constant) -> Result<(), SerializeError> {
    match constant {
        Constant::Utf8(text) => {
            if text.len() > u16::MAX as usize {
                return Err(SerializeError::StringTooLong {
                    index,
                    len: text.len(),
                });
            }
            out.put_u8(tag::UTF8);
            out.put_u16(text.len() as u16);
            out.put_slice(text.as_bytes());
        }
        Constant::Int(value) => {
            out.put_u8(tag::INT);
            out.put_i64(*value);
        }
        Constant::Str(utf8) => {
            out.put_u8(tag::STR);
            out.put_u16(*utf8);
        }
        Constant::Method(member) | Constant::Field(member) => {
            let t = if matches!(constant, Constant::Method(_)) {
                tag::METHOD
            } else {
                tag::FIELD
            };
            out.put_u8(t);
            out.put_u16(member.owner);
            out.put_u16(member.name);
            out.put_u16(member.descriptor);
        }
    }
    Ok(())
}

fn write_method(
    out: &mut BytesMut,
    index: usize,
    method: &MethodImage,
    pool_len: usize,
) -> Result<(), SerializeError> {
    let len = code_len(&method.code);
    if len > u32::MAX as usize {
        return Err(SerializeError::CodeTooLarge { method: index, len });
    }
    if method.handlers.len() > u16::MAX as usize {
        return Err(SerializeError::TooManyHandlers {
            method: index,
            count: method.handlers.len(),
        });
    }

    out.put_u16(method.flags);
    out.put_u16(method.name);
    out.put_u16(method.descriptor);
    out.put_u16(method.max_locals);

    out.put_u32(len as u32);
    for (position, insn) in method.code.iter().enumerate() {
        check_operand(insn, index, position, pool_len)?;
        insn.encode(out);
    }

    out.put_u16(method.handlers.len() as u16);
    for handler in &method.handlers {
        out.put_u32(handler.start);
        out.put_u32(handler.end);
        out.put_u32(handler.target);
    }
    Ok(())
}

fn check_operand(
    insn: &Instruction,
    method: usize,
    position: usize,
    pool_len: usize,
) -> Result<(), SerializeError> {
    match insn.pool_operand() {
        Some(index) if index as usize >= pool_len => Err(SerializeError::DanglingOperand {
            method,
            position,
            index,
        }),
        _ => Ok(()),
    }
}

fn estimate_size(image: &ModuleImage) -> usize {
    let methods: usize = image
        .methods
        .iter()
        .map(|m| 16 + code_len(&m.code) + m.handlers.len() * 12)
        .sum();
    12 + image.pool.len() * 8 + methods
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::constant_pool::ConstantPool;
    use crate::module::format::{ACC_STATIC, MAJOR_VERSION, MINOR_VERSION};
    use crate::module::reader::parse;
    use crate::module::Handler;

    fn image(entries: Vec<Constant>, methods: Vec<MethodImage>) -> ModuleImage {
        ModuleImage {
            major: MAJOR_VERSION,
            minor: MINOR_VERSION,
            pool: ConstantPool::from_entries(entries),
            this_name: 0,
            methods,
        }
    }

    fn names() -> Vec<Constant> {
        vec![
            Constant::Utf8("app.Main".into()),
            Constant::Utf8("main".into()),
            Constant::Utf8("()V".into()),
        ]
    }

    fn main_with(code: Vec<Instruction>) -> MethodImage {
        MethodImage {
            flags: ACC_STATIC,
            name: 1,
            descriptor: 2,
            max_locals: 0,
            code,
            handlers: Vec::new(),
        }
    }

    #[test]
    fn test_encoding_parses_back() {
        let mut method = main_with(vec![Instruction::Nop, Instruction::Return]);
        method.handlers.push(Handler {
            start: 0,
            end: 1,
            target: 1,
        });
        let original = image(names(), vec![method]);

        let bytes = write(&original).unwrap();
        assert_eq!(&bytes[..4], b"RMOD");
        let parsed = parse(&bytes).unwrap();
        assert_eq!(parsed, original);
        assert_eq!(write(&parsed).unwrap(), bytes);
    }

    #[test]
    fn test_full_pool_is_encodable() {
        let mut entries = names();
        entries.extend((0..).take(MAX_POOL_ENTRIES - 3).map(Constant::Int));
        let full = image(entries, Vec::new());

        let bytes = write(&full).unwrap();
        assert_eq!(parse(&bytes).unwrap().pool.len(), MAX_POOL_ENTRIES);
    }

    #[test]
    fn test_pool_too_large() {
        let mut entries = names();
        entries.extend((0..).take(MAX_POOL_ENTRIES - 2).map(Constant::Int));
        let err = write(&image(entries, Vec::new())).unwrap_err();
        assert_eq!(err, SerializeError::PoolTooLarge(MAX_POOL_ENTRIES + 1));
    }

    #[test]
    fn test_dangling_name() {
        let mut module = image(names(), Vec::new());
        module.this_name = 3;
        assert_eq!(write(&module), Err(SerializeError::DanglingName(3)));
    }

    #[test]
    fn test_string_too_long() {
        let mut entries = names();
        entries.push(Constant::Utf8("x".repeat(u16::MAX as usize + 1)));
        let err = write(&image(entries, Vec::new())).unwrap_err();
        assert_eq!(
            err,
            SerializeError::StringTooLong {
                index: 3,
                len: u16::MAX as usize + 1
            }
        );
    }

    #[test]
    fn test_dangling_operand() {
        let code = vec![Instruction::Const(0), Instruction::Pop, Instruction::Const(7), Instruction::Return];
        let err = write(&image(names(), vec![main_with(code)])).unwrap_err();
        assert_eq!(
            err,
            SerializeError::DanglingOperand {
                method: 0,
                position: 2,
                index: 7
            }
        );
    }

    #[test]
    fn test_too_many_methods() {
        let methods = vec![main_with(vec![Instruction::Return]); u16::MAX as usize + 1];
        let err = write(&image(names(), methods)).unwrap_err();
        assert_eq!(err, SerializeError::TooManyMethods(u16::MAX as usize + 1));
    }

    #[test]
    fn test_too_many_handlers() {
        let mut method = main_with(vec![Instruction::Return]);
        method.handlers = vec![
            Handler {
                start: 0,
                end: 1,
                target: 0,
            };
            u16::MAX as usize + 1
        ];
        let err = write(&image(names(), vec![method])).unwrap_err();
        assert_eq!(
            err,
            SerializeError::TooManyHandlers {
                method: 0,
                count: u16::MAX as usize + 1
            }
        );
    }
}
