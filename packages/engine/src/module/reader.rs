// packages/engine/src/module/reader.rs
//! Module image decoder

use crate::module::constant_pool::{Constant, ConstantPool, MemberRef};
use crate::module::format::{tag, MAGIC, MAJOR_VERSION};
use crate::module::instruction::Instruction;
use crate::module::{Handler, MethodImage, ModuleImage};
use bytes::Buf;
use thiserror::Error;

/// Structurally invalid module bytes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unexpected end of input at byte {offset} (needed {needed} more)")]
    Truncated { offset: usize, needed: usize },

    #[error("bad magic 0x{0:08x}")]
    BadMagic(u32),

    #[error("unsupported format version {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("constant #{index} has unknown tag {tag}")]
    UnknownTag { index: usize, tag: u8 },

    #[error("constant #{index} is not valid UTF-8")]
    InvalidUtf8 { index: usize },

    #[error("method #{method}: unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode { method: usize, offset: usize, opcode: u8 },

    #[error("method #{method}: instruction at offset {offset} runs past the end of code")]
    TruncatedInstruction { method: usize, offset: usize },

    #[error("{0} trailing bytes after last method")]
    TrailingBytes(usize),
}

struct Reader<'a> {
    buf: &'a [u8],
    total: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self {
            buf,
            total: buf.len(),
        }
    }

    fn offset(&self) -> usize {
        self.total - self.buf.remaining()
    }

    fn need(&self, n: usize) -> Result<(), ParseError> {
        if self.buf.remaining() < n {
            return Err(ParseError::Truncated {
                offset: self.offset(),
                needed: n - self.buf.remaining(),
            });
        }
        Ok(())
    }

    fn u8(&mut self) -> Result<u8, ParseError> {
        self.need(1)?;
        Ok(self.buf.get_u8())
    }

    fn u16(&mut self) -> Result<u16, ParseError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self) -> Result<u32, ParseError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    fn i64(&mut self) -> Result<i64, ParseError> {
        self.need(8)?;
        Ok(self.buf.get_i64())
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8], ParseError> {
        self.need(len)?;
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }
}

/// Decode a complete module image
pub fn parse(input: &[u8]) -> Result<ModuleImage, ParseError> {
    let mut reader = Reader::new(input);

    let magic = reader.u32()?;
    if magic != MAGIC {
        return Err(ParseError::BadMagic(magic));
    }

    let major = reader.u16()?;
    let minor = reader.u16()?;
    if major != MAJOR_VERSION {
        return Err(ParseError::UnsupportedVersion { major, minor });
    }

    let pool = parse_pool(&mut reader)?;
    let this_name = reader.u16()?;

    let method_count = reader.u16()? as usize;
    let mut methods = Vec::with_capacity(method_count);
    for index in 0..method_count {
        methods.push(parse_method(&mut reader, index)?);
    }

    if reader.buf.has_remaining() {
        return Err(ParseError::TrailingBytes(reader.buf.remaining()));
    }

    Ok(ModuleImage {
        major,
        minor,
        pool,
        this_name,
        methods,
    })
}

fn parse_pool(reader: &mut Reader<'_>) -> Result<ConstantPool, ParseError> {
    let count = reader.u16()? as usize;
    let mut entries = Vec::with_capacity(count);

    for index in 0..count {
        let constant = match reader.u8()? {
            tag::UTF8 => {
                let len = reader.u16()? as usize;
                let raw = reader.bytes(len)?;
                let text = std::str::from_utf8(raw).map_err(|_| ParseError::InvalidUtf8 { index })?;
                Constant::Utf8(text.to_string())
            }
            tag::INT => Constant::Int(reader.i64()?),
            tag::STR => Constant::Str(reader.u16()?),
            tag::METHOD => Constant::Method(parse_member(reader)?),
            tag::FIELD => Constant::Field(parse_member(reader)?),
            other => return Err(ParseError::UnknownTag { index, tag: other }),
        };
        entries.push(constant);
    }

    Ok(ConstantPool::from_entries(entries))
}

fn parse_member(reader: &mut Reader<'_>) -> Result<MemberRef, ParseError> {
    Ok(MemberRef {
        owner: reader.u16()?,
        name: reader.u16()?,
        descriptor: reader.u16()?,
    })
}

fn parse_method(reader: &mut Reader<'_>, index: usize) -> Result<MethodImage, ParseError> {
    let flags = reader.u16()?;
    let name = reader.u16()?;
    let descriptor = reader.u16()?;
    let max_locals = reader.u16()?;

    let code_len = reader.u32()? as usize;
    let raw = reader.bytes(code_len)?;
    let code = parse_code(raw, index)?;

    let handler_count = reader.u16()? as usize;
    let mut handlers = Vec::with_capacity(handler_count);
    for _ in 0..handler_count {
        handlers.push(Handler {
            start: reader.u32()?,
            end: reader.u32()?,
            target: reader.u32()?,
        });
    }

    Ok(MethodImage {
        flags,
        name,
        descriptor,
        max_locals,
        code,
        handlers,
    })
}

fn parse_code(raw: &[u8], method: usize) -> Result<Vec<Instruction>, ParseError> {
    let mut code = Vec::new();
    let mut buf = raw;

    while buf.has_remaining() {
        let offset = raw.len() - buf.remaining();
        let opcode = buf.get_u8();

        let width = Instruction::operand_width(opcode).map_err(|e| ParseError::UnknownOpcode {
            method,
            offset,
            opcode: e.0,
        })?;
        if buf.remaining() < width {
            return Err(ParseError::TruncatedInstruction { method, offset });
        }

        let insn = Instruction::decode(opcode, &mut buf).map_err(|e| ParseError::UnknownOpcode {
            method,
            offset,
            opcode: e.0,
        })?;
        code.push(insn);
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::module::builder::ModuleBuilder;
    use crate::module::format::{opcode, ACC_STATIC, MINOR_VERSION};
    use bytes::{BufMut, BytesMut};

    fn header(out: &mut BytesMut) {
        out.put_u32(MAGIC);
        out.put_u16(MAJOR_VERSION);
        out.put_u16(MINOR_VERSION);
    }

    fn utf8(out: &mut BytesMut, text: &[u8]) {
        out.put_u8(tag::UTF8);
        out.put_u16(text.len() as u16);
        out.put_slice(text);
    }

    /// One static `main()V` whose code section is `code`
    fn module_with_code(code: &[u8]) -> BytesMut {
        let mut out = BytesMut::new();
        header(&mut out);
        out.put_u16(3);
        utf8(&mut out, b"app.Main");
        utf8(&mut out, b"main");
        utf8(&mut out, b"()V");
        out.put_u16(0);

        out.put_u16(1);
        out.put_u16(ACC_STATIC);
        out.put_u16(1);
        out.put_u16(2);
        out.put_u16(0);
        out.put_u32(code.len() as u32);
        out.put_slice(code);
        out.put_u16(0);
        out
    }

    #[test]
    fn test_minimal_module() {
        let image = parse(&module_with_code(&[opcode::RETURN])).unwrap();
        assert_eq!(image.name(), Some("app.Main"));
        assert_eq!(image.methods.len(), 1);
        assert_eq!(image.methods[0].code, vec![Instruction::Return]);
        assert!(image.methods[0].is_static());
    }

    #[test]
    fn test_assembled_module_parses_back() {
        let mut builder = ModuleBuilder::new("app.Main");
        builder
            .method("main", "()V", ACC_STATIC)
            .const_int(-5)
            .const_str("hi")
            .pop()
            .pop()
            .ret()
            .finish();
        let image = builder.build().unwrap();
        let parsed = parse(&image.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, image);
    }

    #[test]
    fn test_bad_magic() {
        assert_eq!(parse(b"XXXX\0\x01\0\0"), Err(ParseError::BadMagic(0x5858_5858)));
    }

    #[test]
    fn test_unsupported_version() {
        let mut out = BytesMut::new();
        out.put_u32(MAGIC);
        out.put_u16(MAJOR_VERSION + 1);
        out.put_u16(3);
        assert_eq!(
            parse(&out),
            Err(ParseError::UnsupportedVersion {
                major: MAJOR_VERSION + 1,
                minor: 3
            })
        );
    }

    #[test]
    fn test_truncated_header() {
        let mut out = BytesMut::new();
        out.put_u32(MAGIC);
        assert_eq!(parse(&out), Err(ParseError::Truncated { offset: 4, needed: 2 }));
    }

    #[test]
    fn test_truncated_string() {
        let mut out = BytesMut::new();
        header(&mut out);
        out.put_u16(1);
        out.put_u8(tag::UTF8);
        out.put_u16(10);
        out.put_slice(b"abc");
        assert_eq!(parse(&out), Err(ParseError::Truncated { offset: 13, needed: 7 }));
    }

    #[test]
    fn test_unknown_tag() {
        let mut out = BytesMut::new();
        header(&mut out);
        out.put_u16(2);
        utf8(&mut out, b"app.Main");
        out.put_u8(9);
        assert_eq!(parse(&out), Err(ParseError::UnknownTag { index: 1, tag: 9 }));
    }

    #[test]
    fn test_invalid_utf8() {
        let mut out = BytesMut::new();
        header(&mut out);
        out.put_u16(1);
        utf8(&mut out, &[0xff, 0xfe]);
        assert_eq!(parse(&out), Err(ParseError::InvalidUtf8 { index: 0 }));
    }

    #[test]
    fn test_unknown_opcode() {
        let err = parse(&module_with_code(&[opcode::NOP, 0xEE])).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownOpcode {
                method: 0,
                offset: 1,
                opcode: 0xEE
            }
        );
    }

    #[test]
    fn test_truncated_instruction() {
        // CONST needs a two-byte operand; the code section ends after one
        let err = parse(&module_with_code(&[opcode::RETURN, opcode::CONST, 0x00])).unwrap_err();
        assert_eq!(err, ParseError::TruncatedInstruction { method: 0, offset: 1 });
    }

    #[test]
    fn test_trailing_bytes() {
        let mut out = module_with_code(&[opcode::RETURN]);
        out.put_slice(&[0, 0, 0]);
        assert_eq!(parse(&out), Err(ParseError::TrailingBytes(3)));
    }
}
