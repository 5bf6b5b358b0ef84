// packages/engine/src/module/format.rs
//! Wire constants for the module image format

/// "RMOD"
pub const MAGIC: u32 = 0x524D_4F44;

pub const MAJOR_VERSION: u16 = 1;
pub const MINOR_VERSION: u16 = 0;

/// The pool count is written as a `u16`
pub const MAX_POOL_ENTRIES: usize = u16::MAX as usize;

/// File extension for module resources inside an artifact
pub const MODULE_EXTENSION: &str = "rmod";

/// Method flag: no receiver
pub const ACC_STATIC: u16 = 0x0001;

pub mod tag {
    pub const UTF8: u8 = 1;
    pub const INT: u8 = 2;
    pub const STR: u8 = 3;
    pub const METHOD: u8 = 4;
    pub const FIELD: u8 = 5;
}

pub mod opcode {
    pub const NOP: u8 = 0x00;
    pub const CONST: u8 = 0x01;
    pub const TRUE: u8 = 0x02;
    pub const FALSE: u8 = 0x03;
    pub const LOAD: u8 = 0x04;
    pub const STORE: u8 = 0x05;
    pub const POP: u8 = 0x06;
    pub const DUP: u8 = 0x07;
    pub const ADD: u8 = 0x08;
    pub const SUB: u8 = 0x09;
    pub const EQ: u8 = 0x0A;
    pub const NOT: u8 = 0x0B;
    pub const CONCAT: u8 = 0x0C;
    pub const GET_STATIC: u8 = 0x10;
    pub const NEW: u8 = 0x11;
    pub const JUMP: u8 = 0x20;
    pub const JUMP_IF_FALSE: u8 = 0x21;
    pub const INVOKE_STATIC: u8 = 0x30;
    pub const INVOKE_INSTANCE: u8 = 0x31;
    pub const RETURN: u8 = 0x40;
    pub const RETURN_VALUE: u8 = 0x41;
    pub const THROW: u8 = 0x50;
}

/// Resource path for a dotted module name: `com.acme.Main` -> `com/acme/Main.rmod`
pub fn resource_path(module_name: &str) -> String {
    format!("{}.{}", module_name.replace('.', "/"), MODULE_EXTENSION)
}
