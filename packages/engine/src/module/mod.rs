// packages/engine/src/module/mod.rs
//! Module image model and the parse / rewrite / serialize pipeline
//!
//! A module image is the binary unit the runtime defines and executes:
//!
//! - **format**: wire constants and resource naming
//! - **constant_pool**: append-only pool with interning
//! - **instruction**: fixed-width instruction set
//! - **reader** / **writer**: canonical decode and encode
//! - **verifier**: the well-formedness check run at define time
//! - **rewriter**: call-site interposition
//! - **builder**: assembler for producing images

pub mod builder;
pub mod constant_pool;
pub mod format;
pub mod instruction;
pub mod reader;
pub mod rewriter;
pub mod verifier;
pub mod writer;

use crate::interception::registry::RuleSet;
use crate::utils::errors::Result;
use bytes::Bytes;
use constant_pool::ConstantPool;
use instruction::Instruction;
use reader::ParseError;
use rewriter::{RewriteReport, Rewriter};
use writer::SerializeError;

pub use format::resource_path;

/// Exception handler range over byte offsets `[start, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Handler {
    pub start: u32,
    pub end: u32,
    pub target: u32,
}

impl Handler {
    pub fn covers(&self, offset: u32) -> bool {
        self.start <= offset && offset < self.end
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodImage {
    pub flags: u16,
    /// `Utf8` pool index
    pub name: u16,
    /// `Utf8` pool index
    pub descriptor: u16,
    pub max_locals: u16,
    pub code: Vec<Instruction>,
    pub handlers: Vec<Handler>,
}

impl MethodImage {
    pub fn is_static(&self) -> bool {
        self.flags & format::ACC_STATIC != 0
    }
}

/// Decoded module image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleImage {
    pub major: u16,
    pub minor: u16,
    pub pool: ConstantPool,
    /// `Utf8` pool index of the module name
    pub this_name: u16,
    pub methods: Vec<MethodImage>,
}

impl ModuleImage {
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, ParseError> {
        reader::parse(bytes)
    }

    pub fn to_bytes(&self) -> std::result::Result<Bytes, SerializeError> {
        writer::write(self)
    }

    pub fn name(&self) -> Option<&str> {
        self.pool.utf8(self.this_name)
    }

    pub fn method_name(&self, method: &MethodImage) -> Option<&str> {
        self.pool.utf8(method.name)
    }

    pub fn method_descriptor(&self, method: &MethodImage) -> Option<&str> {
        self.pool.utf8(method.descriptor)
    }

    /// Index of the method with this name and descriptor
    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<usize> {
        self.methods.iter().position(|method| {
            self.method_name(method) == Some(name) && self.method_descriptor(method) == Some(descriptor)
        })
    }

    /// `name descriptor` label for diagnostics
    pub fn describe_method(&self, index: usize) -> String {
        match self.methods.get(index) {
            Some(method) => format!(
                "{}{}",
                self.method_name(method).unwrap_or("?"),
                self.method_descriptor(method).unwrap_or("?")
            ),
            None => format!("#{}", index),
        }
    }
}

/// Parse `bytes`, apply `rules` and re-encode.
///
/// With an empty rule set the output equals the input.
pub fn transform(bytes: &[u8], rules: &RuleSet) -> Result<(Bytes, RewriteReport)> {
    let mut image = ModuleImage::parse(bytes)?;
    let report = Rewriter::new(rules).rewrite(&mut image)?;
    let out = image.to_bytes()?;
    Ok((out, report))
}
