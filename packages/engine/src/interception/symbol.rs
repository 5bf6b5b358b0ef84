// packages/engine/src/interception/symbol.rs
//! Call-target identity
//!
//! A [`Symbol`] names a callable by owner, name, signature and call kind.
//! Signatures use the module image descriptor syntax: `(` params `)` return,
//! with `I` int, `Z` bool, `T` string, `L<owner>;` object and `V` void.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Descriptor syntax errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DescriptorError {
    #[error("descriptor `{0}` must start with '('")]
    MissingOpenParen(String),

    #[error("descriptor `{0}` has no ')'")]
    MissingCloseParen(String),

    #[error("descriptor `{descriptor}` has unknown type code '{code}'")]
    UnknownType { descriptor: String, code: char },

    #[error("descriptor `{0}` has an unterminated object type")]
    UnterminatedObject(String),

    #[error("descriptor `{0}` uses void as a parameter")]
    VoidParameter(String),

    #[error("descriptor `{0}` has trailing characters")]
    Trailing(String),
}

/// A value type that can appear as a parameter or return type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueType {
    Int,
    Bool,
    Str,
    /// Reference to an instance of a module or host type
    Object(String),
}

impl ValueType {
    pub fn object(owner: impl Into<String>) -> Self {
        ValueType::Object(owner.into())
    }

    /// Parse a single field type such as `Lcore.PrintStream;`
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let (ty, tail) = parse_type(descriptor, descriptor)?;
        if !tail.is_empty() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }
        ty.ok_or_else(|| DescriptorError::VoidParameter(descriptor.to_string()))
    }

    pub fn descriptor(&self) -> String {
        let mut out = String::new();
        self.write_descriptor(&mut out);
        out
    }

    fn write_descriptor(&self, out: &mut String) {
        match self {
            ValueType::Int => out.push('I'),
            ValueType::Bool => out.push('Z'),
            ValueType::Str => out.push('T'),
            ValueType::Object(owner) => {
                out.push('L');
                out.push_str(owner);
                out.push(';');
            }
        }
    }
}

/// Parameter list plus return type (`None` is void)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Signature {
    pub params: Vec<ValueType>,
    pub ret: Option<ValueType>,
}

impl Signature {
    pub fn new(params: Vec<ValueType>, ret: Option<ValueType>) -> Self {
        Self { params, ret }
    }

    /// `()V`
    pub fn void() -> Self {
        Self::new(Vec::new(), None)
    }

    /// Parse a descriptor such as `(Lcore.PrintStream;T)V`
    pub fn parse(descriptor: &str) -> Result<Self, DescriptorError> {
        let rest = descriptor
            .strip_prefix('(')
            .ok_or_else(|| DescriptorError::MissingOpenParen(descriptor.to_string()))?;
        let close = rest
            .find(')')
            .ok_or_else(|| DescriptorError::MissingCloseParen(descriptor.to_string()))?;

        let mut params = Vec::new();
        let mut cursor = &rest[..close];
        while !cursor.is_empty() {
            let (ty, tail) = parse_type(descriptor, cursor)?;
            params.push(ty.ok_or_else(|| DescriptorError::VoidParameter(descriptor.to_string()))?);
            cursor = tail;
        }

        let (ret, tail) = parse_type(descriptor, &rest[close + 1..])?;
        if !tail.is_empty() {
            return Err(DescriptorError::Trailing(descriptor.to_string()));
        }

        Ok(Self { params, ret })
    }

    /// Signature with `receiver` prepended as the first parameter.
    ///
    /// This is the calling-convention change an instance call goes through
    /// when it is redirected to a static one.
    pub fn with_receiver(&self, receiver: &str) -> Self {
        let mut params = Vec::with_capacity(self.params.len() + 1);
        params.push(ValueType::object(receiver));
        params.extend(self.params.iter().cloned());
        Self {
            params,
            ret: self.ret.clone(),
        }
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_void(&self) -> bool {
        self.ret.is_none()
    }

    pub fn descriptor(&self) -> String {
        let mut out = String::from("(");
        for param in &self.params {
            param.write_descriptor(&mut out);
        }
        out.push(')');
        match &self.ret {
            Some(ty) => ty.write_descriptor(&mut out),
            None => out.push('V'),
        }
        out
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// Parse one type at the head of `input`; `Ok((None, _))` is void.
fn parse_type<'a>(
    descriptor: &str,
    input: &'a str,
) -> Result<(Option<ValueType>, &'a str), DescriptorError> {
    let mut chars = input.chars();
    let code = chars.next().ok_or_else(|| DescriptorError::Trailing(descriptor.to_string()))?;
    let tail = chars.as_str();

    let ty = match code {
        'I' => Some(ValueType::Int),
        'Z' => Some(ValueType::Bool),
        'T' => Some(ValueType::Str),
        'V' => None,
        'L' => {
            let end = tail
                .find(';')
                .ok_or_else(|| DescriptorError::UnterminatedObject(descriptor.to_string()))?;
            if end == 0 {
                return Err(DescriptorError::UnterminatedObject(descriptor.to_string()));
            }
            return Ok((Some(ValueType::object(&tail[..end])), &tail[end + 1..]));
        }
        other => {
            return Err(DescriptorError::UnknownType {
                descriptor: descriptor.to_string(),
                code: other,
            })
        }
    };

    Ok((ty, tail))
}

/// How a call site dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallKind {
    Static,
    /// Receiver is consumed implicitly from the operand stack
    Instance,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallKind::Static => f.write_str("static"),
            CallKind::Instance => f.write_str("instance"),
        }
    }
}

/// Identity of a call target. Equality covers all four fields.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Symbol {
    pub owner: String,
    pub name: String,
    pub signature: Signature,
    pub kind: CallKind,
}

impl Symbol {
    pub fn new(
        owner: impl Into<String>,
        name: impl Into<String>,
        signature: Signature,
        kind: CallKind,
    ) -> Self {
        Self {
            owner: owner.into(),
            name: name.into(),
            signature,
            kind,
        }
    }

    pub fn new_static(owner: impl Into<String>, name: impl Into<String>, signature: Signature) -> Self {
        Self::new(owner, name, signature, CallKind::Static)
    }

    pub fn new_instance(
        owner: impl Into<String>,
        name: impl Into<String>,
        signature: Signature,
    ) -> Self {
        Self::new(owner, name, signature, CallKind::Instance)
    }

    /// Build from raw call-site components
    pub fn from_descriptor(
        owner: &str,
        name: &str,
        descriptor: &str,
        kind: CallKind,
    ) -> Result<Self, DescriptorError> {
        Ok(Self::new(owner, name, Signature::parse(descriptor)?, kind))
    }

    pub fn is_static(&self) -> bool {
        self.kind == CallKind::Static
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}{} [{}]", self.owner, self.name, self.signature, self.kind)
    }
}
