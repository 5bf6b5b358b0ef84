// packages/engine/src/module/constant_pool.rs
//! Module constant pool
//!
//! Entries are addressed by 0-based `u16` indexes. Interning appends new
//! entries and never reorders existing ones, so operands already in the code
//! stay valid across a rewrite.

use crate::module::format::MAX_POOL_ENTRIES;
use thiserror::Error;

/// The pool cannot grow past `u16` indexes
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("constant pool is full ({0} entries)")]
pub struct PoolOverflow(pub usize);

/// Owner/name/descriptor triple shared by method and field references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemberRef {
    pub owner: u16,
    pub name: u16,
    pub descriptor: u16,
}

/// Constant pool entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    Utf8(String),
    Int(i64),
    /// String literal backed by a `Utf8` entry
    Str(u16),
    Method(MemberRef),
    Field(MemberRef),
}

impl Constant {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Constant::Utf8(_) => "Utf8",
            Constant::Int(_) => "Int",
            Constant::Str(_) => "Str",
            Constant::Method(_) => "Method",
            Constant::Field(_) => "Field",
        }
    }
}

/// A member reference with its strings looked up
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedMember<'a> {
    pub owner: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConstantPool {
    entries: Vec<Constant>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries(entries: Vec<Constant>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[Constant] {
        &self.entries
    }

    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.entries.get(index as usize)
    }

    pub fn utf8(&self, index: u16) -> Option<&str> {
        match self.get(index) {
            Some(Constant::Utf8(value)) => Some(value),
            _ => None,
        }
    }

    /// String literal text for a `Str` entry
    pub fn string(&self, index: u16) -> Option<&str> {
        match self.get(index) {
            Some(Constant::Str(utf8)) => self.utf8(*utf8),
            _ => None,
        }
    }

    pub fn method(&self, index: u16) -> Option<ResolvedMember<'_>> {
        match self.get(index) {
            Some(Constant::Method(member)) => self.resolve(member),
            _ => None,
        }
    }

    pub fn field(&self, index: u16) -> Option<ResolvedMember<'_>> {
        match self.get(index) {
            Some(Constant::Field(member)) => self.resolve(member),
            _ => None,
        }
    }

    fn resolve(&self, member: &MemberRef) -> Option<ResolvedMember<'_>> {
        Some(ResolvedMember {
            owner: self.utf8(member.owner)?,
            name: self.utf8(member.name)?,
            descriptor: self.utf8(member.descriptor)?,
        })
    }

    fn push(&mut self, constant: Constant) -> Result<u16, PoolOverflow> {
        if self.entries.len() >= MAX_POOL_ENTRIES {
            return Err(PoolOverflow(self.entries.len()));
        }
        self.entries.push(constant);
        Ok((self.entries.len() - 1) as u16)
    }

    fn find(&self, constant: &Constant) -> Option<u16> {
        self.entries
            .iter()
            .position(|entry| entry == constant)
            .map(|index| index as u16)
    }

    fn intern(&mut self, constant: Constant) -> Result<u16, PoolOverflow> {
        match self.find(&constant) {
            Some(index) => Ok(index),
            None => self.push(constant),
        }
    }

    pub fn intern_utf8(&mut self, value: &str) -> Result<u16, PoolOverflow> {
        let existing = self
            .entries
            .iter()
            .position(|entry| matches!(entry, Constant::Utf8(s) if s == value));
        match existing {
            Some(index) => Ok(index as u16),
            None => self.push(Constant::Utf8(value.to_string())),
        }
    }

    pub fn intern_int(&mut self, value: i64) -> Result<u16, PoolOverflow> {
        self.intern(Constant::Int(value))
    }

    pub fn intern_str(&mut self, value: &str) -> Result<u16, PoolOverflow> {
        let utf8 = self.intern_utf8(value)?;
        self.intern(Constant::Str(utf8))
    }

    pub fn intern_method(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, PoolOverflow> {
        let member = self.intern_member(owner, name, descriptor)?;
        self.intern(Constant::Method(member))
    }

    pub fn intern_field(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, PoolOverflow> {
        let member = self.intern_member(owner, name, descriptor)?;
        self.intern(Constant::Field(member))
    }

    fn intern_member(
        &mut self,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<MemberRef, PoolOverflow> {
        Ok(MemberRef {
            owner: self.intern_utf8(owner)?,
            name: self.intern_utf8(name)?,
            descriptor: self.intern_utf8(descriptor)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_reuses_entries() {
        let mut pool = ConstantPool::new();
        let a = pool.intern_method("core.System", "exit", "(I)V").unwrap();
        let b = pool.intern_method("core.System", "exit", "(I)V").unwrap();
        assert_eq!(a, b);
        // owner, name, descriptor, method
        assert_eq!(pool.len(), 4);

        let field = pool.intern_field("core.System", "out", "Lcore.PrintStream;").unwrap();
        assert_ne!(field, a);
        assert_eq!(pool.field(field).unwrap().name, "out");
    }

    #[test]
    fn test_resolve_method() {
        let mut pool = ConstantPool::new();
        let index = pool.intern_method("core.Boolean", "getBoolean", "(T)Z").unwrap();
        let member = pool.method(index).unwrap();
        assert_eq!(member.owner, "core.Boolean");
        assert_eq!(member.descriptor, "(T)Z");
        assert!(pool.field(index).is_none());
    }

    #[test]
    fn test_pool_stops_at_u16_count() {
        let filler = (0..MAX_POOL_ENTRIES as i64 - 1).map(Constant::Int).collect();
        let mut pool = ConstantPool::from_entries(filler);

        let last = pool.intern_int(-1).unwrap();
        assert_eq!(last as usize, MAX_POOL_ENTRIES - 1);
        assert_eq!(pool.len(), MAX_POOL_ENTRIES);

        assert_eq!(pool.intern_int(-2), Err(PoolOverflow(MAX_POOL_ENTRIES)));
        // Existing entries still intern without growing
        assert_eq!(pool.intern_int(-1), Ok(last));
    }

    #[test]
    fn test_string_literal() {
        let mut pool = ConstantPool::new();
        let index = pool.intern_str("hello").unwrap();
        assert_eq!(pool.string(index), Some("hello"));
        assert_eq!(pool.utf8(index), None);
    }
}
