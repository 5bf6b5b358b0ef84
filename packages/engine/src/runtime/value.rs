// packages/engine/src/runtime/value.rs
//! Runtime values

use crate::interception::symbol::ValueType;
use std::fmt;
use std::sync::Arc;

/// Heap instance of a module or host type
#[derive(Debug)]
pub struct Object {
    type_name: String,
    /// Host-assigned tag, e.g. which console stream a `core.PrintStream` is
    tag: Option<String>,
}

impl Object {
    pub fn new(type_name: impl Into<String>) -> ObjectRef {
        Arc::new(Self {
            type_name: type_name.into(),
            tag: None,
        })
    }

    pub fn tagged(type_name: impl Into<String>, tag: impl Into<String>) -> ObjectRef {
        Arc::new(Self {
            type_name: type_name.into(),
            tag: Some(tag.into()),
        })
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }
}

pub type ObjectRef = Arc<Object>;

#[derive(Debug, Clone)]
pub enum Value {
    Void,
    Int(i64),
    Bool(bool),
    Str(Arc<str>),
    Object(ObjectRef),
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            // Objects compare by identity
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Value {
    pub fn str(value: &str) -> Self {
        Value::Str(Arc::from(value))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Value::Void => "void",
            Value::Int(_) => "int",
            Value::Bool(_) => "bool",
            Value::Str(_) => "string",
            Value::Object(object) => object.type_name(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(v) => Some(v),
            _ => None,
        }
    }

    /// Whether this value can be passed where `ty` is declared
    pub fn conforms_to(&self, ty: &ValueType) -> bool {
        match (self, ty) {
            (Value::Int(_), ValueType::Int) => true,
            (Value::Bool(_), ValueType::Bool) => true,
            (Value::Str(_), ValueType::Str) => true,
            (Value::Object(object), ValueType::Object(name)) => object.type_name() == name,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => f.write_str("void"),
            Value::Int(v) => write!(f, "{}", v),
            Value::Bool(v) => write!(f, "{}", v),
            Value::Str(v) => f.write_str(v),
            Value::Object(object) => match object.tag() {
                Some(tag) => write!(f, "{}@{}", object.type_name(), tag),
                None => write!(f, "{}@{:p}", object.type_name(), Arc::as_ptr(object)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_identity() {
        let a = Value::Object(Object::new("app.Greeter"));
        let b = Value::Object(Object::new("app.Greeter"));
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_conforms_to() {
        let out = Value::Object(Object::tagged("core.PrintStream", "stdout"));
        assert!(out.conforms_to(&ValueType::object("core.PrintStream")));
        assert!(!out.conforms_to(&ValueType::Str));
        assert!(Value::str("x").conforms_to(&ValueType::Str));
        assert_eq!(out.to_string(), "core.PrintStream@stdout");
    }
}
