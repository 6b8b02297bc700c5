// Types, values and method references of the code IR

use serde::{Deserialize, Serialize};
use std::fmt;

/// Static type of a value or a method parameter
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Type {
    Void,
    Boolean,
    Int,
    Long,
    /// `java.lang.String`
    String,
    /// Any other reference type, by qualified class name
    Object(String),
}

impl Type {
    pub fn is_reference(&self) -> bool {
        matches!(self, Type::String | Type::Object(_))
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Boolean => write!(f, "boolean"),
            Type::Int => write!(f, "int"),
            Type::Long => write!(f, "long"),
            Type::String => write!(f, "java.lang.String"),
            Type::Object(name) => write!(f, "{}", name),
        }
    }
}

/// Operand of a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Value {
    Local(String),
    StringConst(String),
    IntConst(i32),
    Null,
}

impl Value {
    /// Type of a constant operand; locals are untyped in this IR
    pub fn constant_type(&self) -> Option<Type> {
        match self {
            Value::StringConst(_) => Some(Type::String),
            Value::IntConst(_) => Some(Type::Int),
            Value::Local(_) | Value::Null => None,
        }
    }

    /// Whether this operand may be passed where `expected` is declared
    pub fn fits(&self, expected: &Type) -> bool {
        match self {
            Value::Local(_) => true,
            Value::Null => expected.is_reference(),
            Value::StringConst(_) => matches!(expected, Type::String | Type::Object(_)),
            Value::IntConst(_) => matches!(expected, Type::Int | Type::Boolean),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Local(name) => write!(f, "{}", name),
            Value::StringConst(s) => write!(f, "{:?}", s),
            Value::IntConst(i) => write!(f, "{}", i),
            Value::Null => write!(f, "null"),
        }
    }
}

/// Reference to a method by declaring class and signature
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub class: String,
    pub name: String,
    pub params: Vec<Type>,
    pub ret: Type,
}

impl fmt::Display for MethodRef {
    /// Renders `<declaring.Class: ret name(p1,p2)>`
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}: {} {}(", self.class, self.ret, self.name)?;
        for (i, param) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", param)?;
        }
        write!(f, ")>")
    }
}
