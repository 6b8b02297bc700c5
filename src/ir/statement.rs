// Statements of a method body

use serde::{Deserialize, Serialize};
use std::fmt;

use super::types::{MethodRef, Type, Value};

/// Stable handle of a statement inside one body
///
/// Labels survive insertions; positions do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(pub u32);

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "label{}", self.0)
    }
}

/// What an identity statement binds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentitySource {
    This { ty: Type },
    Parameter { index: u16, ty: Type },
    CaughtException,
}

/// Structural class of a statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// Binds `this`, a parameter or a caught exception; never preceded by a probe
    IdentityBinding,
    Ordinary,
}

/// Instruction carried by a statement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Identity {
        local: String,
        source: IdentitySource,
    },
    Invoke {
        callee: MethodRef,
        args: Vec<Value>,
    },
    /// Any other straight-line instruction, kept as its textual form
    Plain {
        text: String,
    },
    If {
        condition: String,
        target: Label,
    },
    Goto {
        target: Label,
    },
    Return {
        #[serde(default)]
        value: Option<Value>,
    },
    Throw {
        value: Value,
    },
}

impl Op {
    pub fn kind(&self) -> StatementKind {
        match self {
            Op::Identity { .. } => StatementKind::IdentityBinding,
            _ => StatementKind::Ordinary,
        }
    }

    /// Whether control may continue to the next statement
    pub fn falls_through(&self) -> bool {
        !matches!(self, Op::Goto { .. } | Op::Return { .. } | Op::Throw { .. })
    }

    pub fn branch_target(&self) -> Option<Label> {
        match self {
            Op::If { target, .. } | Op::Goto { target } => Some(*target),
            _ => None,
        }
    }

    pub(crate) fn branch_target_mut(&mut self) -> Option<&mut Label> {
        match self {
            Op::If { target, .. } | Op::Goto { target } => Some(target),
            _ => None,
        }
    }
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Identity { local, source } => match source {
                IdentitySource::This { ty } => write!(f, "{} := @this: {}", local, ty),
                IdentitySource::Parameter { index, ty } => {
                    write!(f, "{} := @parameter{}: {}", local, index, ty)
                }
                IdentitySource::CaughtException => write!(f, "{} := @caughtexception", local),
            },
            Op::Invoke { callee, args } => {
                write!(f, "staticinvoke {}(", callee)?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", arg)?;
                }
                write!(f, ")")
            }
            Op::Plain { text } => write!(f, "{}", text),
            Op::If { condition, target } => write!(f, "if {} goto {}", condition, target),
            Op::Goto { target } => write!(f, "goto {}", target),
            Op::Return { value: Some(v) } => write!(f, "return {}", v),
            Op::Return { value: None } => write!(f, "return"),
            Op::Throw { value } => write!(f, "throw {}", value),
        }
    }
}

/// One instruction of a method body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statement {
    pub label: Label,
    #[serde(flatten)]
    pub op: Op,
}

impl Statement {
    pub fn kind(&self) -> StatementKind {
        self.op.kind()
    }

    pub fn is_identity(&self) -> bool {
        self.kind() == StatementKind::IdentityBinding
    }
}

impl fmt::Display for Statement {
    /// Best-effort textual descriptor; not unique across a program
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.op.fmt(f)
    }
}
