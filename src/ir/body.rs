// Method bodies: ordered statements plus exception traps

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use super::statement::{Label, Op, Statement};

/// Label values a body can hold; `u32::MAX` is never allocated
const LABEL_LIMIT: u32 = u32::MAX;

/// Why a deserialized body was rejected
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LabelError {
    #[error("{0} is used by more than one statement")]
    Duplicate(Label),

    #[error("{0} is outside the label range")]
    OutOfRange(Label),
}

/// Exception handler range `[begin, end)` routed to `handler`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trap {
    pub exception: String,
    pub begin: Label,
    pub end: Label,
    pub handler: Label,
}

/// Ordered statement sequence of one method
///
/// Every statement carries a distinct label below `u32::MAX`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MethodBody {
    statements: Vec<Statement>,
    traps: Vec<Trap>,
    #[serde(skip)]
    next_label: u32,
}

#[derive(Deserialize)]
struct RawMethodBody {
    statements: Vec<Statement>,
    #[serde(default)]
    traps: Vec<Trap>,
}

impl TryFrom<RawMethodBody> for MethodBody {
    type Error = LabelError;

    fn try_from(raw: RawMethodBody) -> Result<Self, Self::Error> {
        let mut seen = HashSet::with_capacity(raw.statements.len());
        for stmt in &raw.statements {
            if stmt.label.0 >= LABEL_LIMIT {
                return Err(LabelError::OutOfRange(stmt.label));
            }
            if !seen.insert(stmt.label) {
                return Err(LabelError::Duplicate(stmt.label));
            }
        }
        Ok(Self {
            statements: raw.statements,
            traps: raw.traps,
            next_label: 0,
        })
    }
}

impl<'de> Deserialize<'de> for MethodBody {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawMethodBody::deserialize(deserializer)?;
        MethodBody::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl MethodBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a statement and return its label
    ///
    /// # Panics
    ///
    /// If the body already holds `u32::MAX` labels.
    pub fn push(&mut self, op: Op) -> Label {
        let Some(label) = self.fresh_label() else {
            panic!("label space of method body exhausted");
        };
        self.statements.push(Statement { label, op });
        label
    }

    pub fn add_trap(&mut self, exception: impl Into<String>, begin: Label, end: Label, handler: Label) {
        self.traps.push(Trap {
            exception: exception.into(),
            begin,
            end,
            handler,
        });
    }

    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    pub fn traps(&self) -> &[Trap] {
        &self.traps
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }

    /// Owned copy of the current label order
    pub fn labels(&self) -> Vec<Label> {
        self.statements.iter().map(|s| s.label).collect()
    }

    pub fn position(&self, label: Label) -> Option<usize> {
        self.statements.iter().position(|s| s.label == label)
    }

    pub fn get(&self, label: Label) -> Option<&Statement> {
        self.statements.iter().find(|s| s.label == label)
    }

    /// Insert `op` immediately before the statement labelled `point`
    ///
    /// Every branch and trap boundary that referred to `point` is moved onto
    /// the new statement, so jumps and exception ranges that reached `point`
    /// now reach the inserted statement first. Returns `None` when `point`
    /// is not in this body or no label is left to allocate.
    pub fn insert_before(&mut self, op: Op, point: Label) -> Option<Label> {
        let index = self.position(point)?;
        let label = self.fresh_label()?;
        self.statements.insert(index, Statement { label, op });
        self.redirect(point, label);
        Some(label)
    }

    fn redirect(&mut self, from: Label, to: Label) {
        for stmt in &mut self.statements {
            if stmt.label == to {
                continue;
            }
            if let Some(target) = stmt.op.branch_target_mut() {
                if *target == from {
                    *target = to;
                }
            }
        }
        for trap in &mut self.traps {
            for boundary in [&mut trap.begin, &mut trap.end, &mut trap.handler] {
                if *boundary == from {
                    *boundary = to;
                }
            }
        }
    }

    fn fresh_label(&mut self) -> Option<Label> {
        // Deserialized bodies start at 0 and resume after their highest label
        if self.next_label == 0 {
            self.next_label = self
                .statements
                .iter()
                .map(|s| s.label.0.saturating_add(1))
                .max()
                .unwrap_or(0);
        }
        if self.next_label >= LABEL_LIMIT {
            return None;
        }
        let label = Label(self.next_label);
        self.next_label = self.next_label.checked_add(1)?;
        Some(label)
    }
}
