//! Structural validation of rewritten method bodies
//!
//! Run on every body the injection engine touched. A body that fails any
//! rule aborts the run; structurally invalid code is never written out.

use std::collections::HashMap;
use thiserror::Error;

use crate::ir::{IdentitySource, Label, MethodBody, Op};

/// First structural rule a body violates
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("body has no statements")]
    EmptyBody,

    #[error("{label} disappeared while the body was being rewritten")]
    MissingStatement { label: Label },

    #[error("no statement label left to allocate")]
    LabelsExhausted,

    #[error("identity statement `{statement}` at position {position} follows a non-identity statement")]
    IdentityNotLeading { position: usize, statement: String },

    #[error("statement at position {position} branches to unknown {target}")]
    DanglingBranch { position: usize, target: Label },

    #[error("trap for {exception} refers to unknown {label}")]
    DanglingTrap { exception: String, label: Label },

    #[error("trap for {exception} has an empty or inverted range")]
    InvertedTrap { exception: String },

    #[error("trap handler for {exception} does not start with @caughtexception")]
    HandlerWithoutCatch { exception: String },

    #[error("call to {callee} at position {position}: expected {expected} arguments, found {found}")]
    ArgumentCount {
        position: usize,
        callee: String,
        expected: usize,
        found: usize,
    },

    #[error("call to {callee} at position {position}: argument {index} `{value}` does not fit {expected}")]
    ArgumentType {
        position: usize,
        callee: String,
        index: usize,
        value: String,
        expected: String,
    },

    #[error("control falls off the end of the body after `{last}`")]
    FallsOffEnd { last: String },
}

/// Check `body` against every structural rule, reporting the first violation
pub fn validate_body(body: &MethodBody) -> Result<(), ValidationError> {
    let statements = body.statements();
    if statements.is_empty() {
        return Err(ValidationError::EmptyBody);
    }

    let positions: HashMap<Label, usize> = statements
        .iter()
        .enumerate()
        .map(|(i, s)| (s.label, i))
        .collect();

    // @this/@parameter bindings must form the leading block
    let mut seen_ordinary = false;
    for (position, stmt) in statements.iter().enumerate() {
        match &stmt.op {
            Op::Identity {
                source: IdentitySource::CaughtException,
                ..
            } => {}
            Op::Identity { .. } if seen_ordinary => {
                return Err(ValidationError::IdentityNotLeading {
                    position,
                    statement: stmt.to_string(),
                });
            }
            Op::Identity { .. } => {}
            _ => seen_ordinary = true,
        }
    }

    for (position, stmt) in statements.iter().enumerate() {
        if let Some(target) = stmt.op.branch_target() {
            if !positions.contains_key(&target) {
                return Err(ValidationError::DanglingBranch { position, target });
            }
        }
        if let Op::Invoke { callee, args } = &stmt.op {
            if callee.params.len() != args.len() {
                return Err(ValidationError::ArgumentCount {
                    position,
                    callee: callee.to_string(),
                    expected: callee.params.len(),
                    found: args.len(),
                });
            }
            for (index, (arg, expected)) in args.iter().zip(&callee.params).enumerate() {
                if !arg.fits(expected) {
                    return Err(ValidationError::ArgumentType {
                        position,
                        callee: callee.to_string(),
                        index,
                        value: arg.to_string(),
                        expected: expected.to_string(),
                    });
                }
            }
        }
    }

    for trap in body.traps() {
        let lookup = |label: Label| {
            positions
                .get(&label)
                .copied()
                .ok_or_else(|| ValidationError::DanglingTrap {
                    exception: trap.exception.clone(),
                    label,
                })
        };
        let begin = lookup(trap.begin)?;
        let end = lookup(trap.end)?;
        let handler = lookup(trap.handler)?;
        if begin >= end {
            return Err(ValidationError::InvertedTrap {
                exception: trap.exception.clone(),
            });
        }
        if !matches!(
            statements[handler].op,
            Op::Identity {
                source: IdentitySource::CaughtException,
                ..
            }
        ) {
            return Err(ValidationError::HandlerWithoutCatch {
                exception: trap.exception.clone(),
            });
        }
    }

    if let Some(last) = statements.last() {
        if last.op.falls_through() {
            return Err(ValidationError::FallsOffEnd {
                last: last.to_string(),
            });
        }
    }

    Ok(())
}
