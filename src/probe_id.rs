//! Probe identifier allocation
//!
//! Two interchangeable strategies sit behind [`IdAllocator`]:
//! - [`CounterAllocator`]: compact, reproducible ids counting up from 0
//! - [`TokenAllocator`]: a fresh UUID v4 per probe, unique across runs
//!
//! The active strategy is a run configuration choice ([`IdStrategy`]).

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque identifier of one inserted probe, unique within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProbeId {
    Counter(u64),
    Token(Uuid),
}

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeId::Counter(n) => write!(f, "{}", n),
            ProbeId::Token(uuid) => write!(f, "{}", uuid.hyphenated()),
        }
    }
}

/// Source of probe identifiers for a single injection pass
pub trait IdAllocator {
    /// Return an id never returned before in this run
    fn next(&mut self) -> ProbeId;

    /// Forget every id handed out so far
    fn reset(&mut self);
}

/// Monotonic counter starting at 0
#[derive(Debug, Default, Clone)]
pub struct CounterAllocator {
    next: u64,
}

impl CounterAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ids handed out since creation or the last reset
    pub fn allocated(&self) -> u64 {
        self.next
    }
}

impl IdAllocator for CounterAllocator {
    fn next(&mut self) -> ProbeId {
        let id = self.next;
        self.next += 1;
        ProbeId::Counter(id)
    }

    fn reset(&mut self) {
        self.next = 0;
    }
}

/// Random UUID v4 per call
#[derive(Debug, Default, Clone, Copy)]
pub struct TokenAllocator;

impl IdAllocator for TokenAllocator {
    fn next(&mut self) -> ProbeId {
        ProbeId::Token(Uuid::new_v4())
    }

    fn reset(&mut self) {}
}

/// Allocation strategy selected by configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdStrategy {
    /// Incrementing 64-bit counter
    #[default]
    Counter,
    /// Random UUID per probe
    Token,
}

impl IdStrategy {
    /// Build a fresh allocator for this strategy
    pub fn allocator(self) -> Box<dyn IdAllocator> {
        match self {
            IdStrategy::Counter => Box::new(CounterAllocator::new()),
            IdStrategy::Token => Box::new(TokenAllocator),
        }
    }
}
