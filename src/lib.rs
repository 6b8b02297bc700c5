//! covprobe - statement-level coverage probes for Android application packages
//!
//! Rewrites every eligible statement of an application's code so that a
//! call into a small tracing runtime runs just before it, and records which
//! probe guards which statement in a JSON manifest. The [`pipeline`] module
//! drives the whole extract, patch, rebuild, inject, sign, and place cycle;
//! [`inject::InjectionEngine`] can also be used directly on a
//! [`registry::CodeRegistry`].

pub mod artifact;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod error;
pub mod hook;
pub mod inject;
pub mod ir;
pub mod location;
pub mod manifest;
pub mod pipeline;
pub mod policy;
pub mod probe_id;
pub mod registry;
pub mod toolchain;
pub mod validate;

pub use error::{InstrumentError, Result};
