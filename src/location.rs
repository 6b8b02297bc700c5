//! Location descriptors recorded in the manifest
//!
//! A descriptor is a human-readable rendering of the guarded statement. It
//! is not unique on its own; the probe id keying each manifest entry is.

use serde::{Deserialize, Serialize};

use crate::ir::Statement;

/// Renders the location a probe guards
pub trait LocationFormatter {
    fn describe(&self, statement: &Statement, method_signature: &str) -> String;
}

/// Built-in descriptor formats
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LocationFormat {
    /// Statement text only
    #[default]
    Statement,
    /// Owning method signature followed by the statement text
    Qualified,
}

impl LocationFormatter for LocationFormat {
    fn describe(&self, statement: &Statement, method_signature: &str) -> String {
        match self {
            LocationFormat::Statement => statement.to_string(),
            LocationFormat::Qualified => format!("{} {}", method_signature, statement),
        }
    }
}
