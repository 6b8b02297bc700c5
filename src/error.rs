//! Error kinds for an instrumentation run
//!
//! Every failure is terminal for the run. Variants carry the pipeline stage
//! and artifact identity so a failed run can be diagnosed from the message
//! alone.

use std::path::PathBuf;
use thiserror::Error;

use crate::pipeline::Stage;
use crate::validate::ValidationError;

/// Errors raised by the instrumentation library
#[derive(Error, Debug)]
pub enum InstrumentError {
    /// An extractor, builder, signer or backend invocation failed
    #[error("{stage} failed for {artifact}: {tool} reported: {detail}")]
    ExternalToolFailure {
        stage: Stage,
        artifact: String,
        tool: String,
        detail: String,
    },

    /// A stage completed but the file it should have produced is absent
    #[error("{stage} produced no output: expected {}", path.display())]
    MissingArtifact { stage: Stage, path: PathBuf },

    /// A rewritten method body is structurally invalid
    #[error("rewritten body of {method} is invalid: {source}")]
    BodyValidation {
        method: String,
        #[source]
        source: ValidationError,
    },

    /// The instrumentation manifest could not be written
    #[error("failed to write instrumentation manifest {}: {source}", path.display())]
    ManifestWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The tracing hook could not be resolved among the loaded units
    #[error("tracing hook {class}.{method} is not loaded")]
    HookUnavailable { class: String, method: String },

    /// Invalid configuration or arguments
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Filesystem failure outside of the manifest write
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
}

impl InstrumentError {
    /// Wrap an I/O error with a short description of what was attempted
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Stage the error is attributed to, when it has one
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::ExternalToolFailure { stage, .. } | Self::MissingArtifact { stage, .. } => {
                Some(*stage)
            }
            Self::BodyValidation { .. } | Self::HookUnavailable { .. } => Some(Stage::Injecting),
            Self::ManifestWrite { .. } => Some(Stage::Placing),
            Self::Config(_) | Self::Io { .. } => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, InstrumentError>;
