//! TOML configuration
//!
//! Example `covprobe.toml`:
//!
//! ```toml
//! [instrumentation]
//! id_strategy = "token"
//! scope_to_app = true
//! excluded_prefixes = ["android.support.", "com.google.", "kotlin."]
//!
//! [tools]
//! apktool_jar = "/opt/tools/apktool.jar"
//! keystore = "/home/dev/.android/debug.keystore"
//! ```
//!
//! Every field has a default; an empty file is a valid configuration.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{InstrumentError, Result};
use crate::hook::{default_helper_units, DEFAULT_CHANNEL, DEFAULT_HOOK_CLASS, DEFAULT_HOOK_METHOD};
use crate::location::LocationFormat;
use crate::policy::DEFAULT_EXCLUDED_PREFIXES;
use crate::probe_id::IdStrategy;

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstrumentConfig {
    pub instrumentation: InstrumentationSection,
    pub tools: ToolsSection,
}

/// `[instrumentation]`: what gets probed and how
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstrumentationSection {
    pub helper_units: Vec<String>,
    pub excluded_prefixes: Vec<String>,
    pub hook_class: String,
    pub hook_method: String,
    pub channel: String,
    pub id_strategy: IdStrategy,
    pub location_format: LocationFormat,
    pub mirror_to_log: bool,
    pub scope_to_app: bool,
    pub strict_manifest: bool,
    pub manifest_suffix: String,
}

impl Default for InstrumentationSection {
    fn default() -> Self {
        Self {
            helper_units: default_helper_units(),
            excluded_prefixes: DEFAULT_EXCLUDED_PREFIXES.iter().map(|s| s.to_string()).collect(),
            hook_class: DEFAULT_HOOK_CLASS.to_string(),
            hook_method: DEFAULT_HOOK_METHOD.to_string(),
            channel: DEFAULT_CHANNEL.to_string(),
            id_strategy: IdStrategy::default(),
            location_format: LocationFormat::default(),
            mirror_to_log: false,
            scope_to_app: false,
            strict_manifest: false,
            manifest_suffix: ".json".to_string(),
        }
    }
}

/// `[tools]`: external programs driven by the pipeline
///
/// `disassembler` and `assembler` are argv templates. `{input}`, `{output}`
/// and `{original}` are substituted before the command runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolsSection {
    pub java: String,
    pub apktool_jar: PathBuf,
    pub jarsigner: String,
    pub keystore: Option<PathBuf>,
    pub keystore_alias: String,
    pub keystore_password: String,
    pub disassembler: Vec<String>,
    pub assembler: Vec<String>,
    pub support_dir: Option<PathBuf>,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            java: "java".to_string(),
            apktool_jar: PathBuf::from("apktool.jar"),
            jarsigner: "jarsigner".to_string(),
            keystore: None,
            keystore_alias: "androiddebugkey".to_string(),
            keystore_password: "android".to_string(),
            disassembler: vec![
                "covprobe-dex2ir".to_string(),
                "{input}".to_string(),
                "{output}".to_string(),
            ],
            assembler: vec![
                "covprobe-ir2dex".to_string(),
                "{input}".to_string(),
                "{original}".to_string(),
                "{output}".to_string(),
            ],
            support_dir: None,
        }
    }
}

impl InstrumentConfig {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| InstrumentError::io(format!("failed to read {}", path.display()), e))?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from a TOML string
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| InstrumentError::Config(format!("failed to parse TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let section = &self.instrumentation;
        if section.hook_class.trim().is_empty() || section.hook_method.trim().is_empty() {
            return Err(InstrumentError::Config(
                "hook_class and hook_method must not be empty".to_string(),
            ));
        }
        if section.channel.is_empty() {
            return Err(InstrumentError::Config("channel must not be empty".to_string()));
        }
        if section.manifest_suffix.is_empty() {
            return Err(InstrumentError::Config(
                "manifest_suffix must not be empty".to_string(),
            ));
        }
        if let Some(prefix) = section.excluded_prefixes.iter().find(|p| p.is_empty()) {
            return Err(InstrumentError::Config(format!(
                "excluded prefix {:?} would exclude every unit",
                prefix
            )));
        }
        for (name, template) in [
            ("disassembler", &self.tools.disassembler),
            ("assembler", &self.tools.assembler),
        ] {
            if template.is_empty() {
                return Err(InstrumentError::Config(format!(
                    "{} command template is empty",
                    name
                )));
            }
        }
        Ok(())
    }
}
