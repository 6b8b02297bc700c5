//! Instrumentation manifest: probe id -> guarded location
//!
//! Records are appended during injection in insertion order, frozen by
//! [`ManifestBuilder::finalize`], and written once as JSON:
//!
//! ```json
//! {
//!     "outputAPK": "app.apk",
//!     "allMethods": {
//!         "0": "$i0 = 1",
//!         "1": "return"
//!     }
//! }
//! ```
//!
//! `outputAPK` and `allMethods` are read by downstream coverage tooling and
//! must not be renamed.

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{InstrumentError, Result};
use crate::probe_id::ProbeId;

/// One inserted probe and the location it guards
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeRecord {
    pub id: ProbeId,
    pub location: String,
    pub owning_method: String,
}

/// Append-only collector used during injection
#[derive(Debug, Default)]
pub struct ManifestBuilder {
    records: Vec<ProbeRecord>,
}

impl ManifestBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: ProbeRecord) {
        self.records.push(record);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ProbeRecord] {
        &self.records
    }

    /// Freeze the manifest under the processed artifact's final file name
    pub fn finalize(self, artifact_name: impl Into<String>) -> InstrumentationManifest {
        InstrumentationManifest {
            artifact_name: artifact_name.into(),
            records: self.records,
        }
    }
}

/// Finalized, immutable manifest
#[derive(Debug, Clone)]
pub struct InstrumentationManifest {
    artifact_name: String,
    records: Vec<ProbeRecord>,
}

impl InstrumentationManifest {
    pub fn artifact_name(&self) -> &str {
        &self.artifact_name
    }

    pub fn records(&self) -> &[ProbeRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serializable view with the stable field names
    pub fn to_document(&self) -> ManifestDocument {
        ManifestDocument {
            output_apk: self.artifact_name.clone(),
            all_methods: self
                .records
                .iter()
                .map(|r| (r.id.to_string(), r.location.clone()))
                .collect(),
        }
    }

    /// Pretty JSON with four-space indentation
    pub fn to_json_string(&self) -> Result<String> {
        self.to_document().to_json_string()
    }

    /// Write `<artifact_name><suffix>` into `dir`, atomically
    ///
    /// The document is written to a temporary file in `dir` and renamed
    /// into place, so readers never observe a partial manifest.
    pub fn write_to(&self, dir: &Path, suffix: &str) -> Result<PathBuf> {
        let path = dir.join(format!("{}{}", self.artifact_name, suffix));
        let json = self.to_json_string()?;
        let write_err = |source| InstrumentError::ManifestWrite {
            path: path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
        tmp.write_all(json.as_bytes()).map_err(write_err)?;
        tmp.flush().map_err(write_err)?;
        tmp.persist(&path).map_err(|e| write_err(e.error))?;

        debug!(path = %path.display(), probes = self.records.len(), "manifest written");
        Ok(path)
    }
}

/// On-disk manifest document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestDocument {
    #[serde(rename = "outputAPK")]
    pub output_apk: String,
    /// Probe id -> location, in insertion order
    #[serde(
        rename = "allMethods",
        serialize_with = "serialize_ordered",
        deserialize_with = "deserialize_ordered"
    )]
    pub all_methods: Vec<(String, String)>,
}

impl ManifestDocument {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| InstrumentError::io(format!("failed to read {}", path.display()), e))?;
        Self::from_json_str(&content)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        serde_json::from_str(content)
            .map_err(|e| InstrumentError::Config(format!("invalid manifest JSON: {}", e)))
    }

    pub fn to_json_string(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)
            .map_err(|e| InstrumentError::Config(format!("manifest serialization: {}", e)))?;
        String::from_utf8(buf)
            .map_err(|e| InstrumentError::Config(format!("manifest serialization: {}", e)))
    }

    pub fn location(&self, id: &str) -> Option<&str> {
        self.all_methods
            .iter()
            .find(|(key, _)| key == id)
            .map(|(_, location)| location.as_str())
    }
}

fn serialize_ordered<S: Serializer>(
    entries: &[(String, String)],
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    let mut map = serializer.serialize_map(Some(entries.len()))?;
    for (key, value) in entries {
        map.serialize_entry(key, value)?;
    }
    map.end()
}

fn deserialize_ordered<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<(String, String)>, D::Error> {
    struct OrderedVisitor;

    impl<'de> Visitor<'de> for OrderedVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a map of probe ids to locations")
        }

        fn visit_map<A: MapAccess<'de>>(
            self,
            mut access: A,
        ) -> std::result::Result<Self::Value, A::Error> {
            let mut entries = Vec::with_capacity(access.size_hint().unwrap_or(0));
            while let Some((key, value)) = access.next_entry::<String, String>()? {
                entries.push((key, value));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor)
}
