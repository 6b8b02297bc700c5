//! Capability (permission) editing of the app descriptor
//!
//! Reads `<uses-permission android:name="...">` entries and the declared
//! `package` from an extracted `AndroidManifest.xml`, and appends missing
//! entries just before the closing `</manifest>` tag. Existing content is
//! left byte-for-byte untouched. Anything inside `<!-- -->` is ignored.

use regex::Regex;
use std::borrow::Cow;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::info;

use crate::error::{InstrumentError, Result};

/// Network access the tracing channel needs on the device
pub const INTERNET_PERMISSION: &str = "android.permission.INTERNET";

/// File name of the descriptor inside extracted content
pub const DESCRIPTOR_FILE: &str = "AndroidManifest.xml";

const PERMISSION_PATTERN: &str =
    r#"<uses-permission\b[^>]*?\bandroid:name\s*=\s*["']([^"']+)["']"#;
const PACKAGE_PATTERN: &str = r#"<manifest\b[^>]*?\bpackage\s*=\s*["']([^"']+)["']"#;
const COMMENT_PATTERN: &str = r"(?s)<!--.*?-->";
const CLOSING_TAG: &str = "</manifest>";

static PERMISSION_RE: OnceLock<Regex> = OnceLock::new();
static PACKAGE_RE: OnceLock<Regex> = OnceLock::new();
static COMMENT_RE: OnceLock<Regex> = OnceLock::new();

fn compiled(cell: &'static OnceLock<Regex>, pattern: &str) -> Result<&'static Regex> {
    if let Some(re) = cell.get() {
        return Ok(re);
    }
    let re = Regex::new(pattern)
        .map_err(|e| InstrumentError::Config(format!("descriptor pattern: {}", e)))?;
    Ok(cell.get_or_init(|| re))
}

/// Descriptor text with every comment removed
fn without_comments(xml: &str) -> Result<Cow<'_, str>> {
    Ok(compiled(&COMMENT_RE, COMMENT_PATTERN)?.replace_all(xml, ""))
}

/// Byte offset of the last `</manifest>` outside a comment
fn closing_tag_offset(xml: &str) -> Result<Option<usize>> {
    let comments: Vec<(usize, usize)> = compiled(&COMMENT_RE, COMMENT_PATTERN)?
        .find_iter(xml)
        .map(|m| (m.start(), m.end()))
        .collect();
    Ok(xml
        .rmatch_indices(CLOSING_TAG)
        .map(|(offset, _)| offset)
        .find(|&offset| !comments.iter().any(|&(start, end)| start <= offset && offset < end)))
}

/// Permission names declared in descriptor text
pub fn declared_capabilities(xml: &str) -> Result<BTreeSet<String>> {
    let xml = without_comments(xml)?;
    Ok(compiled(&PERMISSION_RE, PERMISSION_PATTERN)?
        .captures_iter(&xml)
        .map(|c| c[1].to_string())
        .collect())
}

/// Value of the root `package` attribute
pub fn declared_package(xml: &str) -> Result<Option<String>> {
    let xml = without_comments(xml)?;
    Ok(compiled(&PACKAGE_RE, PACKAGE_PATTERN)?
        .captures(&xml)
        .map(|c| c[1].to_string()))
}

/// Editor over one descriptor file
#[derive(Debug)]
pub struct CapabilityEditor {
    path: PathBuf,
    content: String,
    existing: BTreeSet<String>,
    additional: BTreeSet<String>,
}

impl CapabilityEditor {
    /// Load the descriptor at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let content = fs::read_to_string(&path).map_err(|e| {
            InstrumentError::io(format!("failed to read descriptor {}", path.display()), e)
        })?;
        Self::from_content(path, content)
    }

    pub fn from_content(path: PathBuf, content: String) -> Result<Self> {
        let existing = declared_capabilities(&content)?;
        Ok(Self {
            path,
            content,
            existing,
            additional: BTreeSet::new(),
        })
    }

    pub fn has_capability(&self, name: &str) -> bool {
        self.existing.contains(name) || self.additional.contains(name)
    }

    /// Queue `name` for addition; already declared names are ignored
    pub fn add_capability(&mut self, name: &str) {
        if !self.existing.contains(name) {
            self.additional.insert(name.to_string());
        }
    }

    pub fn package_name(&self) -> Result<Option<String>> {
        declared_package(&self.content)
    }

    /// Descriptor text with queued capabilities inserted
    pub fn render(&self) -> Result<String> {
        if self.additional.is_empty() {
            return Ok(self.content.clone());
        }
        let close = closing_tag_offset(&self.content)?.ok_or_else(|| {
            InstrumentError::Config(format!(
                "descriptor {} has no closing </manifest> tag",
                self.path.display()
            ))
        })?;

        let mut out = String::with_capacity(self.content.len() + 64 * self.additional.len());
        out.push_str(&self.content[..close]);
        for name in &self.additional {
            out.push_str(&format!("    <uses-permission android:name=\"{}\" />\n", name));
        }
        out.push_str(&self.content[close..]);
        Ok(out)
    }

    /// Write queued capabilities back to the descriptor file
    ///
    /// Returns how many entries were added.
    pub fn write_out(&mut self) -> Result<usize> {
        let added = self.additional.len();
        if added == 0 {
            return Ok(0);
        }
        let rendered = self.render()?;
        fs::write(&self.path, &rendered).map_err(|e| {
            InstrumentError::io(format!("failed to write descriptor {}", self.path.display()), e)
        })?;
        info!(path = %self.path.display(), added, "descriptor capabilities updated");

        self.content = rendered;
        self.existing.append(&mut self.additional);
        Ok(added)
    }
}

/// Make sure `capability` is declared in the descriptor under `content_dir`
///
/// Returns `true` when the descriptor had to be modified.
pub fn ensure_capability(content_dir: &Path, capability: &str) -> Result<bool> {
    let mut editor = CapabilityEditor::open(content_dir.join(DESCRIPTOR_FILE))?;
    if editor.has_capability(capability) {
        return Ok(false);
    }
    editor.add_capability(capability);
    Ok(editor.write_out()? > 0)
}

/// Package declared by the descriptor under `content_dir`
pub fn descriptor_package(content_dir: &Path) -> Result<Option<String>> {
    CapabilityEditor::open(content_dir.join(DESCRIPTOR_FILE))?.package_name()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DESCRIPTOR: &str = r#"<?xml version="1.0" encoding="utf-8" standalone="no"?>
<manifest xmlns:android="http://schemas.android.com/apk/res/android" package="com.example.app">
    <uses-permission android:name="android.permission.CAMERA"/>
    <application android:label="App">
        <activity android:name=".Main"/>
    </application>
</manifest>
"#;

    #[test]
    fn test_reads_existing_permissions() {
        let caps = declared_capabilities(DESCRIPTOR).unwrap();
        assert!(caps.contains("android.permission.CAMERA"));
        assert_eq!(caps.len(), 1);
    }

    #[test]
    fn test_reads_package() {
        assert_eq!(
            declared_package(DESCRIPTOR).unwrap().as_deref(),
            Some("com.example.app")
        );
        assert_eq!(declared_package("<manifest>").unwrap(), None);
    }

    #[test]
    fn test_add_missing_capability() {
        let editor = {
            let mut e =
                CapabilityEditor::from_content(PathBuf::from("m.xml"), DESCRIPTOR.into()).unwrap();
            e.add_capability(INTERNET_PERMISSION);
            e
        };
        let rendered = editor.render().unwrap();
        assert!(rendered.contains(
            "<uses-permission android:name=\"android.permission.INTERNET\" />\n</manifest>"
        ));
        assert_eq!(declared_capabilities(&rendered).unwrap().len(), 2);
    }

    #[test]
    fn test_existing_capability_not_duplicated() {
        let mut editor =
            CapabilityEditor::from_content(PathBuf::from("m.xml"), DESCRIPTOR.into()).unwrap();
        editor.add_capability("android.permission.CAMERA");
        assert_eq!(editor.render().unwrap(), DESCRIPTOR);
    }

    #[test]
    fn test_missing_close_tag_is_error() {
        let mut editor = CapabilityEditor::from_content(
            PathBuf::from("m.xml"),
            "<manifest package=\"a.b\">".into(),
        )
        .unwrap();
        editor.add_capability(INTERNET_PERMISSION);
        assert!(editor.render().is_err());
    }

    #[test]
    fn test_ensure_capability_is_idempotent() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DESCRIPTOR_FILE), DESCRIPTOR).unwrap();

        assert!(ensure_capability(dir.path(), INTERNET_PERMISSION).unwrap());
        assert!(!ensure_capability(dir.path(), INTERNET_PERMISSION).unwrap());

        let xml = fs::read_to_string(dir.path().join(DESCRIPTOR_FILE)).unwrap();
        assert_eq!(xml.matches(INTERNET_PERMISSION).count(), 1);
    }

    #[test]
    fn test_commented_permission_is_not_declared() {
        let xml = DESCRIPTOR.replace(
            "    <application",
            "    <!-- <uses-permission android:name=\"android.permission.INTERNET\"/> -->\n    <application",
        );
        let caps = declared_capabilities(&xml).unwrap();
        assert!(!caps.contains(INTERNET_PERMISSION));
        assert!(caps.contains("android.permission.CAMERA"));

        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(DESCRIPTOR_FILE), &xml).unwrap();
        assert!(ensure_capability(dir.path(), INTERNET_PERMISSION).unwrap());

        let patched = fs::read_to_string(dir.path().join(DESCRIPTOR_FILE)).unwrap();
        assert!(declared_capabilities(&patched).unwrap().contains(INTERNET_PERMISSION));
        assert!(patched.starts_with(&xml[..xml.len() - "</manifest>\n".len()]));
    }

    #[test]
    fn test_commented_closing_tag_is_skipped() {
        let xml = "<manifest package=\"a.b\">\n</manifest>\n<!-- old </manifest> -->\n";
        let mut editor =
            CapabilityEditor::from_content(PathBuf::from("m.xml"), xml.to_string()).unwrap();
        editor.add_capability(INTERNET_PERMISSION);
        let rendered = editor.render().unwrap();
        assert!(rendered.contains("INTERNET\" />\n</manifest>\n<!-- old </manifest> -->"));
    }

    #[test]
    fn test_commented_package_ignored() {
        let xml = "<!-- <manifest package=\"old.pkg\"> -->\n<manifest package=\"new.pkg\"></manifest>";
        assert_eq!(declared_package(xml).unwrap().as_deref(), Some("new.pkg"));
    }

    #[test]
    fn test_single_quoted_attributes() {
        let xml = "<manifest package='x.y'><uses-permission android:name='a.B'/></manifest>";
        assert!(declared_capabilities(xml).unwrap().contains("a.B"));
        assert_eq!(declared_package(xml).unwrap().as_deref(), Some("x.y"));
    }
}
