//! External collaborators of the pipeline
//!
//! The pipeline only talks to these traits. The process-backed
//! implementations below shell out to apktool, jarsigner and a pair of
//! bytecode <-> IR converters; tests substitute in-process fakes.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Instant;
use tracing::{debug, info};

use crate::config::ToolsSection;
use crate::error::{InstrumentError, Result};
use crate::ir::CodeUnit;
use crate::pipeline::Stage;
use crate::registry::CodeRegistry;

/// Unpacks an archive into editable content and packs it back
pub trait ContentTool {
    fn extract(&self, archive: &Path, content_dir: &Path) -> Result<()>;
    fn build(&self, content_dir: &Path, out_archive: &Path) -> Result<()>;
}

/// Signs an archive, returning the path of the signed copy
pub trait CodeSigner {
    fn sign(&self, archive: &Path) -> Result<PathBuf>;
}

/// Loads code units out of an archive and writes rewritten units back
pub trait CodeBackend {
    /// Load the archive's units (and any runtime support units) into `registry`
    fn load(&self, archive: &Path, work_dir: &Path, registry: &mut CodeRegistry) -> Result<()>;

    /// Produce a new archive from `original` with every registry unit replaced
    fn write(&self, registry: &CodeRegistry, original: &Path, work_dir: &Path) -> Result<PathBuf>;
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// Run `program args...`, turning a spawn failure or non-zero exit into
/// [`InstrumentError::ExternalToolFailure`]
pub(crate) fn run_tool(stage: Stage, artifact: &Path, program: &str, args: &[String]) -> Result<()> {
    let started = Instant::now();
    debug!(%stage, program, argc = args.len(), "running external tool");

    let failure = |detail: String| InstrumentError::ExternalToolFailure {
        stage,
        artifact: display_name(artifact),
        tool: program.to_string(),
        detail,
    };

    let output = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .map_err(|e| failure(format!("failed to execute: {}", e)))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(failure(format!("exited with {}: {}", output.status, stderr.trim())));
    }

    info!(
        %stage,
        program,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "external tool finished"
    );
    Ok(())
}

/// Fail with [`InstrumentError::MissingArtifact`] unless `path` exists
pub(crate) fn require_output(stage: Stage, path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(InstrumentError::MissingArtifact {
            stage,
            path: path.to_path_buf(),
        })
    }
}

/// apktool driven through `java -jar`
#[derive(Debug, Clone)]
pub struct ApkTool {
    java: String,
    jar: PathBuf,
}

impl ApkTool {
    pub fn new(java: impl Into<String>, jar: impl Into<PathBuf>) -> Self {
        Self {
            java: java.into(),
            jar: jar.into(),
        }
    }

    fn jar_args(&self) -> Vec<String> {
        vec!["-jar".to_string(), self.jar.display().to_string()]
    }
}

impl ContentTool for ApkTool {
    fn extract(&self, archive: &Path, content_dir: &Path) -> Result<()> {
        // Sources and resources stay packed; only the descriptor is edited
        let mut args = self.jar_args();
        args.extend([
            "-s".to_string(),
            "-f".to_string(),
            "-r".to_string(),
            "d".to_string(),
            "-o".to_string(),
            content_dir.display().to_string(),
            archive.display().to_string(),
        ]);
        run_tool(Stage::Extracting, archive, &self.java, &args)?;
        require_output(Stage::Extracting, content_dir)
    }

    fn build(&self, content_dir: &Path, out_archive: &Path) -> Result<()> {
        let mut args = self.jar_args();
        args.extend([
            "b".to_string(),
            content_dir.display().to_string(),
            "-o".to_string(),
            out_archive.display().to_string(),
        ]);
        run_tool(Stage::Rebuilding, out_archive, &self.java, &args)?;
        require_output(Stage::Rebuilding, out_archive)
    }
}

/// Debug-key signing with jarsigner
#[derive(Debug, Clone)]
pub struct JarSigner {
    program: String,
    keystore: PathBuf,
    alias: String,
    password: String,
}

impl JarSigner {
    pub fn new(
        program: impl Into<String>,
        keystore: impl Into<PathBuf>,
        alias: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            program: program.into(),
            keystore: keystore.into(),
            alias: alias.into(),
            password: password.into(),
        }
    }

    /// Signer for `[tools]`, falling back to `~/.android/debug.keystore`
    pub fn from_tools(tools: &ToolsSection) -> Result<Self> {
        let keystore = match &tools.keystore {
            Some(path) => path.clone(),
            None => std::env::var_os("HOME")
                .map(|home| PathBuf::from(home).join(".android").join("debug.keystore"))
                .ok_or_else(|| {
                    InstrumentError::Config(
                        "no keystore configured and HOME is not set".to_string(),
                    )
                })?,
        };
        Ok(Self::new(
            tools.jarsigner.clone(),
            keystore,
            tools.keystore_alias.clone(),
            tools.keystore_password.clone(),
        ))
    }

    /// `app.apk` -> `app-signed.apk`, next to the input
    pub fn signed_path(archive: &Path) -> PathBuf {
        let stem = archive
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let name = match archive.extension() {
            Some(ext) => format!("{}-signed.{}", stem, ext.to_string_lossy()),
            None => format!("{}-signed", stem),
        };
        archive.with_file_name(name)
    }
}

impl CodeSigner for JarSigner {
    fn sign(&self, archive: &Path) -> Result<PathBuf> {
        let signed = Self::signed_path(archive);
        let args = vec![
            "-sigalg".to_string(),
            "SHA1withRSA".to_string(),
            "-digestalg".to_string(),
            "SHA1".to_string(),
            "-keystore".to_string(),
            self.keystore.display().to_string(),
            "-storepass".to_string(),
            self.password.clone(),
            "-signedjar".to_string(),
            signed.display().to_string(),
            archive.display().to_string(),
            self.alias.clone(),
        ];
        run_tool(Stage::Signing, archive, &self.program, &args)?;
        require_output(Stage::Signing, &signed)?;
        Ok(signed)
    }
}

/// Substitute `{input}`, `{output}` and `{original}` in an argv template
pub fn expand_template(template: &[String], input: &Path, output: &Path, original: &Path) -> Vec<String> {
    template
        .iter()
        .map(|arg| {
            arg.replace("{input}", &input.display().to_string())
                .replace("{output}", &output.display().to_string())
                .replace("{original}", &original.display().to_string())
        })
        .collect()
}

/// Read every `*.json` unit document in `dir`, in file name order
pub fn read_unit_dir(dir: &Path) -> Result<Vec<CodeUnit>> {
    let entries = fs::read_dir(dir)
        .map_err(|e| InstrumentError::io(format!("failed to list {}", dir.display()), e))?;
    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    paths
        .iter()
        .map(|path| {
            let content = fs::read_to_string(path).map_err(|e| {
                InstrumentError::io(format!("failed to read {}", path.display()), e)
            })?;
            serde_json::from_str(&content).map_err(|e| {
                InstrumentError::Config(format!("malformed unit {}: {}", path.display(), e))
            })
        })
        .collect()
}

/// Write one `<unit name>.json` document per unit into `dir`
pub fn write_unit_dir(units: &[CodeUnit], dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)
        .map_err(|e| InstrumentError::io(format!("failed to create {}", dir.display()), e))?;
    for unit in units {
        let path = dir.join(format!("{}.json", unit.name));
        let json = serde_json::to_string(unit).map_err(|e| {
            InstrumentError::Config(format!("failed to serialize {}: {}", unit.name, e))
        })?;
        fs::write(&path, json)
            .map_err(|e| InstrumentError::io(format!("failed to write {}", path.display()), e))?;
    }
    Ok(())
}

/// Backend running external disassembler/assembler commands
///
/// The disassembler turns an archive's bytecode into one JSON [`CodeUnit`]
/// document per class; the assembler compiles such documents back into a
/// copy of the original archive.
#[derive(Debug, Clone)]
pub struct CommandBackend {
    disassembler: Vec<String>,
    assembler: Vec<String>,
    support_dir: Option<PathBuf>,
}

impl CommandBackend {
    pub fn new(disassembler: Vec<String>, assembler: Vec<String>, support_dir: Option<PathBuf>) -> Self {
        Self {
            disassembler,
            assembler,
            support_dir,
        }
    }

    pub fn from_tools(tools: &ToolsSection) -> Self {
        Self::new(
            tools.disassembler.clone(),
            tools.assembler.clone(),
            tools.support_dir.clone(),
        )
    }

    fn run_expanded(stage: Stage, args: &[String], artifact: &Path) -> Result<()> {
        let (program, rest) = args.split_first().ok_or_else(|| {
            InstrumentError::Config(format!("{} command template is empty", stage))
        })?;
        run_tool(stage, artifact, program, rest)
    }
}

impl CodeBackend for CommandBackend {
    fn load(&self, archive: &Path, work_dir: &Path, registry: &mut CodeRegistry) -> Result<()> {
        let ir_dir = work_dir.join("ir");
        fs::create_dir_all(&ir_dir)
            .map_err(|e| InstrumentError::io(format!("failed to create {}", ir_dir.display()), e))?;

        let args = expand_template(&self.disassembler, archive, &ir_dir, archive);
        Self::run_expanded(Stage::Loading, &args, archive)?;

        let units = read_unit_dir(&ir_dir)?;
        if units.is_empty() {
            return Err(InstrumentError::MissingArtifact {
                stage: Stage::Loading,
                path: ir_dir,
            });
        }
        for unit in units {
            registry.add_unit(unit);
        }

        if let Some(support_dir) = &self.support_dir {
            for unit in read_unit_dir(support_dir)? {
                registry.add_support_unit(unit);
            }
        }
        debug!(units = registry.len(), "code units loaded");
        Ok(())
    }

    fn write(&self, registry: &CodeRegistry, original: &Path, work_dir: &Path) -> Result<PathBuf> {
        let ir_dir = work_dir.join("ir-instrumented");
        write_unit_dir(registry.units(), &ir_dir)?;

        let out_dir = work_dir.join("assembled");
        fs::create_dir_all(&out_dir)
            .map_err(|e| InstrumentError::io(format!("failed to create {}", out_dir.display()), e))?;
        let output = out_dir.join(display_name(original));

        let args = expand_template(&self.assembler, &ir_dir, &output, original);
        Self::run_expanded(Stage::Injecting, &args, original)?;
        require_output(Stage::Injecting, &output)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Method, MethodBody, Op, Type};
    use tempfile::TempDir;

    fn strings(args: &[&str]) -> Vec<String> {
        args.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_expand_template() {
        let args = expand_template(
            &strings(&["asm", "--in={input}", "{original}", "{output}"]),
            Path::new("/w/ir"),
            Path::new("/w/out/app.apk"),
            Path::new("/w/app.apk"),
        );
        assert_eq!(args, strings(&["asm", "--in=/w/ir", "/w/app.apk", "/w/out/app.apk"]));
    }

    #[test]
    fn test_signed_path() {
        assert_eq!(
            JarSigner::signed_path(Path::new("/w/app.apk")),
            PathBuf::from("/w/app-signed.apk")
        );
    }

    #[test]
    fn test_missing_program_is_tool_failure() {
        let err = run_tool(
            Stage::Extracting,
            Path::new("app.apk"),
            "covprobe-test-no-such-program",
            &[],
        )
        .unwrap_err();
        match err {
            InstrumentError::ExternalToolFailure { stage, artifact, .. } => {
                assert_eq!(stage, Stage::Extracting);
                assert_eq!(artifact, "app.apk");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_nonzero_exit_captures_stderr() {
        let err = run_tool(
            Stage::Signing,
            Path::new("app.apk"),
            "sh",
            &strings(&["-c", "echo keystore missing >&2; exit 3"]),
        )
        .unwrap_err();
        assert!(err.to_string().contains("keystore missing"));
        assert_eq!(err.stage(), Some(Stage::Signing));
    }

    #[test]
    fn test_require_output() {
        let dir = TempDir::new().unwrap();
        assert!(require_output(Stage::Rebuilding, dir.path()).is_ok());
        let err = require_output(Stage::Rebuilding, &dir.path().join("gone.apk")).unwrap_err();
        assert!(matches!(err, InstrumentError::MissingArtifact { .. }));
    }

    #[test]
    fn test_unit_dir_roundtrip_keeps_name_order() {
        let dir = TempDir::new().unwrap();
        let mut body = MethodBody::new();
        body.push(Op::Return { value: None });
        let units = vec![
            CodeUnit::new("b.B"),
            CodeUnit::new("a.A").with_method(Method::new("run", vec![], Type::Void).with_body(body)),
        ];
        write_unit_dir(&units, dir.path()).unwrap();

        let loaded = read_unit_dir(dir.path()).unwrap();
        let names: Vec<&str> = loaded.iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["a.A", "b.B"]);
        assert_eq!(loaded[0].statement_count(), 1);
    }

    #[test]
    fn test_unit_with_repeated_labels_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("a.A.json"),
            r#"{"name": "a.A", "methods": [{"name": "run", "ret": "void", "body": {"statements": [
                {"label": 0, "op": "plain", "text": "x = 1"},
                {"label": 0, "op": "plain", "text": "y = 2"},
                {"label": 1, "op": "return"}
            ]}}]}"#,
        )
        .unwrap();
        let err = read_unit_dir(dir.path()).unwrap_err();
        assert!(err.to_string().contains("more than one statement"));
    }

    #[test]
    fn test_malformed_unit_rejected() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("x.json"), "{not json").unwrap();
        assert!(read_unit_dir(dir.path()).is_err());
    }
}
