//! Pipeline orchestrator
//!
//! Drives one artifact through
//! `Extracting -> PatchingCapabilities -> Rebuilding -> Loading -> Injecting
//! -> Signing -> Placing -> Done`. Every stage is a blocking call into a
//! collaborator; the first error moves the run to `Failed` and nothing is
//! published. Intermediate files live in a per-run temporary directory that
//! is removed however the run ends.

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, error, info, warn};

use crate::artifact::Artifact;
use crate::capabilities::{descriptor_package, ensure_capability, DESCRIPTOR_FILE, INTERNET_PERMISSION};
use crate::config::InstrumentConfig;
use crate::error::{InstrumentError, Result};
use crate::hook::ProbeHook;
use crate::inject::{InjectionEngine, InjectionReport};
use crate::policy::ExclusionPolicy;
use crate::registry::CodeRegistry;
use crate::toolchain::{
    require_output, ApkTool, CodeBackend, CodeSigner, CommandBackend, ContentTool, JarSigner,
};

/// Pipeline states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Extracting,
    PatchingCapabilities,
    Rebuilding,
    Loading,
    Injecting,
    Signing,
    Placing,
    Done,
    Failed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Extracting => "Extracting",
            Stage::PatchingCapabilities => "PatchingCapabilities",
            Stage::Rebuilding => "Rebuilding",
            Stage::Loading => "Loading",
            Stage::Injecting => "Injecting",
            Stage::Signing => "Signing",
            Stage::Placing => "Placing",
            Stage::Done => "Done",
            Stage::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// What a successful run produced
#[derive(Debug, Clone)]
pub struct InstrumentationOutcome {
    /// Published `<stem>-instrumented.<ext>` archive
    pub apk_path: PathBuf,
    /// `None` when a lenient manifest write failed
    pub manifest_path: Option<PathBuf>,
    pub probes: usize,
    pub report: InjectionReport,
    /// Stages visited, in order; `Extracting` is absent on a cache hit
    pub stages: Vec<Stage>,
}

/// Whether `content_dir` must be (re)extracted from `artifact`
///
/// Extracted content is reused when its descriptor exists and the directory
/// is not older than the artifact.
pub fn needs_extraction(artifact: &Artifact, content_dir: &Path, force: bool) -> Result<bool> {
    if force || !content_dir.join(DESCRIPTOR_FILE).is_file() {
        return Ok(true);
    }
    let extracted = fs::metadata(content_dir)
        .and_then(|m| m.modified())
        .map_err(|e| InstrumentError::io(format!("failed to stat {}", content_dir.display()), e))?;
    Ok(extracted < artifact.modified()?)
}

/// Copy `source` into a temporary file inside `dir`, ready to be persisted
fn stage_copy(source: &Path, dir: &Path) -> Result<NamedTempFile> {
    let place_err = |e| {
        InstrumentError::io(
            format!("failed to stage {} in {}", source.display(), dir.display()),
            e,
        )
    };
    let mut staged = NamedTempFile::new_in(dir).map_err(place_err)?;
    let mut input = fs::File::open(source).map_err(place_err)?;
    io::copy(&mut input, staged.as_file_mut()).map_err(place_err)?;
    staged.as_file().sync_all().map_err(place_err)?;
    let permissions = input.metadata().map_err(place_err)?.permissions();
    fs::set_permissions(staged.path(), permissions).map_err(place_err)?;
    Ok(staged)
}

/// Instrumentation pipeline over injectable collaborators
pub struct Pipeline {
    config: InstrumentConfig,
    content_tool: Box<dyn ContentTool>,
    signer: Box<dyn CodeSigner>,
    backend: Box<dyn CodeBackend>,
    content_dir: Option<PathBuf>,
    force_extract: bool,
}

impl Pipeline {
    pub fn new(
        config: InstrumentConfig,
        content_tool: Box<dyn ContentTool>,
        signer: Box<dyn CodeSigner>,
        backend: Box<dyn CodeBackend>,
    ) -> Self {
        Self {
            config,
            content_tool,
            signer,
            backend,
            content_dir: None,
            force_extract: false,
        }
    }

    /// Pipeline over the external tools named in `[tools]`
    pub fn from_config(config: InstrumentConfig) -> Result<Self> {
        let tools = &config.tools;
        let content_tool = ApkTool::new(tools.java.clone(), tools.apktool_jar.clone());
        let signer = JarSigner::from_tools(tools)?;
        let backend = CommandBackend::from_tools(tools);
        Ok(Self::new(
            config,
            Box::new(content_tool),
            Box::new(signer),
            Box::new(backend),
        ))
    }

    /// Keep extracted content in `dir` across runs so extraction can be skipped
    pub fn with_content_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.content_dir = Some(dir.into());
        self
    }

    pub fn with_force_extract(mut self, force: bool) -> Self {
        self.force_extract = force;
        self
    }

    pub fn config(&self) -> &InstrumentConfig {
        &self.config
    }

    /// Instrument `artifact`, publishing the result into `output_dir`
    #[tracing::instrument(skip_all, fields(artifact = %artifact.file_name()))]
    pub fn run(&self, artifact: &Artifact, output_dir: &Path) -> Result<InstrumentationOutcome> {
        let mut stages = Vec::new();
        match self.run_stages(artifact, output_dir, &mut stages) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                let failed_in = e
                    .stage()
                    .or_else(|| stages.last().copied())
                    .unwrap_or(Stage::Extracting);
                error!(stage = %Stage::Failed, %failed_in, error = %e, "instrumentation failed");
                Err(e)
            }
        }
    }

    fn enter(stages: &mut Vec<Stage>, stage: Stage) {
        info!(%stage, "entering stage");
        stages.push(stage);
    }

    fn run_stages(
        &self,
        artifact: &Artifact,
        output_dir: &Path,
        stages: &mut Vec<Stage>,
    ) -> Result<InstrumentationOutcome> {
        let work = TempDir::new().map_err(|e| InstrumentError::io("failed to create work dir", e))?;
        debug!(work_dir = %work.path().display(), "work directory created");
        let section = &self.config.instrumentation;

        let content_dir = self
            .content_dir
            .clone()
            .unwrap_or_else(|| work.path().join("content"));
        if needs_extraction(artifact, &content_dir, self.force_extract)? {
            Self::enter(stages, Stage::Extracting);
            self.content_tool.extract(artifact.path(), &content_dir)?;
            require_output(Stage::Extracting, &content_dir.join(DESCRIPTOR_FILE))?;
        } else {
            info!(content_dir = %content_dir.display(), "extracted content is current, skipping extraction");
        }

        Self::enter(stages, Stage::PatchingCapabilities);
        if ensure_capability(&content_dir, INTERNET_PERMISSION)? {
            info!(capability = INTERNET_PERMISSION, "capability added to descriptor");
        }
        let namespace = descriptor_package(&content_dir)?;

        Self::enter(stages, Stage::Rebuilding);
        let rebuilt_dir = work.path().join("rebuilt");
        fs::create_dir_all(&rebuilt_dir)
            .map_err(|e| InstrumentError::io(format!("failed to create {}", rebuilt_dir.display()), e))?;
        let rebuilt = rebuilt_dir.join(artifact.file_name());
        self.content_tool.build(&content_dir, &rebuilt)?;
        require_output(Stage::Rebuilding, &rebuilt)?;

        Self::enter(stages, Stage::Loading);
        let mut registry = CodeRegistry::new();
        self.backend.load(&rebuilt, work.path(), &mut registry)?;

        Self::enter(stages, Stage::Injecting);
        let mut policy = ExclusionPolicy::new(
            section
                .helper_units
                .iter()
                .map(String::as_str)
                .chain(registry.support_names())
                .chain([section.hook_class.as_str()]),
            section.excluded_prefixes.iter().map(String::as_str),
        );
        if section.scope_to_app {
            match &namespace {
                Some(ns) => policy = policy.scoped_to_application(ns),
                None => warn!("descriptor declares no package; instrumenting without scope"),
            }
        }
        let hook = ProbeHook::resolve(
            &mut registry,
            &section.hook_class,
            &section.hook_method,
            section.channel.clone(),
            section.mirror_to_log,
        )?;
        let mut allocator = section.id_strategy.allocator();
        let engine = InjectionEngine::new(&policy, &hook, &section.location_format);
        let injection = engine.inject(&mut registry, allocator.as_mut())?;
        let instrumented = self.backend.write(&registry, &rebuilt, work.path())?;
        require_output(Stage::Injecting, &instrumented)?;

        Self::enter(stages, Stage::Signing);
        let signed = self.signer.sign(&instrumented)?;
        require_output(Stage::Signing, &signed)?;

        Self::enter(stages, Stage::Placing);
        fs::create_dir_all(output_dir)
            .map_err(|e| InstrumentError::io(format!("failed to create {}", output_dir.display()), e))?;
        let apk_path = output_dir.join(artifact.instrumented_file_name());
        // Dropped unpublished on any error below
        let staged = stage_copy(&signed, output_dir)?;

        let manifest = injection.manifest.finalize(artifact.file_name());
        let manifest_path = match manifest.write_to(output_dir, &section.manifest_suffix) {
            Ok(path) => Some(path),
            Err(e) if !section.strict_manifest => {
                // The published archive is complete without its manifest
                error!(error = %e, "manifest not written, continuing");
                None
            }
            Err(e) => return Err(e),
        };

        if let Err(e) = staged.persist(&apk_path) {
            if let Some(path) = &manifest_path {
                if let Err(remove) = fs::remove_file(path) {
                    warn!(path = %path.display(), error = %remove, "stale manifest left behind");
                }
            }
            return Err(InstrumentError::io(
                format!("failed to place {}", apk_path.display()),
                e.error,
            ));
        }

        Self::enter(stages, Stage::Done);
        info!(
            apk = %apk_path.display(),
            probes = manifest.len(),
            "instrumentation complete"
        );
        Ok(InstrumentationOutcome {
            apk_path,
            manifest_path,
            probes: manifest.len(),
            report: injection.report,
            stages: stages.clone(),
        })
    }
}
