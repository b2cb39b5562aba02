//! Shared code of `pipeline-provision` crates for testing.
//!
//! * [`ShaderTree`], a temporary directory of shader files,
//! * [`ScriptedCompiler`], a compiler that needs no `slangc` and whose output is
//!   controlled by annotations in the shader source,
//! * [`FaultyBackend`], a headless backend that fails allocations on demand.

use core::{
    sync::atomic::{AtomicU64, AtomicUsize, Ordering},
    time::Duration,
};
use std::{
    fs,
    hash::Hasher as _,
    path::{Path, PathBuf},
    thread,
    time::SystemTime,
};

use anyhow::Context as _;
use parking_lot::Mutex;
use pipeline_provision::{
    backend::{GpuAllocationError, GpuHandle, GraphicsBackend, HeadlessBackend, StageHandle},
    descriptor::PipelineDescriptor,
};
use slang_module_cache::{
    compiler::{CompileError, ShaderCompiler},
    diagnostic::{Diagnostic, Diagnostics, Location, Severity},
    fingerprint::FingerprintHasher,
    module::{
        BindingKind, CompileOutput, CompiledModule, EntryPoint, InterfaceType, InterfaceVariable,
        ResourceBinding, SPIRV_MAGIC,
    },
    options::CompileOptions,
    source::ShaderSource,
};

/// A temporary directory of shader files, deleted when dropped.
#[derive(Debug)]
pub struct ShaderTree {
    /// The directory.
    dir: tempfile::TempDir,
    /// Canonical path of the directory.
    root: PathBuf,
    /// Modification time of the first write.
    epoch: SystemTime,
    /// Number of writes so far.
    writes: AtomicU64,
}

impl ShaderTree {
    /// Creates an empty tree.
    ///
    /// # Errors
    ///
    /// Fails if the directory can not be created.
    #[inline]
    pub fn new() -> anyhow::Result<Self> {
        let dir = tempfile::tempdir()?;
        let root = dunce::canonicalize(dir.path())?;
        Ok(Self {
            dir,
            root,
            epoch: SystemTime::now(),
            writes: AtomicU64::new(0),
        })
    }

    /// Canonical path of the tree.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Canonical path of `relative` inside the tree.
    #[inline]
    #[must_use]
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Writes `text` to `relative`, creating directories as needed.
    ///
    /// Every write gets a later modification time than the one before, so rewriting a
    /// file is noticed even within the file system's timestamp granularity.
    ///
    /// # Errors
    ///
    /// Fails if the file can not be written.
    #[inline]
    pub fn write(&self, relative: impl AsRef<Path>, text: &str) -> anyhow::Result<PathBuf> {
        let path = self.path(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, text).with_context(|| format!("writing `{}`", path.display()))?;

        let writes = self.writes.fetch_add(1, Ordering::SeqCst) + 1;
        fs::File::options()
            .write(true)
            .open(&path)?
            .set_modified(self.epoch + Duration::from_secs(writes))?;
        log::trace!("wrote `{}`", path.display());
        Ok(path)
    }

    /// Deletes `relative`.
    ///
    /// # Errors
    ///
    /// Fails if the file can not be deleted.
    #[inline]
    pub fn remove(&self, relative: impl AsRef<Path>) -> anyhow::Result<()> {
        fs::remove_file(self.path(relative))?;
        Ok(())
    }

    /// The temporary directory itself.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &tempfile::TempDir {
        &self.dir
    }
}

/// A stand-in for `slangc`.
///
/// The module is derived from the flattened source, so equal sources give
/// bit-identical payloads. Entry point metadata and diagnostics come from comment
/// annotations, one per line:
///
/// ```text
/// // @in <location> <name> <type>
/// // @out <location> <name> <type>
/// // @binding <set> <binding> <name> <uniform|storage|texture|sampler>
/// // @warn <message>
/// // @error <message>
/// ```
///
/// Diagnostics are located in the original file through the source's line map.
#[derive(Debug, Default)]
pub struct ScriptedCompiler {
    /// Number of compilations.
    calls: AtomicUsize,
    /// Sleep before every compilation.
    delay: Option<Duration>,
    /// Root files compiled, in order.
    compiled: Mutex<Vec<PathBuf>>,
}

impl ScriptedCompiler {
    /// Creates a compiler.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every compilation take at least `delay`.
    #[inline]
    #[must_use]
    pub fn delay(self, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..self
        }
    }

    /// Number of compilations so far.
    #[inline]
    #[must_use]
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Root files compiled so far, in order.
    #[inline]
    #[must_use]
    pub fn compiled(&self) -> Vec<PathBuf> {
        self.compiled.lock().clone()
    }
}

impl ShaderCompiler for ScriptedCompiler {
    #[inline]
    fn compile(
        &self,
        source: &ShaderSource,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.compiled.lock().push(source.path.clone());
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }

        let mut entry_point = EntryPoint::new(options.entry_point.clone(), options.stage);
        let mut diagnostics = Vec::new();
        for (index, line) in source.flattened.lines().enumerate() {
            let Some((before, annotation)) = line.split_once("// @") else {
                continue;
            };
            let location = u32::try_from(index + 1)
                .ok()
                .and_then(|number| source.line_map.origin(number))
                .map(|(file, number)| {
                    Location::new(file, number, u32::try_from(before.len() + 1).unwrap_or(1))
                });
            let (verb, rest) = annotation
                .split_once(char::is_whitespace)
                .unwrap_or((annotation, ""));
            let rest = rest.trim();

            let malformed = match verb {
                "in" | "out" => match parse_variable(rest) {
                    Some(variable) if verb == "in" => {
                        entry_point.inputs.push(variable);
                        false
                    }
                    Some(variable) => {
                        entry_point.outputs.push(variable);
                        false
                    }
                    None => true,
                },
                "binding" => parse_binding(rest).map_or(true, |binding| {
                    entry_point.bindings.push(binding);
                    false
                }),
                "warn" => {
                    let severity = if options.warnings_as_errors {
                        Severity::Error
                    } else {
                        Severity::Warning
                    };
                    diagnostics.push(Diagnostic::new(severity, location.clone(), rest));
                    false
                }
                "error" => {
                    diagnostics.push(Diagnostic::new(Severity::Error, location.clone(), rest));
                    false
                }
                _ => false,
            };
            if malformed {
                diagnostics.push(Diagnostic::new(
                    Severity::Error,
                    location,
                    format!("malformed annotation `@{verb} {rest}`"),
                ));
            }
        }

        if diagnostics.iter().any(Diagnostic::is_error) {
            return Err(CompileError::Diagnostics(Diagnostics(diagnostics)));
        }

        let mut hasher = FingerprintHasher::new();
        hasher.write(source.flattened.as_bytes());
        hasher.write(options.entry_point.as_bytes());
        hasher.write(options.stage.as_str().as_bytes());
        let mut payload = SPIRV_MAGIC.to_le_bytes().to_vec();
        payload.extend_from_slice(&hasher.digest128().to_le_bytes());

        entry_point.normalize();
        let mut output = CompileOutput::new(payload, entry_point);
        output.warnings = diagnostics;
        Ok(output)
    }
}

/// Parses `<location> <name> <type>`.
fn parse_variable(text: &str) -> Option<InterfaceVariable> {
    let mut words = text.split_whitespace();
    let location = words.next()?.parse().ok()?;
    let name = words.next()?;
    let ty = InterfaceType::parse(words.next()?)?;
    Some(InterfaceVariable::new(name, location, ty))
}

/// Parses `<set> <binding> <name> <kind>`.
fn parse_binding(text: &str) -> Option<ResourceBinding> {
    let mut words = text.split_whitespace();
    let set = words.next()?.parse().ok()?;
    let binding = words.next()?.parse().ok()?;
    let name = words.next()?;
    let kind = match words.next()? {
        "uniform" => BindingKind::UniformBuffer,
        "storage" => BindingKind::StorageBuffer,
        "texture" => BindingKind::Texture,
        "sampler" => BindingKind::Sampler,
        _ => BindingKind::Other,
    };
    Some(ResourceBinding::new(name, set, binding, kind))
}

/// A [`HeadlessBackend`] that fails a chosen allocation.
#[derive(Debug, Default)]
pub struct FaultyBackend {
    /// The backend doing the work.
    inner: HeadlessBackend,
    /// Allocations attempted so far.
    allocations: AtomicUsize,
    /// The allocation that fails, counted from 1.
    fail_at: Mutex<Option<usize>>,
}

impl FaultyBackend {
    /// Creates a backend that does not fail.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the `nth` allocation from now fail, shader modules and pipelines alike.
    /// `1` fails the very next one.
    #[inline]
    pub fn fail_nth(&self, nth: usize) {
        let done = self.allocations.load(Ordering::SeqCst);
        *self.fail_at.lock() = Some(done + nth);
    }

    /// The backend doing the work, to inspect live objects.
    #[inline]
    #[must_use]
    pub fn headless(&self) -> &HeadlessBackend {
        &self.inner
    }

    /// Counts an allocation, failing it if it is the chosen one.
    fn allocation(&self, what: &'static str) -> Result<(), GpuAllocationError> {
        let count = self.allocations.fetch_add(1, Ordering::SeqCst) + 1;
        if *self.fail_at.lock() == Some(count) {
            log::debug!("failing allocation {count} ({what})");
            return Err(GpuAllocationError::OutOfMemory { what });
        }
        Ok(())
    }
}

impl GraphicsBackend for FaultyBackend {
    #[inline]
    fn name(&self) -> &str {
        "faulty"
    }

    #[inline]
    fn create_shader_module(
        &self,
        module: &CompiledModule,
    ) -> Result<GpuHandle, GpuAllocationError> {
        self.allocation("shader module")?;
        self.inner.create_shader_module(module)
    }

    #[inline]
    fn destroy_shader_module(&self, handle: GpuHandle) {
        self.inner.destroy_shader_module(handle);
    }

    #[inline]
    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
        stages: &[StageHandle],
    ) -> Result<GpuHandle, GpuAllocationError> {
        self.allocation("pipeline")?;
        self.inner.create_pipeline(descriptor, stages)
    }

    #[inline]
    fn destroy_pipeline(&self, handle: GpuHandle) {
        self.inner.destroy_pipeline(handle);
    }
}
