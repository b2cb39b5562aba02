//! The entry point tying sources, modules and pipelines to a render loop.

use std::{path::PathBuf, sync::Arc};

use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use slang_module_cache::{
    compiler::{CompileError, ShaderCompiler, SlangCompiler},
    disk::DiskCacheError,
    fingerprint::CompileFingerprint,
    module::CompiledModule,
    module_cache::{CacheStats, ModuleCache, ModuleResult},
    options::{CompileOptions, ShaderStage},
    source::{ShaderSource, SourceError, SourceStore},
};

use crate::{
    backend::GraphicsBackend,
    builder::{BuildError, PipelineBuilder, PipelineObject},
    config::ProvisionConfig,
    descriptor::{PipelineDescriptor, PipelineRecipe, ShaderKey},
    frame::FrameTracker,
    pipeline_cache::{PipelineCache, PipelineCacheStats},
    task::{Task, WorkerPool},
};

/// An error indicating that a shader or pipeline could not be provisioned.
#[derive(Debug, Clone, thiserror::Error)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub enum ProvisionError {
    /// A shader source could not be loaded.
    #[error("failed to load `{key}`: {source}")]
    Source {
        /// The shader.
        key: ShaderKey,
        /// Source of the error.
        source: Arc<SourceError>,
    },
    /// A shader failed to compile.
    #[error("failed to compile `{key}`: {source}")]
    Compile {
        /// The shader.
        key: ShaderKey,
        /// Source of the error.
        source: Arc<CompileError>,
    },
    /// A pipeline could not be built.
    #[error("failed to build pipeline `{label}`: {source}")]
    Build {
        /// Label of the pipeline.
        label: String,
        /// Source of the error.
        source: Arc<BuildError>,
    },
    /// The worker pool could not be started.
    #[error("failed to start worker threads: {0}")]
    Workers(Arc<rayon::ThreadPoolBuildError>),
    /// The on-disk module cache could not be opened.
    #[error(transparent)]
    DiskCache(Arc<DiskCacheError>),
}

/// Identifies a recipe registered with [`Provisioner::register_recipe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[expect(clippy::exhaustive_structs, reason = "an opaque id")]
pub struct RecipeId(pub usize);

/// What the render loop gets for a recipe in a frame.
#[derive(Debug, Clone)]
#[expect(clippy::exhaustive_enums, reason = "It is expected to be exhaustive")]
pub enum PipelineStatus {
    /// The pipeline is up to date.
    Ready(Arc<PipelineObject>),
    /// The pipeline is being rebuilt or failed to rebuild; this is the last one that worked.
    Fallback(Arc<PipelineObject>),
    /// No pipeline has been built yet, or the first build failed.
    Unavailable,
}

impl PipelineStatus {
    /// The pipeline to draw with, if there is any.
    #[inline]
    #[must_use]
    pub fn pipeline(&self) -> Option<&Arc<PipelineObject>> {
        match self {
            Self::Ready(pipeline) | Self::Fallback(pipeline) => Some(pipeline),
            Self::Unavailable => None,
        }
    }

    /// Whether the pipeline is up to date.
    #[inline]
    #[must_use]
    pub const fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }
}

/// What [`Provisioner::invalidate_paths`] found and removed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct InvalidationReport {
    /// Shaders depending on a changed file.
    pub shaders: Vec<ShaderKey>,
    /// Modules removed from the module cache.
    pub modules: usize,
    /// Pipelines removed from the pipeline cache.
    pub pipelines: usize,
    /// Recipes that will be rebuilt.
    pub recipes: usize,
}

impl InvalidationReport {
    /// Whether nothing was affected.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shaders.is_empty()
    }
}

/// Combined traffic counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub struct ProvisionStats {
    /// Module cache counters.
    pub modules: CacheStats,
    /// Pipeline cache counters.
    pub pipelines: PipelineCacheStats,
    /// Pipelines waiting for destruction.
    pub retired: usize,
    /// Background tasks queued or running.
    pub outstanding_tasks: usize,
}

/// A shader resolved to a fingerprint.
#[derive(Debug, Clone)]
struct Prepared {
    /// The flattened source the fingerprint was computed from.
    source: Arc<ShaderSource>,
    /// The options it is compiled with.
    key: ShaderKey,
}

/// Background build state of a recipe.
#[derive(Debug, Default)]
struct RecipeState {
    /// Bumped whenever a shader of the recipe changes.
    generation: u64,
    /// Generation `pipeline` was built for.
    built_generation: Option<u64>,
    /// Last pipeline that was built successfully.
    pipeline: Option<Arc<PipelineObject>>,
    /// Whether a background build is queued or running.
    in_flight: bool,
    /// Generation whose build failed, not retried until the generation moves.
    failed_generation: Option<u64>,
    /// Most recent failure.
    last_error: Option<ProvisionError>,
}

/// A registered recipe.
#[derive(Debug)]
struct RecipeSlot {
    /// The recipe.
    recipe: PipelineRecipe,
    /// Its build state.
    state: Mutex<RecipeState>,
}

/// Everything shared between the provisioner handles and its workers.
struct Inner {
    /// Settings.
    config: ProvisionConfig,
    /// Turns sources into modules.
    compiler: Arc<dyn ShaderCompiler>,
    /// Turns descriptors into pipelines.
    builder: PipelineBuilder,
    /// Loaded shader files.
    sources: SourceStore,
    /// Compiled modules.
    modules: ModuleCache,
    /// Built pipelines.
    pipelines: PipelineCache,
    /// Frame counters.
    frames: FrameTracker,
    /// Background compile and build threads.
    workers: WorkerPool,
    /// Current fingerprint of each prepared shader.
    shaders: RwLock<FxHashMap<ShaderKey, CompileFingerprint>>,
    /// Shaders whose source failed to load, with every path that may fix them.
    unresolved: RwLock<FxHashMap<ShaderKey, Vec<PathBuf>>>,
    /// How to compile each known fingerprint.
    prepared: RwLock<FxHashMap<CompileFingerprint, Prepared>>,
    /// Registered recipes, indexed by [`RecipeId`].
    recipes: RwLock<Vec<Arc<RecipeSlot>>>,
}

/// Provisions pipelines for a render loop.
///
/// Cheap to clone; clones share all caches. Blocking operations ([`compile`](Self::compile),
/// [`build_recipe`](Self::build_recipe)) are meant for loading screens and worker
/// threads. The render loop only calls [`pipeline_for_frame`](Self::pipeline_for_frame),
/// which never waits for a compilation, and [`frame_completed`](Self::frame_completed)
/// once the fence of a frame signalled.
#[derive(Clone)]
pub struct Provisioner {
    /// Shared state.
    inner: Arc<Inner>,
}

impl core::fmt::Debug for Provisioner {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Provisioner")
            .field("config", &self.inner.config)
            .field("backend", &self.inner.builder.backend().name())
            .field("modules", &self.inner.modules.len())
            .field("pipelines", &self.inner.pipelines.len())
            .field("recipes", &self.inner.recipes.read().len())
            .finish_non_exhaustive()
    }
}

impl Provisioner {
    /// Creates a provisioner compiling with `compiler` and creating GPU objects through
    /// `backend`.
    ///
    /// # Errors
    ///
    /// Fails if the worker threads can not be started or the disk cache can not be opened.
    #[inline]
    pub fn new(
        config: ProvisionConfig,
        compiler: Arc<dyn ShaderCompiler>,
        backend: Arc<dyn GraphicsBackend>,
    ) -> Result<Self, ProvisionError> {
        let workers = WorkerPool::new(config.worker_threads)
            .map_err(|err| ProvisionError::Workers(Arc::new(err)))?;
        let disk = config
            .open_disk_cache()
            .map_err(|err| ProvisionError::DiskCache(Arc::new(err)))?;
        log::debug!(
            "provisioning pipelines on {} with {} worker(s)",
            backend.name(),
            workers.threads()
        );

        Ok(Self {
            inner: Arc::new(Inner {
                sources: SourceStore::new(config.include_dirs.clone()),
                modules: ModuleCache::new()
                    .capacity(config.module_cache_capacity)
                    .disk(disk),
                pipelines: PipelineCache::new().capacity(config.pipeline_cache_capacity),
                builder: PipelineBuilder::new(backend),
                frames: FrameTracker::default(),
                workers,
                compiler,
                config,
                shaders: RwLock::default(),
                unresolved: RwLock::default(),
                prepared: RwLock::default(),
                recipes: RwLock::default(),
            }),
        })
    }

    /// Creates a provisioner compiling with the `slangc` named in `config`.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::new`].
    #[inline]
    pub fn with_slangc(
        config: ProvisionConfig,
        backend: Arc<dyn GraphicsBackend>,
    ) -> Result<Self, ProvisionError> {
        let compiler = Arc::new(SlangCompiler::new(config.slangc.clone()));
        Self::new(config, compiler, backend)
    }

    /// The settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ProvisionConfig {
        &self.inner.config
    }

    /// A key for the `main` entry point of `path` at `stage`, using the configured profile.
    #[inline]
    #[must_use]
    pub fn shader_key(&self, path: impl Into<PathBuf>, stage: ShaderStage) -> ShaderKey {
        ShaderKey::new(
            path,
            CompileOptions::new(stage).profile(self.inner.config.profile.clone()),
        )
    }

    /// Loads the source of `key` and records its current fingerprint.
    ///
    /// # Errors
    ///
    /// Fails if the source or one of its includes can not be loaded.
    #[inline]
    pub fn prepare_shader(&self, key: &ShaderKey) -> Result<CompileFingerprint, ProvisionError> {
        self.inner.prepare(key)
    }

    /// Compiles `key`, or returns the cached module.
    ///
    /// # Errors
    ///
    /// Fails if the source can not be loaded or does not compile.
    #[inline]
    pub fn compile(&self, key: &ShaderKey) -> Result<Arc<CompiledModule>, ProvisionError> {
        self.inner.compile(key)
    }

    /// Compiles `key` on a worker thread.
    #[inline]
    #[must_use]
    pub fn compile_async(
        &self,
        key: ShaderKey,
    ) -> Task<Result<Arc<CompiledModule>, ProvisionError>> {
        let inner = Arc::clone(&self.inner);
        self.inner.workers.spawn(move || inner.compile(&key))
    }

    /// The descriptor of `recipe` with the current fingerprints of its shaders.
    ///
    /// # Errors
    ///
    /// Fails if a shader source can not be loaded.
    #[inline]
    pub fn describe(&self, recipe: &PipelineRecipe) -> Result<PipelineDescriptor, ProvisionError> {
        self.inner.describe(recipe)
    }

    /// Builds `descriptor`, compiling its modules as needed, or returns the cached pipeline.
    ///
    /// # Errors
    ///
    /// Returns the build failure.
    #[inline]
    pub fn get_or_build(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<Arc<PipelineObject>, Arc<BuildError>> {
        self.inner.get_or_build(descriptor)
    }

    /// Describes and builds `recipe`, blocking until it is done.
    ///
    /// # Errors
    ///
    /// Fails if a shader can not be loaded or the pipeline can not be built.
    #[inline]
    pub fn build_recipe(
        &self,
        recipe: &PipelineRecipe,
    ) -> Result<Arc<PipelineObject>, ProvisionError> {
        self.inner.build_recipe(recipe)
    }

    /// Describes and builds `recipe` on a worker thread.
    #[inline]
    #[must_use]
    pub fn build_recipe_async(
        &self,
        recipe: PipelineRecipe,
    ) -> Task<Result<Arc<PipelineObject>, ProvisionError>> {
        let inner = Arc::clone(&self.inner);
        self.inner.workers.spawn(move || inner.build_recipe(&recipe))
    }

    /// Registers a pipeline the render loop will ask for every frame.
    ///
    /// Nothing is built until [`pipeline_for_frame`](Self::pipeline_for_frame) first asks.
    #[inline]
    pub fn register_recipe(&self, recipe: PipelineRecipe) -> RecipeId {
        let mut recipes = self.inner.recipes.write();
        log::debug!("registered recipe `{}`", recipe.label);
        recipes.push(Arc::new(RecipeSlot {
            recipe,
            state: Mutex::new(RecipeState::default()),
        }));
        RecipeId(recipes.len() - 1)
    }

    /// The recipe registered as `id`.
    #[inline]
    #[must_use]
    pub fn recipe(&self, id: RecipeId) -> Option<PipelineRecipe> {
        Some(self.inner.recipes.read().get(id.0)?.recipe.clone())
    }

    /// The pipeline to draw `id` with in `frame`, never blocking.
    ///
    /// If the pipeline is missing or outdated a background build is scheduled, and the
    /// last pipeline that worked is handed out meanwhile. A failed build is not retried
    /// until one of the recipe's shaders changes; see [`recipe_error`](Self::recipe_error).
    #[inline]
    #[must_use]
    pub fn pipeline_for_frame(&self, id: RecipeId, frame: u64) -> PipelineStatus {
        let Some(slot) = self.inner.recipes.read().get(id.0).cloned() else {
            log::warn!("unknown recipe {}", id.0);
            return PipelineStatus::Unavailable;
        };
        let mut state = slot.state.lock();

        if state.built_generation == Some(state.generation) {
            if let Some(pipeline) = &state.pipeline {
                pipeline.mark_used(frame);
                return PipelineStatus::Ready(Arc::clone(pipeline));
            }
        }

        if !state.in_flight && state.failed_generation != Some(state.generation) {
            state.in_flight = true;
            let generation = state.generation;
            let inner = Arc::clone(&self.inner);
            let slot = Arc::clone(&slot);
            log::trace!("scheduling build of recipe `{}`", slot.recipe.label);
            self.inner
                .workers
                .execute(move || inner.build_in_background(&slot, generation));
        }

        match &state.pipeline {
            Some(pipeline) => {
                pipeline.mark_used(frame);
                PipelineStatus::Fallback(Arc::clone(pipeline))
            }
            None => PipelineStatus::Unavailable,
        }
    }

    /// The most recent build failure of `id`, cleared by the next successful build.
    #[inline]
    #[must_use]
    pub fn recipe_error(&self, id: RecipeId) -> Option<ProvisionError> {
        let slot = self.inner.recipes.read().get(id.0).cloned()?;
        let state = slot.state.lock();
        state.last_error.clone()
    }

    /// Blocks until every background compile and build has finished.
    #[inline]
    pub fn wait_idle(&self) {
        self.inner.workers.wait_idle();
    }

    /// Starts a new frame, returning its number.
    #[inline]
    pub fn begin_frame(&self) -> u64 {
        self.inner.frames.begin()
    }

    /// Records that the GPU finished `frame` and destroys pipelines no frame uses any
    /// more. Call from the thread owning the GPU context. Returns how many were destroyed.
    #[inline]
    pub fn frame_completed(&self, frame: u64) -> usize {
        self.inner.frames.complete(frame);
        self.inner.pipelines.collect_garbage(
            &**self.inner.builder.backend(),
            self.inner.frames.completed(),
        )
    }

    /// Removes everything derived from `paths`: the modules of the shaders including
    /// them, the pipelines using those modules, and marks the recipes using them for
    /// rebuilding. `paths` must be canonical.
    #[inline]
    pub fn invalidate_paths(&self, paths: &[PathBuf]) -> InvalidationReport {
        self.inner.invalidate_paths(paths)
    }

    /// Destroys every pipeline once the device is idle. Background work is waited for.
    #[inline]
    pub fn shutdown(&self) {
        self.wait_idle();
        for slot in self.inner.recipes.read().iter() {
            let mut state = slot.state.lock();
            state.pipeline = None;
            state.built_generation = None;
        }
        let destroyed = self
            .inner
            .pipelines
            .destroy_all(&**self.inner.builder.backend());
        self.inner.modules.clear();
        log::debug!("shut down, destroyed {destroyed} pipeline(s)");
    }

    /// Combined traffic counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> ProvisionStats {
        ProvisionStats {
            modules: self.inner.modules.stats(),
            pipelines: self.inner.pipelines.stats(),
            retired: self.inner.pipelines.retired_len(),
            outstanding_tasks: self.inner.workers.outstanding(),
        }
    }

    /// Paths which, once created or changed, may let a shader that failed to load resolve:
    /// its own file and every place one of its includes was searched for.
    #[inline]
    #[must_use]
    pub fn unresolved_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .inner
            .unresolved
            .read()
            .values()
            .flatten()
            .cloned()
            .collect();
        files.sort();
        files.dedup();
        files
    }

    /// The loaded shader files.
    #[inline]
    #[must_use]
    pub fn sources(&self) -> &SourceStore {
        &self.inner.sources
    }

    /// The compiled modules.
    #[inline]
    #[must_use]
    pub fn modules(&self) -> &ModuleCache {
        &self.inner.modules
    }

    /// The built pipelines.
    #[inline]
    #[must_use]
    pub fn pipelines(&self) -> &PipelineCache {
        &self.inner.pipelines
    }

    /// The frame counters.
    #[inline]
    #[must_use]
    pub fn frames(&self) -> &FrameTracker {
        &self.inner.frames
    }
}

impl Inner {
    /// See [`Provisioner::prepare_shader`].
    fn prepare(&self, key: &ShaderKey) -> Result<CompileFingerprint, ProvisionError> {
        self.prepare_source(key).map(|(fingerprint, _)| fingerprint)
    }

    /// Loads the source of `key` and records which fingerprint it compiles to.
    fn prepare_source(
        &self,
        key: &ShaderKey,
    ) -> Result<(CompileFingerprint, Arc<ShaderSource>), ProvisionError> {
        let mut files = Vec::new();
        let source = match self.sources.resolve_recording(&key.path, &mut files) {
            Ok(source) => {
                self.unresolved.write().remove(key);
                Arc::new(source)
            }
            Err(err) => {
                self.shaders.write().remove(key);
                files.sort();
                files.dedup();
                self.unresolved.write().insert(key.clone(), files);
                return Err(ProvisionError::Source {
                    key: key.clone(),
                    source: Arc::new(err),
                });
            }
        };
        let fingerprint = CompileFingerprint::compute(&source.flattened, &key.options);

        let previous = self.shaders.write().insert(key.clone(), fingerprint);
        if previous != Some(fingerprint) {
            log::trace!("`{key}` is module {}", fingerprint.short());
        }
        self.prepared.write().insert(
            fingerprint,
            Prepared {
                source: Arc::clone(&source),
                key: key.clone(),
            },
        );
        Ok((fingerprint, source))
    }

    /// Compiles the prepared shader behind `fingerprint`.
    ///
    /// Fingerprints that were never prepared are only served if already compiled.
    fn compile_prepared(&self, fingerprint: CompileFingerprint) -> Option<ModuleResult> {
        let Some(prepared) = self.prepared.read().get(&fingerprint).cloned() else {
            return self.modules.get(fingerprint).map(Ok);
        };
        Some(self.modules.get_or_compile(fingerprint, || {
            self.compiler
                .compile(&prepared.source, &prepared.key.options)
        }))
    }

    /// See [`Provisioner::compile`].
    fn compile(&self, key: &ShaderKey) -> Result<Arc<CompiledModule>, ProvisionError> {
        let (fingerprint, source) = self.prepare_source(key)?;
        self.modules
            .get_or_compile(fingerprint, || self.compiler.compile(&source, &key.options))
            .map_err(|source| {
                if let Some(diagnostics) = source.diagnostics() {
                    for error in diagnostics.errors() {
                        log::debug!("{error}");
                    }
                }
                ProvisionError::Compile {
                    key: key.clone(),
                    source,
                }
            })
    }

    /// See [`Provisioner::describe`].
    fn describe(&self, recipe: &PipelineRecipe) -> Result<PipelineDescriptor, ProvisionError> {
        recipe.stages.iter().try_fold(
            PipelineDescriptor::new(recipe.state.clone()).label(recipe.label.clone()),
            |descriptor, key| Ok(descriptor.stage(key.stage(), self.prepare(key)?)),
        )
    }

    /// See [`Provisioner::get_or_build`].
    fn get_or_build(
        &self,
        descriptor: &PipelineDescriptor,
    ) -> Result<Arc<PipelineObject>, Arc<BuildError>> {
        self.pipelines.get_or_build(descriptor, |descriptor| {
            self.builder
                .build(descriptor, |fingerprint| self.compile_prepared(fingerprint))
        })
    }

    /// See [`Provisioner::build_recipe`].
    fn build_recipe(&self, recipe: &PipelineRecipe) -> Result<Arc<PipelineObject>, ProvisionError> {
        let descriptor = self.describe(recipe)?;
        self.get_or_build(&descriptor)
            .map_err(|source| ProvisionError::Build {
                label: recipe.label.clone(),
                source,
            })
    }

    /// Builds a registered recipe and publishes the result if it is still wanted.
    fn build_in_background(&self, slot: &RecipeSlot, generation: u64) {
        let result = self.build_recipe(&slot.recipe);
        let mut state = slot.state.lock();
        state.in_flight = false;
        match result {
            Ok(pipeline) if state.generation == generation => {
                log::info!("pipeline `{}` is ready", slot.recipe.label);
                state.pipeline = Some(pipeline);
                state.built_generation = Some(generation);
                state.last_error = None;
            }
            Ok(_) => log::debug!(
                "discarding superseded build of `{}`",
                slot.recipe.label
            ),
            Err(err) => {
                log::error!("{err}");
                if state.generation == generation {
                    state.failed_generation = Some(generation);
                }
                state.last_error = Some(err);
            }
        }
    }

    /// See [`Provisioner::invalidate_paths`].
    fn invalidate_paths(&self, paths: &[PathBuf]) -> InvalidationReport {
        let affected: Vec<(ShaderKey, Option<CompileFingerprint>)> = {
            let prepared = self.prepared.read();
            let mut affected: Vec<_> = self
                .shaders
                .read()
                .iter()
                .filter(|&(_, fingerprint)| {
                    prepared.get(fingerprint).is_some_and(|shader| {
                        paths.iter().any(|path| shader.source.depends_on(path))
                    })
                })
                .map(|(key, fingerprint)| (key.clone(), Some(*fingerprint)))
                .collect();
            affected.extend(
                self.unresolved
                    .read()
                    .iter()
                    .filter(|(_, files)| files.iter().any(|file| paths.contains(file)))
                    .map(|(key, _)| (key.clone(), None)),
            );
            affected.sort_by(|(left, _), (right, _)| left.to_string().cmp(&right.to_string()));
            affected.dedup_by(|(left, _), (right, _)| left == right);
            affected
        };

        let mut report = InvalidationReport::default();
        let mut stale_modules = FxHashSet::default();
        for (key, old) in affected {
            match (self.prepare(&key), old) {
                (Ok(new), Some(old)) if new == old => continue,
                (Ok(new), Some(old)) => log::info!(
                    "`{key}` changed, module {} replaces {}",
                    new.short(),
                    old.short()
                ),
                (Ok(new), None) => log::info!("`{key}` loads again as module {}", new.short()),
                (Err(err), _) => log::warn!("{err}"),
            }
            report.shaders.push(key);
            stale_modules.extend(old);
        }

        for module in &stale_modules {
            self.prepared.write().remove(module);
            if self.modules.invalidate(*module) {
                report.modules += 1;
            }
            report.pipelines += self.pipelines.invalidate(*module);
        }

        for slot in self.recipes.read().iter() {
            if report.shaders.iter().any(|key| slot.recipe.uses(key)) {
                slot.state.lock().generation += 1;
                report.recipes += 1;
                log::debug!("recipe `{}` will be rebuilt", slot.recipe.label);
            }
        }

        if !report.is_empty() {
            log::info!(
                "reloaded {} shader(s): {} module(s), {} pipeline(s), {} recipe(s) invalidated",
                report.shaders.len(),
                report.modules,
                report.pipelines,
                report.recipes
            );
        }
        report
    }
}
