//! The capability interface through which GPU objects are created and destroyed.
//!
//! The host application supplies the implementation for its graphics API. A
//! [`HeadlessBackend`] is provided for tools, CI and tests.

use core::{
    fmt,
    num::NonZeroU64,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slang_module_cache::{module::CompiledModule, options::ShaderStage};

use crate::descriptor::PipelineDescriptor;

/// Opaque handle of an object living on the GPU.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_structs, reason = "an opaque id")]
pub struct GpuHandle(pub NonZeroU64);

impl fmt::Display for GpuHandle {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A shader module created for one stage of a pipeline being built.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub struct StageHandle {
    /// The stage.
    pub stage: ShaderStage,
    /// The shader module.
    pub module: GpuHandle,
    /// Index of the stage in the descriptor.
    pub index: usize,
}

impl StageHandle {
    /// Creates a stage handle.
    #[inline]
    #[must_use]
    pub const fn new(stage: ShaderStage, module: GpuHandle, index: usize) -> Self {
        Self {
            stage,
            module,
            index,
        }
    }
}

/// An error indicating that the GPU refused to create an object.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum GpuAllocationError {
    /// The device ran out of memory or of handles.
    #[error("out of GPU memory while creating {what}")]
    OutOfMemory {
        /// What was being created.
        what: &'static str,
    },
    /// The driver rejected the object.
    #[error("the driver rejected the {what}: {reason}")]
    Rejected {
        /// What was being created.
        what: &'static str,
        /// Why, as reported by the driver.
        reason: String,
    },
    /// The device is gone.
    #[error("the GPU device was lost")]
    DeviceLost,
}

/// Creates and destroys GPU objects.
///
/// Creation may happen on any thread. Destruction is only requested from the thread
/// calling [`Provisioner::frame_completed`](crate::provisioner::Provisioner::frame_completed)
/// or [`Provisioner::shutdown`](crate::provisioner::Provisioner::shutdown).
pub trait GraphicsBackend: Send + Sync {
    /// Name for log messages.
    fn name(&self) -> &str;

    /// Uploads a compiled module.
    ///
    /// # Errors
    ///
    /// Fails if the GPU cannot hold the module.
    fn create_shader_module(
        &self,
        module: &CompiledModule,
    ) -> Result<GpuHandle, GpuAllocationError>;

    /// Releases a shader module.
    fn destroy_shader_module(&self, handle: GpuHandle);

    /// Creates a pipeline from its descriptor and freshly created stage modules.
    ///
    /// # Errors
    ///
    /// Fails if the GPU cannot create the pipeline.
    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
        stages: &[StageHandle],
    ) -> Result<GpuHandle, GpuAllocationError>;

    /// Releases a pipeline.
    fn destroy_pipeline(&self, handle: GpuHandle);
}

/// Kind of a live headless object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ObjectKind {
    /// A shader module.
    ShaderModule,
    /// A pipeline.
    Pipeline,
}

/// A backend without a GPU which hands out handles and tracks which are alive.
#[derive(Debug)]
pub struct HeadlessBackend {
    /// Last handle given out.
    next: AtomicU64,
    /// Live objects.
    live: Mutex<FxHashMap<GpuHandle, ObjectKind>>,
    /// Number of objects that may be alive at once, unbounded if `None`.
    max_live: Option<usize>,
    /// Pipelines created over the backend's lifetime.
    pipelines_created: AtomicU64,
}

impl Default for HeadlessBackend {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl HeadlessBackend {
    /// Creates an unbounded headless backend.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(0),
            live: Mutex::new(FxHashMap::default()),
            max_live: None,
            pipelines_created: AtomicU64::new(0),
        }
    }

    /// Fails allocations once `max_live` objects are alive.
    #[inline]
    #[must_use]
    pub fn max_live(self, max_live: Option<usize>) -> Self {
        Self { max_live, ..self }
    }

    /// Registers a new live object.
    fn allocate(
        &self,
        kind: ObjectKind,
        what: &'static str,
    ) -> Result<GpuHandle, GpuAllocationError> {
        let mut live = self.live.lock();
        if self.max_live.is_some_and(|max| live.len() >= max) {
            return Err(GpuAllocationError::OutOfMemory { what });
        }
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        let handle =
            GpuHandle(NonZeroU64::new(id).ok_or(GpuAllocationError::OutOfMemory { what })?);
        live.insert(handle, kind);
        Ok(handle)
    }

    /// Removes a live object, complaining about double frees.
    fn release(&self, handle: GpuHandle, kind: ObjectKind) {
        match self.live.lock().remove(&handle) {
            Some(found) if found == kind => {}
            Some(found) => log::error!("{handle} destroyed as {kind:?} but is a {found:?}"),
            None => log::error!("{handle} destroyed twice or never created"),
        }
    }

    /// Number of live objects of `kind`.
    #[inline]
    #[must_use]
    pub fn live(&self, kind: ObjectKind) -> usize {
        self.live
            .lock()
            .values()
            .filter(|&&found| found == kind)
            .count()
    }

    /// Number of live objects of any kind.
    #[inline]
    #[must_use]
    pub fn live_total(&self) -> usize {
        self.live.lock().len()
    }

    /// Whether `handle` is alive.
    #[inline]
    #[must_use]
    pub fn is_live(&self, handle: GpuHandle) -> bool {
        self.live.lock().contains_key(&handle)
    }

    /// Number of pipelines ever created.
    #[inline]
    #[must_use]
    pub fn pipelines_created(&self) -> u64 {
        self.pipelines_created.load(Ordering::Relaxed)
    }
}

impl GraphicsBackend for HeadlessBackend {
    #[inline]
    fn name(&self) -> &str {
        "headless"
    }

    #[inline]
    fn create_shader_module(
        &self,
        module: &CompiledModule,
    ) -> Result<GpuHandle, GpuAllocationError> {
        if module.payload().is_empty() {
            return Err(GpuAllocationError::Rejected {
                what: "shader module",
                reason: "empty module".to_owned(),
            });
        }
        self.allocate(ObjectKind::ShaderModule, "shader module")
    }

    #[inline]
    fn destroy_shader_module(&self, handle: GpuHandle) {
        self.release(handle, ObjectKind::ShaderModule);
    }

    #[inline]
    fn create_pipeline(
        &self,
        descriptor: &PipelineDescriptor,
        stages: &[StageHandle],
    ) -> Result<GpuHandle, GpuAllocationError> {
        if stages.len() != descriptor.stages().len() {
            return Err(GpuAllocationError::Rejected {
                what: "pipeline",
                reason: format!(
                    "{} stage modules for {} stages",
                    stages.len(),
                    descriptor.stages().len()
                ),
            });
        }
        if let Some(dead) = stages.iter().find(|stage| !self.is_live(stage.module)) {
            return Err(GpuAllocationError::Rejected {
                what: "pipeline",
                reason: format!("stage module {} is not alive", dead.module),
            });
        }
        let handle = self.allocate(ObjectKind::Pipeline, "pipeline")?;
        self.pipelines_created.fetch_add(1, Ordering::Relaxed);
        Ok(handle)
    }

    #[inline]
    fn destroy_pipeline(&self, handle: GpuHandle) {
        self.release(handle, ObjectKind::Pipeline);
    }
}

#[cfg(test)]
mod test {
    use slang_module_cache::{
        fingerprint::CompileFingerprint,
        module::{CompileOutput, EntryPoint},
    };

    use super::*;
    use crate::descriptor::FixedFunctionState;

    fn module() -> CompiledModule {
        CompiledModule::new(
            CompileFingerprint(1),
            CompileOutput::new(vec![3, 2, 35, 7], EntryPoint::new("main", ShaderStage::Compute)),
        )
    }

    #[test_log::test]
    fn tracks_live_objects() {
        let backend = HeadlessBackend::new();
        let shader = backend.create_shader_module(&module()).unwrap();
        let descriptor = PipelineDescriptor::new(FixedFunctionState::default())
            .stage(ShaderStage::Compute, CompileFingerprint(1));
        let pipeline = backend
            .create_pipeline(&descriptor, &[StageHandle::new(ShaderStage::Compute, shader, 0)])
            .unwrap();

        assert_eq!(backend.live(ObjectKind::ShaderModule), 1);
        assert_eq!(backend.live(ObjectKind::Pipeline), 1);
        backend.destroy_shader_module(shader);
        backend.destroy_pipeline(pipeline);
        assert_eq!(backend.live_total(), 0);
        assert_eq!(backend.pipelines_created(), 1);
    }

    #[test_log::test]
    fn limit_fails_allocation() {
        let backend = HeadlessBackend::new().max_live(Some(1));
        let first = backend.create_shader_module(&module()).unwrap();
        assert_eq!(
            backend.create_shader_module(&module()),
            Err(GpuAllocationError::OutOfMemory {
                what: "shader module"
            })
        );
        backend.destroy_shader_module(first);
        assert!(backend.create_shader_module(&module()).is_ok());
    }
}
