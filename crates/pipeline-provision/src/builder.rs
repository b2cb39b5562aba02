//! Turning a [`PipelineDescriptor`] into a GPU pipeline.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use slang_module_cache::{
    compiler::CompileError,
    fingerprint::CompileFingerprint,
    module::{CompiledModule, InterfaceType},
    module_cache::ModuleResult,
    options::ShaderStage,
};

use crate::{
    backend::{GpuAllocationError, GpuHandle, GraphicsBackend, StageHandle},
    descriptor::{PipelineDescriptor, PipelineFingerprint, VertexFormat},
};

/// A pipeline living on the GPU.
///
/// Owned by the [pipeline cache](crate::pipeline_cache::PipelineCache) and lent to
/// frames; it is destroyed only after it left the cache and no frame uses it any more.
#[derive(Debug)]
pub struct PipelineObject {
    /// The GPU pipeline.
    handle: GpuHandle,
    /// Fingerprint of the descriptor.
    fingerprint: PipelineFingerprint,
    /// The descriptor it was built from.
    descriptor: PipelineDescriptor,
    /// The modules of its stages, in descriptor order.
    modules: Vec<Arc<CompiledModule>>,
    /// Newest frame the pipeline was handed to.
    last_used_frame: AtomicU64,
}

impl PipelineObject {
    /// The GPU pipeline.
    #[inline]
    #[must_use]
    pub const fn handle(&self) -> GpuHandle {
        self.handle
    }

    /// Fingerprint of the descriptor.
    #[inline]
    #[must_use]
    pub const fn fingerprint(&self) -> PipelineFingerprint {
        self.fingerprint
    }

    /// The descriptor it was built from.
    #[inline]
    #[must_use]
    pub const fn descriptor(&self) -> &PipelineDescriptor {
        &self.descriptor
    }

    /// The modules of its stages, in descriptor order.
    #[inline]
    #[must_use]
    pub fn modules(&self) -> &[Arc<CompiledModule>] {
        &self.modules
    }

    /// Records that the pipeline is used by `frame`.
    #[inline]
    pub fn mark_used(&self, frame: u64) {
        self.last_used_frame.fetch_max(frame, Ordering::AcqRel);
    }

    /// Newest frame the pipeline was handed to.
    #[inline]
    #[must_use]
    pub fn last_used_frame(&self) -> u64 {
        self.last_used_frame.load(Ordering::Acquire)
    }
}

/// What is wrong with the way stages connect to each other or to the vertex buffers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum InterfaceMismatch {
    /// The set of stages cannot form a pipeline.
    #[error("invalid combination of stages: {0}")]
    StageSet(&'static str),
    /// No vertex buffer provides an input of the vertex stage.
    #[error("vertex input `{name}` at location {location} is not provided by any vertex buffer")]
    MissingVertexAttribute {
        /// Input name.
        name: String,
        /// Input location.
        location: u32,
    },
    /// A vertex buffer attribute cannot be read as the input's type.
    #[error("vertex input `{name}` at location {location} is {expected} but the buffer provides {provided:?}")]
    VertexFormat {
        /// Input name.
        name: String,
        /// Input location.
        location: u32,
        /// Type the shader reads.
        expected: InterfaceType,
        /// Format in the buffer.
        provided: VertexFormat,
    },
    /// A fragment input has no vertex output at its location.
    #[error("fragment input `{name}` at location {location} is not written by the vertex stage")]
    MissingVertexOutput {
        /// Input name.
        name: String,
        /// Input location.
        location: u32,
    },
    /// A fragment input and the vertex output at its location disagree on the type.
    #[error("fragment input `{name}` at location {location} is {fragment} but the vertex stage writes {vertex}")]
    VaryingType {
        /// Input name.
        name: String,
        /// Input location.
        location: u32,
        /// Type written by the vertex stage.
        vertex: InterfaceType,
        /// Type read by the fragment stage.
        fragment: InterfaceType,
    },
}

/// An error indicating that a pipeline could not be built.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub enum BuildError {
    /// The module of a stage failed to compile.
    #[error("{stage} stage failed to compile: {source}")]
    StageFailed {
        /// The stage.
        stage: ShaderStage,
        /// The compilation failure.
        source: Arc<CompileError>,
    },
    /// A stage refers to a module nobody knows how to produce.
    #[error("{stage} stage refers to unknown module {module}")]
    UnknownModule {
        /// The stage.
        stage: ShaderStage,
        /// The module.
        module: CompileFingerprint,
    },
    /// A module was compiled for another stage than the one it is used for.
    #[error("module `{entry_point}` is a {actual} shader but is used as the {declared} stage")]
    StageMismatch {
        /// Stage in the descriptor.
        declared: ShaderStage,
        /// Stage of the module.
        actual: ShaderStage,
        /// Entry point of the module.
        entry_point: String,
    },
    /// Stages do not fit together.
    #[error(transparent)]
    InterfaceMismatch(#[from] InterfaceMismatch),
    /// The GPU refused an allocation. Nothing created for this build is left alive.
    #[error(transparent)]
    Gpu(#[from] GpuAllocationError),
    /// The build panicked.
    #[error("pipeline build panicked")]
    Panicked,
    /// Modules of the pipeline were invalidated during every attempt to build it.
    #[error("modules of the pipeline were invalidated while it was built, {attempts} times in a row")]
    Superseded {
        /// Number of builds thrown away.
        attempts: u32,
    },
}

/// Checks descriptors and creates their GPU objects.
#[derive(Clone)]
pub struct PipelineBuilder {
    /// Where objects are created.
    backend: Arc<dyn GraphicsBackend>,
}

impl core::fmt::Debug for PipelineBuilder {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl PipelineBuilder {
    /// Creates a builder creating objects through `backend`.
    #[inline]
    #[must_use]
    pub fn new(backend: Arc<dyn GraphicsBackend>) -> Self {
        Self { backend }
    }

    /// The backend objects are created with.
    #[inline]
    #[must_use]
    pub fn backend(&self) -> &Arc<dyn GraphicsBackend> {
        &self.backend
    }

    /// Builds `descriptor`.
    ///
    /// `resolve` produces the module for a fingerprint, compiling it if needed, and
    /// returns `None` for fingerprints it does not know. Every check runs before the
    /// first GPU call; if the GPU then fails, everything created so far is released.
    ///
    /// # Errors
    ///
    /// See [`BuildError`].
    #[inline]
    pub fn build<R>(
        &self,
        descriptor: &PipelineDescriptor,
        resolve: R,
    ) -> Result<PipelineObject, BuildError>
    where
        R: Fn(CompileFingerprint) -> Option<ModuleResult>,
    {
        let modules = descriptor
            .stages()
            .iter()
            .map(|stage| match resolve(stage.module) {
                None => Err(BuildError::UnknownModule {
                    stage: stage.stage,
                    module: stage.module,
                }),
                Some(Err(source)) => Err(BuildError::StageFailed {
                    stage: stage.stage,
                    source,
                }),
                Some(Ok(module)) if module.stage() != stage.stage => {
                    Err(BuildError::StageMismatch {
                        declared: stage.stage,
                        actual: module.stage(),
                        entry_point: module.entry_point().name.clone(),
                    })
                }
                Some(Ok(module)) => Ok(module),
            })
            .collect::<Result<Vec<_>, _>>()?;

        validate_interfaces(descriptor, &modules)?;
        let handle = self.allocate(descriptor, &modules)?;
        log::debug!(
            "created pipeline `{}` ({handle}) on {}",
            descriptor.name(),
            self.backend.name()
        );

        Ok(PipelineObject {
            handle,
            fingerprint: descriptor.fingerprint(),
            descriptor: descriptor.clone(),
            modules,
            last_used_frame: AtomicU64::new(0),
        })
    }

    /// Creates the stage modules and the pipeline, releasing everything on failure.
    fn allocate(
        &self,
        descriptor: &PipelineDescriptor,
        modules: &[Arc<CompiledModule>],
    ) -> Result<GpuHandle, GpuAllocationError> {
        let mut stages: Vec<StageHandle> = Vec::with_capacity(modules.len());
        let release = |stages: &[StageHandle]| {
            for stage in stages {
                self.backend.destroy_shader_module(stage.module);
            }
        };

        for (index, module) in modules.iter().enumerate() {
            match self.backend.create_shader_module(module) {
                Ok(handle) => stages.push(StageHandle::new(module.stage(), handle, index)),
                Err(err) => {
                    log::debug!(
                        "creating {} module of `{}` failed, releasing {} module(s)",
                        module.stage(),
                        descriptor.name(),
                        stages.len()
                    );
                    release(&stages);
                    return Err(err);
                }
            }
        }

        let pipeline = self.backend.create_pipeline(descriptor, &stages);
        release(&stages);
        pipeline
    }
}

/// Checks the stage set, the vertex inputs against the vertex buffers and the fragment
/// inputs against the vertex outputs.
fn validate_interfaces(
    descriptor: &PipelineDescriptor,
    modules: &[Arc<CompiledModule>],
) -> Result<(), InterfaceMismatch> {
    let find = |stage: ShaderStage| modules.iter().find(|module| module.stage() == stage);
    let vertex = find(ShaderStage::Vertex);
    let fragment = find(ShaderStage::Fragment);
    let compute = find(ShaderStage::Compute);

    match (vertex, fragment, compute) {
        (None, None, None) => return Err(InterfaceMismatch::StageSet("no stages")),
        (Some(_) | None, Some(_) | None, Some(_)) if modules.len() > 1 => {
            return Err(InterfaceMismatch::StageSet(
                "compute cannot be combined with graphics stages",
            ))
        }
        (None, Some(_), None) => {
            return Err(InterfaceMismatch::StageSet("fragment stage without vertex stage"))
        }
        _ => {}
    }

    if let Some(vertex) = vertex {
        for input in &vertex.entry_point().inputs {
            let attribute = descriptor.state.vertex_attribute(input.location).ok_or_else(|| {
                InterfaceMismatch::MissingVertexAttribute {
                    name: input.name.clone(),
                    location: input.location,
                }
            })?;
            if !attribute.format.feeds(input.ty) {
                return Err(InterfaceMismatch::VertexFormat {
                    name: input.name.clone(),
                    location: input.location,
                    expected: input.ty,
                    provided: attribute.format,
                });
            }
        }

        if let Some(fragment) = fragment {
            for input in &fragment.entry_point().inputs {
                let output = vertex.entry_point().output_at(input.location).ok_or_else(|| {
                    InterfaceMismatch::MissingVertexOutput {
                        name: input.name.clone(),
                        location: input.location,
                    }
                })?;
                if output.ty != input.ty {
                    return Err(InterfaceMismatch::VaryingType {
                        name: input.name.clone(),
                        location: input.location,
                        vertex: output.ty,
                        fragment: input.ty,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use slang_module_cache::module::{
        CompileOutput, EntryPoint, InterfaceVariable, ScalarKind, SPIRV_MAGIC,
    };

    use super::*;
    use crate::{
        backend::{HeadlessBackend, ObjectKind},
        descriptor::{FixedFunctionState, VertexBufferLayout},
    };

    fn float(components: u8) -> InterfaceType {
        InterfaceType::new(ScalarKind::Float32, components)
    }

    fn module(
        fingerprint: u128,
        stage: ShaderStage,
        inputs: &[(u32, InterfaceType)],
        outputs: &[(u32, InterfaceType)],
    ) -> Arc<CompiledModule> {
        let mut entry = EntryPoint::new("main", stage);
        entry.inputs = inputs
            .iter()
            .map(|&(location, ty)| InterfaceVariable::new(format!("in{location}"), location, ty))
            .collect();
        entry.outputs = outputs
            .iter()
            .map(|&(location, ty)| InterfaceVariable::new(format!("out{location}"), location, ty))
            .collect();
        let mut payload = SPIRV_MAGIC.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 16]);
        Arc::new(CompiledModule::new(
            CompileFingerprint(fingerprint),
            CompileOutput::new(payload, entry),
        ))
    }

    fn state() -> FixedFunctionState {
        FixedFunctionState::default().vertex_buffer(
            VertexBufferLayout::new(12).attribute(0, VertexFormat::Float32x3, 0),
        )
    }

    fn descriptor() -> PipelineDescriptor {
        PipelineDescriptor::new(state())
            .stage(ShaderStage::Vertex, CompileFingerprint(1))
            .stage(ShaderStage::Fragment, CompileFingerprint(2))
    }

    fn resolver(
        modules: Vec<Arc<CompiledModule>>,
    ) -> impl Fn(CompileFingerprint) -> Option<ModuleResult> {
        move |fingerprint| {
            modules
                .iter()
                .find(|module| module.fingerprint() == fingerprint)
                .cloned()
                .map(Ok)
        }
    }

    #[test_log::test]
    fn builds_matching_stages() {
        let backend = Arc::new(HeadlessBackend::new());
        let builder = PipelineBuilder::new(backend.clone());
        let vertex = module(1, ShaderStage::Vertex, &[(0, float(3))], &[(0, float(4))]);
        let fragment = module(2, ShaderStage::Fragment, &[(0, float(4))], &[]);

        let pipeline = builder
            .build(&descriptor(), resolver(vec![vertex, fragment]))
            .unwrap();
        assert!(backend.is_live(pipeline.handle()));
        assert_eq!(backend.live(ObjectKind::ShaderModule), 0);
        assert_eq!(pipeline.modules().len(), 2);
    }

    #[test_log::test]
    fn vec3_output_feeding_vec4_input_fails_before_any_gpu_call() {
        let backend = Arc::new(HeadlessBackend::new());
        let builder = PipelineBuilder::new(backend.clone());
        let vertex = module(1, ShaderStage::Vertex, &[(0, float(3))], &[(0, float(3))]);
        let fragment = module(2, ShaderStage::Fragment, &[(0, float(4))], &[]);

        let error = builder
            .build(&descriptor(), resolver(vec![vertex, fragment]))
            .unwrap_err();
        assert!(matches!(
            error,
            BuildError::InterfaceMismatch(InterfaceMismatch::VaryingType { location: 0, .. })
        ));
        assert_eq!(backend.pipelines_created(), 0);
        assert_eq!(backend.live_total(), 0);
    }

    #[test_log::test]
    fn missing_vertex_attribute_is_rejected() {
        let builder = PipelineBuilder::new(Arc::new(HeadlessBackend::new()));
        let vertex = module(1, ShaderStage::Vertex, &[(0, float(3)), (1, float(2))], &[]);
        let descriptor =
            PipelineDescriptor::new(state()).stage(ShaderStage::Vertex, CompileFingerprint(1));

        let error = builder.build(&descriptor, resolver(vec![vertex])).unwrap_err();
        assert!(matches!(
            error,
            BuildError::InterfaceMismatch(InterfaceMismatch::MissingVertexAttribute {
                location: 1,
                ..
            })
        ));
    }

    #[test_log::test]
    fn stage_mismatch_and_unknown_module() {
        let builder = PipelineBuilder::new(Arc::new(HeadlessBackend::new()));
        let fragment_as_vertex = module(1, ShaderStage::Fragment, &[], &[]);
        let error = builder
            .build(&descriptor(), resolver(vec![fragment_as_vertex]))
            .unwrap_err();
        assert!(matches!(
            error,
            BuildError::StageMismatch {
                declared: ShaderStage::Vertex,
                actual: ShaderStage::Fragment,
                ..
            }
        ));

        let error = builder.build(&descriptor(), resolver(Vec::new())).unwrap_err();
        assert!(matches!(error, BuildError::UnknownModule { .. }));
    }

    #[test_log::test]
    fn compute_cannot_mix_with_graphics() {
        let builder = PipelineBuilder::new(Arc::new(HeadlessBackend::new()));
        let descriptor = PipelineDescriptor::new(state())
            .stage(ShaderStage::Vertex, CompileFingerprint(1))
            .stage(ShaderStage::Compute, CompileFingerprint(3));
        let modules = vec![
            module(1, ShaderStage::Vertex, &[], &[]),
            module(3, ShaderStage::Compute, &[], &[]),
        ];
        let error = builder.build(&descriptor, resolver(modules)).unwrap_err();
        assert!(matches!(
            error,
            BuildError::InterfaceMismatch(InterfaceMismatch::StageSet(_))
        ));
    }

    #[test_log::test]
    fn gpu_failure_releases_created_modules() {
        let backend = Arc::new(HeadlessBackend::new().max_live(Some(2)));
        let builder = PipelineBuilder::new(backend.clone());
        let vertex = module(1, ShaderStage::Vertex, &[(0, float(3))], &[(0, float(4))]);
        let fragment = module(2, ShaderStage::Fragment, &[(0, float(4))], &[]);

        let error = builder
            .build(&descriptor(), resolver(vec![vertex, fragment]))
            .unwrap_err();
        assert!(matches!(error, BuildError::Gpu(GpuAllocationError::OutOfMemory { .. })));
        assert_eq!(backend.live_total(), 0);
    }
}
