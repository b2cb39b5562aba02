//! Value types describing a pipeline: fixed-function state, stages and recipes.

use core::{
    fmt::{self, Display},
    hash::Hash,
};
use std::path::PathBuf;

use slang_module_cache::{
    fingerprint::{CompileFingerprint, FingerprintHasher},
    module::{InterfaceType, ScalarKind},
    options::{CompileOptions, ShaderStage},
};

/// Format of one vertex attribute in a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum VertexFormat {
    /// One `f32`.
    Float32,
    /// Two `f32`.
    Float32x2,
    /// Three `f32`.
    Float32x3,
    /// Four `f32`.
    Float32x4,
    /// Two `f16`.
    Float16x2,
    /// Four `f16`.
    Float16x4,
    /// One `u32`.
    Uint32,
    /// Two `u32`.
    Uint32x2,
    /// Four `u32`.
    Uint32x4,
    /// One `i32`.
    Sint32,
    /// Two `i32`.
    Sint32x2,
    /// Four `i32`.
    Sint32x4,
    /// Four normalized `u8`, read as floats.
    Unorm8x4,
}

impl VertexFormat {
    /// The type a shader sees when reading this format.
    #[inline]
    #[must_use]
    pub const fn shader_type(self) -> InterfaceType {
        let (scalar, components) = match self {
            Self::Float32 => (ScalarKind::Float32, 1),
            Self::Float32x2 => (ScalarKind::Float32, 2),
            Self::Float32x3 => (ScalarKind::Float32, 3),
            Self::Float32x4 | Self::Unorm8x4 => (ScalarKind::Float32, 4),
            Self::Float16x2 => (ScalarKind::Float16, 2),
            Self::Float16x4 => (ScalarKind::Float16, 4),
            Self::Uint32 => (ScalarKind::UInt32, 1),
            Self::Uint32x2 => (ScalarKind::UInt32, 2),
            Self::Uint32x4 => (ScalarKind::UInt32, 4),
            Self::Sint32 => (ScalarKind::Int32, 1),
            Self::Sint32x2 => (ScalarKind::Int32, 2),
            Self::Sint32x4 => (ScalarKind::Int32, 4),
        };
        InterfaceType::new(scalar, components)
    }

    /// Whether a shader input of type `input` can read this format.
    ///
    /// The component type must agree; the shader may read fewer components than
    /// the buffer provides but not more.
    #[inline]
    #[must_use]
    pub fn feeds(self, input: InterfaceType) -> bool {
        let provided = self.shader_type();
        provided.scalar == input.scalar && provided.components >= input.components
    }
}

/// How often the attributes of a vertex buffer advance.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_enums, reason = "there are only two rates")]
pub enum VertexStepMode {
    /// Per vertex.
    #[default]
    Vertex,
    /// Per instance.
    Instance,
}

/// One attribute read from a vertex buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct VertexAttribute {
    /// Shader input location.
    pub location: u32,
    /// Format in the buffer.
    pub format: VertexFormat,
    /// Byte offset inside one element.
    pub offset: u32,
}

impl VertexAttribute {
    /// Creates an attribute.
    #[inline]
    #[must_use]
    pub const fn new(location: u32, format: VertexFormat, offset: u32) -> Self {
        Self {
            location,
            format,
            offset,
        }
    }
}

/// Layout of one bound vertex buffer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct VertexBufferLayout {
    /// Bytes between consecutive elements.
    pub stride: u32,
    /// Per vertex or per instance.
    pub step_mode: VertexStepMode,
    /// Attributes read from the buffer.
    pub attributes: Vec<VertexAttribute>,
}

impl VertexBufferLayout {
    /// Creates a per-vertex layout without attributes.
    #[inline]
    #[must_use]
    pub const fn new(stride: u32) -> Self {
        Self {
            stride,
            step_mode: VertexStepMode::Vertex,
            attributes: Vec::new(),
        }
    }

    /// Sets the step mode.
    #[inline]
    #[must_use]
    pub fn step_mode(self, step_mode: VertexStepMode) -> Self {
        Self { step_mode, ..self }
    }

    /// Adds an attribute.
    #[inline]
    #[must_use]
    pub fn attribute(mut self, location: u32, format: VertexFormat, offset: u32) -> Self {
        self.attributes
            .push(VertexAttribute::new(location, format, offset));
        self
    }
}

/// How vertices are assembled into primitives.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PrimitiveTopology {
    /// Points.
    PointList,
    /// Separate lines.
    LineList,
    /// Connected lines.
    LineStrip,
    /// Separate triangles.
    #[default]
    TriangleList,
    /// Connected triangles.
    TriangleStrip,
}

/// Which faces are culled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_enums, reason = "the set of faces is fixed")]
pub enum CullMode {
    /// Nothing.
    #[default]
    None,
    /// Front faces.
    Front,
    /// Back faces.
    Back,
}

/// Winding order of front faces.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_enums, reason = "there are only two windings")]
pub enum FrontFace {
    /// Counter-clockwise.
    #[default]
    Ccw,
    /// Clockwise.
    Cw,
}

/// How polygons are filled.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum PolygonMode {
    /// Filled.
    #[default]
    Fill,
    /// Edges only.
    Line,
    /// Vertices only.
    Point,
}

/// Rasterizer configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct RasterizerState {
    /// Culled faces.
    pub cull_mode: CullMode,
    /// Front face winding.
    pub front_face: FrontFace,
    /// Fill mode.
    pub polygon_mode: PolygonMode,
    /// Constant depth bias.
    pub depth_bias: i32,
    /// Clamp depth instead of clipping.
    pub depth_clamp: bool,
}

impl RasterizerState {
    /// Sets the culled faces.
    #[inline]
    #[must_use]
    pub const fn cull_mode(self, cull_mode: CullMode) -> Self {
        Self { cull_mode, ..self }
    }

    /// Sets the front face winding.
    #[inline]
    #[must_use]
    pub const fn front_face(self, front_face: FrontFace) -> Self {
        Self { front_face, ..self }
    }

    /// Sets the fill mode.
    #[inline]
    #[must_use]
    pub const fn polygon_mode(self, polygon_mode: PolygonMode) -> Self {
        Self {
            polygon_mode,
            ..self
        }
    }
}

/// Format of a render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum TextureFormat {
    /// 8-bit RGBA, linear.
    Rgba8Unorm,
    /// 8-bit RGBA, sRGB.
    Rgba8UnormSrgb,
    /// 8-bit BGRA, linear.
    Bgra8Unorm,
    /// 8-bit BGRA, sRGB.
    Bgra8UnormSrgb,
    /// 16-bit float RGBA.
    Rgba16Float,
    /// 32-bit float RGBA.
    Rgba32Float,
    /// 32-bit float red.
    R32Float,
    /// 32-bit float depth.
    Depth32Float,
    /// 24-bit depth with 8-bit stencil.
    Depth24PlusStencil8,
}

impl TextureFormat {
    /// Whether the format holds depth.
    #[inline]
    #[must_use]
    pub const fn is_depth(self) -> bool {
        matches!(self, Self::Depth32Float | Self::Depth24PlusStencil8)
    }
}

/// Multiplier in a blend equation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BlendFactor {
    /// `0`
    Zero,
    /// `1`
    One,
    /// Source color.
    Src,
    /// `1 - source color`
    OneMinusSrc,
    /// Source alpha.
    SrcAlpha,
    /// `1 - source alpha`
    OneMinusSrcAlpha,
    /// Destination color.
    Dst,
    /// `1 - destination color`
    OneMinusDst,
    /// Destination alpha.
    DstAlpha,
    /// `1 - destination alpha`
    OneMinusDstAlpha,
}

/// Operator of a blend equation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum BlendOperation {
    /// `src + dst`
    #[default]
    Add,
    /// `src - dst`
    Subtract,
    /// `dst - src`
    ReverseSubtract,
    /// `min(src, dst)`
    Min,
    /// `max(src, dst)`
    Max,
}

/// Blend equation for the color or the alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct BlendComponent {
    /// Source multiplier.
    pub src_factor: BlendFactor,
    /// Destination multiplier.
    pub dst_factor: BlendFactor,
    /// Operator.
    pub operation: BlendOperation,
}

impl BlendComponent {
    /// Overwrites the destination.
    pub const REPLACE: Self = Self {
        src_factor: BlendFactor::One,
        dst_factor: BlendFactor::Zero,
        operation: BlendOperation::Add,
    };

    /// Standard alpha blending.
    pub const OVER: Self = Self {
        src_factor: BlendFactor::SrcAlpha,
        dst_factor: BlendFactor::OneMinusSrcAlpha,
        operation: BlendOperation::Add,
    };
}

/// Blending of one color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_structs, reason = "color and alpha, nothing else")]
pub struct BlendState {
    /// Color channels.
    pub color: BlendComponent,
    /// Alpha channel.
    pub alpha: BlendComponent,
}

impl BlendState {
    /// Standard alpha blending.
    pub const ALPHA_BLENDING: Self = Self {
        color: BlendComponent::OVER,
        alpha: BlendComponent::OVER,
    };
}

/// Channels written to a color target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_structs, reason = "a bit mask")]
pub struct ColorWrites(pub u8);

impl ColorWrites {
    /// Red.
    pub const RED: Self = Self(1);
    /// Green.
    pub const GREEN: Self = Self(2);
    /// Blue.
    pub const BLUE: Self = Self(4);
    /// Alpha.
    pub const ALPHA: Self = Self(8);
    /// Everything.
    pub const ALL: Self = Self(0xf);
}

impl Default for ColorWrites {
    #[inline]
    fn default() -> Self {
        Self::ALL
    }
}

/// One color render target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct ColorTargetState {
    /// Format of the target.
    pub format: TextureFormat,
    /// Blending, `None` to overwrite.
    pub blend: Option<BlendState>,
    /// Written channels.
    pub write_mask: ColorWrites,
}

impl ColorTargetState {
    /// A target of the given format, without blending, writing every channel.
    #[inline]
    #[must_use]
    pub const fn new(format: TextureFormat) -> Self {
        Self {
            format,
            blend: None,
            write_mask: ColorWrites::ALL,
        }
    }

    /// Sets the blending.
    #[inline]
    #[must_use]
    pub const fn blend(self, blend: Option<BlendState>) -> Self {
        Self { blend, ..self }
    }

    /// Sets the written channels.
    #[inline]
    #[must_use]
    pub const fn write_mask(self, write_mask: ColorWrites) -> Self {
        Self { write_mask, ..self }
    }
}

/// Comparison used for depth and stencil tests.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[expect(clippy::exhaustive_enums, reason = "the set of comparisons is fixed")]
pub enum CompareFunction {
    /// Never passes.
    Never,
    /// `new < old`
    #[default]
    Less,
    /// `new == old`
    Equal,
    /// `new <= old`
    LessEqual,
    /// `new > old`
    Greater,
    /// `new != old`
    NotEqual,
    /// `new >= old`
    GreaterEqual,
    /// Always passes.
    Always,
}

/// Depth and stencil configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct DepthStencilState {
    /// Format of the depth target.
    pub format: TextureFormat,
    /// Write depth.
    pub depth_write_enabled: bool,
    /// Depth test.
    pub depth_compare: CompareFunction,
    /// Stencil bits read.
    pub stencil_read_mask: u32,
    /// Stencil bits written.
    pub stencil_write_mask: u32,
}

impl DepthStencilState {
    /// Depth testing with `Less` and writing, stencil untouched.
    #[inline]
    #[must_use]
    pub const fn new(format: TextureFormat) -> Self {
        Self {
            format,
            depth_write_enabled: true,
            depth_compare: CompareFunction::Less,
            stencil_read_mask: 0,
            stencil_write_mask: 0,
        }
    }
}

/// Everything about a pipeline that is not a shader.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct FixedFunctionState {
    /// Bound vertex buffers.
    pub vertex_buffers: Vec<VertexBufferLayout>,
    /// Primitive assembly.
    pub topology: PrimitiveTopology,
    /// Rasterizer.
    pub rasterizer: RasterizerState,
    /// Color targets, by attachment index.
    pub color_targets: Vec<ColorTargetState>,
    /// Depth and stencil, `None` without a depth target.
    pub depth_stencil: Option<DepthStencilState>,
    /// MSAA samples.
    pub sample_count: u32,
}

impl Default for FixedFunctionState {
    #[inline]
    fn default() -> Self {
        Self {
            vertex_buffers: Vec::new(),
            topology: PrimitiveTopology::default(),
            rasterizer: RasterizerState::default(),
            color_targets: Vec::new(),
            depth_stencil: None,
            sample_count: 1,
        }
    }
}

impl FixedFunctionState {
    /// Adds a vertex buffer.
    #[inline]
    #[must_use]
    pub fn vertex_buffer(mut self, layout: VertexBufferLayout) -> Self {
        self.vertex_buffers.push(layout);
        self
    }

    /// Adds a color target.
    #[inline]
    #[must_use]
    pub fn color_target(mut self, target: ColorTargetState) -> Self {
        self.color_targets.push(target);
        self
    }

    /// Sets the primitive topology.
    #[inline]
    #[must_use]
    pub fn topology(self, topology: PrimitiveTopology) -> Self {
        Self { topology, ..self }
    }

    /// Sets the rasterizer state.
    #[inline]
    #[must_use]
    pub fn rasterizer(self, rasterizer: RasterizerState) -> Self {
        Self { rasterizer, ..self }
    }

    /// Sets the depth and stencil state.
    #[inline]
    #[must_use]
    pub fn depth_stencil(self, depth_stencil: Option<DepthStencilState>) -> Self {
        Self {
            depth_stencil,
            ..self
        }
    }

    /// Sets the MSAA sample count.
    #[inline]
    #[must_use]
    pub fn sample_count(self, sample_count: u32) -> Self {
        Self {
            sample_count,
            ..self
        }
    }

    /// Finds the vertex attribute feeding `location`.
    #[inline]
    #[must_use]
    pub fn vertex_attribute(&self, location: u32) -> Option<&VertexAttribute> {
        self.vertex_buffers
            .iter()
            .flat_map(|buffer| &buffer.attributes)
            .find(|attribute| attribute.location == location)
    }
}

/// The compiled module used for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct StageModule {
    /// The stage.
    pub stage: ShaderStage,
    /// Fingerprint of the module.
    pub module: CompileFingerprint,
}

/// Full description of a pipeline in terms of compiled modules.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PipelineDescriptor {
    /// Debug label, not part of the fingerprint.
    pub label: Option<String>,
    /// One module per active stage, ordered by stage.
    stages: Vec<StageModule>,
    /// Fixed-function state.
    pub state: FixedFunctionState,
}

impl PipelineDescriptor {
    /// A descriptor without stages.
    #[inline]
    #[must_use]
    pub const fn new(state: FixedFunctionState) -> Self {
        Self {
            label: None,
            stages: Vec::new(),
            state,
        }
    }

    /// Sets the debug label.
    #[inline]
    #[must_use]
    pub fn label(self, label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..self
        }
    }

    /// Uses `module` for `stage`, replacing a module set earlier for the same stage.
    #[inline]
    #[must_use]
    pub fn stage(mut self, stage: ShaderStage, module: CompileFingerprint) -> Self {
        self.stages.retain(|existing| existing.stage != stage);
        self.stages.push(StageModule { stage, module });
        self.stages.sort_by_key(|existing| existing.stage);
        self
    }

    /// One module per active stage, ordered by stage.
    #[inline]
    #[must_use]
    pub fn stages(&self) -> &[StageModule] {
        &self.stages
    }

    /// The module used for `stage`.
    #[inline]
    #[must_use]
    pub fn module_for(&self, stage: ShaderStage) -> Option<CompileFingerprint> {
        self.stages
            .iter()
            .find(|existing| existing.stage == stage)
            .map(|existing| existing.module)
    }

    /// Whether the pipeline uses `module`.
    #[inline]
    #[must_use]
    pub fn uses(&self, module: CompileFingerprint) -> bool {
        self.stages.iter().any(|existing| existing.module == module)
    }

    /// Digest of the stages and the fixed-function state.
    #[inline]
    #[must_use]
    pub fn fingerprint(&self) -> PipelineFingerprint {
        let mut hasher = FingerprintHasher::new();
        self.stages.hash(&mut hasher);
        self.state.hash(&mut hasher);
        PipelineFingerprint(hasher.digest128())
    }

    /// Label for log messages.
    #[inline]
    #[must_use]
    pub fn name(&self) -> String {
        self.label
            .clone()
            .unwrap_or_else(|| self.fingerprint().short())
    }
}

/// Digest over a [`PipelineDescriptor`]. Equal fingerprints mean interchangeable pipelines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[expect(clippy::exhaustive_structs, reason = "a plain digest")]
pub struct PipelineFingerprint(pub u128);

impl PipelineFingerprint {
    /// Short form for log messages.
    #[inline]
    #[must_use]
    pub fn short(self) -> String {
        let full = self.to_string();
        full.get(..12).unwrap_or(&full).to_owned()
    }
}

impl Display for PipelineFingerprint {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

/// Stable identity of a shader request: which file, compiled how.
///
/// Its fingerprint changes whenever the file or one of its includes changes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub struct ShaderKey {
    /// The shader file.
    pub path: PathBuf,
    /// How to compile it.
    pub options: CompileOptions,
}

impl ShaderKey {
    /// Creates a shader key.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, options: CompileOptions) -> Self {
        Self {
            path: path.into(),
            options,
        }
    }

    /// The stage the key compiles for.
    #[inline]
    #[must_use]
    pub const fn stage(&self) -> ShaderStage {
        self.options.stage
    }
}

impl Display for ShaderKey {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{} ({})",
            self.path.display(),
            self.options.entry_point,
            self.options.stage
        )
    }
}

/// A pipeline as the render loop asks for it: fixed-function state and shader keys.
///
/// Resolved into a [`PipelineDescriptor`] with the shaders' current fingerprints.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct PipelineRecipe {
    /// Debug label.
    pub label: String,
    /// One shader per active stage.
    pub stages: Vec<ShaderKey>,
    /// Fixed-function state.
    pub state: FixedFunctionState,
}

impl PipelineRecipe {
    /// A recipe without stages.
    #[inline]
    #[must_use]
    pub fn new(label: impl Into<String>, state: FixedFunctionState) -> Self {
        Self {
            label: label.into(),
            stages: Vec::new(),
            state,
        }
    }

    /// Uses `key` for its stage, replacing a shader set earlier for the same stage.
    #[inline]
    #[must_use]
    pub fn shader(mut self, key: ShaderKey) -> Self {
        self.stages.retain(|existing| existing.stage() != key.stage());
        self.stages.push(key);
        self
    }

    /// Whether the recipe uses `key`.
    #[inline]
    #[must_use]
    pub fn uses(&self, key: &ShaderKey) -> bool {
        self.stages.contains(key)
    }
}
