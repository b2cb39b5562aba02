//! Compiled shader modules and the metadata describing their entry points.

use core::fmt::{self, Display};

use crate::{diagnostic::Diagnostic, fingerprint::CompileFingerprint, options::ShaderStage};

/// Magic number every SPIR-V module starts with.
pub const SPIRV_MAGIC: u32 = 0x0723_0203;

/// Scalar component type of a stage interface variable.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[non_exhaustive]
pub enum ScalarKind {
    /// 32-bit float.
    Float32,
    /// 16-bit float.
    Float16,
    /// 32-bit signed integer.
    Int32,
    /// 32-bit unsigned integer.
    UInt32,
    /// Boolean.
    Bool,
}

impl ScalarKind {
    /// Parses a scalar type name as reported by Slang reflection.
    #[inline]
    #[must_use]
    pub fn from_reflection(name: &str) -> Option<Self> {
        match name {
            "float32" => Some(Self::Float32),
            "float16" => Some(Self::Float16),
            "int32" => Some(Self::Int32),
            "uint32" => Some(Self::UInt32),
            "bool" => Some(Self::Bool),
            _ => None,
        }
    }

    /// Prefix used when spelling vector types, `float3`, `int2`...
    const fn prefix(self) -> &'static str {
        match self {
            Self::Float32 => "float",
            Self::Float16 => "half",
            Self::Int32 => "int",
            Self::UInt32 => "uint",
            Self::Bool => "bool",
        }
    }
}

/// Type of a value passed between stages, a scalar or a vector of up to four components.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[non_exhaustive]
pub struct InterfaceType {
    /// Component type.
    pub scalar: ScalarKind,
    /// Number of components, `1..=4`.
    pub components: u8,
}

impl InterfaceType {
    /// Creates an interface type.
    #[inline]
    #[must_use]
    pub const fn new(scalar: ScalarKind, components: u8) -> Self {
        Self { scalar, components }
    }

    /// Parses type names such as `float3`, `vec4`, `uint`, `half2`.
    /// `vecN` is accepted as a spelling of `floatN`.
    #[inline]
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let digits_at = name
            .find(|ch: char| ch.is_ascii_digit())
            .unwrap_or(name.len());
        let (base, count) = name.split_at(digits_at);
        let components = if count.is_empty() {
            1
        } else {
            count.parse().ok().filter(|count| (1..=4).contains(count))?
        };
        let scalar = match base {
            "float" | "vec" => ScalarKind::Float32,
            "half" => ScalarKind::Float16,
            "int" | "ivec" => ScalarKind::Int32,
            "uint" | "uvec" => ScalarKind::UInt32,
            "bool" => ScalarKind::Bool,
            _ => return None,
        };
        if base.ends_with("vec") && components == 1 {
            return None;
        }
        Some(Self::new(scalar, components))
    }
}

impl Display for InterfaceType {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.components == 1 {
            f.write_str(self.scalar.prefix())
        } else {
            write!(f, "{}{}", self.scalar.prefix(), self.components)
        }
    }
}

/// A varying input or output of an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct InterfaceVariable {
    /// Name in the source.
    pub name: String,
    /// Location slot.
    pub location: u32,
    /// Type.
    pub ty: InterfaceType,
}

impl InterfaceVariable {
    /// Creates an interface variable.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, location: u32, ty: InterfaceType) -> Self {
        Self {
            name: name.into(),
            location,
            ty,
        }
    }
}

/// What kind of resource a binding refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
#[non_exhaustive]
pub enum BindingKind {
    /// Uniform / constant buffer.
    UniformBuffer,
    /// Storage buffer.
    StorageBuffer,
    /// Sampled or storage texture.
    Texture,
    /// Sampler.
    Sampler,
    /// Anything reflection reported that we don't model.
    Other,
}

/// A descriptor binding used by an entry point.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct ResourceBinding {
    /// Name in the source.
    pub name: String,
    /// Descriptor set (Slang's register space).
    pub set: u32,
    /// Binding index within the set.
    pub binding: u32,
    /// Kind of resource.
    pub kind: BindingKind,
}

impl ResourceBinding {
    /// Creates a resource binding.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, set: u32, binding: u32, kind: BindingKind) -> Self {
        Self {
            name: name.into(),
            set,
            binding,
            kind,
        }
    }
}

/// Metadata of the entry point a module was compiled for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[non_exhaustive]
pub struct EntryPoint {
    /// Function name.
    pub name: String,
    /// Stage.
    pub stage: ShaderStage,
    /// Descriptor bindings, sorted by set and binding.
    pub bindings: Vec<ResourceBinding>,
    /// Varying inputs, sorted by location.
    pub inputs: Vec<InterfaceVariable>,
    /// Varying outputs, sorted by location.
    pub outputs: Vec<InterfaceVariable>,
}

impl EntryPoint {
    /// Creates an entry point without any bindings or varyings.
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, stage: ShaderStage) -> Self {
        Self {
            name: name.into(),
            stage,
            bindings: Vec::new(),
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Sorts bindings and varyings into their canonical order.
    #[inline]
    pub fn normalize(&mut self) {
        self.bindings
            .sort_by(|a, b| (a.set, a.binding, &a.name).cmp(&(b.set, b.binding, &b.name)));
        self.inputs.sort_by_key(|variable| variable.location);
        self.outputs.sort_by_key(|variable| variable.location);
    }

    /// Returns the output at the given location.
    #[inline]
    #[must_use]
    pub fn output_at(&self, location: u32) -> Option<&InterfaceVariable> {
        self.outputs
            .iter()
            .find(|variable| variable.location == location)
    }
}

/// What a [compiler](crate::compiler::ShaderCompiler) produces for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct CompileOutput {
    /// The SPIR-V binary.
    pub payload: Vec<u8>,
    /// Entry point metadata.
    pub entry_point: EntryPoint,
    /// Warnings emitted while compiling.
    pub warnings: Vec<Diagnostic>,
}

impl CompileOutput {
    /// Creates an output without warnings.
    #[inline]
    #[must_use]
    pub fn new(payload: Vec<u8>, entry_point: EntryPoint) -> Self {
        Self {
            payload,
            entry_point,
            warnings: Vec::new(),
        }
    }
}

/// An immutable compiled module, shared read-only by every pipeline using it.
#[derive(Debug, PartialEq, Eq)]
pub struct CompiledModule {
    /// Fingerprint of the request that produced the module.
    fingerprint: CompileFingerprint,
    /// The SPIR-V binary.
    payload: Box<[u8]>,
    /// Entry point metadata.
    entry_point: EntryPoint,
    /// Warnings emitted while compiling.
    warnings: Vec<Diagnostic>,
}

impl CompiledModule {
    /// Wraps compiler output under its fingerprint.
    #[inline]
    #[must_use]
    pub fn new(fingerprint: CompileFingerprint, output: CompileOutput) -> Self {
        let CompileOutput {
            payload,
            mut entry_point,
            warnings,
        } = output;
        entry_point.normalize();
        Self {
            fingerprint,
            payload: payload.into_boxed_slice(),
            entry_point,
            warnings,
        }
    }

    /// Fingerprint of the request that produced the module.
    #[inline]
    #[must_use]
    pub const fn fingerprint(&self) -> CompileFingerprint {
        self.fingerprint
    }

    /// The SPIR-V binary.
    #[inline]
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Entry point metadata.
    #[inline]
    #[must_use]
    pub const fn entry_point(&self) -> &EntryPoint {
        &self.entry_point
    }

    /// Stage of the entry point.
    #[inline]
    #[must_use]
    pub const fn stage(&self) -> ShaderStage {
        self.entry_point.stage
    }

    /// Warnings emitted while compiling.
    #[inline]
    #[must_use]
    pub fn warnings(&self) -> &[Diagnostic] {
        &self.warnings
    }
}

/// Checks that `payload` looks like a SPIR-V module: non-empty, whole words, magic number.
///
/// # Errors
///
/// Returns a description of the first problem found.
#[inline]
pub fn validate_spirv(payload: &[u8]) -> Result<(), String> {
    if payload.len() < 20 {
        return Err(format!(
            "{} bytes is too short for a SPIR-V header",
            payload.len()
        ));
    }
    if payload.len() % 4 != 0 {
        return Err(format!(
            "{} bytes is not a whole number of words",
            payload.len()
        ));
    }
    let magic = payload
        .get(..4)
        .and_then(|bytes| bytes.try_into().ok())
        .map(u32::from_le_bytes);
    if magic != Some(SPIRV_MAGIC) {
        return Err("missing SPIR-V magic number".to_owned());
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn parses_interface_type_spellings() {
        let float3 = InterfaceType::new(ScalarKind::Float32, 3);
        assert_eq!(InterfaceType::parse("float3"), Some(float3));
        assert_eq!(InterfaceType::parse("vec3"), Some(float3));
        assert_eq!(
            InterfaceType::parse("uint"),
            Some(InterfaceType::new(ScalarKind::UInt32, 1))
        );
        assert_eq!(InterfaceType::parse("float5"), None);
        assert_eq!(InterfaceType::parse("vec"), None);
        assert_eq!(InterfaceType::parse("matrix"), None);
        assert_eq!(float3.to_string(), "float3");
    }

    #[test_log::test]
    fn spirv_validation() {
        let mut module = SPIRV_MAGIC.to_le_bytes().to_vec();
        module.extend_from_slice(&[0; 16]);
        assert!(validate_spirv(&module).is_ok());
        assert!(validate_spirv(&module[..19]).is_err());
        module[0] = 0;
        assert!(validate_spirv(&module).is_err());
    }

    #[test_log::test]
    fn module_normalizes_entry_point() {
        let mut entry = EntryPoint::new("main", ShaderStage::Vertex);
        let float4 = InterfaceType::new(ScalarKind::Float32, 4);
        entry.outputs = vec![
            InterfaceVariable::new("uv", 1, float4),
            InterfaceVariable::new("color", 0, float4),
        ];
        let module = CompiledModule::new(
            CompileFingerprint(1),
            CompileOutput::new(vec![1, 2, 3, 4], entry),
        );
        assert_eq!(module.entry_point().outputs[0].name, "color");
        assert_eq!(module.entry_point().output_at(1).unwrap().name, "uv");
    }
}
