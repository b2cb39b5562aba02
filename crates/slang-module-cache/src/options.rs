//! Options which select what a compilation produces.

use core::fmt::{self, Display};
use std::collections::BTreeMap;

/// The profile used when none is given, matching a Vulkan 1.2+ GLSL 4.60 environment.
pub const DEFAULT_PROFILE: &str = "glsl_460";

/// The entry point name used when none is given.
pub const DEFAULT_ENTRY_POINT: &str = "main";

/// A programmable stage of a pipeline.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
#[expect(clippy::exhaustive_enums, reason = "the set of stages is fixed")]
pub enum ShaderStage {
    /// Vertex stage.
    Vertex,
    /// Fragment (pixel) stage.
    Fragment,
    /// Compute stage.
    Compute,
}

impl ShaderStage {
    /// Name of the stage as understood by `slangc -stage` and Slang reflection.
    #[inline]
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Vertex => "vertex",
            Self::Fragment => "fragment",
            Self::Compute => "compute",
        }
    }

    /// Parses a stage name as reported by Slang reflection.
    /// `pixel` is accepted as an alias of [`Fragment`](Self::Fragment).
    #[inline]
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "vertex" => Some(Self::Vertex),
            "fragment" | "pixel" => Some(Self::Fragment),
            "compute" => Some(Self::Compute),
            _ => None,
        }
    }
}

impl Display for ShaderStage {
    #[expect(
        clippy::min_ident_chars,
        reason = "It's a core library trait implementation"
    )]
    #[inline]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Optimization level passed to the compiler as `-O<n>`.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize,
)]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
#[serde(rename_all = "lowercase")]
#[expect(clippy::exhaustive_enums, reason = "mirrors the compiler flags")]
pub enum OptimizationLevel {
    /// `-O0`
    None,
    /// `-O1`
    #[default]
    Default,
    /// `-O2`
    High,
    /// `-O3`
    Maximal,
}

impl OptimizationLevel {
    /// The compiler flag for this level.
    #[inline]
    #[must_use]
    pub const fn flag(self) -> &'static str {
        match self {
            Self::None => "-O0",
            Self::Default => "-O1",
            Self::High => "-O2",
            Self::Maximal => "-O3",
        }
    }
}

/// Everything besides the source text that influences the compiled module.
///
/// Every field takes part in the [fingerprint](crate::fingerprint::CompileFingerprint),
/// so two requests with equal options and equal source always share one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
pub struct CompileOptions {
    /// Name of the entry point function.
    pub entry_point: String,
    /// Stage of the entry point.
    pub stage: ShaderStage,
    /// Target profile, e.g. `glsl_460` or `spirv_1_5`.
    pub profile: String,
    /// Preprocessor definitions, passed as `-D<name>=<value>`.
    pub defines: BTreeMap<String, String>,
    /// Optimization level.
    pub optimization: OptimizationLevel,
    /// Emit debug information into the module.
    pub debug_info: bool,
    /// Treat warnings as errors during compilation.
    pub warnings_as_errors: bool,
}

impl Default for CompileOptions {
    #[inline]
    fn default() -> Self {
        Self::new(ShaderStage::Vertex)
    }
}

impl CompileOptions {
    /// Options compiling the `main` entry point for the given stage with the default profile.
    #[inline]
    #[must_use]
    pub fn new(stage: ShaderStage) -> Self {
        Self {
            entry_point: DEFAULT_ENTRY_POINT.to_owned(),
            stage,
            profile: DEFAULT_PROFILE.to_owned(),
            defines: BTreeMap::new(),
            optimization: OptimizationLevel::default(),
            debug_info: false,
            warnings_as_errors: false,
        }
    }

    /// Replaces the entry point name.
    #[inline]
    #[must_use]
    pub fn entry_point(self, entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            ..self
        }
    }

    /// Replaces the target profile.
    #[inline]
    #[must_use]
    pub fn profile(self, profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            ..self
        }
    }

    /// Adds a preprocessor definition.
    #[inline]
    #[must_use]
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.insert(name.into(), value.into());
        self
    }

    /// Replaces the optimization level.
    #[inline]
    #[must_use]
    pub fn optimization(self, optimization: OptimizationLevel) -> Self {
        Self {
            optimization,
            ..self
        }
    }

    /// Sets whether to emit debug information.
    #[inline]
    #[must_use]
    pub fn debug_info(self, debug_info: bool) -> Self {
        Self { debug_info, ..self }
    }

    /// Sets whether warnings fail the compilation.
    #[inline]
    #[must_use]
    pub fn warnings_as_errors(self, warnings_as_errors: bool) -> Self {
        Self {
            warnings_as_errors,
            ..self
        }
    }
}
