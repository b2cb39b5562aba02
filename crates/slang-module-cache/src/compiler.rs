//! Turning a resolved [`ShaderSource`] into a [`CompileOutput`].

use std::{
    fs, io,
    path::{Path, PathBuf},
    process::Command,
};

use crate::{
    command::{run_command, CommandExecError},
    diagnostic::{parse_slangc_output, Diagnostic, Diagnostics, Location, Severity},
    module::{validate_spirv, CompileOutput, EntryPoint},
    options::CompileOptions,
    reflection::parse_reflection,
    source::ShaderSource,
};

/// Compiles one shader source with one set of options.
///
/// Implementations hold no per-request state and may be called from many threads at once.
pub trait ShaderCompiler: Send + Sync {
    /// Compiles `source` for the entry point selected by `options`.
    ///
    /// # Errors
    ///
    /// Returns the diagnostics if the source does not compile, or what went wrong
    /// while running the compiler.
    fn compile(
        &self,
        source: &ShaderSource,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError>;
}

/// An error indicating that a shader could not be compiled.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub enum CompileError {
    /// The compiler rejected the source.
    #[error("shader failed to compile:\n{0}")]
    Diagnostics(Diagnostics),
    /// The compiler could not be run or failed without saying why.
    #[error(transparent)]
    Command(#[from] CommandExecError),
    /// The compiler claimed success but produced an unusable module.
    #[error("compiler produced an invalid module: {reason}")]
    InvalidOutput {
        /// What is wrong with it.
        reason: String,
    },
    /// Staging the source or reading back the output failed.
    #[error("I/O error while compiling: {0}")]
    Io(#[from] io::Error),
    /// The reflection written by the compiler could not be read.
    #[error("failed to parse shader reflection: {0}")]
    Reflection(#[from] serde_json::Error),
    /// The compiler implementation panicked.
    #[error("shader compilation panicked")]
    Panicked,
}

impl CompileError {
    /// The diagnostics, if the failure was the source's fault.
    #[inline]
    #[must_use]
    pub const fn diagnostics(&self) -> Option<&Diagnostics> {
        match self {
            Self::Diagnostics(diagnostics) => Some(diagnostics),
            Self::Command(_)
            | Self::InvalidOutput { .. }
            | Self::Io(_)
            | Self::Reflection(_)
            | Self::Panicked => None,
        }
    }
}

/// Compiles shaders by running the `slangc` command line compiler.
#[derive(Debug, Clone)]
pub struct SlangCompiler {
    /// The `slangc` executable.
    slangc: PathBuf,
}

impl Default for SlangCompiler {
    #[inline]
    fn default() -> Self {
        Self::new("slangc")
    }
}

impl SlangCompiler {
    /// Creates a compiler running the given `slangc` executable.
    #[inline]
    #[must_use]
    pub fn new(slangc: impl Into<PathBuf>) -> Self {
        Self {
            slangc: slangc.into(),
        }
    }

    /// The `slangc` executable.
    #[inline]
    #[must_use]
    pub fn slangc(&self) -> &Path {
        &self.slangc
    }

    /// Builds the `slangc` invocation for one request.
    fn command(
        &self,
        input: &Path,
        output: &Path,
        reflection: &Path,
        options: &CompileOptions,
    ) -> Command {
        let mut command = Command::new(&self.slangc);
        command
            .arg(input)
            .args(["-target", "spirv", "-profile", options.profile.as_str()])
            .args(["-entry", options.entry_point.as_str()])
            .args(["-stage", options.stage.as_str()])
            .arg(options.optimization.flag());
        for (name, value) in &options.defines {
            if value.is_empty() {
                command.arg(format!("-D{name}"));
            } else {
                command.arg(format!("-D{name}={value}"));
            }
        }
        if options.debug_info {
            command.arg("-g");
        }
        if options.warnings_as_errors {
            command.args(["-warnings-as-errors", "all"]);
        }
        command
            .arg("-o")
            .arg(output)
            .arg("-reflection-json")
            .arg(reflection);
        command
    }
}

impl ShaderCompiler for SlangCompiler {
    #[inline]
    fn compile(
        &self,
        source: &ShaderSource,
        options: &CompileOptions,
    ) -> Result<CompileOutput, CompileError> {
        let staging = tempfile::Builder::new().prefix("slang-compile").tempdir()?;
        let file_name = source
            .path
            .file_name()
            .map_or_else(|| "shader.slang".into(), ToOwned::to_owned);
        let input = staging.path().join(file_name);
        let output = staging.path().join("module.spv");
        let reflection = staging.path().join("module.json");
        fs::write(&input, &source.flattened)?;

        log::debug!(
            "compiling `{}` entry `{}` ({}, {})",
            source.path.display(),
            options.entry_point,
            options.stage,
            options.profile
        );
        let command = self.command(&input, &output, &reflection, options);
        let (command, result) = run_command(command)?;

        let mut printed = String::from_utf8_lossy(&result.stderr).into_owned();
        printed.push_str(&String::from_utf8_lossy(&result.stdout));
        let mut diagnostics = parse_slangc_output(&printed);
        remap_locations(&mut diagnostics, &input, source);

        if diagnostics.has_errors() {
            return Err(CompileError::Diagnostics(diagnostics));
        }
        if !result.status.success() {
            return Err(CommandExecError::exec_fail(command, result).into());
        }

        let payload = fs::read(&output)?;
        validate_spirv(&payload).map_err(|reason| CompileError::InvalidOutput { reason })?;
        let entry_point = match fs::read_to_string(&reflection) {
            Ok(json) => parse_reflection(&json, &options.entry_point, options.stage)?,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                log::warn!("`{}` wrote no reflection", self.slangc.display());
                EntryPoint::new(options.entry_point.as_str(), options.stage)
            }
            Err(err) => return Err(err.into()),
        };

        let warnings: Vec<Diagnostic> = diagnostics
            .0
            .into_iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Warning)
            .collect();
        for warning in &warnings {
            log::warn!("{warning}");
        }
        let mut compiled = CompileOutput::new(payload, entry_point);
        compiled.warnings = warnings;
        Ok(compiled)
    }
}

/// Points diagnostics reported against the staged file back to the original files.
///
/// `#line` markers already make `slangc` report original paths; this covers
/// locations that still refer to the staged copy.
fn remap_locations(diagnostics: &mut Diagnostics, staged: &Path, source: &ShaderSource) {
    for location in diagnostics
        .0
        .iter_mut()
        .filter_map(|diagnostic| diagnostic.location.as_mut())
    {
        if location.file != staged {
            continue;
        }
        if let Some((file, line)) = source.line_map.origin(location.line) {
            *location = Location::new(file, line, location.column);
        } else {
            location.file.clone_from(&source.path);
        }
    }
}
