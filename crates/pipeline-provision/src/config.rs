//! Settings of a [`Provisioner`](crate::provisioner::Provisioner).

use std::path::{Path, PathBuf};

use slang_module_cache::{
    disk::{DiskCacheError, DiskModuleCache},
    options::DEFAULT_PROFILE,
};

/// An error indicating that a configuration file could not be loaded.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file `{path}`: {source}")]
    Read {
        /// The file.
        path: PathBuf,
        /// Source of the error.
        source: std::io::Error,
    },
    /// The file is not valid TOML or does not describe a configuration.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How shaders are found and compiled, and how much is cached.
///
/// Every field has a default, so a TOML file only needs to mention what it changes:
///
/// ```toml
/// include-dirs = ["shaders/common"]
/// module-cache-capacity = 256
/// disk-cache = true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[cfg_attr(feature = "clap", derive(clap::Parser))]
#[serde(default, rename_all = "kebab-case")]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "it is intended")]
pub struct ProvisionConfig {
    /// Directories searched for `#include`s after the including file's directory.
    #[cfg_attr(feature = "clap", clap(long = "include-dir", short = 'I'))]
    pub include_dirs: Vec<PathBuf>,

    /// The `slangc` executable.
    #[cfg_attr(feature = "clap", clap(long, default_value = "slangc"))]
    pub slangc: PathBuf,

    /// Profile of shaders requested without an explicit one.
    #[cfg_attr(feature = "clap", clap(long, default_value = DEFAULT_PROFILE))]
    pub profile: String,

    /// Maximum number of compiled modules kept in memory, unbounded if unset.
    #[cfg_attr(feature = "clap", clap(long))]
    pub module_cache_capacity: Option<usize>,

    /// Maximum number of pipelines kept alive, unbounded if unset.
    #[cfg_attr(feature = "clap", clap(long))]
    pub pipeline_cache_capacity: Option<usize>,

    /// Persist compiled modules on disk across runs.
    #[cfg_attr(feature = "clap", clap(long))]
    pub disk_cache: bool,

    /// Where modules are persisted, defaults to the user cache directory.
    #[cfg_attr(feature = "clap", clap(long))]
    pub disk_cache_dir: Option<PathBuf>,

    /// Number of compile and build threads, one per core if unset.
    #[cfg_attr(feature = "clap", clap(long))]
    pub worker_threads: Option<usize>,
}

impl Default for ProvisionConfig {
    #[inline]
    fn default() -> Self {
        Self {
            include_dirs: Vec::new(),
            slangc: PathBuf::from("slangc"),
            profile: DEFAULT_PROFILE.to_owned(),
            module_cache_capacity: None,
            pipeline_cache_capacity: None,
            disk_cache: false,
            disk_cache_dir: None,
            worker_threads: None,
        }
    }
}

impl ProvisionConfig {
    /// Parses a configuration from TOML.
    ///
    /// # Errors
    ///
    /// Fails on invalid TOML or unknown value types.
    #[inline]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Fails if the file can not be read or parsed.
    #[inline]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&text)?;
        log::debug!("loaded config from `{}`", path.display());
        Ok(config)
    }

    /// Adds an include directory.
    #[inline]
    #[must_use]
    pub fn include_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.include_dirs.push(dir.into());
        self
    }

    /// Sets the `slangc` executable.
    #[inline]
    #[must_use]
    pub fn slangc(self, slangc: impl Into<PathBuf>) -> Self {
        Self {
            slangc: slangc.into(),
            ..self
        }
    }

    /// Sets the default profile.
    #[inline]
    #[must_use]
    pub fn profile(self, profile: impl Into<String>) -> Self {
        Self {
            profile: profile.into(),
            ..self
        }
    }

    /// Limits the number of compiled modules kept in memory.
    #[inline]
    #[must_use]
    pub fn module_cache_capacity(self, module_cache_capacity: Option<usize>) -> Self {
        Self {
            module_cache_capacity,
            ..self
        }
    }

    /// Limits the number of pipelines kept alive.
    #[inline]
    #[must_use]
    pub fn pipeline_cache_capacity(self, pipeline_cache_capacity: Option<usize>) -> Self {
        Self {
            pipeline_cache_capacity,
            ..self
        }
    }

    /// Persists modules in `dir`, or in the user cache directory if `None`.
    #[inline]
    #[must_use]
    pub fn disk_cache_in(self, dir: Option<PathBuf>) -> Self {
        Self {
            disk_cache: true,
            disk_cache_dir: dir,
            ..self
        }
    }

    /// Sets the number of worker threads.
    #[inline]
    #[must_use]
    pub fn worker_threads(self, worker_threads: Option<usize>) -> Self {
        Self {
            worker_threads,
            ..self
        }
    }

    /// Opens the on-disk module cache if it is enabled.
    ///
    /// # Errors
    ///
    /// Fails if the cache directory can not be determined or created.
    #[inline]
    pub fn open_disk_cache(&self) -> Result<Option<DiskModuleCache>, DiskCacheError> {
        if !self.disk_cache {
            return Ok(None);
        }
        let disk = match &self.disk_cache_dir {
            Some(dir) => DiskModuleCache::open(dir.clone())?,
            None => DiskModuleCache::open_default()?,
        };
        log::debug!("persisting modules in `{}`", disk.dir().display());
        Ok(Some(disk))
    }
}
