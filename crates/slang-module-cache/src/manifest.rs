//! Exporting compiled modules as files, for build scripts and offline tools.
//!
//! Every exported module becomes a `<name>.spv` binary next to a `<name>.json`
//! description of its entry point. A [`ShaderManifest`] lists them all and is
//! written as `manifest.json` into the same directory.

use std::{
    fs, io,
    path::{Path, PathBuf},
};

use crate::{fingerprint::CompileFingerprint, module::CompiledModule, options::ShaderStage};

/// Name of the manifest file inside the output directory.
pub const MANIFEST_FILE: &str = "manifest.json";

/// One exported module.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[non_exhaustive]
pub struct ManifestEntry {
    /// Name the module was exported under.
    pub name: String,
    /// Entry point function.
    pub entry_point: String,
    /// Stage of the entry point.
    pub stage: ShaderStage,
    /// Fingerprint of the module, hex encoded.
    pub fingerprint: String,
    /// The SPIR-V file, relative to the manifest.
    pub module: String,
    /// The entry point description, relative to the manifest.
    pub reflection: String,
}

/// Writes `module` into `dir` as `<name>.spv` and `<name>.json`.
///
/// # Errors
///
/// Fails if a file cannot be written.
#[inline]
pub fn export_module(
    module: &CompiledModule,
    dir: &Path,
    name: &str,
) -> Result<ManifestEntry, ManifestError> {
    fs::create_dir_all(dir).map_err(|source| ManifestError::io(dir, source))?;
    let spv = format!("{name}.spv");
    let json = format!("{name}.json");

    let spv_path = dir.join(&spv);
    log::debug!("writing {}", spv_path.display());
    fs::write(&spv_path, module.payload())
        .map_err(|source| ManifestError::io(&spv_path, source))?;

    let json_path = dir.join(&json);
    let reflection = serde_json::to_string_pretty(module.entry_point())?;
    fs::write(&json_path, reflection).map_err(|source| ManifestError::io(&json_path, source))?;

    Ok(ManifestEntry {
        name: name.to_owned(),
        entry_point: module.entry_point().name.clone(),
        stage: module.stage(),
        fingerprint: module.fingerprint().to_string(),
        module: spv,
        reflection: json,
    })
}

/// Index of the modules exported into one directory.
#[derive(serde::Serialize, serde::Deserialize, Clone, Debug, Default, PartialEq, Eq)]
#[non_exhaustive]
pub struct ShaderManifest {
    /// Exported modules, sorted by name.
    pub entries: Vec<ManifestEntry>,
}

impl ShaderManifest {
    /// Adds or replaces the entry with the same name.
    #[inline]
    pub fn insert(&mut self, entry: ManifestEntry) {
        self.entries.retain(|existing| existing.name != entry.name);
        self.entries.push(entry);
        // Sort the contents so the output is deterministic
        self.entries.sort();
    }

    /// Finds the entry exported under `name`.
    #[inline]
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ManifestEntry> {
        self.entries.iter().find(|entry| entry.name == name)
    }

    /// Finds the entry of a module.
    #[inline]
    #[must_use]
    pub fn by_fingerprint(&self, fingerprint: CompileFingerprint) -> Option<&ManifestEntry> {
        let hex = fingerprint.to_string();
        self.entries.iter().find(|entry| entry.fingerprint == hex)
    }

    /// Writes the manifest into `dir`, returning its path.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be written.
    #[inline]
    pub fn write(&self, dir: &Path) -> Result<PathBuf, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        fs::write(&path, json).map_err(|source| ManifestError::io(&path, source))?;
        log::info!("wrote manifest to '{}'", path.display());
        Ok(path)
    }

    /// Reads the manifest from `dir`.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or parsed.
    #[inline]
    pub fn read(dir: &Path) -> Result<Self, ManifestError> {
        let path = dir.join(MANIFEST_FILE);
        let json = fs::read_to_string(&path).map_err(|source| ManifestError::io(&path, source))?;
        Ok(serde_json::from_str(&json)?)
    }
}

/// An error indicating that exporting modules failed.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub enum ManifestError {
    /// Reading or writing a file failed.
    #[error("could not access '{}': {source}", path.display())]
    Io {
        /// The file.
        path: PathBuf,
        /// Source of the error.
        source: io::Error,
    },
    /// JSON (de)serialization failed.
    #[error("invalid manifest json: {0}")]
    Json(#[from] serde_json::Error),
}

impl ManifestError {
    /// Creates [`Io`](ManifestError::Io) variant from given arguments.
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::module::{CompileOutput, EntryPoint, SPIRV_MAGIC};

    fn module(fingerprint: u128, entry: &str, stage: ShaderStage) -> CompiledModule {
        let mut payload = SPIRV_MAGIC.to_le_bytes().to_vec();
        payload.extend_from_slice(&[1; 16]);
        CompiledModule::new(
            CompileFingerprint(fingerprint),
            CompileOutput::new(payload, EntryPoint::new(entry, stage)),
        )
    }

    #[test_log::test]
    fn exports_modules_and_round_trips_the_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let vertex = module(1, "vertexMain", ShaderStage::Vertex);
        let fragment = module(2, "fragmentMain", ShaderStage::Fragment);

        let mut manifest = ShaderManifest::default();
        manifest.insert(export_module(&vertex, dir.path(), "sky_vs").unwrap());
        manifest.insert(export_module(&fragment, dir.path(), "sky_fs").unwrap());
        manifest.write(dir.path()).unwrap();

        assert_eq!(fs::read(dir.path().join("sky_vs.spv")).unwrap(), vertex.payload());
        let reflection: EntryPoint =
            serde_json::from_str(&fs::read_to_string(dir.path().join("sky_fs.json")).unwrap())
                .unwrap();
        assert_eq!(reflection.name, "fragmentMain");

        let read = ShaderManifest::read(dir.path()).unwrap();
        assert_eq!(read, manifest);
        assert_eq!(read.entries[0].name, "sky_fs");
        assert_eq!(
            read.by_fingerprint(CompileFingerprint(1)).unwrap().stage,
            ShaderStage::Vertex
        );
    }

    #[test_log::test]
    fn reexport_replaces_the_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mut manifest = ShaderManifest::default();
        for fingerprint in [1, 3] {
            let cull = module(fingerprint, "main", ShaderStage::Compute);
            manifest.insert(export_module(&cull, dir.path(), "cull").unwrap());
        }

        assert_eq!(manifest.entries.len(), 1);
        assert_eq!(
            manifest.get("cull").unwrap().fingerprint,
            CompileFingerprint(3).to_string()
        );
    }
}
