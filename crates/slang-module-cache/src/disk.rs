//! Persisting compiled modules between runs.
//!
//! Each module is one file named after its fingerprint:
//!
//! ```text
//! "SMOD" | format version: u32 | fingerprint: u128 | metadata length: u32 | metadata (JSON)
//!        | payload length: u64 | payload
//! ```
//!
//! All integers are little endian. Files with another format version, a fingerprint
//! that does not match their name or a truncated body are deleted on load.

use std::{
    fs,
    io::{self, Write as _},
    path::{Path, PathBuf},
};

use crate::{
    diagnostic::Diagnostic,
    fingerprint::CompileFingerprint,
    module::{validate_spirv, CompileOutput, CompiledModule, EntryPoint},
};

/// Leading bytes of every blob.
const MAGIC: &[u8; 4] = b"SMOD";

/// Bumped whenever the blob layout or the metadata schema changes.
pub const FORMAT_VERSION: u32 = 1;

/// File extension of blobs.
const EXTENSION: &str = "smod";

/// Directory under the user's cache directory.
const APP_DIR: &str = "slang-pipelines";

/// Metadata stored next to the payload.
#[derive(serde::Serialize, serde::Deserialize)]
struct Metadata {
    /// Entry point of the module.
    entry_point: EntryPoint,
    /// Warnings from the original compilation.
    warnings: Vec<Diagnostic>,
}

/// A directory of persisted modules.
#[derive(Debug, Clone)]
pub struct DiskModuleCache {
    /// Where blobs are kept.
    dir: PathBuf,
}

impl DiskModuleCache {
    /// Opens (creating if needed) a module cache directory.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be created.
    #[inline]
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, DiskCacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|source| DiskCacheError::Io {
            path: dir.clone(),
            source,
        })?;
        log::debug!("disk module cache at `{}`", dir.display());
        Ok(Self { dir })
    }

    /// Where [`open_default`](Self::open_default) keeps modules:
    /// `slang-pipelines/modules` in the platform cache directory, such as
    /// `~/.cache` on Linux or `~/Library/Caches` on macOS.
    ///
    /// # Errors
    ///
    /// Fails if the platform has no cache directory for the current user.
    #[inline]
    pub fn default_dir() -> Result<PathBuf, DiskCacheError> {
        let base = directories::BaseDirs::new().ok_or(DiskCacheError::NoCacheDir)?;
        Ok(base.cache_dir().join(APP_DIR).join("modules"))
    }

    /// Opens the module cache in [`default_dir`](Self::default_dir).
    ///
    /// # Errors
    ///
    /// Fails if there is no cache directory or it cannot be created.
    #[inline]
    pub fn open_default() -> Result<Self, DiskCacheError> {
        Self::open(Self::default_dir()?)
    }

    /// The directory holding the blobs.
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the blob for `fingerprint`.
    #[inline]
    #[must_use]
    pub fn path_for(&self, fingerprint: CompileFingerprint) -> PathBuf {
        self.dir.join(format!("{fingerprint}.{EXTENSION}"))
    }

    /// Loads the module stored under `fingerprint`.
    ///
    /// Missing blobs give `None`; unreadable ones are logged, deleted and also give `None`,
    /// so the caller simply compiles again.
    #[inline]
    #[must_use]
    pub fn load(&self, fingerprint: CompileFingerprint) -> Option<CompileOutput> {
        let path = self.path_for(fingerprint);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return None,
            Err(err) => {
                log::warn!("failed to read `{}`: {err}", path.display());
                return None;
            }
        };

        match decode(&bytes, fingerprint) {
            Ok(output) => {
                log::trace!("loaded module {} from disk", fingerprint.short());
                Some(output)
            }
            Err(reason) => {
                log::warn!("discarding `{}`: {reason}", path.display());
                if let Err(err) = fs::remove_file(&path) {
                    log::warn!("failed to remove `{}`: {err}", path.display());
                }
                None
            }
        }
    }

    /// Persists `module`, replacing any blob stored under the same fingerprint.
    ///
    /// The blob is written to a temporary file first and then renamed into place,
    /// so a concurrent [`load`](Self::load) never sees a partial file.
    ///
    /// # Errors
    ///
    /// Fails if the blob cannot be written.
    #[inline]
    pub fn store(&self, module: &CompiledModule) -> Result<PathBuf, DiskCacheError> {
        let path = self.path_for(module.fingerprint());
        let bytes = encode(module)?;
        let io_error = |source| DiskCacheError::Io {
            path: path.clone(),
            source,
        };

        let mut file = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_error)?;
        file.write_all(&bytes).map_err(io_error)?;
        file.persist(&path)
            .map_err(|err| io_error(err.error))?;
        log::trace!(
            "stored module {} ({} bytes)",
            module.fingerprint().short(),
            bytes.len()
        );
        Ok(path)
    }

    /// Deletes the blob stored under `fingerprint`, if any.
    ///
    /// # Errors
    ///
    /// Fails if an existing blob cannot be removed.
    #[inline]
    pub fn remove(&self, fingerprint: CompileFingerprint) -> Result<bool, DiskCacheError> {
        let path = self.path_for(fingerprint);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(DiskCacheError::Io { path, source }),
        }
    }

    /// Deletes every blob.
    ///
    /// # Errors
    ///
    /// Fails if the directory cannot be listed or a blob cannot be removed.
    #[inline]
    pub fn clear(&self) -> Result<usize, DiskCacheError> {
        let io_error = |source| DiskCacheError::Io {
            path: self.dir.clone(),
            source,
        };
        let mut removed = 0;
        for entry in fs::read_dir(&self.dir).map_err(io_error)? {
            let path = entry.map_err(io_error)?.path();
            if path.extension().is_some_and(|ext| ext == EXTENSION) {
                fs::remove_file(&path).map_err(|source| DiskCacheError::Io { path, source })?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// Serializes a module into a blob.
fn encode(module: &CompiledModule) -> Result<Vec<u8>, DiskCacheError> {
    let metadata = serde_json::to_vec(&Metadata {
        entry_point: module.entry_point().clone(),
        warnings: module.warnings().to_vec(),
    })?;
    let metadata_len = u32::try_from(metadata.len()).map_err(|_err| DiskCacheError::TooLarge)?;
    let payload = module.payload();
    let payload_len = u64::try_from(payload.len()).map_err(|_err| DiskCacheError::TooLarge)?;

    let mut bytes = Vec::with_capacity(4 + 4 + 16 + 4 + metadata.len() + 8 + payload.len());
    bytes.extend_from_slice(MAGIC);
    bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    bytes.extend_from_slice(&module.fingerprint().0.to_le_bytes());
    bytes.extend_from_slice(&metadata_len.to_le_bytes());
    bytes.extend_from_slice(&metadata);
    bytes.extend_from_slice(&payload_len.to_le_bytes());
    bytes.extend_from_slice(payload);
    Ok(bytes)
}

/// Cursor over a blob.
struct Reader<'bytes> {
    /// Remaining input.
    rest: &'bytes [u8],
}

impl<'bytes> Reader<'bytes> {
    /// Takes the next `len` bytes.
    fn take(&mut self, len: usize) -> Result<&'bytes [u8], String> {
        if self.rest.len() < len {
            return Err("truncated".to_owned());
        }
        let (head, tail) = self.rest.split_at(len);
        self.rest = tail;
        Ok(head)
    }

    /// Takes the next `N` bytes as an array.
    fn array<const N: usize>(&mut self) -> Result<[u8; N], String> {
        self.take(N)?
            .try_into()
            .map_err(|_err| "truncated".to_owned())
    }
}

/// Parses a blob, checking it belongs to `expected`.
fn decode(bytes: &[u8], expected: CompileFingerprint) -> Result<CompileOutput, String> {
    let mut reader = Reader { rest: bytes };
    if reader.take(MAGIC.len())? != MAGIC {
        return Err("not a module blob".to_owned());
    }
    let version = u32::from_le_bytes(reader.array()?);
    if version != FORMAT_VERSION {
        return Err(format!(
            "format version {version}, expected {FORMAT_VERSION}"
        ));
    }
    let fingerprint = CompileFingerprint(u128::from_le_bytes(reader.array()?));
    if fingerprint != expected {
        return Err(format!("holds module {fingerprint}"));
    }

    let metadata_len = u32::from_le_bytes(reader.array()?);
    let metadata_len = usize::try_from(metadata_len).map_err(|err| err.to_string())?;
    let metadata: Metadata =
        serde_json::from_slice(reader.take(metadata_len)?).map_err(|err| err.to_string())?;

    let payload_len = u64::from_le_bytes(reader.array()?);
    let payload_len = usize::try_from(payload_len).map_err(|err| err.to_string())?;
    let payload = reader.take(payload_len)?.to_vec();
    if !reader.rest.is_empty() {
        return Err("trailing bytes".to_owned());
    }
    validate_spirv(&payload)?;

    let mut output = CompileOutput::new(payload, metadata.entry_point);
    output.warnings = metadata.warnings;
    Ok(output)
}

/// An error indicating that the disk module cache could not be used.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
#[expect(clippy::module_name_repetitions, reason = "this is intended")]
pub enum DiskCacheError {
    /// The platform has no cache directory for the current user.
    #[error("could not find the user's cache directory")]
    NoCacheDir,
    /// Reading or writing a file failed.
    #[error("I/O error at `{}`: {source}", path.display())]
    Io {
        /// The file or directory.
        path: PathBuf,
        /// Source of the error.
        source: io::Error,
    },
    /// The metadata could not be serialized.
    #[error("failed to serialize module metadata: {0}")]
    Metadata(#[from] serde_json::Error),
    /// The module does not fit the blob format.
    #[error("module is too large to persist")]
    TooLarge,
}
