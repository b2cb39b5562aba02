//! The in-memory cache of compiled modules.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{
    coalesce::{CoalescingMap, Lookup, Origin},
    compiler::{CompileError, ShaderCompiler},
    disk::DiskModuleCache,
    fingerprint::CompileFingerprint,
    module::{CompileOutput, CompiledModule},
    options::CompileOptions,
    source::ShaderSource,
};

/// A shared compilation result.
pub type ModuleResult = Result<Arc<CompiledModule>, Arc<CompileError>>;

/// Counters describing the traffic of a [`ModuleCache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[non_exhaustive]
pub struct CacheStats {
    /// Requests answered without compiling, including requests that joined an
    /// in-flight compilation.
    pub hits: u64,
    /// Requests that had to produce the module.
    pub misses: u64,
    /// Compiler invocations.
    pub compilations: u64,
    /// Modules loaded from the disk cache instead of compiling.
    pub disk_loads: u64,
    /// Modules dropped to stay within capacity.
    pub evictions: u64,
    /// Compilations that failed.
    pub failures: u64,
}

/// Atomic backing of [`CacheStats`].
#[derive(Debug, Default)]
struct Counters {
    /// See [`CacheStats::hits`].
    hits: AtomicU64,
    /// See [`CacheStats::misses`].
    misses: AtomicU64,
    /// See [`CacheStats::compilations`].
    compilations: AtomicU64,
    /// See [`CacheStats::disk_loads`].
    disk_loads: AtomicU64,
    /// See [`CacheStats::evictions`].
    evictions: AtomicU64,
    /// See [`CacheStats::failures`].
    failures: AtomicU64,
}

/// Increments a counter.
fn bump(counter: &AtomicU64, by: u64) {
    counter.fetch_add(by, Ordering::Relaxed);
}

/// Maps compile fingerprints to compiled modules.
///
/// Every fingerprint is compiled at most once at a time: concurrent requests wait for
/// the running compilation and share its result. Failures are remembered as well and
/// are only retried after [`invalidate`](Self::invalidate).
#[derive(Debug)]
pub struct ModuleCache {
    /// Modules and failures by fingerprint.
    slots: CoalescingMap<CompileFingerprint, Arc<CompiledModule>, Arc<CompileError>>,
    /// Maximum number of settled entries, unbounded if `None`.
    capacity: Option<usize>,
    /// Optional persistence.
    disk: Option<DiskModuleCache>,
    /// Traffic counters.
    counters: Counters,
}

impl Default for ModuleCache {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl ModuleCache {
    /// Creates an unbounded cache without persistence.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: CoalescingMap::new(|| Arc::new(CompileError::Panicked)),
            capacity: None,
            disk: None,
            counters: Counters::default(),
        }
    }

    /// Limits the number of kept entries, evicting the least recently used first.
    #[inline]
    #[must_use]
    pub fn capacity(self, capacity: Option<usize>) -> Self {
        Self { capacity, ..self }
    }

    /// Persists modules in `disk` and looks there before compiling.
    #[inline]
    #[must_use]
    pub fn disk(self, disk: Option<DiskModuleCache>) -> Self {
        Self { disk, ..self }
    }

    /// Returns the module for `fingerprint`, running `compile` if it is not cached.
    ///
    /// Blocks while another thread compiles the same fingerprint.
    ///
    /// # Errors
    ///
    /// Returns the (possibly cached) compilation failure.
    #[inline]
    pub fn get_or_compile<F>(&self, fingerprint: CompileFingerprint, compile: F) -> ModuleResult
    where
        F: FnOnce() -> Result<CompileOutput, CompileError>,
    {
        let Lookup { result, origin } = self.slots.get_or_compute(&fingerprint, || {
            self.produce(fingerprint, compile)
        });

        match origin {
            Origin::Hit | Origin::Joined { .. } => {
                bump(&self.counters.hits, 1);
                log::trace!("module {} served from cache", fingerprint.short());
            }
            Origin::Computed { retained } => {
                bump(&self.counters.misses, 1);
                if !retained {
                    log::debug!(
                        "module {} was invalidated while compiling, not keeping it",
                        fingerprint.short()
                    );
                }
                if let Some(capacity) = self.capacity {
                    let evicted = self.slots.evict_to(capacity);
                    if !evicted.is_empty() {
                        log::debug!("evicted {} module(s)", evicted.len());
                        bump(
                            &self.counters.evictions,
                            u64::try_from(evicted.len()).unwrap_or(u64::MAX),
                        );
                    }
                }
            }
        }
        result
    }

    /// Loads from disk or compiles, then persists.
    fn produce<F>(&self, fingerprint: CompileFingerprint, compile: F) -> ModuleResult
    where
        F: FnOnce() -> Result<CompileOutput, CompileError>,
    {
        if let Some(output) = self.disk.as_ref().and_then(|disk| disk.load(fingerprint)) {
            bump(&self.counters.disk_loads, 1);
            return Ok(Arc::new(CompiledModule::new(fingerprint, output)));
        }

        bump(&self.counters.compilations, 1);
        let output = compile().map_err(|err| {
            bump(&self.counters.failures, 1);
            log::debug!("module {} failed to compile", fingerprint.short());
            Arc::new(err)
        })?;
        let module = Arc::new(CompiledModule::new(fingerprint, output));
        log::info!(
            "compiled module {} (`{}`, {} bytes)",
            fingerprint.short(),
            module.entry_point().name,
            module.payload().len()
        );

        if let Some(disk) = &self.disk {
            if let Err(err) = disk.store(&module) {
                log::warn!("failed to persist module {}: {err}", fingerprint.short());
            }
        }
        Ok(module)
    }

    /// Compiles `source` with `options` through the cache.
    ///
    /// # Errors
    ///
    /// Returns the (possibly cached) compilation failure.
    #[inline]
    pub fn compile(
        &self,
        compiler: &dyn ShaderCompiler,
        source: &ShaderSource,
        options: &CompileOptions,
    ) -> ModuleResult {
        let fingerprint = CompileFingerprint::compute(&source.flattened, options);
        self.get_or_compile(fingerprint, || compiler.compile(source, options))
    }

    /// The settled result for `fingerprint`, never blocking and never compiling.
    ///
    /// `None` while the fingerprint is unknown or still compiling.
    #[inline]
    #[must_use]
    pub fn try_get(&self, fingerprint: CompileFingerprint) -> Option<ModuleResult> {
        self.slots.try_get(&fingerprint)
    }

    /// The cached module for `fingerprint`, if it compiled successfully.
    #[inline]
    #[must_use]
    pub fn get(&self, fingerprint: CompileFingerprint) -> Option<Arc<CompiledModule>> {
        self.try_get(fingerprint)?.ok()
    }

    /// Whether `fingerprint` is being compiled right now.
    #[inline]
    #[must_use]
    pub fn is_compiling(&self, fingerprint: CompileFingerprint) -> bool {
        self.slots.is_in_flight(&fingerprint)
    }

    /// Forgets `fingerprint`, including a cached failure and its persisted blob.
    ///
    /// A compilation in flight finishes and is handed to its waiters, but is not kept.
    /// Returns whether a module was removed.
    #[inline]
    pub fn invalidate(&self, fingerprint: CompileFingerprint) -> bool {
        let removed = self.slots.invalidate(&fingerprint).is_some();
        if let Some(disk) = &self.disk {
            if let Err(err) = disk.remove(fingerprint) {
                log::warn!("{err}");
            }
        }
        log::debug!("invalidated module {}", fingerprint.short());
        removed
    }

    /// Drops every entry from memory. Persisted blobs are kept.
    #[inline]
    pub fn clear(&self) {
        let removed = self.slots.clear();
        log::debug!("cleared {} module(s)", removed.len());
    }

    /// Every successfully compiled module currently held.
    #[inline]
    #[must_use]
    pub fn modules(&self) -> Vec<Arc<CompiledModule>> {
        self.slots
            .values()
            .into_iter()
            .map(|(_, module)| module)
            .collect()
    }

    /// Number of entries, failures included.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether the cache holds nothing.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// A snapshot of the traffic counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        CacheStats {
            hits: load(&self.counters.hits),
            misses: load(&self.counters.misses),
            compilations: load(&self.counters.compilations),
            disk_loads: load(&self.counters.disk_loads),
            evictions: load(&self.counters.evictions),
            failures: load(&self.counters.failures),
        }
    }
}
