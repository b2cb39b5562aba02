//! The cache of built pipelines.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use slang_module_cache::{
    coalesce::{CoalescingMap, Origin},
    fingerprint::CompileFingerprint,
};

use crate::{
    backend::GraphicsBackend,
    builder::{BuildError, PipelineObject},
    descriptor::{PipelineDescriptor, PipelineFingerprint},
    frame::RetireQueue,
};

/// A shared build result.
pub type BuildResult = Result<Arc<PipelineObject>, Arc<BuildError>>;

/// How many times a lookup builds a pipeline that keeps going stale while it is built.
const MAX_ATTEMPTS: u32 = 3;

/// Counters describing the traffic of a [`PipelineCache`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[non_exhaustive]
pub struct PipelineCacheStats {
    /// Lookups answered by an existing pipeline.
    pub hits: u64,
    /// Pipelines built.
    pub builds: u64,
    /// Builds that failed.
    pub failures: u64,
    /// Pipelines removed because a module they use was invalidated.
    pub invalidations: u64,
    /// Pipelines removed to stay within capacity.
    pub evictions: u64,
}

/// Atomic backing of [`PipelineCacheStats`].
#[derive(Debug, Default)]
struct Counters {
    /// See [`PipelineCacheStats::hits`].
    hits: AtomicU64,
    /// See [`PipelineCacheStats::builds`].
    builds: AtomicU64,
    /// See [`PipelineCacheStats::failures`].
    failures: AtomicU64,
    /// See [`PipelineCacheStats::invalidations`].
    invalidations: AtomicU64,
    /// See [`PipelineCacheStats::evictions`].
    evictions: AtomicU64,
}

/// Increments a counter.
fn bump(counter: &AtomicU64, by: usize) {
    counter.fetch_add(u64::try_from(by).unwrap_or(u64::MAX), Ordering::Relaxed);
}

/// Lookups in progress for one pipeline fingerprint.
#[derive(Debug)]
struct Building {
    /// Modules of the pipeline.
    modules: Vec<CompileFingerprint>,
    /// Number of lookups.
    lookups: usize,
}

/// Maps pipeline fingerprints to pipelines.
///
/// Builds are coalesced per fingerprint like modules are. Unlike modules, failed builds
/// are not remembered: the next request builds again.
///
/// Pipelines leaving the cache are never destroyed on the spot. They are queued and
/// destroyed by [`collect_garbage`](Self::collect_garbage) once no frame uses them.
#[derive(Debug)]
pub struct PipelineCache {
    /// Pipelines by fingerprint.
    slots: CoalescingMap<PipelineFingerprint, Arc<PipelineObject>, Arc<BuildError>>,
    /// Lookups in progress, so that invalidation can reach builds not finished yet.
    /// Entries go away with the last lookup.
    building: Mutex<FxHashMap<PipelineFingerprint, Building>>,
    /// Pipelines waiting for destruction.
    retired: RetireQueue,
    /// Maximum number of pipelines, unbounded if `None`.
    capacity: Option<usize>,
    /// Traffic counters.
    counters: Counters,
}

/// Unregisters a lookup from [`PipelineCache::building`] when dropped.
struct LookupGuard<'cache> {
    /// The cache.
    cache: &'cache PipelineCache,
    /// The pipeline looked up.
    fingerprint: PipelineFingerprint,
}

impl Drop for LookupGuard<'_> {
    #[inline]
    fn drop(&mut self) {
        let mut building = self.cache.building.lock();
        if let Some(entry) = building.get_mut(&self.fingerprint) {
            entry.lookups -= 1;
            if entry.lookups == 0 {
                building.remove(&self.fingerprint);
            }
        }
    }
}

impl Default for PipelineCache {
    #[inline]
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineCache {
    /// Creates an unbounded pipeline cache.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: CoalescingMap::new(|| Arc::new(BuildError::Panicked)),
            building: Mutex::new(FxHashMap::default()),
            retired: RetireQueue::default(),
            capacity: None,
            counters: Counters::default(),
        }
    }

    /// Limits the number of pipelines, evicting the least recently used first.
    #[inline]
    #[must_use]
    pub fn capacity(self, capacity: Option<usize>) -> Self {
        Self { capacity, ..self }
    }

    /// Registers a lookup of `descriptor` until the guard is dropped.
    fn register(&self, descriptor: &PipelineDescriptor) -> LookupGuard<'_> {
        let fingerprint = descriptor.fingerprint();
        self.building
            .lock()
            .entry(fingerprint)
            .or_insert_with(|| Building {
                modules: descriptor.stages().iter().map(|stage| stage.module).collect(),
                lookups: 0,
            })
            .lookups += 1;
        LookupGuard {
            cache: self,
            fingerprint,
        }
    }

    /// Returns the pipeline for `descriptor`, running `build` if there is none.
    ///
    /// Blocks while another thread builds the same descriptor. A pipeline whose modules
    /// were invalidated while it was built is retired and built again, so the result
    /// never uses a module invalidated before this call returns.
    ///
    /// # Errors
    ///
    /// Returns the build failure, shared with every caller that waited for the same build,
    /// or [`BuildError::Superseded`] if the modules keep being invalidated.
    #[inline]
    pub fn get_or_build<F>(&self, descriptor: &PipelineDescriptor, build: F) -> BuildResult
    where
        F: Fn(&PipelineDescriptor) -> Result<PipelineObject, BuildError>,
    {
        let fingerprint = descriptor.fingerprint();
        let _registered = self.register(descriptor);
        for _ in 0..MAX_ATTEMPTS {
            let lookup = self.slots.get_or_compute(&fingerprint, || {
                bump(&self.counters.builds, 1);
                build(descriptor).map(Arc::new).map_err(Arc::new)
            });

            let pipeline = match lookup.result {
                Ok(pipeline) => pipeline,
                Err(err) => {
                    if let Origin::Computed { retained } = lookup.origin {
                        bump(&self.counters.failures, 1);
                        if retained {
                            self.slots.forget_failure(&fingerprint);
                        }
                        log::debug!("pipeline `{}` failed to build: {err}", descriptor.name());
                    }
                    return Err(err);
                }
            };

            match lookup.origin {
                Origin::Hit | Origin::Joined { retained: true } => {
                    bump(&self.counters.hits, 1);
                    return Ok(pipeline);
                }
                Origin::Computed { retained: true } => {
                    self.evict_over_capacity();
                    return Ok(pipeline);
                }
                Origin::Computed { retained: false } => {
                    log::debug!(
                        "pipeline `{}` was invalidated while building, rebuilding",
                        descriptor.name()
                    );
                    self.retired.retire(pipeline);
                }
                Origin::Joined { retained: false } => log::debug!(
                    "pipeline `{}` was invalidated while waiting for it, rebuilding",
                    descriptor.name()
                ),
            }
        }

        bump(&self.counters.failures, 1);
        log::warn!(
            "pipeline `{}` went stale {MAX_ATTEMPTS} times in a row while building",
            descriptor.name()
        );
        Err(Arc::new(BuildError::Superseded {
            attempts: MAX_ATTEMPTS,
        }))
    }

    /// The current pipeline for `fingerprint`, never blocking and never building.
    #[inline]
    #[must_use]
    pub fn try_get(&self, fingerprint: PipelineFingerprint) -> Option<Arc<PipelineObject>> {
        self.slots.try_get(&fingerprint)?.ok()
    }

    /// Removes every pipeline using `module` and makes sure pipelines still being built
    /// from it are not kept. Returns how many built pipelines were removed.
    #[inline]
    pub fn invalidate(&self, module: CompileFingerprint) -> usize {
        let building: Vec<PipelineFingerprint> = self
            .building
            .lock()
            .iter()
            .filter(|(_, entry)| entry.modules.contains(&module))
            .map(|(fingerprint, _)| *fingerprint)
            .collect();
        let removed = self.slots.invalidate_matching(
            |_, pipeline| pipeline.descriptor().uses(module),
            |fingerprint| building.contains(fingerprint),
        );
        let mut count = 0;
        for pipeline in removed.into_iter().filter_map(|(_, pipeline)| pipeline) {
            log::debug!("invalidated pipeline `{}`", pipeline.descriptor().name());
            self.retired.retire(pipeline);
            count += 1;
        }
        bump(&self.counters.invalidations, count);
        count
    }

    /// Retires least recently used pipelines over capacity.
    fn evict_over_capacity(&self) {
        let Some(capacity) = self.capacity else {
            return;
        };
        let evicted = self.slots.evict_to(capacity);
        bump(&self.counters.evictions, evicted.len());
        for (_, pipeline) in evicted {
            log::debug!("evicted pipeline `{}`", pipeline.descriptor().name());
            self.retired.retire(pipeline);
        }
    }

    /// Destroys retired pipelines the GPU is done with.
    ///
    /// Must be called from the thread owning the GPU context, after the fence of
    /// `completed_frame` signalled.
    #[inline]
    pub fn collect_garbage(&self, backend: &dyn GraphicsBackend, completed_frame: u64) -> usize {
        self.retired.collect(backend, completed_frame)
    }

    /// Retires every pipeline.
    #[inline]
    pub fn clear(&self) {
        for (_, pipeline) in self.slots.clear() {
            self.retired.retire(pipeline);
        }
    }

    /// Retires every pipeline and destroys all retired pipelines at once.
    /// The device must be idle.
    #[inline]
    pub fn destroy_all(&self, backend: &dyn GraphicsBackend) -> usize {
        self.clear();
        self.retired.destroy_all(backend)
    }

    /// Every pipeline currently held.
    #[inline]
    #[must_use]
    pub fn pipelines(&self) -> Vec<Arc<PipelineObject>> {
        self.slots
            .values()
            .into_iter()
            .map(|(_, pipeline)| pipeline)
            .collect()
    }

    /// Number of pipelines held or being built.
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

    /// Number of pipelines waiting for destruction.
    #[inline]
    #[must_use]
    pub fn retired_len(&self) -> usize {
        self.retired.len()
    }

    /// A snapshot of the traffic counters.
    #[inline]
    #[must_use]
    pub fn stats(&self) -> PipelineCacheStats {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        PipelineCacheStats {
            hits: load(&self.counters.hits),
            builds: load(&self.counters.builds),
            failures: load(&self.counters.failures),
            invalidations: load(&self.counters.invalidations),
            evictions: load(&self.counters.evictions),
        }
    }
}

#[cfg(test)]
mod test {
    use slang_module_cache::{
        module::{CompileOutput, CompiledModule, EntryPoint, SPIRV_MAGIC},
        options::ShaderStage,
    };

    use super::*;
    use crate::{
        backend::{GpuAllocationError, HeadlessBackend, ObjectKind},
        builder::PipelineBuilder,
        descriptor::FixedFunctionState,
    };

    fn compute(module: u128) -> PipelineDescriptor {
        PipelineDescriptor::new(FixedFunctionState::default())
            .stage(ShaderStage::Compute, CompileFingerprint(module))
    }

    fn builder(
        backend: &Arc<HeadlessBackend>,
    ) -> impl Fn(&PipelineDescriptor) -> Result<PipelineObject, BuildError> {
        let builder = PipelineBuilder::new(backend.clone());
        move |descriptor| {
            builder.build(descriptor, |fingerprint| {
                let mut payload = SPIRV_MAGIC.to_le_bytes().to_vec();
                payload.extend_from_slice(&[0; 16]);
                Some(Ok(Arc::new(CompiledModule::new(
                    fingerprint,
                    CompileOutput::new(payload, EntryPoint::new("main", ShaderStage::Compute)),
                ))))
            })
        }
    }

    #[test_log::test]
    fn second_lookup_is_a_hit() {
        let backend = Arc::new(HeadlessBackend::new());
        let cache = PipelineCache::new();
        let first = cache.get_or_build(&compute(1), builder(&backend)).unwrap();
        let second = cache.get_or_build(&compute(1), builder(&backend)).unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(cache.stats().builds, 1);
        assert_eq!(cache.stats().hits, 1);
        assert!(cache.try_get(compute(1).fingerprint()).is_some());
    }

    #[test_log::test]
    fn invalidating_a_module_removes_its_pipelines_only() {
        let backend = Arc::new(HeadlessBackend::new());
        let cache = PipelineCache::new();
        let old = cache.get_or_build(&compute(1), builder(&backend)).unwrap();
        cache.get_or_build(&compute(2), builder(&backend)).unwrap();

        assert_eq!(cache.invalidate(CompileFingerprint(1)), 1);
        assert!(cache.try_get(compute(1).fingerprint()).is_none());
        assert!(cache.try_get(compute(2).fingerprint()).is_some());

        let rebuilt = cache.get_or_build(&compute(1), builder(&backend)).unwrap();
        assert!(!Arc::ptr_eq(&old, &rebuilt));
        assert_eq!(cache.retired_len(), 1);

        assert_eq!(cache.collect_garbage(&*backend, 0), 0);
        drop(old);
        assert_eq!(cache.collect_garbage(&*backend, 0), 1);
        assert_eq!(backend.live(ObjectKind::Pipeline), 2);
    }

    #[test_log::test]
    fn pipeline_built_during_invalidation_is_not_served() {
        let backend = Arc::new(HeadlessBackend::new());
        let cache = PipelineCache::new();
        let build = builder(&backend);
        let builds = AtomicU64::new(0);

        let pipeline = cache
            .get_or_build(&compute(1), |descriptor| {
                if builds.fetch_add(1, Ordering::SeqCst) == 0 {
                    cache.invalidate(CompileFingerprint(1));
                }
                build(descriptor)
            })
            .unwrap();

        assert_eq!(builds.load(Ordering::SeqCst), 2);
        assert!(Arc::ptr_eq(
            &pipeline,
            &cache.try_get(compute(1).fingerprint()).unwrap()
        ));
        assert_eq!(cache.retired_len(), 1);
        assert!(cache.building.lock().is_empty());
    }

    #[test_log::test]
    fn pipeline_invalidated_during_every_build_is_an_error() {
        let backend = Arc::new(HeadlessBackend::new());
        let cache = PipelineCache::new();
        let build = builder(&backend);

        let error = cache
            .get_or_build(&compute(1), |descriptor| {
                cache.invalidate(CompileFingerprint(1));
                build(descriptor)
            })
            .unwrap_err();

        assert!(matches!(*error, BuildError::Superseded { attempts: MAX_ATTEMPTS }));
        assert!(cache.is_empty());
        assert!(cache.try_get(compute(1).fingerprint()).is_none());
        assert_eq!(cache.retired_len(), 3);
        assert_eq!(cache.stats().builds, 3);
        assert_eq!(cache.stats().failures, 1);
        assert!(cache.building.lock().is_empty());
    }

    #[test_log::test]
    fn concurrent_requests_build_once() {
        const THREADS: usize = 8;

        let backend = Arc::new(HeadlessBackend::new());
        let cache = PipelineCache::new();
        let build = builder(&backend);
        let start = std::sync::Barrier::new(THREADS);

        let pipelines: Vec<Arc<PipelineObject>> = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..THREADS)
                .map(|_| {
                    scope.spawn(|| {
                        start.wait();
                        cache.get_or_build(&compute(1), |descriptor| {
                            std::thread::sleep(core::time::Duration::from_millis(50));
                            build(descriptor)
                        })
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap().unwrap())
                .collect()
        });

        assert_eq!(cache.stats().builds, 1);
        assert_eq!(cache.stats().hits, 7);
        assert_eq!(backend.pipelines_created(), 1);
        assert!(pipelines.iter().all(|pipeline| Arc::ptr_eq(pipeline, &pipelines[0])));
        assert!(cache.building.lock().is_empty());
    }

    #[test_log::test]
    fn failed_builds_are_not_cached() {
        let cache = PipelineCache::new();
        let error = cache
            .get_or_build(&compute(1), |_| Err(BuildError::Gpu(GpuAllocationError::DeviceLost)))
            .unwrap_err();
        assert!(matches!(*error, BuildError::Gpu(_)));
        assert!(cache.is_empty());

        let backend = Arc::new(HeadlessBackend::new());
        assert!(cache.get_or_build(&compute(1), builder(&backend)).is_ok());
        assert_eq!(cache.stats().failures, 1);
    }

    #[test_log::test]
    fn eviction_retires_least_recently_used() {
        let backend = Arc::new(HeadlessBackend::new());
        let cache = PipelineCache::new().capacity(Some(1));
        drop(cache.get_or_build(&compute(1), builder(&backend)).unwrap());
        drop(cache.get_or_build(&compute(2), builder(&backend)).unwrap());

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 1);
        assert_eq!(cache.collect_garbage(&*backend, 0), 1);
        assert_eq!(cache.destroy_all(&*backend), 1);
        assert_eq!(backend.live_total(), 0);
    }
}
