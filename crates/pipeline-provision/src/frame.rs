//! Frame bookkeeping and deferred destruction of retired pipelines.

use core::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::{backend::GraphicsBackend, builder::PipelineObject};

/// Counts frames submitted and frames the GPU has finished.
///
/// Frame numbers start at 1; `0` means "no frame".
#[derive(Debug, Default)]
pub struct FrameTracker {
    /// Newest frame begun.
    current: AtomicU64,
    /// Newest frame whose GPU work is done.
    completed: AtomicU64,
}

impl FrameTracker {
    /// Starts a new frame, returning its number.
    #[inline]
    pub fn begin(&self) -> u64 {
        self.current.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Records that the GPU finished `frame` and every frame before it.
    #[inline]
    pub fn complete(&self, frame: u64) {
        self.completed.fetch_max(frame, Ordering::AcqRel);
    }

    /// Newest frame begun.
    #[inline]
    #[must_use]
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }

    /// Newest frame completed.
    #[inline]
    #[must_use]
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Acquire)
    }
}

/// Pipelines that left the cache and wait until the GPU no longer uses them.
#[derive(Debug, Default)]
pub struct RetireQueue {
    /// Retired pipelines, oldest first.
    pending: Mutex<Vec<Arc<PipelineObject>>>,
}

impl RetireQueue {
    /// Queues `pipeline` for destruction.
    #[inline]
    pub fn retire(&self, pipeline: Arc<PipelineObject>) {
        log::trace!(
            "retiring pipeline {} (last used in frame {})",
            pipeline.handle(),
            pipeline.last_used_frame()
        );
        let mut pending = self.pending.lock();
        if !pending.iter().any(|queued| Arc::ptr_eq(queued, &pipeline)) {
            pending.push(pipeline);
        }
    }

    /// Destroys every queued pipeline that is not used by a frame newer than
    /// `completed_frame` and not referenced outside the queue. Returns how many were destroyed.
    #[inline]
    pub fn collect(&self, backend: &dyn GraphicsBackend, completed_frame: u64) -> usize {
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|pipeline| {
            let idle =
                pipeline.last_used_frame() <= completed_frame && Arc::strong_count(pipeline) == 1;
            if idle {
                backend.destroy_pipeline(pipeline.handle());
            }
            !idle
        });
        let destroyed = before - pending.len();
        if destroyed > 0 {
            log::debug!(
                "destroyed {destroyed} retired pipeline(s), {} still pending",
                pending.len()
            );
        }
        destroyed
    }

    /// Destroys every queued pipeline regardless of frames, for shutdown once the
    /// device is idle. Pipelines still referenced elsewhere are destroyed as well.
    #[inline]
    pub fn destroy_all(&self, backend: &dyn GraphicsBackend) -> usize {
        let drained: Vec<_> = self.pending.lock().drain(..).collect();
        for pipeline in &drained {
            if Arc::strong_count(pipeline) > 1 {
                log::warn!(
                    "destroying pipeline {} which is still referenced",
                    pipeline.handle()
                );
            }
            backend.destroy_pipeline(pipeline.handle());
        }
        drained.len()
    }

    /// Number of pipelines waiting.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Whether nothing is waiting.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

#[cfg(test)]
mod test {
    use slang_module_cache::fingerprint::CompileFingerprint;

    use super::*;
    use crate::{
        backend::{HeadlessBackend, ObjectKind},
        builder::PipelineBuilder,
        descriptor::{FixedFunctionState, PipelineDescriptor},
    };

    fn pipeline(backend: &Arc<HeadlessBackend>) -> Arc<PipelineObject> {
        use slang_module_cache::{
            module::{CompileOutput, CompiledModule, EntryPoint, SPIRV_MAGIC},
            options::ShaderStage,
        };

        let mut payload = SPIRV_MAGIC.to_le_bytes().to_vec();
        payload.extend_from_slice(&[0; 16]);
        let module = Arc::new(CompiledModule::new(
            CompileFingerprint(1),
            CompileOutput::new(payload, EntryPoint::new("main", ShaderStage::Compute)),
        ));
        let descriptor = PipelineDescriptor::new(FixedFunctionState::default())
            .stage(ShaderStage::Compute, CompileFingerprint(1));
        Arc::new(
            PipelineBuilder::new(backend.clone())
                .build(&descriptor, |_| Some(Ok(module.clone())))
                .unwrap(),
        )
    }

    #[test_log::test]
    fn frames_count_up() {
        let frames = FrameTracker::default();
        assert_eq!(frames.begin(), 1);
        assert_eq!(frames.begin(), 2);
        frames.complete(2);
        frames.complete(1);
        assert_eq!(frames.completed(), 2);
        assert_eq!(frames.current(), 2);
    }

    #[test_log::test]
    fn destruction_waits_for_frame_completion() {
        let backend = Arc::new(HeadlessBackend::new());
        let queue = RetireQueue::default();
        let pipeline = pipeline(&backend);
        pipeline.mark_used(5);
        let handle = pipeline.handle();
        queue.retire(pipeline);

        assert_eq!(queue.collect(&*backend, 4), 0);
        assert!(backend.is_live(handle));
        assert_eq!(queue.collect(&*backend, 5), 1);
        assert!(!backend.is_live(handle));
        assert!(queue.is_empty());
    }

    #[test_log::test]
    fn destruction_waits_for_outstanding_references() {
        let backend = Arc::new(HeadlessBackend::new());
        let queue = RetireQueue::default();
        let pipeline = pipeline(&backend);
        queue.retire(pipeline.clone());
        queue.retire(pipeline.clone());
        assert_eq!(queue.len(), 1);

        assert_eq!(queue.collect(&*backend, 10), 0);
        drop(pipeline);
        assert_eq!(queue.collect(&*backend, 10), 1);
        assert_eq!(backend.live(ObjectKind::Pipeline), 0);
    }
}
