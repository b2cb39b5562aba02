//! Background work: a worker pool and handles to the results of its tasks.

use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

/// An error indicating that a task ended without producing a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum TaskError {
    /// The task panicked or the pool was torn down before it ran.
    #[error("background task panicked or was dropped")]
    Lost,
}

/// Handle to the result of a background task.
///
/// Can be polled from a thread that must not block, or waited on.
#[derive(Debug)]
pub struct Task<T> {
    /// Receives the result once.
    receiver: flume::Receiver<T>,
    /// The result, once received.
    result: Option<Result<T, TaskError>>,
}

impl<T> Task<T> {
    /// Checks for the result without blocking.
    #[inline]
    pub fn poll(&mut self) -> Option<&Result<T, TaskError>> {
        if self.result.is_none() {
            match self.receiver.try_recv() {
                Ok(value) => self.result = Some(Ok(value)),
                Err(flume::TryRecvError::Disconnected) => self.result = Some(Err(TaskError::Lost)),
                Err(flume::TryRecvError::Empty) => return None,
            }
        }
        self.result.as_ref()
    }

    /// Whether the task has finished.
    #[inline]
    pub fn is_finished(&mut self) -> bool {
        self.poll().is_some()
    }

    /// Blocks until the task finishes.
    ///
    /// # Errors
    ///
    /// Fails if the task panicked.
    #[inline]
    pub fn wait(self) -> Result<T, TaskError> {
        match self.result {
            Some(result) => result,
            None => self.receiver.recv().map_err(|_err| TaskError::Lost),
        }
    }
}

/// Counts tasks in flight so callers can wait for the pool to drain.
#[derive(Debug, Default)]
struct Outstanding {
    /// Number of queued or running tasks.
    count: Mutex<usize>,
    /// Signalled when `count` drops to zero.
    idle: Condvar,
}

/// Decrements [`Outstanding`] when a task ends, even by panicking.
struct OutstandingGuard(Arc<Outstanding>);

impl Drop for OutstandingGuard {
    #[inline]
    fn drop(&mut self) {
        let mut count = self.0.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.0.idle.notify_all();
        }
    }
}

/// A pool of worker threads compiling shaders and building pipelines.
#[derive(Debug)]
pub struct WorkerPool {
    /// The threads.
    pool: rayon::ThreadPool,
    /// Tasks in flight.
    outstanding: Arc<Outstanding>,
}

impl WorkerPool {
    /// Starts a pool with `threads` workers, or one per core if `None`.
    ///
    /// # Errors
    ///
    /// Fails if the threads cannot be spawned.
    #[inline]
    pub fn new(threads: Option<usize>) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads.unwrap_or(0))
            .thread_name(|index| format!("pipeline-worker-{index}"))
            .panic_handler(|_payload| log::error!("background task panicked"))
            .build()?;
        log::debug!("started {} pipeline worker(s)", pool.current_num_threads());
        Ok(Self {
            pool,
            outstanding: Arc::new(Outstanding::default()),
        })
    }

    /// Runs `work` on a worker thread, returning a handle to its result.
    #[inline]
    pub fn spawn<T, F>(&self, work: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let (sender, receiver) = flume::bounded(1);
        self.execute(move || {
            if sender.send(work()).is_err() {
                log::trace!("result of background task dropped unread");
            }
        });
        Task {
            receiver,
            result: None,
        }
    }

    /// Runs `work` on a worker thread without keeping track of its result.
    #[inline]
    pub fn execute<F>(&self, work: F)
    where
        F: FnOnce() + Send + 'static,
    {
        *self.outstanding.count.lock() += 1;
        let guard = OutstandingGuard(Arc::clone(&self.outstanding));
        self.pool.spawn(move || {
            let _guard = guard;
            work();
        });
    }

    /// Blocks until every spawned task has finished.
    #[inline]
    pub fn wait_idle(&self) {
        let mut count = self.outstanding.count.lock();
        while *count > 0 {
            self.outstanding.idle.wait(&mut count);
        }
    }

    /// Number of tasks queued or running.
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        *self.outstanding.count.lock()
    }

    /// Number of worker threads.
    #[inline]
    #[must_use]
    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test_log::test]
    fn tasks_can_be_polled_and_awaited() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let (release, gate) = flume::bounded::<()>(0);
        let mut task = pool.spawn(move || {
            gate.recv().unwrap();
            21 * 2
        });

        assert!(task.poll().is_none());
        release.send(()).unwrap();
        assert_eq!(task.wait(), Ok(42));
        pool.wait_idle();
        assert_eq!(pool.outstanding(), 0);
    }

    #[test_log::test]
    fn panicking_task_is_lost() {
        let pool = WorkerPool::new(Some(1)).unwrap();
        let task = pool.spawn(|| -> u32 { panic!("boom") });
        assert_eq!(task.wait(), Err(TaskError::Lost));
        pool.wait_idle();
        assert_eq!(pool.threads(), 1);
    }
}
