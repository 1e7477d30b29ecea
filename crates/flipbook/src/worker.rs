//! Dedicated decode thread.
//!
//! One worker serializes every decode job submitted to it, across however many
//! players share it. Jobs run strictly in submission order and never overlap.

use std::any::Any;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{JoinHandle, ThreadId};
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};

use crate::buffer::FrameBuffer;
use crate::error::{Error, Result, SourceError};
use crate::source::FrameSource;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Minimum-delay substitution for authored frame delays.
///
/// Many files author 0 or near-0 delays expecting viewers to slow them down;
/// anything under `min_delay_ms` is replaced with `default_delay_ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelayFloor {
    pub min_delay_ms: i64,
    pub default_delay_ms: i64,
}

impl Default for DelayFloor {
    fn default() -> Self {
        Self {
            min_delay_ms: 20,
            default_delay_ms: 100,
        }
    }
}

impl DelayFloor {
    pub fn apply(&self, authored_ms: i64) -> i64 {
        if authored_ms < self.min_delay_ms {
            self.default_delay_ms
        } else {
            authored_ms
        }
    }
}

/// One frame to decode into a buffer the caller owns for the duration.
#[derive(Debug)]
pub struct DecodeRequest {
    pub frame_index: usize,
    pub previous_frame_index: Option<usize>,
    pub target: FrameBuffer,
}

/// Timing reported for a completed decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeReport {
    pub frame_index: usize,
    /// Wall time spent inside the source.
    pub decode_ms: u64,
    pub authored_delay_ms: i64,
    /// Delay after minimum-delay substitution.
    pub delay_ms: i64,
}

/// Run one decode on the current thread. The target buffer always comes back,
/// whether the source succeeded, failed, or panicked.
pub fn run_decode(
    source: &mut dyn FrameSource,
    request: DecodeRequest,
    floor: DelayFloor,
) -> (FrameBuffer, std::result::Result<DecodeReport, SourceError>) {
    let DecodeRequest {
        frame_index,
        previous_frame_index,
        mut target,
    } = request;

    let started = Instant::now();
    let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        source.decode_frame(&mut target, frame_index, previous_frame_index)
    }));
    let decode_ms = started.elapsed().as_millis() as u64;

    let result = match outcome {
        Ok(Ok(authored)) => {
            let delay_ms = floor.apply(authored);
            if delay_ms != authored {
                log::debug!(
                    "Frame {frame_index}: authored delay {authored}ms below {}ms, using {delay_ms}ms",
                    floor.min_delay_ms
                );
            }
            Ok(DecodeReport {
                frame_index,
                decode_ms,
                authored_delay_ms: authored,
                delay_ms,
            })
        }
        Ok(Err(e)) => Err(e),
        Err(panic) => {
            let msg = panic_message(panic.as_ref());
            log::error!("Frame source panicked decoding frame {frame_index}: {msg}");
            Err(SourceError::Other(format!("decoder panicked: {msg}")))
        }
    };

    (target, result)
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".into()
    }
}

/// Owns the decode thread and its job queue.
pub struct DecodeWorker {
    job_tx: Option<Sender<Job>>,
    thread: Option<JoinHandle<()>>,
    thread_id: ThreadId,
    jobs_run: Arc<AtomicU64>,
}

impl DecodeWorker {
    /// Spawn the worker thread.
    pub fn spawn(name: &str) -> Result<Self> {
        let (job_tx, job_rx) = crossbeam_channel::unbounded::<Job>();
        let jobs_run = Arc::new(AtomicU64::new(0));
        let counter = jobs_run.clone();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || worker_loop(&job_rx, &counter))
            .map_err(|e| {
                log::error!("Failed to spawn decode thread: {e}");
                Error::WorkerUnavailable
            })?;

        log::info!("Decode worker '{name}' started");

        Ok(Self {
            job_tx: Some(job_tx),
            thread_id: handle.thread().id(),
            thread: Some(handle),
            jobs_run,
        })
    }

    /// Queue `job` behind everything already submitted.
    pub fn execute<F>(&self, job: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let tx = self.job_tx.as_ref().ok_or(Error::WorkerUnavailable)?;
        tx.send(Box::new(job)).map_err(|_| Error::WorkerUnavailable)
    }

    /// Whether the caller is running on this worker's thread.
    pub fn is_worker_thread(&self) -> bool {
        std::thread::current().id() == self.thread_id
    }

    pub fn is_running(&self) -> bool {
        match &self.thread {
            Some(h) => !h.is_finished(),
            None => false,
        }
    }

    /// Number of jobs that have finished running.
    pub fn jobs_run(&self) -> u64 {
        self.jobs_run.load(Ordering::SeqCst)
    }

    /// Close the queue and wait for queued jobs to drain.
    pub fn shutdown(&mut self) {
        self.job_tx.take();
        if let Some(handle) = self.thread.take() {
            if self.is_worker_thread() {
                // Dropped from one of our own jobs; the loop exits on its own.
                return;
            }
            if handle.join().is_err() {
                log::error!("Decode thread exited with a panic");
            }
        }
    }
}

impl Drop for DecodeWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(job_rx: &Receiver<Job>, jobs_run: &AtomicU64) {
    while let Ok(job) = job_rx.recv() {
        if let Err(panic) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job)) {
            log::error!("Decode job panicked: {}", panic_message(panic.as_ref()));
        }
        jobs_run.fetch_add(1, Ordering::SeqCst);
    }
    log::info!("Decode worker stopped");
}
