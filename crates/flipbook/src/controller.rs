//! Double-buffered playback of a frame sequence.
//!
//! The render thread owns the front buffer and the decode worker owns the back
//! buffer. A decode job takes the back buffer out of its slot for the duration of
//! the decode and hands it back on completion, so a buffer can only be written
//! while it is out of the controller's hands. Swapping is a move between slots
//! under the state lock, done only by the render thread.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::ThreadId;

use crate::buffer::{FrameBuffer, FrameBufferPool};
use crate::config::PlaybackConfig;
use crate::error::{Error, Result, SourceError};
use crate::playback::{LoopCounter, LoopPolicy, PlaybackState};
use crate::scheduler::SwapScheduler;
use crate::sequence::Sequence;
use crate::source::FrameSource;
use crate::worker::{run_decode, DecodeReport, DecodeRequest, DecodeWorker, DelayFloor};

type FinishedListener = Box<dyn FnMut() + Send>;
type InvalidateListener = Arc<dyn Fn(u64) + Send + Sync>;

/// State shared with decode jobs. Everything here is guarded by `Shared::inner`.
struct Inner {
    state: PlaybackState,
    /// Next frame to decode; `None` when not running.
    next_frame: Option<usize>,
    front: Option<FrameBuffer>,
    /// Empty while a decode job holds the back buffer.
    back: Option<FrameBuffer>,
    front_frame: usize,
    /// Frame whose pixels the back buffer holds; `None` if blank or unknown.
    back_frame: Option<usize>,
    destroyed: bool,
    /// Bumped on every schedule/stop/destroy; stale decode jobs compare against it.
    generation: u64,
    loop_policy: LoopPolicy,
    loops: LoopCounter,
    scheduler: SwapScheduler,
    visible: bool,
    swaps: u64,
}

struct Shared {
    sequence: Sequence,
    floor: DelayFloor,
    pool: Arc<dyn FrameBufferPool>,
    /// Only ever locked on the decode thread.
    source: Mutex<Box<dyn FrameSource>>,
    inner: Mutex<Inner>,
    invalidate: Mutex<Option<InvalidateListener>>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Decode job body. Runs on the worker thread.
    fn decode_next(&self, generation: u64) {
        let request = {
            let mut inner = self.lock();
            if inner.destroyed
                || inner.generation != generation
                || inner.state != PlaybackState::Scheduled
            {
                return;
            }
            let Some(frame_index) = inner.next_frame else {
                return;
            };
            let Some(target) = inner.back.take() else {
                log::warn!("Decode scheduled with no back buffer; stopping");
                inner.state = PlaybackState::Idle;
                inner.next_frame = None;
                return;
            };
            inner.state = PlaybackState::Decoding;
            DecodeRequest {
                frame_index,
                previous_frame_index: inner.back_frame,
                target,
            }
        };

        let (buffer, result) = {
            let mut source = self.source.lock().unwrap_or_else(PoisonError::into_inner);
            run_decode(source.as_mut(), request, self.floor)
        };

        self.finish_decode(generation, buffer, result);
    }

    fn finish_decode(
        &self,
        generation: u64,
        buffer: FrameBuffer,
        result: std::result::Result<DecodeReport, SourceError>,
    ) {
        let mut release = None;
        let mut armed = None;
        {
            let mut inner = self.lock();
            if inner.destroyed {
                release = Some(buffer);
            } else {
                inner.back = Some(buffer);
                // A failed decode may have left the buffer half written
                inner.back_frame = result.as_ref().ok().map(|report| report.frame_index);
                let current = inner.generation == generation
                    && inner.state == PlaybackState::Decoding
                    && inner.next_frame.is_some();
                if !current {
                    log::debug!("Discarding decode result from a stopped run");
                } else {
                    match result {
                        Ok(report) => {
                            let deadline = inner.scheduler.arm(report.delay_ms);
                            inner.state = PlaybackState::WaitingToSwap;
                            log::debug!(
                                "Decoded frame {} in {}ms, swap at {}ms",
                                report.frame_index,
                                report.decode_ms,
                                deadline
                            );
                            armed = Some(deadline);
                        }
                        Err(e) => {
                            log::warn!(
                                "Frame decode failed, holding frame {}: {e}",
                                inner.front_frame
                            );
                            inner.state = PlaybackState::Idle;
                            inner.next_frame = None;
                        }
                    }
                }
            }
        }

        if let Some(buffer) = release {
            log::debug!("Releasing back buffer #{} after destroy", buffer.id);
            self.pool.release(buffer);
        }
        if let Some(deadline) = armed {
            let listener = self
                .invalidate
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(listener) = listener {
                listener(deadline);
            }
        }
    }
}

/// Plays a [`FrameSource`] through two pool buffers on a shared [`DecodeWorker`].
///
/// The thread that constructs the controller is its render thread. Playback
/// control and [`on_render_pass`](Self::on_render_pass) must be called from it.
pub struct PlaybackController {
    shared: Arc<Shared>,
    worker: Arc<DecodeWorker>,
    render_thread: ThreadId,
    finished: Mutex<Option<FinishedListener>>,
}

impl PlaybackController {
    /// Acquire both buffers and decode frame 0 into the front buffer.
    ///
    /// Frame 0 is decoded on the calling thread, so construction never waits on
    /// the worker's queue and the visible frame is valid before `start()`.
    pub fn new(
        mut source: Box<dyn FrameSource>,
        pool: Arc<dyn FrameBufferPool>,
        worker: Arc<DecodeWorker>,
        config: &PlaybackConfig,
    ) -> Result<Self> {
        if worker.is_worker_thread() {
            return Err(Error::IllegalUse(
                "cannot construct a player on its own decode thread".into(),
            ));
        }
        let sequence = Sequence::from_source(source.as_ref())?;
        let (front, back) = acquire_pair(pool.as_ref(), &sequence)?;
        let floor = config.delay_floor();

        let request = DecodeRequest {
            frame_index: 0,
            previous_frame_index: None,
            target: front,
        };
        let (front, first) = run_decode(source.as_mut(), request, floor);
        if let Err(e) = first {
            pool.release(front);
            pool.release(back);
            return Err(Error::Decode(e));
        }

        let shared = Arc::new(Shared {
            sequence,
            floor,
            pool,
            source: Mutex::new(source),
            inner: Mutex::new(Inner {
                state: PlaybackState::Idle,
                next_frame: None,
                front: Some(front),
                back: Some(back),
                front_frame: 0,
                back_frame: None,
                destroyed: false,
                generation: 0,
                loop_policy: config.loop_policy,
                loops: LoopCounter::default(),
                scheduler: SwapScheduler::new(),
                visible: true,
                swaps: 0,
            }),
            invalidate: Mutex::new(None),
        });

        log::info!(
            "Player created: {}x{}, {} frame{}, default loops {}",
            sequence.width,
            sequence.height,
            sequence.frame_count,
            if sequence.frame_count == 1 { "" } else { "s" },
            sequence.default_loop_count
        );

        Ok(Self {
            shared,
            worker,
            render_thread: std::thread::current().id(),
            finished: Mutex::new(None),
        })
    }

    fn check_render_thread(&self, op: &str) -> Result<()> {
        if std::thread::current().id() != self.render_thread {
            return Err(Error::IllegalUse(format!(
                "{op}() must be called on the render thread"
            )));
        }
        Ok(())
    }

    /// Queue a decode of the cursor's successor. Caller holds the lock.
    fn schedule_decode(&self, inner: &mut Inner) -> Result<()> {
        let next = match inner.next_frame {
            None => 0,
            Some(n) => self.shared.sequence.successor(n),
        };
        inner.state = PlaybackState::Scheduled;
        inner.next_frame = Some(next);
        inner.generation += 1;

        let generation = inner.generation;
        let shared = self.shared.clone();
        log::debug!("Scheduling decode of frame {next}");
        if let Err(e) = self.worker.execute(move || shared.decode_next(generation)) {
            inner.state = PlaybackState::Idle;
            inner.next_frame = None;
            return Err(e);
        }
        Ok(())
    }

    /// Begin playback. No-op if already running.
    pub fn start(&self) -> Result<()> {
        self.check_render_thread("start")?;
        let mut inner = self.shared.lock();
        if inner.destroyed {
            return Err(Error::InvalidState("start() after destroy()"));
        }
        if inner.next_frame.is_some() {
            return Ok(());
        }
        inner.loops.reset();
        self.schedule_decode(&mut inner)
    }

    /// Stop advancing. An in-flight decode finishes and is discarded.
    pub fn stop(&self) -> Result<()> {
        self.check_render_thread("stop")?;
        let mut inner = self.shared.lock();
        if inner.destroyed {
            return Err(Error::IllegalUse("stop() on a destroyed player".into()));
        }
        if inner.next_frame.is_some() {
            log::debug!("Stopping playback on frame {}", inner.front_frame);
        }
        unschedule(&mut inner);
        Ok(())
    }

    /// Drive the state machine once. Returns whether a new frame became visible.
    pub fn on_render_pass(&self, now_ms: u64) -> Result<bool> {
        self.check_render_thread("on_render_pass")?;
        let finished = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                return Err(Error::InvalidState("on_render_pass() after destroy()"));
            }

            if inner.state == PlaybackState::WaitingToSwap && inner.scheduler.is_due(now_ms) {
                inner.state = PlaybackState::ReadyToSwap;
            }
            if inner.state != PlaybackState::ReadyToSwap {
                return Ok(false);
            }
            let Some(shown) = inner.next_frame else {
                return Ok(false);
            };
            // Visible frame is lent out to `with_visible_frame`; swap on a later pass
            if inner.front.is_none() {
                return Ok(false);
            }

            let inner = &mut *inner;
            std::mem::swap(&mut inner.front, &mut inner.back);
            inner.back_frame = Some(inner.front_frame);
            inner.front_frame = shown;
            inner.scheduler.swapped(now_ms);
            inner.swaps += 1;
            log::debug!("Swapped to frame {shown} at {now_ms}ms");

            let following = self.shared.sequence.successor(shown);
            let keep_going = inner.loops.advance(
                following,
                inner.loop_policy,
                self.shared.sequence.default_loop_count,
            );
            if keep_going {
                self.schedule_decode(inner)?;
                false
            } else {
                unschedule(inner);
                true
            }
        };

        if finished {
            log::info!("Playback finished");
            self.notify_finished();
        }
        Ok(true)
    }

    fn notify_finished(&self) {
        let taken = self
            .finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(mut listener) = taken {
            listener();
            let mut slot = self.finished.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_none() {
                *slot = Some(listener);
            }
        }
    }

    /// Tear down. Releases whichever buffers are not held by an in-flight decode;
    /// that decode releases the other one when it completes.
    pub fn destroy(&self) -> Result<()> {
        self.check_render_thread("destroy")?;
        if self.shared.lock().destroyed {
            return Err(Error::IllegalUse("destroy() called twice".into()));
        }
        self.teardown();
        Ok(())
    }

    fn teardown(&self) {
        let (front, back) = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                return;
            }
            inner.destroyed = true;
            unschedule(&mut inner);
            (inner.front.take(), inner.back.take())
        };

        match front {
            Some(front) => self.shared.pool.release(front),
            None => log::debug!("Visible frame is being read; it is released when the read ends"),
        }
        match back {
            Some(back) => self.shared.pool.release(back),
            None => log::debug!("Back buffer is decoding; it is released on completion"),
        }
        log::info!("Player destroyed");
    }

    /// Show or hide. Hiding stops playback; showing restarts it when `restart`
    /// is set or the visibility changed. Returns whether visibility changed.
    pub fn set_visible(&self, visible: bool, restart: bool) -> Result<bool> {
        self.check_render_thread("set_visible")?;
        let changed = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                return Err(Error::IllegalUse("set_visible() on a destroyed player".into()));
            }
            let changed = inner.visible != visible;
            inner.visible = visible;
            changed
        };
        if !visible {
            self.stop()?;
        } else if restart || changed {
            self.stop()?;
            self.start()?;
        }
        Ok(changed)
    }

    pub fn set_loop_policy(&self, policy: LoopPolicy) -> Result<()> {
        self.check_render_thread("set_loop_policy")?;
        let mut inner = self.shared.lock();
        if inner.destroyed {
            return Err(Error::InvalidState("set_loop_policy() after destroy()"));
        }
        inner.loop_policy = policy;
        Ok(())
    }

    /// Called on the render thread when the loop policy ends playback.
    pub fn set_finished_listener<F>(&self, listener: F) -> Result<()>
    where
        F: FnMut() + Send + 'static,
    {
        self.check_render_thread("set_finished_listener")?;
        if self.shared.lock().destroyed {
            return Err(Error::InvalidState("set_finished_listener() after destroy()"));
        }
        *self.finished.lock().unwrap_or_else(PoisonError::into_inner) = Some(Box::new(listener));
        Ok(())
    }

    /// Called on the decode thread with the swap deadline whenever a decoded frame
    /// starts waiting, so the host can schedule a render pass for it.
    pub fn set_invalidate_listener<F>(&self, listener: F) -> Result<()>
    where
        F: Fn(u64) + Send + Sync + 'static,
    {
        self.check_render_thread("set_invalidate_listener")?;
        if self.shared.lock().destroyed {
            return Err(Error::InvalidState("set_invalidate_listener() after destroy()"));
        }
        *self
            .shared
            .invalidate
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(listener));
        Ok(())
    }

    /// Run `f` against the visible frame, on the render thread.
    ///
    /// The front buffer is lent out of the state lock for the duration, so the
    /// decode thread keeps working and `f` may call back into the player. A swap
    /// that comes due meanwhile waits for the next render pass.
    pub fn with_visible_frame<R>(&self, f: impl FnOnce(&FrameBuffer) -> R) -> Result<R> {
        self.check_render_thread("with_visible_frame")?;
        let front = {
            let mut inner = self.shared.lock();
            if inner.destroyed {
                return Err(Error::InvalidState("visible frame read after destroy()"));
            }
            inner.front.take().ok_or_else(|| {
                Error::IllegalUse("with_visible_frame() called while already reading".into())
            })?
        };

        let lent = LentFront {
            shared: &self.shared,
            buffer: Some(front),
        };
        let result = lent.buffer.as_ref().map(f);
        drop(lent);
        result.ok_or(Error::InvalidState("no visible frame"))
    }

    pub fn is_running(&self) -> bool {
        let inner = self.shared.lock();
        inner.next_frame.is_some() && !inner.destroyed
    }

    pub fn is_destroyed(&self) -> bool {
        self.shared.lock().destroyed
    }

    pub fn state(&self) -> PlaybackState {
        self.shared.lock().state
    }

    pub fn sequence(&self) -> Sequence {
        self.shared.sequence
    }

    /// Index of the frame in the front buffer.
    pub fn current_frame(&self) -> usize {
        self.shared.lock().front_frame
    }

    /// Loops completed since the last `start()`.
    pub fn loop_count(&self) -> u32 {
        self.shared.lock().loops.completed()
    }

    pub fn loop_policy(&self) -> LoopPolicy {
        self.shared.lock().loop_policy
    }

    /// Swap deadline of the frame waiting to be shown, if any.
    pub fn swap_deadline(&self) -> Option<u64> {
        self.shared.lock().scheduler.deadline()
    }

    /// Total swaps performed over the player's lifetime.
    pub fn swap_count(&self) -> u64 {
        self.shared.lock().swaps
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Puts a lent front buffer back, or releases it if the player was destroyed
/// while it was out. Runs on unwind too.
struct LentFront<'a> {
    shared: &'a Shared,
    buffer: Option<FrameBuffer>,
}

impl Drop for LentFront<'_> {
    fn drop(&mut self) {
        let Some(buffer) = self.buffer.take() else {
            return;
        };
        let mut inner = self.shared.lock();
        if inner.destroyed {
            drop(inner);
            self.shared.pool.release(buffer);
        } else {
            inner.front = Some(buffer);
        }
    }
}

fn unschedule(inner: &mut Inner) {
    inner.next_frame = None;
    inner.state = PlaybackState::Idle;
    inner.generation += 1;
    inner.scheduler.disarm();
}

/// Acquire and validate the front/back pair, returning anything acquired on failure.
fn acquire_pair(
    pool: &dyn FrameBufferPool,
    sequence: &Sequence,
) -> Result<(FrameBuffer, FrameBuffer)> {
    let (w, h) = (sequence.width, sequence.height);
    let front = pool.acquire(w, h);
    if let Err(e) = front.validate(w, h) {
        pool.release(front);
        return Err(e);
    }
    let back = pool.acquire(w, h);
    if let Err(e) = back.validate(w, h) {
        pool.release(front);
        pool.release(back);
        return Err(e);
    }
    Ok((front, back))
}
