#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use flipbook::{
    FrameBuffer, FrameBufferPool, FrameSource, PixelFormat, PlaybackController, PlaybackState,
    SourceError,
};

/// Color every pixel of frame `index` is painted with.
pub fn frame_color(index: usize) -> [u8; 4] {
    [index as u8 + 1, 0x40, 0x80, 0xff]
}

/// Observations shared between a test and its [`ScriptedSource`].
#[derive(Default)]
pub struct Recorder {
    /// Frame indices in the order they were decoded.
    pub decoded: Mutex<Vec<usize>>,
    /// Target buffer ids in decode order.
    pub targets: Mutex<Vec<u64>>,
    /// `(frame, previous_frame_index passed, frame the target really held)` per decode.
    pub history: Mutex<Vec<(usize, Option<usize>, Option<usize>)>>,
    /// Frame last painted into each buffer id.
    holds: Mutex<HashMap<u64, usize>>,
    /// When set, each decode waits for one message first.
    pub gate: Mutex<Option<Receiver<()>>>,
    active: AtomicUsize,
    pub overlapped: AtomicBool,
}

/// Frame source with scripted delays, latency and failures.
pub struct ScriptedSource {
    pub delays: Vec<i64>,
    pub latency: Duration,
    /// Pause between rows, to widen any window for torn reads.
    pub row_pause: Duration,
    pub fail_on: Option<usize>,
    pub default_loops: u32,
    pub width: u32,
    pub height: u32,
    pub recorder: Arc<Recorder>,
}

impl ScriptedSource {
    pub fn new(delays: &[i64]) -> Self {
        Self {
            delays: delays.to_vec(),
            latency: Duration::ZERO,
            row_pause: Duration::ZERO,
            fail_on: None,
            default_loops: 0,
            width: 4,
            height: 4,
            recorder: Arc::new(Recorder::default()),
        }
    }
}

impl FrameSource for ScriptedSource {
    fn frame_count(&self) -> usize {
        self.delays.len()
    }

    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn is_opaque(&self) -> bool {
        true
    }

    fn default_loop_count(&self) -> u32 {
        self.default_loops
    }

    fn decode_frame(
        &mut self,
        target: &mut FrameBuffer,
        frame_index: usize,
        previous_frame_index: Option<usize>,
    ) -> Result<i64, SourceError> {
        if self.recorder.active.fetch_add(1, Ordering::SeqCst) > 0 {
            self.recorder.overlapped.store(true, Ordering::SeqCst);
        }

        let gate = self.recorder.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.recv_timeout(Duration::from_secs(5));
        }
        std::thread::sleep(self.latency);

        self.recorder.decoded.lock().unwrap().push(frame_index);
        self.recorder.targets.lock().unwrap().push(target.id);
        let held = self.recorder.holds.lock().unwrap().get(&target.id).copied();
        self.recorder
            .history
            .lock()
            .unwrap()
            .push((frame_index, previous_frame_index, held));

        let result = if self.fail_on == Some(frame_index) {
            // Pretend the failure scribbled over part of the buffer
            self.recorder.holds.lock().unwrap().remove(&target.id);
            Err(SourceError::Other(format!("frame {frame_index} is corrupt")))
        } else {
            let color = frame_color(frame_index);
            for y in 0..target.height {
                for px in target.row_mut(y).chunks_exact_mut(4) {
                    px.copy_from_slice(&color);
                }
                if !self.row_pause.is_zero() {
                    std::thread::sleep(self.row_pause);
                }
            }
            self.recorder.holds.lock().unwrap().insert(target.id, frame_index);
            Ok(self.delays[frame_index])
        };

        self.recorder.active.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

/// Pool that logs every acquire and release.
#[derive(Default)]
pub struct CountingPool {
    pub acquired: Mutex<Vec<u64>>,
    pub released: Mutex<Vec<u64>>,
    pub next_id: AtomicUsize,
    /// Hand out buffers this much narrower than asked.
    pub shrink_by: u32,
    pub format: Option<PixelFormat>,
}

impl CountingPool {
    pub fn released_count(&self) -> usize {
        self.released.lock().unwrap().len()
    }

    pub fn acquired_count(&self) -> usize {
        self.acquired.lock().unwrap().len()
    }
}

impl FrameBufferPool for CountingPool {
    fn acquire(&self, min_width: u32, min_height: u32) -> FrameBuffer {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) as u64 + 100;
        self.acquired.lock().unwrap().push(id);
        FrameBuffer::new(
            id,
            min_width.saturating_sub(self.shrink_by),
            min_height,
            self.format.unwrap_or(PixelFormat::Rgba8),
        )
    }

    fn release(&self, buffer: FrameBuffer) {
        self.released.lock().unwrap().push(buffer.id);
    }
}

/// Poll `cond` until it holds, panicking after five seconds.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let start = Instant::now();
    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(5),
            "timed out waiting for {what}"
        );
        std::thread::sleep(Duration::from_millis(1));
    }
}

/// Wait for the next decoded frame, then render exactly at its deadline.
///
/// Returns the deadline the swap happened at.
pub fn swap_at_deadline(player: &PlaybackController) -> u64 {
    wait_until("a decoded frame", || {
        player.state() == PlaybackState::WaitingToSwap
    });
    let deadline = player.swap_deadline().expect("armed deadline");
    if deadline > 0 {
        assert!(!player.on_render_pass(deadline - 1).unwrap(), "swapped early");
    }
    assert!(player.on_render_pass(deadline).unwrap(), "no swap at deadline");
    deadline
}

/// Check every pixel of the visible frame has the color of `frame`.
pub fn visible_is_frame(player: &PlaybackController, frame: usize) -> bool {
    let color = frame_color(frame);
    player
        .with_visible_frame(|buf| buf.data.chunks_exact(4).all(|px| px == color))
        .unwrap()
}
