//! Event Loop
//!
//! A single-threaded, cooperative event loop with two kinds of deferred work:
//!
//! - **Microtasks** run at the end of the current turn, in FIFO order.
//!   Microtasks queued while draining run in the same drain.
//! - **Frame callbacks** run once per frame. A callback requested during a
//!   frame runs in the *next* frame. A microtask checkpoint follows every
//!   frame callback.
//!
//! Nothing here blocks. Work is only ever deferred to a later turn. The loop
//! is driven either manually (`run_microtasks`, `run_frame`,
//! `run_until_idle`) or by the async driver `run`, which ticks frames on a
//! tokio interval.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use indexmap::IndexMap;
use parking_lot::Mutex;

use super::isolate::isolate;

/// A unit of work queued for the end of the current turn.
pub type Microtask = Box<dyn FnOnce() + Send>;

/// A unit of work queued for the next frame.
pub type FrameCallback = Box<dyn FnOnce(FrameTime) + Send>;

/// Identifies a pending frame callback so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(u64);

/// Passed to frame callbacks.
#[derive(Debug, Clone, Copy)]
pub struct FrameTime {
    /// Sequence number of the frame being run (starts at 1).
    pub frame: u64,
    /// When the frame started.
    pub at: Instant,
}

struct LoopState {
    microtasks: VecDeque<Microtask>,
    frames: IndexMap<FrameId, FrameCallback>,
    next_frame_id: u64,
    frame: u64,
    /// Sequence number of the running frame callback.
    task: Option<u64>,
    next_task: u64,
}

/// Handle to a shared event loop. Cloning yields another handle to the same
/// loop.
#[derive(Clone)]
pub struct EventLoop {
    state: Arc<Mutex<LoopState>>,
}

impl EventLoop {
    /// Create a new, idle event loop.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(LoopState {
                microtasks: VecDeque::new(),
                frames: IndexMap::new(),
                next_frame_id: 0,
                frame: 0,
                task: None,
                next_task: 0,
            })),
        }
    }

    /// Queue a microtask.
    pub fn queue_microtask<F>(&self, task: F)
    where
        F: FnOnce() + Send + 'static,
    {
        self.state.lock().microtasks.push_back(Box::new(task));
    }

    /// Request a callback on the next frame.
    pub fn request_frame<F>(&self, callback: F) -> FrameId
    where
        F: FnOnce(FrameTime) + Send + 'static,
    {
        let mut state = self.state.lock();
        state.next_frame_id += 1;
        let id = FrameId(state.next_frame_id);
        state.frames.insert(id, Box::new(callback));
        id
    }

    /// Cancel a pending frame callback.
    ///
    /// Returns `false` if the callback already ran or was already cancelled.
    pub fn cancel_frame(&self, id: FrameId) -> bool {
        self.state.lock().frames.shift_remove(&id).is_some()
    }

    /// Number of the most recently started frame (0 before the first frame).
    pub fn current_frame(&self) -> u64 {
        self.state.lock().frame
    }

    /// True while frame callbacks, or the microtasks they queued, are
    /// running.
    pub fn in_frame(&self) -> bool {
        self.state.lock().task.is_some()
    }

    /// Sequence number of the frame callback currently running. The
    /// microtask checkpoint after a callback shares its number. `None`
    /// outside frames.
    pub fn current_task(&self) -> Option<u64> {
        self.state.lock().task
    }

    /// Number of queued microtasks.
    pub fn pending_microtasks(&self) -> usize {
        self.state.lock().microtasks.len()
    }

    /// Number of pending frame callbacks.
    pub fn pending_frames(&self) -> usize {
        self.state.lock().frames.len()
    }

    /// True when neither microtasks nor frame callbacks are pending.
    pub fn is_idle(&self) -> bool {
        let state = self.state.lock();
        state.microtasks.is_empty() && state.frames.is_empty()
    }

    /// Drain the microtask queue, including microtasks queued while draining.
    ///
    /// Returns the number of microtasks run.
    pub fn run_microtasks(&self) -> usize {
        let mut ran = 0;
        loop {
            // The lock must be released before the task runs: tasks queue
            // more work on this same loop.
            let next = self.state.lock().microtasks.pop_front();
            let Some(task) = next else { break };
            isolate("microtask", task);
            ran += 1;
        }
        ran
    }

    /// Run one frame: every frame callback requested before this call, each
    /// followed by a microtask checkpoint.
    ///
    /// Returns the number of frame callbacks run.
    pub fn run_frame(&self) -> usize {
        self.run_microtasks();

        let (callbacks, time) = {
            let mut state = self.state.lock();
            state.frame += 1;
            let time = FrameTime {
                frame: state.frame,
                at: Instant::now(),
            };
            (std::mem::take(&mut state.frames), time)
        };

        tracing::trace!(frame = time.frame, callbacks = callbacks.len(), "running frame");

        let count = callbacks.len();
        for (_, callback) in callbacks {
            {
                let mut state = self.state.lock();
                state.next_task += 1;
                state.task = Some(state.next_task);
            }
            isolate("frame callback", move || callback(time));
            self.run_microtasks();
        }
        self.state.lock().task = None;
        count
    }

    /// Run microtasks and frames until the loop is idle or `max_frames`
    /// frames have run.
    ///
    /// Returns the number of frames run.
    pub fn run_until_idle(&self, max_frames: usize) -> usize {
        self.run_microtasks();
        let mut frames = 0;
        while !self.is_idle() && frames < max_frames {
            self.run_frame();
            frames += 1;
        }
        frames
    }

    /// Drive the loop on a fixed frame interval until `shutdown` resolves.
    pub async fn run<F>(&self, frame_interval: Duration, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        let mut interval = tokio::time::interval(frame_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = interval.tick() => {
                    self.run_frame();
                }
            }
        }

        // Leave no half-finished turn behind.
        self.run_microtasks();
    }
}

impl Default for EventLoop {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EventLoop")
            .field("frame", &state.frame)
            .field("microtasks", &state.microtasks.len())
            .field("frames", &state.frames.len())
            .finish()
    }
}
