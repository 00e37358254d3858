//! Runtime
//!
//! The cooperative event loop that every other subsystem defers work to,
//! and the callback isolation used wherever user code is invoked.
//!
//! There are exactly two suspension points in the engine:
//!
//! - microtask boundaries (mutation-record delivery, the observation
//!   layer's intent-queue drain),
//! - frame boundaries (the update scheduler's flush).

mod event_loop;
pub(crate) mod isolate;

pub use event_loop::{EventLoop, FrameCallback, FrameId, FrameTime, Microtask};
