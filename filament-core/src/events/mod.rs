//! Event registry: listener bookkeeping, delegation and synthetic events.

mod registry;

pub use registry::{Attachment, CaptureCallback, DelegateHandler, EventRegistry, Uncapture, Unregister};
