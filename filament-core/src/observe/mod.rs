//! Document observation layer.
//!
//! [`ReactiveObserver`] attaches native observers to document nodes and
//! re-emits what they report as semantic events. Every native observer is
//! owned by an [`ObservationHandle`] so that cleaning a node up disconnects
//! all of them.

mod handle;
mod observer;

pub use handle::{Concern, ObservationHandle};
pub use observer::{ReactiveObserver, ReactiveOptions};
