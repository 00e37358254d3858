//! Document Model
//!
//! An in-memory document: the shared tree the update scheduler writes to and
//! the observation layer watches.
//!
//! # Overview
//!
//! - [`Document`] owns an arena of element and text nodes addressed by
//!   [`NodeId`]. Attributes are the single source of truth for classes,
//!   inline styles and the dataset, so every one of those writes is an
//!   attribute mutation.
//! - Mutation observers ([`ObserverOptions`], [`MutationRecord`]) are
//!   notified in a microtask after the write has taken effect.
//! - Events ([`Event`]) dispatch through capture, target and bubble phases.
//! - [`Selector`] implements the subset of CSS selectors that handler
//!   registration and delegation rely on.

mod document;
pub mod event;
mod html;
mod mutation;
mod node;
mod selector;

pub use document::Document;
pub use event::{Event, EventCallback, EventPhase, ListenerId, ListenerOptions};
pub use mutation::{MutationCallback, MutationKind, MutationRecord, ObserverId, ObserverOptions};
pub use node::{NodeId, NodeKind};
pub use selector::Selector;
