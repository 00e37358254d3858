//! Change Registry
//!
//! Path-keyed observation of plain JSON state.
//!
//! # Concepts
//!
//! ## State and proxies
//!
//! A [`ReactiveState`] owns the wrapped value. All access goes through a
//! [`StateProxy`], a cursor positioned at some [`Path`] inside the value.
//! Reading a nested object or array yields another proxy; writing through
//! any proxy notifies the subscribers of the written path.
//!
//! ## Subscriptions
//!
//! `observe(path, callback)` registers a callback on the canonical form of
//! `path`. Only exact-path subscribers are notified, with one exception: a
//! write below the root also notifies the container path with a `deep`
//! [`Change`], so observing `user` sees writes to `user.name`.
//!
//! ## Arrays
//!
//! `push`, `pop`, `shift`, `unshift`, `splice`, `sort` and `reverse` notify
//! the array path with before/after snapshots. `push` and `unshift` also
//! notify each inserted index.

mod array;
mod path;
mod registry;
mod state;
mod subscriber;

pub use array::compare_values;
pub use path::{Path, Segment};
pub use state::{lookup, wrap, Entry, ReactiveState, StateProxy, MAX_ARRAY_PADDING};
pub use subscriber::{Change, ChangeCallback, Subscription, SubscriptionId};
