//! Filament Core
//!
//! This crate provides the reactive state-to-document synchronization engine
//! of the Filament UI framework. It implements:
//!
//! - Path-keyed change observation on plain JSON state
//! - A frame-aligned, prioritized update scheduler
//! - Observation of document mutations, re-emitted as semantic events
//! - Listener bookkeeping, delegation and synthetic events
//! - Pull-based `{{ expression }}` templates
//!
//! There is no virtual tree and no diffing. State changes name the node they
//! affect and the writes to make; the scheduler decides when to make them.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `runtime`: Cooperative event loop (microtasks and frames)
//! - `dom`: In-memory document, mutation observers and event dispatch
//! - `reactive`: Wrapped state, proxies and path subscriptions
//! - `scheduler`: Change sets, priorities and the flush
//! - `observe`: Document observation layer
//! - `events`: Event registry
//! - `template`: Template binder
//! - `app`: One context object wiring all of the above together
//!
//! # Example
//!
//! ```rust
//! use filament_core::{App, ChangeSet, Priority, ReactiveState};
//! use serde_json::json;
//!
//! let app = App::new();
//! let label = app.document().create_element("span");
//! let state = ReactiveState::new(json!({"count": 0}));
//!
//! app.bind_path(&state, "count", label, Priority::Normal, |change| {
//!     let count = change.value.clone().unwrap_or_default();
//!     ChangeSet::new().text(format!("Count: {count}"))
//! })
//! .unwrap();
//!
//! state.proxy().set("count", 5);
//! app.tick();
//!
//! assert_eq!(app.document().text_content(label).unwrap(), "Count: 5");
//! ```

pub mod app;
pub mod config;
pub mod dom;
pub mod error;
pub mod events;
pub mod observe;
pub mod reactive;
pub mod runtime;
pub mod scheduler;
pub mod template;

pub use app::App;
pub use config::{AppConfig, SchedulerConfig};
pub use dom::{Document, Event, NodeId};
pub use error::{Error, Result};
pub use events::EventRegistry;
pub use observe::{ReactiveObserver, ReactiveOptions};
pub use reactive::{wrap, Change, ReactiveState, StateProxy, Subscription};
pub use runtime::EventLoop;
pub use scheduler::{ChangeSet, Priority, UpdateScheduler};
pub use template::{render, TemplateBinder};
