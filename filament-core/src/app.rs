//! Application context.
//!
//! An [`App`] owns one of each engine component, all sharing a single
//! event loop and document. Several apps can coexist; nothing is global.

use std::future::Future;
use std::sync::Arc;

use crate::config::AppConfig;
use crate::dom::{Document, NodeId};
use crate::error::PathError;
use crate::events::EventRegistry;
use crate::observe::ReactiveObserver;
use crate::reactive::{Change, ReactiveState, Subscription};
use crate::runtime::EventLoop;
use crate::scheduler::{ChangeSet, Priority, UpdateScheduler};
use crate::template::TemplateBinder;

pub struct App {
    config: AppConfig,
    event_loop: EventLoop,
    document: Document,
    scheduler: UpdateScheduler,
    observer: ReactiveObserver,
    events: EventRegistry,
    templates: Arc<TemplateBinder>,
}

impl App {
    /// App with the default configuration.
    pub fn new() -> Self {
        Self::with_config(AppConfig::default())
    }

    /// App wired from `config`.
    pub fn with_config(config: AppConfig) -> Self {
        let event_loop = EventLoop::new();
        let document = Document::new(event_loop.clone());
        let scheduler = UpdateScheduler::new(document.clone(), config.scheduler.clone());
        let observer = ReactiveObserver::new(document.clone());
        let events = EventRegistry::new(document.clone());
        let templates = Arc::new(TemplateBinder::new(document.clone()));

        tracing::debug!(
            cascade_limit = config.scheduler.cascade_limit,
            frame_interval_ms = config.frame_interval_ms,
            "app created"
        );

        Self {
            config,
            event_loop,
            document,
            scheduler,
            observer,
            events,
            templates,
        }
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// The loop every component schedules on.
    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    /// The document all components share.
    pub fn document(&self) -> &Document {
        &self.document
    }

    /// Scheduler for batched node updates.
    pub fn scheduler(&self) -> &UpdateScheduler {
        &self.scheduler
    }

    /// Observer that turns mutations into semantic events.
    pub fn observer(&self) -> &ReactiveObserver {
        &self.observer
    }

    /// Listener registry with delegation.
    pub fn events(&self) -> &EventRegistry {
        &self.events
    }

    /// Template bindings over the document.
    pub fn templates(&self) -> &TemplateBinder {
        &self.templates
    }

    /// Schedule an update of `node` whenever `path` in `state` changes.
    /// `build` turns each change into the change set to apply.
    pub fn bind_path<F>(
        &self,
        state: &ReactiveState,
        path: &str,
        node: NodeId,
        priority: Priority,
        build: F,
    ) -> Result<Subscription, PathError>
    where
        F: Fn(&Change) -> ChangeSet + Send + Sync + 'static,
    {
        let scheduler = self.scheduler.clone();
        state.observe(path, move |change| {
            scheduler.schedule_update(node, build(change), priority);
        })
    }

    /// Re-render bound templates from the current contents of `state`
    /// whenever `path` changes.
    pub fn bind_templates(&self, state: &ReactiveState, path: &str) -> Result<Subscription, PathError> {
        let templates = self.templates.clone();
        let source = state.clone();
        state.observe(path, move |_| {
            templates.refresh(&source.snapshot());
        })
    }

    /// Run one frame.
    pub fn tick(&self) -> usize {
        self.event_loop.run_frame()
    }

    /// Run frames until no work is left or `max_frames` have run. Returns the frames run.
    pub fn run_until_idle(&self, max_frames: usize) -> usize {
        self.event_loop.run_until_idle(max_frames)
    }

    /// Drive frames at the configured interval until `shutdown` resolves.
    pub async fn run<F>(&self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        self.event_loop.run(self.config.frame_interval(), shutdown).await;
    }

    /// Cancel pending work and disconnect every observer.
    pub fn shutdown(&self) {
        self.scheduler.clear_updates();
        self.observer.cleanup_all();
        self.event_loop.run_microtasks();
        tracing::debug!("app shut down");
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn state_change_reaches_the_document() {
        let app = App::new();
        let label = app.document().create_element("span");
        let state = ReactiveState::new(json!({"count": 0}));

        app.bind_path(&state, "count", label, Priority::Normal, |change| {
            ChangeSet::new().text(change.value.clone().unwrap_or_default().to_string())
        })
        .unwrap();

        state.proxy().set("count", 5);
        assert_eq!(app.document().text_content(label).unwrap(), "");
        app.tick();
        assert_eq!(app.document().text_content(label).unwrap(), "5");
    }

    #[test]
    fn templates_follow_state() {
        let app = App::new();
        let root = app.document().create_element("div");
        app.document().set_inner_html(root, "<b>{{ user.name || 'anon' }}</b>").unwrap();
        app.templates().bind(root).unwrap();

        let state = ReactiveState::new(json!({"user": {}}));
        app.bind_templates(&state, "user").unwrap();

        state.set_path("user.name", "Ada").unwrap();
        assert_eq!(app.document().text_content(root).unwrap(), "Ada");
    }

    #[test]
    fn apps_are_independent() {
        let a = App::new();
        let b = App::new();
        let node = a.document().create_element("p");
        a.scheduler().schedule_update(node, ChangeSet::new().text("x"), Priority::Normal);

        assert_eq!(a.scheduler().pending_count(), 1);
        assert_eq!(b.scheduler().pending_count(), 0);
        assert!(!b.document().exists(node));
    }

    #[test]
    fn shutdown_clears_pending_work() {
        let app = App::new();
        let node = app.document().create_element("p");
        app.observer()
            .make_reactive(node, &Default::default())
            .unwrap();
        app.scheduler().schedule_update(node, ChangeSet::new().text("x"), Priority::Low);

        app.shutdown();
        assert_eq!(app.scheduler().pending_count(), 0);
        assert_eq!(app.observer().tracked_count(), 0);
        assert!(app.event_loop().is_idle());
    }
}
