//! Reactive State
//!
//! A [`ReactiveState`] owns a plain JSON value (the *target*) and hands out
//! [`StateProxy`] handles through which every read and write flows. Writes
//! through a proxy notify the path subscribers registered on the state.
//!
//! # How Writes Notify
//!
//! `proxy.set(key, value)` at container path `P`:
//!
//! 1. Records the old value at `P.key`.
//! 2. Writes through to the target, creating missing or non-container
//!    intermediates along `P` instead of failing.
//! 3. Notifies subscribers of `P.key` with `(new, old)`.
//! 4. If `P` is not the root, notifies subscribers of `P` with the container
//!    as both new and old, flagged `deep`.
//!
//! Writes are never compared with the current value: writing the same value
//! twice notifies twice.
//!
//! # Nested Reads
//!
//! Nested proxies are path cursors created on every access. Two reads of the
//! same nested property produce two handles, but they compare equal because
//! equality is defined as (same state, same path).

use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::PathError;

use super::path::{Path, Segment};
use super::registry::PathRegistry;
use super::subscriber::{Change, ChangeCallback, Subscription};

/// How many `null`s a single write may pad an array with.
pub const MAX_ARRAY_PADDING: usize = 4096;

pub(crate) struct StateInner {
    pub(crate) target: RwLock<Value>,
    pub(crate) registry: Arc<PathRegistry>,
}

/// A wrapped value plus its subscription registry.
///
/// Cloning yields another handle to the same state.
#[derive(Clone)]
pub struct ReactiveState {
    pub(crate) inner: Arc<StateInner>,
}

/// Wrap `target` and return its root proxy.
pub fn wrap(target: Value) -> StateProxy {
    ReactiveState::new(target).proxy()
}

impl ReactiveState {
    /// Take ownership of `target`. From here on it is only reachable
    /// through proxies.
    pub fn new(target: Value) -> Self {
        Self {
            inner: Arc::new(StateInner {
                target: RwLock::new(target),
                registry: Arc::new(PathRegistry::new()),
            }),
        }
    }

    /// Wrap any serializable value.
    pub fn from_serialize<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::to_value(value)?))
    }

    /// The root proxy.
    pub fn proxy(&self) -> StateProxy {
        StateProxy {
            state: self.clone(),
            path: Path::root(),
        }
    }

    /// A proxy positioned at `path`.
    pub fn at(&self, path: &str) -> Result<StateProxy, PathError> {
        Ok(StateProxy {
            state: self.clone(),
            path: Path::parse(path)?,
        })
    }

    /// Register `callback` for changes at `path`.
    pub fn observe<F>(&self, path: &str, callback: F) -> Result<Subscription, PathError>
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let canonical = Path::parse(path)?.to_string();
        Ok(self.observe_canonical(canonical, Arc::new(callback)))
    }

    fn observe_canonical(&self, path: String, callback: ChangeCallback) -> Subscription {
        let id = self.inner.registry.add(path.clone(), callback);
        tracing::debug!(path = %path, "path subscription added");
        Subscription::new(id, path, &self.inner.registry)
    }

    /// Number of callbacks observing `path`.
    pub fn subscriber_count(&self, path: &str) -> usize {
        Path::parse(path)
            .map(|p| self.inner.registry.count(&p.to_string()))
            .unwrap_or(0)
    }

    /// Clone of the whole target.
    pub fn snapshot(&self) -> Value {
        self.inner.target.read().clone()
    }

    /// Read the value at a path string.
    pub fn get_path(&self, path: &str) -> Result<Option<Value>, PathError> {
        self.proxy().get_path(path)
    }

    /// Write the value at a path string, creating intermediates.
    pub fn set_path(&self, path: &str, value: impl Into<Value>) -> Result<(), PathError> {
        self.proxy().set_path(path, value)
    }

    /// Delete the value at a path string and return it.
    pub fn delete_path(&self, path: &str) -> Result<Option<Value>, PathError> {
        self.proxy().delete_path(path)
    }

    pub(crate) fn notify(&self, change: Change) {
        self.inner.registry.notify(&change);
    }

    fn same_state(&self, other: &ReactiveState) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for ReactiveState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReactiveState")
            .field("target", &*self.inner.target.read())
            .field("observed_paths", &self.inner.registry.path_count())
            .finish()
    }
}

/// What a keyed read yields: primitives directly, containers wrapped.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Value(Value),
    Nested(StateProxy),
}

/// An interception handle positioned at a path inside a [`ReactiveState`].
#[derive(Clone)]
pub struct StateProxy {
    pub(crate) state: ReactiveState,
    pub(crate) path: Path,
}

impl PartialEq for StateProxy {
    fn eq(&self, other: &Self) -> bool {
        self.state.same_state(&other.state) && self.path == other.path
    }
}

impl std::fmt::Debug for StateProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProxy")
            .field("path", &self.path.to_string())
            .finish()
    }
}

impl StateProxy {
    /// Path of this proxy relative to the state root.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The state this proxy belongs to.
    pub fn state(&self) -> &ReactiveState {
        &self.state
    }

    /// Snapshot of the value this proxy points at.
    pub fn value(&self) -> Option<Value> {
        let target = self.state.inner.target.read();
        get_in(&target, self.path.segments()).cloned()
    }

    /// Deserialize the value this proxy points at.
    pub fn value_as<T: DeserializeOwned>(&self) -> Option<Result<T, serde_json::Error>> {
        self.value().map(serde_json::from_value)
    }

    /// Snapshot of the value under `key`.
    pub fn get(&self, key: impl Into<Segment>) -> Option<Value> {
        let key = key.into();
        let target = self.state.inner.target.read();
        get_in(&target, self.path.segments())
            .and_then(|container| get_child(container, &key))
            .cloned()
    }

    /// Read `key`: primitives come back as values, objects and arrays as a
    /// freshly created nested proxy.
    pub fn read(&self, key: impl Into<Segment>) -> Option<Entry> {
        let key = key.into();
        let value = self.get(key.clone())?;
        Some(match value {
            Value::Object(_) | Value::Array(_) => Entry::Nested(self.child(key)),
            other => Entry::Value(other),
        })
    }

    /// A nested proxy for `key`, whether or not anything is there yet.
    pub fn child(&self, key: impl Into<Segment>) -> StateProxy {
        StateProxy {
            state: self.state.clone(),
            path: self.path.join(key),
        }
    }

    /// Shorthand for `child(index)`.
    pub fn at(&self, index: usize) -> StateProxy {
        self.child(index)
    }

    /// Write `value` under `key` and notify.
    ///
    /// A write that would pad an array past [`MAX_ARRAY_PADDING`] is
    /// logged and skipped. Use [`try_set`](Self::try_set) to see the error.
    pub fn set(&self, key: impl Into<Segment>, value: impl Into<Value>) {
        let key = key.into();
        if let Err(err) = self.try_set(key.clone(), value) {
            tracing::warn!(path = %self.path.join(key), error = %err, "write skipped");
        }
    }

    /// Write `value` under `key` and notify, or fail without touching the
    /// state.
    pub fn try_set(&self, key: impl Into<Segment>, value: impl Into<Value>) -> Result<(), PathError> {
        let key = key.into();
        let value = value.into();

        let (old, container) = {
            let mut target = self.state.inner.target.write();
            check_padding(&target, self.path.segments(), &key)?;
            let container = container_mut(&mut target, self.path.segments(), &key)?;
            let old = put_child(container, &key, value.clone())?;
            let snapshot = (!self.path.is_root()).then(|| container.clone());
            (old, snapshot)
        };

        self.notify_write(&key, Some(value), old, container);
        Ok(())
    }

    /// Write any serializable value under `key`.
    pub fn set_serialized<T: Serialize>(&self, key: impl Into<Segment>, value: &T) -> Result<(), serde_json::Error> {
        let value = serde_json::to_value(value)?;
        self.set(key, value);
        Ok(())
    }

    /// Delete `key` and notify with `(None, old)`.
    ///
    /// Deleting an array element leaves `null` in its place so later
    /// indices are unchanged.
    pub fn delete(&self, key: impl Into<Segment>) -> Option<Value> {
        let key = key.into();

        let (old, container) = {
            let mut target = self.state.inner.target.write();
            match get_in_mut(&mut target, self.path.segments()) {
                Some(container) => {
                    let old = take_child(container, &key);
                    let snapshot = (!self.path.is_root()).then(|| container.clone());
                    (old, snapshot)
                }
                None => (None, None),
            }
        };

        self.notify_write(&key, None, old.clone(), container);
        old
    }

    /// Read a path relative to this proxy.
    pub fn get_path(&self, path: &str) -> Result<Option<Value>, PathError> {
        let path = Path::parse(path)?;
        let target = self.state.inner.target.read();
        Ok(get_in(&target, self.path.concat(&path).segments()).cloned())
    }

    /// Write a path relative to this proxy, creating intermediates.
    pub fn set_path(&self, path: &str, value: impl Into<Value>) -> Result<(), PathError> {
        let (container, key) = self.split(path)?;
        container.try_set(key, value)
    }

    /// Delete a path relative to this proxy.
    pub fn delete_path(&self, path: &str) -> Result<Option<Value>, PathError> {
        let (container, key) = self.split(path)?;
        Ok(container.delete(key))
    }

    /// Observe a path relative to this proxy.
    pub fn observe<F>(&self, path: &str, callback: F) -> Result<Subscription, PathError>
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let full = self.path.concat(&Path::parse(path)?);
        Ok(self
            .state
            .observe_canonical(full.to_string(), Arc::new(callback)))
    }

    /// Number of entries in the array or object this proxy points at.
    pub fn len(&self) -> Option<usize> {
        let target = self.state.inner.target.read();
        match get_in(&target, self.path.segments())? {
            Value::Array(items) => Some(items.len()),
            Value::Object(map) => Some(map.len()),
            _ => None,
        }
    }

    /// True unless the value is a non-empty array or object.
    pub fn is_empty(&self) -> bool {
        self.len().map_or(true, |n| n == 0)
    }

    pub fn is_array(&self) -> bool {
        matches!(self.value(), Some(Value::Array(_)))
    }

    fn split(&self, path: &str) -> Result<(StateProxy, Segment), PathError> {
        let path = Path::parse(path)?;
        let (container, key) = path.split_last().ok_or(PathError::Empty)?;
        Ok((
            StateProxy {
                state: self.state.clone(),
                path: self.path.concat(&container),
            },
            key.clone(),
        ))
    }

    fn notify_write(&self, key: &Segment, value: Option<Value>, old: Option<Value>, container: Option<Value>) {
        let path = self.path.join(key.clone()).to_string();
        self.state.notify(Change::direct(path, value, old));

        if let Some(container) = container {
            self.state
                .notify(Change::deep(self.path.to_string(), container));
        }
    }
}

// ----------------------------------------------------------------------------
// Value navigation
// ----------------------------------------------------------------------------

pub(crate) fn get_child<'a>(container: &'a Value, key: &Segment) -> Option<&'a Value> {
    match container {
        Value::Object(map) => map.get(&key.to_key()),
        Value::Array(items) => items.get(key.as_index()?),
        _ => None,
    }
}

pub(crate) fn get_in<'a>(root: &'a Value, path: &[Segment]) -> Option<&'a Value> {
    path.iter().try_fold(root, |current, key| get_child(current, key))
}

/// Read the value at `path` inside `root` without wrapping it.
pub fn lookup<'a>(root: &'a Value, path: &Path) -> Option<&'a Value> {
    get_in(root, path.segments())
}

pub(crate) fn get_in_mut<'a>(root: &'a mut Value, path: &[Segment]) -> Option<&'a mut Value> {
    let mut current = root;
    for key in path {
        current = match current {
            Value::Object(map) => map.get_mut(&key.to_key())?,
            Value::Array(items) => items.get_mut(key.as_index()?)?,
            _ => return None,
        };
    }
    Some(current)
}

fn holds(container: &Value, key: &Segment) -> bool {
    match container {
        Value::Object(_) => true,
        Value::Array(_) => key.as_index().is_some(),
        _ => false,
    }
}

fn empty_container_for(key: &Segment) -> Value {
    match key {
        Segment::Index(_) => Value::Array(Vec::new()),
        Segment::Key(_) => Value::Object(Map::new()),
    }
}

/// Make `value` a container able to hold `key`, replacing it if needed.
fn ensure_container(value: &mut Value, key: &Segment) {
    if !holds(value, key) {
        *value = empty_container_for(key);
    }
}

fn padded_len(len: usize, index: usize) -> Result<usize, PathError> {
    if index.saturating_sub(len) > MAX_ARRAY_PADDING {
        return Err(PathError::IndexOutOfRange { index, len });
    }
    index.checked_add(1).ok_or(PathError::IndexOutOfRange { index, len })
}

/// Fail if writing `leaf` below `path` would pad any array, existing or
/// created along the way, by more than [`MAX_ARRAY_PADDING`].
pub(crate) fn check_padding(root: &Value, path: &[Segment], leaf: &Segment) -> Result<(), PathError> {
    let mut current = Some(root);
    for key in path.iter().chain(std::iter::once(leaf)) {
        let len = match current {
            Some(Value::Array(items)) if key.as_index().is_some() => Some(items.len()),
            Some(value) if holds(value, key) => None,
            _ => matches!(key, Segment::Index(_)).then_some(0),
        };
        if let (Some(len), Some(index)) = (len, key.as_index()) {
            padded_len(len, index)?;
        }
        current = current.and_then(|value| get_child(value, key));
    }
    Ok(())
}

/// The slot for `key` in `container`, created as `null` if absent.
pub(crate) fn slot_mut<'a>(container: &'a mut Value, key: &Segment) -> Result<&'a mut Value, PathError> {
    ensure_container(container, key);
    match container {
        Value::Array(items) => {
            let index = key.as_index().unwrap_or(items.len());
            if items.len() <= index {
                let len = padded_len(items.len(), index)?;
                items.resize(len, Value::Null);
            }
            Ok(&mut items[index])
        }
        Value::Object(map) => Ok(map.entry(key.to_key()).or_insert(Value::Null)),
        other => {
            *other = Value::Object(Map::new());
            slot_mut(other, key)
        }
    }
}

/// Navigate to the container that will hold `leaf`, creating intermediates.
pub(crate) fn container_mut<'a>(
    root: &'a mut Value,
    path: &[Segment],
    leaf: &Segment,
) -> Result<&'a mut Value, PathError> {
    let mut current = root;
    for (i, key) in path.iter().enumerate() {
        let next = path.get(i + 1).unwrap_or(leaf);
        current = slot_mut(current, key)?;
        ensure_container(current, next);
    }
    ensure_container(current, leaf);
    Ok(current)
}

/// Store `value` under `key`, returning what was there.
fn put_child(container: &mut Value, key: &Segment, value: Value) -> Result<Option<Value>, PathError> {
    let slot_exists = get_child(container, key).is_some();
    let slot = slot_mut(container, key)?;
    let old = std::mem::replace(slot, value);
    Ok(slot_exists.then_some(old))
}

fn take_child(container: &mut Value, key: &Segment) -> Option<Value> {
    match container {
        Value::Object(map) => map.remove(&key.to_key()),
        Value::Array(items) => {
            let slot = items.get_mut(key.as_index()?)?;
            Some(std::mem::replace(slot, Value::Null))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;

    fn recorder(state: &ReactiveState, path: &str) -> (Subscription, Arc<Mutex<Vec<Change>>>) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = log.clone();
        let sub = state
            .observe(path, move |change| sink.lock().push(change.clone()))
            .unwrap();
        (sub, log)
    }

    #[test]
    fn set_notifies_with_new_and_old() {
        let state = ReactiveState::new(json!({"count": 0}));
        let (_sub, log) = recorder(&state, "count");

        state.proxy().set("count", 5);

        let log = log.lock();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].value, Some(json!(5)));
        assert_eq!(log[0].old, Some(json!(0)));
        assert!(!log[0].deep);
    }

    #[test]
    fn set_then_get_round_trips() {
        let state = ReactiveState::new(json!({}));
        state.set_path("a.b[2].c", "deep").unwrap();

        assert_eq!(state.get_path("a.b[2].c").unwrap(), Some(json!("deep")));
        assert_eq!(state.snapshot(), json!({"a": {"b": [null, null, {"c": "deep"}]}}));
    }

    #[test]
    fn far_out_of_range_indices_are_rejected() {
        let state = ReactiveState::new(json!({"a": []}));
        let (_sub, log) = recorder(&state, "a");

        assert!(matches!(
            state.set_path("a[18446744073709551615]", 1),
            Err(PathError::IndexOutOfRange { len: 0, .. })
        ));
        assert!(matches!(
            state.set_path("b[4000000000].c", 1),
            Err(PathError::IndexOutOfRange { .. })
        ));
        state.proxy().child("a").set(usize::MAX, 1);

        assert_eq!(state.snapshot(), json!({"a": []}));
        assert!(log.lock().is_empty());

        state.set_path(&format!("a[{MAX_ARRAY_PADDING}]"), 1).unwrap();
        assert_eq!(state.proxy().child("a").len(), Some(MAX_ARRAY_PADDING + 1));
    }

    #[test]
    fn same_value_still_notifies() {
        let state = ReactiveState::new(json!({"flag": true}));
        let (_sub, log) = recorder(&state, "flag");

        state.proxy().set("flag", true);
        state.proxy().set("flag", true);

        assert_eq!(log.lock().len(), 2);
    }

    #[test]
    fn nested_write_bubbles_to_parent_path() {
        let state = ReactiveState::new(json!({"user": {"name": "a"}}));
        let (_leaf, leaf_log) = recorder(&state, "user.name");
        let (_parent, parent_log) = recorder(&state, "user");

        let user = state.proxy().child("user");
        user.set("name", "b");

        assert_eq!(leaf_log.lock()[0].value, Some(json!("b")));
        let parent = parent_log.lock();
        assert_eq!(parent.len(), 1);
        assert!(parent[0].deep);
        assert_eq!(parent[0].value, Some(json!({"name": "b"})));
        assert_eq!(parent[0].value, parent[0].old);
    }

    #[test]
    fn root_writes_do_not_bubble() {
        let state = ReactiveState::new(json!({}));
        let (_root, root_log) = recorder(&state, "");

        state.proxy().set("x", 1);
        assert!(root_log.lock().is_empty());
    }

    #[test]
    fn delete_notifies_with_none() {
        let state = ReactiveState::new(json!({"a": {"b": 1}}));
        let (_sub, log) = recorder(&state, "a.b");

        let old = state.delete_path("a.b").unwrap();

        assert_eq!(old, Some(json!(1)));
        assert_eq!(log.lock()[0].value, None);
        assert_eq!(log.lock()[0].old, Some(json!(1)));
        assert_eq!(state.snapshot(), json!({"a": {}}));
    }

    #[test]
    fn numeric_keys_reach_index_observers() {
        let state = ReactiveState::new(json!({"items": ["a", "b", "c"]}));
        let (_sub, log) = recorder(&state, "items[2]");

        state.proxy().child("items").set("2", "z");
        state.set_path("items.2", "y").unwrap();

        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].path, "items[2]");
        assert_eq!(log[1].old, Some(json!("z")));
        assert_eq!(state.get_path("items[2]").unwrap(), Some(json!("y")));
    }

    #[test]
    fn non_container_intermediates_are_replaced() {
        let state = ReactiveState::new(json!({"a": 5}));
        state.set_path("a.b", 1).unwrap();
        assert_eq!(state.snapshot(), json!({"a": {"b": 1}}));
    }

    #[test]
    fn read_wraps_containers_only() {
        let state = ReactiveState::new(json!({"n": 1, "obj": {"x": 1}, "list": [1]}));
        let root = state.proxy();

        assert_eq!(root.read("n"), Some(Entry::Value(json!(1))));
        assert!(matches!(root.read("obj"), Some(Entry::Nested(p)) if p.path().to_string() == "obj"));
        assert!(matches!(root.read("list"), Some(Entry::Nested(_))));
        assert_eq!(root.read("missing"), None);
    }

    #[test]
    fn nested_proxies_compare_by_path() {
        let state = ReactiveState::new(json!({"a": {"b": {}}}));
        let first = state.proxy().child("a").child("b");
        let second = state.proxy().child("a").child("b");
        assert_eq!(first, second);

        let other = ReactiveState::new(json!({"a": {"b": {}}}));
        assert_ne!(first, other.proxy().child("a").child("b"));
    }

    #[test]
    fn nested_writes_through_fresh_proxies_notify() {
        let state = ReactiveState::new(json!({"a": {"b": {"c": 0}}}));
        let (_sub, log) = recorder(&state, "a.b.c");

        for i in 1..=3 {
            state.proxy().child("a").child("b").set("c", i);
        }

        assert_eq!(log.lock().len(), 3);
        assert_eq!(state.get_path("a.b.c").unwrap(), Some(json!(3)));
    }

    #[test]
    fn relative_observe_uses_full_path() {
        let state = ReactiveState::new(json!({"user": {"address": [{"city": "x"}]}}));
        let address = state.at("user.address[0]").unwrap();
        let (_sub, log) = recorder(&state, "user.address[0].city");

        address.set_path("city", "y").unwrap();
        assert_eq!(log.lock()[0].path, "user.address[0].city");
        assert_eq!(state.subscriber_count("user.address[0].city"), 1);

        let sub = address.observe("city", |_| {}).unwrap();
        assert_eq!(sub.path(), "user.address[0].city");
        assert_eq!(state.subscriber_count("user.address[0].city"), 2);
    }

    #[test]
    fn unsubscribed_callback_stops_firing() {
        let state = ReactiveState::new(json!({"x": 0}));
        let (sub, log) = recorder(&state, "x");

        state.proxy().set("x", 1);
        sub.unsubscribe();
        sub.unsubscribe();
        state.proxy().set("x", 2);

        assert_eq!(log.lock().len(), 1);
    }

    #[test]
    fn callbacks_may_write_back_without_deadlock() {
        let state = ReactiveState::new(json!({"a": 0, "b": 0}));
        let writer = state.clone();
        let _sub = state
            .observe("a", move |change| {
                writer.proxy().set("b", change.value.clone().unwrap_or(Value::Null));
            })
            .unwrap();

        state.proxy().set("a", 9);
        assert_eq!(state.get_path("b").unwrap(), Some(json!(9)));
    }

    #[test]
    fn serde_helpers() {
        #[derive(Serialize, serde::Deserialize, Debug, PartialEq)]
        struct User {
            name: String,
        }

        let state = ReactiveState::from_serialize(&json!({"users": []})).unwrap();
        let users = state.proxy().child("users");
        users.set_serialized(0usize, &User { name: "ada".into() }).unwrap();

        let user: User = users.at(0).value_as().unwrap().unwrap();
        assert_eq!(user, User { name: "ada".into() });
        assert_eq!(users.len(), Some(1));
        assert!(users.is_array());
    }
}
