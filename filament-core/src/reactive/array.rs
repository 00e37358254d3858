//! Array mutators on [`StateProxy`].
//!
//! Each mutator applies the native operation to the array at the proxy's
//! path, then notifies the array path with `(new, old)` snapshots. `push`
//! and `unshift` additionally notify each inserted index.
//!
//! A missing or `null` value is created as an empty array first. Any other
//! non-array value is left alone and the call does nothing.

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::PathError;

use super::path::Segment;
use super::state::{check_padding, container_mut, get_in, slot_mut, StateProxy};
use super::subscriber::Change;

/// Indices that received new items.
enum Inserted {
    None,
    Range(std::ops::Range<usize>),
}

impl StateProxy {
    /// Append `value`. Returns the new length.
    pub fn push(&self, value: impl Into<Value>) -> usize {
        self.push_all([value.into()])
    }

    /// Append every item. Returns the new length.
    pub fn push_all(&self, items: impl IntoIterator<Item = Value>) -> usize {
        let items: Vec<Value> = items.into_iter().collect();
        self.mutate_array("push", move |array| {
            let start = array.len();
            array.extend(items);
            (array.len(), Inserted::Range(start..array.len()))
        })
        .unwrap_or(0)
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        self.mutate_array("pop", |array| (array.pop(), Inserted::None))
            .flatten()
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        self.mutate_array("shift", |array| {
            let first = (!array.is_empty()).then(|| array.remove(0));
            (first, Inserted::None)
        })
        .flatten()
    }

    /// Prepend `value`. Returns the new length.
    pub fn unshift(&self, value: impl Into<Value>) -> usize {
        self.unshift_all([value.into()])
    }

    /// Prepend every item, keeping their order. Returns the new length.
    pub fn unshift_all(&self, items: impl IntoIterator<Item = Value>) -> usize {
        let items: Vec<Value> = items.into_iter().collect();
        self.mutate_array("unshift", move |array| {
            let count = items.len();
            array.splice(0..0, items);
            (array.len(), Inserted::Range(0..count))
        })
        .unwrap_or(0)
    }

    /// Remove `delete_count` items at `start` and insert `items` there.
    /// Out-of-range arguments are clamped. Returns the removed items.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        self.mutate_array("splice", move |array| {
            let start = start.min(array.len());
            let end = start.saturating_add(delete_count).min(array.len());
            let removed = array.splice(start..end, items).collect();
            (removed, Inserted::None)
        })
        .unwrap_or_default()
    }

    /// Sort using [`compare_values`].
    pub fn sort(&self) {
        self.sort_by(compare_values);
    }

    /// Sort in place with `compare`, then notify the array path.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        self.mutate_array("sort", move |array| {
            array.sort_by(compare);
            ((), Inserted::None)
        });
    }

    /// Reverse in place, then notify the array path.
    pub fn reverse(&self) {
        self.mutate_array("reverse", |array| {
            array.reverse();
            ((), Inserted::None)
        });
    }

    fn mutate_array<R>(
        &self,
        op: &'static str,
        apply: impl FnOnce(&mut Vec<Value>) -> (R, Inserted),
    ) -> Option<R> {
        let (result, inserted, old, new) = {
            let mut target = self.state.inner.target.write();

            let existed = match get_in(&target, self.path.segments()) {
                Some(Value::Array(_)) => true,
                None | Some(Value::Null) => false,
                Some(_) => {
                    tracing::warn!(path = %self.path, op, "array method called on a non-array value");
                    return None;
                }
            };

            let slot = match self.path.split_last() {
                None => &mut *target,
                Some((parent, last)) => match array_slot(&mut target, parent.segments(), last) {
                    Ok(slot) => slot,
                    Err(err) => {
                        tracing::warn!(path = %self.path, op, error = %err, "array method skipped");
                        return None;
                    }
                },
            };
            if !slot.is_array() {
                *slot = Value::Array(Vec::new());
            }
            let Value::Array(array) = slot else {
                return None;
            };

            let old = existed.then(|| Value::Array(array.clone()));
            let (result, inserted) = apply(array);
            let new = Value::Array(array.clone());
            (result, inserted, old, new)
        };

        let array_path = self.path.to_string();
        tracing::trace!(path = %array_path, op, "array mutated");
        self.state
            .notify(Change::direct(array_path, Some(new.clone()), old));

        if let Inserted::Range(indices) = inserted {
            for index in indices {
                let item = new.get(index).cloned();
                let path = self.path.join(Segment::Index(index)).to_string();
                self.state.notify(Change::direct(path, item, None));
            }
        }

        Some(result)
    }
}

fn array_slot<'a>(root: &'a mut Value, parent: &[Segment], last: &Segment) -> Result<&'a mut Value, PathError> {
    check_padding(root, parent, last)?;
    let container = container_mut(root, parent, last)?;
    slot_mut(container, last)
}

/// Total order over JSON values: null, booleans, numbers, strings, arrays,
/// then objects. Arrays compare element-wise, objects by their entries.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    fn rank(value: &Value) -> u8 {
        match value {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            Value::Array(_) => 4,
            Value::Object(_) => 5,
        }
    }

    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.total_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => x
            .iter()
            .zip(y)
            .map(|(l, r)| compare_values(l, r))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        (Value::Object(x), Value::Object(y)) => x
            .iter()
            .zip(y)
            .map(|((lk, lv), (rk, rv))| lk.cmp(rk).then_with(|| compare_values(lv, rv)))
            .find(|o| o.is_ne())
            .unwrap_or_else(|| x.len().cmp(&y.len())),
        _ => rank(a).cmp(&rank(b)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::ReactiveState;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::sync::Arc;

    fn log_paths(state: &ReactiveState, paths: &[&str]) -> Arc<Mutex<Vec<Change>>> {
        let log = Arc::new(Mutex::new(Vec::new()));
        for path in paths {
            let sink = log.clone();
            let _ = state.observe(path, move |c| sink.lock().push(c.clone())).unwrap();
        }
        log
    }

    #[test]
    fn push_notifies_array_then_item() {
        let state = ReactiveState::new(json!({"items": [1, 2]}));
        let log = log_paths(&state, &["items", "items[2]"]);

        let len = state.proxy().child("items").push(3);

        assert_eq!(len, 3);
        let log = log.lock();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].path, "items");
        assert_eq!(log[0].value, Some(json!([1, 2, 3])));
        assert_eq!(log[0].old, Some(json!([1, 2])));
        assert_eq!(log[1].path, "items[2]");
        assert_eq!(log[1].value, Some(json!(3)));
        assert_eq!(log[1].old, None);
    }

    #[test]
    fn unshift_notifies_each_front_index() {
        let state = ReactiveState::new(json!({"items": ["c"]}));
        let log = log_paths(&state, &["items", "items[0]", "items[1]", "items[2]"]);

        state
            .proxy()
            .child("items")
            .unshift_all([json!("a"), json!("b")]);

        let paths: Vec<String> = log.lock().iter().map(|c| c.path.clone()).collect();
        assert_eq!(paths, ["items", "items[0]", "items[1]"]);
        assert_eq!(state.get_path("items").unwrap(), Some(json!(["a", "b", "c"])));
    }

    #[test]
    fn removal_methods_notify_whole_array_only() {
        let state = ReactiveState::new(json!({"items": [1, 2, 3, 4]}));
        let log = log_paths(&state, &["items", "items[0]"]);
        let items = state.proxy().child("items");

        assert_eq!(items.pop(), Some(json!(4)));
        assert_eq!(items.shift(), Some(json!(1)));
        assert_eq!(items.splice(0, 1, vec![json!(9), json!(8)]), vec![json!(2)]);

        let log = log.lock();
        assert_eq!(log.len(), 3);
        assert!(log.iter().all(|c| c.path == "items"));
        assert_eq!(log[2].value, Some(json!([9, 8, 3])));
    }

    #[test]
    fn sort_and_reverse() {
        let state = ReactiveState::new(json!({"xs": [3, "b", null, 1, "a"]}));
        let xs = state.proxy().child("xs");

        xs.sort();
        assert_eq!(xs.value(), Some(json!([null, 1, 3, "a", "b"])));

        xs.reverse();
        assert_eq!(xs.value(), Some(json!(["b", "a", 3, 1, null])));

        xs.sort_by(|a, b| compare_values(b, a));
        assert_eq!(xs.value(), Some(json!(["b", "a", 3, 1, null])));
    }

    #[test]
    fn missing_array_is_created() {
        let state = ReactiveState::new(json!({}));
        let log = log_paths(&state, &["list"]);

        state.proxy().child("list").push("x");

        assert_eq!(state.snapshot(), json!({"list": ["x"]}));
        assert_eq!(log.lock()[0].old, None);
    }

    #[test]
    fn non_array_is_left_alone() {
        let state = ReactiveState::new(json!({"n": 5}));
        let log = log_paths(&state, &["n"]);

        assert_eq!(state.proxy().child("n").push(1), 0);
        assert_eq!(state.proxy().child("n").pop(), None);
        assert_eq!(state.snapshot(), json!({"n": 5}));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn arrays_far_past_the_end_are_not_created() {
        let state = ReactiveState::new(json!({"rows": []}));
        let log = log_paths(&state, &["rows", "rows[4000000000]"]);

        let far = state.at("rows[4000000000]").unwrap();
        assert_eq!(far.push(1), 0);
        assert_eq!(state.snapshot(), json!({"rows": []}));
        assert!(log.lock().is_empty());
    }

    #[test]
    fn splice_clamps_out_of_range() {
        let state = ReactiveState::new(json!([1, 2]));
        let root = state.proxy();
        assert_eq!(root.splice(10, 10, vec![json!(3)]), Vec::<Value>::new());
        assert_eq!(root.value(), Some(json!([1, 2, 3])));
    }
}
