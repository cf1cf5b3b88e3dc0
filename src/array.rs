//! Structural array mutators.
//!
//! Arrays are tracked as a whole: every mutator below observes the elements
//! it inserts and then notifies the array observer's dep once. Arrays that
//! were never observed are mutated without notification.

use crate::observer::observe_items;
use crate::value::{Array, Value};
use std::cmp::Ordering;

impl Array {
    /// Append elements. Returns the new length.
    pub fn push(&self, items: impl IntoIterator<Item = Value>) -> usize {
        let items: Vec<Value> = items.into_iter().collect();
        let len = {
            let mut guard = self.inner.items.write();
            guard.extend(items.iter().cloned());
            guard.len()
        };
        self.after_mutation(&items);
        len
    }

    /// Remove and return the last element.
    pub fn pop(&self) -> Option<Value> {
        let removed = self.inner.items.write().pop();
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Remove and return the first element.
    pub fn shift(&self) -> Option<Value> {
        let removed = {
            let mut guard = self.inner.items.write();
            (!guard.is_empty()).then(|| guard.remove(0))
        };
        if removed.is_some() {
            self.after_mutation(&[]);
        }
        removed
    }

    /// Prepend elements. Returns the new length.
    pub fn unshift(&self, items: impl IntoIterator<Item = Value>) -> usize {
        let items: Vec<Value> = items.into_iter().collect();
        let len = {
            let mut guard = self.inner.items.write();
            guard.splice(0..0, items.iter().cloned());
            guard.len()
        };
        self.after_mutation(&items);
        len
    }

    /// Remove `delete_count` elements starting at `start` and insert `items`
    /// in their place. Out-of-range bounds are clamped. Returns the removed
    /// elements.
    pub fn splice(&self, start: usize, delete_count: usize, items: Vec<Value>) -> Vec<Value> {
        let removed: Vec<Value> = {
            let mut guard = self.inner.items.write();
            let start = start.min(guard.len());
            let end = start.saturating_add(delete_count).min(guard.len());
            guard.splice(start..end, items.iter().cloned()).collect()
        };
        self.after_mutation(&items);
        removed
    }

    /// Sort in place with a comparator.
    ///
    /// The comparator runs on a snapshot, outside the array's lock, so it may
    /// read the array itself.
    pub fn sort_by<F>(&self, compare: F)
    where
        F: FnMut(&Value, &Value) -> Ordering,
    {
        let mut snapshot = self.to_vec();
        snapshot.sort_by(compare);
        *self.inner.items.write() = snapshot;
        self.after_mutation(&[]);
    }

    /// Reverse in place.
    pub fn reverse(&self) {
        self.inner.items.write().reverse();
        self.after_mutation(&[]);
    }

    /// Grow to `len` elements, padding with `Undefined`. Does not notify.
    /// Returns false, leaving the array untouched, when the memory for `len`
    /// elements cannot be reserved.
    pub(crate) fn resize(&self, len: usize) -> bool {
        let mut guard = self.inner.items.write();
        let missing = len.saturating_sub(guard.len());
        if missing == 0 {
            return true;
        }
        if guard.try_reserve_exact(missing).is_err() {
            return false;
        }
        guard.resize(len, Value::Undefined);
        true
    }

    fn after_mutation(&self, inserted: &[Value]) {
        let Some(observer) = self.observer() else {
            return;
        };
        observe_items(inserted);
        observer.dep().notify();
    }
}

#[cfg(test)]
mod tests {
    use crate::observer::observe;
    use crate::value::{Array, Object, Value};

    fn numbers(array: &Array) -> Vec<f64> {
        array.to_vec().iter().filter_map(Value::as_f64).collect()
    }

    #[test]
    fn mutators_follow_list_semantics() {
        let array = Array::from(vec![Value::from(2), Value::from(3)]);

        assert_eq!(array.unshift([Value::from(1)]), 3);
        assert_eq!(array.push([Value::from(4), Value::from(5)]), 5);
        assert_eq!(array.shift(), Some(Value::from(1)));
        assert_eq!(array.pop(), Some(Value::from(5)));
        assert_eq!(numbers(&array), vec![2.0, 3.0, 4.0]);

        let removed = array.splice(1, 1, vec![Value::from(9), Value::from(8)]);
        assert_eq!(removed, vec![Value::from(3)]);
        assert_eq!(numbers(&array), vec![2.0, 9.0, 8.0, 4.0]);

        array.sort_by(|a, b| a.as_f64().partial_cmp(&b.as_f64()).unwrap());
        assert_eq!(numbers(&array), vec![2.0, 4.0, 8.0, 9.0]);

        array.reverse();
        assert_eq!(numbers(&array), vec![9.0, 8.0, 4.0, 2.0]);
    }

    #[test]
    fn splice_clamps_out_of_range_bounds() {
        let array = Array::from(vec![Value::from(1)]);

        let removed = array.splice(5, 10, vec![Value::from(2)]);

        assert!(removed.is_empty());
        assert_eq!(numbers(&array), vec![1.0, 2.0]);
    }

    #[test]
    fn popping_an_empty_array_returns_none() {
        let array = Array::new();
        assert_eq!(array.pop(), None);
        assert_eq!(array.shift(), None);
    }

    #[test]
    fn inserted_elements_of_observed_arrays_are_observed() {
        let array = Array::new();
        observe(&Value::from(array.clone()), false);

        let pushed = Object::new();
        array.push([Value::from(pushed.clone())]);

        assert!(pushed.observer().is_some());
    }

    #[test]
    fn unobserved_arrays_stay_unobserved() {
        let array = Array::new();
        let pushed = Object::new();

        array.push([Value::from(pushed.clone())]);

        assert!(pushed.observer().is_none());
        assert!(array.observer().is_none());
    }
}
