//! Machine property bag with change listeners.

use crate::error::CoreError;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

/// A change delivered to property listeners.
#[derive(Debug)]
pub struct PropertyChange<'a> {
    pub key: &'a str,
    pub old: Option<&'a Value>,
    pub new: &'a Value,
}

/// Callback invoked synchronously on every `set` once the machine is initialized.
///
/// Returning an error rejects the change: the previous value is restored and the
/// error is returned from `set`.
pub type PropertyListener =
    Arc<dyn Fn(&PropertyChange<'_>) -> Result<(), CoreError> + Send + Sync>;

/// Identifies a registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

struct Registration {
    id: ListenerId,
    /// `None` listens to every key.
    key: Option<String>,
    listener: PropertyListener,
}

/// Arbitrary key/value store attached to a machine.
pub struct PropertyBag {
    values: BTreeMap<String, Value>,
    listeners: Vec<Registration>,
    next_listener: u64,
    notify: bool,
}

impl PropertyBag {
    pub fn new() -> Self {
        Self {
            values: BTreeMap::new(),
            listeners: Vec::new(),
            next_listener: 0,
            notify: false,
        }
    }

    /// Gets a property value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns true if the key is present.
    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// Sets a property, notifying matching listeners.
    ///
    /// Listeners run in registration order; keyed listeners and wildcard
    /// listeners are interleaved as registered.
    pub fn set(&mut self, key: impl Into<String>, value: Value) -> Result<(), CoreError> {
        let key = key.into();
        let old = self.values.insert(key.clone(), value);

        if !self.notify {
            return Ok(());
        }

        let new = &self.values[&key];
        let change = PropertyChange {
            key: &key,
            old: old.as_ref(),
            new,
        };

        let mut rejected = None;
        for registration in &self.listeners {
            let matches = registration
                .key
                .as_deref()
                .map_or(true, |k| k == change.key);
            if !matches {
                continue;
            }
            let outcome =
                panic::catch_unwind(AssertUnwindSafe(|| (registration.listener)(&change)));
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    rejected = Some(e);
                    break;
                }
                Err(_) => {
                    rejected = Some(CoreError::Callback {
                        state: format!("property listener for '{}'", key),
                        source: "listener panicked".into(),
                    });
                    break;
                }
            }
        }

        if let Some(err) = rejected {
            tracing::warn!("property '{}' change rejected: {}", key, err);
            match old {
                Some(previous) => {
                    self.values.insert(key, previous);
                }
                None => {
                    self.values.remove(&key);
                }
            }
            return Err(err);
        }

        Ok(())
    }

    /// Inserts without notifying listeners.
    pub(crate) fn insert_silently(&mut self, key: impl Into<String>, value: Value) {
        self.values.insert(key.into(), value);
    }

    /// Removes a property. Listeners are not notified.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.values.remove(key)
    }

    /// Registers a listener for one key, or for every key when `key` is `None`.
    pub fn add_listener(&mut self, key: Option<&str>, listener: PropertyListener) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.push(Registration {
            id,
            key: key.map(str::to_string),
            listener,
        });
        id
    }

    /// Removes a listener. Returns true if it was registered.
    pub fn remove_listener(&mut self, id: ListenerId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|r| r.id != id);
        self.listeners.len() != before
    }

    /// Iterates over all key/value pairs in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Enables listener notification. Called once the machine is initialized.
    pub(crate) fn enable_notifications(&mut self) {
        self.notify = true;
    }
}

impl Default for PropertyBag {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PropertyBag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyBag")
            .field("values", &self.values)
            .field("listeners", &self.listeners.len())
            .field("notify", &self.notify)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(counter: Arc<AtomicUsize>) -> PropertyListener {
        Arc::new(move |_change: &PropertyChange<'_>| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[test]
    fn test_set_and_get() {
        let mut bag = PropertyBag::new();
        bag.set("limit", json!(10)).unwrap();
        assert_eq!(bag.get("limit"), Some(&json!(10)));
        assert!(bag.contains("limit"));
        assert!(bag.get("missing").is_none());
    }

    #[test]
    fn test_listeners_silent_until_enabled() {
        let mut bag = PropertyBag::new();
        let counter = Arc::new(AtomicUsize::new(0));
        bag.add_listener(None, counting_listener(counter.clone()));

        bag.set("a", json!(1)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);

        bag.enable_notifications();
        bag.set("a", json!(2)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_keyed_and_wildcard_listeners() {
        let mut bag = PropertyBag::new();
        bag.enable_notifications();

        let keyed = Arc::new(AtomicUsize::new(0));
        let wildcard = Arc::new(AtomicUsize::new(0));
        bag.add_listener(Some("mode"), counting_listener(keyed.clone()));
        bag.add_listener(None, counting_listener(wildcard.clone()));

        bag.set("mode", json!("fast")).unwrap();
        bag.set("other", json!(true)).unwrap();

        assert_eq!(keyed.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_listener_sees_old_and_new() {
        let mut bag = PropertyBag::new();
        bag.enable_notifications();
        bag.set("n", json!(1)).unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        bag.add_listener(
            Some("n"),
            Arc::new(move |change: &PropertyChange<'_>| {
                sink.lock().push((change.old.cloned(), change.new.clone()));
                Ok(())
            }),
        );

        bag.set("n", json!(2)).unwrap();
        assert_eq!(*seen.lock(), vec![(Some(json!(1)), json!(2))]);
    }

    #[test]
    fn test_rejected_change_rolls_back() {
        let mut bag = PropertyBag::new();
        bag.enable_notifications();
        bag.set("n", json!(1)).unwrap();
        bag.add_listener(
            Some("n"),
            Arc::new(|change: &PropertyChange<'_>| {
                if change.new.as_i64() == Some(13) {
                    Err(CoreError::malformed("unlucky"))
                } else {
                    Ok(())
                }
            }),
        );

        assert!(bag.set("n", json!(13)).is_err());
        assert_eq!(bag.get("n"), Some(&json!(1)));

        assert!(bag.set("fresh", json!(0)).is_ok());
        bag.add_listener(
            Some("fresh"),
            Arc::new(|_: &PropertyChange<'_>| Err(CoreError::malformed("no"))),
        );
        assert!(bag.set("fresh", json!(1)).is_err());
        assert_eq!(bag.get("fresh"), Some(&json!(0)));
    }

    #[test]
    fn test_remove_listener() {
        let mut bag = PropertyBag::new();
        bag.enable_notifications();
        let counter = Arc::new(AtomicUsize::new(0));
        let id = bag.add_listener(None, counting_listener(counter.clone()));

        assert!(bag.remove_listener(id));
        assert!(!bag.remove_listener(id));
        bag.set("x", json!(1)).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }
}
