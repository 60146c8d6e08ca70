//! Typed per-request attachments.
//!
//! Stages hand data to later stages through the attachment map carried on the
//! [`RequestContext`](crate::RequestContext). Every slot is addressed by an
//! [`AttachmentKey`], which pairs a stable name with the value type stored
//! under it, so lookups never go through untyped string maps.
//!
//! # Example
//!
//! ```
//! use turnstile_core::{AttachmentKey, Attachments};
//!
//! const BUCKET: AttachmentKey<u32> = AttachmentKey::new("bucket");
//!
//! let mut attachments = Attachments::new();
//! attachments.insert(BUCKET, 7);
//! assert_eq!(attachments.get(BUCKET), Some(&7));
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// A named, typed key into an [`Attachments`] map.
///
/// Keys are usually declared as `const` items next to the stage that writes
/// them, so both the writer and its readers share one definition.
pub struct AttachmentKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> AttachmentKey<T> {
    /// Creates a key with the given name.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    /// Returns the key name.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> Clone for AttachmentKey<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for AttachmentKey<T> {}

impl<T> fmt::Debug for AttachmentKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AttachmentKey").field(&self.name).finish()
    }
}

/// Mutable attachment storage for one request.
#[derive(Default)]
pub struct Attachments {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Attachments {
    /// Creates an empty attachment map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a value, returning the previous value under the same key.
    pub fn insert<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>, value: T) -> Option<T> {
        self.values
            .insert(key.name, Box::new(value))
            .and_then(|old| old.downcast().ok())
            .map(|b| *b)
    }

    /// Returns the value stored under `key`, if any.
    ///
    /// Returns `None` if the slot holds a value of a different type.
    #[must_use]
    pub fn get<T: Send + Sync + 'static>(&self, key: AttachmentKey<T>) -> Option<&T> {
        self.values.get(key.name).and_then(|v| v.downcast_ref())
    }

    /// Removes and returns the value stored under `key`.
    pub fn remove<T: Send + Sync + 'static>(&mut self, key: AttachmentKey<T>) -> Option<T> {
        self.values
            .remove(key.name)
            .and_then(|v| v.downcast().ok())
            .map(|b| *b)
    }

    /// Returns `true` if a value of type `T` is stored under `key`.
    #[must_use]
    pub fn contains<T: Send + Sync + 'static>(&self, key: AttachmentKey<T>) -> bool {
        self.get(key).is_some()
    }

    /// Returns the names of all occupied slots, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.values.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Returns the number of occupied slots.
    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Returns `true` if no attachment has been written.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl fmt::Debug for Attachments {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Attachments")
            .field("keys", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const COUNT: AttachmentKey<u32> = AttachmentKey::new("count");
    const LABEL: AttachmentKey<String> = AttachmentKey::new("label");

    #[test]
    fn test_insert_and_get() {
        let mut attachments = Attachments::new();
        assert!(attachments.is_empty());

        attachments.insert(COUNT, 3);
        attachments.insert(LABEL, "gold".to_string());

        assert_eq!(attachments.get(COUNT), Some(&3));
        assert_eq!(attachments.get(LABEL).map(String::as_str), Some("gold"));
        assert_eq!(attachments.len(), 2);
    }

    #[test]
    fn test_insert_replaces_previous_value() {
        let mut attachments = Attachments::new();
        assert_eq!(attachments.insert(COUNT, 1), None);
        assert_eq!(attachments.insert(COUNT, 2), Some(1));
        assert_eq!(attachments.get(COUNT), Some(&2));
    }

    #[test]
    fn test_type_mismatch_reads_as_absent() {
        const SHADOW: AttachmentKey<String> = AttachmentKey::new("count");

        let mut attachments = Attachments::new();
        attachments.insert(COUNT, 9);

        assert!(attachments.get(SHADOW).is_none());
        assert!(!attachments.contains(SHADOW));
        assert!(attachments.contains(COUNT));
    }

    #[test]
    fn test_remove() {
        let mut attachments = Attachments::new();
        attachments.insert(LABEL, "x".to_string());

        assert_eq!(attachments.remove(LABEL), Some("x".to_string()));
        assert!(attachments.remove(LABEL).is_none());
    }

    #[test]
    fn test_names_sorted() {
        let mut attachments = Attachments::new();
        attachments.insert(LABEL, String::new());
        attachments.insert(COUNT, 0);

        assert_eq!(attachments.names(), vec!["count", "label"]);
        assert!(format!("{attachments:?}").contains("count"));
    }
}
