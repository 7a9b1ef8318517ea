//! Named values handed to the surrounding trainer's logging sink.
use std::collections::{
    hash_map::{IntoIter, Iter, Keys},
    HashMap,
};

/// A value that can be stored in a [`Record`].
#[derive(Debug, Clone, PartialEq)]
pub enum RecordValue {
    /// A single floating-point value.
    Scalar(f32),

    /// A 1-dimensional array.
    Array1(Vec<f32>),

    /// A text value.
    String(String),
}

/// A container of named values.
///
/// Produced by parameter-statistics and debug-introspection calls; the
/// surrounding trainer forwards records to whatever sink it owns.
#[derive(Debug, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Inserts a key-value pair.
    pub fn insert(&mut self, key: impl Into<String>, value: RecordValue) {
        self.0.insert(key.into(), value);
    }

    /// Returns the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&RecordValue> {
        self.0.get(key)
    }

    /// Returns the scalar stored under `key`, if it is a scalar.
    pub fn get_scalar(&self, key: &str) -> Option<f32> {
        match self.0.get(key) {
            Some(RecordValue::Scalar(v)) => Some(*v),
            _ => None,
        }
    }

    /// Returns an iterator over the keys.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Returns an iterator over key-value pairs.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Merges two records, the right-hand side winning on key collisions.
    pub fn merge(mut self, other: Record) -> Self {
        self.0.extend(other.0);
        self
    }

    /// Returns `true` when the record holds no values.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

impl IntoIterator for Record {
    type Item = (String, RecordValue);
    type IntoIter = IntoIter<String, RecordValue>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_access() {
        let mut record = Record::from_scalar("value_loss", 0.25);
        record.insert("branch", RecordValue::String("off_policy".into()));

        assert_eq!(record.get_scalar("value_loss"), Some(0.25));
        assert_eq!(record.get_scalar("branch"), None);
        assert_eq!(record.len(), 2);
    }

    #[test]
    fn merge_prefers_right_hand_side() {
        let left = Record::from_scalar("x", 1.0);
        let right = Record::from_scalar("x", 2.0);
        assert_eq!(left.merge(right).get_scalar("x"), Some(2.0));
    }
}
