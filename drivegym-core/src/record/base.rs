//! Base implementation of records for logging.
use crate::error::DrivegymError;
use chrono::prelude::{DateTime, Local};
use std::{
    collections::{
        hash_map::{Iter, Keys},
        HashMap,
    },
    convert::Into,
};

/// Represents possible types of values in a [`Record`].
#[derive(Debug, Clone)]
pub enum RecordValue {
    /// A single floating-point value, typically used for metrics.
    Scalar(f32),

    /// A timestamp with local timezone.
    DateTime(DateTime<Local>),

    /// A 1-dimensional array of floating-point values.
    Array1(Vec<f32>),

    /// A 3-dimensional array with shape information, e.g. an image frame.
    Array3(Vec<f32>, [usize; 3]),
}

/// A container of key-value pairs of [`RecordValue`].
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

    /// Returns an iterator over the keys in the record.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Returns an iterator over the key-value pairs in the record.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Gets a reference to the value associated with the given key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Merges two records, consuming both.
    ///
    /// If both records contain the same key, the value from the second record
    /// overwrites the value from the first record.
    pub fn merge(self, record: Record) -> Self {
        Record(self.0.into_iter().chain(record.0).collect())
    }

    /// Gets a scalar value from the record.
    pub fn get_scalar(&self, k: &str) -> Result<f32, DrivegymError> {
        if let Some(v) = self.0.get(k) {
            match v {
                RecordValue::Scalar(v) => Ok(*v),
                _ => Err(DrivegymError::RecordValueTypeError("Scalar".to_string())),
            }
        } else {
            Err(DrivegymError::RecordKeyError(k.to_string()))
        }
    }

    /// Gets a 1-dimensional array from the record.
    pub fn get_array1(&self, k: &str) -> Result<Vec<f32>, DrivegymError> {
        if let Some(v) = self.0.get(k) {
            match v {
                RecordValue::Array1(v) => Ok(v.clone()),
                _ => Err(DrivegymError::RecordValueTypeError("Array1".to_string())),
            }
        } else {
            Err(DrivegymError::RecordKeyError(k.to_string()))
        }
    }

    /// Checks if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{Record, RecordValue};

    #[test]
    fn merge_overwrites_with_second_value() {
        let a = Record::from_scalar("reward", 1.0);
        let mut b = Record::from_scalar("reward", 2.0);
        b.insert("lr", RecordValue::Scalar(1e-4));

        let merged = a.merge(b);
        assert_eq!(merged.get_scalar("reward").unwrap(), 2.0);
        assert_eq!(merged.get_scalar("lr").unwrap(), 1e-4);
    }

    #[test]
    fn get_scalar_reports_missing_key() {
        let r = Record::empty();
        assert!(r.get_scalar("missing").is_err());
    }
}
