// Copyright 2024 OctoFHIR Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Immutable, validated records

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Weak};

use super::evolver::RecordEvolver;
use super::schema::Schema;
use super::snapshot::RecordSnapshot;
use crate::collections::PersistentMap;
use crate::error::{PersistentError, Result};
use crate::model::{Hashed, Value};

struct RecordData {
    schema: Arc<Schema>,
    fields: PersistentMap<Arc<str>, Value>,
}

/// Immutable instance of a [`Schema`]
///
/// Cloning is cheap and keeps identity: clones are `ptr_eq`.
#[derive(Clone)]
pub struct Record {
    inner: Arc<RecordData>,
}

/// Non-owning reference to a record
#[derive(Clone)]
pub struct WeakRecord {
    inner: Weak<RecordData>,
}

impl WeakRecord {
    /// Recover the record if it is still alive
    pub fn upgrade(&self) -> Option<Record> {
        self.inner.upgrade().map(|inner| Record { inner })
    }
}

impl Record {
    pub(crate) fn from_parts(schema: Arc<Schema>, fields: PersistentMap<Arc<str>, Value>) -> Self {
        Self {
            inner: Arc::new(RecordData { schema, fields }),
        }
    }

    /// The record's schema
    pub fn schema(&self) -> &Arc<Schema> {
        &self.inner.schema
    }

    /// Schema name
    pub fn type_name(&self) -> &str {
        self.inner.schema.name()
    }

    /// Field value, or `None` when the field holds no value
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.inner.fields.get(name)
    }

    /// Field value, failing with `UndeclaredAttribute` when absent
    pub fn field(&self, name: &str) -> Result<&Value> {
        self.get(name)
            .ok_or_else(|| PersistentError::undeclared(self.type_name(), name))
    }

    /// Whether the field holds a value
    pub fn contains(&self, name: &str) -> bool {
        self.inner.fields.contains_key(name)
    }

    /// Number of fields holding a value
    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    /// True when no field holds a value
    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    /// Present fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        let fields = &self.inner.fields;
        self.inner
            .schema
            .field_names()
            .filter_map(move |name| fields.get(name).map(|value| (name, value)))
    }

    /// Underlying field map
    pub fn fields(&self) -> &PersistentMap<Arc<str>, Value> {
        &self.inner.fields
    }

    /// Start a batch of validated edits
    pub fn evolver(&self) -> RecordEvolver {
        RecordEvolver::new(self)
    }

    /// New record with one field replaced
    pub fn set(&self, name: &str, value: impl Into<Value>) -> Result<Record> {
        let mut evolver = self.evolver();
        evolver.set(name, value)?;
        evolver.persistent()
    }

    /// New record with several fields replaced, validated together
    pub fn set_many<I, K, V>(&self, pairs: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut evolver = self.evolver();
        for (name, value) in pairs {
            evolver.set(name.as_ref(), value)?;
        }
        evolver.persistent()
    }

    /// New record without the field's value
    pub fn remove(&self, name: &str) -> Result<Record> {
        let mut evolver = self.evolver();
        evolver.remove(name)?;
        evolver.persistent()
    }

    /// Plain dict of the present fields, using per-field serializers
    ///
    /// `format` is handed to custom field serializers. Fields without one
    /// pass their values through unchanged, recursing into nested records.
    pub fn serialize(&self, format: &dyn Fn(&Value) -> Value) -> Value {
        let mut out = IndexMap::with_capacity(self.len());
        for (name, field) in self.inner.schema.fields() {
            if let Some(value) = self.get(name) {
                out.insert(name.to_string(), field.serialize_value(format, value));
            }
        }
        Value::Dict(out)
    }

    /// `serialize` with an identity formatter
    pub fn to_plain(&self) -> Value {
        self.serialize(&|value: &Value| value.clone())
    }

    /// Kind-tagged snapshot that a registry can restore
    pub fn snapshot(&self) -> RecordSnapshot {
        RecordSnapshot::of(self)
    }

    /// Content hash, or the schema's hash override
    pub fn try_hash(&self) -> Result<u64> {
        if let Some(hash_with) = self.inner.schema.hash_override() {
            return hash_with(self);
        }
        let mut hasher = FxHasher::default();
        for (name, value) in self.iter() {
            name.hash(&mut hasher);
            hasher.write_u64(value.try_hash()?);
        }
        Ok(hasher.finish())
    }

    /// Pair the record with its hash for use as a map key
    pub fn hashable(&self) -> Result<Hashed<Record>> {
        let hash = self.try_hash()?;
        Ok(Hashed::new(self.clone(), hash))
    }

    /// Whether both handles refer to the same record
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Non-owning reference to this record
    pub fn downgrade(&self) -> WeakRecord {
        WeakRecord {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        if let Some(eq) = self.inner.schema.eq_override() {
            return eq(self, other);
        }
        // Reflected: the other side's override decides
        if let Some(eq) = other.inner.schema.eq_override() {
            return eq(other, self);
        }
        Arc::ptr_eq(&self.inner.schema, &other.inner.schema) && self.inner.fields == other.inner.fields
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.type_name())?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{name}={value}")?;
        }
        write!(f, ")")
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Field, FieldType};

    fn point() -> Arc<Schema> {
        Schema::builder("Point")
            .field("x", Field::new().of_type(FieldType::Integer))
            .field("y", Field::new().of_type(FieldType::Integer))
            .build()
    }

    #[test]
    fn test_display() {
        let p = point().create([("x", 1), ("y", 2)]).unwrap();
        assert_eq!(p.to_string(), "Point(x=1, y=2)");
        assert_eq!(point().create([("y", 2)]).unwrap().to_string(), "Point(y=2)");
    }

    #[test]
    fn test_equality_requires_same_schema() {
        let schema = point();
        let a = schema.create([("x", 1)]).unwrap();
        let b = schema.create([("x", 1)]).unwrap();
        assert_eq!(a, b);
        assert!(!a.ptr_eq(&b));

        let other = point().create([("x", 1)]).unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn test_field_access() {
        let p = point().create([("x", 1)]).unwrap();
        assert_eq!(p.field("x"), Ok(&Value::from(1)));
        assert_eq!(p.field("y"), Err(PersistentError::undeclared("Point", "y")));
        assert!(p.contains("x"));
        assert!(!p.contains("y"));
    }

    #[test]
    fn test_weak_reference() {
        let p = point().create([("x", 1)]).unwrap();
        let weak = p.downgrade();
        assert!(weak.upgrade().is_some_and(|r| r.ptr_eq(&p)));
        drop(p);
        assert!(weak.upgrade().is_none());
    }

    #[test]
    fn test_hash_is_content_based() {
        let schema = point();
        let a = schema.create([("x", 1), ("y", 2)]).unwrap();
        let b = schema.create([("y", 2), ("x", 1)]).unwrap();
        assert_eq!(a.try_hash().unwrap(), b.try_hash().unwrap());
        assert_eq!(a.hashable().unwrap(), b.hashable().unwrap());
    }
}
