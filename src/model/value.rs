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

//! Core value type stored in record fields
//!
//! `List` and `Dict` are plain data: they are what serialization emits and
//! what nested construction accepts, and they cannot be hashed. The
//! persistent variants share structure and hash by content.

use indexmap::IndexMap;
use rustc_hash::FxHasher;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use super::hashable::Hashed;
use crate::collections::{PersistentMap, PersistentVector};
use crate::error::{PersistentError, Result};
use crate::record::Record;

/// Dynamic value held by a record field
#[derive(Clone, PartialEq)]
pub enum Value {
    /// Absence marker accepted by optional fields
    None,

    /// Boolean value
    Boolean(bool),

    /// Integer value (64-bit signed)
    Integer(i64),

    /// Floating point value
    Float(f64),

    /// String value
    String(Arc<str>),

    /// Plain ordered list (unhashable)
    List(Vec<Value>),

    /// Plain string-keyed associative structure (unhashable)
    Dict(IndexMap<String, Value>),

    /// Persistent vector of values
    Vector(PersistentVector<Value>),

    /// Persistent map from string keys to values
    Map(PersistentMap<Arc<str>, Value>),

    /// Nested record
    Record(Record),
}

impl Value {
    /// Type name used in type errors and hashing errors
    pub fn type_name(&self) -> &str {
        match self {
            Value::None => "None",
            Value::Boolean(_) => "bool",
            Value::Integer(_) => "int",
            Value::Float(_) => "float",
            Value::String(_) => "str",
            Value::List(_) => "list",
            Value::Dict(_) => "dict",
            Value::Vector(_) => "pvector",
            Value::Map(_) => "pmap",
            Value::Record(record) => record.type_name(),
        }
    }

    /// True for the absence marker
    pub fn is_none(&self) -> bool {
        matches!(self, Value::None)
    }

    /// Get as boolean if possible
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Get as integer if possible
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    /// Get as float if possible
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Get as string slice if possible
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Get as nested record if possible
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Get as persistent vector if possible
    pub fn as_vector(&self) -> Option<&PersistentVector<Value>> {
        match self {
            Value::Vector(v) => Some(v),
            _ => None,
        }
    }

    /// Get as persistent map if possible
    pub fn as_map(&self) -> Option<&PersistentMap<Arc<str>, Value>> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Get as plain dict if possible
    pub fn as_dict(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }

    /// Build a plain dict from `(key, value)` pairs
    pub fn dict<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Value::Dict(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a plain list
    pub fn list<V: Into<Value>, I: IntoIterator<Item = V>>(items: I) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }

    /// Content hash; fails with `Unhashable` on plain lists and dicts
    ///
    /// A record value hashes exactly like the record itself.
    pub fn try_hash(&self) -> Result<u64> {
        if let Value::Record(record) = self {
            return record.try_hash();
        }
        let mut hasher = FxHasher::default();
        self.hash_into(&mut hasher)?;
        Ok(hasher.finish())
    }

    /// Pair this value with its (already checked) hash
    pub fn hashable(self) -> Result<Hashed<Value>> {
        let hash = self.try_hash()?;
        Ok(Hashed::new(self, hash))
    }

    fn hash_into(&self, state: &mut FxHasher) -> Result<()> {
        match self {
            Value::None => state.write_u8(0),
            Value::Boolean(b) => {
                state.write_u8(1);
                b.hash(state);
            }
            Value::Integer(i) => {
                state.write_u8(2);
                i.hash(state);
            }
            Value::Float(f) => {
                state.write_u8(3);
                // 0.0 and -0.0 compare equal
                let normalized = if *f == 0.0 { 0.0 } else { *f };
                normalized.to_bits().hash(state);
            }
            Value::String(s) => {
                state.write_u8(4);
                s.hash(state);
            }
            Value::List(_) | Value::Dict(_) => {
                return Err(PersistentError::Unhashable {
                    type_name: self.type_name().to_string(),
                });
            }
            Value::Vector(items) => {
                state.write_u8(5);
                state.write_usize(items.len());
                for item in items {
                    item.hash_into(state)?;
                }
            }
            Value::Map(entries) => {
                state.write_u8(6);
                let mut sum = 0u64;
                for (key, value) in entries {
                    let mut entry = FxHasher::default();
                    key.hash(&mut entry);
                    entry.write_u64(value.try_hash()?);
                    sum = sum.wrapping_add(entry.finish());
                }
                state.write_usize(entries.len());
                state.write_u64(sum);
            }
            Value::Record(record) => {
                state.write_u8(7);
                state.write_u64(record.try_hash()?);
            }
        }
        Ok(())
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::None
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Integer(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(Arc::from(s))
    }
}

impl From<Arc<str>> for Value {
    fn from(s: Arc<str>) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(entries: IndexMap<String, Value>) -> Self {
        Value::Dict(entries)
    }
}

impl From<PersistentVector<Value>> for Value {
    fn from(items: PersistentVector<Value>) -> Self {
        Value::Vector(items)
    }
}

impl From<PersistentMap<Arc<str>, Value>> for Value {
    fn from(entries: PersistentMap<Arc<str>, Value>) -> Self {
        Value::Map(entries)
    }
}

impl From<Record> for Value {
    fn from(record: Record) -> Self {
        Value::Record(record)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::None, Into::into)
    }
}

fn write_joined<'a, I>(f: &mut fmt::Formatter<'_>, items: I) -> fmt::Result
where
    I: IntoIterator<Item = &'a Value>,
{
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write!(f, "{item}")?;
    }
    Ok(())
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Integer(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x:?}"),
            Value::String(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                write_joined(f, items)?;
                write!(f, "]")
            }
            Value::Dict(entries) => {
                write!(f, "{{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}}")
            }
            Value::Vector(items) => {
                write!(f, "pvector([")?;
                write_joined(f, items)?;
                write!(f, "])")
            }
            Value::Map(entries) => {
                write!(f, "pmap({{")?;
                for (i, (k, v)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{k:?}: {v}")?;
                }
                write!(f, "}})")
            }
            Value::Record(record) => write!(f, "{record}"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Value::None => serializer.serialize_none(),
            Value::Boolean(b) => serializer.serialize_bool(*b),
            Value::Integer(i) => serializer.serialize_i64(*i),
            Value::Float(x) => serializer.serialize_f64(*x),
            Value::String(s) => serializer.serialize_str(s),
            Value::List(items) => serializer.collect_seq(items),
            Value::Dict(entries) => serializer.collect_map(entries),
            Value::Vector(items) => items.serialize(serializer),
            Value::Map(entries) => serializer.collect_map(entries.iter().map(|(k, v)| (&**k, v))),
            Value::Record(record) => serializer.collect_map(record.iter()),
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a plain value")
    }

    fn visit_unit<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::None)
    }

    fn visit_none<E>(self) -> std::result::Result<Value, E> {
        Ok(Value::None)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> std::result::Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E>(self, b: bool) -> std::result::Result<Value, E> {
        Ok(Value::Boolean(b))
    }

    fn visit_i64<E>(self, i: i64) -> std::result::Result<Value, E> {
        Ok(Value::Integer(i))
    }

    fn visit_u64<E>(self, u: u64) -> std::result::Result<Value, E> {
        Ok(i64::try_from(u).map_or(Value::Float(u as f64), Value::Integer))
    }

    fn visit_f64<E>(self, x: f64) -> std::result::Result<Value, E> {
        Ok(Value::Float(x))
    }

    fn visit_str<E>(self, s: &str) -> std::result::Result<Value, E> {
        Ok(Value::from(s))
    }

    fn visit_string<E>(self, s: String) -> std::result::Result<Value, E> {
        Ok(Value::from(s))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut items = Vec::with_capacity(access.size_hint().unwrap_or(0));
        while let Some(item) = access.next_element()? {
            items.push(item);
        }
        Ok(Value::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Value, A::Error> {
        let mut entries = IndexMap::with_capacity(access.size_hint().unwrap_or(0));
        while let Some((key, value)) = access.next_entry::<String, Value>()? {
            entries.insert(key, value);
        }
        Ok(Value::Dict(entries))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_containers_are_unhashable() {
        let dict = Value::dict([("x", 1)]);
        assert_eq!(
            dict.try_hash(),
            Err(PersistentError::Unhashable {
                type_name: "dict".to_string()
            })
        );
        assert!(Value::list([1, 2]).try_hash().is_err());
    }

    #[test]
    fn test_persistent_containers_hash_by_content() {
        let a: PersistentVector<Value> = vec![Value::from(1), Value::from("a")].into_iter().collect();
        let b = PersistentVector::new()
            .push_back(Value::from(1))
            .push_back(Value::from("a"));
        assert_eq!(
            Value::Vector(a).try_hash().unwrap(),
            Value::Vector(b).try_hash().unwrap()
        );

        let m1: PersistentMap<Arc<str>, Value> =
            [(Arc::from("a"), Value::from(1)), (Arc::from("b"), Value::from(2))]
                .into_iter()
                .collect();
        let m2 = PersistentMap::new()
            .insert(Arc::from("b"), Value::from(2))
            .insert(Arc::from("a"), Value::from(1));
        assert_eq!(
            Value::Map(m1).try_hash().unwrap(),
            Value::Map(m2).try_hash().unwrap()
        );
    }

    #[test]
    fn test_unhashable_inside_vector_is_reported() {
        let vector = PersistentVector::new().push_back(Value::dict([("x", 1)]));
        assert!(matches!(
            Value::Vector(vector).try_hash(),
            Err(PersistentError::Unhashable { .. })
        ));
    }

    #[test]
    fn test_json_round_trip_into_plain_values() {
        let value = Value::dict([
            ("a", Value::from(1)),
            ("b", Value::list([Value::from(1.5), Value::None])),
            ("c", Value::from("text")),
        ]);
        let json = serde_json::to_string(&value).unwrap();
        assert_eq!(json, r#"{"a":1,"b":[1.5,null],"c":"text"}"#);
        let back: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_persistent_map_serializes_as_json_object() {
        let entries: PersistentMap<Arc<str>, Value> =
            [(Arc::from("k"), Value::from(1))].into_iter().collect();
        let json = serde_json::to_string(&Value::Map(entries)).unwrap();
        assert_eq!(json, r#"{"k":1}"#);
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::from("a").to_string(), "\"a\"");
        assert_eq!(Value::list([1, 2]).to_string(), "[1, 2]");
        assert_eq!(Value::from(Option::<i64>::None), Value::None);
    }
}
