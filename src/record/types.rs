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

//! Field type constraints
//!
//! A field declares zero or more acceptable types. Record types can be named
//! before they exist; named references resolve against the owning schema's
//! registry when a value is checked. The registry is authoritative, so
//! re-registering a name is picked up by every reference to it. The last
//! resolution is kept for schemas whose registry has been dropped.

use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

use super::config::ValidationConfig;
use super::schema::Schema;
use crate::collections::{Evolve, Evolver, PersistentMap, PersistentVector};
use crate::error::{PersistentError, Result};
use crate::model::Value;

/// Acceptable type of a field value
#[derive(Clone)]
pub enum FieldType {
    /// Any value
    Any,
    /// `Value::Boolean`
    Boolean,
    /// `Value::Integer`
    Integer,
    /// `Value::Float`
    Float,
    /// `Value::String`
    String,
    /// Plain list
    List,
    /// Plain dict
    Dict,
    /// Persistent vector with unchecked elements
    Vector,
    /// Persistent map with unchecked values
    Map,
    /// Persistent vector whose elements satisfy the inner type
    VectorOf(Box<FieldType>),
    /// Persistent map whose values satisfy the inner type
    MapOf(Box<FieldType>),
    /// Record of exactly this schema
    Record(Arc<Schema>),
    /// Record of the schema, or the type, registered under this name
    Named(NamedType),
    /// Absent (`Value::None`) or the inner type
    Optional(Box<FieldType>),
}

/// Lazily resolved reference to a schema by name
pub struct NamedType {
    name: Arc<str>,
    resolved: RwLock<Weak<Schema>>,
}

impl Clone for NamedType {
    fn clone(&self) -> Self {
        Self {
            name: Arc::clone(&self.name),
            resolved: RwLock::new(self.cached()),
        }
    }
}

impl NamedType {
    /// Create an unresolved reference
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            resolved: RwLock::new(Weak::new()),
        }
    }

    /// The referenced schema name
    pub fn name(&self) -> &str {
        &self.name
    }

    fn cached(&self) -> Weak<Schema> {
        self.resolved
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn resolve(&self, owner: &Schema) -> Result<Target> {
        let unresolved = || PersistentError::UnresolvedType {
            name: self.name.to_string(),
        };
        let Some(registry) = owner.registry() else {
            return self.cached().upgrade().map(Target::Schema).ok_or_else(unresolved);
        };
        let Some(schema) = registry.get(&self.name) else {
            return registry.get_type(&self.name).map(Target::Type).ok_or_else(unresolved);
        };
        if !std::ptr::eq(self.cached().as_ptr(), Arc::as_ptr(&schema)) {
            log::debug!("Resolved type reference '{}' from {}", self.name, owner.name());
            *self.resolved.write().unwrap_or_else(PoisonError::into_inner) = Arc::downgrade(&schema);
        }
        Ok(Target::Schema(schema))
    }
}

/// What a name resolved to
enum Target {
    Schema(Arc<Schema>),
    Type(FieldType),
}

impl FieldType {
    /// Reference a schema by name
    pub fn named(name: impl Into<Arc<str>>) -> Self {
        FieldType::Named(NamedType::new(name))
    }

    /// Reference a schema directly
    pub fn record(schema: &Arc<Schema>) -> Self {
        FieldType::Record(Arc::clone(schema))
    }

    /// Persistent vector of `inner`
    pub fn vector_of(inner: FieldType) -> Self {
        FieldType::VectorOf(Box::new(inner))
    }

    /// Persistent map with values of `inner`
    pub fn map_of(inner: FieldType) -> Self {
        FieldType::MapOf(Box::new(inner))
    }

    /// `inner` or absent
    pub fn optional(inner: FieldType) -> Self {
        FieldType::Optional(Box::new(inner))
    }

    /// Name used in type mismatch reports
    pub fn name(&self) -> String {
        match self {
            FieldType::Any => "any".to_string(),
            FieldType::Boolean => "bool".to_string(),
            FieldType::Integer => "int".to_string(),
            FieldType::Float => "float".to_string(),
            FieldType::String => "str".to_string(),
            FieldType::List => "list".to_string(),
            FieldType::Dict => "dict".to_string(),
            FieldType::Vector => "pvector".to_string(),
            FieldType::Map => "pmap".to_string(),
            FieldType::VectorOf(inner) => format!("pvector[{}]", inner.name()),
            FieldType::MapOf(inner) => format!("pmap[{}]", inner.name()),
            FieldType::Record(schema) => schema.name().to_string(),
            FieldType::Named(named) => named.name().to_string(),
            FieldType::Optional(inner) => format!("optional[{}]", inner.name()),
        }
    }

    /// Whether `value` already satisfies this type
    pub fn accepts(&self, value: &Value, owner: &Schema) -> Result<bool> {
        let accepted = match (self, value) {
            (FieldType::Any, _)
            | (FieldType::Boolean, Value::Boolean(_))
            | (FieldType::Integer, Value::Integer(_))
            | (FieldType::Float, Value::Float(_))
            | (FieldType::String, Value::String(_))
            | (FieldType::List, Value::List(_))
            | (FieldType::Dict, Value::Dict(_))
            | (FieldType::Vector, Value::Vector(_))
            | (FieldType::Map, Value::Map(_))
            | (FieldType::Optional(_), Value::None) => true,
            (FieldType::VectorOf(inner), Value::Vector(items)) => {
                for item in items {
                    if !inner.accepts(item, owner)? {
                        return Ok(false);
                    }
                }
                true
            }
            (FieldType::MapOf(inner), Value::Map(entries)) => {
                for value in entries.values() {
                    if !inner.accepts(value, owner)? {
                        return Ok(false);
                    }
                }
                true
            }
            (FieldType::Record(schema), Value::Record(record)) => {
                Arc::ptr_eq(schema, record.schema())
            }
            (FieldType::Named(named), value) => match named.resolve(owner)? {
                Target::Schema(schema) => {
                    matches!(value, Value::Record(record) if Arc::ptr_eq(&schema, record.schema()))
                }
                Target::Type(aliased) => aliased.accepts(value, owner)?,
            },
            (FieldType::Optional(inner), value) => inner.accepts(value, owner)?,
            _ => false,
        };
        Ok(accepted)
    }

    /// Convert plain input into this type; `None` when no conversion applies
    fn convert(
        &self,
        value: &Value,
        owner: &Schema,
        config: &ValidationConfig,
    ) -> Result<Option<Value>> {
        let converted = match (self, value) {
            (FieldType::Record(schema), Value::Dict(_) | Value::Map(_)) => {
                Value::Record(schema.create_from(value.clone())?)
            }
            (FieldType::Named(named), value) => match named.resolve(owner)? {
                Target::Schema(schema) if matches!(value, Value::Dict(_) | Value::Map(_)) => {
                    Value::Record(schema.create_from(value.clone())?)
                }
                Target::Schema(_) => return Ok(None),
                Target::Type(aliased) => return aliased.convert(value, owner, config),
            },
            (FieldType::VectorOf(inner), Value::List(items)) => {
                Value::Vector(self.coerce_elements(inner, items.iter(), owner, config)?)
            }
            (FieldType::VectorOf(inner), Value::Vector(items)) => {
                Value::Vector(self.coerce_elements(inner, items.iter(), owner, config)?)
            }
            (FieldType::MapOf(inner), Value::Dict(entries)) => {
                let entries = entries.iter().map(|(k, v)| (Arc::from(k.as_str()), v));
                Value::Map(self.coerce_entries(inner, entries, owner, config)?)
            }
            (FieldType::MapOf(inner), Value::Map(entries)) => {
                let entries = entries.iter().map(|(k, v)| (Arc::clone(k), v));
                Value::Map(self.coerce_entries(inner, entries, owner, config)?)
            }
            (FieldType::Vector, Value::List(items)) => Value::Vector(items.iter().cloned().collect()),
            (FieldType::Map, Value::Dict(entries)) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| (Arc::from(k.as_str()), v.clone()))
                    .collect(),
            ),
            (FieldType::Optional(inner), value) => return inner.convert(value, owner, config),
            _ => return Ok(None),
        };
        Ok(Some(converted))
    }

    fn coerce_elements<'a, I>(
        &self,
        inner: &FieldType,
        items: I,
        owner: &Schema,
        config: &ValidationConfig,
    ) -> Result<PersistentVector<Value>>
    where
        I: Iterator<Item = &'a Value>,
    {
        let label = self.name();
        let mut evolver = PersistentVector::<Value>::new().evolver();
        for item in items {
            evolver.push_back(coerce(
                std::slice::from_ref(inner),
                item.clone(),
                &label,
                owner,
                config,
            )?);
        }
        Ok(evolver.persistent())
    }

    fn coerce_entries<'a, I>(
        &self,
        inner: &FieldType,
        entries: I,
        owner: &Schema,
        config: &ValidationConfig,
    ) -> Result<PersistentMap<Arc<str>, Value>>
    where
        I: Iterator<Item = (Arc<str>, &'a Value)>,
    {
        let label = self.name();
        let mut map = PersistentMap::new();
        for (key, value) in entries {
            let value = coerce(std::slice::from_ref(inner), value.clone(), &label, owner, config)?;
            map = map.insert(key, value);
        }
        Ok(map)
    }
}

impl fmt::Debug for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Check `value` against `types`, converting plain input when allowed
///
/// An empty type list accepts everything. `label` names the field (or
/// container) in the resulting `TypeMismatch`.
pub(crate) fn coerce(
    types: &[FieldType],
    value: Value,
    label: &str,
    owner: &Schema,
    config: &ValidationConfig,
) -> Result<Value> {
    if types.is_empty() {
        return Ok(value);
    }
    for field_type in types {
        if field_type.accepts(&value, owner)? {
            return Ok(value);
        }
    }
    if config.coerce_nested {
        for field_type in types {
            if let Some(converted) = field_type.convert(&value, owner, config)? {
                log::trace!("Converted {} into {} for {}", value.type_name(), field_type.name(), label);
                return Ok(converted);
            }
        }
    }
    Err(PersistentError::TypeMismatch {
        field: label.to_string(),
        expected: types.iter().map(FieldType::name).collect(),
        actual: value.type_name().to_string(),
    })
}
