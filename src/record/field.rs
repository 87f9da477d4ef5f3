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

//! Field declarations

use std::fmt;
use std::sync::Arc;

use super::config::ValidationConfig;
use super::invariant::{Checks, FieldInvariant, evaluate};
use super::schema::Schema;
use super::types::{FieldType, coerce};
use crate::collections::{PersistentMap, PersistentVector};
use crate::error::{InvariantViolation, Result};
use crate::model::Value;

/// Custom serializer: receives the caller's formatter and the field value
pub type FieldSerializer = Arc<dyn Fn(&dyn Fn(&Value) -> Value, &Value) -> Value + Send + Sync>;

/// Value a field starts with when construction does not supply one
#[derive(Clone, Default)]
pub enum Initial {
    /// No initial value
    #[default]
    Absent,
    /// A fixed value
    Value(Value),
    /// A producer called once per construction
    Producer(Arc<dyn Fn() -> Value + Send + Sync>),
}

/// Declaration of one named attribute of a schema
#[derive(Clone, Default)]
pub struct Field {
    types: Vec<FieldType>,
    mandatory: bool,
    initial: Initial,
    invariants: Vec<FieldInvariant>,
    serializer: Option<FieldSerializer>,
}

impl Field {
    /// Create an untyped, optional field with no initial value
    pub fn new() -> Self {
        Self::default()
    }

    /// Field holding a checked persistent vector, starting empty
    pub fn vector_of(element: FieldType) -> Self {
        Self::new()
            .of_type(FieldType::vector_of(element))
            .initial(PersistentVector::<Value>::new())
    }

    /// Field holding a checked persistent map, starting empty
    pub fn map_of(value: FieldType) -> Self {
        Self::new()
            .of_type(FieldType::map_of(value))
            .initial(PersistentMap::<Arc<str>, Value>::new())
    }

    /// Add an acceptable type
    pub fn of_type(mut self, field_type: FieldType) -> Self {
        self.types.push(field_type);
        self
    }

    /// Add several acceptable types
    pub fn of_types<I: IntoIterator<Item = FieldType>>(mut self, types: I) -> Self {
        self.types.extend(types);
        self
    }

    /// Require a value after construction and after every evolution
    pub fn mandatory(mut self) -> Self {
        self.mandatory = true;
        self
    }

    /// Use a fixed initial value
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Initial::Value(value.into());
        self
    }

    /// Produce the initial value on each construction
    pub fn initial_with<F>(mut self, producer: F) -> Self
    where
        F: Fn() -> Value + Send + Sync + 'static,
    {
        self.initial = Initial::Producer(Arc::new(producer));
        self
    }

    /// Add a field-level invariant
    pub fn invariant<F, C>(mut self, predicate: F) -> Self
    where
        F: Fn(&Value) -> C + Send + Sync + 'static,
        C: Into<Checks>,
    {
        self.invariants.push(Arc::new(move |value: &Value| predicate(value).into()));
        self
    }

    /// Replace default serialization for this field
    pub fn serializer<F>(mut self, serializer: F) -> Self
    where
        F: Fn(&dyn Fn(&Value) -> Value, &Value) -> Value + Send + Sync + 'static,
    {
        self.serializer = Some(Arc::new(serializer));
        self
    }

    /// Declared types; empty means any value
    pub fn types(&self) -> &[FieldType] {
        &self.types
    }

    /// Whether the field must always hold a value
    pub fn is_mandatory(&self) -> bool {
        self.mandatory
    }

    pub(crate) fn initial_value(&self) -> Option<Value> {
        match &self.initial {
            Initial::Absent => None,
            Initial::Value(value) => Some(value.clone()),
            Initial::Producer(produce) => Some(produce()),
        }
    }

    pub(crate) fn coerce(
        &self,
        qualified_name: &str,
        value: Value,
        owner: &Schema,
        config: &ValidationConfig,
    ) -> Result<Value> {
        coerce(&self.types, value, qualified_name, owner, config)
    }

    pub(crate) fn check_invariants(&self, value: &Value, violation: &mut InvariantViolation) {
        for invariant in &self.invariants {
            if let Some(failure) = evaluate(invariant(value)) {
                violation.push_failure(failure);
            }
        }
    }

    pub(crate) fn serialize_value(&self, format: &dyn Fn(&Value) -> Value, value: &Value) -> Value {
        match &self.serializer {
            Some(serializer) => serializer(format, value),
            None => serialize_default(format, value),
        }
    }
}

/// Default serialization: nested records use their own field serializers,
/// persistent containers become plain lists and dicts, everything else is
/// returned unchanged. `format` only reaches custom serializers.
pub(crate) fn serialize_default(format: &dyn Fn(&Value) -> Value, value: &Value) -> Value {
    match value {
        Value::Record(record) => record.serialize(format),
        Value::Vector(items) => Value::List(items.iter().map(|v| serialize_default(format, v)).collect()),
        Value::Map(entries) => Value::Dict(
            entries
                .iter()
                .map(|(k, v)| (k.to_string(), serialize_default(format, v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

impl fmt::Debug for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Field")
            .field("types", &self.types)
            .field("mandatory", &self.mandatory)
            .field("invariants", &self.invariants.len())
            .field("serializer", &self.serializer.is_some())
            .finish()
    }
}
