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

//! Self-describing record snapshots
//!
//! A snapshot stores raw field values with an explicit kind tag, so persistent
//! vectors, persistent maps and nested records come back as themselves instead
//! of as plain lists and dicts. Field serializers are not applied.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::record::Record;
use super::schema::SchemaRegistry;
use crate::collections::{PersistentMap, PersistentVector};
use crate::error::{PersistentError, Result};
use crate::model::Value;

/// Snapshot of one record: its schema name and present fields in declaration order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSnapshot {
    /// Schema name to restore with
    pub schema: String,
    /// Field values that were set
    pub fields: Vec<(String, SnapshotValue)>,
}

/// Kind-tagged form of a [`Value`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum SnapshotValue {
    None,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
    List(Vec<SnapshotValue>),
    Dict(Vec<(String, SnapshotValue)>),
    Vector(Vec<SnapshotValue>),
    Map(Vec<(String, SnapshotValue)>),
    Record(RecordSnapshot),
}

impl RecordSnapshot {
    /// Capture every present field of `record`
    pub fn of(record: &Record) -> Self {
        let fields = record
            .schema()
            .field_names()
            .filter_map(|name| {
                record
                    .get(name)
                    .map(|value| (name.to_string(), SnapshotValue::from(value)))
            })
            .collect();
        Self {
            schema: record.type_name().to_string(),
            fields,
        }
    }

    /// Encode as JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Decode from JSON
    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }

    pub(crate) fn restore_in(&self, registry: &SchemaRegistry) -> Result<Record> {
        let schema = registry
            .get(&self.schema)
            .ok_or_else(|| PersistentError::UnresolvedType {
                name: self.schema.clone(),
            })?;
        log::debug!("Restoring {} from snapshot", self.schema);
        let args = self
            .fields
            .iter()
            .map(|(name, value)| Ok((name.as_str(), value.restore_in(registry)?)))
            .collect::<Result<Vec<_>>>()?;
        let record = schema.create_with(args, schema.config())?;

        // Fields absent from the snapshot were unset, not left to their initial value.
        let defaulted: Vec<String> = record
            .iter()
            .map(|(name, _)| name.to_string())
            .filter(|name| !self.fields.iter().any(|(present, _)| present == name))
            .collect();
        if defaulted.is_empty() {
            return Ok(record);
        }
        let mut evolver = record.evolver();
        for name in &defaulted {
            evolver.remove(name)?;
        }
        evolver.persistent()
    }
}

impl SnapshotValue {
    fn restore_in(&self, registry: &SchemaRegistry) -> Result<Value> {
        let restore_all = |items: &[SnapshotValue]| -> Result<Vec<Value>> {
            items.iter().map(|item| item.restore_in(registry)).collect()
        };
        Ok(match self {
            SnapshotValue::None => Value::None,
            SnapshotValue::Boolean(b) => Value::Boolean(*b),
            SnapshotValue::Integer(i) => Value::Integer(*i),
            SnapshotValue::Float(f) => Value::Float(*f),
            SnapshotValue::String(s) => Value::String(Arc::from(s.as_str())),
            SnapshotValue::List(items) => Value::List(restore_all(items)?),
            SnapshotValue::Vector(items) => {
                Value::Vector(restore_all(items)?.into_iter().collect::<PersistentVector<_>>())
            }
            SnapshotValue::Dict(entries) => Value::Dict(
                entries
                    .iter()
                    .map(|(k, v)| Ok((k.clone(), v.restore_in(registry)?)))
                    .collect::<Result<_>>()?,
            ),
            SnapshotValue::Map(entries) => Value::Map(
                entries
                    .iter()
                    .map(|(k, v)| Ok((Arc::from(k.as_str()), v.restore_in(registry)?)))
                    .collect::<Result<PersistentMap<_, _>>>()?,
            ),
            SnapshotValue::Record(snapshot) => Value::Record(snapshot.restore_in(registry)?),
        })
    }
}

impl From<&Value> for SnapshotValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::None => SnapshotValue::None,
            Value::Boolean(b) => SnapshotValue::Boolean(*b),
            Value::Integer(i) => SnapshotValue::Integer(*i),
            Value::Float(f) => SnapshotValue::Float(*f),
            Value::String(s) => SnapshotValue::String(s.to_string()),
            Value::List(items) => SnapshotValue::List(items.iter().map(Self::from).collect()),
            Value::Dict(entries) => SnapshotValue::Dict(
                entries.iter().map(|(k, v)| (k.clone(), Self::from(v))).collect(),
            ),
            Value::Vector(items) => SnapshotValue::Vector(items.iter().map(Self::from).collect()),
            Value::Map(entries) => SnapshotValue::Map(
                entries.iter().map(|(k, v)| (k.to_string(), Self::from(v))).collect(),
            ),
            Value::Record(record) => SnapshotValue::Record(RecordSnapshot::of(record)),
        }
    }
}
