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

//! Record schemas and the schema registry
//!
//! A [`Schema`] is an immutable description of a record type: its ordered
//! fields, global invariants and optional equality/hash overrides. Schemas
//! that refer to each other by name are registered in a [`SchemaRegistry`],
//! which resolves those names on first use.

use dashmap::DashMap;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use super::config::ValidationConfig;
use super::field::Field;
use super::invariant::{Checks, GlobalInvariant, evaluate};
use super::record::Record;
use super::snapshot::RecordSnapshot;
use super::types::FieldType;
use crate::collections::{Evolve, Evolver, PersistentMap};
use crate::error::{InvariantViolation, PersistentError, Result};
use crate::model::{Value, intern_field_name};

/// Equality override, called as `eq(self, other)`
pub type EqOverride = Arc<dyn Fn(&Record, &Record) -> bool + Send + Sync>;

/// Hash override replacing the content hash
pub type HashOverride = Arc<dyn Fn(&Record) -> Result<u64> + Send + Sync>;

/// Immutable description of a record type
pub struct Schema {
    name: Arc<str>,
    fields: IndexMap<Arc<str>, Field>,
    invariants: Vec<GlobalInvariant>,
    eq_override: Option<EqOverride>,
    hash_override: Option<HashOverride>,
    config: ValidationConfig,
    registry: Weak<SchemaRegistry>,
}

impl Schema {
    /// Start declaring a schema
    pub fn builder(name: impl Into<Arc<str>>) -> SchemaBuilder {
        SchemaBuilder::new(name)
    }

    /// Schema name, used in display and error messages
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> impl Iterator<Item = (&str, &Field)> {
        self.fields.iter().map(|(name, field)| (name.as_ref(), field))
    }

    /// Declared field names in declaration order
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(AsRef::as_ref)
    }

    /// Look up a field declaration
    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.get(name)
    }

    /// Construction defaults for this schema
    pub fn config(&self) -> &ValidationConfig {
        &self.config
    }

    /// The registry this schema was registered in, if it is still alive
    pub fn registry(&self) -> Option<Arc<SchemaRegistry>> {
        self.registry.upgrade()
    }

    pub(crate) fn declared(&self) -> impl Iterator<Item = (&Arc<str>, &Field)> {
        self.fields.iter()
    }

    pub(crate) fn field_key(&self, name: &str) -> Option<&Arc<str>> {
        self.fields.get_key_value(name).map(|(key, _)| key)
    }

    pub(crate) fn qualified(&self, field: &str) -> String {
        format!("{}.{}", self.name, field)
    }

    pub(crate) fn eq_override(&self) -> Option<&EqOverride> {
        self.eq_override.as_ref()
    }

    pub(crate) fn hash_override(&self) -> Option<&HashOverride> {
        self.hash_override.as_ref()
    }

    /// Construct a record from `(name, value)` pairs using the schema defaults
    pub fn create<I, K, V>(self: &Arc<Self>, args: I) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        self.create_with(args, &self.config)
    }

    /// Construct a record with every field left to its initial value
    pub fn create_empty(self: &Arc<Self>) -> Result<Record> {
        self.create(std::iter::empty::<(&str, Value)>())
    }

    /// Construct a record with explicit validation settings
    ///
    /// Type errors fail immediately. Missing mandatory fields and failing
    /// field invariants are collected and reported together; global
    /// invariants run only once every field is valid.
    pub fn create_with<I, K, V>(self: &Arc<Self>, args: I, config: &ValidationConfig) -> Result<Record>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let mut supplied: FxHashMap<Arc<str>, Value> = FxHashMap::default();
        for (name, value) in args {
            let name = name.as_ref();
            match self.field_key(name) {
                Some(key) => {
                    supplied.insert(Arc::clone(key), value.into());
                }
                None if config.ignore_extra => {
                    log::trace!("Ignoring undeclared argument {} for {}", name, self.name);
                }
                None => return Err(PersistentError::undeclared(self.name(), name)),
            }
        }

        let mut violation = InvariantViolation::new();
        let mut fields = PersistentMap::<Arc<str>, Value>::new().evolver();
        for (name, field) in &self.fields {
            match supplied.remove(name).or_else(|| field.initial_value()) {
                Some(value) => {
                    let value = field.coerce(&self.qualified(name), value, self, config)?;
                    field.check_invariants(&value, &mut violation);
                    fields.insert(Arc::clone(name), value);
                }
                None if field.is_mandatory() => violation.push_missing(self.qualified(name)),
                None => {}
            }
        }

        if !violation.is_empty() {
            log::debug!("Construction of {} failed: {}", self.name, violation);
            return Err(if violation.invariant_errors.is_empty() {
                PersistentError::MissingMandatoryField(violation)
            } else {
                PersistentError::InvariantViolation(violation)
            });
        }

        let record = Record::from_parts(Arc::clone(self), fields.persistent());
        self.check_global(&record)?;
        log::trace!("Created {} with {} fields", self.name, record.len());
        Ok(record)
    }

    /// Construct from a plain dict, a map, or an existing record of this schema
    pub fn create_from(self: &Arc<Self>, value: Value) -> Result<Record> {
        self.create_from_with(value, &self.config)
    }

    /// `create_from` with explicit validation settings
    pub fn create_from_with(self: &Arc<Self>, value: Value, config: &ValidationConfig) -> Result<Record> {
        match value {
            Value::Record(record) if Arc::ptr_eq(record.schema(), self) => Ok(record),
            Value::Dict(entries) => self.create_with(entries, config),
            Value::Map(entries) => self.create_with(
                entries.iter().map(|(k, v)| (Arc::clone(k), v.clone())),
                config,
            ),
            other => Err(PersistentError::TypeMismatch {
                field: self.name.to_string(),
                expected: vec!["dict".to_string(), self.name.to_string()],
                actual: other.type_name().to_string(),
            }),
        }
    }

    pub(crate) fn check_global(&self, record: &Record) -> Result<()> {
        let mut violation = InvariantViolation::new();
        for invariant in &self.invariants {
            if let Some(failure) = evaluate(invariant(record)) {
                violation.push_failure(failure);
            }
        }
        if violation.is_empty() {
            Ok(())
        } else {
            log::debug!("Global invariants of {} failed: {}", self.name, violation);
            Err(PersistentError::InvariantViolation(violation))
        }
    }
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.name)
            .field("fields", &self.fields)
            .field("invariants", &self.invariants.len())
            .finish()
    }
}

/// Builder for [`Schema`]
pub struct SchemaBuilder {
    name: Arc<str>,
    fields: IndexMap<Arc<str>, Field>,
    invariants: Vec<GlobalInvariant>,
    eq_override: Option<EqOverride>,
    hash_override: Option<HashOverride>,
    config: ValidationConfig,
}

impl SchemaBuilder {
    /// Create a new builder
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            fields: IndexMap::new(),
            invariants: Vec::new(),
            eq_override: None,
            hash_override: None,
            config: ValidationConfig::default(),
        }
    }

    /// Declare a field; redeclaring a name replaces the earlier field
    pub fn field(mut self, name: &str, field: Field) -> Self {
        self.fields.insert(intern_field_name(name), field);
        self
    }

    /// Inherit fields, invariants, overrides and settings from `parent`
    pub fn extend(mut self, parent: &Schema) -> Self {
        for (name, field) in &parent.fields {
            self.fields.insert(Arc::clone(name), field.clone());
        }
        self.invariants.extend(parent.invariants.iter().cloned());
        self.eq_override = self.eq_override.or_else(|| parent.eq_override.clone());
        self.hash_override = self.hash_override.or_else(|| parent.hash_override.clone());
        self.config = parent.config;
        self
    }

    /// Add a global invariant over the assembled record
    pub fn invariant<F, C>(mut self, predicate: F) -> Self
    where
        F: Fn(&Record) -> C + Send + Sync + 'static,
        C: Into<Checks>,
    {
        self.invariants.push(Arc::new(move |record: &Record| predicate(record).into()));
        self
    }

    /// Override equality; consulted whenever this schema is on either side
    pub fn eq_with<F>(mut self, eq: F) -> Self
    where
        F: Fn(&Record, &Record) -> bool + Send + Sync + 'static,
    {
        self.eq_override = Some(Arc::new(eq));
        self
    }

    /// Override the content hash
    pub fn hash_with<F>(mut self, hash: F) -> Self
    where
        F: Fn(&Record) -> Result<u64> + Send + Sync + 'static,
    {
        self.hash_override = Some(Arc::new(hash));
        self
    }

    /// Set the construction defaults
    pub fn config(mut self, config: ValidationConfig) -> Self {
        self.config = config;
        self
    }

    /// Build a standalone schema; named type references cannot resolve
    pub fn build(self) -> Arc<Schema> {
        self.build_in(Weak::new())
    }

    fn build_in(self, registry: Weak<SchemaRegistry>) -> Arc<Schema> {
        log::debug!("Built schema {} with {} fields", self.name, self.fields.len());
        Arc::new(Schema {
            name: self.name,
            fields: self.fields,
            invariants: self.invariants,
            eq_override: self.eq_override,
            hash_override: self.hash_override,
            config: self.config,
            registry,
        })
    }
}

/// Thread-safe registry of schemas and named field types
///
/// A name lookup prefers a schema over a type registered under the same name.
#[derive(Default)]
pub struct SchemaRegistry {
    schemas: DashMap<Arc<str>, Arc<Schema>>,
    types: DashMap<Arc<str>, FieldType>,
}

impl SchemaRegistry {
    /// Create an empty registry
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Build and register a schema, replacing any schema of the same name
    pub fn register(self: &Arc<Self>, builder: SchemaBuilder) -> Arc<Schema> {
        let schema = builder.build_in(Arc::downgrade(self));
        let name = Arc::clone(&schema.name);
        if self.schemas.insert(name, Arc::clone(&schema)).is_some() {
            log::debug!("Replaced schema {}", schema.name);
        } else {
            log::debug!("Registered schema {}", schema.name);
        }
        schema
    }

    /// Register a field type, such as a checked vector, under a name
    ///
    /// `FieldType::named` references to the name then check against it.
    pub fn register_type(&self, name: impl Into<Arc<str>>, field_type: FieldType) {
        let name = name.into();
        log::debug!("Registered type {} as {}", name, field_type.name());
        self.types.insert(name, field_type);
    }

    /// Look up a named field type
    pub fn get_type(&self, name: &str) -> Option<FieldType> {
        self.types.get(name).map(|entry| entry.value().clone())
    }

    /// Look up a schema by name
    pub fn get(&self, name: &str) -> Option<Arc<Schema>> {
        self.schemas.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Whether a schema of this name is registered
    pub fn contains(&self, name: &str) -> bool {
        self.schemas.contains_key(name)
    }

    /// Number of registered schemas
    pub fn len(&self) -> usize {
        self.schemas.len()
    }

    /// True when nothing is registered
    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    /// Registered schema names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.schemas.iter().map(|e| e.key().to_string()).collect();
        names.sort();
        names
    }

    /// Rebuild a record from a snapshot
    ///
    /// Nested record snapshots are restored with the schemas registered under
    /// their names. Fails with `UnresolvedType` when a name is not registered.
    pub fn restore(&self, snapshot: &RecordSnapshot) -> Result<Record> {
        snapshot.restore_in(self)
    }
}

impl fmt::Debug for SchemaRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaRegistry")
            .field("schemas", &self.names())
            .finish()
    }
}
