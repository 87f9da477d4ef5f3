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

//! Batched record edits
//!
//! Edits are staged on a map evolver and validated once, when the session is
//! committed. Only touched fields are type- and invariant-checked; the
//! mandatory sweep and global invariants cover the whole record.

use rustc_hash::FxHashSet;
use std::sync::Arc;

use super::record::Record;
use super::schema::Schema;
use crate::collections::{Evolve, Evolver, MapEvolver};
use crate::error::{InvariantViolation, PersistentError, Result};
use crate::model::Value;

/// Mutable editing session over a record
pub struct RecordEvolver {
    original: Record,
    fields: MapEvolver<Arc<str>, Value>,
    touched: FxHashSet<Arc<str>>,
}

impl RecordEvolver {
    pub(crate) fn new(original: &Record) -> Self {
        Self {
            original: original.clone(),
            fields: original.fields().evolver(),
            touched: FxHashSet::default(),
        }
    }

    /// Schema of the record being edited
    pub fn schema(&self) -> &Arc<Schema> {
        self.original.schema()
    }

    /// Current staged value of a field
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Stage a new value; setting the current value is a no-op
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<&mut Self> {
        let key = self.declared(name)?;
        let value = value.into();
        if self.fields.get(name) != Some(&value) {
            self.fields.insert(Arc::clone(&key), value);
            self.touched.insert(key);
        }
        Ok(self)
    }

    /// Stage removal of a field's value
    pub fn remove(&mut self, name: &str) -> Result<&mut Self> {
        self.declared(name)?;
        match self.fields.discard(name) {
            Some(_) => Ok(self),
            None => Err(PersistentError::undeclared(self.original.type_name(), name)),
        }
    }

    /// Whether anything has been staged
    pub fn is_dirty(&self) -> bool {
        self.fields.is_dirty()
    }

    /// Validate and commit
    ///
    /// A session that staged nothing, or whose staged fields end up equal to
    /// the original's, returns the original record itself.
    pub fn persistent(self) -> Result<Record> {
        if !self.fields.is_dirty() {
            return Ok(self.original);
        }
        let schema = Arc::clone(self.original.schema());
        let config = *schema.config();
        let mut fields = self.fields;
        let mut violation = InvariantViolation::new();

        for (name, field) in schema.declared() {
            if self.touched.contains(name) {
                if let Some(staged) = fields.get(name).cloned() {
                    let value = field.coerce(&schema.qualified(name), staged, &schema, &config)?;
                    field.check_invariants(&value, &mut violation);
                    fields.insert(Arc::clone(name), value);
                }
            }
            if field.is_mandatory() && !fields.contains_key(name) {
                violation.push_missing(schema.qualified(name));
            }
        }

        if !violation.is_empty() {
            log::debug!("Evolution of {} failed: {}", schema.name(), violation);
            return Err(PersistentError::InvariantViolation(violation));
        }

        let committed = fields.persistent();
        if committed.ptr_eq(self.original.fields()) {
            log::trace!("Evolution of {} restored the original fields", schema.name());
            return Ok(self.original);
        }
        let record = Record::from_parts(Arc::clone(&schema), committed);
        schema.check_global(&record)?;
        log::trace!("Committed {} with {} touched fields", schema.name(), self.touched.len());
        Ok(record)
    }

    fn declared(&self, name: &str) -> Result<Arc<str>> {
        self.schema()
            .field_key(name)
            .cloned()
            .ok_or_else(|| PersistentError::undeclared(self.original.type_name(), name))
    }
}

impl Evolver for RecordEvolver {
    type Persistent = Result<Record>;

    fn is_dirty(&self) -> bool {
        RecordEvolver::is_dirty(self)
    }

    fn persistent(self) -> Result<Record> {
        RecordEvolver::persistent(self)
    }
}
