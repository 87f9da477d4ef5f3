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

//! Error types for persistent containers and records
//!
//! Structural errors (index, key, undeclared attribute) are raised at the
//! point of detection. Validation failures are collected over one validation
//! pass and reported together through [`InvariantViolation`].

use std::fmt;
use thiserror::Error;

use crate::record::invariant::InvariantFailure;

/// Result type alias for container and record operations
pub type Result<T> = std::result::Result<T, PersistentError>;

/// Every failure collected during one validation pass
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InvariantViolation {
    /// Failures reported by field-level and global invariants, in evaluation order
    pub invariant_errors: Vec<InvariantFailure>,
    /// Qualified names (`TypeName.field`) of mandatory fields left without a value
    pub missing_fields: Vec<String>,
}

impl InvariantViolation {
    /// Create an empty violation set
    pub fn new() -> Self {
        Self::default()
    }

    /// True when nothing has been collected
    pub fn is_empty(&self) -> bool {
        self.invariant_errors.is_empty() && self.missing_fields.is_empty()
    }

    /// Record a failing invariant
    pub fn push_failure(&mut self, failure: InvariantFailure) {
        self.invariant_errors.push(failure);
    }

    /// Record a missing mandatory field
    pub fn push_missing(&mut self, qualified_name: impl Into<String>) {
        self.missing_fields.push(qualified_name.into());
    }

    /// All invariant messages flattened into one list
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.invariant_errors.iter().flat_map(|f| f.messages())
    }
}

impl fmt::Display for InvariantViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let errors: Vec<String> = self.invariant_errors.iter().map(|e| e.to_string()).collect();
        write!(
            f,
            "invariant_errors=[{}], missing_fields=[{}]",
            errors.join(", "),
            self.missing_fields.join(", ")
        )
    }
}

/// Comprehensive error type for persistent containers and records
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PersistentError {
    /// Index outside `0..size`
    #[error("Index out of range: {index} for collection of size {size}")]
    IndexOutOfRange {
        /// The requested index
        index: usize,
        /// The size of the collection
        size: usize,
    },

    /// Key absent from a map
    #[error("Key not found: {key}")]
    KeyNotFound {
        /// Debug rendering of the missing key
        key: String,
    },

    /// Operation that needs at least one element
    #[error("Cannot {operation} an empty collection")]
    EmptyCollection {
        /// Name of the rejected operation
        operation: &'static str,
    },

    /// Construction left mandatory fields without a value
    #[error("Missing mandatory fields: {0}")]
    MissingMandatoryField(InvariantViolation),

    /// A value does not satisfy its declared type constraint
    #[error("Type mismatch for {field}: expected {}, got {actual}", expected.join(" | "))]
    TypeMismatch {
        /// Qualified field name, or the container being checked
        field: String,
        /// Names of the acceptable types
        expected: Vec<String>,
        /// Type name of the supplied value
        actual: String,
    },

    /// One or more invariants failed
    #[error("Invariant violation: {0}")]
    InvariantViolation(InvariantViolation),

    /// Access to a name the schema does not declare, or to an absent field
    #[error("'{type_name}' has no attribute '{name}'")]
    UndeclaredAttribute {
        /// Schema name
        type_name: String,
        /// Offending attribute name
        name: String,
    },

    /// Hashing reached a value that cannot be hashed
    #[error("unhashable type: '{type_name}'")]
    Unhashable {
        /// Type name of the offending value
        type_name: String,
    },

    /// A forward-referenced type name has no schema in the registry
    #[error("Unresolved type reference '{name}'")]
    UnresolvedType {
        /// The referenced name
        name: String,
    },
}

impl PersistentError {
    /// Create a key-not-found error from any debuggable key
    pub fn key_not_found<K: fmt::Debug + ?Sized>(key: &K) -> Self {
        Self::KeyNotFound {
            key: format!("{key:?}"),
        }
    }

    /// Create an undeclared-attribute error
    pub fn undeclared(type_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self::UndeclaredAttribute {
            type_name: type_name.into(),
            name: name.into(),
        }
    }

    /// The aggregated validation payload, if this is a validation error
    pub fn violation(&self) -> Option<&InvariantViolation> {
        match self {
            Self::MissingMandatoryField(v) | Self::InvariantViolation(v) => Some(v),
            _ => None,
        }
    }
}
