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

//! Schema-validated immutable records
//!
//! A [`Schema`] declares typed fields with invariants and initial values.
//! Records built from it are validated on construction and on every
//! evolution, and they share structure with the versions they came from.

pub mod config;
pub mod evolver;
pub mod field;
pub mod invariant;
#[allow(clippy::module_inception)]
pub mod record;
pub mod schema;
pub mod snapshot;
pub mod transform;
pub mod types;

pub use config::ValidationConfig;
pub use evolver::RecordEvolver;
pub use field::{Field, FieldSerializer, Initial};
pub use invariant::{Check, Checks, InvariantFailure, Message, check, evaluate};
pub use record::{Record, WeakRecord};
pub use schema::{Schema, SchemaBuilder, SchemaRegistry};
pub use snapshot::{RecordSnapshot, SnapshotValue};
pub use transform::{PathStep, Update};
pub use types::{FieldType, NamedType};
