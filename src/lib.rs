//! Persistent data structures in Rust
//!
//! Structurally shared vectors and hash maps with transient editing sessions,
//! plus schema-validated immutable records built on top of them.

pub mod collections;
pub mod error;
pub mod model;
pub mod record;

// Re-export main types
pub use collections::{Evolve, Evolver, MapEvolver, PersistentMap, PersistentVector, VectorEvolver};
pub use error::{InvariantViolation, PersistentError, Result};
pub use model::{Hashed, Value};
pub use record::{
    Field, FieldType, PathStep, Record, RecordEvolver, RecordSnapshot, Schema, SchemaRegistry,
    SnapshotValue, Update, ValidationConfig,
};
