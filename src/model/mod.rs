//! Data model for record fields
//!
//! The dynamic value type stored in records, field-name interning and
//! hash-carrying wrappers.

pub mod hashable;
pub mod string_intern;
pub mod value;

pub use hashable::Hashed;
pub use string_intern::{InternerStats, global_interner_stats, intern_field_name};
pub use value::Value;
