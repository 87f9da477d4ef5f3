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

//! Path-based updates of nested structures

use std::fmt;
use std::sync::Arc;

use super::record::Record;
use crate::error::{PersistentError, Result};
use crate::model::{Value, intern_field_name};

/// One step along a transform path
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathStep {
    /// Record field or map key
    Key(Arc<str>),
    /// Vector or list position
    Index(usize),
}

impl From<&str> for PathStep {
    fn from(key: &str) -> Self {
        PathStep::Key(intern_field_name(key))
    }
}

impl From<String> for PathStep {
    fn from(key: String) -> Self {
        PathStep::Key(intern_field_name(key))
    }
}

impl From<usize> for PathStep {
    fn from(index: usize) -> Self {
        PathStep::Index(index)
    }
}

impl fmt::Display for PathStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathStep::Key(key) => write!(f, "{key}"),
            PathStep::Index(index) => write!(f, "{index}"),
        }
    }
}

/// What happens at the end of the path
#[derive(Clone)]
pub enum Update {
    /// Replace with this value
    Value(Value),
    /// Replace with the function's result on the current value
    Apply(Arc<dyn Fn(&Value) -> Value + Send + Sync>),
}

impl Update {
    /// Replace with a fixed value
    pub fn value(value: impl Into<Value>) -> Self {
        Update::Value(value.into())
    }

    /// Replace with a function of the current value
    pub fn apply<F>(f: F) -> Self
    where
        F: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        Update::Apply(Arc::new(f))
    }

    fn run(&self, current: &Value) -> Value {
        match self {
            Update::Value(value) => value.clone(),
            Update::Apply(f) => f(current),
        }
    }
}

impl From<Value> for Update {
    fn from(value: Value) -> Self {
        Update::Value(value)
    }
}

impl fmt::Debug for Update {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Update::Value(value) => write!(f, "Value({value})"),
            Update::Apply(_) => write!(f, "Apply(..)"),
        }
    }
}

impl Record {
    /// New record with the value at `path` updated
    ///
    /// Intermediate steps must exist. The last step may name an absent field
    /// or key, in which case `Update::Apply` sees `Value::None`. Records along
    /// the path are re-validated as they are rebuilt.
    pub fn transform(&self, path: &[PathStep], update: impl Into<Update>) -> Result<Record> {
        let update = update.into();
        match transform_value(&Value::Record(self.clone()), path, &update)? {
            Value::Record(record) => Ok(record),
            other => Err(PersistentError::TypeMismatch {
                field: self.type_name().to_string(),
                expected: vec![self.type_name().to_string()],
                actual: other.type_name().to_string(),
            }),
        }
    }
}

fn transform_value(value: &Value, path: &[PathStep], update: &Update) -> Result<Value> {
    let Some((step, rest)) = path.split_first() else {
        return Ok(update.run(value));
    };
    let child = |current: Option<&Value>| -> Result<Value> {
        match current {
            Some(current) => transform_value(current, rest, update),
            None if rest.is_empty() => Ok(update.run(&Value::None)),
            None => Err(PersistentError::key_not_found(&step.to_string())),
        }
    };

    match (value, step) {
        (Value::Record(record), PathStep::Key(name)) => {
            let next = child(record.get(name))?;
            Ok(Value::Record(record.set(name, next)?))
        }
        (Value::Map(entries), PathStep::Key(key)) => {
            let next = child(entries.get(key))?;
            Ok(Value::Map(entries.insert(Arc::clone(key), next)))
        }
        (Value::Dict(entries), PathStep::Key(key)) => {
            let next = child(entries.get(&**key))?;
            let mut entries = entries.clone();
            entries.insert(key.to_string(), next);
            Ok(Value::Dict(entries))
        }
        (Value::Vector(items), PathStep::Index(index)) => {
            let next = transform_value(items.try_get(*index)?, rest, update)?;
            Ok(Value::Vector(items.set(*index, next)?))
        }
        (Value::List(items), PathStep::Index(index)) => {
            let current = items.get(*index).ok_or(PersistentError::IndexOutOfRange {
                index: *index,
                size: items.len(),
            })?;
            let next = transform_value(current, rest, update)?;
            let mut items = items.clone();
            items[*index] = next;
            Ok(Value::List(items))
        }
        (other, step) => Err(PersistentError::TypeMismatch {
            field: step.to_string(),
            expected: match step {
                PathStep::Key(_) => vec!["record".to_string(), "pmap".to_string(), "dict".to_string()],
                PathStep::Index(_) => vec!["pvector".to_string(), "list".to_string()],
            },
            actual: other.type_name().to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::PersistentVector;
    use crate::record::{Field, FieldType, Schema};

    fn line() -> Arc<Schema> {
        let point = Schema::builder("Point")
            .field("x", Field::new().of_type(FieldType::Integer))
            .field("y", Field::new().of_type(FieldType::Integer))
            .build();
        Schema::builder("Line")
            .field("p1", Field::new().of_type(FieldType::record(&point)))
            .field("p2", Field::new().of_type(FieldType::record(&point)))
            .field("tags", Field::new().of_type(FieldType::Vector))
            .build()
    }

    fn sample() -> Record {
        line()
            .create_from(Value::dict([
                ("p1", Value::dict([("x", 1), ("y", 2)])),
                ("p2", Value::dict([("x", 3), ("y", 4)])),
            ]))
            .unwrap()
    }

    #[test]
    fn test_nested_value_replacement() {
        let l = sample();
        let l2 = l.transform(&["p1".into(), "x".into()], Value::from(3)).unwrap();
        assert_eq!(l2.to_string(), "Line(p1=Point(x=3, y=2), p2=Point(x=3, y=4))");
        assert_eq!(l.to_string(), "Line(p1=Point(x=1, y=2), p2=Point(x=3, y=4))");
    }

    #[test]
    fn test_apply_function() {
        let l = sample()
            .transform(
                &["p2".into(), "y".into()],
                Update::apply(|v| Value::from(v.as_integer().unwrap_or(0) * 10)),
            )
            .unwrap();
        assert_eq!(l.field("p2").unwrap().as_record().unwrap().get("y"), Some(&Value::from(40)));
    }

    #[test]
    fn test_vector_step() {
        let tags: PersistentVector<Value> = ["a", "b"].into_iter().map(Value::from).collect();
        let l = sample().set("tags", tags).unwrap();
        let l2 = l
            .transform(&["tags".into(), PathStep::Index(1)], Update::value("c"))
            .unwrap();
        let tags = l2.field("tags").unwrap().as_vector().unwrap();
        assert_eq!(tags.get(1), Some(&Value::from("c")));

        let err = l.transform(&["tags".into(), PathStep::Index(5)], Update::value("c"));
        assert_eq!(err.unwrap_err(), PersistentError::IndexOutOfRange { index: 5, size: 2 });
    }

    #[test]
    fn test_invalid_steps() {
        let l = sample();
        assert!(matches!(
            l.transform(&["p1".into(), PathStep::Index(0)], Value::from(1)),
            Err(PersistentError::TypeMismatch { .. })
        ));
        assert!(matches!(
            l.transform(&["p1".into(), "x".into()], Value::from("str")),
            Err(PersistentError::TypeMismatch { field, .. }) if field == "Point.x"
        ));
    }
}
