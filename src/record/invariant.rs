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

//! Invariant checks and their evaluation
//!
//! An invariant returns either one [`Check`] or several. Messages can be
//! deferred with [`Message::lazy`]; a deferred message is rendered only when
//! its check fails.

use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use crate::model::Value;
use crate::record::Record;

/// Field-level predicate over a single value
pub type FieldInvariant = Arc<dyn Fn(&Value) -> Checks + Send + Sync>;

/// Schema-level predicate over a fully assembled record
pub type GlobalInvariant = Arc<dyn Fn(&Record) -> Checks + Send + Sync>;

/// Failure message, either ready or produced on demand
pub enum Message {
    /// Message text
    Text(Cow<'static, str>),
    /// Deferred message, rendered only on failure
    Lazy(Box<dyn FnOnce() -> String>),
}

impl Message {
    /// Create a deferred message
    pub fn lazy<F: FnOnce() -> String + 'static>(f: F) -> Self {
        Message::Lazy(Box::new(f))
    }

    fn render(self) -> String {
        match self {
            Message::Text(text) => text.into_owned(),
            Message::Lazy(produce) => produce(),
        }
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Text(text) => write!(f, "Text({text:?})"),
            Message::Lazy(_) => write!(f, "Lazy(..)"),
        }
    }
}

impl From<&'static str> for Message {
    fn from(text: &'static str) -> Self {
        Message::Text(Cow::Borrowed(text))
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(Cow::Owned(text))
    }
}

/// Outcome of one predicate
#[derive(Debug)]
pub struct Check {
    /// Whether the predicate held
    pub passed: bool,
    /// Message reported when it did not
    pub message: Message,
}

/// Create a check from an outcome and its failure message
pub fn check(passed: bool, message: impl Into<Message>) -> Check {
    Check {
        passed,
        message: message.into(),
    }
}

/// What an invariant returns
#[derive(Debug)]
pub enum Checks {
    /// A single check
    One(Check),
    /// Several checks, evaluated together
    Many(Vec<Check>),
}

impl From<Check> for Checks {
    fn from(check: Check) -> Self {
        Checks::One(check)
    }
}

impl From<Vec<Check>> for Checks {
    fn from(checks: Vec<Check>) -> Self {
        Checks::Many(checks)
    }
}

impl<const N: usize> From<[Check; N]> for Checks {
    fn from(checks: [Check; N]) -> Self {
        Checks::Many(checks.into())
    }
}

impl From<(bool, &'static str)> for Checks {
    fn from((passed, message): (bool, &'static str)) -> Self {
        Checks::One(check(passed, message))
    }
}

impl From<(bool, String)> for Checks {
    fn from((passed, message): (bool, String)) -> Self {
        Checks::One(check(passed, message))
    }
}

impl From<(bool, Message)> for Checks {
    fn from((passed, message): (bool, Message)) -> Self {
        Checks::One(check(passed, message))
    }
}

/// Messages reported by one failing invariant
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantFailure {
    /// A single-check invariant failed
    Single(String),
    /// The failing entries of a multi-check invariant, in order
    Multiple(Vec<String>),
}

impl InvariantFailure {
    /// The individual messages
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        let messages = match self {
            InvariantFailure::Single(message) => std::slice::from_ref(message),
            InvariantFailure::Multiple(messages) => messages.as_slice(),
        };
        messages.iter().map(String::as_str)
    }
}

impl fmt::Display for InvariantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvariantFailure::Single(message) => write!(f, "{message}"),
            InvariantFailure::Multiple(messages) => write!(f, "({})", messages.join(", ")),
        }
    }
}

/// Evaluate the checks, rendering messages only for those that failed
pub fn evaluate(checks: impl Into<Checks>) -> Option<InvariantFailure> {
    match checks.into() {
        Checks::One(check) if check.passed => None,
        Checks::One(check) => Some(InvariantFailure::Single(check.message.render())),
        Checks::Many(checks) => {
            let failed: Vec<String> = checks
                .into_iter()
                .filter(|c| !c.passed)
                .map(|c| c.message.render())
                .collect();
            if failed.is_empty() {
                None
            } else {
                Some(InvariantFailure::Multiple(failed))
            }
        }
    }
}
