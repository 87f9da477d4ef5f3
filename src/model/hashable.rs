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

//! Values paired with a precomputed hash
//!
//! Record and value hashing can fail, `std::hash::Hash` cannot. `Hashed`
//! carries a hash that was computed (and checked) up front, so it can key
//! standard hash maps.

use std::hash::{Hash, Hasher};
use std::ops::Deref;

/// Wrapper holding a value and its precomputed content hash
#[derive(Debug, Clone)]
pub struct Hashed<T> {
    value: T,
    hash: u64,
}

impl<T> Hashed<T> {
    pub(crate) fn new(value: T, hash: u64) -> Self {
        Self { value, hash }
    }

    /// The precomputed hash
    pub fn hash_value(&self) -> u64 {
        self.hash
    }

    /// Unwrap the value
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for Hashed<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> Hash for Hashed<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.hash.hash(state);
    }
}

impl<T: PartialEq> PartialEq for Hashed<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T: PartialEq> Eq for Hashed<T> {}
