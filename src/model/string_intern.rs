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

//! String interning for field names
//!
//! Field names are the keys of every record's field map. Interning them means
//! all records, schemas and path steps hold the same `Arc<str>` for a name.

use dashmap::DashSet;
use std::sync::Arc;

/// Thread-safe string interner using Arc for shared ownership
pub struct StringInterner {
    cache: DashSet<Arc<str>>,
}

impl Default for StringInterner {
    fn default() -> Self {
        Self::new()
    }
}

impl StringInterner {
    /// Create a new string interner
    pub fn new() -> Self {
        Self {
            cache: DashSet::new(),
        }
    }

    /// Intern a string, returning a shared Arc<str>
    pub fn intern<S: AsRef<str>>(&self, s: S) -> Arc<str> {
        let s_ref = s.as_ref();

        // Fast path: check if already interned
        if let Some(interned) = self.cache.get(s_ref) {
            return Arc::clone(interned.key());
        }

        let interned: Arc<str> = Arc::from(s_ref);
        if self.cache.insert(Arc::clone(&interned)) {
            return interned;
        }
        // Lost a race with another thread; return the winner
        self.cache
            .get(s_ref)
            .map(|winner| Arc::clone(winner.key()))
            .unwrap_or(interned)
    }

    /// Get statistics about the interner
    pub fn stats(&self) -> InternerStats {
        InternerStats {
            entries: self.cache.len(),
        }
    }

    /// Clear all interned strings
    pub fn clear(&self) {
        self.cache.clear();
    }
}

/// Statistics about string interning
#[derive(Debug, Clone)]
pub struct InternerStats {
    /// Number of unique strings interned
    pub entries: usize,
}

static GLOBAL_INTERNER: once_cell::sync::Lazy<StringInterner> =
    once_cell::sync::Lazy::new(StringInterner::new);

/// Intern a field name using the global interner
pub fn intern_field_name<S: AsRef<str>>(s: S) -> Arc<str> {
    GLOBAL_INTERNER.intern(s)
}

/// Get statistics from the global interner
pub fn global_interner_stats() -> InternerStats {
    GLOBAL_INTERNER.stats()
}
