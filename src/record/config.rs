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

//! Construction-time validation settings

/// Settings that control how record construction treats its input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidationConfig {
    /// Silently drop arguments the schema does not declare
    pub ignore_extra: bool,

    /// Build nested records and typed containers from plain dicts and lists
    pub coerce_nested: bool,
}

impl ValidationConfig {
    /// Create a validation configuration with custom settings
    pub fn new(ignore_extra: bool, coerce_nested: bool) -> Self {
        Self {
            ignore_extra,
            coerce_nested,
        }
    }

    /// Reject undeclared arguments and require exact types
    pub fn strict() -> Self {
        Self {
            ignore_extra: false,
            coerce_nested: false,
        }
    }

    /// Drop undeclared arguments and convert nested input
    pub fn lenient() -> Self {
        Self {
            ignore_extra: true,
            coerce_nested: true,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            ignore_extra: false,
            coerce_nested: true,
        }
    }
}
