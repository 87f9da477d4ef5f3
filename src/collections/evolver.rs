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

//! Evolver protocol shared by the persistent containers
//!
//! An evolver stages several edits against one persistent container and
//! commits them as a single new version. Trie nodes are held through `Arc`;
//! the first edit that descends through a node still shared with the source
//! (or any other snapshot) copies it with `Arc::make_mut`, and later edits
//! through that copy mutate it in place because the session owns it uniquely.
//! A session that never changed anything, or whose edits cancelled out,
//! commits to the source itself.

/// A persistent container that can hand out an evolver
pub trait Evolve: Sized {
    /// The staging type for this container
    type Evolver: Evolver<Persistent = Self>;

    /// Start a staging session. O(1), nothing is copied.
    fn evolver(&self) -> Self::Evolver;
}

/// A single-owner staging session over a persistent container
pub trait Evolver {
    /// The container produced on commit
    type Persistent;

    /// True once any edit changed the staged content
    fn is_dirty(&self) -> bool;

    /// Commit the session.
    ///
    /// Returns the original container (same identity) when the staged
    /// content equals it.
    fn persistent(self) -> Self::Persistent;
}

/// Source snapshot plus the working copy being edited
#[derive(Debug, Clone)]
pub(crate) struct Staging<C> {
    source: C,
    working: C,
    dirty: bool,
}

impl<C: Clone> Staging<C> {
    pub(crate) fn new(source: &C) -> Self {
        Self {
            source: source.clone(),
            working: source.clone(),
            dirty: false,
        }
    }

    pub(crate) fn working(&self) -> &C {
        &self.working
    }

    /// Mutable access for an edit that is known to change the content
    pub(crate) fn edit(&mut self) -> &mut C {
        self.dirty = true;
        &mut self.working
    }

    pub(crate) fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Publish the working copy, or the source when `unchanged` reports that
    /// the edits restored it
    pub(crate) fn finish(self, unchanged: impl FnOnce(&C, &C) -> bool) -> C {
        if !self.dirty {
            log::trace!("evolver commit: no changes, returning source");
            return self.source;
        }
        if unchanged(&self.source, &self.working) {
            log::trace!("evolver commit: edits restored the source");
            return self.source;
        }
        log::trace!("evolver commit: publishing new version");
        // Dropping the source first leaves nodes copied in this session
        // uniquely owned by the result.
        drop(self.source);
        self.working
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_clean_staging_returns_source() {
        let source = Arc::new(vec![1, 2, 3]);
        let staging = Staging::new(&source);
        assert!(!staging.is_dirty());
        assert!(Arc::ptr_eq(&staging.finish(|a, b| a == b), &source));
    }

    #[test]
    fn test_edit_marks_dirty() {
        let source = Arc::new(vec![1, 2, 3]);
        let mut staging = Staging::new(&source);
        Arc::make_mut(staging.edit()).push(4);
        assert!(staging.is_dirty());
        let result = staging.finish(|a, b| a == b);
        assert_eq!(*result, vec![1, 2, 3, 4]);
        assert_eq!(*source, vec![1, 2, 3]);
    }

    #[test]
    fn test_cancelled_edits_return_source() {
        let source = Arc::new(vec![1, 2, 3]);
        let mut staging = Staging::new(&source);
        Arc::make_mut(staging.edit()).push(4);
        Arc::make_mut(staging.edit()).pop();
        assert!(staging.is_dirty());
        assert!(Arc::ptr_eq(&staging.finish(|a, b| a == b), &source));
    }
}
