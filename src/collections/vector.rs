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

//! Persistent vector
//!
//! A 32-way trie of leaves plus a tail buffer. Indices below the tail offset
//! resolve through the trie, the rest resolve into the tail. Appends fill the
//! tail; a full tail is pushed into the trie as one leaf, copying only the
//! rightmost path.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::{Index, Range};
use std::sync::Arc;

use super::evolver::{Evolve, Evolver, Staging};
use crate::error::{PersistentError, Result};

const BITS: usize = 5;
const WIDTH: usize = 1 << BITS;
const MASK: usize = WIDTH - 1;

#[derive(Clone)]
enum Node<T> {
    Branch(Vec<Arc<Node<T>>>),
    Leaf(Vec<T>),
}

impl<T> Node<T> {
    fn empty_branch() -> Self {
        Node::Branch(Vec::new())
    }

    fn is_empty_branch(&self) -> bool {
        matches!(self, Node::Branch(children) if children.is_empty())
    }
}

/// Mutable children of a node the trie shape guarantees to be a branch
fn branch_mut<T: Clone>(node: &mut Arc<Node<T>>) -> &mut Vec<Arc<Node<T>>> {
    match Arc::make_mut(node) {
        Node::Branch(children) => children,
        Node::Leaf(_) => unreachable!("vector trie leaf found above leaf level"),
    }
}

/// Content equality of two nodes at the same level, skipping shared subtrees
fn node_eq<T: PartialEq>(a: &Arc<Node<T>>, b: &Arc<Node<T>>) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    match (a.as_ref(), b.as_ref()) {
        (Node::Branch(xs), Node::Branch(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| node_eq(x, y))
        }
        (Node::Leaf(xs), Node::Leaf(ys)) => xs == ys,
        _ => false,
    }
}

fn new_path<T>(level: usize, node: Arc<Node<T>>) -> Arc<Node<T>> {
    if level == 0 {
        node
    } else {
        Arc::new(Node::Branch(vec![new_path(level - BITS, node)]))
    }
}

/// Immutable, structurally shared sequence
pub struct PersistentVector<T> {
    len: usize,
    shift: usize,
    root: Arc<Node<T>>,
    tail: Arc<Vec<T>>,
}

impl<T> Clone for PersistentVector<T> {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            shift: self.shift,
            root: Arc::clone(&self.root),
            tail: Arc::clone(&self.tail),
        }
    }
}

impl<T> Default for PersistentVector<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> PersistentVector<T> {
    /// Create an empty vector
    pub fn new() -> Self {
        Self {
            len: 0,
            shift: BITS,
            root: Arc::new(Node::empty_branch()),
            tail: Arc::new(Vec::new()),
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the vector has no elements
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn tail_offset(&self) -> usize {
        self.len - self.tail.len()
    }

    /// The trie leaf holding `index`; `index` must be below the tail offset
    fn leaf_for(&self, index: usize) -> Option<&[T]> {
        let mut node = self.root.as_ref();
        let mut level = self.shift;
        while level > 0 {
            match node {
                Node::Branch(children) => node = children.get((index >> level) & MASK)?,
                Node::Leaf(_) => return None,
            }
            level -= BITS;
        }
        match node {
            Node::Leaf(items) => Some(items),
            Node::Branch(_) => None,
        }
    }

    /// The storage chunk holding `index` and the index of its first element
    fn chunk_for(&self, index: usize) -> Option<(&[T], usize)> {
        let tail_offset = self.tail_offset();
        if index >= tail_offset {
            Some((self.tail.as_slice(), tail_offset))
        } else {
            self.leaf_for(index).map(|leaf| (leaf, index & !MASK))
        }
    }

    /// Element at `index`, if in range
    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let (chunk, base) = self.chunk_for(index)?;
        chunk.get(index - base)
    }

    /// Element at `index`, failing with `IndexOutOfRange`
    pub fn try_get(&self, index: usize) -> Result<&T> {
        self.get(index).ok_or(PersistentError::IndexOutOfRange {
            index,
            size: self.len,
        })
    }

    /// First element
    pub fn first(&self) -> Option<&T> {
        self.get(0)
    }

    /// Last element
    pub fn last(&self) -> Option<&T> {
        self.tail.last()
    }

    /// Lazy iterator over the elements in index order
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            vector: self,
            index: 0,
            chunk: &[],
            chunk_base: 0,
        }
    }

    /// True when both vectors are the same version (same root and tail)
    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.len == other.len
            && Arc::ptr_eq(&self.root, &other.root)
            && Arc::ptr_eq(&self.tail, &other.tail)
    }
}

impl<T: Clone> PersistentVector<T> {
    fn push_mut(&mut self, value: T) {
        if self.tail.len() < WIDTH {
            Arc::make_mut(&mut self.tail).push(value);
        } else {
            let mut fresh = Vec::with_capacity(WIDTH);
            fresh.push(value);
            let full = std::mem::replace(&mut self.tail, Arc::new(fresh));
            let leaf = Arc::new(Node::Leaf(Arc::unwrap_or_clone(full)));

            if (self.len >> BITS) > (1 << self.shift) {
                let old_root = std::mem::replace(&mut self.root, Arc::new(Node::empty_branch()));
                self.root = Arc::new(Node::Branch(vec![old_root, new_path(self.shift, leaf)]));
                self.shift += BITS;
            } else {
                Self::push_tail(self.len, self.shift, &mut self.root, leaf);
            }
        }
        self.len += 1;
    }

    fn push_tail(len: usize, level: usize, parent: &mut Arc<Node<T>>, leaf: Arc<Node<T>>) {
        let sub = ((len - 1) >> level) & MASK;
        let children = branch_mut(parent);
        if level == BITS {
            children.push(leaf);
        } else if sub < children.len() {
            Self::push_tail(len, level - BITS, &mut children[sub], leaf);
        } else {
            children.push(new_path(level - BITS, leaf));
        }
    }

    fn set_mut(&mut self, index: usize, value: T) {
        let tail_offset = self.tail_offset();
        if index >= tail_offset {
            if let Some(slot) = Arc::make_mut(&mut self.tail).get_mut(index - tail_offset) {
                *slot = value;
            }
        } else {
            Self::set_in(&mut self.root, self.shift, index, value);
        }
    }

    fn set_in(node: &mut Arc<Node<T>>, level: usize, index: usize, value: T) {
        match Arc::make_mut(node) {
            Node::Branch(children) => {
                if let Some(child) = children.get_mut((index >> level) & MASK) {
                    Self::set_in(child, level - BITS, index, value);
                }
            }
            Node::Leaf(items) => {
                if let Some(slot) = items.get_mut(index & MASK) {
                    *slot = value;
                }
            }
        }
    }

    fn pop_mut(&mut self) -> Option<T> {
        match self.len {
            0 => return None,
            1 => {
                let value = self.tail.first().cloned();
                *self = Self::new();
                return value;
            }
            _ => {}
        }

        if self.len - self.tail_offset() > 1 {
            self.len -= 1;
            return Arc::make_mut(&mut self.tail).pop();
        }

        // The tail holds one element: the last trie leaf becomes the new tail.
        let value = self.tail.last().cloned();
        let leaf = Self::pop_tail(self.len, self.shift, &mut self.root);
        self.tail = Arc::new(match leaf.map(Arc::unwrap_or_clone) {
            Some(Node::Leaf(items)) => items,
            _ => Vec::new(),
        });

        let collapse = match self.root.as_ref() {
            Node::Branch(children) if self.shift > BITS && children.len() == 1 => {
                Some(Arc::clone(&children[0]))
            }
            _ => None,
        };
        if let Some(only_child) = collapse {
            self.root = only_child;
            self.shift -= BITS;
        }

        self.len -= 1;
        value
    }

    /// Detach the rightmost leaf, pruning branches left empty
    fn pop_tail(len: usize, level: usize, node: &mut Arc<Node<T>>) -> Option<Arc<Node<T>>> {
        let sub = ((len - 2) >> level) & MASK;
        let children = branch_mut(node);
        if level > BITS {
            if sub >= children.len() {
                return None;
            }
            let leaf = Self::pop_tail(len, level - BITS, &mut children[sub]);
            if children[sub].is_empty_branch() {
                children.truncate(sub);
            }
            leaf
        } else {
            children.pop()
        }
    }

    /// A new vector with `value` appended
    pub fn push_back(&self, value: T) -> Self {
        let mut next = self.clone();
        next.push_mut(value);
        next
    }

    /// A new vector without the last element
    pub fn pop(&self) -> Result<Self> {
        if self.is_empty() {
            return Err(PersistentError::EmptyCollection { operation: "pop" });
        }
        let mut next = self.clone();
        next.pop_mut();
        Ok(next)
    }

    /// A new vector without the element at `index`
    pub fn delete(&self, index: usize) -> Result<Self> {
        if index >= self.len {
            return Err(PersistentError::IndexOutOfRange {
                index,
                size: self.len,
            });
        }
        Ok(self
            .iter()
            .enumerate()
            .filter(|(i, _)| *i != index)
            .map(|(_, item)| item.clone())
            .collect())
    }

    /// Elements in `range`, clamped to the vector bounds
    pub fn slice(&self, range: Range<usize>) -> Self {
        let start = range.start.min(self.len);
        let end = range.end.min(self.len);
        if start == 0 && end == self.len {
            return self.clone();
        }
        if start >= end {
            return Self::new();
        }
        self.iter().skip(start).take(end - start).cloned().collect()
    }
}

impl<T: Clone + PartialEq> PersistentVector<T> {
    /// Concatenate two vectors
    pub fn concat(&self, other: &Self) -> Self {
        self.extend_from(other.iter().cloned())
    }

    /// A new vector with every item of `iter` appended
    pub fn extend_from<I: IntoIterator<Item = T>>(&self, iter: I) -> Self {
        let mut evolver = self.evolver();
        evolver.extend(iter);
        evolver.persistent()
    }

    /// A new vector with `index` replaced by `value`.
    ///
    /// `index == len` appends. Only the path to `index` is copied.
    pub fn set(&self, index: usize, value: T) -> Result<Self> {
        let mut evolver = self.evolver();
        evolver.set(index, value)?;
        Ok(evolver.persistent())
    }
}

impl<T: Clone + PartialEq> Evolve for PersistentVector<T> {
    type Evolver = VectorEvolver<T>;

    fn evolver(&self) -> VectorEvolver<T> {
        VectorEvolver {
            staging: Staging::new(self),
        }
    }
}

/// Staging session batching edits to a [`PersistentVector`]
pub struct VectorEvolver<T> {
    staging: Staging<PersistentVector<T>>,
}

impl<T: Clone + PartialEq> VectorEvolver<T> {
    /// Number of elements staged
    pub fn len(&self) -> usize {
        self.staging.working().len()
    }

    /// True when no elements are staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Staged element at `index`
    pub fn get(&self, index: usize) -> Option<&T> {
        self.staging.working().get(index)
    }

    /// Append `value`
    pub fn push_back(&mut self, value: T) -> &mut Self {
        self.staging.edit().push_mut(value);
        self
    }

    /// Remove and return the last element
    pub fn pop(&mut self) -> Result<T> {
        if self.is_empty() {
            return Err(PersistentError::EmptyCollection { operation: "pop" });
        }
        self.staging
            .edit()
            .pop_mut()
            .ok_or(PersistentError::EmptyCollection { operation: "pop" })
    }

    /// Replace the element at `index`; `index == len` appends
    pub fn set(&mut self, index: usize, value: T) -> Result<&mut Self> {
        let len = self.len();
        if index == len {
            return Ok(self.push_back(value));
        }
        match self.staging.working().get(index) {
            None => Err(PersistentError::IndexOutOfRange { index, size: len }),
            Some(current) if *current == value => Ok(self),
            Some(_) => {
                self.staging.edit().set_mut(index, value);
                Ok(self)
            }
        }
    }
}

impl<T: Clone + PartialEq> Extend<T> for VectorEvolver<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        let mut iter = iter.into_iter().peekable();
        if iter.peek().is_none() {
            return;
        }
        let working = self.staging.edit();
        for item in iter {
            working.push_mut(item);
        }
    }
}

impl<T: Clone + PartialEq> Evolver for VectorEvolver<T> {
    type Persistent = PersistentVector<T>;

    fn is_dirty(&self) -> bool {
        self.staging.is_dirty()
    }

    fn persistent(self) -> PersistentVector<T> {
        self.staging.finish(|source, working| source == working)
    }
}

/// Iterator over a [`PersistentVector`], one leaf at a time
pub struct Iter<'a, T> {
    vector: &'a PersistentVector<T>,
    index: usize,
    chunk: &'a [T],
    chunk_base: usize,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<&'a T> {
        if self.index >= self.vector.len {
            return None;
        }
        if self.index >= self.chunk_base + self.chunk.len() {
            let (chunk, base) = self.vector.chunk_for(self.index)?;
            self.chunk = chunk;
            self.chunk_base = base;
        }
        let item = self.chunk.get(self.index - self.chunk_base);
        self.index += 1;
        item
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.vector.len - self.index;
        (remaining, Some(remaining))
    }
}

impl<T> ExactSizeIterator for Iter<'_, T> {}

impl<'a, T> IntoIterator for &'a PersistentVector<T> {
    type Item = &'a T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

impl<T: Clone> FromIterator<T> for PersistentVector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut vector = Self::new();
        for item in iter {
            vector.push_mut(item);
        }
        vector
    }
}

impl<T> Index<usize> for PersistentVector<T> {
    type Output = T;

    fn index(&self, index: usize) -> &T {
        match self.get(index) {
            Some(item) => item,
            None => panic!("index {index} out of range for vector of length {}", self.len),
        }
    }
}

impl<T: PartialEq> PartialEq for PersistentVector<T> {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        let same_shape = self.shift == other.shift && self.tail.len() == other.tail.len();
        if same_shape {
            node_eq(&self.root, &other.root)
                && (Arc::ptr_eq(&self.tail, &other.tail) || self.tail == other.tail)
        } else {
            self.iter().eq(other.iter())
        }
    }
}

impl<T: Eq> Eq for PersistentVector<T> {}

impl<T: Hash> Hash for PersistentVector<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.len.hash(state);
        for item in self {
            item.hash(state);
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for PersistentVector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

impl<T: Serialize> Serialize for PersistentVector<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'de, T: Clone + Deserialize<'de>> Deserialize<'de> for PersistentVector<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        Vec::<T>::deserialize(deserializer).map(|items| items.into_iter().collect())
    }
}
