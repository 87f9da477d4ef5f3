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

//! Persistent hash map (HAMT)
//!
//! Branches are indexed by successive 5-bit chunks of the key hash, lowest
//! bits first, and store only the occupied slots (bitmap + popcount). Leaves
//! are buckets keyed by the full 64-bit hash; keys with identical hashes
//! share one bucket.

use rustc_hash::FxHasher;
use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use smallvec::{SmallVec, smallvec};
use std::borrow::Borrow;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;
use std::sync::Arc;

use super::evolver::{Evolve, Evolver, Staging};
use crate::error::{PersistentError, Result};

const BITS: u32 = 5;
const MASK: u64 = (1 << BITS) - 1;

fn hash_of<Q: Hash + ?Sized>(key: &Q) -> u64 {
    let mut hasher = FxHasher::default();
    key.hash(&mut hasher);
    hasher.finish()
}

fn bit_for(hash: u64, shift: u32) -> u32 {
    1 << ((hash >> shift) & MASK)
}

fn slot_for(bitmap: u32, bit: u32) -> usize {
    (bitmap & (bit - 1)).count_ones() as usize
}

#[derive(Clone)]
enum Node<K, V> {
    Branch {
        bitmap: u32,
        children: Vec<Arc<Node<K, V>>>,
    },
    Bucket {
        hash: u64,
        entries: SmallVec<[(K, V); 1]>,
    },
}

impl<K, V> Node<K, V> {
    fn leaf(hash: u64, key: K, value: V) -> Self {
        Node::Bucket {
            hash,
            entries: smallvec![(key, value)],
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Node::Branch { children, .. } => children.is_empty(),
            Node::Bucket { entries, .. } => entries.is_empty(),
        }
    }

    /// Branch separating two buckets whose hashes differ
    fn split(shift: u32, a: Arc<Self>, a_hash: u64, b: Arc<Self>, b_hash: u64) -> Self {
        let a_bit = bit_for(a_hash, shift);
        let b_bit = bit_for(b_hash, shift);
        if a_bit == b_bit {
            Node::Branch {
                bitmap: a_bit,
                children: vec![Arc::new(Self::split(shift + BITS, a, a_hash, b, b_hash))],
            }
        } else {
            let children = if a_bit < b_bit { vec![a, b] } else { vec![b, a] };
            Node::Branch {
                bitmap: a_bit | b_bit,
                children,
            }
        }
    }
}

/// Immutable, structurally shared hash map
pub struct PersistentMap<K, V> {
    len: usize,
    root: Option<Arc<Node<K, V>>>,
}

impl<K, V> Clone for PersistentMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            len: self.len,
            root: self.root.clone(),
        }
    }
}

impl<K, V> Default for PersistentMap<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> PersistentMap<K, V> {
    /// Create an empty map
    pub fn new() -> Self {
        Self { len: 0, root: None }
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the map has no entries
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterator over entries in trie order
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            stack: self
                .root
                .as_ref()
                .map(|root| vec![std::slice::from_ref(root).iter()])
                .unwrap_or_default(),
            entries: (&[]).iter(),
            remaining: self.len,
        }
    }

    /// Iterator over keys
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.iter().map(|(k, _)| k)
    }

    /// Iterator over values
    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.iter().map(|(_, v)| v)
    }

    /// True when both maps are the same version (same root node)
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl<K: Hash + Eq, V> PersistentMap<K, V> {
    /// Value stored under `key`
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_of(key);
        let mut node = self.root.as_deref()?;
        let mut shift = 0;
        loop {
            match node {
                Node::Branch { bitmap, children } => {
                    let bit = bit_for(hash, shift);
                    if bitmap & bit == 0 {
                        return None;
                    }
                    node = children.get(slot_for(*bitmap, bit))?.as_ref();
                    shift += BITS;
                }
                Node::Bucket {
                    hash: bucket_hash,
                    entries,
                } => {
                    if *bucket_hash != hash {
                        return None;
                    }
                    return entries
                        .iter()
                        .find(|(k, _)| Borrow::<Q>::borrow(k) == key)
                        .map(|(_, v)| v);
                }
            }
        }
    }

    /// Value stored under `key`, or `default`
    pub fn get_or<'a, Q>(&'a self, key: &Q, default: &'a V) -> &'a V
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).unwrap_or(default)
    }

    /// Value stored under `key`, failing with `KeyNotFound`
    pub fn try_get<Q>(&self, key: &Q) -> Result<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.get(key)
            .ok_or_else(|| PersistentError::key_not_found(key))
    }

    /// True when `key` is present
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }
}

impl<K: Clone + Hash + Eq, V: Clone> PersistentMap<K, V> {
    fn insert_mut(&mut self, key: K, value: V) {
        let hash = hash_of(&key);
        match &mut self.root {
            None => {
                self.root = Some(Arc::new(Node::leaf(hash, key, value)));
                self.len = 1;
            }
            Some(root) => {
                if Self::insert_in(root, 0, hash, key, value) {
                    self.len += 1;
                }
            }
        }
    }

    /// Returns true when the key was not present before
    fn insert_in(node: &mut Arc<Node<K, V>>, shift: u32, hash: u64, key: K, value: V) -> bool {
        if let Node::Bucket {
            hash: bucket_hash, ..
        } = node.as_ref()
        {
            let bucket_hash = *bucket_hash;
            if bucket_hash != hash {
                let existing = Arc::clone(node);
                let added = Arc::new(Node::leaf(hash, key, value));
                *node = Arc::new(Node::split(shift, existing, bucket_hash, added, hash));
                return true;
            }
        }

        match Arc::make_mut(node) {
            Node::Branch { bitmap, children } => {
                let bit = bit_for(hash, shift);
                let slot = slot_for(*bitmap, bit);
                if *bitmap & bit == 0 {
                    children.insert(slot, Arc::new(Node::leaf(hash, key, value)));
                    *bitmap |= bit;
                    true
                } else {
                    Self::insert_in(&mut children[slot], shift + BITS, hash, key, value)
                }
            }
            Node::Bucket { entries, .. } => match entries.iter_mut().find(|(k, _)| *k == key) {
                Some(entry) => {
                    entry.1 = value;
                    false
                }
                None => {
                    entries.push((key, value));
                    true
                }
            },
        }
    }

    fn remove_mut<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let hash = hash_of(key);
        let root = self.root.as_mut()?;
        let removed = Self::remove_in(root, 0, hash, key)?;
        self.len -= 1;
        if self.len == 0 {
            self.root = None;
        }
        Some(removed)
    }

    /// Remove `key` below `node`; the key must be present
    fn remove_in<Q>(node: &mut Arc<Node<K, V>>, shift: u32, hash: u64, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let (removed, lifted) = match Arc::make_mut(node) {
            Node::Bucket { entries, .. } => {
                let position = entries.iter().position(|(k, _)| Borrow::<Q>::borrow(k) == key)?;
                (entries.remove(position).1, None)
            }
            Node::Branch { bitmap, children } => {
                let bit = bit_for(hash, shift);
                if *bitmap & bit == 0 {
                    return None;
                }
                let slot = slot_for(*bitmap, bit);
                let removed = Self::remove_in(&mut children[slot], shift + BITS, hash, key)?;
                if children[slot].is_empty() {
                    children.remove(slot);
                    *bitmap &= !bit;
                }
                // A branch left with one bucket is replaced by that bucket.
                let lifted = match children.as_slice() {
                    [only] if matches!(only.as_ref(), Node::Bucket { .. }) => Some(Arc::clone(only)),
                    _ => None,
                };
                (removed, lifted)
            }
        };
        if let Some(bucket) = lifted {
            *node = bucket;
        }
        Some(removed)
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> PersistentMap<K, V> {
    /// A new map with `key` removed, failing with `KeyNotFound` when absent
    pub fn remove<Q>(&self, key: &Q) -> Result<Self>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        let mut evolver = self.evolver();
        evolver.remove(key)?;
        Ok(evolver.persistent())
    }

    /// A new map with `key` removed; the same map when `key` is absent
    pub fn discard<Q>(&self, key: &Q) -> Self
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        let mut evolver = self.evolver();
        evolver.discard(key);
        evolver.persistent()
    }

    /// A new map with `key` bound to `value`.
    ///
    /// Binding a key to an equal value returns the same map.
    pub fn insert(&self, key: K, value: V) -> Self {
        let mut evolver = self.evolver();
        evolver.insert(key, value);
        evolver.persistent()
    }

    /// A new map with every pair of `entries` inserted
    pub fn update<I: IntoIterator<Item = (K, V)>>(&self, entries: I) -> Self {
        let mut evolver = self.evolver();
        evolver.extend(entries);
        evolver.persistent()
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> Evolve for PersistentMap<K, V> {
    type Evolver = MapEvolver<K, V>;

    fn evolver(&self) -> MapEvolver<K, V> {
        MapEvolver {
            staging: Staging::new(self),
        }
    }
}

/// Staging session batching edits to a [`PersistentMap`]
pub struct MapEvolver<K, V> {
    staging: Staging<PersistentMap<K, V>>,
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> MapEvolver<K, V> {
    /// Number of entries staged
    pub fn len(&self) -> usize {
        self.staging.working().len()
    }

    /// True when no entries are staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Staged value for `key`
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.staging.working().get(key)
    }

    /// True when `key` is staged
    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.get(key).is_some()
    }

    /// Bind `key` to `value`; an equal existing binding leaves the session clean
    pub fn insert(&mut self, key: K, value: V) -> &mut Self {
        if self.get(&key) != Some(&value) {
            self.staging.edit().insert_mut(key, value);
        }
        self
    }

    /// Remove `key`, failing with `KeyNotFound` when absent
    pub fn remove<Q>(&mut self, key: &Q) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + fmt::Debug + ?Sized,
    {
        self.discard(key)
            .ok_or_else(|| PersistentError::key_not_found(key))
    }

    /// Remove `key` if present
    pub fn discard<Q>(&mut self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if !self.contains_key(key) {
            return None;
        }
        self.staging.edit().remove_mut(key)
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> Extend<(K, V)> for MapEvolver<K, V> {
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        for (key, value) in iter {
            self.insert(key, value);
        }
    }
}

impl<K: Clone + Hash + Eq, V: Clone + PartialEq> Evolver for MapEvolver<K, V> {
    type Persistent = PersistentMap<K, V>;

    fn is_dirty(&self) -> bool {
        self.staging.is_dirty()
    }

    fn persistent(self) -> PersistentMap<K, V> {
        self.staging.finish(|source, working| source == working)
    }
}

/// Depth-first iterator over a [`PersistentMap`]
pub struct Iter<'a, K, V> {
    stack: Vec<std::slice::Iter<'a, Arc<Node<K, V>>>>,
    entries: std::slice::Iter<'a, (K, V)>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((key, value)) = self.entries.next() {
                self.remaining -= 1;
                return Some((key, value));
            }
            let level = self.stack.last_mut()?;
            match level.next() {
                None => {
                    self.stack.pop();
                }
                Some(node) => match node.as_ref() {
                    Node::Branch { children, .. } => self.stack.push(children.iter()),
                    Node::Bucket { entries, .. } => self.entries = entries.iter(),
                },
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K, V> IntoIterator for &'a PersistentMap<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Iter<'a, K, V> {
        self.iter()
    }
}

impl<K: Clone + Hash + Eq, V: Clone> FromIterator<(K, V)> for PersistentMap<K, V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert_mut(key, value);
        }
        map
    }
}

/// Same shape and contents, skipping shared subtrees
fn node_eq<K: Eq, V: PartialEq>(a: &Arc<Node<K, V>>, b: &Arc<Node<K, V>>) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    match (a.as_ref(), b.as_ref()) {
        (
            Node::Branch { bitmap: x, children: xs },
            Node::Branch { bitmap: y, children: ys },
        ) => x == y && xs.iter().zip(ys).all(|(a, b)| node_eq(a, b)),
        (
            Node::Bucket { hash: x, entries: xs },
            Node::Bucket { hash: y, entries: ys },
        ) => {
            x == y
                && xs.len() == ys.len()
                && xs.iter().all(|(k, v)| ys.iter().any(|(k2, v2)| k == k2 && v == v2))
        }
        _ => false,
    }
}

impl<K: Hash + Eq, V: PartialEq> PartialEq for PersistentMap<K, V> {
    fn eq(&self, other: &Self) -> bool {
        if self.len != other.len {
            return false;
        }
        let same_shape = match (&self.root, &other.root) {
            (None, None) => true,
            (Some(a), Some(b)) => node_eq(a, b),
            _ => false,
        };
        same_shape || self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K: Hash + Eq, V: Eq> Eq for PersistentMap<K, V> {}

impl<K: Hash, V: Hash> Hash for PersistentMap<K, V> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        // Order independent: entry hashes are summed.
        let sum = self.iter().fold(0u64, |acc, (k, v)| {
            let mut hasher = FxHasher::default();
            k.hash(&mut hasher);
            v.hash(&mut hasher);
            acc.wrapping_add(hasher.finish())
        });
        state.write_usize(self.len);
        state.write_u64(sum);
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for PersistentMap<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

impl<K: Serialize, V: Serialize> Serialize for PersistentMap<K, V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_map(self.iter())
    }
}

struct MapVisitor<K, V>(PhantomData<(K, V)>);

impl<'de, K, V> Visitor<'de> for MapVisitor<K, V>
where
    K: Clone + Hash + Eq + Deserialize<'de>,
    V: Clone + Deserialize<'de>,
{
    type Value = PersistentMap<K, V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a map")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
        let mut map = PersistentMap::new();
        while let Some((key, value)) = access.next_entry()? {
            map.insert_mut(key, value);
        }
        Ok(map)
    }
}

impl<'de, K, V> Deserialize<'de> for PersistentMap<K, V>
where
    K: Clone + Hash + Eq + Deserialize<'de>,
    V: Clone + Deserialize<'de>,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        deserializer.deserialize_map(MapVisitor(PhantomData))
    }
}
