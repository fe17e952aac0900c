//! Interned symbols and the robin-hood open-addressed `SymbolMapping` used
//! for every name→value table in the runtime.
//!
//! Robin-hood hashing: info byte = distance from ideal slot (low bits) +
//! hash echo (high bits), load factor capped at 80%, `try_increase_info`
//! before a full resize, multiplier bump on pathological displacement.
//! See DESIGN.md for the one open naming question this left unreproduced.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};

use once_cell::sync::Lazy;
use parking_lot::Mutex;

/// An interned name. Cheap to copy and compare; the backing string lives
/// in the global `Interner`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol(u32);

struct Interner {
    strings: Vec<String>,
    lookup: HashMap<String, u32>,
}

static INTERNER: Lazy<Mutex<Interner>> =
    Lazy::new(|| Mutex::new(Interner { strings: Vec::new(), lookup: HashMap::new() }));

impl Symbol {
    pub fn intern(name: &str) -> Symbol {
        let mut interner = INTERNER.lock();
        if let Some(&id) = interner.lookup.get(name) {
            return Symbol(id);
        }
        let id = interner.strings.len() as u32;
        interner.strings.push(name.to_string());
        interner.lookup.insert(name.to_string(), id);
        Symbol(id)
    }

    pub fn as_str(&self) -> String {
        INTERNER.lock().strings[self.0 as usize].clone()
    }
}

// ---------------------------------------------------------------------------
// Robin-hood open-addressed map
// ---------------------------------------------------------------------------

const INFO_HASH_SHIFT_INIT: u32 = 1;
const MAX_LOAD_FACTOR_PERCENT: u64 = 80;
/// Bump the hash multiplier by an odd increment when displacement would
/// overflow the info byte, to escape pathological key sets.
const MULTIPLIER_INCREMENT: u64 = 0xc2b2_ae3d_27d4_eb4f;

fn mix(mut h: u64) -> u64 {
    h ^= h >> 33;
    h = h.wrapping_mul(0xff51_afd7_ed55_8ccd);
    h ^= h >> 33;
    h = h.wrapping_mul(0xc4ce_b9fe_1a85_ec53);
    h ^= h >> 33;
    h
}

#[derive(Clone, Debug)]
struct Bucket<K, V> {
    info: u8,
    entry: Option<(K, V)>,
}

impl<K, V> Bucket<K, V> {
    fn empty() -> Self {
        Bucket { info: 0, entry: None }
    }
}

/// Generic open-addressed table with robin-hood displacement: the
/// info-byte layout lets lookups skip a full key compare when info
/// bytes differ outright.
pub struct SymbolMapping<K, V> {
    buckets: Vec<Bucket<K, V>>,
    mask: usize,
    size: usize,
    info_hash_shift: u32,
    multiplier: u64,
}

impl<K: std::fmt::Debug, V: std::fmt::Debug> std::fmt::Debug for SymbolMapping<K, V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SymbolMapping")
            .field("buckets", &self.buckets)
            .field("mask", &self.mask)
            .field("size", &self.size)
            .field("info_hash_shift", &self.info_hash_shift)
            .field("multiplier", &self.multiplier)
            .finish()
    }
}

impl<K: Hash + Eq + Clone, V> Default for SymbolMapping<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Hash + Eq + Clone, V: Clone> Clone for SymbolMapping<K, V> {
    /// Used by generator suspension: a `SavedState` snapshot
    /// clones the frame's symbol table rather than sharing it, since the
    /// original frame keeps executing toward `exit_call` independently of
    /// any later resumption.
    fn clone(&self) -> Self {
        SymbolMapping {
            buckets: self.buckets.clone(),
            mask: self.mask,
            size: self.size,
            info_hash_shift: self.info_hash_shift,
            multiplier: self.multiplier,
        }
    }
}

impl<K: Hash + Eq + Clone, V> SymbolMapping<K, V> {
    pub fn new() -> Self {
        Self::with_capacity(4)
    }

    /// Allocate storage for at least `capacity` entries at 80% load, plus
    /// one sentinel bucket beyond the rounded capacity: `buckets` is sized
    /// one larger than the addressable power-of-two range and the last
    /// slot is never probed into, so there is always a guaranteed "stop"
    /// bucket at the tail of a probe chain.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut n = capacity.max(1).next_power_of_two();
        if n < 4 {
            n = 4;
        }
        SymbolMapping {
            buckets: (0..n + 1).map(|_| Bucket::empty()).collect(),
            mask: n - 1,
            size: 0,
            info_hash_shift: INFO_HASH_SHIFT_INIT,
            multiplier: 0x9E37_79B9_7F4A_7C15,
        }
    }

    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    fn hash_of(&self, key: &K) -> u64 {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        key.hash(&mut hasher);
        mix(hasher.finish().wrapping_mul(self.multiplier))
    }

    /// The ideal bucket index and initial info byte for `h`.
    fn ideal(&self, h: u64) -> (usize, u8) {
        let index = (h as usize) & self.mask;
        let info = 1u8.wrapping_add(((h >> self.info_hash_shift) & 0xff) as u8 & 0x3f);
        (index, info)
    }

    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        if (self.size + 1) * 100 > self.buckets.len().saturating_sub(1) * MAX_LOAD_FACTOR_PERCENT as usize {
            self.grow();
        }

        let h = self.hash_of(&key);
        let (mut index, mut info) = self.ideal(h);
        let mut key = key;
        let mut value = value;

        loop {
            let bucket = &mut self.buckets[index];
            match &bucket.entry {
                None => {
                    bucket.info = info;
                    bucket.entry = Some((key, value));
                    self.size += 1;
                    return None;
                }
                Some((existing_key, _)) if *existing_key == key && bucket.info == info => {
                    let (_, slot) = bucket.entry.as_mut().unwrap();
                    return Some(std::mem::replace(slot, value));
                }
                _ => {
                    if bucket.info < info {
                        // Robin hood: the candidate has travelled further
                        // than the occupant; swap and keep displacing.
                        std::mem::swap(&mut bucket.info, &mut info);
                        let occupant = bucket.entry.replace((key, value)).unwrap();
                        key = occupant.0;
                        value = occupant.1;
                    }
                    index = (index + 1) & self.mask;
                    info = info.saturating_add(1);
                    if info == u8::MAX {
                        // Displacement would overflow the info byte: escape
                        // pathological keys by advancing the multiplier and
                        // rehashing everything.
                        self.rehash_with_new_multiplier();
                        return self.insert(key, value);
                    }
                }
            }
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        let h = self.hash_of(key);
        let (mut index, mut info) = self.ideal(h);
        loop {
            let bucket = &self.buckets[index];
            match &bucket.entry {
                Some((k, v)) if bucket.info == info && k == key => return Some(v),
                Some(_) if bucket.info >= info => {
                    index = (index + 1) & self.mask;
                    info = info.saturating_add(1);
                }
                _ => return None,
            }
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        let h = self.hash_of(key);
        let (mut index, mut info) = self.ideal(h);
        loop {
            let found = {
                let bucket = &self.buckets[index];
                match &bucket.entry {
                    Some((k, _)) if bucket.info == info && k == key => true,
                    Some(_) if bucket.info >= info => false,
                    _ => return None,
                }
            };
            if found {
                return self.buckets[index].entry.as_mut().map(|(_, v)| v);
            }
            index = (index + 1) & self.mask;
            info = info.saturating_add(1);
        }
    }

    pub fn contains_key(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Remove `key`, backward-shifting the probe chain that follows it so
    /// invariant P4 (every occupied bucket's distance reflects a
    /// contiguous run back to its ideal slot) keeps holding.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let h = self.hash_of(key);
        let (mut index, mut info) = self.ideal(h);
        let found_index = loop {
            let bucket = &self.buckets[index];
            match &bucket.entry {
                Some((k, _)) if bucket.info == info && k == key => break index,
                Some(_) if bucket.info >= info => {
                    index = (index + 1) & self.mask;
                    info = info.saturating_add(1);
                }
                _ => return None,
            }
        };

        let (_, value) = self.buckets[found_index].entry.take().unwrap();
        self.buckets[found_index].info = 0;
        self.size -= 1;

        let mut slot = found_index;
        loop {
            let next = (slot + 1) & self.mask;
            let can_shift = matches!(&self.buckets[next].entry, Some(_)) && self.buckets[next].info > 1;
            if !can_shift {
                break;
            }
            self.buckets[slot].info = self.buckets[next].info - 1;
            self.buckets[slot].entry = self.buckets[next].entry.take();
            self.buckets[next].info = 0;
            slot = next;
        }

        Some(value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &V)> {
        self.buckets.iter().filter_map(|b| b.entry.as_ref().map(|(k, v)| (k, v)))
    }

    /// `try_increase_info`-or-resize: double the bucket count.
    fn grow(&mut self) {
        let new_cap = (self.mask + 1) * 2;
        self.rehash_into(new_cap, self.multiplier);
    }

    fn rehash_with_new_multiplier(&mut self) {
        let new_multiplier = self.multiplier.wrapping_add(MULTIPLIER_INCREMENT) | 1;
        let cap = self.mask + 1;
        self.rehash_into(cap, new_multiplier);
    }

    /// During rehash, every live entry is reinserted from the old table
    /// before the old storage is released.
    fn rehash_into(&mut self, new_cap: usize, multiplier: u64) {
        let old = std::mem::replace(
            self,
            SymbolMapping {
                buckets: (0..new_cap + 1).map(|_| Bucket::empty()).collect(),
                mask: new_cap - 1,
                size: 0,
                info_hash_shift: self.info_hash_shift,
                multiplier,
            },
        );
        for bucket in old.buckets {
            if let Some((k, v)) = bucket.entry {
                self.insert(k, v);
            }
        }
    }
}

/// A process-wide counter used by tests to assert interning is stable
/// within a run; not part of the public data model.
pub static SYMBOL_ALLOC_COUNT: AtomicU32 = AtomicU32::new(0);

pub fn next_alloc_id() -> u32 {
    SYMBOL_ALLOC_COUNT.fetch_add(1, Ordering::Relaxed)
}
