//! Builtin Hash container. Keys are arbitrary Data values; equality is
//! delegated to the operator kernel's `==` semantics rather than hashed
//! structurally, so this is a comparator-based association list, not a
//! pure structural hash map.

use crate::gc::Gc;
use crate::reference::Reference;
use crate::value::Data;

#[derive(Debug, Clone, Default)]
pub struct HashData {
    entries: Vec<(Reference, Reference)>,
}

/// Structural equality for primitive key formats, used by `find`. Object
/// keys compare by identity (same underlying Gc slot) — delegating to the
/// full `==` operator overload would require threading the interpreter's
/// call machinery through container internals, which the builtin
/// container layer deliberately does not depend on.
fn keys_equal(gc: &Gc, a: &Reference, b: &Reference) -> bool {
    if a.handle() == b.handle() {
        return true;
    }
    match (gc.get(a.handle()), gc.get(b.handle())) {
        (Data::Number(x), Data::Number(y)) => x == y,
        (Data::Boolean(x), Data::Boolean(y)) => x == y,
        (Data::None, Data::None) | (Data::Null, Data::Null) => true,
        (Data::Object(x), Data::Object(y)) => match (x.as_string(), y.as_string()) {
            (Some(sx), Some(sy)) => sx.value == sy.value,
            _ => false,
        },
        _ => false,
    }
}

impl HashData {
    pub fn new() -> Self {
        HashData::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&Reference, &Reference)> {
        self.entries.iter().map(|(k, v)| (k, v))
    }

    pub fn get(&self, gc: &Gc, key: &Reference) -> Option<Reference> {
        self.entries.iter().find(|(k, _)| keys_equal(gc, k, key)).map(|(_, v)| *v)
    }

    /// R2: subscript write followed by subscript read yields the same
    /// value; overwriting an existing key replaces in place rather than
    /// appending, preserving iteration order for untouched keys.
    pub fn set(&mut self, gc: &Gc, key: Reference, value: Reference) {
        let position = self.position(gc, &key);
        self.set_at(position, key, value);
    }

    /// Index of the entry matching `key`, split out from `set` for a
    /// caller that already holds a mutable borrow of the Gc slot backing
    /// this hash and so cannot also pass `gc` to `set` itself — look the
    /// position up first under a read-only borrow, then mutate by index.
    pub fn position(&self, gc: &Gc, key: &Reference) -> Option<usize> {
        self.entries.iter().position(|(k, _)| keys_equal(gc, k, key))
    }

    /// Write `value` at `position` (overwrite) or append a new entry.
    /// Returns `(old_value, unused_key)`: the replaced value and the
    /// passed-in `key` if it went unused because an entry already held
    /// an equal one — both are the caller's to release.
    pub fn set_at(&mut self, position: Option<usize>, key: Reference, value: Reference) -> (Option<Reference>, Option<Reference>) {
        match position {
            Some(i) => {
                let old = std::mem::replace(&mut self.entries[i].1, value);
                (Some(old), Some(key))
            }
            None => {
                self.entries.push((key, value));
                (None, None)
            }
        }
    }

    pub fn remove(&mut self, gc: &Gc, key: &Reference) -> Option<Reference> {
        let pos = self.entries.iter().position(|(k, _)| keys_equal(gc, k, key))?;
        Some(self.entries.remove(pos).1)
    }

    pub fn keys(&self) -> impl Iterator<Item = &Reference> {
        self.entries.iter().map(|(k, _)| k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Flags;

    #[test]
    fn set_then_get_round_trips() {
        let mut gc = Gc::new(false);
        let mut hash = HashData::new();
        let key = Reference::new_strong(gc.alloc(Data::Number(1.0)), Flags::new(), &mut gc);
        let value = Reference::new_strong(gc.alloc(Data::Number(42.0)), Flags::new(), &mut gc);
        hash.set(&gc, key, value);
        let got = hash.get(&gc, &key).unwrap();
        match gc.get(got.handle()) {
            Data::Number(n) => assert_eq!(*n, 42.0),
            _ => panic!("expected number"),
        }
        assert_eq!(hash.len(), 1);
    }

    #[test]
    fn overwrite_replaces_in_place() {
        let mut gc = Gc::new(false);
        let mut hash = HashData::new();
        let key = Reference::new_strong(gc.alloc(Data::Number(1.0)), Flags::new(), &mut gc);
        let v1 = Reference::new_strong(gc.alloc(Data::Number(1.0)), Flags::new(), &mut gc);
        let v2 = Reference::new_strong(gc.alloc(Data::Number(2.0)), Flags::new(), &mut gc);
        hash.set(&gc, key, v1);
        hash.set(&gc, key, v2);
        assert_eq!(hash.len(), 1);
    }
}
