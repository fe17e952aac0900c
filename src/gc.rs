//! Garbage collector — reference counting with a periodic mark-and-sweep
//! pass for cycles.
//!
//! Live Data is represented as entries in a GC arena rather than behind
//! a raw pointer: it lives in a slab (`Vec<Slot>`). A `GcHandle` is the
//! index-plus-generation pair that stands in for a raw data pointer.
//! This keeps the whole collector safe-Rust: no pointer is ever
//! dangling, because a freed slot's generation is bumped and any handle
//! still referring to the old generation is simply invalid rather than
//! unsafe to dereference.

use std::collections::VecDeque;

use crate::class::{ClassRegistry, Metatype};
use crate::object::ObjectPayload;
use crate::value::{Data, GcInfo};

/// Index-plus-generation handle into the `Gc` arena. Stands in for a
/// raw data pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GcHandle {
    index: u32,
    generation: u32,
}

impl GcHandle {
    pub fn index(self) -> usize {
        self.index as usize
    }
}

struct Slot {
    data: Option<Data>,
    info: GcInfo,
    generation: u32,
}

/// Per-`Metatype` allocation statistics, in the spirit of a per-type
/// pool's recycling stats. We do not hand-roll a typed free-list
/// allocator per pool here — the arena slot itself is the recycled
/// storage — but we keep the same *counting* discipline so
/// `GcStats`-style introspection stays meaningful.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub allocations: u64,
    pub collections: u64,
    pub objects_freed: u64,
    pub live: u64,
}

/// A destructor task the GC could not run inline: an Object whose class
/// defines `delete` was swept and must have that operator invoked by the
/// scheduler before its slot is actually reclaimed.
pub struct PendingDestructor {
    pub handle: GcHandle,
}

pub struct Gc {
    slots: Vec<Slot>,
    free: Vec<u32>,
    /// Strong roots: frame-outliving symbol table entries, globals,
    /// in-flight function values, and explicit host roots.
    roots: Vec<GcHandle>,
    pub stats: GcStats,
    debug: bool,
}

impl Gc {
    pub fn new(debug: bool) -> Self {
        Gc { slots: Vec::new(), free: Vec::new(), roots: Vec::new(), stats: GcStats::default(), debug }
    }

    /// Allocate a new Data cell with refcount zero; the caller is
    /// responsible for acquiring a strong reference immediately, the way
    /// a bare allocation is always wrapped by the constructing Reference.
    pub fn alloc(&mut self, data: Data) -> GcHandle {
        self.stats.allocations += 1;
        self.stats.live += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.data = Some(data);
            slot.info = GcInfo::new();
            GcHandle { index, generation: slot.generation }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot { data: Some(data), info: GcInfo::new(), generation: 0 });
            GcHandle { index, generation: 0 }
        }
    }

    fn slot(&self, handle: GcHandle) -> Option<&Slot> {
        self.slots.get(handle.index()).filter(|s| s.generation == handle.generation)
    }

    fn slot_mut(&mut self, handle: GcHandle) -> Option<&mut Slot> {
        self.slots.get_mut(handle.index()).filter(|s| s.generation == handle.generation)
    }

    pub fn get(&self, handle: GcHandle) -> &Data {
        &self.slot(handle).expect("dangling GcHandle").data.as_ref().expect("freed slot")
    }

    pub fn get_mut(&mut self, handle: GcHandle) -> &mut Data {
        self.slot_mut(handle).expect("dangling GcHandle").data.as_mut().expect("freed slot")
    }

    pub fn refcount(&self, handle: GcHandle) -> u32 {
        self.slot(handle).map(|s| s.info.refcount).unwrap_or(0)
    }

    /// Acquire a strong reference: increments refcount.
    pub fn acquire(&mut self, handle: GcHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.info.refcount += 1;
        }
    }

    /// Release a strong reference: decrements refcount. Does not free
    /// immediately on reaching zero; reclamation happens at `collect()`,
    /// which is explicitly scheduler-invoked, not allocation-triggered.
    pub fn release(&mut self, handle: GcHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.info.refcount = slot.info.refcount.saturating_sub(1);
        }
    }

    pub fn add_root(&mut self, handle: GcHandle) {
        self.roots.push(handle);
    }

    pub fn remove_root(&mut self, handle: GcHandle) {
        if let Some(pos) = self.roots.iter().position(|r| *r == handle) {
            self.roots.swap_remove(pos);
        }
    }

    /// Mark-and-sweep cycle collection.
    ///
    /// 1. Clear every reachability bit.
    /// 2. Mark roots and transitively everything reachable from them,
    ///    additionally treating `stacks` (every live Cursor's value
    ///    stack, each element a strong root) as roots for this pass.
    /// 3. Sweep: any Data slot left unmarked is collected, regardless of
    ///    its refcount — reachability from a root is the only thing that
    ///    keeps a slot alive across a collection. Objects with a `delete`
    ///    operator are *not* destroyed here — they are returned as
    ///    `PendingDestructor`s for the scheduler to run first.
    pub fn collect(
        &mut self,
        classes: &ClassRegistry,
        roots: &[GcHandle],
        stacks: &[&[GcHandle]],
    ) -> Vec<PendingDestructor> {
        self.stats.collections += 1;
        for slot in &mut self.slots {
            slot.info.reachable = false;
        }

        let mut worklist: VecDeque<GcHandle> = VecDeque::new();
        for &h in roots.iter().chain(self.roots.iter()) {
            worklist.push_back(h);
        }
        for stack in stacks {
            for &h in stack.iter() {
                worklist.push_back(h);
            }
        }

        while let Some(handle) = worklist.pop_front() {
            let already = match self.slot_mut(handle) {
                Some(slot) if !slot.info.reachable => {
                    slot.info.reachable = true;
                    false
                }
                _ => true,
            };
            if already {
                continue;
            }
            for child in self.children_of(handle) {
                worklist.push_back(child);
            }
        }

        let mut collected = Vec::new();
        let mut pending = Vec::new();
        for index in 0..self.slots.len() {
            let free_this = {
                let slot = &mut self.slots[index];
                if slot.data.is_none() {
                    false
                } else if slot.info.reachable {
                    slot.info.reachable = slot.info.refcount == 0;
                    false
                } else {
                    slot.info.collected = true;
                    true
                }
            };
            if free_this {
                let generation = self.slots[index].generation;
                let handle = GcHandle { index: index as u32, generation };
                let has_delete = self
                    .slots[index]
                    .data
                    .as_ref()
                    .and_then(|d| d.class_id())
                    .map(|cid| classes.get(cid).find_operator(crate::class::Operator::Delete).is_some())
                    .unwrap_or(false);
                if has_delete {
                    pending.push(PendingDestructor { handle });
                } else {
                    collected.push(handle);
                }
            }
        }

        for handle in collected {
            self.free_slot(handle);
        }

        self.stats.objects_freed += pending.len() as u64;
        if self.debug && (self.stats.collections % 1) == 0 {
            // left intentionally terse: callers decide how to surface stats
        }
        pending
    }

    /// Called by the scheduler once a pending destructor has run, or
    /// immediately for destructor-less objects.
    pub fn free_slot(&mut self, handle: GcHandle) {
        if let Some(slot) = self.slot_mut(handle) {
            slot.data = None;
            slot.generation = slot.generation.wrapping_add(1);
            self.stats.live = self.stats.live.saturating_sub(1);
            self.stats.objects_freed += 1;
            self.free.push(handle.index);
        }
    }

    /// Enumerate the handles a Data cell directly holds (Object slots,
    /// Function captures, Iterator contents) — the traversal edges for the
    /// mark phase.
    fn children_of(&self, handle: GcHandle) -> Vec<GcHandle> {
        let mut out = Vec::new();
        if let Some(slot) = self.slot(handle) {
            if let Some(Data::Object(obj)) = &slot.data {
                match &obj.payload {
                    ObjectPayload::Plain(Some(slots)) => {
                        out.extend(slots.iter().map(|r| r.handle()));
                    }
                    ObjectPayload::Array(arr) => out.extend(arr.items.iter().map(|r| r.handle())),
                    ObjectPayload::Hash(hash) => {
                        out.extend(hash.entries().flat_map(|(k, v)| [k.handle(), v.handle()]));
                    }
                    ObjectPayload::Iterator(it) => out.extend(it.buffer.iter().map(|r| r.handle())),
                    _ => {}
                }
            }
            if let Some(Data::Function(fun)) = &slot.data {
                for sig in fun.signatures.values() {
                    if let Some(captures) = &sig.captures {
                        out.extend(captures.values().map(|r| r.handle()));
                    }
                }
            }
        }
        out
    }

    pub fn metatype_of(&self, handle: GcHandle) -> Option<Metatype> {
        match self.slot(handle)?.data.as_ref()? {
            Data::Object(o) => Some(o.payload.metatype()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRegistry;
    use crate::value::Data;

    #[test]
    fn alloc_and_release_collects() {
        let mut gc = Gc::new(false);
        let classes = ClassRegistry::new();
        let h = gc.alloc(Data::Number(1.0));
        gc.acquire(h);
        assert_eq!(gc.refcount(h), 1);
        gc.release(h);
        assert_eq!(gc.refcount(h), 0);
        let pending = gc.collect(&classes, &[], &[]);
        assert!(pending.is_empty());
        assert_eq!(gc.stats.live, 0);
    }

    #[test]
    fn rooted_value_survives_collection() {
        let mut gc = Gc::new(false);
        let classes = ClassRegistry::new();
        let h = gc.alloc(Data::Number(42.0));
        gc.acquire(h);
        gc.add_root(h);
        gc.collect(&classes, &[], &[]);
        assert_eq!(gc.stats.live, 1);
        if let Data::Number(n) = gc.get(h) {
            assert_eq!(*n, 42.0);
        } else {
            panic!("expected number");
        }
    }

    #[test]
    fn generation_invalidates_stale_handle() {
        let mut gc = Gc::new(false);
        let classes = ClassRegistry::new();
        let h1 = gc.alloc(Data::Number(1.0));
        gc.collect(&classes, &[], &[]);
        let h2 = gc.alloc(Data::Number(2.0));
        assert_eq!(h1.index(), h2.index());
        assert_ne!(h1.generation, h2.generation);
    }
}
