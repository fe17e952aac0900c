//! `Reference` — a handle pairing a Data location with a `Flags` bitset.
//! `Reference` itself is a plain value type (`Copy`); refcount
//! bookkeeping is performed explicitly against a `Gc` rather than
//! through `Clone`/`Drop` — the runtime context is always threaded
//! through explicitly, so there is no ambient global GC a `Drop` impl
//! could reach for.

use crate::gc::{Gc, GcHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    Public,
    Protected,
    Private,
    Package,
}

impl Default for Visibility {
    fn default() -> Self {
        Visibility::Public
    }
}

/// Flag bits carried by every Reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags {
    bits: u8,
    pub visibility: Visibility,
}

impl Flags {
    pub const GLOBAL: u8 = 1 << 0;
    pub const CONST_ADDRESS: u8 = 1 << 1;
    pub const CONST_VALUE: u8 = 1 << 2;
    pub const TEMPORARY: u8 = 1 << 3;
    pub const FINAL: u8 = 1 << 4;
    pub const OVERRIDE: u8 = 1 << 5;

    pub fn new() -> Self {
        Flags::default()
    }

    pub fn with(mut self, bit: u8) -> Self {
        self.bits |= bit;
        self
    }

    pub fn with_visibility(mut self, v: Visibility) -> Self {
        self.visibility = v;
        self
    }

    pub fn has(&self, bit: u8) -> bool {
        self.bits & bit != 0
    }

    pub fn set(&mut self, bit: u8) {
        self.bits |= bit;
    }

    pub fn is_global(&self) -> bool {
        self.has(Self::GLOBAL)
    }

    pub fn is_const_address(&self) -> bool {
        self.has(Self::CONST_ADDRESS)
    }

    pub fn is_const_value(&self) -> bool {
        self.has(Self::CONST_VALUE)
    }

    pub fn is_temporary(&self) -> bool {
        self.has(Self::TEMPORARY)
    }

    pub fn is_final(&self) -> bool {
        self.has(Self::FINAL)
    }

    pub fn is_override(&self) -> bool {
        self.has(Self::OVERRIDE)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// Increments the Data refcount on acquire, decrements on release. A
    /// "strong root" additionally registers with the GC as a traversal
    /// root.
    Strong,
    /// Does not adjust refcount; lifetime bounded by an enclosing strong
    /// owner (the value stack, or the containing Object's slot array).
    Weak,
}

/// A Reference: Data handle + Flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reference {
    handle: GcHandle,
    pub flags: Flags,
    kind: RefKind,
}

impl Reference {
    pub fn new_weak(handle: GcHandle, flags: Flags) -> Self {
        Reference { handle, flags, kind: RefKind::Weak }
    }

    /// Construct a strong reference, acquiring it against `gc` immediately.
    pub fn new_strong(handle: GcHandle, flags: Flags, gc: &mut Gc) -> Self {
        gc.acquire(handle);
        Reference { handle, flags, kind: RefKind::Strong }
    }

    pub fn handle(&self) -> GcHandle {
        self.handle
    }

    pub fn is_strong(&self) -> bool {
        self.kind == RefKind::Strong
    }

    pub fn is_weak(&self) -> bool {
        self.kind == RefKind::Weak
    }

    pub fn to_weak(&self) -> Reference {
        Reference { handle: self.handle, flags: self.flags, kind: RefKind::Weak }
    }

    /// Acquire a second strong reference to the same Data (the explicit
    /// analogue of copy-constructing a strong Reference in the original).
    pub fn clone_strong(&self, gc: &mut Gc) -> Reference {
        Reference::new_strong(self.handle, self.flags, gc)
    }

    /// Release this reference's hold on the Gc (a no-op for Weak
    /// references). Must be called exactly once per strong acquisition —
    /// callers (Cursor stack pop, frame teardown, slot overwrite) are
    /// responsible for this since Reference has no Drop glue.
    pub fn release(self, gc: &mut Gc) {
        if self.is_strong() {
            gc.release(self.handle);
        }
    }

    /// `move_data`: rebind this reference's target, subject to the
    /// `const_address` invariant — a const_address reference's Data
    /// pointer may only change while the current Data is `None`. Returns `false` if the move is rejected.
    pub fn move_data(&mut self, new_handle: GcHandle, gc: &mut Gc) -> bool {
        if self.flags.is_const_address() {
            let current_is_none = matches!(gc.get(self.handle), crate::value::Data::None);
            if !current_is_none {
                return false;
            }
        }
        if self.is_strong() {
            gc.acquire(new_handle);
            gc.release(self.handle);
        }
        self.handle = new_handle;
        true
    }
}
