//! Runtime value representation — `Data`, the seven-format sum type every
//! `Reference` ultimately points at.
//!
//! Data never owns its own storage directly: it lives inside a `Gc` arena
//! slot (see `gc.rs`). This module only describes the payload shapes and
//! the per-slot GC bookkeeping that travels with them.

use std::fmt;

use crate::class::ClassId;
use crate::containers::array::ArrayData;
use crate::containers::hash::HashData;
use crate::containers::iterator::IteratorData;
use crate::containers::regex::RegexData;
use crate::containers::string::StringData;
use crate::function::FunctionData;
use crate::object::ObjectData;

/// One of the seven value formats a `Data` cell can hold.
#[derive(Debug, Clone)]
pub enum Data {
    /// The "uninitialized" sentinel. A `const_address` reference may only
    /// be rebound while its current Data is `None`.
    None,
    Null,
    Number(f64),
    Boolean(bool),
    Object(ObjectData),
    Package(PackageData),
    Function(FunctionData),
}

/// A namespace value: either the global package or a nested package path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageData {
    pub path: Vec<String>,
}

impl PackageData {
    pub fn root() -> Self {
        PackageData { path: Vec::new() }
    }

    pub fn name(&self) -> String {
        self.path.join(".")
    }
}

impl Data {
    pub fn format(&self) -> Format {
        match self {
            Data::None => Format::None,
            Data::Null => Format::Null,
            Data::Number(_) => Format::Number,
            Data::Boolean(_) => Format::Boolean,
            Data::Object(_) => Format::Object,
            Data::Package(_) => Format::Package,
            Data::Function(_) => Format::Function,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Data::None)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Data::Null)
    }

    /// The class backing an OBJECT format value's builtin container, if any.
    /// Used by the operator kernel to route builtin metatype semantics
    /// before falling back to the generic object-operator table.
    pub fn class_id(&self) -> Option<ClassId> {
        match self {
            Data::Object(obj) => Some(obj.class),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectData> {
        match self {
            Data::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut ObjectData> {
        match self {
            Data::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_string(&self) -> Option<&StringData> {
        match self {
            Data::Object(o) => o.as_string(),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match self {
            Data::Object(o) => o.as_array(),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashData> {
        match self {
            Data::Object(o) => o.as_hash(),
            _ => None,
        }
    }

    pub fn as_iterator(&self) -> Option<&IteratorData> {
        match self {
            Data::Object(o) => o.as_iterator(),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&RegexData> {
        match self {
            Data::Object(o) => o.as_regex(),
            _ => None,
        }
    }
}

/// Coarse type tag, cheap to compare, used by the operator kernel and by
/// diagnostics that should not need to match the full payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    None,
    Null,
    Number,
    Boolean,
    Object,
    Package,
    Function,
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Format::None => "none",
            Format::Null => "null",
            Format::Number => "number",
            Format::Boolean => "boolean",
            Format::Object => "object",
            Format::Package => "package",
            Format::Function => "function",
        };
        write!(f, "{s}")
    }
}

/// Per-slot GC bookkeeping, stored alongside `Data` in the arena.
/// References are indices into a `Gc` arena, not raw pointers, so there
/// is no separate linked-list field for cycle tracking; liveness is
/// tracked by the arena's occupancy, not by manual list splicing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GcInfo {
    pub refcount: u32,
    pub reachable: bool,
    pub collected: bool,
}

impl GcInfo {
    pub fn new() -> Self {
        GcInfo { refcount: 0, reachable: false, collected: false }
    }
}
