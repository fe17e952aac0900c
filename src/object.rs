//! `Object` — a Class pointer plus a member slot array, in one of two
//! states: class prototype (slots == None) or instance (slots allocated).

use crate::class::{ClassId, Metatype};
use crate::containers::array::ArrayData;
use crate::containers::hash::HashData;
use crate::containers::iterator::IteratorData;
use crate::containers::regex::RegexData;
use crate::containers::string::StringData;
use crate::reference::Reference;

/// The builtin-container payload an Object carries, selected by its
/// class's `Metatype`. `Plain` covers user-defined `OBJECT` classes and
/// `LIBRARY`/`LIBOBJECT` opaque host values (represented as `Plain` with
/// no slots — hosts manage their own state outside the slot array).
#[derive(Debug, Clone)]
pub enum ObjectPayload {
    /// `None` = class prototype (metaclass operations only). `Some` = a
    /// live instance, laid out at the offsets described by `Class::slots`.
    Plain(Option<Vec<Reference>>),
    String(StringData),
    Array(ArrayData),
    Hash(HashData),
    Iterator(IteratorData),
    Regex(RegexData),
}

impl ObjectPayload {
    pub fn metatype(&self) -> Metatype {
        match self {
            ObjectPayload::Plain(_) => Metatype::Object,
            ObjectPayload::String(_) => Metatype::String,
            ObjectPayload::Array(_) => Metatype::Array,
            ObjectPayload::Hash(_) => Metatype::Hash,
            ObjectPayload::Iterator(_) => Metatype::Iterator,
            ObjectPayload::Regex(_) => Metatype::Regex,
        }
    }

    pub fn is_prototype(&self) -> bool {
        matches!(self, ObjectPayload::Plain(None))
    }
}

#[derive(Debug, Clone)]
pub struct ObjectData {
    pub class: ClassId,
    pub payload: ObjectPayload,
}

impl ObjectData {
    pub fn new_prototype(class: ClassId) -> Self {
        ObjectData { class, payload: ObjectPayload::Plain(None) }
    }

    pub fn new_instance(class: ClassId, slots: Vec<Reference>) -> Self {
        ObjectData { class, payload: ObjectPayload::Plain(Some(slots)) }
    }

    pub fn new_container(class: ClassId, payload: ObjectPayload) -> Self {
        ObjectData { class, payload }
    }

    pub fn slots(&self) -> Option<&[Reference]> {
        match &self.payload {
            ObjectPayload::Plain(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn slots_mut(&mut self) -> Option<&mut [Reference]> {
        match &mut self.payload {
            ObjectPayload::Plain(Some(s)) => Some(s),
            _ => None,
        }
    }

    pub fn is_prototype(&self) -> bool {
        self.payload.is_prototype()
    }

    pub fn as_string(&self) -> Option<&StringData> {
        match &self.payload {
            ObjectPayload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_string_mut(&mut self) -> Option<&mut StringData> {
        match &mut self.payload {
            ObjectPayload::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ArrayData> {
        match &self.payload {
            ObjectPayload::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_array_mut(&mut self) -> Option<&mut ArrayData> {
        match &mut self.payload {
            ObjectPayload::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_hash(&self) -> Option<&HashData> {
        match &self.payload {
            ObjectPayload::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_hash_mut(&mut self) -> Option<&mut HashData> {
        match &mut self.payload {
            ObjectPayload::Hash(h) => Some(h),
            _ => None,
        }
    }

    pub fn as_iterator(&self) -> Option<&IteratorData> {
        match &self.payload {
            ObjectPayload::Iterator(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_iterator_mut(&mut self) -> Option<&mut IteratorData> {
        match &mut self.payload {
            ObjectPayload::Iterator(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_regex(&self) -> Option<&RegexData> {
        match &self.payload {
            ObjectPayload::Regex(r) => Some(r),
            _ => None,
        }
    }
}
