//! Builtin container types: string, array, hash, iterator, regex. Each is an `ObjectPayload` variant backed by a
//! `Metatype`-tagged `Class`, so the operator kernel can special-case
//! their semantics without a vtable lookup.

pub mod array;
pub mod hash;
pub mod iterator;
pub mod regex;
pub mod string;
