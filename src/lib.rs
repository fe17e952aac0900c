//! Runtime core for a dynamically-typed scripting language: a
//! register-less stack-machine bytecode interpreter, a refcounted +
//! mark-sweep garbage collector, a polymorphic class system with
//! multiple inheritance and operator overloading, a cooperative
//! multi-thread scheduler with a GIL, generators, exceptions, and the
//! builtin container types (string, array, hash, iterator, regex).
//!
//! Module layout mirrors the subsystems above: [`value`]/[`reference`]
//! for the tagged-union representation, [`gc`] for the arena and
//! collector, [`symbol`] for the interner and robin-hood hash table,
//! [`class`]/[`object`] for the type system, [`containers`] for the
//! builtin metatypes, [`operators`] for the binary/unary kernel,
//! [`function`]/[`module`] for callables and compiled bytecode,
//! [`cursor`]/[`dispatch`]/[`generator`] for one thread's execution
//! state and the opcode loop, [`scheduler`] for cooperative
//! multi-threading, [`host`] for embedder-registered builtins,
//! [`printer`] for output sinks, [`error`] for the diagnostic
//! taxonomy, and [`config`] for ambient tuning knobs.

pub mod class;
pub mod config;
pub mod containers;
pub mod cursor;
pub mod dispatch;
pub mod error;
pub mod function;
pub mod gc;
pub mod generator;
pub mod host;
pub mod module;
pub mod object;
pub mod operators;
pub mod printer;
pub mod reference;
pub mod scheduler;
pub mod symbol;
pub mod value;
