//! Host-function (builtin) registration and invocation,
//! grounded on the compiler-to-core contract's "builtin method
//! registration" interface the standard library plugs into.

use std::collections::HashMap;
use std::sync::Arc;

use crate::cursor::Cursor;
use crate::error::{CoreDiagnostic, CoreResult};
use crate::gc::Gc;
use crate::reference::Reference;

/// A host callable: receives the active cursor, the Gc, and the already
/// arity-checked argument list, returns the call's result Reference.
pub type BuiltinFn = Arc<dyn Fn(&mut Cursor, &mut Gc, Vec<Reference>) -> CoreResult<Reference> + Send + Sync>;

#[derive(Clone)]
pub struct BuiltinEntry {
    pub arity: i32,
    pub func: BuiltinFn,
}

/// Registry keyed by (module_id, entry_offset) — the same `Handle`
/// coordinate space ordinary compiled functions use, so `call_builtin`
/// can resolve through the identical lookup path as `call`.
#[derive(Default, Clone)]
pub struct BuiltinRegistry {
    entries: HashMap<(u32, u32), BuiltinEntry>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        BuiltinRegistry::default()
    }

    pub fn register(&mut self, module_id: u32, offset: u32, arity: i32, func: BuiltinFn) {
        self.entries.insert((module_id, offset), BuiltinEntry { arity, func });
    }

    pub fn get(&self, module_id: u32, offset: u32) -> Option<&BuiltinEntry> {
        self.entries.get(&(module_id, offset))
    }

    pub fn invoke(
        &self,
        module_id: u32,
        offset: u32,
        cursor: &mut Cursor,
        gc: &mut Gc,
        args: Vec<Reference>,
    ) -> CoreResult<Reference> {
        let entry = self
            .entries
            .get(&(module_id, offset))
            .ok_or_else(|| CoreDiagnostic::not_found("builtin handle"))?
            .clone();
        (entry.func)(cursor, gc, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reference::Flags;
    use crate::value::Data;

    #[test]
    fn register_and_invoke_round_trips() {
        let mut registry = BuiltinRegistry::new();
        registry.register(
            0,
            0,
            1,
            Arc::new(|_cursor, gc, args| {
                let n = match gc.get(args[0].handle()) {
                    Data::Number(n) => *n,
                    _ => 0.0,
                };
                Ok(Reference::new_strong(gc.alloc(Data::Number(n * 2.0)), Flags::new(), gc))
            }),
        );
        let mut gc = Gc::new(false);
        let mut cursor = Cursor::new(0);
        let arg = Reference::new_strong(gc.alloc(Data::Number(21.0)), Flags::new(), &mut gc);
        let result = registry.invoke(0, 0, &mut cursor, &mut gc, vec![arg]).unwrap();
        match gc.get(result.handle()) {
            Data::Number(n) => assert_eq!(*n, 42.0),
            _ => panic!("expected number"),
        }
    }
}
