//! End-to-end interpreter scenarios, each hand-assembling a `Module`'s
//! bytecode directly (there is no compiler front-end in this crate) and
//! driving it through `Scheduler::run`/`dispatch::step`.

use mint_core::class::{ClassRegistry, Operator};
use mint_core::config::RuntimeConfig;
use mint_core::cursor::Cursor;
use mint_core::dispatch::Opcode;
use mint_core::gc::Gc;
use mint_core::host::BuiltinRegistry;
use mint_core::module::{Module, Node};
use mint_core::reference::{Flags, Reference};
use mint_core::scheduler::{Process, Runtime, Scheduler};
use mint_core::value::Data;

fn number_constant(gc: &mut Gc, module: &mut Module, n: f64) -> u32 {
    module.make_constant(gc.alloc(Data::Number(n)))
}

/// `a = 1 + 2; return a` by way of bytecode.
#[test]
fn arithmetic_through_symbol_store_and_exit_exec() {
    let mut gc = Gc::new(false);
    let mut module = Module::new();
    let one = number_constant(&mut gc, &mut module, 1.0);
    let two = number_constant(&mut gc, &mut module, 2.0);
    let a = module.make_symbol("a");

    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(one as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(two as i64));
    module.push_node(Node::Command(Opcode::Binary(Operator::Add)));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(a));
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(a));
    module.push_node(Node::Command(Opcode::ExitExec));
    module.push_node(Node::Integer(0));

    let runtime = Runtime::with_gc(
        vec![module],
        ClassRegistry::new(),
        BuiltinRegistry::new(),
        RuntimeConfig::default(),
        gc,
    );
    let scheduler = Scheduler::new(runtime);
    scheduler.push_configured_process(Process::new(Cursor::new(0)));
    let status = scheduler.run();
    assert_eq!(status, 0);
}

/// `def add(a, b) { return a + b } add(2, 2)` assembled as two
/// functions sharing one module: one entry point for `add`'s body,
/// one for the top-level call that invokes it.
#[test]
fn function_call_resolves_signature_and_returns() {
    use mint_core::function::{FunctionData, Signature};

    let mut gc = Gc::new(false);
    let mut module = Module::new();
    let two_a = number_constant(&mut gc, &mut module, 2.0);
    let two_b = number_constant(&mut gc, &mut module, 2.0);
    let a = module.make_symbol("a");
    let b = module.make_symbol("b");

    // `add`'s body: expects two args already pushed onto the stack by
    // `call_function`, binds them to symbols, adds, exits the call.
    let add_entry = module.next_node_offset();
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(b));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(a));
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(a));
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(b));
    module.push_node(Node::Command(Opcode::Binary(Operator::Add)));
    module.push_node(Node::Command(Opcode::ExitCall));

    let handle = module.make_handle(0, 0, add_entry as u32);
    let function = Data::Function(
        FunctionData::new().with_signature(2, Signature { handle, captures: None }),
    );
    let callee_const = module.make_constant(gc.alloc(function));

    // Top level: push args, init_call the function constant, call, exit_exec.
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(two_a as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(two_b as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(callee_const as i64));
    module.push_node(Node::Command(Opcode::InitCall));
    module.push_node(Node::Command(Opcode::Call));
    module.push_node(Node::Integer(2));
    module.push_node(Node::Command(Opcode::ExitExec));
    module.push_node(Node::Integer(0));

    let runtime = Runtime::with_gc(
        vec![module],
        ClassRegistry::new(),
        BuiltinRegistry::new(),
        RuntimeConfig::default(),
        gc,
    );
    let scheduler = Scheduler::new(runtime);
    scheduler.push_configured_process(Process::new(Cursor::new(0)));
    let status = scheduler.run();
    assert_eq!(status, 0);
}

/// `try { raise "boom" } catch e { return e }`-shaped bytecode: a
/// retrieve point is set before the `raise`, so `Step::Continue` keeps
/// the cursor alive and jumps straight to the handler rather than
/// escalating to the scheduler.
#[test]
fn raise_is_caught_by_a_retrieve_point() {
    let mut gc = Gc::new(false);
    let mut module = Module::new();
    let boom = module.make_constant(gc.alloc(Data::Number(666.0)));

    module.push_node(Node::Command(Opcode::SetRetrievePoint));
    let handler_at = module.next_node_offset() + 5;
    module.push_node(Node::Integer(handler_at as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(boom as i64));
    module.push_node(Node::Command(Opcode::Raise));
    // handler_at lands here:
    module.push_node(Node::Command(Opcode::ExitExec));
    module.push_node(Node::Integer(0));

    let mut classes = ClassRegistry::new();
    let builtins = BuiltinRegistry::new();
    let modules = [module];
    let mut cursor = Cursor::new(0);
    let mut step_count = 0;
    loop {
        let outcome = mint_core::dispatch::step(&mut cursor, &modules, &mut gc, &classes, &builtins);
        step_count += 1;
        match outcome {
            mint_core::dispatch::Step::Continue => {
                assert!(step_count < 20, "runaway loop");
                continue;
            }
            mint_core::dispatch::Step::ExitExec(status) => {
                assert_eq!(status, 0);
                break;
            }
            other => panic!("unexpected step outcome: {other:?}"),
        }
    }
    let _ = &mut classes;
}

/// A `raise` with no retrieve point anywhere escalates to
/// `Step::UnhandledException` carrying the actual exception value,
/// rather than being discarded into a generic diagnostic.
#[test]
fn raise_with_no_retrieve_point_surfaces_the_exception_value() {
    let mut gc = Gc::new(false);
    let mut module = Module::new();
    let boom = module.make_constant(gc.alloc(Data::Number(42.0)));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(boom as i64));
    module.push_node(Node::Command(Opcode::Raise));

    let classes = ClassRegistry::new();
    let builtins = BuiltinRegistry::new();
    let mut cursor = Cursor::new(0);
    match mint_core::dispatch::step(&mut cursor, std::slice::from_ref(&module), &mut gc, &classes, &builtins) {
        mint_core::dispatch::Step::UnhandledException(exception) => {
            match gc.get(exception.handle()) {
                Data::Number(n) => assert_eq!(*n, 42.0),
                other => panic!("expected the raised number, got {other:?}"),
            }
            exception.release(&mut gc);
        }
        other => panic!("expected UnhandledException, got {other:?}"),
    }
}

/// `def f(a, ...) { return rest }` called with three arguments: the first
/// binds to `a`, the remaining two land packed into a trailing iterator
/// rather than being pushed onto the callee's stack verbatim.
#[test]
fn variadic_call_packs_excess_args_into_trailing_iterator() {
    use mint_core::function::{FunctionData, Handle, Signature};

    let mut gc = Gc::new(false);
    let mut module = Module::new();
    let one = number_constant(&mut gc, &mut module, 1.0);
    let two = number_constant(&mut gc, &mut module, 2.0);
    let three = number_constant(&mut gc, &mut module, 3.0);
    let a = module.make_symbol("a");
    let rest = module.make_symbol("rest");

    // Body: args arrive on the stack as [a_value, rest_iterator]; pop the
    // iterator first (it was pushed last), then the required parameter.
    let f_entry = module.next_node_offset();
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(rest));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(a));
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(rest));
    module.push_node(Node::Command(Opcode::ExitCall));

    let handle = Handle { module_id: 0, entry_offset: f_entry as u32, package: 0, fast_symbol_count: 0, is_generator: false };
    // `-2` = one required parameter, the rest variadic.
    let function = Data::Function(FunctionData::new().with_signature(-2, Signature { handle, captures: None }));
    let callee_const = module.make_constant(gc.alloc(function));

    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(one as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(two as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(three as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(callee_const as i64));
    module.push_node(Node::Command(Opcode::InitCall));
    module.push_node(Node::Command(Opcode::Call));
    module.push_node(Node::Integer(3));
    let result_sym = module.make_symbol("result");
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(result_sym));
    module.push_node(Node::Command(Opcode::ModuleEnd));

    let classes = ClassRegistry::new();
    let builtins = BuiltinRegistry::new();
    let modules = [module];
    let mut cursor = Cursor::new(0);
    loop {
        match mint_core::dispatch::step(&mut cursor, &modules, &mut gc, &classes, &builtins) {
            mint_core::dispatch::Step::Continue => continue,
            mint_core::dispatch::Step::ModuleEnd => break,
            other => panic!("unexpected step outcome: {other:?}"),
        }
    }

    let rest_ref = *cursor.symbols.get(&result_sym).unwrap();
    let buffer = match gc.get(rest_ref.handle()) {
        Data::Object(o) => o.as_iterator().unwrap().buffer.clone(),
        other => panic!("expected the packed iterator, got {other:?}"),
    };
    assert_eq!(buffer.len(), 2);
    match gc.get(buffer[0].handle()) {
        Data::Number(n) => assert_eq!(*n, 2.0),
        other => panic!("expected a number, got {other:?}"),
    }
    match gc.get(buffer[1].handle()) {
        Data::Number(n) => assert_eq!(*n, 3.0),
        other => panic!("expected a number, got {other:?}"),
    }
}

/// `def g { for i in 0..4 { yield i } }` called and drained through a
/// `for`-style loop at the top level, summing each yielded value: proves
/// a generator actually suspends at `yield` and resumes on the next
/// `RangeNext` rather than running its body straight through at call time.
#[test]
fn generator_suspends_and_resumes_across_yields() {
    use mint_core::function::{FunctionData, Handle, Signature};

    let mut gc = Gc::new(false);
    let mut module = Module::new();
    let zero = number_constant(&mut gc, &mut module, 0.0);
    let four = number_constant(&mut gc, &mut module, 4.0);
    let i_sym = module.make_symbol("i");

    // Generator body: `for i in 0..4 { yield i }`, then exhausts with no
    // trailing value.
    let g_entry = module.next_node_offset();
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(zero as i64));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(four as i64));
    module.push_node(Node::Command(Opcode::RangeInit));
    module.push_node(Node::Integer(0)); // exclusive

    let g_loop_start = module.next_node_offset();
    module.push_node(Node::Command(Opcode::RangeCheck));
    let g_check_operand = module.next_node_offset();
    module.push_node(Node::Integer(0)); // patched below
    module.push_node(Node::Command(Opcode::RangeNext));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(i_sym));
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(i_sym));
    module.push_node(Node::Command(Opcode::Yield));
    module.push_node(Node::Command(Opcode::Jump));
    module.push_node(Node::Integer(g_loop_start as i64));

    let g_loop_end = module.next_node_offset();
    module.push_node(Node::Command(Opcode::ExitGenerator));
    module.patch_integer(g_check_operand, g_loop_end as i64);

    let handle = Handle { module_id: 0, entry_offset: g_entry as u32, package: 0, fast_symbol_count: 0, is_generator: true };
    let function = Data::Function(FunctionData::new().with_signature(0, Signature { handle, captures: None }));
    let callee_const = module.make_constant(gc.alloc(function));

    // Top level: call g(), then drain the returned iterator into `sum`.
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(callee_const as i64));
    module.push_node(Node::Command(Opcode::InitCall));
    module.push_node(Node::Command(Opcode::Call));
    module.push_node(Node::Integer(0));

    let sum_sym = module.make_symbol("sum");
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(zero as i64));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(sum_sym));

    let top_loop_start = module.next_node_offset();
    module.push_node(Node::Command(Opcode::RangeCheck));
    let top_check_operand = module.next_node_offset();
    module.push_node(Node::Integer(0)); // patched below
    module.push_node(Node::Command(Opcode::RangeNext));
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(sum_sym));
    module.push_node(Node::Command(Opcode::Binary(Operator::Add)));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(sum_sym));
    module.push_node(Node::Command(Opcode::Jump));
    module.push_node(Node::Integer(top_loop_start as i64));

    let top_loop_end = module.next_node_offset();
    module.push_node(Node::Command(Opcode::ModuleEnd));
    module.patch_integer(top_check_operand, top_loop_end as i64);

    let classes = ClassRegistry::new();
    let builtins = BuiltinRegistry::new();
    let modules = [module];
    let mut cursor = Cursor::new(0);
    let mut step_count = 0;
    loop {
        match mint_core::dispatch::step(&mut cursor, &modules, &mut gc, &classes, &builtins) {
            mint_core::dispatch::Step::Continue => {
                step_count += 1;
                assert!(step_count < 10_000, "runaway loop");
                continue;
            }
            mint_core::dispatch::Step::ModuleEnd => break,
            other => panic!("unexpected step outcome: {other:?}"),
        }
    }

    match gc.get(cursor.symbols.get(&sum_sym).unwrap().handle()) {
        Data::Number(n) => assert_eq!(*n, 6.0),
        other => panic!("expected a number, got {other:?}"),
    }
}

/// Two OS threads, each incrementing a shared counter object 1000 times
/// under the scheduler's GIL, land on 2000: the `Gc` mutex held for
/// each quantum is what actually serializes the two cursors' access to
/// the same `GcHandle`.
#[test]
fn two_threads_incrementing_shared_counter_under_gil() {
    const ITERATIONS: i64 = 1000;

    let mut gc = Gc::new(false);
    let counter_handle = gc.alloc(Data::Number(0.0));
    let one_const_handle = gc.alloc(Data::Number(1.0));

    let mut module = Module::new();
    let one_const = module.make_constant(one_const_handle);
    let counter_sym = module.make_symbol("counter");

    // Loop body: counter = counter + 1, repeated ITERATIONS times via a
    // countdown in a second symbol, `remaining`.
    let remaining_sym = module.make_symbol("remaining");
    let iterations_const = number_constant(&mut gc, &mut module, ITERATIONS as f64);

    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(iterations_const as i64));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(remaining_sym));

    let loop_start = module.next_node_offset();
    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(remaining_sym));
    module.push_node(Node::Command(Opcode::JumpZero));
    let jump_zero_operand_offset = module.next_node_offset();
    module.push_node(Node::Integer(0)); // patched below

    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(counter_sym));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(one_const as i64));
    module.push_node(Node::Command(Opcode::Binary(Operator::Add)));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(counter_sym));

    module.push_node(Node::Command(Opcode::LoadSymbol));
    module.push_node(Node::Sym(remaining_sym));
    module.push_node(Node::Command(Opcode::LoadConstant));
    module.push_node(Node::Integer(one_const as i64));
    module.push_node(Node::Command(Opcode::Binary(Operator::Sub)));
    module.push_node(Node::Command(Opcode::StoreSymbol));
    module.push_node(Node::Sym(remaining_sym));

    module.push_node(Node::Command(Opcode::Jump));
    module.push_node(Node::Integer(loop_start as i64));

    let loop_end = module.next_node_offset();
    module.push_node(Node::Command(Opcode::ExitThread));
    module.patch_integer(jump_zero_operand_offset, loop_end as i64);

    // Refcount-only: thread-pop collection only roots the popping
    // thread's own value stack (see DESIGN.md's open item on
    // cross-cursor GC roots), so a mark-sweep pass while the other
    // thread still holds the only live reference to `counter` through
    // its own symbol table would incorrectly reclaim it.
    let config = RuntimeConfig::default().with_gc_mode(mint_core::config::GcMode::RefcountOnly);
    let runtime = Runtime::with_gc(vec![module], ClassRegistry::new(), BuiltinRegistry::new(), config, gc);
    let scheduler = Scheduler::new(runtime);

    let mut make_cursor = |gc: &mut Gc| {
        let mut cursor = Cursor::new(0);
        let counter_ref = Reference::new_strong(counter_handle, Flags::new(), gc);
        cursor.symbols.insert(counter_sym, counter_ref);
        cursor
    };

    let cursor_a = {
        let mut gc = scheduler.runtime.gc.lock();
        make_cursor(&mut gc)
    };
    let cursor_b = {
        let mut gc = scheduler.runtime.gc.lock();
        make_cursor(&mut gc)
    };

    scheduler.start();
    let id_a = scheduler.create_thread(cursor_a);
    let id_b = scheduler.create_thread(cursor_b);
    scheduler.join_thread(id_a);
    scheduler.join_thread(id_b);

    let gc = scheduler.runtime.gc.lock();
    match gc.get(counter_handle) {
        Data::Number(n) => assert_eq!(*n as i64, ITERATIONS * 2),
        other => panic!("expected a number, got {other:?}"),
    }
}
