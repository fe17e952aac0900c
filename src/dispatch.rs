//! Interpreter dispatch loop: the flat opcode enum and the
//! `step` function that executes exactly one instruction (consuming
//! whatever inline parameter nodes that instruction needs) against a
//! `Cursor`. Grounded on `vm_core.rs`'s frame/`Val` dispatch shape,
//! re-expressed around `Reference`/`Data` instead of a register file,
//! since the source machine is stack-based rather than
//! register-based.

use crate::class::{ClassId, ClassRegistry, Metatype, Operator};
use crate::cursor::{Cursor, Frame, WaitingCall};
use crate::error::{CoreDiagnostic, CoreError, CoreResult};
use crate::function::FunctionData;
use crate::gc::{Gc, GcHandle};
use crate::generator::{GeneratorState, SavedState};
use crate::host::BuiltinRegistry;
use crate::module::{Module, Node};
use crate::object::{ObjectData, ObjectPayload};
use crate::operators::{self, Outcome};
use crate::reference::{Flags, Reference};
use crate::symbol::{Symbol, SymbolMapping};
use crate::value::Data;

/// The flat opcode space. Binary/unary primitive operators
/// carry their `Operator` inline rather than getting one variant each —
/// the semantics already live in `operators.rs`'s table, so duplicating
/// thirty-odd near-identical opcode arms here would just be noise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    LoadSymbol,
    StoreSymbol,
    LoadMember,
    StoreMember,
    LoadConstant,
    LoadOperator,
    Binary(Operator),
    Unary(Operator),
    Jump,
    JumpZero,
    CaseJump,
    AndPreCheck,
    OrPreCheck,
    RangeInit,
    RangeNext,
    RangeCheck,
    RangeIteratorCheck,
    FindInit,
    FindNext,
    FindCheck,
    InOp,
    Subscript,
    SubscriptMove,
    InitCall,
    InitMemberCall,
    InitOperatorCall,
    Call,
    CallMember,
    CallBuiltin,
    ExitCall,
    InitCapture,
    CaptureSymbol,
    CaptureAs,
    CaptureAll,
    BeginGeneratorExpression,
    EndGeneratorExpression,
    Yield,
    YieldExpression,
    ExitGenerator,
    YieldExitGenerator,
    SetRetrievePoint,
    UnsetRetrievePoint,
    Raise,
    InitException,
    ResetException,
    OpenPackage,
    ClosePackage,
    RegisterClass,
    OpenPrinter,
    ClosePrinter,
    Print,
    ModuleEnd,
    ExitThread,
    ExitExec,
}

/// What happened after executing one instruction.
#[derive(Debug)]
pub enum Step {
    Continue,
    ModuleEnd,
    ExitThread,
    ExitExec(i32),
    /// A `yield` surfaced a value to the driver running this cursor
    ///: the driver must capture a [`crate::generator::SavedState`]
    /// from this cursor before doing anything else with it, since the
    /// next `step` call would otherwise keep running past the suspension
    /// point.
    Yielded(Reference),
    /// The generator's last `yield`, reached by a rewritten `exit_call` at
    /// the end of its body: the driver must append this value and mark the
    /// generator exhausted rather than capture a `SavedState` to resume
    /// from, since there is nothing left to resume.
    YieldedLast(Reference),
    /// A fatal error: an invariant the interpreter itself cannot recover
    /// from (malformed bytecode, arity mismatch with no overload, ...).
    Unhandled(CoreDiagnostic),
    /// A script-raised exception that found no retrieve point in this
    /// cursor: the caller must re-raise to a parent cursor
    /// if one exists, or escalate to the scheduler's exception task so
    /// the actual exception value gets rendered rather than discarded.
    UnhandledException(Reference),
}

fn next_node(module: &Module, cursor: &mut Cursor) -> Option<Node> {
    let node = module.at(cursor.ip)?;
    cursor.ip += 1;
    Some(node)
}

fn next_integer(module: &Module, cursor: &mut Cursor) -> i64 {
    match next_node(module, cursor) {
        Some(Node::Integer(n)) => n,
        _ => 0,
    }
}

fn next_symbol(module: &Module, cursor: &mut Cursor) -> Option<Symbol> {
    match next_node(module, cursor) {
        Some(Node::Sym(s)) => Some(s),
        _ => None,
    }
}

fn fatal<T>(diag: CoreDiagnostic) -> CoreResult<T> {
    Err(diag.into())
}

/// Allocate a fresh strong Reference wrapping `data` (used for every
/// instruction that materializes a new value, e.g. an operator result).
fn push_new(gc: &mut Gc, cursor: &mut Cursor, data: Data) {
    let handle = gc.alloc(data);
    cursor.push(Reference::new_strong(handle, Flags::new(), gc));
}

/// Read a subscript index operand, which is always a Number in this core
/// (no dedicated integer format).
fn as_index(gc: &Gc, r: &Reference) -> CoreResult<i64> {
    match gc.get(r.handle()) {
        Data::Number(n) => Ok(*n as i64),
        other => fatal(CoreDiagnostic::type_mismatch("[]", &other.format().to_string())),
    }
}

/// Resolve a class operator overload's callable.
pub(crate) fn resolve_overload(classes: &ClassRegistry, class: ClassId, op: Operator) -> CoreResult<Reference> {
    let member = classes
        .get(class)
        .find_operator(op)
        .ok_or_else(|| CoreDiagnostic::type_mismatch("overload", &classes.get(class).name))?;
    Ok(member.default.ok_or_else(|| CoreDiagnostic::not_found("operator implementation"))?)
}

/// Execute a call to `callee` with `args` already in call order: resolves
/// the best-matching signature (P6). A negative signature's excess
/// arguments — those beyond its required count — are packed into a
/// trailing iterator rather than pushed verbatim. A generator signature
/// never actually runs here: calling it just hands back an Iterator
/// wrapping a not-yet-started generator, which `advance_generator` drives
/// the first time something asks it for a value. Otherwise pushes a frame
/// that saves (module, ip, symbol table, printer depth), and jumps.
pub(crate) fn call_function(cursor: &mut Cursor, callee: &Reference, args: Vec<Reference>, gc: &mut Gc) -> CoreResult<()> {
    let fd = match gc.get(callee.handle()) {
        Data::Function(fd) => fd,
        other => return fatal(CoreDiagnostic::type_mismatch("()", &other.format().to_string())),
    };
    let (arity, sig) = fd.resolve(args.len()).ok_or_else(|| CoreDiagnostic::arity_mismatch(args.len()))?;
    let handle = sig.handle;

    let mut args = args;
    if FunctionData::is_variadic_signature(arity) {
        let required = FunctionData::required_count(arity).min(args.len());
        let extra = args.split_off(required);
        let iterator = crate::containers::iterator::IteratorData::from_items(extra);
        let iter_handle = gc.alloc(Data::Object(ObjectData::new_container(
            ClassId::BUILTIN_ITERATOR,
            ObjectPayload::Iterator(iterator),
        )));
        args.push(Reference::new_strong(iter_handle, Flags::new(), gc));
    }

    if handle.is_generator {
        let state = GeneratorState::NotStarted { module_id: handle.module_id, entry_offset: handle.entry_offset as usize, args };
        let iterator = crate::containers::iterator::IteratorData::from_generator(state);
        let iter_handle = gc.alloc(Data::Object(ObjectData::new_container(ClassId::BUILTIN_ITERATOR, ObjectPayload::Iterator(iterator))));
        cursor.push(Reference::new_strong(iter_handle, Flags::new(), gc));
        return Ok(());
    }

    let frame = Frame {
        return_module: cursor.module_id,
        return_ip: cursor.ip,
        symbols: std::mem::replace(&mut cursor.symbols, SymbolMapping::new()),
        printer_depth: cursor.printers.len(),
    };
    cursor.push_frame(frame);
    cursor.module_id = handle.module_id;
    cursor.ip = handle.entry_offset as usize;
    for arg in args {
        cursor.push(arg);
    }
    Ok(())
}

/// Drive a generator-backed iterator forward by exactly one suspension: on
/// first call runs the body from its entry point, otherwise resumes the
/// `SavedState` left by the last `yield`. Runs on its own scratch `Cursor`
/// with no call frame shared with whatever cursor is consuming the
/// iterator — a generator body that performs nested calls must have
/// returned from them before yielding, so the scratch cursor's own value
/// stack and retrieve points are always the generator's full contribution,
/// never a caller's on top of it.
pub(crate) fn advance_generator(
    modules: &[Module],
    gc: &mut Gc,
    classes: &ClassRegistry,
    builtins: &BuiltinRegistry,
    iter_handle: GcHandle,
) -> CoreResult<()> {
    let state = match gc.get_mut(iter_handle) {
        Data::Object(o) => match &mut o.payload {
            ObjectPayload::Iterator(it) => it.generator.take(),
            _ => None,
        },
        _ => None,
    };
    let Some(state) = state else { return Ok(()) };

    let mut scratch = Cursor::new(0);
    match state {
        GeneratorState::Exhausted => {
            set_generator_state(gc, iter_handle, GeneratorState::Exhausted);
            return Ok(());
        }
        GeneratorState::NotStarted { module_id, entry_offset, args } => {
            scratch.module_id = module_id;
            scratch.ip = entry_offset;
            for arg in args {
                scratch.push(arg);
            }
        }
        GeneratorState::Suspended(saved) => saved.restore(&mut scratch),
    }

    loop {
        match step(&mut scratch, modules, gc, classes, builtins) {
            Step::Continue => continue,
            Step::Yielded(value) => {
                let saved = SavedState::capture(&scratch, 0, 0);
                append_generator_value(gc, iter_handle, value, Some(GeneratorState::Suspended(saved)));
                return Ok(());
            }
            Step::YieldedLast(value) => {
                append_generator_value(gc, iter_handle, value, Some(GeneratorState::Exhausted));
                return Ok(());
            }
            Step::ModuleEnd | Step::ExitThread | Step::ExitExec(_) => {
                set_generator_state(gc, iter_handle, GeneratorState::Exhausted);
                return Ok(());
            }
            Step::Unhandled(diag) => return Err(diag.into()),
            Step::UnhandledException(exception) => return Err(CoreError::Raised(exception)),
        }
    }
}

fn set_generator_state(gc: &mut Gc, iter_handle: GcHandle, state: GeneratorState) {
    if let Data::Object(o) = gc.get_mut(iter_handle) {
        if let ObjectPayload::Iterator(it) = &mut o.payload {
            it.generator = Some(state);
        }
    }
}

fn append_generator_value(gc: &mut Gc, iter_handle: GcHandle, value: Reference, next_state: Option<GeneratorState>) {
    if let Data::Object(o) = gc.get_mut(iter_handle) {
        if let ObjectPayload::Iterator(it) = &mut o.payload {
            it.buffer.push(value);
            it.generator = next_state;
        }
    }
}

/// If `iter_handle` is a generator-backed iterator that has no buffered
/// value left to hand out but hasn't exhausted its body either, drive it
/// forward once before the caller inspects `has_next`/`next` — called at
/// every point the bytecode asks an iterator whether it has more to give.
fn ensure_generator_primed(
    modules: &[Module],
    gc: &mut Gc,
    classes: &ClassRegistry,
    builtins: &BuiltinRegistry,
    iter_handle: GcHandle,
) -> CoreResult<()> {
    let needs_advance = matches!(
        gc.get(iter_handle),
        Data::Object(o) if matches!(&o.payload, ObjectPayload::Iterator(it) if it.generator.is_some() && !it.has_next())
    );
    if needs_advance {
        advance_generator(modules, gc, classes, builtins, iter_handle)?;
    }
    Ok(())
}

/// One interpreter step. `modules` is the whole program image rather than
/// just the cursor's current module, since a step that calls into another
/// module (or drives a generator's scratch cursor through `step` itself)
/// needs to re-resolve which module backs `cursor.module_id` afresh.
pub fn step(
    cursor: &mut Cursor,
    modules: &[Module],
    gc: &mut Gc,
    classes: &ClassRegistry,
    builtins: &BuiltinRegistry,
) -> Step {
    let module = &modules[cursor.module_id as usize];
    let node = match next_node(module, cursor) {
        Some(n) => n,
        None => return Step::ModuleEnd,
    };
    let opcode = match node {
        Node::Command(op) => op,
        _ => return Step::Unhandled(CoreDiagnostic::not_found("opcode expected")),
    };

    let result = run_opcode(opcode, cursor, modules, gc, classes, builtins);
    match result {
        Ok(flow) => flow,
        Err(crate::error::CoreError::Fatal(diag)) => Step::Unhandled(diag),
        Err(crate::error::CoreError::Raised(exception)) => {
            // `raise` truncates the cursor's stacks to the nearest
            // retrieve point itself, so on success it has already
            // reused `exception`'s strong hold as the pushed value;
            // only the `None` arm still owns it here.
            let exception_for_escalation = exception.clone();
            match cursor.raise(exception) {
                Some(_) => Step::Continue,
                None => Step::UnhandledException(exception_for_escalation),
            }
        }
    }
}

fn run_opcode(
    opcode: Opcode,
    cursor: &mut Cursor,
    modules: &[Module],
    gc: &mut Gc,
    classes: &ClassRegistry,
    builtins: &BuiltinRegistry,
) -> CoreResult<Step> {
    let module = &modules[cursor.module_id as usize];
    match opcode {
        Opcode::LoadConstant => {
            let index = next_integer(module, cursor) as u32;
            let handle = module.constant(index);
            cursor.push(Reference::new_strong(handle, Flags::new(), gc));
            Ok(Step::Continue)
        }
        Opcode::LoadSymbol => {
            let sym = next_symbol(module, cursor).ok_or_else(|| CoreDiagnostic::not_found("symbol operand"))?;
            let reference = *cursor.symbols.get(&sym).ok_or_else(|| CoreDiagnostic::not_found("symbol"))?;
            cursor.push(reference.clone_strong(gc));
            Ok(Step::Continue)
        }
        Opcode::StoreSymbol => {
            let sym = next_symbol(module, cursor).ok_or_else(|| CoreDiagnostic::not_found("symbol operand"))?;
            let value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("value to store"))?;
            if let Some(old) = cursor.symbols.insert(sym, value) {
                old.release(gc);
            }
            Ok(Step::Continue)
        }
        Opcode::LoadMember => {
            let sym = next_symbol(module, cursor).ok_or_else(|| CoreDiagnostic::not_found("member name"))?;
            let receiver = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("receiver"))?;
            let name = sym.as_str();
            let obj = match gc.get(receiver.handle()) {
                Data::Object(o) => o,
                other => return fatal(CoreDiagnostic::type_mismatch(".", &other.format().to_string())),
            };
            let member = classes
                .get(obj.class)
                .find_member(&name)
                .ok_or_else(|| CoreDiagnostic::not_found(&name))?;
            let value = if member.global {
                member.default.ok_or_else(|| CoreDiagnostic::not_found(&name))?
            } else {
                let offset = member.offset.ok_or_else(|| CoreDiagnostic::not_found(&name))?;
                *obj.slots()
                    .and_then(|s| s.get(offset))
                    .ok_or_else(|| CoreDiagnostic::not_found(&name))?
            };
            cursor.push(value.clone_strong(gc));
            receiver.release(gc);
            Ok(Step::Continue)
        }
        Opcode::StoreMember => {
            let sym = next_symbol(module, cursor).ok_or_else(|| CoreDiagnostic::not_found("member name"))?;
            let value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("value"))?;
            let receiver = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("receiver"))?;
            let name = sym.as_str();
            let class = match gc.get(receiver.handle()) {
                Data::Object(o) => o.class,
                other => return fatal(CoreDiagnostic::type_mismatch(".", &other.format().to_string())),
            };
            let offset = classes
                .get(class)
                .find_member(&name)
                .and_then(|m| m.offset)
                .ok_or_else(|| CoreDiagnostic::not_found(&name))?;
            let old = match gc.get_mut(receiver.handle()) {
                Data::Object(o) => {
                    let slot = o
                        .slots_mut()
                        .and_then(|s| s.get_mut(offset))
                        .ok_or_else(|| CoreDiagnostic::not_found(&name))?;
                    std::mem::replace(slot, value)
                }
                _ => unreachable!("class lookup already confirmed Object"),
            };
            old.release(gc);
            receiver.release(gc);
            Ok(Step::Continue)
        }
        Opcode::LoadOperator => {
            // Loads the caller's "self" bound operator target; in this
            // core the same effect is reached through InitOperatorCall,
            // so this opcode is a cheap alias that just duplicates the
            // stack top for the benefit of bytecode emitted against the
            // richer original opcode set.
            let top = cursor.top().copied().ok_or_else(|| CoreDiagnostic::not_found("operand"))?;
            cursor.push(top.clone_strong(gc));
            Ok(Step::Continue)
        }
        Opcode::Binary(op) => {
            let rhs = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("rhs operand"))?;
            let lhs = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("lhs operand"))?;
            let lhs_data = gc.get(lhs.handle()).clone();
            let rhs_data = gc.get(rhs.handle()).clone();

            if op == Operator::Add {
                if let (Data::Function(a), Data::Function(b)) = (&lhs_data, &rhs_data) {
                    push_new(gc, cursor, Data::Function(a.merge(b)));
                    lhs.release(gc);
                    rhs.release(gc);
                    return Ok(Step::Continue);
                }
            }

            match operators::apply_binary(op, &lhs_data, &rhs_data) {
                Outcome::Number(n) => push_new(gc, cursor, Data::Number(n)),
                Outcome::Boolean(b) => push_new(gc, cursor, Data::Boolean(b)),
                Outcome::Str(s) => push_new(gc, cursor, Data::Object(ObjectData::new_container(
                    ClassId::BUILTIN_STRING,
                    ObjectPayload::String(crate::containers::string::StringData::new(s)),
                ))),
                Outcome::None => {}
                Outcome::Overload(overload) => {
                    let class = lhs_data.class_id().ok_or_else(|| CoreDiagnostic::type_mismatch("overload", ""))?;
                    let callee = resolve_overload(classes, class, overload)?;
                    call_function(cursor, &callee, vec![lhs, rhs], gc)?;
                    return Ok(Step::Continue);
                }
                Outcome::Error(diag) => return fatal(diag),
            }
            lhs.release(gc);
            rhs.release(gc);
            Ok(Step::Continue)
        }
        Opcode::Unary(op) => {
            let operand = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("operand"))?;
            let data = gc.get(operand.handle()).clone();
            match operators::apply_unary(op, &data) {
                Outcome::Number(n) => push_new(gc, cursor, Data::Number(n)),
                Outcome::Boolean(b) => push_new(gc, cursor, Data::Boolean(b)),
                Outcome::Str(s) => push_new(gc, cursor, Data::Object(ObjectData::new_container(
                    ClassId::BUILTIN_STRING,
                    ObjectPayload::String(crate::containers::string::StringData::new(s)),
                ))),
                Outcome::None => {}
                Outcome::Overload(overload) => {
                    let class = data.class_id().ok_or_else(|| CoreDiagnostic::type_mismatch("overload", ""))?;
                    let callee = resolve_overload(classes, class, overload)?;
                    call_function(cursor, &callee, vec![operand], gc)?;
                    return Ok(Step::Continue);
                }
                Outcome::Error(diag) => return fatal(diag),
            }
            operand.release(gc);
            Ok(Step::Continue)
        }
        Opcode::Jump => {
            let target = next_integer(module, cursor) as usize;
            cursor.ip = target;
            Ok(Step::Continue)
        }
        Opcode::JumpZero => {
            let target = next_integer(module, cursor) as usize;
            let cond = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("condition"))?;
            let truthy = matches!(operators::apply_unary(Operator::ToBoolean, gc.get(cond.handle())), Outcome::Boolean(true));
            cond.release(gc);
            if !truthy {
                cursor.ip = target;
            }
            Ok(Step::Continue)
        }
        Opcode::CaseJump => {
            // `switch`/`case` dispatch: pops the discriminant and a case
            // value, jumps to the target if they compare equal, else
            // falls through to try the next case block.
            let target = next_integer(module, cursor) as usize;
            let case_value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("case value"))?;
            let discriminant = cursor.top().copied().ok_or_else(|| CoreDiagnostic::not_found("discriminant"))?;
            let equal = matches!(
                operators::apply_binary(Operator::Eq, gc.get(discriminant.handle()), gc.get(case_value.handle())),
                Outcome::Boolean(true)
            );
            case_value.release(gc);
            if equal {
                cursor.pop();
                discriminant.release(gc);
                cursor.ip = target;
            }
            Ok(Step::Continue)
        }
        Opcode::AndPreCheck => {
            let target = next_integer(module, cursor) as usize;
            let top = cursor.top().copied().ok_or_else(|| CoreDiagnostic::not_found("operand"))?;
            if !matches!(operators::apply_unary(Operator::ToBoolean, gc.get(top.handle())), Outcome::Boolean(true)) {
                cursor.ip = target;
            }
            Ok(Step::Continue)
        }
        Opcode::OrPreCheck => {
            let target = next_integer(module, cursor) as usize;
            let top = cursor.top().copied().ok_or_else(|| CoreDiagnostic::not_found("operand"))?;
            if matches!(operators::apply_unary(Operator::ToBoolean, gc.get(top.handle())), Outcome::Boolean(true)) {
                cursor.ip = target;
            }
            Ok(Step::Continue)
        }
        Opcode::RangeInit => {
            let inclusive = next_integer(module, cursor) != 0;
            let end = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("range end"))?;
            let start = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("range start"))?;
            let (s, e) = match (gc.get(start.handle()), gc.get(end.handle())) {
                (Data::Number(s), Data::Number(e)) => (*s as i64, *e as i64),
                _ => return fatal(CoreDiagnostic::type_mismatch("..", "non-number range bound")),
            };
            start.release(gc);
            end.release(gc);
            let iterator = crate::containers::iterator::IteratorData::from_range(gc, s, e, inclusive);
            push_new(gc, cursor, Data::Object(ObjectData::new_container(ClassId::BUILTIN_ITERATOR, ObjectPayload::Iterator(iterator))));
            Ok(Step::Continue)
        }
        Opcode::RangeNext | Opcode::FindNext => {
            let iter_ref = cursor.top().copied().ok_or_else(|| CoreDiagnostic::not_found("iterator"))?;
            ensure_generator_primed(modules, gc, classes, builtins, iter_ref.handle())?;
            let item = match gc.get_mut(iter_ref.handle()) {
                Data::Object(o) => match &mut o.payload {
                    ObjectPayload::Iterator(it) => it.next(),
                    _ => None,
                },
                _ => None,
            };
            match item {
                Some(value) => cursor.push(value.clone_strong(gc)),
                None => push_new(gc, cursor, Data::None),
            }
            Ok(Step::Continue)
        }
        Opcode::RangeCheck | Opcode::RangeIteratorCheck | Opcode::FindCheck => {
            let target = next_integer(module, cursor) as usize;
            let iter_ref = cursor.top().copied().ok_or_else(|| CoreDiagnostic::not_found("iterator"))?;
            ensure_generator_primed(modules, gc, classes, builtins, iter_ref.handle())?;
            let has_next = matches!(gc.get(iter_ref.handle()), Data::Object(o) if o.as_iterator().map(|i| i.has_next()).unwrap_or(false));
            if !has_next {
                cursor.pop();
                iter_ref.release(gc);
                cursor.ip = target;
            }
            Ok(Step::Continue)
        }
        Opcode::FindInit => {
            // `in` enumeration fallback: builds an iterator
            // over an array's items or a hash's keys.
            let container = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("container"))?;
            let items = match gc.get(container.handle()) {
                Data::Object(o) => match &o.payload {
                    ObjectPayload::Array(a) => a.items.clone(),
                    ObjectPayload::Hash(h) => h.keys().copied().collect(),
                    ObjectPayload::Iterator(it) => it.buffer.clone(),
                    _ => Vec::new(),
                },
                _ => Vec::new(),
            };
            container.release(gc);
            let iterator = crate::containers::iterator::IteratorData::from_items(items);
            push_new(gc, cursor, Data::Object(ObjectData::new_container(ClassId::BUILTIN_ITERATOR, ObjectPayload::Iterator(iterator))));
            Ok(Step::Continue)
        }
        Opcode::InOp => {
            let rhs = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("in rhs"))?;
            let lhs = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("in lhs"))?;
            let found = match gc.get(rhs.handle()) {
                Data::Object(o) => match &o.payload {
                    ObjectPayload::Array(a) => a.items.iter().any(|i| {
                        matches!(operators::apply_binary(Operator::Eq, gc.get(i.handle()), gc.get(lhs.handle())), Outcome::Boolean(true))
                    }),
                    ObjectPayload::Hash(h) => h.get(gc, &lhs).is_some(),
                    _ => false,
                },
                _ => false,
            };
            lhs.release(gc);
            rhs.release(gc);
            push_new(gc, cursor, Data::Boolean(found));
            Ok(Step::Continue)
        }
        Opcode::Subscript => {
            let index = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("subscript index"))?;
            let receiver = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("subscript receiver"))?;
            let receiver_data = gc.get(receiver.handle()).clone();
            match &receiver_data {
                Data::Object(o) if o.as_array().is_some() => {
                    let idx = as_index(gc, &index)?;
                    let item = o.as_array().unwrap().get(idx);
                    index.release(gc);
                    let value = item.ok_or_else(|| CoreDiagnostic::not_found("array index"))?;
                    cursor.push(value.clone_strong(gc));
                }
                Data::Object(o) if o.as_hash().is_some() => {
                    let found = o.as_hash().unwrap().get(gc, &index);
                    index.release(gc);
                    match found {
                        Some(value) => cursor.push(value.clone_strong(gc)),
                        None => push_new(gc, cursor, Data::None),
                    }
                }
                Data::Object(o) if o.as_string().is_some() => {
                    let idx = as_index(gc, &index)?;
                    let ch = o.as_string().unwrap().codepoint_at(idx);
                    index.release(gc);
                    let ch = ch.ok_or_else(|| CoreDiagnostic::not_found("string index"))?;
                    push_new(
                        gc,
                        cursor,
                        Data::Object(ObjectData::new_container(
                            ClassId::BUILTIN_STRING,
                            ObjectPayload::String(crate::containers::string::StringData::new(ch.to_string())),
                        )),
                    );
                }
                Data::Object(o) => {
                    let class = o.class;
                    let callee = resolve_overload(classes, class, Operator::Subscript)?;
                    call_function(cursor, &callee, vec![receiver, index], gc)?;
                    return Ok(Step::Continue);
                }
                other => return fatal(CoreDiagnostic::type_mismatch("[]", &other.format().to_string())),
            }
            receiver.release(gc);
            Ok(Step::Continue)
        }
        Opcode::SubscriptMove => {
            let value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("subscript value"))?;
            let index = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("subscript index"))?;
            let receiver = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("subscript receiver"))?;
            let metatype = match gc.get(receiver.handle()) {
                Data::Object(o) => o.payload.metatype(),
                other => return fatal(CoreDiagnostic::type_mismatch("[]=", &other.format().to_string())),
            };
            match metatype {
                Metatype::Array => {
                    let idx = as_index(gc, &index)?;
                    index.release(gc);
                    let old = match gc.get_mut(receiver.handle()) {
                        Data::Object(o) => {
                            let arr = o.as_array_mut().expect("metatype confirmed array");
                            let old = arr.get(idx);
                            if !arr.set(idx, value) {
                                return fatal(CoreDiagnostic::not_found("array index"));
                            }
                            old
                        }
                        _ => unreachable!("metatype lookup already confirmed Object"),
                    };
                    if let Some(old) = old {
                        old.release(gc);
                    }
                }
                Metatype::Hash => {
                    let position = match gc.get(receiver.handle()) {
                        Data::Object(o) => o.as_hash().and_then(|h| h.position(gc, &index)),
                        _ => None,
                    };
                    let (old_value, unused_key) = match gc.get_mut(receiver.handle()) {
                        Data::Object(o) => o.as_hash_mut().expect("metatype confirmed hash").set_at(position, index, value),
                        _ => unreachable!("metatype lookup already confirmed Object"),
                    };
                    if let Some(old) = old_value {
                        old.release(gc);
                    }
                    if let Some(key) = unused_key {
                        key.release(gc);
                    }
                }
                Metatype::Object | Metatype::Library | Metatype::LibObject => {
                    let class = match gc.get(receiver.handle()) {
                        Data::Object(o) => o.class,
                        _ => unreachable!("metatype lookup already confirmed Object"),
                    };
                    let callee = resolve_overload(classes, class, Operator::SubscriptMove)?;
                    call_function(cursor, &callee, vec![receiver, index, value], gc)?;
                    return Ok(Step::Continue);
                }
                Metatype::String | Metatype::Regex | Metatype::Iterator => {
                    index.release(gc);
                    value.release(gc);
                    return fatal(CoreDiagnostic::type_mismatch("[]=", "immutable container"));
                }
            }
            receiver.release(gc);
            Ok(Step::Continue)
        }
        Opcode::InitCall => {
            let callee = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("callee"))?;
            cursor.waiting_calls.push(WaitingCall { callee, argc: 0, receiver: None });
            Ok(Step::Continue)
        }
        Opcode::InitMemberCall => {
            let sym = next_symbol(module, cursor).ok_or_else(|| CoreDiagnostic::not_found("method name"))?;
            let receiver = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("receiver"))?;
            let name = sym.as_str();
            let class = match gc.get(receiver.handle()) {
                Data::Object(o) => o.class,
                other => return fatal(CoreDiagnostic::type_mismatch(".", &other.format().to_string())),
            };
            let member = classes
                .get(class)
                .find_member(&name)
                .ok_or_else(|| CoreDiagnostic::not_found(&name))?;
            let callee = member.default.ok_or_else(|| CoreDiagnostic::not_found(&name))?;
            // A global method has no instance slot to bind `self` to; an
            // ordinary instance method keeps the receiver to prepend as
            // args[0] once `call` knows the argument count.
            if member.global {
                receiver.release(gc);
                cursor.waiting_calls.push(WaitingCall { callee, argc: 0, receiver: None });
            } else {
                cursor.waiting_calls.push(WaitingCall { callee, argc: 0, receiver: Some(receiver) });
            }
            Ok(Step::Continue)
        }
        Opcode::InitOperatorCall => {
            let op_index = next_integer(module, cursor) as usize;
            let op = Operator::from_index(op_index).ok_or_else(|| CoreDiagnostic::not_found("operator index"))?;
            let receiver = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("receiver"))?;
            let class = match gc.get(receiver.handle()) {
                Data::Object(o) => o.class,
                other => return fatal(CoreDiagnostic::type_mismatch("operator call", &other.format().to_string())),
            };
            let callee = resolve_overload(classes, class, op)?;
            cursor.waiting_calls.push(WaitingCall { callee, argc: 0, receiver: Some(receiver) });
            Ok(Step::Continue)
        }
        Opcode::Call | Opcode::CallMember => {
            let argc = next_integer(module, cursor) as usize;
            let waiting = cursor.waiting_calls.pop().ok_or_else(|| CoreDiagnostic::not_found("pending call"))?;
            let mut args = Vec::with_capacity(argc + 1);
            for _ in 0..argc {
                args.push(cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("argument"))?);
            }
            args.reverse();
            if let Some(receiver) = waiting.receiver {
                args.insert(0, receiver);
            }
            match gc.get(waiting.callee.handle()) {
                Data::Object(o) if o.is_prototype() => {
                    let class_id = o.class;
                    let slot_count = classes.get(class_id).slot_count;
                    let mut slots = Vec::with_capacity(slot_count);
                    for _ in 0..slot_count {
                        slots.push(Reference::new_strong(gc.alloc(Data::None), Flags::new(), gc));
                    }
                    push_new(gc, cursor, Data::Object(ObjectData::new_instance(class_id, slots)));
                    for a in args {
                        a.release(gc);
                    }
                }
                _ => call_function(cursor, &waiting.callee, args, gc)?,
            }
            Ok(Step::Continue)
        }
        Opcode::CallBuiltin => {
            let argc = next_integer(module, cursor) as usize;
            let module_id = next_integer(module, cursor) as u32;
            let offset = next_integer(module, cursor) as u32;
            let mut args = Vec::with_capacity(argc);
            for _ in 0..argc {
                args.push(cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("argument"))?);
            }
            args.reverse();
            let result = builtins.invoke(module_id, offset, cursor, gc, args)?;
            cursor.push(result);
            Ok(Step::Continue)
        }
        Opcode::ExitCall => {
            let ret = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("return value"))?;
            let frame = cursor.pop_frame().ok_or_else(|| CoreDiagnostic::not_found("call frame"))?;
            cursor.module_id = frame.return_module;
            cursor.ip = frame.return_ip;
            cursor.symbols = frame.symbols;
            cursor.printers.truncate(frame.printer_depth);
            cursor.push(ret);
            Ok(Step::Continue)
        }
        Opcode::InitCapture | Opcode::CaptureSymbol | Opcode::CaptureAs | Opcode::CaptureAll => {
            // Closure capture bookkeeping lives on `FunctionData::Signature::captures`
            // (function.rs); the compiler-facing capture opcodes thread
            // values into that map one entry at a time.
            let sym = next_symbol(module, cursor);
            if let (Opcode::CaptureSymbol, Some(sym)) = (opcode, sym) {
                let value = cursor.symbols.get(&sym).copied();
                if let Some(value) = value {
                    cursor.push(value.clone_strong(gc));
                }
            }
            Ok(Step::Continue)
        }
        Opcode::BeginGeneratorExpression | Opcode::EndGeneratorExpression => Ok(Step::Continue),
        Opcode::Yield | Opcode::YieldExpression => {
            let value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("yielded value"))?;
            Ok(Step::Yielded(value))
        }
        Opcode::ExitGenerator => {
            // A generator body never pushes a call frame (`call_function`
            // hands back its Iterator without jumping into it), so there is
            // nothing to pop here: running off the end just exhausts it.
            Ok(Step::ModuleEnd)
        }
        Opcode::YieldExitGenerator => {
            let value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("final yielded value"))?;
            Ok(Step::YieldedLast(value))
        }
        Opcode::SetRetrievePoint => {
            let handler = next_integer(module, cursor) as usize;
            cursor.set_retrieve_point(handler);
            Ok(Step::Continue)
        }
        Opcode::UnsetRetrievePoint => {
            cursor.unset_retrieve_point();
            Ok(Step::Continue)
        }
        Opcode::Raise => {
            let exception = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("exception value"))?;
            Err(crate::error::CoreError::Raised(exception))
        }
        Opcode::InitException | Opcode::ResetException => Ok(Step::Continue),
        Opcode::OpenPackage => {
            next_symbol(module, cursor);
            Ok(Step::Continue)
        }
        Opcode::ClosePackage => Ok(Step::Continue),
        Opcode::RegisterClass => {
            // Class generation happens in `ClassRegistry::generate`
            // at declare time through the compiler/host boundary; this
            // opcode only marks that the class is now visible for lookup.
            Ok(Step::Continue)
        }
        Opcode::OpenPrinter => {
            cursor.open_printer(Box::new(crate::printer::StdoutSink));
            Ok(Step::Continue)
        }
        Opcode::ClosePrinter => {
            cursor.close_printer();
            Ok(Step::Continue)
        }
        Opcode::Print => {
            let value = cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("value to print"))?;
            let text = crate::printer::render(gc, &value);
            cursor.print(&text);
            value.release(gc);
            Ok(Step::Continue)
        }
        Opcode::ModuleEnd => Ok(Step::ModuleEnd),
        Opcode::ExitThread => Ok(Step::ExitThread),
        Opcode::ExitExec => {
            let status = next_integer(module, cursor) as i32;
            Ok(Step::ExitExec(status))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::containers::array::ArrayData;
    use crate::containers::hash::HashData;
    use crate::containers::string::StringData;

    fn one_opcode_module(op: Opcode) -> Module {
        let mut module = Module::new();
        module.push_node(Node::Command(op));
        module
    }

    fn push_number(gc: &mut Gc, cursor: &mut Cursor, n: f64) -> Reference {
        let r = Reference::new_strong(gc.alloc(Data::Number(n)), Flags::new(), gc);
        cursor.push(r);
        r
    }

    #[test]
    fn subscript_reads_array_element_in_range() {
        let mut gc = Gc::new(false);
        let mut arr = ArrayData::new();
        for n in [10.0, 20.0, 30.0] {
            arr.push(Reference::new_strong(gc.alloc(Data::Number(n)), Flags::new(), &mut gc));
        }
        let arr_handle = gc.alloc(Data::Object(ObjectData::new_container(ClassId::BUILTIN_ARRAY, ObjectPayload::Array(arr))));
        let mut cursor = Cursor::new(0);
        cursor.push(Reference::new_strong(arr_handle, Flags::new(), &mut gc));
        push_number(&mut gc, &mut cursor, 1.0);

        let classes = ClassRegistry::new();
        let builtins = BuiltinRegistry::new();
        let modules = [one_opcode_module(Opcode::Subscript)];
        let outcome = step(&mut cursor, &modules, &mut gc, &classes, &builtins);
        assert!(matches!(outcome, Step::ModuleEnd));
        match gc.get(cursor.pop().unwrap().handle()) {
            Data::Number(n) => assert_eq!(*n, 20.0),
            other => panic!("expected a number, got {other:?}"),
        }
    }

    #[test]
    fn subscript_on_out_of_range_array_index_is_unhandled() {
        let mut gc = Gc::new(false);
        let arr = ArrayData::new();
        let arr_handle = gc.alloc(Data::Object(ObjectData::new_container(ClassId::BUILTIN_ARRAY, ObjectPayload::Array(arr))));
        let mut cursor = Cursor::new(0);
        cursor.push(Reference::new_strong(arr_handle, Flags::new(), &mut gc));
        push_number(&mut gc, &mut cursor, 0.0);

        let classes = ClassRegistry::new();
        let builtins = BuiltinRegistry::new();
        let modules = [one_opcode_module(Opcode::Subscript)];
        assert!(matches!(step(&mut cursor, &modules, &mut gc, &classes, &builtins), Step::Unhandled(_)));
    }

    #[test]
    fn subscript_move_then_subscript_round_trips() {
        let mut gc = Gc::new(false);
        let mut arr = ArrayData::new();
        arr.push(Reference::new_strong(gc.alloc(Data::Number(1.0)), Flags::new(), &mut gc));
        let arr_handle = gc.alloc(Data::Object(ObjectData::new_container(ClassId::BUILTIN_ARRAY, ObjectPayload::Array(arr))));

        let mut cursor = Cursor::new(0);
        cursor.push(Reference::new_strong(arr_handle, Flags::new(), &mut gc));
        push_number(&mut gc, &mut cursor, 0.0);
        push_number(&mut gc, &mut cursor, 99.0);

        let classes = ClassRegistry::new();
        let builtins = BuiltinRegistry::new();
        let modules = [one_opcode_module(Opcode::SubscriptMove)];
        assert!(matches!(step(&mut cursor, &modules, &mut gc, &classes, &builtins), Step::ModuleEnd));

        cursor.push(Reference::new_strong(arr_handle, Flags::new(), &mut gc));
        push_number(&mut gc, &mut cursor, 0.0);
        let modules = [one_opcode_module(Opcode::Subscript)];
        assert!(matches!(step(&mut cursor, &modules, &mut gc, &classes, &builtins), Step::ModuleEnd));
        match gc.get(cursor.pop().unwrap().handle()) {
            Data::Number(n) => assert_eq!(*n, 99.0),
            other => panic!("expected a number, got {other:?}"),
        }
    }

    #[test]
    fn subscript_on_a_missing_hash_key_returns_none_rather_than_erroring() {
        let mut gc = Gc::new(false);
        let hash = HashData::new();
        let hash_handle = gc.alloc(Data::Object(ObjectData::new_container(ClassId::BUILTIN_HASH, ObjectPayload::Hash(hash))));
        let mut cursor = Cursor::new(0);
        cursor.push(Reference::new_strong(hash_handle, Flags::new(), &mut gc));
        push_number(&mut gc, &mut cursor, 1.0);

        let classes = ClassRegistry::new();
        let builtins = BuiltinRegistry::new();
        let modules = [one_opcode_module(Opcode::Subscript)];
        assert!(matches!(step(&mut cursor, &modules, &mut gc, &classes, &builtins), Step::ModuleEnd));
        match gc.get(cursor.pop().unwrap().handle()) {
            Data::None => {}
            other => panic!("expected None on a hash miss, got {other:?}"),
        }
    }

    #[test]
    fn subscript_indexes_a_string_by_codepoint() {
        let mut gc = Gc::new(false);
        let s = StringData::new("a\u{00e9}b");
        let s_handle = gc.alloc(Data::Object(ObjectData::new_container(ClassId::BUILTIN_STRING, ObjectPayload::String(s))));
        let mut cursor = Cursor::new(0);
        cursor.push(Reference::new_strong(s_handle, Flags::new(), &mut gc));
        push_number(&mut gc, &mut cursor, 1.0);

        let classes = ClassRegistry::new();
        let builtins = BuiltinRegistry::new();
        let modules = [one_opcode_module(Opcode::Subscript)];
        assert!(matches!(step(&mut cursor, &modules, &mut gc, &classes, &builtins), Step::ModuleEnd));
        match gc.get(cursor.pop().unwrap().handle()) {
            Data::Object(o) => assert_eq!(o.as_string().unwrap().value, "\u{00e9}"),
            other => panic!("expected a one-codepoint string, got {other:?}"),
        }
    }
}
