//! Scheduler: cooperative multi-thread execution over one shared program
//! image. A `Scheduler` owns the `Module`s, the `ClassRegistry`, the `Gc`
//! arena, and the `BuiltinRegistry`; a `ThreadPool` tracks the `Process`
//! instances (each a `Cursor` plus, once `create_thread` spawns it, an
//! OS thread) currently attached.
//!
//! The single global lock is modeled as the lock already guarding the
//! `Gc` arena rather than a second, redundant lock: every opcode needs
//! Gc access before it can do anything, so holding `gc` for the duration
//! of a quantum already serializes bytecode execution (recorded in
//! DESIGN.md).

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use parking_lot::Mutex;

use crate::class::{ClassRegistry, Operator};
use crate::config::RuntimeConfig;
use crate::cursor::Cursor;
use crate::dispatch::{self, Step};
use crate::error::CoreDiagnostic;
use crate::gc::{Gc, GcHandle};
use crate::host::BuiltinRegistry;
use crate::module::Module;
use crate::object::ObjectPayload;
use crate::printer::render;
use crate::reference::{Flags, Reference};
use crate::value::Data;

pub type ThreadId = u32;

/// Quantum size: instructions run per GIL acquisition before yielding to
/// the next waiting thread. Mirrored by
/// `RuntimeConfig::gil_quantum`; kept as a free constant too since it
/// doubles as the fallback when a `Runtime` is built without a config.
pub const DEFAULT_QUANTUM: u32 = 1;

/// One logical thread's execution state: a `Cursor` plus the OS thread
/// handle backing it once `create_thread` spawns one. Processes started by `run()`/`resume()` on the calling
/// thread never get a `handle`.
pub struct Process {
    thread_id: Option<ThreadId>,
    pub cursor: Cursor,
}

impl Process {
    pub fn new(cursor: Cursor) -> Self {
        Process { thread_id: None, cursor }
    }

    pub fn thread_id(&self) -> Option<ThreadId> {
        self.thread_id
    }

    fn set_thread_id(&mut self, id: ThreadId) {
        self.thread_id = Some(id);
    }
}

/// Handle-map + insertion-ordered attach stack: `attach` pushes to the front so a newly attached
/// main thread is serviced ahead of threads already running, `start`
/// pushes to the back and hands out the next thread id.
#[derive(Default)]
pub struct ThreadPool {
    handles: HashMap<ThreadId, ()>,
    stack: VecDeque<ThreadId>,
    next_thread_id: ThreadId,
}

impl ThreadPool {
    pub fn new() -> Self {
        ThreadPool { handles: HashMap::new(), stack: VecDeque::new(), next_thread_id: 1 }
    }

    pub fn start(&mut self, process: &mut Process) -> ThreadId {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        process.set_thread_id(id);
        self.handles.insert(id, ());
        self.stack.push_back(id);
        id
    }

    pub fn attach(&mut self, process: &mut Process) -> ThreadId {
        let id = self.next_thread_id;
        self.next_thread_id += 1;
        process.set_thread_id(id);
        self.handles.insert(id, ());
        self.stack.push_front(id);
        id
    }

    pub fn stop(&mut self, process: &mut Process) {
        if let Some(id) = process.thread_id() {
            self.stack.retain(|t| *t != id);
            self.handles.remove(&id);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }
}

/// Everything a running `Process` needs that outlives any one of them: the
/// compiled program image, the generated class table, the GC arena, and
/// the registered builtins. Shared via `Arc` so
/// `create_thread` can hand a clone to a spawned OS thread.
pub struct Runtime {
    pub modules: Vec<Module>,
    pub classes: Mutex<ClassRegistry>,
    pub gc: Mutex<Gc>,
    pub builtins: BuiltinRegistry,
    pub config: RuntimeConfig,
}

impl Runtime {
    pub fn new(modules: Vec<Module>, classes: ClassRegistry, builtins: BuiltinRegistry) -> Self {
        Self::with_config(modules, classes, builtins, RuntimeConfig::default())
    }

    pub fn with_config(
        modules: Vec<Module>,
        classes: ClassRegistry,
        builtins: BuiltinRegistry,
        config: RuntimeConfig,
    ) -> Self {
        Self::with_gc(modules, classes, builtins, config, Gc::new(config.debug))
    }

    /// Like `with_config`, but takes an already-populated `Gc` instead of
    /// starting a fresh arena. Required whenever a module's constant pool
    /// was built by allocating into a `Gc` before the `Runtime` existed —
    /// a `GcHandle` is only a valid index into the arena that produced it,
    /// so the compiler/host and the `Runtime` must share one `Gc`.
    pub fn with_gc(
        modules: Vec<Module>,
        classes: ClassRegistry,
        builtins: BuiltinRegistry,
        config: RuntimeConfig,
        gc: Gc,
    ) -> Self {
        Runtime {
            modules,
            classes: Mutex::new(classes),
            gc: Mutex::new(gc),
            builtins,
            config,
        }
    }
}

/// A destructor task: `Object`s swept with a `delete`
/// operator don't get reclaimed inline by `Gc::collect` — the scheduler
/// invokes the destructor first, grounded on `garbagecollector.cpp`'s
/// "destructors are scheduled, not executed during the sweep".
pub struct DestructorTask {
    pub handle: GcHandle,
}

pub struct Scheduler {
    pub runtime: Arc<Runtime>,
    thread_pool: Mutex<ThreadPool>,
    thread_handles: Mutex<HashMap<ThreadId, JoinHandle<()>>>,
    configured: Mutex<VecDeque<Process>>,
    exit_callbacks: Mutex<Vec<Box<dyn Fn(i32) + Send + Sync>>>,
    pending_destructors: Mutex<Vec<DestructorTask>>,
    pending_exceptions: Mutex<Vec<Reference>>,
    running: AtomicBool,
    status: AtomicI32,
}

impl Scheduler {
    pub fn new(runtime: Runtime) -> Arc<Scheduler> {
        Arc::new(Scheduler {
            runtime: Arc::new(runtime),
            thread_pool: Mutex::new(ThreadPool::new()),
            thread_handles: Mutex::new(HashMap::new()),
            configured: Mutex::new(VecDeque::new()),
            exit_callbacks: Mutex::new(Vec::new()),
            pending_destructors: Mutex::new(Vec::new()),
            pending_exceptions: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
            status: AtomicI32::new(0),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enter the running state without draining the configured-process
    /// queue. `run()` calls this itself; an embedder that drives
    /// `create_thread`-spawned processes directly (without ever pushing a
    /// primary configured process) must call it first, or every spawned
    /// thread's `schedule` loop would see `is_running() == false` on its
    /// very first quantum and exit immediately.
    pub fn start(&self) {
        self.running.store(true, Ordering::Release);
    }

    /// `exit(status)`: observed by every thread at its next safepoint
    ///; does not itself unwind anything.
    pub fn exit(&self, status: i32) {
        self.status.store(status, Ordering::Release);
        self.running.store(false, Ordering::Release);
    }

    pub fn add_exit_callback(&self, callback: impl Fn(i32) + Send + Sync + 'static) {
        self.exit_callbacks.lock().push(Box::new(callback));
    }

    fn run_exit_callbacks(&self, status: i32) {
        for callback in self.exit_callbacks.lock().iter() {
            callback(status);
        }
    }

    /// Queue a process to be picked up by `run()`.
    pub fn push_configured_process(&self, process: Process) {
        self.configured.lock().push_back(process);
    }

    pub fn create_destructor(&self, handle: GcHandle) {
        self.pending_destructors.lock().push(DestructorTask { handle });
    }

    pub fn create_exception(&self, reference: Reference) {
        self.pending_exceptions.lock().push(reference);
    }

    /// `run()`: drain the configured-process queue; for each, attach as
    /// main thread and run to completion or `exit`, draining pending
    /// destructor/exception tasks between processes. Stays
    /// in the running state until every `create_thread`-spawned process
    /// has also finished on its own — resetting it the moment the
    /// configured queue empties would race a still-executing spawned
    /// thread's next `is_running()` check.
    pub fn run(&self) -> i32 {
        self.start();
        loop {
            let next = self.configured.lock().pop_front();
            let Some(mut process) = next else { break };
            self.thread_pool.lock().attach(&mut process);
            let status = self.schedule(&mut process);
            self.pop_thread(&mut process);
            self.status.store(status, Ordering::Release);
            if !self.running.load(Ordering::Acquire) {
                break;
            }
        }
        self.join_all_threads();
        let status = self.status.load(Ordering::Acquire);
        self.running.store(false, Ordering::Release);
        self.run_exit_callbacks(status);
        status
    }

    /// Join every still-outstanding `create_thread` handle.
    fn join_all_threads(&self) {
        loop {
            let handle = {
                let mut handles = self.thread_handles.lock();
                let next_id = handles.keys().next().copied();
                next_id.and_then(|id| handles.remove(&id))
            };
            match handle {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => break,
            }
        }
    }

    /// `schedule`: drive one `Process`'s dispatch loop until it terminates
    /// (`module_end`/`exit_thread`/`exit_exec`) or an unhandled error
    /// aborts it, acquiring the GIL (the `Gc` mutex) for one quantum at a
    /// time so other threads attached to this scheduler get a turn.
    fn schedule(&self, process: &mut Process) -> i32 {
        loop {
            if !self.is_running() {
                return self.status.load(Ordering::Acquire);
            }
            let outcome = {
                let classes = self.runtime.classes.lock();
                let mut gc = self.runtime.gc.lock();
                let mut last = Step::Continue;
                for _ in 0..self.runtime.config.gil_quantum {
                    last = dispatch::step(&mut process.cursor, &self.runtime.modules, &mut gc, &classes, &self.runtime.builtins);
                    if !matches!(last, Step::Continue) {
                        break;
                    }
                }
                last
            };
            self.drain_pending();
            match outcome {
                Step::Continue => continue,
                Step::ModuleEnd | Step::ExitThread => return 0,
                Step::ExitExec(status) => {
                    self.exit(status);
                    return status;
                }
                Step::Yielded(value) | Step::YieldedLast(value) => {
                    // A bare `yield` reaching the scheduler outside of a
                    // driven generator resumption has nowhere to go but
                    // back onto the stack; generators are instead advanced
                    // by `dispatch::advance_generator`, which drives its own
                    // scratch cursor directly rather than going through
                    // `schedule`.
                    process.cursor.push(value);
                    continue;
                }
                Step::Unhandled(diag) => {
                    self.report_fatal(&diag);
                    return 1;
                }
                Step::UnhandledException(exception) => {
                    // No parent cursor to re-raise to from inside
                    // `schedule` (a thread only ever drives one cursor
                    // here), so escalate straight to the scheduler's
                    // exception task and terminate.
                    self.create_exception(exception);
                    self.drain_pending();
                    return 1;
                }
            }
        }
    }

    fn report_fatal(&self, diag: &CoreDiagnostic) {
        eprintln!("{diag}");
    }

    /// `collect()` at thread-pop time: detaches the process, runs one
    /// mark-sweep pass rooted at its own remaining stack, and queues any
    /// destructors the sweep turned up before draining them.
    fn pop_thread(&self, process: &mut Process) {
        self.thread_pool.lock().stop(process);
        if !self.runtime.config.mark_sweep_enabled() {
            self.drain_pending();
            return;
        }
        let roots = process.cursor.root_handles();
        let pending = {
            let classes = self.runtime.classes.lock();
            let mut gc = self.runtime.gc.lock();
            gc.collect(&classes, &[], &[&roots])
        };
        for task in pending {
            self.create_destructor(task.handle);
        }
        self.drain_pending();
    }

    /// Run every queued destructor (`delete` operator) and print every
    /// queued unhandled exception, in the creating thread's context,
    /// before its stack is torn down.
    fn drain_pending(&self) {
        loop {
            let task = self.pending_destructors.lock().pop();
            let Some(task) = task else { break };
            self.run_destructor(task.handle);
        }
        loop {
            let exception = self.pending_exceptions.lock().pop();
            let Some(exception) = exception else { break };
            self.report_unhandled_exception(exception);
        }
    }

    fn run_destructor(&self, handle: GcHandle) {
        let classes_guard = self.runtime.classes.lock();
        let mut gc = self.runtime.gc.lock();
        let class_id = match gc.get(handle) {
            Data::Object(obj) if is_instance(&obj.payload) => obj.class,
            _ => return,
        };
        let callee = match dispatch::resolve_overload(&classes_guard, class_id, Operator::Delete) {
            Ok(callee) => callee,
            Err(_) => return,
        };
        drop(classes_guard);
        let receiver = Reference::new_strong(handle, Flags::new(), &mut gc);
        let mut scratch = Cursor::new(0);
        if dispatch::call_function(&mut scratch, &callee, vec![receiver], &mut gc).is_err() {
            return;
        }
        let classes = self.runtime.classes.lock();
        loop {
            match dispatch::step(&mut scratch, &self.runtime.modules, &mut gc, &classes, &self.runtime.builtins) {
                Step::Continue => continue,
                _ => break,
            }
        }
        gc.free_slot(handle);
    }

    fn report_unhandled_exception(&self, exception: Reference) {
        let mut gc = self.runtime.gc.lock();
        eprintln!("unhandled exception: {}", render(&gc, &exception));
        exception.release(&mut gc);
    }

    /// `create_thread(cursor)`: spawn an OS thread whose entry attaches a
    /// fresh `Process` and runs `schedule` to completion.
    /// Returns the `ThreadId` the caller can later `join_thread` on.
    pub fn create_thread(self: &Arc<Self>, cursor: Cursor) -> ThreadId {
        let mut process = Process::new(cursor);
        let id = self.thread_pool.lock().start(&mut process);
        let scheduler = Arc::clone(self);
        let handle = std::thread::spawn(move || {
            let mut process = process;
            scheduler.schedule(&mut process);
            scheduler.pop_thread(&mut process);
        });
        // The JoinHandle must live somewhere findable by `join_thread`;
        // since `process` moved into the closure, stash the handle on a
        // side table keyed by thread id instead of on the moved Process.
        self.thread_handles.lock().insert(id, handle);
        id
    }

    pub fn join_thread(&self, id: ThreadId) {
        if let Some(handle) = self.thread_handles.lock().remove(&id) {
            let _ = handle.join();
        }
    }

    /// `invoke(function, args)`: synchronously run a function to
    /// completion within the calling thread, used by host
    /// embedders and by `invoke(object, op, args)` for operator overloads.
    pub fn invoke(&self, callee: &Reference, args: Vec<Reference>) -> Result<Reference, CoreDiagnostic> {
        let mut cursor = Cursor::new(0);
        let classes = self.runtime.classes.lock();
        let mut gc = self.runtime.gc.lock();
        dispatch::call_function(&mut cursor, callee, args, &mut gc)
            .map_err(|_| CoreDiagnostic::not_found("callable"))?;
        loop {
            match dispatch::step(&mut cursor, &self.runtime.modules, &mut gc, &classes, &self.runtime.builtins) {
                Step::Continue => continue,
                Step::ModuleEnd | Step::ExitThread | Step::ExitExec(_) => {
                    return cursor.pop().ok_or_else(|| CoreDiagnostic::not_found("return value"));
                }
                Step::Yielded(value) | Step::YieldedLast(value) => return Ok(value),
                Step::Unhandled(diag) => return Err(diag),
                Step::UnhandledException(exception) => {
                    let message = render(&gc, &exception);
                    exception.release(&mut gc);
                    return Err(CoreDiagnostic::not_found(&format!("unhandled exception: {message}")));
                }
            }
        }
    }
}

/// Resolve the handful of `ObjectPayload` variants the destructor path
/// needs to recognize a live instance rather than a prototype or
/// container — kept as a free function since `Scheduler` otherwise has no
/// reason to depend on `ObjectPayload`'s full shape.
fn is_instance(payload: &ObjectPayload) -> bool {
    matches!(payload, ObjectPayload::Plain(Some(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRegistry;
    use crate::module::{Module, Node};
    use crate::dispatch::Opcode;

    fn empty_runtime() -> Runtime {
        Runtime::new(vec![Module::new()], ClassRegistry::new(), BuiltinRegistry::new())
    }

    #[test]
    fn run_drains_a_single_module_end_process() {
        let mut module = Module::new();
        module.push_node(Node::Command(Opcode::ModuleEnd));
        let runtime = Runtime::new(vec![module], ClassRegistry::new(), BuiltinRegistry::new());
        let scheduler = Scheduler::new(runtime);
        scheduler.push_configured_process(Process::new(Cursor::new(0)));
        let status = scheduler.run();
        assert_eq!(status, 0);
    }

    #[test]
    fn exit_callback_runs_with_final_status() {
        let runtime = empty_runtime();
        let scheduler = Scheduler::new(runtime);
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = Arc::clone(&seen);
        scheduler.add_exit_callback(move |status| {
            *seen_clone.lock() = Some(status);
        });
        scheduler.push_configured_process(Process::new(Cursor::new(0)));
        scheduler.run();
        assert_eq!(*seen.lock(), Some(0));
    }

    #[test]
    fn thread_pool_attach_pushes_to_front() {
        let mut pool = ThreadPool::new();
        let mut a = Process::new(Cursor::new(0));
        let mut b = Process::new(Cursor::new(0));
        pool.start(&mut a);
        pool.attach(&mut b);
        assert_eq!(pool.stack.front().copied(), b.thread_id());
        assert_eq!(pool.len(), 2);
    }
}
