//! Stack-based virtual machine
//!
//! Executes bytecode with a value stack and a call-frame stack, driven by an
//! outer event loop that alternates between draining the microtask queue and
//! running the dispatch loop until no frames, no microtasks, and no pending
//! host operations remain.
//!
//! - Closures capture variables through shared upvalue cells
//! - Async calls run as microtasks and settle a promise on return
//! - Generators run on coroutines (their own [`ExecState`]) and suspend by
//!   swapping execution states
//! - Runtime errors unwind to the innermost try handler, or reject the
//!   nearest enclosing async frame's promise, or fail the interpretation

mod frame;

pub use frame::{
    CallFrame, ExceptionHandler, ExecState, FrameKind, Generator, GeneratorState, SuspendedFrame,
};

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::io::Write;
use std::rc::Rc;
use std::time::Duration;

use crate::async_runtime::{self, HostEvent, Microtask, Promise, PromiseRef, Reaction};
use crate::bytecode::{update_mode, FunctionObject, Opcode};
use crate::natives::{self, NativeFunction, OutputWriter};
use crate::span::Span;
use crate::value::{Closure, Object, RuntimeError, Upvalue, Value};

/// VM tunables
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Call-frame bound; overflow is a runtime error
    pub max_frames: usize,
    /// How long one host wait blocks before re-checking the loop conditions
    pub host_poll_ms: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            max_frames: 256,
            host_poll_ms: 10,
        }
    }
}

/// Final status of an interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterpretOutcome {
    /// The event loop drained with no error
    Ok,
    /// A runtime error escaped every handler and async boundary
    RuntimeError,
}

/// Result of [`Vm::interpret`]
#[derive(Debug)]
pub struct Interpretation {
    pub result: InterpretOutcome,
    /// The script's return value (null unless the script `return`s)
    pub value: Value,
}

/// Per-instruction outcome
enum Control {
    Continue,
    /// Return control to the outer event loop (AWAIT suspension, generator
    /// yield)
    Yield,
}

/// Result of the unwind protocol
enum UnwindOutcome {
    /// A handler took over or an async frame's promise absorbed the error
    Handled,
    /// Nothing applied; the error is fatal at this level
    Unhandled,
}

/// Virtual machine state
pub struct Vm {
    config: VmConfig,
    /// The currently executing state (the base state, or a coroutine's)
    state: ExecState,
    /// Global variables, including bound natives
    globals: HashMap<String, Value>,
    microtasks: VecDeque<Microtask>,
    /// Stack of generators currently running, innermost last
    active_coroutines: Vec<Rc<RefCell<Generator>>>,
    /// Outstanding host operations (armed timers, in-flight fetches)
    pending_host_ops: usize,
    host_tx: tokio::sync::mpsc::UnboundedSender<HostEvent>,
    host_rx: tokio::sync::mpsc::UnboundedReceiver<HostEvent>,
    /// Armed one-shot timers: id → callback
    timers: HashMap<u64, Value>,
    /// Armed repeating timers: id → callback
    intervals: HashMap<u64, Value>,
    /// In-flight fetches: id → promise to settle
    #[cfg(feature = "http")]
    fetches: HashMap<u64, PromiseRef>,
    next_host_id: u64,
    had_error: bool,
    /// The error that stopped the loop, for callers that want details
    fatal: Option<RuntimeError>,
    /// The script's return value
    result: Value,
    stdout: OutputWriter,
    stderr: OutputWriter,
}

impl Vm {
    /// Create a new VM. Natives are not bound; see
    /// [`crate::natives::register_defaults`].
    pub fn new(config: VmConfig) -> Self {
        let (host_tx, host_rx) = async_runtime::host_channel();
        Self {
            config,
            state: ExecState::new(),
            globals: HashMap::new(),
            microtasks: VecDeque::new(),
            active_coroutines: Vec::new(),
            pending_host_ops: 0,
            host_tx,
            host_rx,
            timers: HashMap::new(),
            intervals: HashMap::new(),
            #[cfg(feature = "http")]
            fetches: HashMap::new(),
            next_host_id: 1,
            had_error: false,
            fatal: None,
            result: Value::Null,
            stdout: natives::stdout_writer(),
            stderr: natives::stderr_writer(),
        }
    }

    /// Register a native binding under a global name
    pub fn bind_native(&mut self, name: impl Into<String>, value: Value) {
        self.globals.insert(name.into(), value);
    }

    /// Read a global (used by embedders and tests)
    pub fn get_global(&self, name: &str) -> Option<Value> {
        self.globals.get(name).cloned()
    }

    /// Redirect script-observable standard output
    pub fn set_stdout(&mut self, writer: OutputWriter) {
        self.stdout = writer;
    }

    /// Redirect script-observable error output
    pub fn set_stderr(&mut self, writer: OutputWriter) {
        self.stderr = writer;
    }

    pub fn stdout(&self) -> OutputWriter {
        self.stdout.clone()
    }

    pub fn stderr(&self) -> OutputWriter {
        self.stderr.clone()
    }

    /// The error that failed the interpretation, if any
    pub fn fatal_error(&self) -> Option<&RuntimeError> {
        self.fatal.as_ref()
    }

    /// Run a compiled script to completion: push its main frame, then
    /// alternate between microtask drains, bytecode dispatch, and host waits
    /// until everything settles.
    pub fn interpret(&mut self, function: Rc<FunctionObject>) -> Interpretation {
        let closure = Rc::new(Closure::new(function, Vec::new()));
        self.state.stack.push(Value::Closure(closure.clone()));
        self.state
            .frames
            .push(CallFrame::new(closure, 0, FrameKind::Main));

        self.run_event_loop();

        if self.had_error {
            Interpretation {
                result: InterpretOutcome::RuntimeError,
                value: Value::Null,
            }
        } else {
            Interpretation {
                result: InterpretOutcome::Ok,
                value: std::mem::replace(&mut self.result, Value::Null),
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Event loop
    // ══════════════════════════════════════════════════════════════════════

    fn run_event_loop(&mut self) {
        loop {
            if self.had_error {
                break;
            }
            self.drain_microtasks();
            if self.had_error {
                break;
            }
            if !self.state.frames.is_empty() {
                self.run_dispatch();
                continue;
            }
            if !self.microtasks.is_empty() {
                continue;
            }
            if self.poll_host_events() {
                continue;
            }
            if self.pending_host_ops == 0 {
                break;
            }
            self.wait_for_host_event();
        }
    }

    /// Run queued microtasks in FIFO order. Reaction continuations run to
    /// completion in place; a task that pushes a call frame ends the drain
    /// so the dispatch loop runs it before the next task starts.
    fn drain_microtasks(&mut self) {
        while !self.had_error {
            let Some(task) = self.microtasks.pop_front() else {
                break;
            };
            let frames_before = self.state.frames.len();
            match task {
                Microtask::Call {
                    callee,
                    args,
                    receiver,
                    promise,
                } => self.run_call_task(callee, args, receiver, promise),
                Microtask::Reaction { reaction, outcome } => self.run_reaction(reaction, outcome),
            }
            if self.state.frames.len() > frames_before {
                break;
            }
        }
    }

    /// Dispatch loop: one instruction at a time until the frame stack
    /// empties, a suspension bounces out, or an error escapes.
    fn run_dispatch(&mut self) {
        loop {
            if self.state.frames.is_empty() {
                return;
            }
            match self.step() {
                Ok(Control::Continue) => {}
                Ok(Control::Yield) => return,
                Err(err) => match self.unwind(err.to_value(), 0) {
                    UnwindOutcome::Handled => {}
                    UnwindOutcome::Unhandled => {
                        self.fail(err);
                        return;
                    }
                },
            }
        }
    }

    fn fail(&mut self, err: RuntimeError) {
        let function = self
            .state
            .frames
            .last()
            .map(|frame| frame.closure.function.name.clone())
            .unwrap_or_else(|| "<script>".to_string());
        let _ = writeln!(self.stderr.borrow_mut(), "Runtime error in {function}: {err}");
        self.had_error = true;
        self.fatal = Some(err);
    }

    /// Non-blocking sweep of ready host events
    fn poll_host_events(&mut self) -> bool {
        let mut handled = false;
        while let Ok(event) = self.host_rx.try_recv() {
            self.handle_host_event(event);
            handled = true;
        }
        handled
    }

    /// Block on the host channel for one poll interval; this also drives
    /// the spawned timer/fetch tasks on the current-thread runtime.
    fn wait_for_host_event(&mut self) {
        let poll = Duration::from_millis(self.config.host_poll_ms.max(1));
        let rx = &mut self.host_rx;
        let event =
            async_runtime::block_on(
                async move { tokio::time::timeout(poll, rx.recv()).await.ok().flatten() },
            );
        if let Some(event) = event {
            self.handle_host_event(event);
        }
    }

    fn handle_host_event(&mut self, event: HostEvent) {
        match event {
            HostEvent::TimerFired { id } => {
                if let Some(callback) = self.timers.remove(&id) {
                    self.pending_host_ops -= 1;
                    self.microtasks.push_back(Microtask::Call {
                        callee: callback,
                        args: Vec::new(),
                        receiver: None,
                        promise: None,
                    });
                }
            }
            HostEvent::IntervalTick { id } => {
                if let Some(callback) = self.intervals.get(&id).cloned() {
                    self.microtasks.push_back(Microtask::Call {
                        callee: callback,
                        args: Vec::new(),
                        receiver: None,
                        promise: None,
                    });
                }
            }
            #[cfg(feature = "http")]
            HostEvent::FetchDone { id, result } => {
                if let Some(promise) = self.fetches.remove(&id) {
                    self.pending_host_ops -= 1;
                    match result {
                        Ok(response) => {
                            let value = Value::Native(Rc::new(natives::Response {
                                status: response.status,
                                url: response.url,
                                body: response.body,
                            }));
                            self.resolve_promise(promise, value);
                        }
                        Err(message) => self.reject_promise(
                            promise,
                            Value::string(format!("fetch failed: {message}")),
                        ),
                    }
                }
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Microtask execution
    // ══════════════════════════════════════════════════════════════════════

    fn run_call_task(
        &mut self,
        callee: Value,
        mut args: Vec<Value>,
        receiver: Option<Value>,
        promise: Option<PromiseRef>,
    ) {
        match callee {
            Value::Closure(closure) => {
                if closure.function.is_generator {
                    let slot_zero = receiver.unwrap_or_else(|| Value::Closure(closure.clone()));
                    let generator = Value::Generator(Rc::new(RefCell::new(Generator::new(
                        closure, slot_zero, args,
                    ))));
                    if let Some(promise) = promise {
                        self.resolve_promise(promise, generator);
                    }
                    return;
                }
                // Host-boundary call: adapt the argument list instead of
                // enforcing closure arity.
                adapt_args(&mut args, closure.function.arity);
                let promise = if closure.function.is_async && promise.is_none() {
                    Some(Promise::pending())
                } else {
                    promise
                };
                if self.state.frames.len() >= self.config.max_frames {
                    self.fail(RuntimeError::StackOverflow { span: Span::dummy() });
                    return;
                }
                let base = self.state.stack.len();
                self.state
                    .stack
                    .push(receiver.unwrap_or_else(|| Value::Closure(closure.clone())));
                self.state.stack.extend(args);
                let mut frame = CallFrame::new(closure, base, FrameKind::Task);
                frame.async_promise = promise;
                self.state.frames.push(frame);
            }
            Value::Native(native) => match native.call(self, args, Span::dummy()) {
                Ok(value) => {
                    if let Some(promise) = promise {
                        self.resolve_promise(promise, value);
                    }
                }
                Err(err) => match promise {
                    Some(promise) => {
                        let reason = err.to_value();
                        self.reject_promise(promise, reason);
                    }
                    None => self.fail(err),
                },
            },
            other => self.fail(RuntimeError::NotCallable {
                msg: format!("cannot call {}", other.type_name()),
                span: Span::dummy(),
            }),
        }
    }

    /// Re-base a frame suspended at AWAIT onto the current stack top and
    /// feed it the settled outcome.
    fn resume_suspended(&mut self, suspended: SuspendedFrame, outcome: Result<Value, Value>) {
        let SuspendedFrame {
            mut frame,
            region,
            upvalues,
            handlers,
        } = suspended;
        let new_base = self.state.stack.len();
        self.state.stack.extend(region);
        for (offset, cell) in upvalues {
            *cell.borrow_mut() = Upvalue::Open(new_base + offset);
            self.insert_open_upvalue(new_base + offset, cell);
        }
        let frame_index = self.state.frames.len();
        for (catch_ip, depth_offset) in handlers {
            self.state.handlers.push(ExceptionHandler {
                catch_ip,
                stack_depth: new_base + depth_offset,
                frame_index,
            });
        }
        frame.stack_base = new_base;
        self.state.frames.push(frame);

        // The awaited promise is on top of the restored region.
        let _ = self.state.stack.pop();
        match outcome {
            Ok(value) => self.state.stack.push(value),
            Err(reason) => {
                // The rejection surfaces as a throw from the await site.
                if let UnwindOutcome::Unhandled = self.unwind(reason.clone(), 0) {
                    self.fail(RuntimeError::Thrown {
                        value: reason,
                        span: Span::dummy(),
                    });
                }
            }
        }
    }

    fn run_reaction(&mut self, reaction: Reaction, outcome: Result<Value, Value>) {
        match reaction {
            Reaction::Then {
                on_fulfilled,
                on_rejected,
                derived,
            } => {
                let handler = match &outcome {
                    Ok(_) => on_fulfilled,
                    Err(_) => on_rejected,
                };
                match handler {
                    Some(callable) => {
                        let argument = match outcome {
                            Ok(value) => value,
                            Err(reason) => reason,
                        };
                        match self.call_callable_sync(callable, vec![argument]) {
                            Ok(result) => self.resolve_promise(derived, result),
                            Err(err) => {
                                let reason = err.to_value();
                                self.reject_promise(derived, reason);
                            }
                        }
                    }
                    None => match outcome {
                        Ok(value) => self.resolve_promise(derived, value),
                        Err(reason) => self.reject_promise(derived, reason),
                    },
                }
            }
            Reaction::Native(continuation) => continuation(self, outcome),
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Promises
    // ══════════════════════════════════════════════════════════════════════

    /// Resolve a promise; resolving with another promise adopts its
    /// eventual state.
    pub fn resolve_promise(&mut self, promise: PromiseRef, value: Value) {
        if let Value::Promise(inner) = &value {
            if Rc::ptr_eq(inner, &promise) {
                self.settle_promise(
                    promise.clone(),
                    Err(Value::string("promise chaining cycle detected")),
                );
                return;
            }
            let target = promise.clone();
            self.promise_then_native(
                inner.clone(),
                Box::new(move |vm, outcome| vm.settle_promise(target, outcome)),
            );
            return;
        }
        self.settle_promise(promise, Ok(value));
    }

    pub fn reject_promise(&mut self, promise: PromiseRef, reason: Value) {
        self.settle_promise(promise, Err(reason));
    }

    /// One-shot settlement; stored reactions become microtasks.
    pub fn settle_promise(&mut self, promise: PromiseRef, outcome: Result<Value, Value>) {
        let reactions = promise.borrow_mut().settle(outcome.clone());
        if let Some(reactions) = reactions {
            for reaction in reactions {
                self.microtasks.push_back(Microtask::Reaction {
                    reaction,
                    outcome: outcome.clone(),
                });
            }
        }
    }

    /// Attach a host continuation to a promise; fires through the microtask
    /// queue even when the promise is already settled.
    pub fn promise_then_native(
        &mut self,
        promise: PromiseRef,
        continuation: Box<dyn FnOnce(&mut Vm, Result<Value, Value>)>,
    ) {
        let immediate = promise
            .borrow_mut()
            .add_reaction(Reaction::Native(continuation));
        if let Some((reaction, outcome)) = immediate {
            self.microtasks.push_back(Microtask::Reaction { reaction, outcome });
        }
    }

    /// `.then`/`.catch`: register script callbacks, produce the derived
    /// promise.
    fn promise_then_script(
        &mut self,
        promise: PromiseRef,
        on_fulfilled: Option<Value>,
        on_rejected: Option<Value>,
    ) -> PromiseRef {
        let derived = Promise::pending();
        let reaction = Reaction::Then {
            on_fulfilled,
            on_rejected,
            derived: derived.clone(),
        };
        let immediate = promise.borrow_mut().add_reaction(reaction);
        if let Some((reaction, outcome)) = immediate {
            self.microtasks.push_back(Microtask::Reaction { reaction, outcome });
        }
        derived
    }

    // ══════════════════════════════════════════════════════════════════════
    // Host operations (timers, fetch)
    // ══════════════════════════════════════════════════════════════════════

    /// Arm a one-shot timer; the op is released when it fires or is cleared.
    pub fn arm_timeout(&mut self, callback: Value, ms: u64) -> u64 {
        let id = self.next_host_id;
        self.next_host_id += 1;
        self.timers.insert(id, callback);
        self.pending_host_ops += 1;
        async_runtime::spawn_timer(self.host_tx.clone(), id, ms);
        id
    }

    pub fn clear_timeout(&mut self, id: u64) {
        if self.timers.remove(&id).is_some() {
            self.pending_host_ops -= 1;
        }
    }

    /// Arm a repeating timer; the op is held until cleared.
    pub fn arm_interval(&mut self, callback: Value, ms: u64) -> u64 {
        let id = self.next_host_id;
        self.next_host_id += 1;
        self.intervals.insert(id, callback);
        self.pending_host_ops += 1;
        async_runtime::spawn_interval(self.host_tx.clone(), id, ms);
        id
    }

    pub fn clear_interval(&mut self, id: u64) {
        if self.intervals.remove(&id).is_some() {
            self.pending_host_ops -= 1;
        }
    }

    /// Start a fetch on the host runtime; returns the promise the response
    /// will settle.
    #[cfg(feature = "http")]
    pub fn start_fetch(&mut self, url: String) -> PromiseRef {
        let id = self.next_host_id;
        self.next_host_id += 1;
        let promise = Promise::pending();
        self.fetches.insert(id, promise.clone());
        self.pending_host_ops += 1;
        let tx = self.host_tx.clone();
        async_runtime::spawn(async move {
            let result = match reqwest::get(url).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let url = response.url().to_string();
                    match response.text().await {
                        Ok(body) => Ok(async_runtime::FetchResponse { status, url, body }),
                        Err(err) => Err(err.to_string()),
                    }
                }
                Err(err) => Err(err.to_string()),
            };
            let _ = tx.send(HostEvent::FetchDone { id, result });
        });
        promise
    }

    // ══════════════════════════════════════════════════════════════════════
    // Synchronous re-entry (host → VM calls)
    // ══════════════════════════════════════════════════════════════════════

    /// Call a script value from host code and run it to completion.
    ///
    /// Async callees do not run synchronously: they are scheduled as usual
    /// and their promise is returned. Generator callees return a generator
    /// object. Arguments are adapted to the callee's arity (host-boundary
    /// leniency).
    pub fn call_callable_sync(
        &mut self,
        callee: Value,
        mut args: Vec<Value>,
    ) -> Result<Value, RuntimeError> {
        match callee {
            Value::Closure(closure) if closure.function.is_async => {
                let promise = Promise::pending();
                self.microtasks.push_back(Microtask::Call {
                    callee: Value::Closure(closure),
                    args,
                    receiver: None,
                    promise: Some(promise.clone()),
                });
                Ok(Value::Promise(promise))
            }
            Value::Closure(closure) if closure.function.is_generator => {
                adapt_args(&mut args, closure.function.arity);
                let slot_zero = Value::Closure(closure.clone());
                Ok(Value::Generator(Rc::new(RefCell::new(Generator::new(
                    closure, slot_zero, args,
                )))))
            }
            Value::Closure(closure) => {
                adapt_args(&mut args, closure.function.arity);
                if self.state.frames.len() >= self.config.max_frames {
                    return Err(RuntimeError::StackOverflow { span: Span::dummy() });
                }
                let depth = self.state.frames.len();
                let entry_stack = self.state.stack.len();
                self.state.stack.push(Value::Closure(closure.clone()));
                self.state.stack.extend(args);
                self.state
                    .frames
                    .push(CallFrame::new(closure, entry_stack, FrameKind::Call));
                match self.run_until(depth) {
                    Ok(()) => Ok(self.state.stack.pop().unwrap_or(Value::Null)),
                    Err(err) => {
                        self.state.frames.truncate(depth);
                        self.close_upvalues(entry_stack);
                        self.state.stack.truncate(entry_stack);
                        self.state.handlers.retain(|h| h.frame_index < depth);
                        Err(err)
                    }
                }
            }
            Value::Native(native) => native.call(self, args, Span::dummy()),
            other => Err(RuntimeError::NotCallable {
                msg: format!("cannot call {}", other.type_name()),
                span: Span::dummy(),
            }),
        }
    }

    /// Nested dispatch until the frame pushed at `depth` returns. Generator
    /// bounces are absorbed; errors unwind only within the callback.
    fn run_until(&mut self, depth: usize) -> Result<(), RuntimeError> {
        let entry_coroutines = self.active_coroutines.len();
        loop {
            if self.active_coroutines.len() == entry_coroutines
                && self.state.frames.len() <= depth
            {
                return Ok(());
            }
            match self.step() {
                Ok(_) => {}
                Err(err) => {
                    let floor = if self.active_coroutines.len() > entry_coroutines {
                        0
                    } else {
                        depth
                    };
                    match self.unwind(err.to_value(), floor) {
                        UnwindOutcome::Handled => {}
                        UnwindOutcome::Unhandled => return Err(err),
                    }
                }
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Unwind protocol
    // ══════════════════════════════════════════════════════════════════════

    /// Unwind a thrown value. Handlers installed at or inside the nearest
    /// async frame win; past them the async frame's promise absorbs the
    /// error as a rejection. Uncaught errors inside a coroutine propagate
    /// to the caller of `next`/`throw`. `floor` bounds the search to frames
    /// at or above that index (synchronous re-entry).
    fn unwind(&mut self, value: Value, floor: usize) -> UnwindOutcome {
        loop {
            // Inside a coroutine the floor belongs to the parked base state.
            let effective_floor = if self.active_coroutines.is_empty() {
                floor
            } else {
                0
            };
            let handler = self
                .state
                .handlers
                .last()
                .copied()
                .filter(|h| h.frame_index >= effective_floor);
            let async_index = self
                .state
                .frames
                .iter()
                .rposition(|frame| {
                    frame
                        .async_promise
                        .as_ref()
                        .is_some_and(|p| p.borrow().is_pending())
                })
                .filter(|index| *index >= effective_floor);

            match (handler, async_index) {
                (Some(h), ai) if ai.map_or(true, |ai| h.frame_index >= ai) => {
                    self.state.handlers.pop();
                    self.state.frames.truncate(h.frame_index + 1);
                    self.close_upvalues(h.stack_depth);
                    self.state.stack.truncate(h.stack_depth);
                    self.state.stack.push(value);
                    self.state
                        .frames
                        .last_mut()
                        .expect("handler frame")
                        .ip = h.catch_ip;
                    return UnwindOutcome::Handled;
                }
                (Some(h), None) => {
                    self.state.handlers.pop();
                    self.state.frames.truncate(h.frame_index + 1);
                    self.close_upvalues(h.stack_depth);
                    self.state.stack.truncate(h.stack_depth);
                    self.state.stack.push(value);
                    self.state
                        .frames
                        .last_mut()
                        .expect("handler frame")
                        .ip = h.catch_ip;
                    return UnwindOutcome::Handled;
                }
                (_, Some(ai)) => {
                    let base = self.state.frames[ai].stack_base;
                    let promise = self.state.frames[ai]
                        .async_promise
                        .clone()
                        .expect("async frame has promise");
                    self.close_upvalues(base);
                    self.state.stack.truncate(base);
                    self.state.frames.truncate(ai);
                    self.state.handlers.retain(|h| h.frame_index < ai);
                    self.reject_promise(promise, value);
                    return UnwindOutcome::Handled;
                }
                (None, None) => {
                    if let Some(generator) = self.active_coroutines.pop() {
                        // Abandon the coroutine and rethrow in its caller.
                        let caller = {
                            let mut generator = generator.borrow_mut();
                            generator.state = GeneratorState::Done;
                            generator.exec = None;
                            generator.caller.take().expect("running coroutine caller")
                        };
                        self.state = caller;
                        continue;
                    }
                    return UnwindOutcome::Unhandled;
                }
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Dispatch
    // ══════════════════════════════════════════════════════════════════════

    fn step(&mut self) -> Result<Control, RuntimeError> {
        let (opcode, span) = {
            let frame = self.state.frames.last_mut().expect("active frame");
            let chunk = &frame.closure.function.chunk;
            if frame.ip >= chunk.code.len() {
                return Err(RuntimeError::StackUnderflow { span: Span::dummy() });
            }
            let byte = chunk.code[frame.ip];
            let span = chunk.span_for_offset(frame.ip);
            frame.ip += 1;
            match Opcode::from_u8(byte) {
                Some(opcode) => (opcode, span),
                None => return Err(RuntimeError::UnknownOpcode { byte, span }),
            }
        };

        match opcode {
            // ===== Literals / stack =====
            Opcode::Constant => {
                let index = self.read_byte();
                let value = self.constant(index, span)?;
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::Null => {
                self.push(Value::Null);
                Ok(Control::Continue)
            }
            Opcode::True => {
                self.push(Value::Bool(true));
                Ok(Control::Continue)
            }
            Opcode::False => {
                self.push(Value::Bool(false));
                Ok(Control::Continue)
            }
            Opcode::Pop => {
                self.pop(span)?;
                Ok(Control::Continue)
            }
            Opcode::Dup => {
                let value = self.peek(0).clone();
                self.push(value);
                Ok(Control::Continue)
            }

            // ===== Arithmetic / comparison =====
            Opcode::Add => {
                let b = self.pop(span)?;
                let a = self.pop(span)?;
                let result = match (&a, &b) {
                    (Value::String(_), _) | (_, Value::String(_)) => Value::string(format!(
                        "{}{}",
                        a.to_display_string(),
                        b.to_display_string()
                    )),
                    (Value::Number(x), Value::Number(y)) => Value::Number(x + y),
                    _ => {
                        return Err(RuntimeError::TypeError {
                            msg: format!("cannot add {} and {}", a.type_name(), b.type_name()),
                            span,
                        })
                    }
                };
                self.push(result);
                Ok(Control::Continue)
            }
            Opcode::Subtract => self.numeric_binary(span, |a, b| a - b),
            Opcode::Multiply => self.numeric_binary(span, |a, b| a * b),
            Opcode::Divide => {
                let b = self.pop_number(span)?;
                let a = self.pop_number(span)?;
                if b == 0.0 {
                    return Err(RuntimeError::DivisionByZero { span });
                }
                self.push(Value::Number(a / b));
                Ok(Control::Continue)
            }
            Opcode::Modulo => {
                let b = self.pop_number(span)?;
                let a = self.pop_number(span)?;
                if b == 0.0 {
                    return Err(RuntimeError::DivisionByZero { span });
                }
                self.push(Value::Number(a % b));
                Ok(Control::Continue)
            }
            Opcode::Power => self.numeric_binary(span, f64::powf),
            Opcode::Equal => {
                let b = self.pop(span)?;
                let a = self.pop(span)?;
                self.push(Value::Bool(a.equals(&b)));
                Ok(Control::Continue)
            }
            Opcode::NotEqual => {
                let b = self.pop(span)?;
                let a = self.pop(span)?;
                self.push(Value::Bool(!a.equals(&b)));
                Ok(Control::Continue)
            }
            Opcode::Greater => self.numeric_compare(span, |a, b| a > b),
            Opcode::Less => self.numeric_compare(span, |a, b| a < b),
            Opcode::GreaterEqual => self.numeric_compare(span, |a, b| a >= b),
            Opcode::LessEqual => self.numeric_compare(span, |a, b| a <= b),
            Opcode::Negate => {
                let n = self.pop_number(span)?;
                self.push(Value::Number(-n));
                Ok(Control::Continue)
            }
            Opcode::Not => {
                let value = self.pop(span)?;
                self.push(Value::Bool(value.is_falsy()));
                Ok(Control::Continue)
            }

            // ===== Variables =====
            Opcode::GetGlobal => {
                let index = self.read_byte();
                let name = self.constant_name(index, span)?;
                match self.globals.get(&name) {
                    Some(value) => {
                        let value = value.clone();
                        self.push(value);
                        Ok(Control::Continue)
                    }
                    None => Err(RuntimeError::UndefinedVariable { name, span }),
                }
            }
            Opcode::SetGlobal => {
                let index = self.read_byte();
                let name = self.constant_name(index, span)?;
                if !self.globals.contains_key(&name) {
                    return Err(RuntimeError::UndefinedVariable { name, span });
                }
                let value = self.peek(0).clone();
                self.globals.insert(name, value);
                Ok(Control::Continue)
            }
            Opcode::DefineGlobal => {
                let index = self.read_byte();
                let name = self.constant_name(index, span)?;
                let value = self.pop(span)?;
                self.globals.insert(name, value);
                Ok(Control::Continue)
            }
            Opcode::GetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().stack_base;
                let value = self
                    .state
                    .stack
                    .get(base + slot)
                    .cloned()
                    .ok_or(RuntimeError::StackUnderflow { span })?;
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::SetLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().stack_base;
                let value = self.peek(0).clone();
                match self.state.stack.get_mut(base + slot) {
                    Some(target) => {
                        *target = value;
                        Ok(Control::Continue)
                    }
                    None => Err(RuntimeError::StackUnderflow { span }),
                }
            }
            Opcode::GetUpvalue => {
                let index = self.read_byte() as usize;
                let cell = self.upvalue_cell(index);
                let value = {
                    let cell = cell.borrow();
                    match &*cell {
                        Upvalue::Open(location) => self.state.stack[*location].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    }
                };
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::SetUpvalue => {
                let index = self.read_byte() as usize;
                let cell = self.upvalue_cell(index);
                let value = self.peek(0).clone();
                let mut cell = cell.borrow_mut();
                match &mut *cell {
                    Upvalue::Open(location) => self.state.stack[*location] = value,
                    Upvalue::Closed(slot) => *slot = value,
                }
                Ok(Control::Continue)
            }
            Opcode::IncLocal | Opcode::DecLocal => {
                let slot = self.read_byte() as usize;
                let base = self.frame().stack_base;
                let delta = if opcode == Opcode::IncLocal { 1.0 } else { -1.0 };
                let updated = match self.state.stack.get(base + slot) {
                    Some(Value::Number(n)) => n + delta,
                    Some(other) => {
                        return Err(RuntimeError::TypeError {
                            msg: format!("cannot increment {}", other.type_name()),
                            span,
                        })
                    }
                    None => return Err(RuntimeError::StackUnderflow { span }),
                };
                self.state.stack[base + slot] = Value::Number(updated);
                self.push(Value::Number(updated));
                Ok(Control::Continue)
            }
            Opcode::IncGlobal | Opcode::DecGlobal => {
                let index = self.read_byte();
                let name = self.constant_name(index, span)?;
                let delta = if opcode == Opcode::IncGlobal { 1.0 } else { -1.0 };
                let updated = match self.globals.get(&name) {
                    Some(Value::Number(n)) => n + delta,
                    Some(other) => {
                        return Err(RuntimeError::TypeError {
                            msg: format!("cannot increment {}", other.type_name()),
                            span,
                        })
                    }
                    None => return Err(RuntimeError::UndefinedVariable { name, span }),
                };
                self.globals.insert(name, Value::Number(updated));
                self.push(Value::Number(updated));
                Ok(Control::Continue)
            }
            Opcode::IncUpvalue | Opcode::DecUpvalue => {
                let index = self.read_byte() as usize;
                let cell = self.upvalue_cell(index);
                let delta = if opcode == Opcode::IncUpvalue { 1.0 } else { -1.0 };
                let current = {
                    let cell = cell.borrow();
                    match &*cell {
                        Upvalue::Open(location) => self.state.stack[*location].clone(),
                        Upvalue::Closed(value) => value.clone(),
                    }
                };
                let Value::Number(n) = current else {
                    return Err(RuntimeError::TypeError {
                        msg: format!("cannot increment {}", current.type_name()),
                        span,
                    });
                };
                let updated = Value::Number(n + delta);
                {
                    let mut cell = cell.borrow_mut();
                    match &mut *cell {
                        Upvalue::Open(location) => {
                            self.state.stack[*location] = updated.clone()
                        }
                        Upvalue::Closed(slot) => *slot = updated.clone(),
                    }
                }
                self.push(updated);
                Ok(Control::Continue)
            }

            // ===== Control flow =====
            Opcode::Jump => {
                let offset = self.read_u16() as usize;
                self.frame_mut().ip += offset;
                Ok(Control::Continue)
            }
            Opcode::JumpIfFalse => {
                let offset = self.read_u16() as usize;
                if self.peek(0).is_falsy() {
                    self.frame_mut().ip += offset;
                }
                Ok(Control::Continue)
            }
            Opcode::Loop => {
                let offset = self.read_u16() as usize;
                self.frame_mut().ip -= offset;
                Ok(Control::Continue)
            }

            // ===== Exceptions =====
            Opcode::SetupTry => {
                let offset = self.read_u16() as usize;
                let catch_ip = self.frame().ip + offset;
                let handler = ExceptionHandler {
                    catch_ip,
                    stack_depth: self.state.stack.len(),
                    frame_index: self.state.frames.len() - 1,
                };
                self.state.handlers.push(handler);
                Ok(Control::Continue)
            }
            Opcode::PopCatch => {
                self.state.handlers.pop();
                Ok(Control::Continue)
            }
            Opcode::Throw => {
                let value = self.pop(span)?;
                Err(RuntimeError::Thrown { value, span })
            }

            // ===== Calls =====
            Opcode::Call => {
                let argc = self.read_byte() as usize;
                self.call_value(argc, span)
            }
            Opcode::CallMethod => {
                let name_index = self.read_byte();
                let argc = self.read_byte() as usize;
                let name = self.constant_name(name_index, span)?;
                self.call_method(&name, argc, span)
            }
            Opcode::Return => self.do_return(span),
            Opcode::Closure => self.make_closure(span),
            Opcode::CloseUpvalue => {
                if self.state.stack.is_empty() {
                    return Err(RuntimeError::StackUnderflow { span });
                }
                let top = self.state.stack.len() - 1;
                self.close_upvalues(top);
                self.pop(span)?;
                Ok(Control::Continue)
            }

            // ===== Async / coroutines =====
            Opcode::Yield => self.do_yield(span),
            Opcode::Await => self.do_await(span),

            // ===== Interop / objects =====
            Opcode::GetNative => {
                let index = self.read_byte();
                let name = self.constant_name(index, span)?;
                match self.globals.get(&name) {
                    Some(value) => {
                        let value = value.clone();
                        self.push(value);
                        Ok(Control::Continue)
                    }
                    None => Err(RuntimeError::UndefinedVariable { name, span }),
                }
            }
            Opcode::SetPrototype => {
                let prototype = self.pop(span)?;
                let target = self.peek(0).clone();
                let Value::Object(object) = target else {
                    return Err(RuntimeError::TypeError {
                        msg: format!("cannot set prototype of {}", target.type_name()),
                        span,
                    });
                };
                object.borrow_mut().prototype = match prototype {
                    Value::Object(proto) => Some(proto),
                    Value::Null => None,
                    other => {
                        return Err(RuntimeError::TypeError {
                            msg: format!(
                                "prototype must be object or null, got {}",
                                other.type_name()
                            ),
                            span,
                        })
                    }
                };
                Ok(Control::Continue)
            }
            Opcode::NewArray => {
                let count = self.read_byte() as usize;
                let items = self.pop_args(count, span)?;
                self.push(Value::array(items));
                Ok(Control::Continue)
            }
            Opcode::NewObject => {
                let pairs = self.read_byte() as usize;
                let flat = self.pop_args(pairs * 2, span)?;
                let mut object = Object::new();
                for pair in flat.chunks_exact(2) {
                    let key = index_key(&pair[0], span)?;
                    object.set(&key, pair[1].clone());
                }
                self.push(Value::object(object));
                Ok(Control::Continue)
            }
            Opcode::GetIndex => {
                let index = self.pop(span)?;
                let container = self.pop(span)?;
                let value = self.index_get(&container, &index, span)?;
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::SetIndex => {
                let value = self.pop(span)?;
                let index = self.pop(span)?;
                let container = self.pop(span)?;
                self.index_set(&container, &index, value.clone(), span)?;
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::GetProp => {
                let name_index = self.read_byte();
                let name = self.constant_name(name_index, span)?;
                let object = self.pop(span)?;
                let value = self.property_get(&object, &name, span)?;
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::SetProp => {
                let name_index = self.read_byte();
                let name = self.constant_name(name_index, span)?;
                let value = self.pop(span)?;
                let object = self.pop(span)?;
                match &object {
                    Value::Object(obj) => obj.borrow_mut().set(&name, value.clone()),
                    Value::Native(native) => {
                        if !native.set_property(&name, value.clone()) {
                            return Err(RuntimeError::TypeError {
                                msg: format!(
                                    "{} does not accept property writes",
                                    native.type_name()
                                ),
                                span,
                            });
                        }
                    }
                    other => {
                        return Err(RuntimeError::TypeError {
                            msg: format!("cannot set property on {}", other.type_name()),
                            span,
                        })
                    }
                }
                self.push(value);
                Ok(Control::Continue)
            }
            Opcode::ObjectCreate => {
                let prototype = self.pop(span)?;
                let prototype = match prototype {
                    Value::Object(proto) => Some(proto),
                    Value::Null => None,
                    other => {
                        return Err(RuntimeError::TypeError {
                            msg: format!(
                                "prototype must be object or null, got {}",
                                other.type_name()
                            ),
                            span,
                        })
                    }
                };
                self.push(Value::object(Object::with_prototype(prototype)));
                Ok(Control::Continue)
            }
            Opcode::GetPrototype => {
                let value = self.pop(span)?;
                let Value::Closure(closure) = value else {
                    return Err(RuntimeError::TypeError {
                        msg: format!("{} has no prototype", value.type_name()),
                        span,
                    });
                };
                let prototype = closure
                    .prototype
                    .borrow_mut()
                    .get_or_insert_with(|| Rc::new(RefCell::new(Object::new())))
                    .clone();
                self.push(Value::Object(prototype));
                Ok(Control::Continue)
            }
            Opcode::New => {
                let argc = self.read_byte() as usize;
                self.construct(argc, span)
            }
            Opcode::IncProp | Opcode::DecProp => {
                let name_index = self.read_byte();
                let mode = self.read_byte();
                let name = self.constant_name(name_index, span)?;
                let delta = if opcode == Opcode::IncProp { 1.0 } else { -1.0 };
                self.property_update(&name, delta, mode, span)
            }
        }
    }

    // ══════════════════════════════════════════════════════════════════════
    // Calls and returns
    // ══════════════════════════════════════════════════════════════════════

    fn call_value(&mut self, argc: usize, span: Span) -> Result<Control, RuntimeError> {
        let callee = self.peek(argc).clone();
        match callee {
            Value::Closure(closure) => {
                if closure.function.arity != argc {
                    return Err(RuntimeError::ArityMismatch {
                        name: closure.function.name.clone(),
                        expected: closure.function.arity,
                        got: argc,
                        span,
                    });
                }
                if closure.function.is_async {
                    let args = self.pop_args(argc, span)?;
                    self.pop(span)?; // callee
                    let promise = Promise::pending();
                    self.microtasks.push_back(Microtask::Call {
                        callee: Value::Closure(closure),
                        args,
                        receiver: None,
                        promise: Some(promise.clone()),
                    });
                    self.push(Value::Promise(promise));
                    return Ok(Control::Continue);
                }
                if closure.function.is_generator {
                    let args = self.pop_args(argc, span)?;
                    let callee = self.pop(span)?;
                    let generator = Generator::new(closure, callee, args);
                    self.push(Value::Generator(Rc::new(RefCell::new(generator))));
                    return Ok(Control::Continue);
                }
                self.push_call_frame(closure, argc, span)
            }
            Value::Native(native) => {
                let args = self.pop_args(argc, span)?;
                self.pop(span)?; // the native itself
                let result = native.call(self, args, span)?;
                self.push(result);
                Ok(Control::Continue)
            }
            other => Err(RuntimeError::NotCallable {
                msg: format!("cannot call {}", other.type_name()),
                span,
            }),
        }
    }

    fn push_call_frame(
        &mut self,
        closure: Rc<Closure>,
        argc: usize,
        span: Span,
    ) -> Result<Control, RuntimeError> {
        if self.state.frames.len() >= self.config.max_frames {
            return Err(RuntimeError::StackOverflow { span });
        }
        let base = self.state.stack.len() - argc - 1;
        self.state
            .frames
            .push(CallFrame::new(closure, base, FrameKind::Call));
        Ok(Control::Continue)
    }

    /// CALL_METHOD: dispatch on the receiver at depth `argc`.
    fn call_method(&mut self, name: &str, argc: usize, span: Span) -> Result<Control, RuntimeError> {
        let receiver = self.peek(argc).clone();
        match receiver {
            Value::Native(native) => {
                let args = self.pop_args(argc, span)?;
                self.pop(span)?;
                let result = native.call_method(self, name, args, span)?;
                self.push(result);
                Ok(Control::Continue)
            }
            Value::Promise(promise) => {
                let args = self.pop_args(argc, span)?;
                self.pop(span)?;
                let derived = match name {
                    "then" => self.promise_then_script(
                        promise,
                        callable_opt(args.first()),
                        callable_opt(args.get(1)),
                    ),
                    "catch" => {
                        self.promise_then_script(promise, None, callable_opt(args.first()))
                    }
                    other => {
                        return Err(RuntimeError::TypeError {
                            msg: format!("promise has no method '{other}'"),
                            span,
                        })
                    }
                };
                self.push(Value::Promise(derived));
                Ok(Control::Continue)
            }
            Value::Generator(generator) => self.generator_method(generator, name, argc, span),
            Value::Array(items) => self.array_method(items, name, argc, span),
            Value::Object(object) => {
                let method = object.borrow().lookup(name);
                match method {
                    Some(Value::Closure(closure)) => {
                        if closure.function.arity != argc {
                            return Err(RuntimeError::ArityMismatch {
                                name: closure.function.name.clone(),
                                expected: closure.function.arity,
                                got: argc,
                                span,
                            });
                        }
                        if closure.function.is_async {
                            let args = self.pop_args(argc, span)?;
                            let receiver = self.pop(span)?;
                            let promise = Promise::pending();
                            self.microtasks.push_back(Microtask::Call {
                                callee: Value::Closure(closure),
                                args,
                                receiver: Some(receiver),
                                promise: Some(promise.clone()),
                            });
                            self.push(Value::Promise(promise));
                            return Ok(Control::Continue);
                        }
                        if closure.function.is_generator {
                            let args = self.pop_args(argc, span)?;
                            let receiver = self.pop(span)?;
                            let generator = Generator::new(closure, receiver, args);
                            self.push(Value::Generator(Rc::new(RefCell::new(generator))));
                            return Ok(Control::Continue);
                        }
                        // Receiver already sits in the callee slot: it
                        // becomes `this` (slot 0) of the new frame.
                        self.push_call_frame(closure, argc, span)
                    }
                    Some(Value::Native(native)) => {
                        let args = self.pop_args(argc, span)?;
                        self.pop(span)?;
                        let result = native.call(self, args, span)?;
                        self.push(result);
                        Ok(Control::Continue)
                    }
                    Some(other) => Err(RuntimeError::NotCallable {
                        msg: format!("property '{name}' is not a function ({})", other.type_name()),
                        span,
                    }),
                    None => Err(RuntimeError::TypeError {
                        msg: format!("undefined method '{name}'"),
                        span,
                    }),
                }
            }
            Value::Null => Err(RuntimeError::TypeError {
                msg: format!("cannot call method '{name}' on null"),
                span,
            }),
            other => Err(RuntimeError::TypeError {
                msg: format!("cannot call method '{name}' on {}", other.type_name()),
                span,
            }),
        }
    }

    fn construct(&mut self, argc: usize, span: Span) -> Result<Control, RuntimeError> {
        let callee = self.peek(argc).clone();
        match callee {
            // `new Promise(executor)` builds a VM promise; the executor runs
            // synchronously with host resolve/reject functions.
            Value::Native(native) if native.type_name() == "Promise" => {
                if argc != 1 {
                    return Err(RuntimeError::TypeError {
                        msg: format!("Promise constructor expects 1 executor argument, got {argc}"),
                        span,
                    });
                }
                let mut args = self.pop_args(argc, span)?;
                self.pop(span)?;
                let executor = args.remove(0);
                let promise = Promise::pending();
                let resolve = {
                    let promise = promise.clone();
                    NativeFunction::value("resolve", move |vm, args, _span| {
                        vm.resolve_promise(
                            promise.clone(),
                            args.first().cloned().unwrap_or(Value::Null),
                        );
                        Ok(Value::Null)
                    })
                };
                let reject = {
                    let promise = promise.clone();
                    NativeFunction::value("reject", move |vm, args, _span| {
                        vm.reject_promise(
                            promise.clone(),
                            args.first().cloned().unwrap_or(Value::Null),
                        );
                        Ok(Value::Null)
                    })
                };
                if let Err(err) = self.call_callable_sync(executor, vec![resolve, reject]) {
                    let reason = err.to_value();
                    self.reject_promise(promise.clone(), reason);
                }
                self.push(Value::Promise(promise));
                Ok(Control::Continue)
            }
            Value::Closure(closure) => {
                if closure.function.is_async || closure.function.is_generator {
                    return Err(RuntimeError::NotCallable {
                        msg: format!("cannot construct with {}", closure.function.name),
                        span,
                    });
                }
                if closure.function.arity != argc {
                    return Err(RuntimeError::ArityMismatch {
                        name: closure.function.name.clone(),
                        expected: closure.function.arity,
                        got: argc,
                        span,
                    });
                }
                let prototype = closure
                    .prototype
                    .borrow_mut()
                    .get_or_insert_with(|| Rc::new(RefCell::new(Object::new())))
                    .clone();
                let instance = Value::object(Object::with_prototype(Some(prototype)));
                let base = self.state.stack.len() - argc - 1;
                // The instance replaces the callee slot and becomes `this`.
                self.state.stack[base] = instance;
                self.push_call_frame(closure, argc, span)
            }
            other => Err(RuntimeError::NotCallable {
                msg: format!("cannot construct {}", other.type_name()),
                span,
            }),
        }
    }

    fn do_return(&mut self, span: Span) -> Result<Control, RuntimeError> {
        let value = self.pop(span)?;
        let frame = self.state.frames.pop().expect("returning frame");

        // A coroutine's outermost frame returning finishes the generator.
        if self.state.frames.is_empty() && !self.active_coroutines.is_empty() {
            self.close_upvalues(0);
            let generator = self.active_coroutines.pop().expect("active coroutine");
            let caller = {
                let mut generator = generator.borrow_mut();
                generator.state = GeneratorState::Done;
                generator.exec = None;
                generator.caller.take().expect("running coroutine caller")
            };
            self.state = caller;
            let result = iter_result(value, true);
            self.push(result);
            return Ok(Control::Continue);
        }

        self.close_upvalues(frame.stack_base);
        self.state.stack.truncate(frame.stack_base);
        if let Some(promise) = frame.async_promise {
            self.resolve_promise(promise, value.clone());
        }
        match frame.kind {
            FrameKind::Main => self.result = value,
            FrameKind::Task => {}
            FrameKind::Call => self.push(value),
        }
        Ok(Control::Continue)
    }

    fn make_closure(&mut self, span: Span) -> Result<Control, RuntimeError> {
        let index = self.read_byte();
        let function = match self.constant(index, span)? {
            Value::Function(function) => function,
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!("CLOSURE operand is not a function ({})", other.type_name()),
                    span,
                })
            }
        };
        let base = self.frame().stack_base;
        let mut upvalues = Vec::with_capacity(function.upvalues.len());
        for _ in 0..function.upvalues.len() {
            let is_local = self.read_byte() != 0;
            let slot = self.read_byte() as usize;
            if is_local {
                upvalues.push(self.capture_upvalue(base + slot));
            } else {
                let cell = self
                    .frame()
                    .closure
                    .upvalues
                    .get(slot)
                    .cloned()
                    .ok_or(RuntimeError::TypeError {
                        msg: "closure inherits a missing upvalue".to_string(),
                        span,
                    })?;
                upvalues.push(cell);
            }
        }
        self.push(Value::Closure(Rc::new(Closure::new(function, upvalues))));
        Ok(Control::Continue)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Coroutines
    // ══════════════════════════════════════════════════════════════════════

    fn do_yield(&mut self, span: Span) -> Result<Control, RuntimeError> {
        let value = self.pop(span)?;
        let Some(generator) = self.active_coroutines.pop() else {
            return Err(RuntimeError::TypeError {
                msg: "yield outside of a running generator".to_string(),
                span,
            });
        };
        let caller = generator
            .borrow_mut()
            .caller
            .take()
            .expect("running coroutine caller");
        let exec = std::mem::replace(&mut self.state, caller);
        {
            let mut generator = generator.borrow_mut();
            generator.exec = Some(exec);
            generator.state = GeneratorState::Suspended;
        }
        let result = iter_result(value, false);
        self.push(result);
        Ok(Control::Yield)
    }

    fn do_await(&mut self, _span: Span) -> Result<Control, RuntimeError> {
        let Value::Promise(promise) = self.peek(0).clone() else {
            // Non-promise: synchronous pass-through.
            return Ok(Control::Continue);
        };
        let frame = self.state.frames.pop().expect("awaiting frame");
        let base = frame.stack_base;
        let region = self.state.stack.split_off(base);

        // Detach open upvalues into the region; the shared cells keep
        // closure identity across the move.
        let mut kept = Vec::new();
        let mut detached = Vec::new();
        for cell in std::mem::take(&mut self.state.open_upvalues) {
            let location = cell.borrow().location();
            match location {
                Some(location) if location >= base => detached.push((location - base, cell)),
                _ => kept.push(cell),
            }
        }
        self.state.open_upvalues = kept;

        // Detach handlers installed by the suspending frame.
        let frame_index = self.state.frames.len();
        let mut handlers = Vec::new();
        while let Some(&handler) = self.state.handlers.last() {
            if handler.frame_index < frame_index {
                break;
            }
            self.state.handlers.pop();
            handlers.push((handler.catch_ip, handler.stack_depth - base));
        }
        handlers.reverse();

        let suspended = SuspendedFrame {
            frame,
            region,
            upvalues: detached,
            handlers,
        };
        let continuation: Box<dyn FnOnce(&mut Vm, Result<Value, Value>)> =
            Box::new(move |vm, outcome| vm.resume_suspended(suspended, outcome));
        self.promise_then_native(promise, continuation);
        Ok(Control::Yield)
    }

    fn generator_method(
        &mut self,
        generator: Rc<RefCell<Generator>>,
        name: &str,
        argc: usize,
        span: Span,
    ) -> Result<Control, RuntimeError> {
        let mut args = self.pop_args(argc, span)?;
        self.pop(span)?; // receiver
        let argument = if args.is_empty() {
            Value::Null
        } else {
            args.remove(0)
        };
        let state = generator.borrow().state;
        match name {
            "next" => match state {
                GeneratorState::Done => {
                    let result = iter_result(Value::Null, true);
                    self.push(result);
                    Ok(Control::Continue)
                }
                GeneratorState::Running => Err(RuntimeError::TypeError {
                    msg: "generator is already running".to_string(),
                    span,
                }),
                GeneratorState::Suspended => {
                    let resume = self.enter_coroutine(&generator);
                    if resume {
                        self.push(argument);
                    }
                    Ok(Control::Continue)
                }
            },
            "return" => match state {
                GeneratorState::Running => Err(RuntimeError::TypeError {
                    msg: "generator is already running".to_string(),
                    span,
                }),
                _ => {
                    {
                        let mut generator = generator.borrow_mut();
                        generator.state = GeneratorState::Done;
                        generator.exec = None;
                    }
                    let result = iter_result(argument, true);
                    self.push(result);
                    Ok(Control::Continue)
                }
            },
            "throw" => match state {
                GeneratorState::Running => Err(RuntimeError::TypeError {
                    msg: "generator is already running".to_string(),
                    span,
                }),
                GeneratorState::Suspended if generator.borrow().started => {
                    // Resume at the yield point and unwind from there.
                    self.enter_coroutine(&generator);
                    Err(RuntimeError::Thrown {
                        value: argument,
                        span,
                    })
                }
                _ => {
                    {
                        let mut generator = generator.borrow_mut();
                        generator.state = GeneratorState::Done;
                        generator.exec = None;
                    }
                    Err(RuntimeError::Thrown {
                        value: argument,
                        span,
                    })
                }
            },
            other => Err(RuntimeError::TypeError {
                msg: format!("generator has no method '{other}'"),
                span,
            }),
        }
    }

    /// Swap a suspended coroutine in as the current execution state.
    /// Returns true when this is a resumption (the pending `yield`
    /// expression expects a value).
    fn enter_coroutine(&mut self, generator: &Rc<RefCell<Generator>>) -> bool {
        let (exec, started) = {
            let mut gen = generator.borrow_mut();
            gen.state = GeneratorState::Running;
            (gen.exec.take().expect("suspended coroutine state"), gen.started)
        };
        let caller = std::mem::replace(&mut self.state, exec);
        {
            let mut gen = generator.borrow_mut();
            gen.caller = Some(caller);
            gen.started = true;
        }
        self.active_coroutines.push(generator.clone());
        started
    }

    // ══════════════════════════════════════════════════════════════════════
    // Properties and indexing
    // ══════════════════════════════════════════════════════════════════════

    fn property_get(
        &mut self,
        object: &Value,
        name: &str,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match object {
            Value::Object(obj) => Ok(obj.borrow().lookup(name).unwrap_or(Value::Null)),
            Value::Native(native) => Ok(native.get_property(name).unwrap_or(Value::Null)),
            Value::Array(items) => Ok(match name {
                "length" => Value::Number(items.borrow().len() as f64),
                _ => Value::Null,
            }),
            Value::String(s) => Ok(match name {
                "length" => Value::Number(s.chars().count() as f64),
                _ => Value::Null,
            }),
            Value::Closure(closure) if name == "prototype" => {
                let prototype = closure
                    .prototype
                    .borrow_mut()
                    .get_or_insert_with(|| Rc::new(RefCell::new(Object::new())))
                    .clone();
                Ok(Value::Object(prototype))
            }
            Value::Null => Err(RuntimeError::TypeError {
                msg: format!("cannot read property '{name}' of null"),
                span,
            }),
            Value::Promise(_) | Value::Generator(_) | Value::Closure(_) => Ok(Value::Null),
            other => Err(RuntimeError::TypeError {
                msg: format!("cannot read property '{name}' of {}", other.type_name()),
                span,
            }),
        }
    }

    fn index_get(
        &mut self,
        container: &Value,
        index: &Value,
        span: Span,
    ) -> Result<Value, RuntimeError> {
        match container {
            Value::Array(items) => {
                let Value::Number(n) = index else {
                    return Err(RuntimeError::TypeError {
                        msg: format!("array index must be a number, got {}", index.type_name()),
                        span,
                    });
                };
                if *n < 0.0 || n.fract() != 0.0 {
                    return Ok(Value::Null);
                }
                Ok(items.borrow().get(*n as usize).cloned().unwrap_or(Value::Null))
            }
            Value::Object(obj) => {
                let key = index_key(index, span)?;
                Ok(obj.borrow().get(&key).unwrap_or(Value::Null))
            }
            Value::String(s) => {
                let Value::Number(n) = index else {
                    return Err(RuntimeError::TypeError {
                        msg: format!("string index must be a number, got {}", index.type_name()),
                        span,
                    });
                };
                if *n < 0.0 || n.fract() != 0.0 {
                    return Ok(Value::Null);
                }
                Ok(s.chars()
                    .nth(*n as usize)
                    .map(|c| Value::string(c.to_string()))
                    .unwrap_or(Value::Null))
            }
            Value::Null => Err(RuntimeError::TypeError {
                msg: "cannot index null".to_string(),
                span,
            }),
            other => Err(RuntimeError::TypeError {
                msg: format!("cannot index {}", other.type_name()),
                span,
            }),
        }
    }

    fn index_set(
        &mut self,
        container: &Value,
        index: &Value,
        value: Value,
        span: Span,
    ) -> Result<(), RuntimeError> {
        match container {
            Value::Array(items) => {
                let Value::Number(n) = index else {
                    return Err(RuntimeError::TypeError {
                        msg: format!("array index must be a number, got {}", index.type_name()),
                        span,
                    });
                };
                if *n < 0.0 || n.fract() != 0.0 {
                    return Err(RuntimeError::TypeError {
                        msg: "array index must be a non-negative integer".to_string(),
                        span,
                    });
                }
                let position = *n as usize;
                let mut items = items.borrow_mut();
                match position.cmp(&items.len()) {
                    std::cmp::Ordering::Less => items[position] = value,
                    std::cmp::Ordering::Equal => items.push(value),
                    std::cmp::Ordering::Greater => {
                        return Err(RuntimeError::TypeError {
                            msg: format!(
                                "array index {position} out of range (length {})",
                                items.len()
                            ),
                            span,
                        })
                    }
                }
                Ok(())
            }
            Value::Object(obj) => {
                let key = index_key(index, span)?;
                obj.borrow_mut().set(&key, value);
                Ok(())
            }
            other => Err(RuntimeError::TypeError {
                msg: format!("cannot index-assign {}", other.type_name()),
                span,
            }),
        }
    }

    /// INC_PROP / DEC_PROP: bump a numeric own property in place.
    fn property_update(
        &mut self,
        name: &str,
        delta: f64,
        mode: u8,
        span: Span,
    ) -> Result<Control, RuntimeError> {
        let target = self.peek(0).clone();
        let Value::Object(object) = target else {
            return Err(RuntimeError::TypeError {
                msg: format!("increment target must be an object, got {}", target.type_name()),
                span,
            });
        };
        let old = match object.borrow().get(name) {
            Some(Value::Number(n)) => n,
            Some(other) => {
                return Err(RuntimeError::TypeError {
                    msg: format!("property '{name}' is not a number ({})", other.type_name()),
                    span,
                })
            }
            None => {
                return Err(RuntimeError::TypeError {
                    msg: format!("no numeric property '{name}' to increment"),
                    span,
                })
            }
        };
        let new = old + delta;
        object.borrow_mut().set(name, Value::Number(new));
        match mode {
            update_mode::POSTFIX => {
                self.pop(span)?;
                self.push(Value::Number(old));
            }
            update_mode::PREFIX => {
                self.pop(span)?;
                self.push(Value::Number(new));
            }
            update_mode::DISCARD => {}
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!("invalid increment mode {other}"),
                    span,
                })
            }
        }
        Ok(Control::Continue)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Array intrinsics
    // ══════════════════════════════════════════════════════════════════════

    fn array_method(
        &mut self,
        items: Rc<RefCell<Vec<Value>>>,
        name: &str,
        argc: usize,
        span: Span,
    ) -> Result<Control, RuntimeError> {
        let args = self.pop_args(argc, span)?;
        self.pop(span)?; // receiver
        let result = match name {
            "push" => {
                let mut items = items.borrow_mut();
                items.extend(args);
                Value::Number(items.len() as f64)
            }
            "pop" => items.borrow_mut().pop().unwrap_or(Value::Null),
            "indexOf" => {
                let target = args.first().cloned().unwrap_or(Value::Null);
                items
                    .borrow()
                    .iter()
                    .position(|item| item.equals(&target))
                    .map(|i| Value::Number(i as f64))
                    .unwrap_or(Value::Number(-1.0))
            }
            "join" => {
                let separator = match args.first() {
                    Some(Value::String(s)) => s.as_ref().clone(),
                    _ => ",".to_string(),
                };
                let parts: Vec<String> = items
                    .borrow()
                    .iter()
                    .map(Value::to_display_string)
                    .collect();
                Value::string(parts.join(&separator))
            }
            "map" => {
                let Some(callback) = args.first().cloned() else {
                    return Err(RuntimeError::TypeError {
                        msg: "map expects a callback".to_string(),
                        span,
                    });
                };
                // Snapshot so the callback can safely mutate the array.
                let snapshot = items.borrow().clone();
                let mut mapped = Vec::with_capacity(snapshot.len());
                for item in snapshot {
                    mapped.push(self.call_callable_sync(callback.clone(), vec![item])?);
                }
                Value::array(mapped)
            }
            other => {
                return Err(RuntimeError::TypeError {
                    msg: format!("array has no method '{other}'"),
                    span,
                })
            }
        };
        self.push(result);
        Ok(Control::Continue)
    }

    // ══════════════════════════════════════════════════════════════════════
    // Upvalues
    // ══════════════════════════════════════════════════════════════════════

    /// Find or create the open upvalue for a stack slot; all closures over
    /// the same slot share one cell.
    fn capture_upvalue(&mut self, location: usize) -> Rc<RefCell<Upvalue>> {
        for cell in &self.state.open_upvalues {
            match cell.borrow().location() {
                Some(existing) if existing == location => return cell.clone(),
                Some(existing) if existing < location => break,
                _ => {}
            }
        }
        let cell = Rc::new(RefCell::new(Upvalue::Open(location)));
        self.insert_open_upvalue(location, cell.clone());
        cell
    }

    /// Keep the open list sorted by descending stack location.
    fn insert_open_upvalue(&mut self, location: usize, cell: Rc<RefCell<Upvalue>>) {
        let position = self
            .state
            .open_upvalues
            .iter()
            .position(|existing| {
                existing
                    .borrow()
                    .location()
                    .map_or(true, |existing| existing < location)
            })
            .unwrap_or(self.state.open_upvalues.len());
        self.state.open_upvalues.insert(position, cell);
    }

    /// Close every open upvalue at or above `from`: move the stack value
    /// into the cell and drop it from the open list.
    fn close_upvalues(&mut self, from: usize) {
        while let Some(cell) = self.state.open_upvalues.first().cloned() {
            let location = cell.borrow().location();
            match location {
                Some(location) if location >= from => {
                    let value = self
                        .state
                        .stack
                        .get(location)
                        .cloned()
                        .unwrap_or(Value::Null);
                    *cell.borrow_mut() = Upvalue::Closed(value);
                    self.state.open_upvalues.remove(0);
                }
                _ => break,
            }
        }
    }

    fn upvalue_cell(&self, index: usize) -> Rc<RefCell<Upvalue>> {
        self.frame().closure.upvalues[index].clone()
    }

    // ══════════════════════════════════════════════════════════════════════
    // Stack and operand helpers
    // ══════════════════════════════════════════════════════════════════════

    fn frame(&self) -> &CallFrame {
        self.state.frames.last().expect("active frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.state.frames.last_mut().expect("active frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.state.frames.last_mut().expect("active frame");
        let byte = frame.closure.function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let frame = self.state.frames.last_mut().expect("active frame");
        let value = frame.closure.function.chunk.read_u16(frame.ip);
        frame.ip += 2;
        value
    }

    fn constant(&self, index: u8, span: Span) -> Result<Value, RuntimeError> {
        self.frame()
            .closure
            .function
            .chunk
            .constants
            .get(index as usize)
            .cloned()
            .ok_or(RuntimeError::TypeError {
                msg: format!("constant index {index} out of range"),
                span,
            })
    }

    fn constant_name(&self, index: u8, span: Span) -> Result<String, RuntimeError> {
        match self.constant(index, span)? {
            Value::String(name) => Ok(name.as_ref().clone()),
            other => Err(RuntimeError::TypeError {
                msg: format!("expected string constant, got {}", other.type_name()),
                span,
            }),
        }
    }

    fn push(&mut self, value: Value) {
        self.state.stack.push(value);
    }

    fn pop(&mut self, span: Span) -> Result<Value, RuntimeError> {
        self.state
            .stack
            .pop()
            .ok_or(RuntimeError::StackUnderflow { span })
    }

    fn peek(&self, distance: usize) -> &Value {
        let len = self.state.stack.len();
        &self.state.stack[len - 1 - distance]
    }

    fn pop_number(&mut self, span: Span) -> Result<f64, RuntimeError> {
        match self.pop(span)? {
            Value::Number(n) => Ok(n),
            other => Err(RuntimeError::TypeError {
                msg: format!("expected a number, got {}", other.type_name()),
                span,
            }),
        }
    }

    /// Pop the top `count` values preserving their order
    fn pop_args(&mut self, count: usize, span: Span) -> Result<Vec<Value>, RuntimeError> {
        if self.state.stack.len() < count {
            return Err(RuntimeError::StackUnderflow { span });
        }
        let at = self.state.stack.len() - count;
        Ok(self.state.stack.split_off(at))
    }

    fn numeric_binary(
        &mut self,
        span: Span,
        op: impl Fn(f64, f64) -> f64,
    ) -> Result<Control, RuntimeError> {
        let b = self.pop_number(span)?;
        let a = self.pop_number(span)?;
        self.push(Value::Number(op(a, b)));
        Ok(Control::Continue)
    }

    fn numeric_compare(
        &mut self,
        span: Span,
        op: impl Fn(f64, f64) -> bool,
    ) -> Result<Control, RuntimeError> {
        let b = self.pop_number(span)?;
        let a = self.pop_number(span)?;
        self.push(Value::Bool(op(a, b)));
        Ok(Control::Continue)
    }
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(VmConfig::default())
    }
}

/// Truncate or null-pad a host-provided argument list to a closure's arity
fn adapt_args(args: &mut Vec<Value>, arity: usize) {
    args.truncate(arity);
    while args.len() < arity {
        args.push(Value::Null);
    }
}

/// `{value, done}` iterator result object
fn iter_result(value: Value, done: bool) -> Value {
    let mut object = Object::new();
    object.set("value", value);
    object.set("done", Value::Bool(done));
    Value::object(object)
}

/// Callback slots in `.then`/`.catch` accept callables; anything else is
/// treated as absent.
fn callable_opt(value: Option<&Value>) -> Option<Value> {
    match value {
        Some(value @ (Value::Closure(_) | Value::Native(_))) => Some(value.clone()),
        _ => None,
    }
}

/// Object index keys are strings; numbers convert through their printed form
fn index_key(index: &Value, span: Span) -> Result<String, RuntimeError> {
    match index {
        Value::String(key) => Ok(key.as_ref().clone()),
        Value::Number(n) => Ok(crate::value::format_number(*n)),
        other => Err(RuntimeError::TypeError {
            msg: format!("invalid property key of type {}", other.type_name()),
            span,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::Chunk;
    use pretty_assertions::assert_eq;

    fn run_chunk(build: impl FnOnce(&mut Chunk)) -> Interpretation {
        let mut function = FunctionObject::new("<script>", 0);
        build(&mut function.chunk);
        let mut vm = Vm::default();
        vm.interpret(Rc::new(function))
    }

    #[test]
    fn test_arithmetic_chunk() {
        // return 1 + 2 * 3;
        let outcome = run_chunk(|chunk| {
            let one = chunk.add_constant(Value::Number(1.0)).unwrap();
            let two = chunk.add_constant(Value::Number(2.0)).unwrap();
            let three = chunk.add_constant(Value::Number(3.0)).unwrap();
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(one);
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(two);
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(three);
            chunk.emit(Opcode::Multiply, Span::dummy());
            chunk.emit(Opcode::Add, Span::dummy());
            chunk.emit(Opcode::Return, Span::dummy());
        });
        assert_eq!(outcome.result, InterpretOutcome::Ok);
        assert!(outcome.value.equals(&Value::Number(7.0)));
    }

    #[test]
    fn test_division_by_zero_fails() {
        let outcome = run_chunk(|chunk| {
            let one = chunk.add_constant(Value::Number(1.0)).unwrap();
            let zero = chunk.add_constant(Value::Number(0.0)).unwrap();
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(one);
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(zero);
            chunk.emit(Opcode::Divide, Span::dummy());
            chunk.emit(Opcode::Return, Span::dummy());
        });
        assert_eq!(outcome.result, InterpretOutcome::RuntimeError);
    }

    #[test]
    fn test_jump_if_false_does_not_pop() {
        // false; JUMP_IF_FALSE over nothing; the condition must still be
        // there for POP.
        let outcome = run_chunk(|chunk| {
            chunk.emit(Opcode::False, Span::dummy());
            chunk.emit(Opcode::JumpIfFalse, Span::dummy());
            chunk.emit_u16(0);
            chunk.emit(Opcode::Pop, Span::dummy());
            chunk.emit(Opcode::Null, Span::dummy());
            chunk.emit(Opcode::Return, Span::dummy());
        });
        assert_eq!(outcome.result, InterpretOutcome::Ok);
    }

    #[test]
    fn test_unknown_opcode_errors() {
        let outcome = run_chunk(|chunk| {
            chunk.emit_byte(0xEE);
        });
        assert_eq!(outcome.result, InterpretOutcome::RuntimeError);
    }

    #[test]
    fn test_new_object_preserves_insertion_order() {
        let outcome = run_chunk(|chunk| {
            let key_b = chunk.add_constant(Value::string("b")).unwrap();
            let key_a = chunk.add_constant(Value::string("a")).unwrap();
            let one = chunk.add_constant(Value::Number(1.0)).unwrap();
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(key_b);
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(one);
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(key_a);
            chunk.emit(Opcode::Constant, Span::dummy());
            chunk.emit_byte(one);
            chunk.emit(Opcode::NewObject, Span::dummy());
            chunk.emit_byte(2);
            chunk.emit(Opcode::Return, Span::dummy());
        });
        let Value::Object(obj) = outcome.value else {
            panic!("expected object result");
        };
        assert_eq!(obj.borrow().keys(), vec!["b".to_string(), "a".to_string()]);
    }
}
