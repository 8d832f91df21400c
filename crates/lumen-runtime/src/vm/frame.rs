//! Call frames and execution state
//!
//! [`ExecState`] bundles everything one logical thread of bytecode execution
//! owns: the value stack, the call-frame stack, the open-upvalue list, and
//! the exception-handler stack. The VM runs exactly one ExecState at a time;
//! generators own a second one and the VM swaps them on entry/exit.

use std::cell::RefCell;
use std::rc::Rc;

use crate::async_runtime::PromiseRef;
use crate::value::{Closure, Upvalue, Value};

/// How a frame returns its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// The script's main frame; its return value becomes the interpretation
    /// result
    Main,
    /// Pushed by the microtask drain (async bodies, host callbacks); the
    /// return value travels through the frame's promise or is discarded
    Task,
    /// Ordinary call; the return value is pushed onto the caller's stack
    Call,
}

/// Per-invocation state
pub struct CallFrame {
    /// The closure being executed
    pub closure: Rc<Closure>,
    /// Instruction pointer into the closure's chunk
    pub ip: usize,
    /// Absolute index of the callee slot in the value stack; slot 0 of the
    /// frame's locals
    pub stack_base: usize,
    /// Present on async frames: resolved on return, rejected by unwinding
    pub async_promise: Option<PromiseRef>,
    pub kind: FrameKind,
}

impl CallFrame {
    pub fn new(closure: Rc<Closure>, stack_base: usize, kind: FrameKind) -> Self {
        Self {
            closure,
            ip: 0,
            stack_base,
            async_promise: None,
            kind,
        }
    }
}

/// Installed SETUP_TRY record
#[derive(Debug, Clone, Copy)]
pub struct ExceptionHandler {
    /// Where the catch block starts
    pub catch_ip: usize,
    /// Value-stack depth to restore before entering the catch
    pub stack_depth: usize,
    /// Index of the frame that installed the handler
    pub frame_index: usize,
}

/// One logical execution thread: value stack, frames, open upvalues,
/// exception handlers
#[derive(Default)]
pub struct ExecState {
    pub stack: Vec<Value>,
    pub frames: Vec<CallFrame>,
    /// Open upvalues sorted by descending stack location; at most one per
    /// slot
    pub open_upvalues: Vec<Rc<RefCell<Upvalue>>>,
    pub handlers: Vec<ExceptionHandler>,
}

impl ExecState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// A frame detached from the stacks at an AWAIT.
///
/// The frame's stack region, its open upvalues, and its handler records are
/// stored base-relative and re-based wherever the stack top happens to be at
/// resumption, so concurrently suspended activations can settle in any
/// order.
pub struct SuspendedFrame {
    pub frame: CallFrame,
    /// The stack slots from `stack_base` up, awaited promise on top
    pub region: Vec<Value>,
    /// Open upvalues into the region: (offset from base, shared cell)
    pub upvalues: Vec<(usize, Rc<RefCell<Upvalue>>)>,
    /// Handlers installed by the frame: (catch ip, stack depth offset from
    /// base)
    pub handlers: Vec<(usize, usize)>,
}

/// Generator lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    Suspended,
    Running,
    Done,
}

/// A generator object: a coroutine with its own ExecState
pub struct Generator {
    pub state: GeneratorState,
    /// The coroutine's execution state while suspended; `None` while
    /// running (it is the VM's current state) or once done
    pub exec: Option<ExecState>,
    /// The caller's execution state, parked while the coroutine runs
    pub caller: Option<ExecState>,
    /// Whether the body has started; the first `next` ignores its argument
    pub started: bool,
}

impl Generator {
    /// Create a suspended generator whose coroutine will run `closure` with
    /// the given callee slot and arguments.
    pub fn new(closure: Rc<Closure>, slot_zero: Value, args: Vec<Value>) -> Self {
        let mut exec = ExecState::new();
        exec.stack.push(slot_zero);
        exec.stack.extend(args);
        exec.frames
            .push(CallFrame::new(closure, 0, FrameKind::Call));
        Self {
            state: GeneratorState::Suspended,
            exec: Some(exec),
            caller: None,
            started: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bytecode::FunctionObject;

    #[test]
    fn test_generator_starts_suspended_with_frame() {
        let function = Rc::new(FunctionObject::new("g", 1));
        let closure = Rc::new(Closure::new(function, Vec::new()));
        let callee = Value::Closure(closure.clone());
        let generator = Generator::new(closure, callee, vec![Value::Number(1.0)]);
        assert_eq!(generator.state, GeneratorState::Suspended);
        assert!(!generator.started);
        let exec = generator.exec.as_ref().unwrap();
        assert_eq!(exec.stack.len(), 2);
        assert_eq!(exec.frames.len(), 1);
    }
}
