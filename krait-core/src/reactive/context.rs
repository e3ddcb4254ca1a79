//! Reactive Context
//!
//! The reactive context tracks which signal handler is currently being
//! evaluated. This enables automatic dependency tracking: when a signal is
//! read while another one is computing, the two handlers get linked.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Reading a signal pushes a frame for
//! its handler and pops it when the read finishes, so nested reads (a computed
//! signal reading another computed signal) grow the stack by one frame each.
//!
//! Frames are popped by a drop guard, so the stack returns to empty after the
//! outermost read even when a computation fails or panics. Each thread owns its
//! own stack; concurrent evaluations on different threads never see each
//! other's frames.

use std::cell::RefCell;
use std::sync::Arc;

use smallvec::SmallVec;

use super::runtime::Reactive;
use super::scope::HandlerId;
use crate::error::{Result, SignalError};

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<ContextEntry>> = const { RefCell::new(Vec::new()) };
}

/// Handlers read while a frame was on top of the stack.
pub type Dependencies = SmallVec<[HandlerId; 8]>;

/// An entry in the reactive context stack.
struct ContextEntry {
    /// The handler being evaluated.
    node: Arc<dyn Reactive>,
    /// Handlers read directly by this evaluation, in read order.
    dependencies: Dependencies,
}

/// Guard that pops the frame when dropped.
///
/// This ensures the stack is properly maintained even if the computation
/// returns early with an error or panics.
pub struct ReactiveContext {
    handler_id: HandlerId,
    parent: Option<Arc<dyn Reactive>>,
}

impl ReactiveContext {
    /// Push a frame for `node`.
    ///
    /// The frame below (if any) records `node` as one of its dependencies and
    /// is returned through [`parent`](Self::parent). Entering a handler that
    /// already has a frame on the stack is a circular read and fails without
    /// touching the stack.
    pub fn enter(node: Arc<dyn Reactive>) -> Result<Self> {
        let handler_id = node.handler_id();

        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            if stack.iter().any(|entry| entry.node.handler_id() == handler_id) {
                return Err(SignalError::CircularDependency {
                    name: node.name(),
                });
            }

            let parent = stack.last_mut().map(|entry| {
                entry.dependencies.push(handler_id);
                Arc::clone(&entry.node)
            });

            stack.push(ContextEntry {
                node,
                dependencies: Dependencies::new(),
            });

            Ok(Self { handler_id, parent })
        })
    }

    /// The handler that was being evaluated when this frame was pushed.
    pub fn parent(&self) -> Option<&Arc<dyn Reactive>> {
        self.parent.as_ref()
    }

    /// Dependencies collected in this frame so far.
    pub fn dependencies(&self) -> Dependencies {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .iter()
                .rev()
                .find(|entry| entry.node.handler_id() == self.handler_id)
                .map(|entry| entry.dependencies.clone())
                .unwrap_or_default()
        })
    }

    /// Record `id` as a dependency of the frame on top of the stack.
    ///
    /// Used for writes made from inside a computation. Returns the handler of
    /// that frame, if any.
    pub fn record(id: HandlerId) -> Option<Arc<dyn Reactive>> {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().last_mut().map(|entry| {
                if !entry.dependencies.contains(&id) {
                    entry.dependencies.push(id);
                }
                Arc::clone(&entry.node)
            })
        })
    }

    /// Check if there is an active reactive context.
    pub fn is_active() -> bool {
        CONTEXT_STACK.with(|stack| !stack.borrow().is_empty())
    }

    /// Get the handler currently being evaluated, if any.
    pub fn current_handler() -> Option<HandlerId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().map(|entry| entry.node.handler_id()))
    }

    /// Number of frames on this thread's stack.
    pub fn depth() -> usize {
        CONTEXT_STACK.with(|stack| stack.borrow().len())
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            let popped = stack.borrow_mut().pop();

            // Verify we're popping the right frame.
            // This helps catch bugs where guards are dropped out of order.
            if let Some(entry) = popped {
                debug_assert_eq!(
                    entry.node.handler_id(),
                    self.handler_id,
                    "ReactiveContext mismatch: expected {:?}, got {:?}",
                    self.handler_id,
                    entry.node.handler_id()
                );
            }
        });
    }
}
