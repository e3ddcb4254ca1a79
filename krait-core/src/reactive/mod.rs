//! Reactive Primitives
//!
//! This module implements the signal system: descriptors, handlers, and the
//! machinery that links them into a dependency graph.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A [`Signal`] is a reactive attribute declared once per owner type. It is
//! either *primitive* (holds a settable value) or *dynamic* (holds a
//! computation over the owner). Each owner instance gets its own handler
//! unless the signal is shared, in which case all instances use one.
//!
//! ## Handlers
//!
//! A handler stores the value for one binding. Primitive handlers detect
//! no-op writes by fingerprint; dynamic handlers memoize their computation
//! and drop the cache on upstream change or expiry.
//!
//! ## Dependency tracking
//!
//! Reading a signal while another one is computing links the two. When a
//! primitive changes, every handler downstream is invalidated and recomputes
//! lazily on its next read.
//!
//! # Implementation Notes
//!
//! Tracking uses a thread-local stack of frames (see [`ReactiveContext`]).
//! Edges are weak in both directions; handlers are owned by their descriptor
//! and released when the owning instance is dropped.

mod clock;
mod context;
mod handler;
mod runtime;
mod scope;
mod signal;

pub use clock::{Clock, ManualClock, SystemClock};
pub use context::{Dependencies, ReactiveContext};
pub use handler::{
    Computation, Detector, DynamicHandler, Fetched, HandlerKind, PrimitiveHandler, SignalHandler,
};
pub use runtime::{Links, Reactive, Runtime};
pub use scope::{BindingKey, HandlerId, Scope, ScopeId, SignalOwner};
pub use signal::{Signal, Target};
