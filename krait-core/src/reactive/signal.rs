//! Signal Descriptor
//!
//! A [`Signal`] is declared once per owner type, typically in a `static`, and
//! read or written through an owner instance. It is the attribute-level
//! object; the state lives in one handler per binding key.
//!
//! # How Signals Work
//!
//! 1. On read, the descriptor resolves the handler for the owner (creating it
//!    on first access), pushes a frame on the tracking stack, and links itself
//!    to whatever signal was computing when it was read.
//!
//! 2. The handler returns its value, recomputing if stale. The frame is popped
//!    on every exit path.
//!
//! 3. On write, the handler decides whether the value really changed. If so,
//!    every handler downstream is invalidated and recomputes on its next read.
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::LazyLock;
//! use krait_core::reactive::{Scope, Signal, SignalOwner};
//!
//! struct Pricing { scope: Scope }
//!
//! impl SignalOwner for Pricing {
//!     fn scope(&self) -> &Scope { &self.scope }
//! }
//!
//! static BASE: LazyLock<Signal<Pricing, f64>> =
//!     LazyLock::new(|| Signal::new(100.0).named("base"));
//! static DISCOUNT: LazyLock<Signal<Pricing, f64>> =
//!     LazyLock::new(|| Signal::computed(|this| Ok(BASE.read(this)? * 0.1)).named("discount"));
//!
//! let pricing = Pricing { scope: Scope::new() };
//! assert_eq!(DISCOUNT.read(&pricing)?, 10.0);
//!
//! BASE.write(&pricing, 150.0)?;
//! assert_eq!(DISCOUNT.read(&pricing)?, 15.0);
//! ```
//!
//! # Mutable values
//!
//! Mutating a value in place (pushing onto a stored `Arc<Mutex<Vec<_>>>`, say)
//! is invisible to the signal. Write the value back to itself, which compares
//! fingerprints, or call [`Signal::touch`] to force invalidation.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::clock::{self, Clock};
use super::context::ReactiveContext;
use super::handler::{
    Computation, Detector, DynamicHandler, HandlerKind, PrimitiveHandler, SignalHandler,
};
use super::runtime::{Links, Reactive, Runtime};
use super::scope::{BindingKey, HandlerId, Scope, SignalOwner};
use crate::error::{Result, SignalError};
use crate::hashing::{fingerprint, ExtendedHash, Fingerprint};

/// Below this many bindings, dropped owners are not swept.
const PRUNE_FLOOR: usize = 64;

/// What a descriptor computes its handlers from.
pub enum Target<O, T> {
    /// Not attached yet.
    Unset,
    /// A directly settable initial value.
    Value(T),
    /// A computation over the owner.
    Computed(Computation<O, T>),
}

impl<O, T> Target<O, T> {
    fn kind(&self) -> Option<HandlerKind> {
        match self {
            Self::Unset => None,
            Self::Value(_) => Some(HandlerKind::Primitive),
            Self::Computed(_) => Some(HandlerKind::Dynamic),
        }
    }
}

/// One handler plus its place in the dependency graph.
struct Slot<O, T> {
    id: HandlerId,
    name: Arc<str>,
    handler: Arc<dyn SignalHandler<O, T>>,
    links: Mutex<Links>,
}

impl<O, T> Reactive for Slot<O, T>
where
    O: 'static,
    T: 'static,
{
    fn handler_id(&self) -> HandlerId {
        self.id
    }

    fn name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    fn notify_invalidated(&self, at: Option<std::time::Instant>) {
        self.handler.notify_invalidated(at);
    }

    fn links(&self) -> &Mutex<Links> {
        &self.links
    }
}

struct Binding<O, T> {
    /// Liveness of the owning instance; `None` for class-level bindings.
    token: Option<Weak<()>>,
    slot: Arc<Slot<O, T>>,
}

impl<O, T> Binding<O, T> {
    fn is_alive(&self) -> bool {
        self.token
            .as_ref()
            .map_or(true, |token| token.strong_count() > 0)
    }
}

/// A reactive attribute of owner type `O` holding values of type `T`.
pub struct Signal<O, T> {
    name: OnceLock<Arc<str>>,
    target: Target<O, T>,
    shared: bool,
    expire: Option<Duration>,
    use_hashing: bool,
    detector: Option<Detector<T>>,
    clock: Arc<dyn Clock>,
    bindings: DashMap<BindingKey, Binding<O, T>>,
    prune_at: AtomicUsize,
}

impl<O, T> Signal<O, T>
where
    O: SignalOwner + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// A descriptor with options but no target yet.
    ///
    /// Attach the target later with [`value`](Self::value) or
    /// [`computing`](Self::computing). Reading it before then fails with
    /// [`SignalError::NoAcceptableHandler`].
    pub fn declare() -> Self {
        Self {
            name: OnceLock::new(),
            target: Target::Unset,
            shared: false,
            expire: None,
            use_hashing: true,
            detector: None,
            clock: clock::system(),
            bindings: DashMap::new(),
            prune_at: AtomicUsize::new(PRUNE_FLOOR),
        }
    }

    /// A computed signal.
    pub fn computed<F>(compute: F) -> Self
    where
        F: Fn(&O) -> Result<T> + Send + Sync + 'static,
    {
        Self::declare().computing(compute)
    }

    /// Attach a computation, unless a target is already attached.
    pub fn computing<F>(self, compute: F) -> Self
    where
        F: Fn(&O) -> Result<T> + Send + Sync + 'static,
    {
        self.with_target(Target::Computed(Arc::new(compute)))
    }

    /// Attach `target`, unless one is already attached.
    pub fn with_target(mut self, target: Target<O, T>) -> Self {
        if matches!(self.target, Target::Unset) {
            self.target = target;
        }
        self
    }

    /// Builder form of [`bind`](Self::bind).
    pub fn named(self, name: &str) -> Self {
        self.bind(name);
        self
    }

    /// Record the attribute name. Only the first call has an effect.
    pub fn bind(&self, name: &str) -> bool {
        self.name.set(Arc::from(name)).is_ok()
    }

    /// Share one handler between every instance of `O`.
    pub fn shared(mut self, shared: bool) -> Self {
        self.shared = shared;
        self
    }

    /// Cache lifetime of a computed signal. `Duration::ZERO` never expires.
    pub fn expire(mut self, ttl: Duration) -> Self {
        self.expire = Some(ttl).filter(|ttl| !ttl.is_zero());
        self
    }

    /// Toggle change detection on writes. Disabled, every write is a change.
    pub fn use_hashing(mut self, enabled: bool) -> Self {
        self.use_hashing = enabled;
        self
    }

    /// Replace the change detector.
    pub fn detector<F>(mut self, detect: F) -> Self
    where
        F: Fn(&T) -> Fingerprint + Send + Sync + 'static,
    {
        self.detector = Some(Arc::new(detect));
        self
    }

    /// Time source for expiration.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn name(&self) -> Arc<str> {
        self.name
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::from("<unnamed>"))
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// The handler variant this descriptor builds, if it has a target.
    pub fn kind(&self) -> Option<HandlerKind> {
        self.target.kind()
    }

    /// Read the value for `owner`.
    pub fn read(&self, owner: &O) -> Result<T> {
        let slot = self.resolve_for(owner.scope())?;
        self.visit(slot, Some(owner))
    }

    /// Write the value for `owner`. Returns whether it materially changed.
    pub fn write(&self, owner: &O, value: T) -> Result<bool> {
        let slot = self.resolve_for(owner.scope())?;
        self.assign(&slot, value)
    }

    /// Force invalidation of `owner`'s handler and everything downstream.
    ///
    /// This is the escape hatch for values mutated in place.
    pub fn touch(&self, owner: &O) -> Result<()> {
        let slot = self.resolve_for(owner.scope())?;
        self.force(&slot);
        Ok(())
    }

    /// Read the class-level handler, shared by all instances when `shared`.
    pub fn read_class(&self) -> Result<T> {
        let slot = self.resolve(BindingKey::Class, None)?;
        self.visit(slot, None)
    }

    /// Write the class-level handler.
    pub fn write_class(&self, value: T) -> Result<bool> {
        let slot = self.resolve(BindingKey::Class, None)?;
        self.assign(&slot, value)
    }

    /// Force invalidation of the class-level handler.
    pub fn touch_class(&self) -> Result<()> {
        let slot = self.resolve(BindingKey::Class, None)?;
        self.force(&slot);
        Ok(())
    }

    /// Number of handlers whose owner is still alive.
    pub fn binding_count(&self) -> usize {
        self.bindings
            .iter()
            .filter(|binding| binding.is_alive())
            .count()
    }

    /// Drop handlers of owners that no longer exist. Returns how many went.
    pub fn prune(&self) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, binding| binding.is_alive());
        let live = self.bindings.len();
        self.prune_at
            .store((live * 2).max(PRUNE_FLOOR), Ordering::Relaxed);
        before - live
    }

    /// Number of live handlers that read `owner`'s handler.
    pub fn dependent_count(&self, owner: &O) -> usize {
        self.with_links(owner, Links::dependent_count)
    }

    /// Number of live handlers `owner`'s handler read in its last computation.
    pub fn dependency_count(&self, owner: &O) -> usize {
        self.with_links(owner, Links::dependency_count)
    }

    fn with_links(&self, owner: &O, count: fn(&Links) -> usize) -> usize {
        let key = self.key_for(owner.scope());
        self.bindings
            .get(&key)
            .map(|binding| count(&binding.slot.links.lock()))
            .unwrap_or(0)
    }

    fn key_for(&self, scope: &Scope) -> BindingKey {
        if self.shared {
            BindingKey::Class
        } else {
            BindingKey::Instance(scope.id())
        }
    }

    fn resolve_for(&self, scope: &Scope) -> Result<Arc<Slot<O, T>>> {
        let key = self.key_for(scope);
        let token = match key {
            BindingKey::Instance(_) => Some(scope.token()),
            BindingKey::Class => None,
        };
        self.resolve(key, token)
    }

    /// Find or lazily create the handler for `key`.
    ///
    /// Creation goes through the map's entry lock, so two threads racing on
    /// the first access of one key still end up with a single handler.
    fn resolve(&self, key: BindingKey, token: Option<Weak<()>>) -> Result<Arc<Slot<O, T>>> {
        if let Some(binding) = self.bindings.get(&key) {
            return Ok(Arc::clone(&binding.slot));
        }

        if self.bindings.len() >= self.prune_at.load(Ordering::Relaxed) {
            let dropped = self.prune();
            trace!(signal = %self.name(), dropped, "pruned dropped owners");
        }

        let binding = self.bindings.entry(key).or_try_insert_with(|| {
            let slot = Slot {
                id: HandlerId::new(),
                name: self.name(),
                handler: self.build_handler()?,
                links: Mutex::new(Links::default()),
            };
            debug!(signal = %slot.name, handler = slot.id.raw(), ?key, "created handler");
            Ok::<_, SignalError>(Binding {
                token,
                slot: Arc::new(slot),
            })
        })?;

        Ok(Arc::clone(&binding.slot))
    }

    /// Pick the handler variant that accepts the target.
    fn build_handler(&self) -> Result<Arc<dyn SignalHandler<O, T>>> {
        match &self.target {
            Target::Computed(compute) => Ok(Arc::new(DynamicHandler::new(
                self.name(),
                Arc::clone(compute),
                self.expire,
                Arc::clone(&self.clock),
            ))),
            Target::Value(value) => {
                let detector = self.detector.clone().filter(|_| self.use_hashing);
                Ok(Arc::new(PrimitiveHandler::new(
                    self.name(),
                    value.clone(),
                    detector,
                )))
            }
            Target::Unset => Err(SignalError::NoAcceptableHandler { name: self.name() }),
        }
    }

    fn visit(&self, slot: Arc<Slot<O, T>>, owner: Option<&O>) -> Result<T> {
        let node: Arc<dyn Reactive> = slot.clone();

        let ctx = match ReactiveContext::enter(Arc::clone(&node)) {
            Ok(ctx) => ctx,
            Err(err) => {
                warn!(signal = %slot.name, "circular read");
                return Err(err);
            }
        };

        let reader = ctx.parent().cloned();
        if let Some(reader) = &reader {
            Runtime::link(reader, &node);
        }

        let fetched = slot.handler.get(owner)?;
        if fetched.recomputed {
            Runtime::relink(&node, &ctx.dependencies());
        }
        drop(ctx);

        if let Some(deadline) = fetched.deadline {
            if fetched.recomputed {
                Runtime::invalidate_dependents(&*node, Some(deadline));
            } else if let Some(reader) = &reader {
                // A new reader of a cached value still has to learn when it lapses.
                Runtime::invalidate(&**reader, Some(deadline));
            }
        }

        Ok(fetched.value)
    }

    fn assign(&self, slot: &Arc<Slot<O, T>>, value: T) -> Result<bool> {
        let changed = slot.handler.set(value)?;
        if changed {
            let reached = Runtime::invalidate_dependents(&**slot, None);
            debug!(signal = %slot.name, reached, "value changed");

            // A computation that writes a signal depends on it from then on.
            if let Some(writer) = ReactiveContext::record(slot.id) {
                let node: Arc<dyn Reactive> = slot.clone();
                Runtime::link(&writer, &node);
            }
        }
        Ok(changed)
    }

    fn force(&self, slot: &Slot<O, T>) {
        let reached = Runtime::invalidate(slot, None);
        debug!(signal = %slot.name, reached, "forced invalidation");
    }
}

impl<O, T> Signal<O, T>
where
    O: SignalOwner + 'static,
    T: ExtendedHash + Clone + Send + Sync + 'static,
{
    /// A primitive signal with structural change detection.
    pub fn new(value: T) -> Self {
        Self::declare().value(value)
    }

    /// Attach an initial value, unless a target is already attached.
    pub fn value(mut self, value: T) -> Self {
        if self.detector.is_none() {
            self.detector = Some(Arc::new(|value: &T| fingerprint(value)));
        }
        self.with_target(Target::Value(value))
    }
}

impl<T> Signal<(), T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Read a free-standing signal.
    pub fn get(&self) -> Result<T> {
        self.read(&())
    }

    /// Write a free-standing signal.
    pub fn set(&self, value: T) -> Result<bool> {
        self.write(&(), value)
    }
}

impl<O, T> fmt::Debug for Signal<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("name", &self.name.get())
            .field("kind", &self.target.kind())
            .field("shared", &self.shared)
            .field("expire", &self.expire)
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

impl<O, T> fmt::Display for Signal<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name.get() {
            Some(name) => write!(f, "signal:{name}"),
            None => f.write_str("signal:<unnamed>"),
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
