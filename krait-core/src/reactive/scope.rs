//! Binding identities.
//!
//! A signal descriptor is declared once per owner type, but its state lives
//! in one handler per *binding key*: the owning instance, or the owner type
//! itself when the signal is shared.
//!
//! Owners expose their identity through a [`Scope`] field. The scope hands
//! out a liveness token that descriptors only hold weakly, so reading a signal
//! never keeps its owner alive.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};

/// Unique identifier for a signal handler.
///
/// Each handler gets an ID when created. Dependency edges and the tracking
/// stack refer to handlers by this ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandlerId(u64);

impl HandlerId {
    /// Generate a new unique handler ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for HandlerId {
    fn default() -> Self {
        Self::new()
    }
}

/// Unique identifier for an owning instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u64);

impl ScopeId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Identity of one signal-owning instance.
///
/// Embed a `Scope` in every type that declares signals. Cloning a scope
/// creates a *new* identity: a cloned owner is a different instance and gets
/// its own signal state.
#[derive(Debug)]
pub struct Scope {
    id: ScopeId,
    alive: Arc<()>,
}

impl Scope {
    pub fn new() -> Self {
        Self {
            id: ScopeId::new(),
            alive: Arc::new(()),
        }
    }

    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// Weak liveness token; it stops upgrading once the scope is dropped.
    pub(crate) fn token(&self) -> Weak<()> {
        Arc::downgrade(&self.alive)
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Scope {
    fn clone(&self) -> Self {
        Self::new()
    }
}

/// Types that own signals.
pub trait SignalOwner {
    fn scope(&self) -> &Scope;
}

impl SignalOwner for Scope {
    fn scope(&self) -> &Scope {
        self
    }
}

/// Free-standing signals bind to a single process-wide scope.
impl SignalOwner for () {
    fn scope(&self) -> &Scope {
        static UNBOUND: OnceLock<Scope> = OnceLock::new();
        UNBOUND.get_or_init(Scope::new)
    }
}

/// Key selecting which handler a descriptor resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindingKey {
    /// Per-instance state.
    Instance(ScopeId),
    /// One state for every instance of the owner type.
    Class,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_ids_are_unique() {
        let id1 = HandlerId::new();
        let id2 = HandlerId::new();
        let id3 = HandlerId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn cloned_scope_is_a_new_identity() {
        let scope = Scope::new();
        let cloned = scope.clone();
        assert_ne!(scope.id(), cloned.id());
    }

    #[test]
    fn token_dies_with_scope() {
        let scope = Scope::new();
        let token = scope.token();
        assert!(token.upgrade().is_some());

        drop(scope);
        assert!(token.upgrade().is_none());
    }

    #[test]
    fn unit_owner_is_stable() {
        assert_eq!(().scope().id(), ().scope().id());
    }
}
