//! Reactive Runtime
//!
//! The runtime connects signal handlers into a dependency graph and pushes
//! invalidation through it.
//!
//! # How It Works
//!
//! 1. When a handler is read while another one is computing, the runtime
//!    links them in both directions: the reader *depends on* the source, the
//!    source is *depended on by* the reader.
//!
//! 2. When a computation finishes, the reader's edge set is rebuilt from what
//!    it actually read this time, dropping upstreams it no longer uses.
//!
//! 3. When a primitive changes, the runtime walks the depended-on-by edges
//!    breadth-first and invalidates every reachable handler exactly once.
//!    Computed handlers are lazy: they recompute on their next read.
//!
//! 4. When a computed handler caches a value that expires, the expiry time is
//!    pushed the same way, so cached dependents refresh once it passes.
//!
//! Edges hold weak references only. The descriptor that created a handler owns
//! it; dropping an instance drops its handlers, and dead edges are pruned the
//! next time they are walked.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Instant;

use indexmap::IndexMap;
use parking_lot::Mutex;
use tracing::trace;

use super::scope::HandlerId;

/// A node in the dependency graph: one signal handler, type-erased.
pub trait Reactive: Send + Sync {
    /// Get the handler ID for this node.
    fn handler_id(&self) -> HandlerId;

    /// Attribute name of the owning signal, for diagnostics.
    fn name(&self) -> Arc<str>;

    /// Mark the cached value stale now (`None`) or at a future instant.
    fn notify_invalidated(&self, at: Option<Instant>);

    /// The node's edge sets.
    fn links(&self) -> &Mutex<Links>;
}

/// Edges of one handler.
#[derive(Default)]
pub struct Links {
    /// Handlers this one read during its last computation.
    depends_on: IndexMap<HandlerId, Weak<dyn Reactive>>,
    /// Handlers that read this one.
    depended_on_by: IndexMap<HandlerId, Weak<dyn Reactive>>,
}

impl Links {
    pub fn dependency_count(&self) -> usize {
        self.depends_on
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn dependent_count(&self) -> usize {
        self.depended_on_by
            .values()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn depends_on(&self, id: HandlerId) -> bool {
        self.depends_on.contains_key(&id)
    }

    pub fn is_depended_on_by(&self, id: HandlerId) -> bool {
        self.depended_on_by.contains_key(&id)
    }

    /// Live dependents, pruning the dead ones.
    fn live_dependents(&mut self) -> Vec<Arc<dyn Reactive>> {
        let mut live = Vec::with_capacity(self.depended_on_by.len());
        self.depended_on_by.retain(|_, weak| match weak.upgrade() {
            Some(node) => {
                live.push(node);
                true
            }
            None => false,
        });
        live
    }
}

/// Graph operations over [`Reactive`] nodes.
pub struct Runtime;

impl Runtime {
    /// Record that `reader` depends on `source`, and the inverse.
    pub fn link(reader: &Arc<dyn Reactive>, source: &Arc<dyn Reactive>) {
        let reader_id = reader.handler_id();
        let source_id = source.handler_id();

        reader
            .links()
            .lock()
            .depends_on
            .insert(source_id, Arc::downgrade(source));
        source
            .links()
            .lock()
            .depended_on_by
            .insert(reader_id, Arc::downgrade(reader));

        trace!(reader = %reader.name(), source = %source.name(), "linked signals");
    }

    /// Rebuild `reader`'s upstream edges after a computation.
    ///
    /// Upstreams not in `read` are unlinked in both directions.
    pub fn relink(reader: &Arc<dyn Reactive>, read: &[HandlerId]) {
        let reader_id = reader.handler_id();

        let stale: Vec<Weak<dyn Reactive>> = {
            let mut links = reader.links().lock();
            let dropped: Vec<HandlerId> = links
                .depends_on
                .keys()
                .filter(|id| !read.contains(id))
                .copied()
                .collect();
            dropped
                .iter()
                .filter_map(|id| links.depends_on.shift_remove(id))
                .collect()
        };

        for upstream in stale.iter().filter_map(Weak::upgrade) {
            upstream.links().lock().depended_on_by.shift_remove(&reader_id);
            trace!(reader = %reader.name(), source = %upstream.name(), "unlinked stale dependency");
        }
    }

    /// Invalidate everything downstream of `origin`.
    ///
    /// Each reachable handler is notified exactly once per call, which also
    /// terminates on cyclic graphs. `origin` itself is not notified. Returns
    /// the number of handlers reached.
    pub fn invalidate_dependents(origin: &dyn Reactive, at: Option<Instant>) -> usize {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();

        visited.insert(origin.handler_id());
        queue.extend(origin.links().lock().live_dependents());

        let mut reached = 0;
        while let Some(node) = queue.pop_front() {
            if !visited.insert(node.handler_id()) {
                continue;
            }

            node.notify_invalidated(at);
            reached += 1;

            let next = node.links().lock().live_dependents();
            queue.extend(next);
        }

        trace!(origin = %origin.name(), reached, deadline = at.is_some(), "propagated invalidation");
        reached
    }

    /// Notify `node` itself, then everything downstream of it.
    pub fn invalidate(node: &dyn Reactive, at: Option<Instant>) -> usize {
        node.notify_invalidated(at);
        1 + Self::invalidate_dependents(node, at)
    }
}
