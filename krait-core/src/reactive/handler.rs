//! Signal Handlers
//!
//! A handler holds the actual state of one signal for one binding key. There
//! are two variants:
//!
//! - [`PrimitiveHandler`] holds a directly settable value. A write counts as a
//!   change only when the value's fingerprint differs from the stored one
//!   (or when change detection is disabled).
//!
//! - [`DynamicHandler`] holds a computation and caches its result. The cache
//!   is dropped when an upstream signal changes, when its own expiry passes,
//!   or when an expiry notice received from upstream passes. Writing to it is
//!   always an error: dynamic signals are derived-only.
//!
//! # State machine (dynamic)
//!
//! ```text
//! EMPTY --compute--> CACHED --upstream change / expiry--> EMPTY
//! CACHED --read before expiry--> CACHED
//! ```
//!
//! Computations run without any handler lock held, so they are free to read
//! other signals.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, trace};

use super::clock::Clock;
use crate::error::{Result, SignalError};
use crate::hashing::Fingerprint;

/// Zero-argument computation bound to its owner.
pub type Computation<O, T> = Arc<dyn Fn(&O) -> Result<T> + Send + Sync>;

/// Change detector for primitive values.
pub type Detector<T> = Arc<dyn Fn(&T) -> Fingerprint + Send + Sync>;

/// The handler variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    Primitive,
    Dynamic,
}

/// A value returned by [`SignalHandler::get`].
#[derive(Debug, Clone)]
pub struct Fetched<T> {
    pub value: T,
    /// The value was computed by this call rather than served from cache.
    pub recomputed: bool,
    /// When the value stops being valid, if it expires.
    pub deadline: Option<Instant>,
}

impl<T> Fetched<T> {
    fn stored(value: T) -> Self {
        Self {
            value,
            recomputed: false,
            deadline: None,
        }
    }
}

/// Contract shared by both handler variants.
pub trait SignalHandler<O, T>: Send + Sync {
    fn kind(&self) -> HandlerKind;

    /// Current value, recomputing if stale.
    ///
    /// `owner` is `None` for class-level access; a computation that needs to
    /// run then fails with [`SignalError::Unbound`].
    fn get(&self, owner: Option<&O>) -> Result<Fetched<T>>;

    /// Store a new value. Returns whether it materially changed.
    fn set(&self, value: T) -> Result<bool>;

    /// Drop the cache now (`None`) or once `at` has passed.
    fn notify_invalidated(&self, at: Option<Instant>);
}

// ----------------------------------------------------------------------------
// Primitive
// ----------------------------------------------------------------------------

struct PrimitiveState<T> {
    value: T,
    fingerprint: Option<Fingerprint>,
}

/// Handler for a directly settable value.
pub struct PrimitiveHandler<T> {
    name: Arc<str>,
    state: RwLock<PrimitiveState<T>>,
    detector: Option<Detector<T>>,
}

impl<T> PrimitiveHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `detector: None` treats every write as a change.
    pub fn new(name: Arc<str>, value: T, detector: Option<Detector<T>>) -> Self {
        let fingerprint = detector.as_ref().map(|detect| detect(&value));
        Self {
            name,
            state: RwLock::new(PrimitiveState { value, fingerprint }),
            detector,
        }
    }
}

impl<O, T> SignalHandler<O, T> for PrimitiveHandler<T>
where
    T: Clone + Send + Sync + 'static,
{
    fn kind(&self) -> HandlerKind {
        HandlerKind::Primitive
    }

    fn get(&self, _owner: Option<&O>) -> Result<Fetched<T>> {
        Ok(Fetched::stored(self.state.read().value.clone()))
    }

    fn set(&self, value: T) -> Result<bool> {
        let fingerprint = self.detector.as_ref().map(|detect| detect(&value));

        let mut state = self.state.write();
        state.value = value;

        let changed = match fingerprint {
            Some(fingerprint) => {
                let changed = state.fingerprint != Some(fingerprint);
                state.fingerprint = Some(fingerprint);
                changed
            }
            None => true,
        };

        trace!(signal = %self.name, changed, "primitive write");
        Ok(changed)
    }

    fn notify_invalidated(&self, _at: Option<Instant>) {
        // Primitives are driven by writes only.
    }
}

impl<T> fmt::Debug for PrimitiveHandler<T>
where
    T: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.read();
        f.debug_struct("PrimitiveHandler")
            .field("name", &self.name)
            .field("value", &state.value)
            .field("hashing", &self.detector.is_some())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Dynamic
// ----------------------------------------------------------------------------

struct CacheState<T> {
    value: Option<T>,
    expires_at: Option<Instant>,
    /// Expiry notices received from upstream handlers.
    notices: Vec<Instant>,
    /// Bumped on every immediate invalidation.
    generation: u64,
}

impl<T> CacheState<T> {
    /// Whether the cache must be recomputed at `now`.
    ///
    /// Elapsed notices are pruned and drop the cached value with them; notices
    /// still in the future are kept.
    fn is_stale(&mut self, now: Instant) -> bool {
        let before = self.notices.len();
        self.notices.retain(|at| *at > now);
        let noticed = self.notices.len() != before;

        let expired = self.expires_at.is_some_and(|deadline| now >= deadline);

        if expired || noticed {
            self.clear();
        }
        self.value.is_none()
    }

    fn clear(&mut self) {
        self.value = None;
        self.expires_at = None;
    }
}

/// Handler for a computed value with optional expiration.
pub struct DynamicHandler<O, T> {
    name: Arc<str>,
    compute: Computation<O, T>,
    expire: Option<Duration>,
    clock: Arc<dyn Clock>,
    cache: Mutex<CacheState<T>>,
}

impl<O, T> DynamicHandler<O, T>
where
    T: Clone + Send + Sync + 'static,
{
    /// `expire: None` caches until an upstream change.
    pub fn new(
        name: Arc<str>,
        compute: Computation<O, T>,
        expire: Option<Duration>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            name,
            compute,
            expire: expire.filter(|ttl| !ttl.is_zero()),
            clock,
            cache: Mutex::new(CacheState {
                value: None,
                expires_at: None,
                notices: Vec::new(),
                generation: 0,
            }),
        }
    }

    /// Whether a value is cached and still valid.
    pub fn is_cached(&self) -> bool {
        let now = self.clock.now();
        !self.cache.lock().is_stale(now)
    }

    /// Number of expiry notices still pending.
    pub fn pending_notices(&self) -> usize {
        self.cache.lock().notices.len()
    }
}

impl<O, T> SignalHandler<O, T> for DynamicHandler<O, T>
where
    T: Clone + Send + Sync + 'static,
{
    fn kind(&self) -> HandlerKind {
        HandlerKind::Dynamic
    }

    fn get(&self, owner: Option<&O>) -> Result<Fetched<T>> {
        let now = self.clock.now();

        let generation = {
            let mut cache = self.cache.lock();
            if !cache.is_stale(now) {
                if let Some(value) = &cache.value {
                    trace!(signal = %self.name, "cache hit");
                    return Ok(Fetched {
                        value: value.clone(),
                        recomputed: false,
                        deadline: cache.expires_at,
                    });
                }
            }
            cache.clear();
            cache.generation
        };

        let owner = owner.ok_or_else(|| SignalError::Unbound {
            name: Arc::clone(&self.name),
        })?;

        debug!(signal = %self.name, "recomputing");
        let value = (self.compute)(owner).map_err(|err| err.within(&self.name))?;

        let mut cache = self.cache.lock();
        // An invalidation that arrived mid-computation means the inputs moved
        // underneath us: hand the value out, but don't keep it.
        if cache.generation != generation {
            debug!(signal = %self.name, "invalidated while computing, not caching");
            return Ok(Fetched {
                value,
                recomputed: true,
                deadline: None,
            });
        }

        // A ttl past the end of representable time never expires.
        let deadline = self
            .expire
            .and_then(|ttl| self.clock.now().checked_add(ttl));
        cache.value = Some(value.clone());
        cache.expires_at = deadline;

        Ok(Fetched {
            value,
            recomputed: true,
            deadline,
        })
    }

    fn set(&self, _value: T) -> Result<bool> {
        Err(SignalError::UnsupportedWrite {
            name: Arc::clone(&self.name),
        })
    }

    fn notify_invalidated(&self, at: Option<Instant>) {
        let mut cache = self.cache.lock();
        match at {
            None => {
                cache.clear();
                cache.generation += 1;
                trace!(signal = %self.name, "cache invalidated");
            }
            Some(at) => {
                if !cache.notices.contains(&at) {
                    cache.notices.push(at);
                }
            }
        }
    }
}

impl<O, T> fmt::Debug for DynamicHandler<O, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let cache = self.cache.lock();
        f.debug_struct("DynamicHandler")
            .field("name", &self.name)
            .field("expire", &self.expire)
            .field("cached", &cache.value.is_some())
            .field("pending_notices", &cache.notices.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashing::fingerprint;
    use crate::reactive::clock::ManualClock;
    use std::sync::atomic::{AtomicI32, Ordering};

    fn name() -> Arc<str> {
        Arc::from("test")
    }

    fn computation<F>(f: F) -> Computation<(), i32>
    where
        F: Fn(&()) -> Result<i32> + Send + Sync + 'static,
    {
        Arc::new(f)
    }

    fn counting(calls: &Arc<AtomicI32>) -> Computation<(), i32> {
        let calls = Arc::clone(calls);
        computation(move |_| Ok(calls.fetch_add(1, Ordering::SeqCst) + 1))
    }

    #[test]
    fn primitive_detects_no_op_writes() {
        let detector: Detector<Vec<i32>> = Arc::new(|value| fingerprint(value));
        let handler = PrimitiveHandler::new(name(), vec![1, 2], Some(detector));

        assert!(!SignalHandler::<(), _>::set(&handler, vec![1, 2]).unwrap());
        assert!(SignalHandler::<(), _>::set(&handler, vec![2, 1]).unwrap());
        assert_eq!(
            SignalHandler::<(), _>::get(&handler, None).unwrap().value,
            vec![2, 1]
        );
    }

    #[test]
    fn primitive_without_hashing_always_changes() {
        let handler = PrimitiveHandler::new(name(), 5, None);

        assert!(SignalHandler::<(), _>::set(&handler, 5).unwrap());
        assert!(SignalHandler::<(), _>::set(&handler, 5).unwrap());
    }

    #[test]
    fn dynamic_memoizes() {
        let calls = Arc::new(AtomicI32::new(0));
        let handler = DynamicHandler::new(
            name(),
            counting(&calls),
            None,
            Arc::new(ManualClock::new()),
        );

        // Not computed yet
        assert!(!handler.is_cached());

        let first = handler.get(Some(&())).unwrap();
        assert!(first.recomputed);
        assert_eq!(first.value, 1);

        let second = handler.get(Some(&())).unwrap();
        assert!(!second.recomputed);
        assert_eq!(second.value, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dynamic_recomputes_after_invalidation() {
        let calls = Arc::new(AtomicI32::new(0));
        let handler = DynamicHandler::new(
            name(),
            counting(&calls),
            None,
            Arc::new(ManualClock::new()),
        );

        assert_eq!(handler.get(Some(&())).unwrap().value, 1);
        handler.notify_invalidated(None);
        assert!(!handler.is_cached());
        assert_eq!(handler.get(Some(&())).unwrap().value, 2);
    }

    #[test]
    fn dynamic_expires() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicI32::new(0));
        let handler = DynamicHandler::new(
            name(),
            counting(&calls),
            Some(Duration::from_secs(60)),
            Arc::new(clock.clone()),
        );

        let first = handler.get(Some(&())).unwrap();
        assert_eq!(first.deadline, Some(clock.now() + Duration::from_secs(60)));

        clock.advance(Duration::from_secs(59));
        assert_eq!(handler.get(Some(&())).unwrap().value, 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(handler.get(Some(&())).unwrap().value, 2);
    }

    #[test]
    fn huge_expire_never_expires() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicI32::new(0));
        let handler = DynamicHandler::new(
            name(),
            counting(&calls),
            Some(Duration::from_secs(u64::MAX)),
            Arc::new(clock.clone()),
        );

        let first = handler.get(Some(&())).unwrap();
        assert_eq!(first.value, 1);
        assert_eq!(first.deadline, None);

        clock.advance(Duration::from_secs(3600 * 24 * 365));
        assert_eq!(handler.get(Some(&())).unwrap().value, 1);
    }

    #[test]
    fn zero_expire_never_expires() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicI32::new(0));
        let handler = DynamicHandler::new(
            name(),
            counting(&calls),
            Some(Duration::ZERO),
            Arc::new(clock.clone()),
        );

        assert_eq!(handler.get(Some(&())).unwrap().deadline, None);
        clock.advance(Duration::from_secs(3600 * 24));
        assert_eq!(handler.get(Some(&())).unwrap().value, 1);
    }

    #[test]
    fn notices_are_pruned_when_elapsed() {
        let clock = ManualClock::new();
        let calls = Arc::new(AtomicI32::new(0));
        let handler = DynamicHandler::new(
            name(),
            counting(&calls),
            None,
            Arc::new(clock.clone()),
        );

        assert_eq!(handler.get(Some(&())).unwrap().value, 1);

        handler.notify_invalidated(Some(clock.now() + Duration::from_secs(10)));
        handler.notify_invalidated(Some(clock.now() + Duration::from_secs(20)));
        assert_eq!(handler.pending_notices(), 2);

        clock.advance(Duration::from_secs(15));
        assert_eq!(handler.get(Some(&())).unwrap().value, 2);
        assert_eq!(handler.pending_notices(), 1);

        clock.advance(Duration::from_secs(1));
        assert_eq!(handler.get(Some(&())).unwrap().value, 2);
    }

    #[test]
    fn dynamic_rejects_writes() {
        let handler = DynamicHandler::new(
            name(),
            computation(|_| Ok(1)),
            None,
            Arc::new(ManualClock::new()),
        );

        let err = handler.set(7).unwrap_err();
        assert!(matches!(err, SignalError::UnsupportedWrite { .. }));
    }

    #[test]
    fn dynamic_needs_an_owner_to_compute() {
        let handler = DynamicHandler::new(
            name(),
            computation(|_| Ok(1)),
            None,
            Arc::new(ManualClock::new()),
        );

        let err = handler.get(None).unwrap_err();
        assert!(matches!(err, SignalError::Unbound { .. }));
    }

    #[test]
    fn computation_errors_name_the_signal() {
        let handler: DynamicHandler<(), i32> = DynamicHandler::new(
            Arc::from("broken"),
            computation(|_| Err(SignalError::custom("no data"))),
            None,
            Arc::new(ManualClock::new()),
        );

        let err = handler.get(Some(&())).unwrap_err();
        assert_eq!(err.signal_name(), Some("broken"));
        assert!(!handler.is_cached());
    }
}
