//! Structural Hashing
//!
//! Primitive signals use a fingerprint of their value to decide whether a
//! write is a real change. Two values that are equal for change-detection
//! purposes produce the same [`Fingerprint`]:
//!
//! - sequences are order-sensitive (`Vec`, slices, tuples, `VecDeque`)
//! - maps and sets are order-independent, so `{a: 1, b: 2}` and `{b: 2, a: 1}`
//!   fingerprint identically regardless of the container's iteration order
//! - shared pointers (`Rc`, `Arc`) are tracked by identity: a pointer met again
//!   while its own contents are still being hashed yields a distinguished
//!   "circular" fingerprint instead of recursing forever
//!
//! Fingerprints are deterministic within one process run. They are not meant to
//! be persisted.
//!
//! # Custom types
//!
//! ```rust,ignore
//! struct Point { x: i64, y: i64 }
//!
//! impl ExtendedHash for Point {
//!     fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
//!         Fingerprint::ordered("Point", [self.x.extended_hash(state), self.y.extended_hash(state)])
//!     }
//! }
//! ```

use std::cell::RefCell;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::rc::Rc;
use std::sync::Arc;

use indexmap::{IndexMap, IndexSet};

/// A stable summary of a value, used to detect "no real change".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Fingerprint(u64);

impl Fingerprint {
    /// Fingerprint of a plain `Hash` value, salted with a type tag.
    pub fn of<H: Hash + ?Sized>(tag: &str, value: &H) -> Self {
        let mut hasher = DefaultHasher::new();
        tag.hash(&mut hasher);
        value.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Combine child fingerprints where position matters.
    pub fn ordered<I>(tag: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let mut hasher = DefaultHasher::new();
        tag.hash(&mut hasher);
        let mut len = 0usize;
        for part in parts {
            part.0.hash(&mut hasher);
            len += 1;
        }
        len.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Combine child fingerprints where position does not matter.
    pub fn unordered<I>(tag: &str, parts: I) -> Self
    where
        I: IntoIterator<Item = Fingerprint>,
    {
        let mut parts: Vec<Fingerprint> = parts.into_iter().collect();
        parts.sort_unstable();
        Self::ordered(tag, parts)
    }

    /// The fingerprint used for a pointer re-entered while it is being hashed.
    pub fn circular(identity: usize) -> Self {
        Self::of("circular-structure", &identity)
    }

    /// Raw 64-bit value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

/// Scratch state for one fingerprinting call graph.
///
/// `cache` memoizes fingerprints of shared sub-values by identity, `seen` holds
/// the identities currently being hashed. Both are supplied by the caller and
/// dropped afterwards.
#[derive(Debug, Default)]
pub struct FingerprintState {
    cache: HashMap<usize, Fingerprint>,
    seen: HashSet<usize>,
}

impl FingerprintState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hash the value behind `identity`, guarding against cycles.
    pub fn visit<F>(&mut self, identity: usize, compute: F) -> Fingerprint
    where
        F: FnOnce(&mut Self) -> Fingerprint,
    {
        if self.seen.contains(&identity) {
            return Fingerprint::circular(identity);
        }
        if let Some(cached) = self.cache.get(&identity) {
            return *cached;
        }

        self.seen.insert(identity);
        let fingerprint = compute(self);
        self.seen.remove(&identity);

        self.cache.insert(identity, fingerprint);
        fingerprint
    }

    /// Number of identities memoized so far.
    pub fn cached(&self) -> usize {
        self.cache.len()
    }
}

/// Types that can be structurally fingerprinted.
pub trait ExtendedHash {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint;
}

/// Fingerprint a value with fresh scratch state.
pub fn fingerprint<T: ExtendedHash + ?Sized>(value: &T) -> Fingerprint {
    value.extended_hash(&mut FingerprintState::new())
}

/// Fingerprint a value reusing caller-supplied scratch state.
pub fn fingerprint_with<T: ExtendedHash + ?Sized>(
    value: &T,
    state: &mut FingerprintState,
) -> Fingerprint {
    value.extended_hash(state)
}

macro_rules! hash_scalar {
    ($($ty:ty),* $(,)?) => {
        $(
            impl ExtendedHash for $ty {
                fn extended_hash(&self, _state: &mut FingerprintState) -> Fingerprint {
                    Fingerprint::of(stringify!($ty), self)
                }
            }
        )*
    };
}

hash_scalar!(
    bool, char, u8, u16, u32, u64, u128, usize, i8, i16, i32, i64, i128, isize, str, (),
);

impl ExtendedHash for String {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        self.as_str().extended_hash(state)
    }
}

macro_rules! hash_float {
    ($($ty:ty),*) => {
        $(
            impl ExtendedHash for $ty {
                fn extended_hash(&self, _state: &mut FingerprintState) -> Fingerprint {
                    // -0.0 == 0.0 and every NaN is the same "value" for change detection
                    let canonical = if *self == 0.0 {
                        0.0
                    } else if self.is_nan() {
                        <$ty>::NAN
                    } else {
                        *self
                    };
                    Fingerprint::of(stringify!($ty), &canonical.to_bits())
                }
            }
        )*
    };
}

hash_float!(f32, f64);

impl<T: ExtendedHash + ?Sized> ExtendedHash for &T {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        (**self).extended_hash(state)
    }
}

impl<T: ExtendedHash + ?Sized> ExtendedHash for Box<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        (**self).extended_hash(state)
    }
}

impl<T: ExtendedHash> ExtendedHash for Option<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        match self {
            Some(value) => Fingerprint::ordered("Some", [value.extended_hash(state)]),
            None => Fingerprint::of("None", &()),
        }
    }
}

impl<T: ExtendedHash> ExtendedHash for [T] {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        let parts: Vec<_> = self.iter().map(|item| item.extended_hash(state)).collect();
        Fingerprint::ordered("seq", parts)
    }
}

impl<T: ExtendedHash, const N: usize> ExtendedHash for [T; N] {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        self.as_slice().extended_hash(state)
    }
}

impl<T: ExtendedHash> ExtendedHash for Vec<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        self.as_slice().extended_hash(state)
    }
}

impl<T: ExtendedHash> ExtendedHash for VecDeque<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        let parts: Vec<_> = self.iter().map(|item| item.extended_hash(state)).collect();
        Fingerprint::ordered("seq", parts)
    }
}

fn hash_entries<'a, K, V, I>(entries: I, state: &mut FingerprintState) -> Fingerprint
where
    K: ExtendedHash + 'a,
    V: ExtendedHash + 'a,
    I: IntoIterator<Item = (&'a K, &'a V)>,
{
    let parts: Vec<_> = entries
        .into_iter()
        .map(|(key, value)| {
            let key = key.extended_hash(state);
            let value = value.extended_hash(state);
            Fingerprint::ordered("entry", [key, value])
        })
        .collect();
    Fingerprint::unordered("map", parts)
}

fn hash_members<'a, T, I>(members: I, state: &mut FingerprintState) -> Fingerprint
where
    T: ExtendedHash + 'a,
    I: IntoIterator<Item = &'a T>,
{
    let parts: Vec<_> = members
        .into_iter()
        .map(|member| member.extended_hash(state))
        .collect();
    Fingerprint::unordered("set", parts)
}

impl<K: ExtendedHash, V: ExtendedHash, S> ExtendedHash for HashMap<K, V, S> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        hash_entries(self.iter(), state)
    }
}

impl<K: ExtendedHash, V: ExtendedHash> ExtendedHash for BTreeMap<K, V> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        hash_entries(self.iter(), state)
    }
}

impl<K: ExtendedHash, V: ExtendedHash, S> ExtendedHash for IndexMap<K, V, S> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        hash_entries(self.iter(), state)
    }
}

impl<T: ExtendedHash, S> ExtendedHash for HashSet<T, S> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        hash_members(self.iter(), state)
    }
}

impl<T: ExtendedHash> ExtendedHash for BTreeSet<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        hash_members(self.iter(), state)
    }
}

impl<T: ExtendedHash, S> ExtendedHash for IndexSet<T, S> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        hash_members(self.iter(), state)
    }
}

macro_rules! hash_tuple {
    ($($name:ident)+) => {
        impl<$($name: ExtendedHash),+> ExtendedHash for ($($name,)+) {
            #[allow(non_snake_case)]
            fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
                let ($($name,)+) = self;
                Fingerprint::ordered("tuple", [$($name.extended_hash(state)),+])
            }
        }
    };
}

hash_tuple!(A);
hash_tuple!(A B);
hash_tuple!(A B C);
hash_tuple!(A B C D);
hash_tuple!(A B C D E);
hash_tuple!(A B C D E F);

impl<T: ExtendedHash + ?Sized> ExtendedHash for Rc<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        let identity = Rc::as_ptr(self) as *const () as usize;
        state.visit(identity, |state| (**self).extended_hash(state))
    }
}

impl<T: ExtendedHash + ?Sized> ExtendedHash for Arc<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        let identity = Arc::as_ptr(self) as *const () as usize;
        state.visit(identity, |state| (**self).extended_hash(state))
    }
}

impl<T: ExtendedHash + ?Sized> ExtendedHash for RefCell<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        match self.try_borrow() {
            Ok(inner) => inner.extended_hash(state),
            // Mutably borrowed elsewhere: the contents are in flux.
            Err(_) => Fingerprint::of("borrowed", &(self as *const Self as *const () as usize)),
        }
    }
}

impl<T: ExtendedHash + ?Sized> ExtendedHash for parking_lot::Mutex<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        match self.try_lock() {
            Some(inner) => inner.extended_hash(state),
            None => Fingerprint::of("locked", &(self as *const Self as *const () as usize)),
        }
    }
}

impl<T: ExtendedHash + ?Sized> ExtendedHash for parking_lot::RwLock<T> {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        match self.try_read() {
            Some(inner) => inner.extended_hash(state),
            None => Fingerprint::of("locked", &(self as *const Self as *const () as usize)),
        }
    }
}

impl ExtendedHash for serde_json::Value {
    fn extended_hash(&self, state: &mut FingerprintState) -> Fingerprint {
        use serde_json::Value;

        match self {
            Value::Null => Fingerprint::of("null", &()),
            Value::Bool(value) => value.extended_hash(state),
            Value::Number(number) => {
                if let Some(int) = number.as_i64() {
                    int.extended_hash(state)
                } else if let Some(unsigned) = number.as_u64() {
                    // above i64::MAX; going through f64 would merge neighbours
                    unsigned.extended_hash(state)
                } else if let Some(float) = number.as_f64() {
                    float.extended_hash(state)
                } else {
                    Fingerprint::of("number", &number.to_string())
                }
            }
            Value::String(text) => text.extended_hash(state),
            Value::Array(items) => items.extended_hash(state),
            Value::Object(entries) => hash_entries(entries.iter(), state),
        }
    }
}
