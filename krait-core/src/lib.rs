//! Krait Core
//!
//! Reactive, dependency-tracking attributes for plain Rust types.
//!
//! It implements:
//!
//! - Primitive signals holding settable values with no-op write detection
//! - Dynamic signals computing memoized values, with optional expiration
//! - Automatic dependency tracking between signals, across owner types
//! - Structural fingerprints for change detection
//! - Serialization adapters configured through signals
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: descriptors, handlers, the tracking stack and propagation
//! - `hashing`: structural fingerprints used as the change detector
//! - `transcoder`: JSON and MessagePack encoders
//! - `error`: the error taxonomy
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::LazyLock;
//! use krait_core::reactive::{Scope, Signal, SignalOwner};
//!
//! struct Order { scope: Scope }
//!
//! impl SignalOwner for Order {
//!     fn scope(&self) -> &Scope { &self.scope }
//! }
//!
//! static QUANTITY: LazyLock<Signal<Order, u32>> =
//!     LazyLock::new(|| Signal::new(1).named("quantity"));
//! static TOTAL: LazyLock<Signal<Order, u32>> =
//!     LazyLock::new(|| Signal::computed(|order| Ok(QUANTITY.read(order)? * 25)).named("total"));
//!
//! let order = Order { scope: Scope::new() };
//! assert_eq!(TOTAL.read(&order)?, 25);
//!
//! QUANTITY.write(&order, 4)?;
//! // TOTAL was invalidated and recomputes on this read
//! assert_eq!(TOTAL.read(&order)?, 100);
//! ```

pub mod error;
pub mod hashing;
pub mod reactive;
pub mod transcoder;

pub use error::{Result, SignalError};
pub use hashing::{fingerprint, ExtendedHash, Fingerprint};
pub use reactive::{Scope, Signal, SignalOwner};
