//! Rill Core
//!
//! A reactive dependency-tracking engine. Mutable value cells feed lazily
//! recomputed, cached computed nodes and eagerly re-run observers. Reads
//! made during an evaluation are recorded as dependencies automatically, and
//! a write invalidates exactly the nodes that read the old value.
//!
//! It implements:
//!
//! - Reactive primitives (cells, computed nodes, observers)
//! - Dynamic dependency tracking with cycle detection
//! - A flush scheduler with priorities and batching
//! - Timed invalidation driven by the embedding event loop
//! - A structured diagnostic event log
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Cells, computed nodes, observers and the session runtime
//! - `graph`: Dependency graph, node states and the flush queue
//! - `timer`: Clocks and scheduled invalidations
//! - `diagnostics`: The graph event log
//! - `config`: Per-session configuration
//! - `error`: Error types
//!
//! # Example
//!
//! ```rust
//! use rill_core::Runtime;
//! use std::sync::{Arc, Mutex};
//!
//! let rt = Runtime::new();
//! let count = rt.new_value(1);
//!
//! let source = count.clone();
//! let doubled = rt.new_computed(move || source.get() * 2);
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let (log, reader) = (seen.clone(), doubled.clone());
//! let _observer = rt.new_observer(move || {
//!     log.lock().unwrap().push(reader.read()?);
//!     Ok(())
//! });
//!
//! count.set(5);
//! assert_eq!(*seen.lock().unwrap(), vec![2, 10]);
//! ```

pub mod config;
pub mod diagnostics;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod timer;

pub use config::RuntimeConfig;
pub use diagnostics::{EventKind, GraphEvent};
pub use error::{ComputationError, ConfigError, ReactiveError, Result};
pub use graph::{
    ComputedState, FlushReport, NodeId, NodeKind, NodeStatus, ObserverFailure, ObserverState,
    SchedulerState,
};
pub use reactive::{Computed, Observer, Runtime, ValueCell};
pub use timer::{Clock, ManualClock, SystemClock, TimerHandle, TimerId};
