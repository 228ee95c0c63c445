//! Reactive Primitives
//!
//! This module implements the user-facing side of the engine: value cells,
//! computed nodes and observers, all created through a [`Runtime`].
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`ValueCell`] is a container for mutable state. When a cell is read
//! while a computed node or observer is evaluating, the cell registers that
//! consumer as a dependent. When the cell's value changes, its dependents are
//! invalidated.
//!
//! ## Computed nodes
//!
//! A [`Computed`] is a derived value that caches its result. It re-evaluates
//! only when read after one of its dependencies changed.
//!
//! ## Observers
//!
//! An [`Observer`] is a side-effecting computation that re-runs on the next
//! flush after one of its dependencies changes. Observers synchronize
//! reactive state with the outside world.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered, not declared. Each session keeps a stack of
//! the consumers currently evaluating; a read attributes itself to the top
//! of the stack.

mod cell;
mod computed;
mod context;
mod observer;
mod runtime;

pub use cell::ValueCell;
pub use computed::Computed;
pub use observer::Observer;
pub use runtime::Runtime;
pub(crate) use runtime::RuntimeInner;
