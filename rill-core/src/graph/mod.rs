//! Dependency Graph
//!
//! This module implements the dependency graph that tracks relationships
//! between reactive values and the computations that read them.
//!
//! # Overview
//!
//! - Nodes are cells, computed nodes or observers.
//! - An edge `producer -> consumer` exists because the consumer read the
//!   producer during its last evaluation.
//!
//! Edges are never persisted across evaluations. When a consumer starts
//! evaluating it drops all of its upstream edges and rediscovers them from
//! what it reads; when a producer is invalidated it drops all of its
//! downstream edges. The edge set therefore always reflects the most
//! recent run of every consumer, which is what lets a node switch between
//! dependencies from one run to the next.
//!
//! # Design Decisions
//!
//! 1. One arena per session, indexed by node ID. Edge sets are
//!    insertion-ordered so invalidation visits dependents deterministically.
//!
//! 2. Both directions are stored, so a consumer can sever its upstream edges
//!    without scanning the whole graph.

mod arena;
mod node;
pub(crate) mod scheduler;

pub(crate) use arena::{ComputeOutcome, ComputedRead, Graph};
pub(crate) use node::Node;
pub use node::{ComputedState, NodeId, NodeKind, NodeStatus, ObserverState};
pub use scheduler::{FlushReport, ObserverFailure, SchedulerState};
