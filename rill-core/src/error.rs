//! Error types for the reactive engine.
//!
//! Every error is `Clone` because a computed node caches its result, errors
//! included, and hands the same result to every reader until it is
//! invalidated.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T, E = ReactiveError> = std::result::Result<T, E>;

/// Errors produced by the reactive engine.
#[derive(Debug, Clone, Error)]
pub enum ReactiveError {
    /// A node transitively read itself while it was computing.
    #[error("cyclic dependency: node {node} was read while computing")]
    CyclicDependency { node: NodeId },

    /// A thunk failed with an application-level error.
    #[error("computation failed: {0}")]
    Computation(#[from] ComputationError),

    /// The node was destroyed, or its session was dropped.
    #[error("node {node} is no longer available")]
    StaleReadAfterDestroy { node: NodeId },

    /// The id does not name a node in this session.
    #[error("node {node} does not belong to this session")]
    UnknownNode { node: NodeId },

    /// A single flush ran more observers than the configured limit.
    #[error("flush exceeded {limit} observer runs")]
    FlushLimitExceeded { limit: usize },
}

impl ReactiveError {
    /// Wrap an application error as a computation failure.
    pub fn computation<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Computation(ComputationError::new(err))
    }

    /// Build a computation failure from a message.
    pub fn msg(message: impl fmt::Display) -> Self {
        Self::Computation(ComputationError::msg(message))
    }

    /// Check if this is a cycle error.
    pub fn is_cycle(&self) -> bool {
        matches!(self, Self::CyclicDependency { .. })
    }
}

/// A cloneable, type-erased application error raised by a thunk.
#[derive(Clone)]
pub struct ComputationError {
    inner: Arc<dyn std::error::Error + Send + Sync>,
}

impl ComputationError {
    pub fn new<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self { inner: Arc::new(err) }
    }

    pub fn msg(message: impl fmt::Display) -> Self {
        Self::new(MessageError(message.to_string()))
    }

    /// The wrapped application error, for inspection or `downcast_ref`.
    pub fn get_ref(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        &*self.inner
    }

    /// Whether two handles refer to the same underlying error value.
    ///
    /// A cached failure hands out clones of one error, so this tells a
    /// cached result from a fresh one.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.inner, f)
    }
}

impl fmt::Display for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&*self.inner, f)
    }
}

impl std::error::Error for ComputationError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.inner.source()
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
struct MessageError(String);

/// Errors raised while loading a [`RuntimeConfig`](crate::RuntimeConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid runtime config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid runtime config: {field} must be greater than zero")]
    Zero { field: &'static str },
}
