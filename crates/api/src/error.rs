//! Spate error types.

use crate::ContentId;
use std::sync::Arc;

/// A clonable trait-object inner error.
#[derive(Clone, Default)]
pub struct DynInnerError(
    pub Option<Arc<dyn std::error::Error + 'static + Send + Sync>>,
);

impl std::fmt::Debug for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Display for DynInnerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0.as_ref() {
            None => f.write_str("None"),
            Some(s) => s.fmt(f),
        }
    }
}

impl std::error::Error for DynInnerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.0.as_ref().map(|s| {
            let out: &(dyn std::error::Error + 'static) = &**s;
            out
        })
    }
}

impl DynInnerError {
    /// Construct a new DynInnerError from a source error.
    pub fn new<E: std::error::Error + 'static + Send + Sync>(e: E) -> Self {
        Self(Some(Arc::new(e)))
    }
}

/// The core spate error type. This type is used in all external
/// spate apis as well as internally in the scheduler and backends.
///
/// This type is required to implement `Clone` to ease the use of
/// shared futures, which require the entire `Result` to be `Clone`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SpateError {
    /// A downloader attempt could not start, or its stream ended
    /// abnormally. Recoverable at call granularity while unused
    /// capabilities remain in the pool.
    #[error("transport: {ctx} (src: {src})")]
    Transport {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },

    /// A block's bytes do not match the digest its identity claims,
    /// or the identity names a digest function we cannot compute.
    #[error("corrupt block {id}: content does not match claimed digest")]
    CorruptBlock {
        /// The identity the corrupt delivery claimed.
        id: ContentId,
    },

    /// Parsed block content could not be reconciled with the traversal.
    #[error("traversal violation: {ctx}")]
    TraversalViolation {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// A downloader capability cannot structurally satisfy the
    /// requested traversal spec.
    #[error("unsupported traversal: {ctx}")]
    UnsupportedTraversal {
        /// Any context associated with this error.
        ctx: Arc<str>,
    },

    /// The traversal is incomplete and no downloader capability
    /// remains to continue it. Items emitted before this error stand
    /// as valid.
    #[error("source pool exhausted before the traversal completed")]
    Exhausted,

    /// The caller cancelled the download before the traversal
    /// completed. Items emitted before this error stand as valid.
    #[error("download cancelled")]
    Cancelled,

    /// Generic spate internal error.
    #[error("{ctx} (src: {src})")]
    Other {
        /// Any context associated with this error.
        ctx: Arc<str>,

        /// The inner error (if any).
        #[source]
        src: DynInnerError,
    },
}

impl SpateError {
    /// Construct a transport error.
    pub fn transport<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Transport {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct a transport error with an inner source error.
    pub fn transport_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Transport {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }

    /// Construct a traversal violation error.
    pub fn traversal<C: std::fmt::Display>(ctx: C) -> Self {
        Self::TraversalViolation {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct an unsupported-traversal error.
    pub fn unsupported<C: std::fmt::Display>(ctx: C) -> Self {
        Self::UnsupportedTraversal {
            ctx: ctx.to_string().into_boxed_str().into(),
        }
    }

    /// Construct an "other" error.
    pub fn other<C: std::fmt::Display>(ctx: C) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::default(),
        }
    }

    /// Construct an "other" error with an inner source error.
    pub fn other_src<
        C: std::fmt::Display,
        S: std::error::Error + 'static + Send + Sync,
    >(
        ctx: C,
        src: S,
    ) -> Self {
        Self::Other {
            ctx: ctx.to_string().into_boxed_str().into(),
            src: DynInnerError::new(src),
        }
    }
}

/// The core spate result type.
pub type SpateResult<T> = Result<T, SpateError>;
