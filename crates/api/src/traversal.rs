//! Traversal spec types.
//!
//! A traversal spec declares which nodes of a Merkle-DAG must be
//! visited. The evaluator behind it is an external collaborator; the
//! scheduler only consumes the narrow contract defined here: build the
//! single-owner mutable [TraversalState] for a root, ask it what is
//! needed, and advance it with verified blocks.

use crate::{Block, ContentId, SpateResult};
use std::sync::Arc;

/// The structural shape of a traversal, so that backends whose wire
/// protocol cannot express arbitrary selections can reject a spec
/// before transferring anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraversalScope {
    /// Every block reachable under the root.
    Everything,
    /// Some narrower selection.
    Partial,
}

/// A declarative traversal spec. Shared by reference with every
/// downloader attempt of a call; must therefore be cheap and stateless.
pub trait TraversalSpec: 'static + Send + Sync + std::fmt::Debug {
    /// The structural shape of this spec.
    fn scope(&self) -> TraversalScope;

    /// Build the mutable traversal state for one download call rooted
    /// at `root`.
    fn start(&self, root: &ContentId)
        -> SpateResult<Box<dyn TraversalState>>;
}

/// Trait object [TraversalSpec].
pub type DynTraversalSpec = Arc<dyn TraversalSpec>;

/// Single-owner mutable traversal state.
///
/// Owned exclusively by the scheduler's merge point and advanced only
/// with verified blocks; a Merkle-DAG node reveals its children only
/// once its own bytes are available.
pub trait TraversalState: 'static + Send + std::fmt::Debug {
    /// Is this identity currently needed by the traversal?
    fn is_needed(&self, id: &ContentId) -> bool;

    /// Advance the traversal with a verified block, returning any newly
    /// needed child identities. Content that cannot be reconciled with
    /// the spec is a traversal violation; the state must be left
    /// unchanged in that case.
    fn advance(&mut self, block: &Block) -> SpateResult<Vec<ContentId>>;

    /// Is the traversal complete?
    fn is_complete(&self) -> bool;
}

/// Extracts child links from one verified node. This is the seam
/// between a generic traversal and the concrete codecs it can walk.
pub trait LinkScanner: 'static + Send + Sync + std::fmt::Debug {
    /// Parse `data` (the verified bytes of `id`) and return the
    /// identities it links to. A codec the scanner cannot parse is a
    /// traversal violation.
    fn scan(
        &self,
        id: &ContentId,
        data: &[u8],
    ) -> SpateResult<Vec<ContentId>>;
}

/// Trait object [LinkScanner].
pub type DynLinkScanner = Arc<dyn LinkScanner>;
