//! Downloader capability types.

use crate::{Block, BoxFut, ContentId, DynTraversalSpec, SpateResult};
use std::sync::Arc;

/// A stream of blocks from one downloader attempt.
///
/// No ordering guarantee is made. The stream must either be drained to
/// its end or dropped; dropping it releases all underlying resources
/// (connections, parser buffers) and it is never resumed afterwards.
pub trait BlockStream: 'static + Send {
    /// The next block, `Ok(None)` at a clean end of stream, or the
    /// transport/framing error that terminated the stream. Must not be
    /// called again after it has returned `Ok(None)` or an error.
    fn next(&mut self) -> BoxFut<'_, SpateResult<Option<Block>>>;
}

impl std::fmt::Debug for dyn BlockStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlockStream")
    }
}

/// Trait object [BlockStream].
pub type DynBlockStream = Box<dyn BlockStream>;

/// A downloader capability: one configured data source able to serve
/// traversals of content-addressed data.
///
/// Implementations are mutually untrusted and independently failing;
/// nothing a capability returns is believed until it has passed
/// verification at the scheduler's merge point.
pub trait Downloader: 'static + Send + Sync + std::fmt::Debug {
    /// A human-readable name for logs.
    fn name(&self) -> &str;

    /// Start one download of `spec` rooted at `root`.
    ///
    /// A capability that structurally cannot satisfy `spec` must fail
    /// here with a descriptive error, before returning any stream,
    /// rather than silently returning a wrong or partial answer.
    fn download(
        &self,
        root: ContentId,
        spec: DynTraversalSpec,
    ) -> BoxFut<'_, SpateResult<DynBlockStream>>;
}

/// Trait object [Downloader].
pub type DynDownloader = Arc<dyn Downloader>;
