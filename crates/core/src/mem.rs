//! In-memory downloader capability and node format.
//!
//! These are real [Downloader](spate_api::Downloader) implementations
//! backed by memory instead of a network, with scriptable misbehaviour
//! (corruption, early failure, hangs, refusal). They exist so the race
//! scheduler's properties can be exercised hermetically, and so users
//! embedding spate can test their own wiring without gateways.

use spate_api::{
    id::{codec, multihash},
    Block, BlockStream, BoxFut, ContentId, Downloader, DynBlockStream,
    DynDownloader, DynTraversalSpec, LinkScanner, SpateError, SpateResult,
};
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The in-memory node format: arbitrary payload bytes plus child
/// links, serialized as dag-json via serde_json.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MemNode {
    /// Payload bytes.
    pub data: Vec<u8>,
    /// Child identities.
    pub links: Vec<ContentId>,
}

/// Build a verified block holding a [MemNode] with the given payload
/// and links, identified by the sha2-256 of its encoding.
pub fn mem_block(
    data: &[u8],
    links: Vec<ContentId>,
) -> SpateResult<Block> {
    let node = MemNode {
        data: data.to_vec(),
        links,
    };
    let encoded = serde_json::to_vec(&node)
        .map_err(|e| SpateError::other_src("failed to encode mem node", e))?;
    let id = ContentId::for_data(
        codec::DAG_JSON,
        multihash::SHA2_256,
        &encoded,
    )?;
    Ok(Block::new(id, encoded.into()))
}

/// Produce a corrupt copy of `block`: same claimed identity, altered
/// bytes.
pub fn corrupt_copy(block: &Block) -> Block {
    let mut data = block.data().to_vec();
    match data.first_mut() {
        Some(byte) => *byte = byte.wrapping_add(1),
        None => data.push(0),
    }
    Block::new(block.id().clone(), Bytes::from(data))
}

/// [LinkScanner] for the [MemNode] format.
#[derive(Debug)]
pub struct MemScanner;

impl LinkScanner for MemScanner {
    fn scan(
        &self,
        id: &ContentId,
        data: &[u8],
    ) -> SpateResult<Vec<ContentId>> {
        if id.codec() != codec::DAG_JSON {
            return Err(SpateError::traversal(format!(
                "mem scanner cannot parse codec {:#x} of block {id}",
                id.codec()
            )));
        }
        let node: MemNode = serde_json::from_slice(data).map_err(|e| {
            SpateError::traversal(format!(
                "block {id} is not a valid mem node: {e}"
            ))
        })?;
        Ok(node.links)
    }
}

/// How a [MemDownloader]'s stream behaves once its script runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemEnd {
    /// End the stream cleanly.
    Eof,
    /// Fail the stream with a transport error.
    Fail,
    /// Never yield again, like a silently dead connection.
    Hang,
}

/// A scriptable in-memory downloader capability.
#[derive(Debug)]
pub struct MemDownloader {
    name: String,
    script: Vec<Block>,
    end: MemEnd,
    refuse: bool,
    delay: Duration,
    live_streams: Arc<AtomicUsize>,
}

impl MemDownloader {
    /// A downloader that serves `blocks` in order, then ends cleanly.
    ///
    /// Script parents before children, the way container streams
    /// deliver them; a block the traversal does not need yet is
    /// dropped by the scheduler and never re-sent.
    pub fn serving(name: impl Into<String>, blocks: Vec<Block>) -> Self {
        Self {
            name: name.into(),
            script: blocks,
            end: MemEnd::Eof,
            refuse: false,
            delay: Duration::ZERO,
            live_streams: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A downloader that rejects every traversal spec.
    pub fn refusing(name: impl Into<String>) -> Self {
        let mut out = Self::serving(name, Vec::new());
        out.refuse = true;
        out
    }

    /// Fail with a transport error once the script runs out.
    pub fn then_fail(mut self) -> Self {
        self.end = MemEnd::Fail;
        self
    }

    /// Hang once the script runs out.
    pub fn then_hang(mut self) -> Self {
        self.end = MemEnd::Hang;
        self
    }

    /// Sleep this long before each block.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Counter of streams this downloader has open. Lets tests observe
    /// that cancellation and teardown release attempt resources.
    pub fn live_streams(&self) -> Arc<AtomicUsize> {
        self.live_streams.clone()
    }

    /// Finish as a trait object for a [Client](crate::Client) pool.
    pub fn into_dyn(self) -> DynDownloader {
        Arc::new(self)
    }
}

impl Downloader for MemDownloader {
    fn name(&self) -> &str {
        &self.name
    }

    fn download(
        &self,
        _root: ContentId,
        spec: DynTraversalSpec,
    ) -> BoxFut<'_, SpateResult<DynBlockStream>> {
        Box::pin(async move {
            if self.refuse {
                return Err(SpateError::unsupported(format!(
                    "{} does not serve traversal {spec:?}",
                    self.name
                )));
            }
            self.live_streams.fetch_add(1, Ordering::SeqCst);
            let out: DynBlockStream = Box::new(MemStream {
                remaining: self.script.clone().into(),
                end: self.end,
                delay: self.delay,
                live: self.live_streams.clone(),
            });
            Ok(out)
        })
    }
}

struct MemStream {
    remaining: VecDeque<Block>,
    end: MemEnd,
    delay: Duration,
    live: Arc<AtomicUsize>,
}

impl Drop for MemStream {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

impl BlockStream for MemStream {
    fn next(&mut self) -> BoxFut<'_, SpateResult<Option<Block>>> {
        Box::pin(async move {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.remaining.pop_front() {
                Some(block) => Ok(Some(block)),
                None => match self.end {
                    MemEnd::Eof => Ok(None),
                    MemEnd::Fail => Err(SpateError::transport(
                        "scripted stream failure",
                    )),
                    MemEnd::Hang => {
                        futures::future::pending::<()>().await;
                        unreachable!()
                    }
                },
            }
        })
    }
}
