//! The race scheduler.
//!
//! One call races up to a bounded number of downloader attempts, one
//! per configured capability, all targeting the *full* requested
//! traversal. That is deliberate: any attempt's progress benefits all
//! others through dedup, and the first source to deliver each needed
//! block wins.
//!
//! It consists of multiple parts:
//! - Attempt tasks, one per live capability, that pull blocks from
//!   their capability's stream and push raw events upward.
//! - A single merge task that owns all shared state (traversal state
//!   and the dedup set), verifies and deduplicates every delivery,
//!   forwards accepted blocks to the caller, and replaces failed
//!   attempts from the spare pool.
//!
//! ### Merge task
//!
//! A channel acts as the fan-in point. Attempt tasks share no mutable
//! state with each other; they communicate only upward through that
//! channel, so the merge task can mutate the traversal and dedup sets
//! without any locking. The flow for each received block is:
//!
//! - Recompute the digest named by the block's identity. A mismatch is
//!   a corrupt delivery: it is discarded, counted against the attempt,
//!   and never surfaced per-block. An attempt crossing the configured
//!   corrupt-delivery threshold is torn down.
//! - Discard identities already emitted (dedup) or not currently needed
//!   (sources may legitimately over-deliver); neither is penalized.
//!   Checking dedup first keeps advancement idempotent: a re-delivered
//!   identity can never re-enqueue its children.
//! - Advance the traversal, mark the identity emitted, and forward the
//!   block on the bounded output channel. A full output buffer pauses
//!   the merge task, which in turn backpressures every attempt.
//!
//! ### Attempt tasks
//!
//! An attempt is a Running -> {Succeeded, Failed, Cancelled} machine.
//! It starts its capability's download, then forwards blocks until the
//! stream ends, errors, or sits idle past the configured timeout. The
//! merge task aborts attempt tasks on completion, replacement, and
//! cancellation; dropping the attempt's future drops its block stream,
//! which releases the underlying transport resources on every exit
//! path.

use spate_api::{
    Block, ContentId, DynDownloader, DynTraversalSpec, SpateError,
    SpateResult, TraversalState,
};
use std::collections::{HashMap, HashSet, VecDeque};
use std::time::Duration;
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::task::JoinHandle;

/// Configuration parameters for [Client].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RaceConfig {
    /// How many downloader attempts may run concurrently within one
    /// call. Capabilities beyond this bound wait as spares. Default: 4.
    pub max_parallel_attempts: usize,

    /// How many corrupt or irreconcilable deliveries one attempt may
    /// make before it is torn down and replaced. Default: 3.
    pub corrupt_block_threshold: u32,

    /// Bound of the caller-facing output buffer, in blocks. A full
    /// buffer pauses the scheduler rather than buffering unboundedly.
    /// Default: 16.
    pub output_buffer: usize,

    /// How long one attempt's stream may sit idle before the attempt
    /// is treated as failed, in milliseconds. A silent dead connection
    /// is otherwise indistinguishable from a slow one. 0 disables the
    /// timeout. Default: 30000.
    pub idle_timeout_ms: u64,
}

impl Default for RaceConfig {
    fn default() -> Self {
        Self {
            max_parallel_attempts: 4,
            corrupt_block_threshold: 3,
            output_buffer: 16,
            idle_timeout_ms: 30_000,
        }
    }
}

/// A racing downloader over a pre-configured pool of capabilities.
///
/// The pool is the complete set of sources a call may use; listing a
/// source twice is allowed and gives it two independent attempts.
#[derive(Debug)]
pub struct Client {
    config: RaceConfig,
    pool: Vec<DynDownloader>,
}

impl Client {
    /// Construct a client from a config and a capability pool.
    pub fn new(config: RaceConfig, pool: Vec<DynDownloader>) -> Self {
        Self { config, pool }
    }

    /// Construct a client with the default [RaceConfig].
    pub fn with_defaults(pool: Vec<DynDownloader>) -> Self {
        Self::new(RaceConfig::default(), pool)
    }

    /// Download everything `spec` requires under `root`, racing the
    /// configured pool. Must be called within a tokio runtime.
    ///
    /// The returned stream lazily yields each needed block exactly
    /// once, in no particular order, every one verified against its
    /// identity. It closes cleanly on completion, or after a single
    /// terminal error item stating the proximate cause.
    pub fn download(
        &self,
        root: ContentId,
        spec: DynTraversalSpec,
    ) -> DownloadStream {
        let cap = self.config.output_buffer.max(1);
        let (out_tx, out_rx) = channel(cap);
        let stream = DownloadStream {
            rx: out_rx,
            cancelled: false,
            cancel_reported: false,
        };

        let state = match spec.start(&root) {
            Ok(state) => state,
            Err(err) => {
                // Capacity is at least 1 and nothing has been sent yet.
                let _ = out_tx.try_send(Err(err));
                return stream;
            }
        };

        let idle = (self.config.idle_timeout_ms > 0)
            .then(|| Duration::from_millis(self.config.idle_timeout_ms));
        let (event_tx, event_rx) = channel(cap);
        let task = RaceTask {
            cfg: self.config.clone(),
            root,
            spec,
            state,
            seen: HashSet::new(),
            attempts: HashMap::new(),
            spares: self.pool.iter().cloned().collect(),
            next_attempt_id: 0,
            event_tx,
            idle,
        };
        tokio::spawn(task.run(event_rx, out_tx));
        stream
    }
}

/// The caller-facing output sequence of one download call: lazily
/// produced, finite, and non-restartable.
///
/// Dropping it cancels all underlying work immediately.
pub struct DownloadStream {
    rx: Receiver<SpateResult<Block>>,
    cancelled: bool,
    cancel_reported: bool,
}

impl std::fmt::Debug for DownloadStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadStream")
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

impl DownloadStream {
    /// The next result item. `None` means the sequence closed cleanly:
    /// the traversal completed and every needed block was delivered.
    pub async fn recv(&mut self) -> Option<SpateResult<Block>> {
        futures::StreamExt::next(self).await
    }

    /// Cancel the download. All live attempts are torn down; blocks
    /// already buffered are still delivered, followed by a terminal
    /// [SpateError::Cancelled] item.
    pub fn cancel(&mut self) {
        self.rx.close();
        self.cancelled = true;
    }
}

impl futures::Stream for DownloadStream {
    type Item = SpateResult<Block>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        use std::task::Poll;
        match self.rx.poll_recv(cx) {
            Poll::Ready(None)
                if self.cancelled && !self.cancel_reported =>
            {
                self.cancel_reported = true;
                Poll::Ready(Some(Err(SpateError::Cancelled)))
            }
            other => other,
        }
    }
}

enum AttemptEvent {
    Block(u64, Block),
    Finished(u64),
    Failed(u64, SpateError),
}

struct Attempt {
    name: String,
    corrupt_deliveries: u32,
    task: JoinHandle<()>,
}

enum Outcome {
    Complete,
    Exhausted,
    Cancelled,
}

struct RaceTask {
    cfg: RaceConfig,
    root: ContentId,
    spec: DynTraversalSpec,
    state: Box<dyn TraversalState>,
    seen: HashSet<ContentId>,
    attempts: HashMap<u64, Attempt>,
    spares: VecDeque<DynDownloader>,
    next_attempt_id: u64,
    event_tx: Sender<AttemptEvent>,
    idle: Option<Duration>,
}

impl RaceTask {
    async fn run(
        mut self,
        mut event_rx: Receiver<AttemptEvent>,
        out_tx: Sender<SpateResult<Block>>,
    ) {
        let outcome = 'race: {
            if self.state.is_complete() {
                break 'race Outcome::Complete;
            }

            let initial = self
                .cfg
                .max_parallel_attempts
                .max(1)
                .min(self.spares.len());
            for _ in 0..initial {
                self.spawn_attempt();
            }

            loop {
                if self.attempts.is_empty() {
                    break 'race Outcome::Exhausted;
                }
                let event = tokio::select! {
                    _ = out_tx.closed() => break 'race Outcome::Cancelled,
                    event = event_rx.recv() => match event {
                        Some(event) => event,
                        None => break 'race Outcome::Cancelled,
                    },
                };
                if let Some(outcome) =
                    self.handle_event(event, &out_tx).await
                {
                    break 'race outcome;
                }
            }
        };

        for (_, attempt) in self.attempts.drain() {
            attempt.task.abort();
        }

        match outcome {
            Outcome::Complete => {
                tracing::debug!(
                    "traversal of {} complete, {} blocks emitted",
                    self.root,
                    self.seen.len()
                );
            }
            Outcome::Exhausted => {
                tracing::warn!(
                    "source pool exhausted with traversal of {} incomplete",
                    self.root
                );
                let _ = out_tx.send(Err(SpateError::Exhausted)).await;
            }
            Outcome::Cancelled => {
                tracing::debug!("download of {} cancelled by caller", self.root);
            }
        }
    }

    async fn handle_event(
        &mut self,
        event: AttemptEvent,
        out_tx: &Sender<SpateResult<Block>>,
    ) -> Option<Outcome> {
        match event {
            AttemptEvent::Block(attempt_id, block) => {
                // A torn-down attempt may have events still queued.
                if !self.attempts.contains_key(&attempt_id) {
                    return None;
                }

                if let Err(err) = block.verify() {
                    self.note_bad_delivery(attempt_id, &err);
                    return None;
                }

                let id = block.id().clone();
                if self.seen.contains(&id) {
                    return None;
                }
                if !self.state.is_needed(&id) {
                    tracing::debug!(
                        "dropping over-delivered block {id} from attempt {attempt_id}"
                    );
                    return None;
                }

                match self.state.advance(&block) {
                    Ok(children) => {
                        if !children.is_empty() {
                            tracing::debug!(
                                "block {id} revealed {} new children",
                                children.len()
                            );
                        }
                    }
                    Err(err) => {
                        self.note_bad_delivery(attempt_id, &err);
                        return None;
                    }
                }

                self.seen.insert(id);
                if out_tx.send(Ok(block)).await.is_err() {
                    return Some(Outcome::Cancelled);
                }
                if self.state.is_complete() {
                    return Some(Outcome::Complete);
                }
                None
            }
            AttemptEvent::Finished(attempt_id) => {
                if let Some(attempt) = self.attempts.remove(&attempt_id) {
                    // Traversal incomplete, or we would have stopped on
                    // the block that completed it. At this layer a clean
                    // end from a source that lacks part of the DAG is
                    // failure: replace it.
                    tracing::warn!(
                        "attempt {attempt_id} ({}) ended before the traversal completed",
                        attempt.name
                    );
                    self.spawn_attempt();
                }
                None
            }
            AttemptEvent::Failed(attempt_id, err) => {
                if let Some(attempt) = self.attempts.remove(&attempt_id) {
                    tracing::warn!(
                        "attempt {attempt_id} ({}) failed: {err}",
                        attempt.name
                    );
                    attempt.task.abort();
                    self.spawn_attempt();
                }
                None
            }
        }
    }

    fn note_bad_delivery(&mut self, attempt_id: u64, err: &SpateError) {
        let over = {
            let Some(attempt) = self.attempts.get_mut(&attempt_id) else {
                return;
            };
            attempt.corrupt_deliveries += 1;
            tracing::warn!(
                "attempt {attempt_id} ({}) delivered an unusable block: {err}",
                attempt.name
            );
            attempt.corrupt_deliveries >= self.cfg.corrupt_block_threshold
        };
        if over {
            if let Some(attempt) = self.attempts.remove(&attempt_id) {
                tracing::warn!(
                    "attempt {attempt_id} ({}) crossed the corrupt-delivery threshold, dropping source",
                    attempt.name
                );
                attempt.task.abort();
            }
            self.spawn_attempt();
        }
    }

    fn spawn_attempt(&mut self) {
        let Some(downloader) = self.spares.pop_front() else {
            return;
        };
        let attempt_id = self.next_attempt_id;
        self.next_attempt_id += 1;
        let name = downloader.name().to_string();
        tracing::debug!("starting attempt {attempt_id} against {name}");
        let task = tokio::spawn(attempt_task(
            attempt_id,
            downloader,
            self.root.clone(),
            self.spec.clone(),
            self.event_tx.clone(),
            self.idle,
        ));
        self.attempts.insert(
            attempt_id,
            Attempt {
                name,
                corrupt_deliveries: 0,
                task,
            },
        );
    }
}

async fn attempt_task(
    attempt_id: u64,
    downloader: DynDownloader,
    root: ContentId,
    spec: DynTraversalSpec,
    event_tx: Sender<AttemptEvent>,
    idle: Option<Duration>,
) {
    let mut stream = match downloader.download(root, spec).await {
        Ok(stream) => stream,
        Err(err) => {
            let _ = event_tx
                .send(AttemptEvent::Failed(attempt_id, err))
                .await;
            return;
        }
    };

    loop {
        let next = match idle {
            Some(timeout) => {
                match tokio::time::timeout(timeout, stream.next()).await {
                    Ok(next) => next,
                    Err(_elapsed) => {
                        let _ = event_tx
                            .send(AttemptEvent::Failed(
                                attempt_id,
                                SpateError::transport(format!(
                                    "stream idle for more than {timeout:?}"
                                )),
                            ))
                            .await;
                        return;
                    }
                }
            }
            None => stream.next().await,
        };
        match next {
            Ok(Some(block)) => {
                if event_tx
                    .send(AttemptEvent::Block(attempt_id, block))
                    .await
                    .is_err()
                {
                    // Merge task is gone; the call is over.
                    return;
                }
            }
            Ok(None) => {
                let _ = event_tx
                    .send(AttemptEvent::Finished(attempt_id))
                    .await;
                return;
            }
            Err(err) => {
                let _ = event_tx
                    .send(AttemptEvent::Failed(attempt_id, err))
                    .await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod test;
