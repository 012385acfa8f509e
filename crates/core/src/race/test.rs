use super::*;
use crate::everything::EverythingSpec;
use crate::mem::{
    corrupt_copy, mem_block, MemDownloader, MemScanner,
};
use std::sync::atomic::Ordering;

pub(crate) mod utils {
    use super::*;

    pub fn everything() -> DynTraversalSpec {
        EverythingSpec::new(Arc::new(MemScanner))
    }

    /// Root R linking leaves A and B. Returned in parent-first serving
    /// order, as container streams deliver them.
    pub fn small_dag() -> (ContentId, Vec<Block>) {
        let leaf_a = mem_block(b"leaf a", vec![]).unwrap();
        let leaf_b = mem_block(b"leaf b", vec![]).unwrap();
        let root = mem_block(
            b"root",
            vec![leaf_a.id().clone(), leaf_b.id().clone()],
        )
        .unwrap();
        (root.id().clone(), vec![root, leaf_a, leaf_b])
    }

    /// Drain a download stream to its end, splitting accepted blocks
    /// from the terminal error (if any).
    pub async fn collect(
        mut stream: DownloadStream,
    ) -> (Vec<Block>, Option<SpateError>) {
        let mut blocks = Vec::new();
        loop {
            match stream.recv().await {
                Some(Ok(block)) => blocks.push(block),
                Some(Err(err)) => {
                    // Terminal item: the sequence must close after it.
                    assert!(stream.recv().await.is_none());
                    return (blocks, Some(err));
                }
                None => return (blocks, None),
            }
        }
    }

    pub fn ids(blocks: &[Block]) -> HashSet<ContentId> {
        blocks.iter().map(|b| b.id().clone()).collect()
    }

    pub fn assert_exactly(blocks: &[Block], expected: &[Block]) {
        // Each emitted block verifies, and the set is exactly the
        // expected closure with no duplicates.
        for block in blocks {
            block.verify().unwrap();
        }
        assert_eq!(blocks.len(), ids(blocks).len(), "duplicate emission");
        assert_eq!(ids(expected), ids(blocks));
    }
}

use utils::*;

use spate_api::{TraversalScope, TraversalSpec};
use std::sync::Arc;

#[tokio::test]
async fn completeness_from_a_single_source() {
    let (root, all) = small_dag();
    let client = Client::with_defaults(vec![MemDownloader::serving(
        "only",
        all.clone(),
    )
    .into_dyn()]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn racing_identical_sources_dedups_every_identity() {
    let (root, all) = small_dag();
    let client = Client::with_defaults(vec![
        MemDownloader::serving("one", all.clone()).into_dyn(),
        MemDownloader::serving("two", all.clone()).into_dyn(),
    ]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn corrupt_source_never_reaches_the_caller() {
    let (root, all) = small_dag();
    let corrupted: Vec<_> = all.iter().map(corrupt_copy).collect();
    let client = Client::with_defaults(vec![
        MemDownloader::serving("evil", corrupted).into_dyn(),
        MemDownloader::serving("good", all.clone()).into_dyn(),
    ]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn corrupt_only_pool_exhausts_with_nothing_emitted() {
    let (root, all) = small_dag();
    let corrupted: Vec<_> = all.iter().map(corrupt_copy).collect();
    let client = Client::with_defaults(vec![MemDownloader::serving(
        "evil", corrupted,
    )
    .into_dyn()]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(blocks.is_empty());
    assert!(matches!(err, Some(SpateError::Exhausted)), "got {err:?}");
}

#[tokio::test]
async fn failover_completes_without_re_emitting_accepted_blocks() {
    // Capability 1 serves {R, A} then disconnects, capability 2 serves
    // {R, A, B} correctly: output is exactly {R, A, B}, each once.
    let (root, all) = small_dag();
    let partial = vec![all[0].clone(), all[1].clone()];
    let config = RaceConfig {
        // One attempt at a time makes the failover order deterministic.
        max_parallel_attempts: 1,
        ..Default::default()
    };
    let client = Client::new(
        config,
        vec![
            MemDownloader::serving("partial", partial)
                .then_fail()
                .into_dyn(),
            MemDownloader::serving("full", all.clone()).into_dyn(),
        ],
    );
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn clean_eof_before_completion_fails_over() {
    let (root, all) = small_dag();
    let partial = vec![all[0].clone()];
    let config = RaceConfig {
        max_parallel_attempts: 1,
        ..Default::default()
    };
    let client = Client::new(
        config,
        vec![
            // Ends cleanly while the traversal still needs A and B.
            MemDownloader::serving("short", partial).into_dyn(),
            MemDownloader::serving("full", all.clone()).into_dyn(),
        ],
    );
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn exhaustion_after_every_source_fails() {
    let (root, all) = small_dag();
    let client = Client::with_defaults(vec![
        MemDownloader::serving("half", vec![all[0].clone(), all[1].clone()])
            .then_fail()
            .into_dyn(),
        MemDownloader::serving("root-only", vec![all[0].clone()])
            .then_fail()
            .into_dyn(),
    ]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(matches!(err, Some(SpateError::Exhausted)), "got {err:?}");
    // Whatever was emitted is a valid, duplicate-free subset of S.
    for block in &blocks {
        block.verify().unwrap();
    }
    assert_eq!(blocks.len(), ids(&blocks).len());
    assert!(ids(&blocks).is_subset(&ids(&all)));
}

#[tokio::test]
async fn cancel_tears_down_live_attempts() {
    let (root, all) = small_dag();
    let source =
        MemDownloader::serving("hanging", vec![all[0].clone()]).then_hang();
    let live = source.live_streams();
    let config = RaceConfig {
        idle_timeout_ms: 0,
        ..Default::default()
    };
    let client = Client::new(config, vec![source.into_dyn()]);

    let mut stream = client.download(root, everything());
    let first = stream.recv().await;
    assert!(matches!(first, Some(Ok(_))), "got {first:?}");

    stream.cancel();
    let terminal = stream.recv().await;
    assert!(
        matches!(terminal, Some(Err(SpateError::Cancelled))),
        "got {terminal:?}"
    );
    assert!(stream.recv().await.is_none());

    // The attempt's stream must be dropped within bounded time.
    for _ in 0..200 {
        if live.load(Ordering::SeqCst) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("attempt resources were not released after cancel");
}

#[tokio::test]
async fn dropping_the_stream_cancels_the_race() {
    let (root, all) = small_dag();
    let source =
        MemDownloader::serving("hanging", all.clone()).then_hang();
    let live = source.live_streams();
    let config = RaceConfig {
        idle_timeout_ms: 0,
        ..Default::default()
    };
    let client = Client::new(config, vec![source.into_dyn()]);

    let stream = client.download(root, everything());
    // Give the attempt a chance to actually open its stream.
    tokio::time::sleep(Duration::from_millis(20)).await;
    drop(stream);

    for _ in 0..200 {
        if live.load(Ordering::SeqCst) == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("attempt resources were not released after drop");
}

#[tokio::test]
async fn mismatched_capability_is_excluded_without_stalling() {
    let (root, all) = small_dag();
    let client = Client::with_defaults(vec![
        MemDownloader::refusing("narrow").into_dyn(),
        MemDownloader::serving("good", all.clone()).into_dyn(),
    ]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn empty_pool_exhausts_immediately() {
    let (root, _all) = small_dag();
    let client = Client::with_defaults(Vec::new());
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(blocks.is_empty());
    assert!(matches!(err, Some(SpateError::Exhausted)), "got {err:?}");
}

#[tokio::test]
async fn over_delivered_blocks_are_dropped_silently() {
    let (root, all) = small_dag();
    let unrelated = mem_block(b"unrelated to the dag", vec![]).unwrap();
    let script = vec![
        all[0].clone(),
        unrelated.clone(),
        all[1].clone(),
        all[2].clone(),
    ];
    let client = Client::with_defaults(vec![MemDownloader::serving(
        "chatty", script,
    )
    .into_dyn()]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
    assert!(!ids(&blocks).contains(unrelated.id()));
}

#[tokio::test]
async fn re_delivery_within_one_source_is_deduped() {
    let (root, all) = small_dag();
    let script = vec![
        all[0].clone(),
        all[0].clone(),
        all[1].clone(),
        all[1].clone(),
        all[2].clone(),
    ];
    let client = Client::with_defaults(vec![MemDownloader::serving(
        "stutter", script,
    )
    .into_dyn()]);
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn idle_attempt_times_out_and_fails_over() {
    let (root, all) = small_dag();
    let config = RaceConfig {
        max_parallel_attempts: 1,
        idle_timeout_ms: 50,
        ..Default::default()
    };
    let client = Client::new(
        config,
        vec![
            MemDownloader::serving("stall", vec![all[0].clone()])
                .then_hang()
                .into_dyn(),
            MemDownloader::serving("full", all.clone()).into_dyn(),
        ],
    );
    let (blocks, err) = collect(client.download(root, everything())).await;
    assert!(err.is_none(), "unexpected terminal error: {err:?}");
    assert_exactly(&blocks, &all);
}

#[tokio::test]
async fn traversal_start_failure_is_the_terminal_item() {
    #[derive(Debug)]
    struct BrokenSpec;

    impl TraversalSpec for BrokenSpec {
        fn scope(&self) -> TraversalScope {
            TraversalScope::Partial
        }

        fn start(
            &self,
            _root: &ContentId,
        ) -> SpateResult<Box<dyn TraversalState>> {
            Err(SpateError::other("no state for you"))
        }
    }

    let (root, all) = small_dag();
    let client = Client::with_defaults(vec![MemDownloader::serving(
        "unused", all,
    )
    .into_dyn()]);
    let (blocks, err) =
        collect(client.download(root, Arc::new(BrokenSpec))).await;
    assert!(blocks.is_empty());
    assert!(matches!(err, Some(SpateError::Other { .. })), "got {err:?}");
}
