//! The "everything under root" traversal.
//!
//! This is the one traversal spate ships: visit every block reachable
//! from the root. Link extraction is delegated to a
//! [LinkScanner](spate_api::LinkScanner) so the same traversal walks
//! any codec a scanner exists for; richer selector evaluation is an
//! external concern.

use spate_api::{
    Block, ContentId, DynLinkScanner, SpateResult, TraversalScope,
    TraversalSpec, TraversalState,
};
use std::collections::HashSet;
use std::sync::Arc;

/// Traversal spec selecting every block reachable under the root.
#[derive(Debug)]
pub struct EverythingSpec {
    scanner: DynLinkScanner,
}

impl EverythingSpec {
    /// Construct an everything traversal over the given link scanner.
    pub fn new(scanner: DynLinkScanner) -> Arc<Self> {
        Arc::new(Self { scanner })
    }
}

impl TraversalSpec for EverythingSpec {
    fn scope(&self) -> TraversalScope {
        TraversalScope::Everything
    }

    fn start(
        &self,
        root: &ContentId,
    ) -> SpateResult<Box<dyn TraversalState>> {
        Ok(Box::new(EverythingState {
            scanner: self.scanner.clone(),
            pending: [root.clone()].into_iter().collect(),
            visited: HashSet::new(),
        }))
    }
}

/// State of one everything traversal: the set of identities still
/// needed, and the set already incorporated.
#[derive(Debug)]
struct EverythingState {
    scanner: DynLinkScanner,
    pending: HashSet<ContentId>,
    visited: HashSet<ContentId>,
}

impl TraversalState for EverythingState {
    fn is_needed(&self, id: &ContentId) -> bool {
        self.pending.contains(id)
    }

    fn advance(&mut self, block: &Block) -> SpateResult<Vec<ContentId>> {
        let id = block.id();
        if !self.pending.contains(id) {
            return Ok(Vec::new());
        }

        // Scan before mutating so a violation leaves the id needed.
        let links = self.scanner.scan(id, block.data())?;

        self.pending.remove(id);
        self.visited.insert(id.clone());
        let mut newly_needed = Vec::new();
        for link in links {
            if self.visited.contains(&link) || self.pending.contains(&link)
            {
                continue;
            }
            self.pending.insert(link.clone());
            newly_needed.push(link);
        }
        Ok(newly_needed)
    }

    fn is_complete(&self) -> bool {
        self.pending.is_empty()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mem::{mem_block, MemScanner};
    use spate_api::id::{codec, multihash};

    #[test]
    fn walks_to_completion() {
        let leaf_a = mem_block(b"a", vec![]).unwrap();
        let leaf_b = mem_block(b"b", vec![]).unwrap();
        let root = mem_block(
            b"root",
            vec![leaf_a.id().clone(), leaf_b.id().clone()],
        )
        .unwrap();

        let spec = EverythingSpec::new(Arc::new(MemScanner));
        let mut state = spec.start(root.id()).unwrap();

        assert!(state.is_needed(root.id()));
        assert!(!state.is_needed(leaf_a.id()));
        assert!(!state.is_complete());

        let children = state.advance(&root).unwrap();
        assert_eq!(2, children.len());
        assert!(state.is_needed(leaf_a.id()));
        assert!(state.is_needed(leaf_b.id()));

        assert!(state.advance(&leaf_a).unwrap().is_empty());
        assert!(!state.is_complete());
        assert!(state.advance(&leaf_b).unwrap().is_empty());
        assert!(state.is_complete());
    }

    #[test]
    fn shared_links_are_needed_once() {
        let leaf = mem_block(b"shared", vec![]).unwrap();
        let mid = mem_block(b"mid", vec![leaf.id().clone()]).unwrap();
        let root = mem_block(
            b"root",
            vec![mid.id().clone(), leaf.id().clone()],
        )
        .unwrap();

        let spec = EverythingSpec::new(Arc::new(MemScanner));
        let mut state = spec.start(root.id()).unwrap();

        assert_eq!(2, state.advance(&root).unwrap().len());
        assert!(state.is_needed(leaf.id()));
        // The leaf is already pending; mid must not re-report it.
        assert!(state.advance(&mid).unwrap().is_empty());
        assert!(state.is_needed(leaf.id()));
        assert!(state.advance(&leaf).unwrap().is_empty());
        assert!(state.is_complete());
    }

    #[test]
    fn re_advancing_an_incorporated_block_is_a_no_op() {
        let leaf = mem_block(b"leaf", vec![]).unwrap();
        let root = mem_block(b"root", vec![leaf.id().clone()]).unwrap();

        let spec = EverythingSpec::new(Arc::new(MemScanner));
        let mut state = spec.start(root.id()).unwrap();
        assert_eq!(1, state.advance(&root).unwrap().len());
        assert!(state.advance(&root).unwrap().is_empty());
        assert!(state.is_needed(leaf.id()));
    }

    #[test]
    fn scan_violation_leaves_the_id_needed() {
        let bad = spate_api::Block::new(
            ContentId::for_data(codec::RAW, multihash::SHA2_256, b"raw")
                .unwrap(),
            bytes::Bytes::from_static(b"raw"),
        );
        let spec = EverythingSpec::new(Arc::new(MemScanner));
        let mut state = spec.start(bad.id()).unwrap();
        // MemScanner only understands dag-json nodes.
        assert!(state.advance(&bad).is_err());
        assert!(state.is_needed(bad.id()));
        assert!(!state.is_complete());
    }
}
