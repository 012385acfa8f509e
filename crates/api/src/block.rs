//! The block type: an identity paired with raw bytes.

use crate::{ContentId, SpateError, SpateResult};
use bytes::Bytes;

/// An immutable (identity, raw bytes) pair.
///
/// Construction does not validate anything; a block delivered by an
/// untrusted source is only trustworthy after [Block::verify] has
/// passed. The scheduler guarantees that no unverified block ever
/// reaches a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    id: ContentId,
    data: Bytes,
}

impl Block {
    /// Construct a block from an identity and raw bytes.
    pub fn new(id: ContentId, data: Bytes) -> Self {
        Self { id, data }
    }

    /// The identity this block claims.
    pub fn id(&self) -> &ContentId {
        &self.id
    }

    /// The raw bytes.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Consume the block, returning its raw bytes.
    pub fn into_data(self) -> Bytes {
        self.data
    }

    /// Recompute the digest function named by the identity over the
    /// bytes. A mismatch, including an identity naming an unknown
    /// digest function, is a corrupt delivery.
    pub fn verify(&self) -> SpateResult<()> {
        if self.id.matches(&self.data) {
            Ok(())
        } else {
            Err(SpateError::CorruptBlock {
                id: self.id.clone(),
            })
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::id::{codec, multihash};

    #[test]
    fn verify_accepts_matching_bytes() {
        let data = Bytes::from_static(b"some leaf bytes");
        let id =
            ContentId::for_data(codec::RAW, multihash::SHA2_256, &data)
                .unwrap();
        assert!(Block::new(id, data).verify().is_ok());
    }

    #[test]
    fn verify_rejects_substituted_bytes() {
        let id = ContentId::for_data(
            codec::RAW,
            multihash::SHA2_256,
            b"the real bytes",
        )
        .unwrap();
        let block =
            Block::new(id.clone(), Bytes::from_static(b"imposter bytes"));
        match block.verify() {
            Err(SpateError::CorruptBlock { id: bad }) => assert_eq!(id, bad),
            other => panic!("expected corrupt block, got {other:?}"),
        }
    }
}
