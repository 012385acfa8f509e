//! dag-pb link extraction.
//!
//! The dag-pb codec is a fixed protobuf schema of a payload plus named
//! links, and covers the bulk of content-addressed file data in the
//! wild. The message types are hand-derived with prost rather than
//! generated, since the schema is two messages and frozen.

use bytes::Bytes;
use prost::Message;
use spate_api::{id::codec, ContentId, LinkScanner, SpateError, SpateResult};

/// One outbound link of a dag-pb node.
#[derive(Clone, PartialEq, Message)]
pub struct PbLink {
    /// Binary identity of the target block.
    #[prost(bytes = "bytes", optional, tag = "1")]
    pub hash: Option<Bytes>,
    /// UTF-8 name of the link within this node.
    #[prost(string, optional, tag = "2")]
    pub name: Option<String>,
    /// Cumulative size of the target's subtree, if known.
    #[prost(uint64, optional, tag = "3")]
    pub tsize: Option<u64>,
}

/// A dag-pb node: opaque payload plus outbound links.
#[derive(Clone, PartialEq, Message)]
pub struct PbNode {
    /// Outbound links, in node order.
    #[prost(message, repeated, tag = "2")]
    pub links: Vec<PbLink>,
    /// Opaque payload bytes.
    #[prost(bytes = "bytes", optional, tag = "1")]
    pub data: Option<Bytes>,
}

/// [LinkScanner] for dag-pb nodes. Raw blocks are leaves by
/// definition; any other codec is a traversal violation.
#[derive(Debug)]
pub struct DagPbScanner;

impl LinkScanner for DagPbScanner {
    fn scan(
        &self,
        id: &ContentId,
        data: &[u8],
    ) -> SpateResult<Vec<ContentId>> {
        match id.codec() {
            codec::RAW => Ok(Vec::new()),
            codec::DAG_PB => {
                let node = PbNode::decode(data).map_err(|err| {
                    SpateError::traversal(format!(
                        "block {id} is not a valid dag-pb node: {err}"
                    ))
                })?;
                let mut out = Vec::with_capacity(node.links.len());
                for link in &node.links {
                    let hash = link.hash.as_deref().ok_or_else(|| {
                        SpateError::traversal(format!(
                            "dag-pb node {id} has a link without a target"
                        ))
                    })?;
                    out.push(ContentId::from_bytes(hash).map_err(
                        |err| {
                            SpateError::traversal(format!(
                                "dag-pb node {id} links to an invalid identity: {err}"
                            ))
                        },
                    )?);
                }
                Ok(out)
            }
            other => Err(SpateError::traversal(format!(
                "dag-pb scanner cannot parse codec {other:#x} of block {id}"
            ))),
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use spate_api::id::multihash;

    fn raw_id(data: &[u8]) -> ContentId {
        ContentId::for_data(codec::RAW, multihash::SHA2_256, data).unwrap()
    }

    #[test]
    fn scans_links_in_node_order() {
        let first = raw_id(b"first");
        let second = raw_id(b"second");
        let node = PbNode {
            links: vec![
                PbLink {
                    hash: Some(first.to_bytes()),
                    name: Some("a".into()),
                    tsize: Some(5),
                },
                PbLink {
                    hash: Some(second.to_bytes()),
                    name: Some("b".into()),
                    tsize: None,
                },
            ],
            data: Some(Bytes::from_static(b"payload")),
        };
        let encoded = node.encode_to_vec();
        let id = ContentId::for_data(
            codec::DAG_PB,
            multihash::SHA2_256,
            &encoded,
        )
        .unwrap();

        let links = DagPbScanner.scan(&id, &encoded).unwrap();
        assert_eq!(vec![first, second], links);
    }

    #[test]
    fn raw_blocks_are_leaves() {
        let id = raw_id(b"leaf");
        assert!(DagPbScanner.scan(&id, b"leaf").unwrap().is_empty());
    }

    #[test]
    fn garbage_node_is_a_violation() {
        let id = ContentId::for_data(
            codec::DAG_PB,
            multihash::SHA2_256,
            b"not protobuf at all \xff\xff",
        )
        .unwrap();
        let err = DagPbScanner
            .scan(&id, b"not protobuf at all \xff\xff")
            .unwrap_err();
        assert!(
            matches!(err, SpateError::TraversalViolation { .. }),
            "{err:?}"
        );
    }

    #[test]
    fn unknown_codec_is_a_violation() {
        let id = ContentId::for_data(
            codec::DAG_CBOR,
            multihash::SHA2_256,
            b"\xa0",
        )
        .unwrap();
        assert!(DagPbScanner.scan(&id, b"\xa0").is_err());
    }
}
