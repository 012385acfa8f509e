//! Types dealing with content identity.
//!
//! A [ContentId] names the expected content of a block: a content codec
//! plus a digest produced by a named hash function. It is the CIDv1
//! shape used by content-addressed gateway networks, and it is the only
//! thing a caller needs to trust; every delivered byte is checked
//! against it.

use crate::{SpateError, SpateResult};
use bytes::Bytes;

/// Multicodec content codes a [ContentId] may carry.
pub mod codec {
    /// Raw bytes, no links.
    pub const RAW: u64 = 0x55;
    /// dag-pb, the protobuf node format used by unixfs DAGs.
    pub const DAG_PB: u64 = 0x70;
    /// dag-cbor.
    pub const DAG_CBOR: u64 = 0x71;
    /// dag-json.
    pub const DAG_JSON: u64 = 0x0129;
}

/// Multihash function codes a [ContentId] may name.
pub mod multihash {
    /// sha2-256.
    pub const SHA2_256: u64 = 0x12;
    /// blake3 (32 byte digest).
    pub const BLAKE3: u64 = 0x1e;
}

const SHA2_256_LEN: usize = 32;

// Larger than any digest we can produce; guards decode of hostile input.
const MAX_DIGEST_LEN: u64 = 128;

fn digest_of(hash_code: u64, data: &[u8]) -> Option<Vec<u8>> {
    match hash_code {
        multihash::SHA2_256 => {
            use sha2::Digest;
            Some(sha2::Sha256::digest(data).to_vec())
        }
        multihash::BLAKE3 => Some(blake3::hash(data).as_bytes().to_vec()),
        _ => None,
    }
}

/// An immutable content identity: codec, hash function, and digest.
///
/// Comparable and hashable, so it can key the dedup and traversal sets
/// maintained by the scheduler.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentId {
    codec: u64,
    hash_code: u64,
    digest: Bytes,
}

impl ContentId {
    /// Construct a ContentId from its parts.
    pub fn new(codec: u64, hash_code: u64, digest: Bytes) -> Self {
        Self {
            codec,
            hash_code,
            digest,
        }
    }

    /// Construct the ContentId for `data` by computing its digest with
    /// the named hash function. Errors if the hash function is unknown.
    pub fn for_data(
        codec: u64,
        hash_code: u64,
        data: &[u8],
    ) -> SpateResult<Self> {
        let digest = digest_of(hash_code, data).ok_or_else(|| {
            SpateError::other(format!(
                "cannot compute digest: unknown multihash code {hash_code:#x}"
            ))
        })?;
        Ok(Self {
            codec,
            hash_code,
            digest: digest.into(),
        })
    }

    /// The content codec.
    pub fn codec(&self) -> u64 {
        self.codec
    }

    /// The multihash function code.
    pub fn hash_code(&self) -> u64 {
        self.hash_code
    }

    /// The digest bytes.
    pub fn digest(&self) -> &Bytes {
        &self.digest
    }

    /// True if recomputing this identity's digest function over `data`
    /// reproduces the digest. An unknown digest function never matches.
    pub fn matches(&self, data: &[u8]) -> bool {
        match digest_of(self.hash_code, data) {
            Some(digest) => digest[..] == self.digest[..],
            None => false,
        }
    }

    /// The binary CIDv1 form of this identity.
    pub fn to_bytes(&self) -> Bytes {
        let mut out = Vec::with_capacity(4 + self.digest.len());
        crate::varint::encode(1, &mut out);
        crate::varint::encode(self.codec, &mut out);
        crate::varint::encode(self.hash_code, &mut out);
        crate::varint::encode(self.digest.len() as u64, &mut out);
        out.extend_from_slice(&self.digest);
        out.into()
    }

    /// Decode an identity from the front of `bytes`, returning it with
    /// the number of bytes consumed.
    ///
    /// Accepts the binary CIDv1 form, as well as the legacy CIDv0 form
    /// (a bare sha2-256 multihash), which normalizes to dag-pb.
    pub fn from_bytes_prefix(bytes: &[u8]) -> SpateResult<(Self, usize)> {
        // CIDv0: 0x12 0x20 followed by a 32 byte sha2-256 digest.
        if bytes.len() >= 2 && bytes[0] == 0x12 && bytes[1] == 0x20 {
            if bytes.len() < 2 + SHA2_256_LEN {
                return Err(SpateError::other("truncated CIDv0"));
            }
            return Ok((
                Self {
                    codec: codec::DAG_PB,
                    hash_code: multihash::SHA2_256,
                    digest: Bytes::copy_from_slice(
                        &bytes[2..2 + SHA2_256_LEN],
                    ),
                },
                2 + SHA2_256_LEN,
            ));
        }

        let mut pos = 0;
        let mut next = || -> SpateResult<u64> {
            match crate::varint::decode(&bytes[pos..])? {
                Some((value, used)) => {
                    pos += used;
                    Ok(value)
                }
                None => Err(SpateError::other("truncated content id")),
            }
        };
        let version = next()?;
        if version != 1 {
            return Err(SpateError::other(format!(
                "unsupported content id version: {version}"
            )));
        }
        let codec = next()?;
        let hash_code = next()?;
        let digest_len = next()?;
        if digest_len == 0 || digest_len > MAX_DIGEST_LEN {
            return Err(SpateError::other(format!(
                "implausible digest length: {digest_len}"
            )));
        }
        let digest_len = digest_len as usize;
        if bytes.len() < pos + digest_len {
            return Err(SpateError::other("truncated content id digest"));
        }
        let digest = Bytes::copy_from_slice(&bytes[pos..pos + digest_len]);
        Ok((
            Self {
                codec,
                hash_code,
                digest,
            },
            pos + digest_len,
        ))
    }

    /// Decode an identity that occupies the whole of `bytes`.
    pub fn from_bytes(bytes: &[u8]) -> SpateResult<Self> {
        let (id, used) = Self::from_bytes_prefix(bytes)?;
        if used != bytes.len() {
            return Err(SpateError::other(
                "trailing bytes after content id",
            ));
        }
        Ok(id)
    }
}

/// The canonical text form: lowercase base32 multibase (leading `b`)
/// over the binary CIDv1 bytes. This makes log output directly usable
/// in gateway request paths.
impl std::fmt::Display for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("b")?;
        f.write_str(&base32_encode(&self.to_bytes()))
    }
}

impl std::fmt::Debug for ContentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(self, f)
    }
}

impl std::str::FromStr for ContentId {
    type Err = SpateError;

    fn from_str(s: &str) -> SpateResult<Self> {
        let Some(rest) = s.strip_prefix('b') else {
            return Err(SpateError::other(
                "expected a base32 multibase content id (leading 'b')",
            ));
        };
        Self::from_bytes(&base32_decode(rest)?)
    }
}

impl serde::Serialize for ContentId {
    fn serialize<S: serde::Serializer>(
        &self,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for ContentId {
    fn deserialize<D: serde::Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Self, D::Error> {
        let s: String = serde::Deserialize::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

fn base32_encode(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len().div_ceil(5) * 8);
    let mut bits: u32 = 0;
    let mut nbits = 0;
    for &byte in data {
        bits = (bits << 8) | u32::from(byte);
        nbits += 8;
        while nbits >= 5 {
            nbits -= 5;
            out.push(BASE32_ALPHABET[((bits >> nbits) & 0x1f) as usize]
                as char);
            bits &= (1 << nbits) - 1;
        }
    }
    if nbits > 0 {
        out.push(
            BASE32_ALPHABET[((bits << (5 - nbits)) & 0x1f) as usize] as char,
        );
    }
    out
}

fn base32_decode(s: &str) -> SpateResult<Vec<u8>> {
    let mut out = Vec::with_capacity(s.len() * 5 / 8);
    let mut bits: u32 = 0;
    let mut nbits = 0;
    for c in s.bytes() {
        let value = match c {
            b'a'..=b'z' => c - b'a',
            b'2'..=b'7' => c - b'2' + 26,
            _ => {
                return Err(SpateError::other(format!(
                    "invalid base32 character: {:?}",
                    c as char
                )))
            }
        };
        bits = (bits << 5) | u32::from(value);
        nbits += 5;
        if nbits >= 8 {
            nbits -= 8;
            out.push((bits >> nbits) as u8);
            bits &= (1 << nbits) - 1;
        }
    }
    if bits != 0 {
        return Err(SpateError::other("non-zero base32 padding bits"));
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    fn sample() -> ContentId {
        ContentId::for_data(codec::RAW, multihash::SHA2_256, b"hello")
            .unwrap()
    }

    #[test]
    fn digest_shapes() {
        let sha = sample();
        assert_eq!(32, sha.digest().len());
        let b3 =
            ContentId::for_data(codec::RAW, multihash::BLAKE3, b"hello")
                .unwrap();
        assert_eq!(32, b3.digest().len());
        assert_ne!(sha, b3);
    }

    #[test]
    fn unknown_hash_code_is_an_error() {
        assert!(ContentId::for_data(codec::RAW, 0xbad, b"hello").is_err());
    }

    #[test]
    fn matches_own_data_only() {
        let id = sample();
        assert!(id.matches(b"hello"));
        assert!(!id.matches(b"hell0"));
        // Unknown digest function can never be verified.
        let odd = ContentId::new(codec::RAW, 0xbad, id.digest().clone());
        assert!(!odd.matches(b"hello"));
    }

    #[test]
    fn binary_round_trip() {
        let id = sample();
        let bytes = id.to_bytes();
        assert_eq!(id, ContentId::from_bytes(&bytes).unwrap());
        let (prefix, used) =
            ContentId::from_bytes_prefix(&bytes).unwrap();
        assert_eq!(id, prefix);
        assert_eq!(bytes.len(), used);
    }

    #[test]
    fn from_bytes_rejects_trailing_bytes() {
        let mut bytes = sample().to_bytes().to_vec();
        bytes.push(0);
        assert!(ContentId::from_bytes(&bytes).is_err());
        assert!(ContentId::from_bytes(&bytes[..bytes.len() - 2]).is_err());
    }

    #[test]
    fn cid_v0_normalizes_to_dag_pb() {
        let mut bytes = vec![0x12, 0x20];
        bytes.extend_from_slice(&[7; 32]);
        let (id, used) = ContentId::from_bytes_prefix(&bytes).unwrap();
        assert_eq!(34, used);
        assert_eq!(codec::DAG_PB, id.codec());
        assert_eq!(multihash::SHA2_256, id.hash_code());
        assert_eq!(&[7; 32][..], &id.digest()[..]);
    }

    #[test]
    fn string_round_trip() {
        let id = sample();
        let s = id.to_string();
        assert!(s.starts_with('b'));
        assert!(s.len() > 10);
        assert_eq!(id, s.parse().unwrap());
    }

    #[test]
    fn string_rejects_other_multibases() {
        assert!("QmfQYLz4gf4oXLKFuG1aL9Z7jhkf1yBAii1L7oDRhW2ZZR"
            .parse::<ContentId>()
            .is_err());
        assert!("b!!!".parse::<ContentId>().is_err());
    }

    #[test]
    fn serde_through_canonical_string() {
        let id = sample();
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(format!("\"{id}\""), json);
        let back: ContentId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, back);
    }
}
