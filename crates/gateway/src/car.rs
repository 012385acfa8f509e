//! Incremental CARv1 container-stream framing.
//!
//! A CAR stream is a self-framing sequence of varint-length-prefixed
//! frames: first a dag-cbor header naming the format version and the
//! root identities, then one `(identity, raw bytes)` section per
//! block. [CarReader] parses that shape incrementally from a byte
//! stream, surfacing malformed framing and mid-stream disconnection as
//! errors rather than silent truncation. It makes no ordering or
//! relevance promises about the sections; verification is the
//! consumer's job.

use bytes::{Buf, Bytes, BytesMut};
use futures::{Stream, StreamExt};
use spate_api::{varint, Block, ContentId, SpateError, SpateResult};

/// Largest frame accepted, bounding parser memory against hostile
/// length prefixes.
pub const MAX_FRAME_LEN: u64 = 8 * 1024 * 1024;

/// An incremental CARv1 parser over a fallible byte stream.
pub struct CarReader<S> {
    stream: S,
    buf: BytesMut,
    roots: Vec<ContentId>,
    done: bool,
}

impl<S> std::fmt::Debug for CarReader<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CarReader")
            .field("roots", &self.roots)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl<S, E> CarReader<S>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin + Send,
    E: std::error::Error + 'static + Send + Sync,
{
    /// Construct a reader, consuming and validating the header frame.
    pub async fn new(stream: S) -> SpateResult<Self> {
        let mut reader = Self {
            stream,
            buf: BytesMut::new(),
            roots: Vec::new(),
            done: false,
        };
        let header = match reader.next_frame().await? {
            Some(frame) => frame,
            None => {
                return Err(SpateError::transport(
                    "car stream ended before the header",
                ))
            }
        };
        reader.roots = parse_header(&header)?;
        Ok(reader)
    }

    /// The root identities the header declared.
    pub fn roots(&self) -> &[ContentId] {
        &self.roots
    }

    /// The next block section, or `Ok(None)` at a clean end of stream.
    pub async fn next_block(&mut self) -> SpateResult<Option<Block>> {
        if self.done {
            return Ok(None);
        }
        let Some(frame) = self.next_frame().await? else {
            self.done = true;
            return Ok(None);
        };
        let (id, used) = ContentId::from_bytes_prefix(&frame)
            .map_err(|err| {
                SpateError::transport(format!(
                    "malformed car section identity: {err}"
                ))
            })?;
        Ok(Some(Block::new(id, frame.slice(used..))))
    }

    async fn next_frame(&mut self) -> SpateResult<Option<Bytes>> {
        loop {
            if let Some((len, used)) = varint::decode(&self.buf)
                .map_err(|err| {
                    SpateError::transport(format!(
                        "malformed car frame length: {err}"
                    ))
                })?
            {
                if len == 0 {
                    return Err(SpateError::transport(
                        "zero-length car frame",
                    ));
                }
                if len > MAX_FRAME_LEN {
                    return Err(SpateError::transport(format!(
                        "car frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte cap"
                    )));
                }
                let len = len as usize;
                if self.buf.len() >= used + len {
                    self.buf.advance(used);
                    return Ok(Some(self.buf.split_to(len).freeze()));
                }
            }
            match self.stream.next().await {
                Some(Ok(chunk)) => self.buf.extend_from_slice(&chunk),
                Some(Err(err)) => {
                    return Err(SpateError::transport_src(
                        "car body stream failed",
                        err,
                    ))
                }
                None => {
                    return if self.buf.is_empty() {
                        Ok(None)
                    } else {
                        Err(SpateError::transport(
                            "car stream truncated mid-frame",
                        ))
                    }
                }
            }
        }
    }
}

/// Writes the framing [CarReader] parses. A test and export helper;
/// block sections are emitted in the order [CarWriter::put] is called,
/// which should be parent-first for consumers that traverse as they
/// read.
pub struct CarWriter {
    out: Vec<u8>,
}

impl CarWriter {
    /// Start a CARv1 body with the given roots.
    pub fn new(roots: &[ContentId]) -> Self {
        let mut header = Vec::new();
        // Header map: {"roots": [tag42(identity-prefixed cid)...],
        // "version": 1}.
        header.push(0xa2);
        push_cbor_head(&mut header, 3, b"roots".len() as u64);
        header.extend_from_slice(b"roots");
        push_cbor_head(&mut header, 4, roots.len() as u64);
        for root in roots {
            header.push(0xd8);
            header.push(42);
            let cid = root.to_bytes();
            push_cbor_head(&mut header, 2, cid.len() as u64 + 1);
            header.push(0x00);
            header.extend_from_slice(&cid);
        }
        push_cbor_head(&mut header, 3, b"version".len() as u64);
        header.extend_from_slice(b"version");
        push_cbor_head(&mut header, 0, 1);

        let mut out = Vec::new();
        varint::encode(header.len() as u64, &mut out);
        out.extend_from_slice(&header);
        Self { out }
    }

    /// Append one block section.
    pub fn put(&mut self, block: &Block) {
        let cid = block.id().to_bytes();
        varint::encode(
            (cid.len() + block.data().len()) as u64,
            &mut self.out,
        );
        self.out.extend_from_slice(&cid);
        self.out.extend_from_slice(block.data());
    }

    /// Finish, returning the complete CAR bytes.
    pub fn finish(self) -> Bytes {
        self.out.into()
    }
}

fn push_cbor_head(out: &mut Vec<u8>, major: u8, value: u64) {
    let m = major << 5;
    if value < 24 {
        out.push(m | value as u8);
    } else if value <= u8::MAX as u64 {
        out.push(m | 24);
        out.push(value as u8);
    } else if value <= u16::MAX as u64 {
        out.push(m | 25);
        out.extend_from_slice(&(value as u16).to_be_bytes());
    } else if value <= u32::MAX as u64 {
        out.push(m | 26);
        out.extend_from_slice(&(value as u32).to_be_bytes());
    } else {
        out.push(m | 27);
        out.extend_from_slice(&value.to_be_bytes());
    }
}

// A minimal, tolerant decoder for the one cbor shape the header may
// take. Unknown keys are skipped; unknown shapes are errors.
struct CborSlice<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> CborSlice<'a> {
    fn byte(&mut self) -> SpateResult<u8> {
        let out = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| SpateError::transport("truncated car header"))?;
        self.pos += 1;
        Ok(out)
    }

    fn take(&mut self, len: u64) -> SpateResult<&'a [u8]> {
        let len = len as usize;
        let out = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or_else(|| SpateError::transport("truncated car header"))?;
        self.pos += len;
        Ok(out)
    }

    fn head(&mut self) -> SpateResult<(u8, u64)> {
        let byte = self.byte()?;
        let major = byte >> 5;
        let info = byte & 0x1f;
        let value = match info {
            0..=23 => u64::from(info),
            24 => u64::from(self.byte()?),
            25 => {
                let hi = self.byte()?;
                let lo = self.byte()?;
                u64::from(u16::from_be_bytes([hi, lo]))
            }
            26 => {
                let mut raw = [0; 4];
                for slot in raw.iter_mut() {
                    *slot = self.byte()?;
                }
                u64::from(u32::from_be_bytes(raw))
            }
            27 => {
                let mut raw = [0; 8];
                for slot in raw.iter_mut() {
                    *slot = self.byte()?;
                }
                u64::from_be_bytes(raw)
            }
            _ => {
                return Err(SpateError::transport(
                    "unsupported cbor encoding in car header",
                ))
            }
        };
        Ok((major, value))
    }

    fn skip_item(&mut self, depth: u8) -> SpateResult<()> {
        if depth == 0 {
            return Err(SpateError::transport(
                "car header nests too deeply",
            ));
        }
        let (major, value) = self.head()?;
        match major {
            0 | 1 | 7 => Ok(()),
            2 | 3 => self.take(value).map(|_| ()),
            4 => {
                for _ in 0..value {
                    self.skip_item(depth - 1)?;
                }
                Ok(())
            }
            5 => {
                for _ in 0..value {
                    self.skip_item(depth - 1)?;
                    self.skip_item(depth - 1)?;
                }
                Ok(())
            }
            _ => self.skip_item(depth - 1),
        }
    }
}

fn parse_header(bytes: &[u8]) -> SpateResult<Vec<ContentId>> {
    let mut cbor = CborSlice { bytes, pos: 0 };
    let (major, entries) = cbor.head()?;
    if major != 5 {
        return Err(SpateError::transport("car header is not a cbor map"));
    }

    let mut version = None;
    let mut roots = None;
    for _ in 0..entries {
        let (key_major, key_len) = cbor.head()?;
        if key_major != 3 {
            return Err(SpateError::transport(
                "car header key is not text",
            ));
        }
        match cbor.take(key_len)? {
            b"version" => {
                let (value_major, value) = cbor.head()?;
                if value_major != 0 {
                    return Err(SpateError::transport(
                        "car header version is not an unsigned int",
                    ));
                }
                version = Some(value);
            }
            b"roots" => {
                let (value_major, count) = cbor.head()?;
                if value_major != 4 {
                    return Err(SpateError::transport(
                        "car header roots is not an array",
                    ));
                }
                let mut out = Vec::with_capacity(count.min(64) as usize);
                for _ in 0..count {
                    let (tag_major, tag) = cbor.head()?;
                    if tag_major != 6 || tag != 42 {
                        return Err(SpateError::transport(
                            "car header root is not a cid tag",
                        ));
                    }
                    let (bytes_major, len) = cbor.head()?;
                    if bytes_major != 2 {
                        return Err(SpateError::transport(
                            "car header root cid is not a byte string",
                        ));
                    }
                    let raw = cbor.take(len)?;
                    let Some((0x00, cid)) = raw.split_first() else {
                        return Err(SpateError::transport(
                            "car header root cid lacks its identity prefix",
                        ));
                    };
                    out.push(ContentId::from_bytes(cid).map_err(
                        |err| {
                            SpateError::transport(format!(
                                "invalid root cid in car header: {err}"
                            ))
                        },
                    )?);
                }
                roots = Some(out);
            }
            _ => cbor.skip_item(8)?,
        }
    }

    match (version, roots) {
        (Some(1), Some(roots)) if !roots.is_empty() => Ok(roots),
        (Some(1), _) => {
            Err(SpateError::transport("car header has no roots"))
        }
        (version, _) => Err(SpateError::transport(format!(
            "unsupported car version: {version:?}"
        ))),
    }
}
