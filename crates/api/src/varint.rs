//! Unsigned LEB128 varints, as used by content identities and by
//! self-framing container streams.

use crate::{SpateError, SpateResult};

/// The maximum encoded length of a u64 varint.
pub const MAX_LEN: usize = 10;

/// Append the varint encoding of `value` to `out`.
pub fn encode(mut value: u64, out: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value == 0 {
            out.push(byte);
            return;
        }
        out.push(byte | 0x80);
    }
}

/// Decode a varint from the front of `buf`.
///
/// Returns `Ok(None)` if `buf` ends before the varint terminates, so
/// incremental parsers can wait for more bytes. Returns an error for
/// encodings that can never terminate in a u64.
pub fn decode(buf: &[u8]) -> SpateResult<Option<(u64, usize)>> {
    let mut value: u64 = 0;
    for (i, byte) in buf.iter().enumerate() {
        if i >= MAX_LEN || (i == MAX_LEN - 1 && *byte > 0x01) {
            return Err(SpateError::other("varint overflows u64"));
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            return Ok(Some((value, i + 1)));
        }
    }
    if buf.len() >= MAX_LEN {
        return Err(SpateError::other("varint overflows u64"));
    }
    Ok(None)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trip() {
        for v in [0, 1, 127, 128, 300, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            encode(v, &mut buf);
            assert_eq!(Some((v, buf.len())), decode(&buf).unwrap());
        }
    }

    #[test]
    fn single_byte_values() {
        let mut buf = Vec::new();
        encode(5, &mut buf);
        assert_eq!(vec![5], buf);
        let mut buf = Vec::new();
        encode(300, &mut buf);
        assert_eq!(vec![0xac, 0x02], buf);
    }

    #[test]
    fn incomplete_returns_none() {
        assert_eq!(None, decode(&[]).unwrap());
        assert_eq!(None, decode(&[0x80]).unwrap());
        assert_eq!(None, decode(&[0xff, 0xff]).unwrap());
    }

    #[test]
    fn overflow_is_an_error() {
        // Eleven continuation bytes can never terminate in a u64.
        assert!(decode(&[0xff; 11]).is_err());
        // Ten bytes with a too-large final byte overflows as well.
        let mut buf = vec![0xff; 9];
        buf.push(0x02);
        assert!(decode(&buf).is_err());
    }

    #[test]
    fn decode_ignores_trailing_bytes() {
        let mut buf = Vec::new();
        encode(300, &mut buf);
        let used = buf.len();
        buf.extend_from_slice(b"trailing");
        assert_eq!(Some((300, used)), decode(&buf).unwrap());
    }
}
