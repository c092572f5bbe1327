//! In-store expiry encoding.
//!
//! Persistent backends keep the expiry inside the value itself as a 4-byte
//! big-endian Unix seconds prefix. A prefix of 0 means the value never expires.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::Error;

pub const EXPIRY_PREFIX_LEN: usize = 4;

/// Prefix `value` with its expiry.
pub fn encode(expires_at: u32, value: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(EXPIRY_PREFIX_LEN + value.len());
    buf.put_u32(expires_at);
    buf.put_slice(value);
    buf.freeze()
}

/// Split a stored value into its expiry and payload.
pub fn decode(mut stored: Bytes) -> Result<(u32, Bytes), Error> {
    if stored.len() < EXPIRY_PREFIX_LEN {
        return Err(Error::Decode(format!("expiry prefix truncated: {} bytes", stored.len())));
    }
    let expires_at = stored.get_u32();
    Ok((expires_at, stored))
}

/// Read only the expiry of a stored value.
pub fn peek_expiry(stored: &[u8]) -> Option<u32> {
    let prefix: [u8; EXPIRY_PREFIX_LEN] = stored.get(..EXPIRY_PREFIX_LEN)?.try_into().ok()?;
    Some(u32::from_be_bytes(prefix))
}

/// True when the stored value carries an expiry strictly before `now`.
///
/// Undecodable values count as expired so the scan clears them out.
pub fn has_expired(stored: &[u8], now: u32) -> bool {
    match peek_expiry(stored) {
        Some(0) => false,
        Some(expires_at) => expires_at < now,
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_layout() {
        let stored = encode(0x0102_0304, b"skin");
        assert_eq!(&stored[..], &[1, 2, 3, 4, b's', b'k', b'i', b'n']);
        let (expires_at, payload) = decode(stored).unwrap();
        assert_eq!(expires_at, 0x0102_0304);
        assert_eq!(&payload[..], b"skin");
    }

    #[test]
    fn test_decode_truncated() {
        assert!(matches!(decode(Bytes::from_static(&[0, 1])), Err(Error::Decode(_))));
    }

    #[test]
    fn test_has_expired() {
        assert!(!has_expired(&encode(0, b"v"), u32::MAX));
        assert!(!has_expired(&encode(100, b"v"), 100));
        assert!(has_expired(&encode(100, b"v"), 101));
        assert!(has_expired(&[0xff], 1));
    }
}
