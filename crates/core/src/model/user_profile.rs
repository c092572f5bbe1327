//! Cached UUID -> session profile lookups.
//!
//! Persistent form is a length-tagged record, DEFLATE-compressed:
//!
//! ```text
//! [timestamp: u32 BE][status: u8][host: u8]
//! [len: u16 BE][username][len: u16 BE][uuid][len: u16 BE][skin_path]
//! ```
//!
//! `host` is 1 when `skin_path` is relative to [`TEXTURES_BASE_URL`] and 0
//! when it holds a full URL.

use std::io::{Read, Write};
use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use flate2::Compression;
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;

use super::Status;
use crate::Error;
use crate::clock::secs_since;

/// Well-known texture host; skin URLs under it are stored as bare hashes.
pub const TEXTURES_BASE_URL: &str = "http://textures.minecraft.net/texture/";

const TEXTURES_BASE_URL_TLS: &str = "https://textures.minecraft.net/texture/";

const HOST_FULL_URL: u8 = 0;
const HOST_TEXTURES: u8 = 1;

/// Profile data needed to locate a player's skin.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UserProfile {
    pub uuid: String,
    /// Canonical casing from upstream.
    pub username: String,
    pub skin_path: String,
    pub skin_path_is_relative: bool,
    pub timestamp: u32,
    pub status: Status,
}

impl UserProfile {
    /// Ok profile for a skin URL, eliding the texture host when it matches.
    pub fn ok(uuid: impl Into<String>, username: impl Into<String>, skin_url: &str, timestamp: u32) -> Self {
        let (skin_path, skin_path_is_relative) = split_skin_url(skin_url);
        Self { uuid: uuid.into(), username: username.into(), skin_path, skin_path_is_relative, timestamp, status: Status::Ok }
    }

    pub fn failed(uuid: impl Into<String>, status: Status, timestamp: u32) -> Self {
        Self { uuid: uuid.into(), timestamp, status, ..Default::default() }
    }

    /// Full URL to fetch the skin from.
    pub fn skin_url(&self) -> String {
        if self.skin_path_is_relative { format!("{TEXTURES_BASE_URL}{}", self.skin_path) } else { self.skin_path.clone() }
    }

    /// Key of the skin in the texture cache.
    pub fn texture_key(&self) -> String {
        self.skin_path.to_ascii_lowercase()
    }

    pub fn ttl(&self) -> Duration {
        self.status.user_ttl()
    }

    /// True while an Ok profile is younger than `fresh_for`.
    pub fn is_fresh(&self, now: u32, fresh_for: Duration) -> bool {
        self.status.is_ok() && secs_since(now, self.timestamp) <= fresh_for.as_secs()
    }

    /// True while a failed profile is younger than its negative TTL.
    pub fn is_negative_live(&self, now: u32) -> bool {
        !self.status.is_ok() && self.status != Status::Unset && secs_since(now, self.timestamp) <= self.ttl().as_secs()
    }

    pub fn encode(&self) -> Result<Bytes, Error> {
        let mut raw = BytesMut::with_capacity(6 + 6 + self.username.len() + self.uuid.len() + self.skin_path.len());
        raw.put_u32(self.timestamp);
        raw.put_u8(self.status.as_byte());
        raw.put_u8(if self.skin_path_is_relative { HOST_TEXTURES } else { HOST_FULL_URL });
        for field in [&self.username, &self.uuid, &self.skin_path] {
            let len = u16::try_from(field.len()).map_err(|_| Error::Decode(format!("field too long: {} bytes", field.len())))?;
            raw.put_u16(len);
            raw.put_slice(field.as_bytes());
        }

        let mut encoder = DeflateEncoder::new(Vec::with_capacity(raw.len()), Compression::default());
        encoder.write_all(&raw).map_err(|e| Error::Decode(format!("deflate: {e}")))?;
        let compressed = encoder.finish().map_err(|e| Error::Decode(format!("deflate: {e}")))?;
        Ok(Bytes::from(compressed))
    }

    pub fn decode(compressed: &[u8]) -> Result<Self, Error> {
        let mut raw = Vec::new();
        DeflateDecoder::new(compressed)
            .read_to_end(&mut raw)
            .map_err(|e| Error::Decode(format!("inflate: {e}")))?;
        let mut buf = Bytes::from(raw);

        if buf.remaining() < 6 {
            return Err(Error::Decode("user profile header truncated".into()));
        }
        let timestamp = buf.get_u32();
        let status = Status::from_byte(buf.get_u8())?;
        let skin_path_is_relative = match buf.get_u8() {
            HOST_FULL_URL => false,
            HOST_TEXTURES => true,
            other => return Err(Error::Decode(format!("unknown texture host {other}"))),
        };
        let username = take_string(&mut buf, "username")?;
        let uuid = take_string(&mut buf, "uuid")?;
        let skin_path = take_string(&mut buf, "skin_path")?;

        if status.is_ok() && (username.is_empty() || skin_path.is_empty()) {
            return Err(Error::Decode("ok user profile without username or skin".into()));
        }

        Ok(Self { uuid, username, skin_path, skin_path_is_relative, timestamp, status })
    }
}

fn split_skin_url(url: &str) -> (String, bool) {
    for base in [TEXTURES_BASE_URL, TEXTURES_BASE_URL_TLS] {
        if let Some(path) = url.strip_prefix(base) {
            return (path.to_string(), true);
        }
    }
    (url.to_string(), false)
}

fn take_string(buf: &mut Bytes, field: &str) -> Result<String, Error> {
    if buf.remaining() < 2 {
        return Err(Error::Decode(format!("{field} length truncated")));
    }
    let len = usize::from(buf.get_u16());
    if buf.remaining() < len {
        return Err(Error::Decode(format!("{field} truncated")));
    }
    String::from_utf8(buf.split_to(len).to_vec()).map_err(|e| Error::Decode(format!("{field}: {e}")))
}
