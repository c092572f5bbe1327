//! Cached username -> UUID lookups.
//!
//! Wire layout: `[status: u8][timestamp: u32 BE][uuid: ASCII, rest of value]`.

use std::time::Duration;

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::Status;
use super::identifier::is_uuid;
use crate::Error;
use crate::clock::secs_since;

const HEADER_LEN: usize = 5;

/// Result of resolving a username to a UUID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UuidEntry {
    /// 32 lowercase hex digits when `status` is Ok, empty otherwise.
    pub uuid: String,
    pub timestamp: u32,
    pub status: Status,
}

impl UuidEntry {
    pub fn ok(uuid: impl Into<String>, timestamp: u32) -> Self {
        Self { uuid: uuid.into(), timestamp, status: Status::Ok }
    }

    pub fn failed(status: Status, timestamp: u32) -> Self {
        Self { uuid: String::new(), timestamp, status }
    }

    /// Marker written over a binding that turned out to be wrong.
    pub fn invalidated(timestamp: u32) -> Self {
        Self::failed(Status::Unset, timestamp)
    }

    pub fn ttl(&self) -> Duration {
        self.status.uuid_ttl()
    }

    /// True while the record is younger than its status TTL.
    pub fn is_fresh(&self, now: u32) -> bool {
        secs_since(now, self.timestamp) <= self.ttl().as_secs()
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_LEN + self.uuid.len());
        buf.put_u8(self.status.as_byte());
        buf.put_u32(self.timestamp);
        buf.put_slice(self.uuid.as_bytes());
        buf.freeze()
    }

    pub fn decode(mut raw: Bytes) -> Result<Self, Error> {
        if raw.len() < HEADER_LEN {
            return Err(Error::Decode(format!("uuid entry too short: {} bytes", raw.len())));
        }
        let status = Status::from_byte(raw.get_u8())?;
        let timestamp = raw.get_u32();
        let uuid = String::from_utf8(raw.to_vec()).map_err(|e| Error::Decode(format!("uuid entry: {e}")))?;

        match (status, uuid.is_empty()) {
            (Status::Ok, _) if !is_uuid(&uuid) => Err(Error::Decode(format!("uuid entry holds invalid uuid {uuid:?}"))),
            (Status::Ok, _) | (_, true) => Ok(Self { uuid, timestamp, status }),
            (_, false) => Err(Error::Decode(format!("{status} uuid entry carries a uuid"))),
        }
    }
}
