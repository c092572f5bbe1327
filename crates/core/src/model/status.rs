//! Lookup outcome and the negative-caching TTL policy.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::Error;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Outcome of an upstream lookup, persisted as one byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Status {
    /// No outcome recorded; always refetched.
    #[default]
    Unset = 0,
    Ok = 1,
    /// Any failure that is neither "unknown user" nor a rate limit.
    ErrGeneric = 2,
    /// Upstream affirms the user does not exist.
    ErrUnknown = 3,
    ErrRateLimit = 4,
}

impl Status {
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Result<Self, Error> {
        match byte {
            0 => Ok(Status::Unset),
            1 => Ok(Status::Ok),
            2 => Ok(Status::ErrGeneric),
            3 => Ok(Status::ErrUnknown),
            4 => Ok(Status::ErrRateLimit),
            other => Err(Error::Decode(format!("unknown status byte {other}"))),
        }
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Cache lifetime of a username -> UUID record with this status.
    pub fn uuid_ttl(self) -> Duration {
        Duration::from_secs(match self {
            Status::Ok => 60 * DAY,
            Status::ErrUnknown => 14 * DAY,
            Status::ErrRateLimit => 2 * HOUR,
            Status::ErrGeneric | Status::Unset => HOUR,
        })
    }

    /// Cache lifetime of a UUID -> profile record with this status.
    pub fn user_ttl(self) -> Duration {
        Duration::from_secs(match self {
            Status::Ok => 60 * DAY,
            Status::ErrUnknown => 7 * DAY,
            Status::ErrRateLimit => HOUR,
            Status::ErrGeneric | Status::Unset => 30 * 60,
        })
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Status::Unset => "unset",
            Status::Ok => "ok",
            Status::ErrGeneric => "generic error",
            Status::ErrUnknown => "unknown user",
            Status::ErrRateLimit => "rate limited",
        })
    }
}
