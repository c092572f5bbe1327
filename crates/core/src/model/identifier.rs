//! Player identifiers.
//!
//! A request names a player either by username (1-16 of `[A-Za-z0-9_]`,
//! case-insensitive) or by UUID (32 hex digits, optionally in the dashed
//! 8-4-4-4-12 form). Both are normalized to lowercase; UUIDs lose their dashes.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

use crate::Error;

static USERNAME_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_]{1,16}$").expect("valid regex"));
static UUID_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[0-9a-f]{32}$").expect("valid regex"));
static DASHED_UUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").expect("valid regex")
});

/// A validated, normalized player identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Identifier {
    /// Lowercased username.
    Username(String),
    /// 32 lowercase hex digits.
    Uuid(String),
}

impl Identifier {
    /// Validate and normalize raw input.
    pub fn parse(input: &str) -> Result<Self, Error> {
        if let Some(uuid) = normalize_uuid(input) {
            return Ok(Identifier::Uuid(uuid));
        }
        if is_username(input) {
            return Ok(Identifier::Username(input.to_ascii_lowercase()));
        }
        Err(Error::InvalidIdentifier(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        match self {
            Identifier::Username(s) | Identifier::Uuid(s) => s,
        }
    }

    pub fn is_uuid(&self) -> bool {
        matches!(self, Identifier::Uuid(_))
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn is_username(input: &str) -> bool {
    USERNAME_RE.is_match(input)
}

/// True for a plain 32-hex UUID (any case).
pub fn is_uuid(input: &str) -> bool {
    UUID_RE.is_match(&input.to_ascii_lowercase())
}

/// True for the dashed 8-4-4-4-12 form (any case).
pub fn is_dashed_uuid(input: &str) -> bool {
    DASHED_UUID_RE.is_match(&input.to_ascii_lowercase())
}

/// Plain lowercase form of a plain or dashed UUID, `None` for anything else.
pub fn normalize_uuid(input: &str) -> Option<String> {
    let lower = input.to_ascii_lowercase();
    if UUID_RE.is_match(&lower) {
        return Some(lower);
    }
    if DASHED_UUID_RE.is_match(&lower) {
        return Some(lower.replace('-', ""));
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_username_lowercases() {
        assert_eq!(Identifier::parse("Clone1018").unwrap(), Identifier::Username("clone1018".into()));
        assert_eq!(Identifier::parse("a").unwrap(), Identifier::Username("a".into()));
        assert_eq!(Identifier::parse("MHF_Steve").unwrap(), Identifier::Username("mhf_steve".into()));
    }

    #[test]
    fn test_parse_rejects_invalid() {
        for bad in ["", "seventeen_chars_x", "bad-name", "sp ace", "ünï"] {
            assert!(matches!(Identifier::parse(bad), Err(Error::InvalidIdentifier(_))), "{bad}");
        }
    }

    #[test]
    fn test_parse_uuid_forms() {
        let plain = Identifier::parse("d9135e082f2244c89cb0bee234155292").unwrap();
        let dashed = Identifier::parse("d9135e08-2f22-44c8-9cb0-bee234155292").unwrap();
        let upper = Identifier::parse("D9135E082F2244C89CB0BEE234155292").unwrap();
        assert_eq!(plain, dashed);
        assert_eq!(plain, upper);
        assert!(plain.is_uuid());
        assert_eq!(plain.as_str(), "d9135e082f2244c89cb0bee234155292");
    }

    #[test]
    fn test_dashed_detection() {
        assert!(is_dashed_uuid("d9135e08-2f22-44c8-9cb0-bee234155292"));
        assert!(!is_dashed_uuid("d9135e082f2244c89cb0bee234155292"));
        assert!(is_uuid("d9135e082f2244c89cb0bee234155292"));
        assert!(!is_uuid("d9135e082f2244c89cb0bee23415529"));
        assert_eq!(normalize_uuid("lukegb"), None);
    }
}
