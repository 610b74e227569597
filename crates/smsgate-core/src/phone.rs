//! Phone number value objects.
//!
//! Numbers travel in two shapes:
//! - local format: 8 digits, `6` followed by `1`-`5`, then six digits
//! - international format: the local number behind [`COUNTRY_PREFIX`]

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Country prefix prepended to every outbound phone number.
pub const COUNTRY_PREFIX: &str = "+993";

const LOCAL_SHAPE: &str = "8 digits starting with 61-65";
const PREFIXED_SHAPE: &str = "8 digits starting with 61-65, optionally prefixed with +993";

static LOCAL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^6[1-5][0-9]{6}$").expect("local phone regex is valid"));

/// A validated local-format phone number (e.g. `61234567`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LocalPhone(String);

impl LocalPhone {
    /// Parses a strictly local-format number.
    ///
    /// No whitespace trimming and no prefix handling: `61234567` is accepted,
    /// `+99361234567` is not.
    pub fn parse(raw: &str) -> DomainResult<Self> {
        if LOCAL_PATTERN.is_match(raw) {
            Ok(Self(raw.to_string()))
        } else {
            Err(DomainError::invalid_phone(raw, LOCAL_SHAPE))
        }
    }

    /// Parses a number that may already carry the country prefix.
    ///
    /// The prefix is stripped (at most once) and the remainder must be a
    /// valid local number.
    pub fn parse_prefixed(raw: &str) -> DomainResult<Self> {
        let local = raw.strip_prefix(COUNTRY_PREFIX).unwrap_or(raw);
        if LOCAL_PATTERN.is_match(local) {
            Ok(Self(local.to_string()))
        } else {
            Err(DomainError::invalid_phone(raw, PREFIXED_SHAPE))
        }
    }

    /// Returns the local digits.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the number with the country prefix (e.g. `+99361234567`).
    pub fn international(&self) -> String {
        format!("{COUNTRY_PREFIX}{}", self.0)
    }
}

impl fmt::Display for LocalPhone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for LocalPhone {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LocalPhone> for String {
    fn from(phone: LocalPhone) -> Self {
        phone.0
    }
}

impl AsRef<str> for LocalPhone {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
