//! Origin admission for realtime connections.

use std::collections::HashSet;

/// Result of checking a connection attempt's origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Allow,
    Deny,
}

/// Allow-set of browser origins.
///
/// A missing or empty origin (same-origin request, non-browser worker) is
/// always allowed; anything else must be listed exactly.
#[derive(Debug, Clone, Default)]
pub struct OriginPolicy {
    allowed: HashSet<String>,
}

impl OriginPolicy {
    pub fn new<I, S>(origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let allowed = origins
            .into_iter()
            .map(|o| o.as_ref().trim().trim_end_matches('/').to_string())
            .filter(|o| !o.is_empty())
            .collect();
        Self { allowed }
    }

    /// Checks a raw origin value.
    pub fn check(&self, origin: Option<&str>) -> Admission {
        match origin {
            None | Some("") => Admission::Allow,
            Some(origin) if self.allowed.contains(origin) => Admission::Allow,
            Some(_) => Admission::Deny,
        }
    }
}
