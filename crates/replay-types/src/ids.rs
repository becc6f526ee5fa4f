//! Type-safe identifier wrapper around [`Uuid`].
//!
//! Account identifiers are opaque keys. Their canonical string form (the
//! lowercase hyphenated UUID) is what lane assignment hashes, so two values
//! of the same logical key always land on the same lane regardless of where
//! or when they were constructed.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for an account in the read model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub Uuid);

impl AccountId {
    /// Create a new identifier using UUID v7 (time-ordered).
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Return the inner [`Uuid`] value.
    pub const fn into_inner(self) -> Uuid {
        self.0
    }

    /// Parse an identifier from its canonical string form.
    ///
    /// # Errors
    ///
    /// Returns [`uuid::Error`] if `s` is not a valid UUID.
    pub fn parse(s: &str) -> Result<Self, uuid::Error> {
        Uuid::parse_str(s).map(Self)
    }

    /// The canonical string form used for lane assignment and storage keys.
    pub fn canonical(&self) -> String {
        self.0.hyphenated().to_string()
    }
}

impl Default for AccountId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for AccountId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl From<Uuid> for AccountId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl From<AccountId> for Uuid {
    fn from(id: AccountId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_canonical_form() {
        let id = AccountId::new();
        assert_eq!(id.to_string(), id.canonical());
        assert_eq!(id.canonical(), id.into_inner().hyphenated().to_string());
    }

    #[test]
    fn canonical_form_is_lowercase() {
        let id = AccountId::parse("6F9619FF-8B86-D011-B42D-00C04FC964FF").ok();
        assert_eq!(
            id.map(|id| id.canonical()).as_deref(),
            Some("6f9619ff-8b86-d011-b42d-00c04fc964ff")
        );
    }

    #[test]
    fn serializes_as_bare_uuid() {
        let id = AccountId::from(Uuid::nil());
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"00000000-0000-0000-0000-000000000000\"");
    }
}
