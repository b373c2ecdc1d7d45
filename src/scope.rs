// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync scopes.
//!
//! The engine synchronizes two kinds of independently-versioned streams:
//! the user's own data, and one stream per linked notebook (a notebook
//! shared from another account). Each scope has its own USN sequence,
//! auth token, and persisted checkpoint.

use serde::{Deserialize, Serialize};

/// Remote identity assigned by the cloud service on first upload.
pub type Guid = String;

/// One independently-versioned replica stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// The account's own data stream.
    UserOwn,
    /// One linked notebook's stream, keyed by the linked notebook guid.
    LinkedNotebook(Guid),
}

impl Scope {
    /// The linked notebook guid, if this is a linked scope.
    #[must_use]
    pub fn linked_notebook_guid(&self) -> Option<&str> {
        match self {
            Self::UserOwn => None,
            Self::LinkedNotebook(guid) => Some(guid),
        }
    }

    /// Stable key for persisted per-scope state.
    #[must_use]
    pub fn storage_key(&self) -> String {
        match self {
            Self::UserOwn => "user-own".to_string(),
            Self::LinkedNotebook(guid) => format!("linked:{guid}"),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UserOwn => write!(f, "user-own"),
            Self::LinkedNotebook(guid) => write!(f, "linked:{guid}"),
        }
    }
}

/// Scope selector for `highest_usn` queries against the local store.
///
/// Wider than [`Scope`]: the store can also be asked for the maximum USN
/// across the user's own tables and every linked notebook at once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UsnScope {
    /// User-own tables only (includes LinkedNotebooks and SavedSearches).
    UserOwn,
    /// Every table, user-own and all linked notebooks.
    AllIncludingLinked,
    /// One linked notebook's tables.
    LinkedNotebook(Guid),
}

impl From<&Scope> for UsnScope {
    fn from(scope: &Scope) -> Self {
        match scope {
            Scope::UserOwn => Self::UserOwn,
            Scope::LinkedNotebook(guid) => Self::LinkedNotebook(guid.clone()),
        }
    }
}

/// Opaque bearer token for remote calls.
///
/// The engine never inspects the contents; credential storage is the
/// embedding application's concern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthToken(pub String);

impl AuthToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_display() {
        assert_eq!(format!("{}", Scope::UserOwn), "user-own");
        assert_eq!(
            format!("{}", Scope::LinkedNotebook("abc-123".into())),
            "linked:abc-123"
        );
    }

    #[test]
    fn test_storage_key_roundtrip_distinct() {
        let own = Scope::UserOwn.storage_key();
        let linked = Scope::LinkedNotebook("abc".into()).storage_key();
        assert_ne!(own, linked);
        assert_eq!(own, "user-own");
        assert_eq!(linked, "linked:abc");
    }

    #[test]
    fn test_linked_notebook_guid_accessor() {
        assert!(Scope::UserOwn.linked_notebook_guid().is_none());
        assert_eq!(
            Scope::LinkedNotebook("g1".into()).linked_notebook_guid(),
            Some("g1")
        );
    }

    #[test]
    fn test_usn_scope_from_scope() {
        assert_eq!(UsnScope::from(&Scope::UserOwn), UsnScope::UserOwn);
        assert_eq!(
            UsnScope::from(&Scope::LinkedNotebook("g".into())),
            UsnScope::LinkedNotebook("g".into())
        );
    }
}
