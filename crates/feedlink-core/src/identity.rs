//! Session identity: a bearer credential plus the scope it is bound to.

use std::fmt;

use crate::ids::ScopeId;

/// Credential and scope a transport session is keyed by.
///
/// Changing either part requires a brand-new session. The token is never
/// printed by `Debug`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    token: String,
    scope: ScopeId,
}

impl Identity {
    /// Create an identity from a bearer token and a scope.
    pub fn new(token: impl Into<String>, scope: impl Into<ScopeId>) -> Self {
        Self {
            token: token.into(),
            scope: scope.into(),
        }
    }

    /// The bearer credential.
    pub fn token(&self) -> &str {
        &self.token
    }

    /// The scope path segment (e.g. a workspace id).
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }

    /// Whether a credential is present at all.
    pub fn is_authenticated(&self) -> bool {
        !self.token.is_empty()
    }

    /// `Authorization` header value for the connection handshake.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("token", &"<redacted>")
            .field("scope", &self.scope)
            .finish()
    }
}
