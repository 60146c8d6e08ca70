//! Authenticated caller identity.
//!
//! An authentication stage attaches a [`Principal`] under [`PRINCIPAL`] once a
//! credential checks out. Later stages (authorization, per-user rate limits)
//! and the terminal handler read it back from the context.

use crate::attachment::AttachmentKey;
use serde::{Deserialize, Serialize};

/// Attachment slot holding the authenticated [`Principal`].
pub const PRINCIPAL: AttachmentKey<Principal> = AttachmentKey::new("principal");

/// The authenticated caller of a request.
///
/// # Example
///
/// ```
/// use turnstile_core::Principal;
///
/// let principal = Principal::bearer("alice").with_roles(["admin"]);
/// assert_eq!(principal.log_id(), "bearer:alice");
/// assert!(principal.has_role("admin"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Principal {
    /// Caller identified by a static API key.
    ApiKey {
        /// Identifier of the key (never the secret itself).
        key_id: String,
        /// Roles or scopes granted to the key.
        #[serde(default)]
        roles: Vec<String>,
    },
    /// Caller identified by a bearer token.
    Bearer {
        /// Subject the token was issued to.
        subject: String,
        /// Roles carried by the token.
        #[serde(default)]
        roles: Vec<String>,
    },
}

impl Principal {
    /// Creates an API key principal with no roles.
    #[must_use]
    pub fn api_key(key_id: impl Into<String>) -> Self {
        Self::ApiKey {
            key_id: key_id.into(),
            roles: Vec::new(),
        }
    }

    /// Creates a bearer principal with no roles.
    #[must_use]
    pub fn bearer(subject: impl Into<String>) -> Self {
        Self::Bearer {
            subject: subject.into(),
            roles: Vec::new(),
        }
    }

    /// Returns a copy of this principal with the given roles.
    #[must_use]
    pub fn with_roles<I, S>(mut self, new_roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles = match &mut self {
            Self::ApiKey { roles, .. } | Self::Bearer { roles, .. } => roles,
        };
        *roles = new_roles.into_iter().map(Into::into).collect();
        self
    }

    /// Returns the stable identifier used as a rate-limit key.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::ApiKey { key_id, .. } => key_id,
            Self::Bearer { subject, .. } => subject,
        }
    }

    /// Returns a string identifier suitable for logging.
    ///
    /// This never contains secrets.
    #[must_use]
    pub fn log_id(&self) -> String {
        match self {
            Self::ApiKey { key_id, .. } => format!("apikey:{key_id}"),
            Self::Bearer { subject, .. } => format!("bearer:{subject}"),
        }
    }

    /// Returns the roles granted to this principal.
    #[must_use]
    pub fn roles(&self) -> &[String] {
        match self {
            Self::ApiKey { roles, .. } | Self::Bearer { roles, .. } => roles,
        }
    }

    /// Returns `true` if the principal carries `role`.
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles().iter().any(|r| r == role)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_key_log_id() {
        let principal = Principal::api_key("key-abc123");
        assert_eq!(principal.log_id(), "apikey:key-abc123");
        assert_eq!(principal.id(), "key-abc123");
    }

    #[test]
    fn test_bearer_log_id() {
        let principal = Principal::bearer("user-123");
        assert_eq!(principal.log_id(), "bearer:user-123");
    }

    #[test]
    fn test_roles() {
        let principal = Principal::api_key("k").with_roles(["read", "write"]);
        assert_eq!(principal.roles(), ["read".to_string(), "write".to_string()]);
        assert!(principal.has_role("write"));
        assert!(!principal.has_role("admin"));
    }

    #[test]
    fn test_serialization_tagged() {
        let json = serde_json::to_value(Principal::bearer("alice")).unwrap();
        assert_eq!(json["kind"], "bearer");
        assert_eq!(json["subject"], "alice");
    }
}
