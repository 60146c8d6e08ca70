//! Credential authentication.
//!
//! The stage reads one credential from the request, asks a
//! [`CredentialValidator`] who it belongs to, and attaches the resulting
//! [`Principal`] for later stages. It supports two credential schemes:
//!
//! - **API key**: the raw value of a designated header (e.g. `X-API-KEY`)
//! - **Bearer**: the token from `Authorization: Bearer <token>`
//!
//! A missing, malformed, or unknown credential answers `401` with a plain-text
//! body. A validator that cannot answer (backend down) is a stage fault.
//!
//! # Example
//!
//! ```
//! use turnstile_middleware::stages::{AuthenticationStage, StaticCredentials};
//!
//! let stage = AuthenticationStage::api_key(
//!     "X-API-KEY",
//!     StaticCredentials::api_keys(["my-secret-key"]),
//! );
//! assert_eq!(stage.failure_body(), "Invalid API Key");
//! ```

use crate::stage::{Decision, Stage, StageFault};
use http::{header, HeaderValue, StatusCode};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use turnstile_core::{
    BoxFuture, GateError, Principal, RequestContext, Response, ResponseExt, PRINCIPAL,
};

/// Default header for API keys.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default 401 body.
pub const DEFAULT_FAILURE_BODY: &str = "Unauthorized";

/// 401 body used by the API-key preset.
pub const INVALID_API_KEY_BODY: &str = "Invalid API Key";

/// Where the credential lives in the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialScheme {
    /// The whole value of the named header.
    ApiKey {
        /// Header name, matched case-insensitively.
        header: String,
    },
    /// The token of an `Authorization: Bearer <token>` header.
    Bearer,
}

/// Why no credential could be read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CredentialProblem {
    Missing,
    Malformed,
}

impl CredentialProblem {
    const fn reason(self) -> &'static str {
        match self {
            Self::Missing => "missing credential",
            Self::Malformed => "malformed credential",
        }
    }
}

impl CredentialScheme {
    /// Creates an API-key scheme reading `header`.
    pub fn api_key(header: impl Into<String>) -> Self {
        Self::ApiKey {
            header: header.into(),
        }
    }

    /// Returns the label used in logs.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::ApiKey { .. } => "api_key",
            Self::Bearer => "bearer",
        }
    }

    fn extract<'c>(&self, ctx: &'c RequestContext) -> Result<&'c str, CredentialProblem> {
        match self {
            Self::ApiKey { header } => {
                let value = ctx.header(header).ok_or(CredentialProblem::Missing)?.trim();
                if value.is_empty() {
                    Err(CredentialProblem::Malformed)
                } else {
                    Ok(value)
                }
            }
            Self::Bearer => {
                let value = ctx
                    .header(header::AUTHORIZATION.as_str())
                    .ok_or(CredentialProblem::Missing)?;
                let (scheme, token) = value
                    .trim()
                    .split_once(' ')
                    .ok_or(CredentialProblem::Malformed)?;
                let token = token.trim();
                if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() {
                    Ok(token)
                } else {
                    Err(CredentialProblem::Malformed)
                }
            }
        }
    }
}

/// Decides who a credential belongs to.
///
/// Return `Ok(None)` for an unknown credential and `Err` only when the answer
/// could not be determined.
pub trait CredentialValidator: Send + Sync + 'static {
    /// Validates one credential.
    fn validate<'a>(&'a self, credential: &'a str)
        -> BoxFuture<'a, Result<Option<Principal>, GateError>>;
}

/// An in-memory credential table.
#[derive(Clone, Default)]
pub struct StaticCredentials {
    entries: HashMap<String, Principal>,
}

impl StaticCredentials {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accepts each key, identifying it as `key-1`, `key-2`, ... so the
    /// secret itself never reaches logs.
    pub fn api_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        keys.into_iter()
            .enumerate()
            .fold(Self::new(), |table, (i, key)| {
                table.with(key, Principal::api_key(format!("key-{}", i + 1)))
            })
    }

    /// Accepts each bearer token, identifying it as `token-1`, `token-2`, ...
    pub fn bearer_tokens<I, S>(tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        tokens
            .into_iter()
            .enumerate()
            .fold(Self::new(), |table, (i, token)| {
                table.with(token, Principal::bearer(format!("token-{}", i + 1)))
            })
    }

    /// Adds one credential.
    #[must_use]
    pub fn with(mut self, credential: impl Into<String>, principal: Principal) -> Self {
        self.entries.insert(credential.into(), principal);
        self
    }

    /// Returns the number of accepted credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no credential is accepted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl CredentialValidator for StaticCredentials {
    fn validate<'a>(
        &'a self,
        credential: &'a str,
    ) -> BoxFuture<'a, Result<Option<Principal>, GateError>> {
        let principal = self.entries.get(credential).cloned();
        Box::pin(async move { Ok(principal) })
    }
}

/// Authenticates requests and attaches the caller's [`Principal`].
pub struct AuthenticationStage {
    scheme: CredentialScheme,
    validator: Arc<dyn CredentialValidator>,
    failure_body: String,
}

impl AuthenticationStage {
    /// Creates a stage with the default `"Unauthorized"` failure body.
    pub fn new(scheme: CredentialScheme, validator: impl CredentialValidator) -> Self {
        Self::with_shared_validator(scheme, Arc::new(validator))
    }

    /// Creates a stage around a validator shared with other components.
    pub fn with_shared_validator(
        scheme: CredentialScheme,
        validator: Arc<dyn CredentialValidator>,
    ) -> Self {
        Self {
            scheme,
            validator,
            failure_body: DEFAULT_FAILURE_BODY.to_string(),
        }
    }

    /// API-key authentication on `header`, answering `"Invalid API Key"`.
    pub fn api_key(header: impl Into<String>, validator: impl CredentialValidator) -> Self {
        Self::new(CredentialScheme::api_key(header), validator)
            .with_failure_body(INVALID_API_KEY_BODY)
    }

    /// Bearer-token authentication, answering `"Unauthorized"`.
    pub fn bearer(validator: impl CredentialValidator) -> Self {
        Self::new(CredentialScheme::Bearer, validator)
    }

    /// Replaces the 401 body.
    #[must_use]
    pub fn with_failure_body(mut self, body: impl Into<String>) -> Self {
        self.failure_body = body.into();
        self
    }

    /// Returns the credential scheme.
    #[must_use]
    pub const fn scheme(&self) -> &CredentialScheme {
        &self.scheme
    }

    /// Returns the 401 body.
    #[must_use]
    pub fn failure_body(&self) -> &str {
        &self.failure_body
    }

    fn unauthorized(&self) -> Response {
        let mut response = Response::text(StatusCode::UNAUTHORIZED, self.failure_body.clone());
        if self.scheme == CredentialScheme::Bearer {
            response
                .headers_mut()
                .insert(header::WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        }
        response
    }
}

impl fmt::Debug for AuthenticationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationStage")
            .field("scheme", &self.scheme)
            .field("failure_body", &self.failure_body)
            .finish_non_exhaustive()
    }
}

impl Stage for AuthenticationStage {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
        Box::pin(async move {
            let credential = match self.scheme.extract(ctx) {
                Ok(credential) => credential.to_string(),
                Err(problem) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        scheme = self.scheme.label(),
                        reason = problem.reason(),
                        "authentication rejected"
                    );
                    return Decision::ShortCircuit(self.unauthorized());
                }
            };

            match self.validator.validate(&credential).await {
                Ok(Some(principal)) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        principal = %principal.log_id(),
                        "credential accepted"
                    );
                    ctx.attach(PRINCIPAL, principal);
                    Decision::Continue
                }
                Ok(None) => {
                    tracing::debug!(
                        request_id = %ctx.request_id(),
                        scheme = self.scheme.label(),
                        reason = "unknown credential",
                        "authentication rejected"
                    );
                    Decision::ShortCircuit(self.unauthorized())
                }
                Err(error) => Decision::Fail(StageFault::with_source(
                    "credential validation failed",
                    error,
                )),
            }
        })
    }
}
