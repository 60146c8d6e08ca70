//! Address allow-listing.
//!
//! Rejects with `403` any request whose client address is not in the
//! allow-set. The client address is the connected peer, or the first
//! `X-Forwarded-For` hop when the stage is told to trust a fronting proxy.

use crate::stage::{Decision, Stage};
use http::StatusCode;
use std::collections::HashSet;
use std::net::IpAddr;
use turnstile_core::{BoxFuture, RequestContext, Response, ResponseExt};

/// Header carrying the proxy chain.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Default 403 body.
pub const DEFAULT_FORBIDDEN_BODY: &str = "Forbidden";

/// Allows only listed client addresses.
///
/// # Example
///
/// ```
/// use turnstile_middleware::stages::AccessStage;
///
/// let stage = AccessStage::new(["10.0.0.1".parse().unwrap()]).trust_forwarded(true);
/// assert!(stage.is_allowed("10.0.0.1".parse().unwrap()));
/// ```
#[derive(Debug, Clone)]
pub struct AccessStage {
    allowed: HashSet<IpAddr>,
    trust_forwarded: bool,
    forbidden_body: String,
}

impl AccessStage {
    /// Creates a stage allowing exactly `addresses`.
    pub fn new(addresses: impl IntoIterator<Item = IpAddr>) -> Self {
        Self {
            allowed: addresses.into_iter().collect(),
            trust_forwarded: false,
            forbidden_body: DEFAULT_FORBIDDEN_BODY.to_string(),
        }
    }

    /// Reads the client address from `X-Forwarded-For` instead of the peer.
    ///
    /// Only enable behind a proxy that overwrites the header.
    #[must_use]
    pub const fn trust_forwarded(mut self, trust: bool) -> Self {
        self.trust_forwarded = trust;
        self
    }

    /// Replaces the 403 body.
    #[must_use]
    pub fn with_forbidden_body(mut self, body: impl Into<String>) -> Self {
        self.forbidden_body = body.into();
        self
    }

    /// Returns `true` if `address` is on the list.
    #[must_use]
    pub fn is_allowed(&self, address: IpAddr) -> bool {
        self.allowed.contains(&address)
    }

    /// Returns the address the stage judges a request by.
    #[must_use]
    pub fn client_address(&self, ctx: &RequestContext) -> Option<IpAddr> {
        if self.trust_forwarded {
            if let Some(hop) = forwarded_client(ctx) {
                return Some(hop);
            }
        }
        ctx.remote_addr()
    }
}

/// Returns the first parsable `X-Forwarded-For` hop.
pub(crate) fn forwarded_client(ctx: &RequestContext) -> Option<IpAddr> {
    ctx.header(FORWARDED_FOR_HEADER)?
        .split(',')
        .next()
        .and_then(|hop| hop.trim().parse().ok())
}

impl Stage for AccessStage {
    fn evaluate<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, Decision> {
        let decision = match self.client_address(ctx) {
            Some(address) if self.is_allowed(address) => Decision::Continue,
            address => {
                tracing::debug!(
                    request_id = %ctx.request_id(),
                    client = ?address,
                    "address not on allow-list"
                );
                Decision::ShortCircuit(Response::text(
                    StatusCode::FORBIDDEN,
                    self.forbidden_body.clone(),
                ))
            }
        };
        Box::pin(async move { decision })
    }
}
