//! Reference stages.
//!
//! | Stage                    | Rejects with | When                                   |
//! |--------------------------|--------------|----------------------------------------|
//! | [`AuthenticationStage`]  | 401          | credential missing, malformed, unknown |
//! | [`AccessStage`]          | 403          | client address not on the allow-list   |
//! | [`RateLimitStage`]       | 429          | key over its per-window budget         |
//! | [`ContentTypeStage`]     | 415          | media type absent (if required) or not allowed |
//! | [`LoggingStage`]         | never        |                                        |
//!
//! None of them know about each other or about the executor; ordering and
//! path scoping come from their [`StageDescriptor`](crate::StageDescriptor).

pub mod access;
pub mod authentication;
pub mod content_type;
pub mod logging;
pub mod rate_limit;

pub use access::AccessStage;
pub use authentication::{
    AuthenticationStage, CredentialScheme, CredentialValidator, StaticCredentials,
};
pub use content_type::ContentTypeStage;
pub use logging::LoggingStage;
pub use rate_limit::{
    Clock, ManualClock, RateLimitInfo, RateLimitKey, RateLimitStage, RateLimitStore,
    SystemClock, DEFAULT_SWEEP_INTERVAL, RATE_LIMIT,
};
