//! Warden core primitives and shared types.
//!
//! Everything the authorization hot path agrees on lives here: the typed
//! [`AuthorizationInput`] handed to the gateway, the [`AuthorizationDecision`]
//! it returns, the append-only [`DecisionRecord`] shipped to the audit sink,
//! structural validation limits, and the deterministic 128-bit
//! [`Fingerprint`] used as the decision-cache key.

#![deny(unsafe_code)]

pub mod decision;
pub mod fingerprint;
pub mod ids;
pub mod input;
pub mod record;
pub mod validate;

pub use decision::{AuthorizationDecision, Obligation, Violation, REDACTION_SENTINEL};
pub use fingerprint::Fingerprint;
pub use input::{
    Action, AuthorizationInput, Environment, Principal, RequestContext, Resource, ResourceKind,
    Role, Sensitivity,
};
pub use record::DecisionRecord;
pub use validate::{validate_input, ValidationError};

/// Version of the warden core library.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
