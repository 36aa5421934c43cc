use std::future::Future;

use crate::error::AppError;
use crate::models::{FetchTimeouts, FetchedPage, Identity};

/// Loads a page through a given egress identity and user agent.
///
/// Implementations report every failure to load the page as a retryable
/// [`AppError`] variant (HTTP, network, timeout, browser).
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        identity: &Identity,
        user_agent: &str,
        timeouts: &FetchTimeouts,
    ) -> impl Future<Output = Result<FetchedPage, AppError>> + Send;
}

/// Mints network identities for new sessions.
///
/// Called while the session rotator holds its lock, so it must not block.
pub trait IdentityProvider: Send + Sync {
    /// `session_hint` is the id of the session the identity is minted for;
    /// providers with sticky sessions use it to pin an exit node.
    fn new_identity(&self, session_hint: &str) -> Identity;
}

/// Connects directly, without a proxy.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectIdentity;

impl IdentityProvider for DirectIdentity {
    fn new_identity(&self, _session_hint: &str) -> Identity {
        Identity::direct()
    }
}

/// Persists task records and run-level values.
///
/// Failures are reported to the caller, who logs them and carries on; a sink
/// error never aborts a run.
pub trait Sink: Send + Sync + Clone {
    fn append(
        &self,
        record: &serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;

    fn set_value(
        &self,
        key: &str,
        value: &serde_json::Value,
    ) -> impl Future<Output = Result<(), AppError>> + Send;
}

/// A no-op Sink for use when persistence is not needed.
#[derive(Debug, Clone)]
pub struct NullSink;

impl Sink for NullSink {
    async fn append(&self, _record: &serde_json::Value) -> Result<(), AppError> {
        Ok(())
    }

    async fn set_value(&self, _key: &str, _value: &serde_json::Value) -> Result<(), AppError> {
        Ok(())
    }
}
