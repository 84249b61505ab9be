//! Client-side seam for the engine's API.
//!
//! The wire transport lives outside this crate; everything here talks to an
//! [`EngineApi`] implementation. The surface is one request/response pair
//! per operation plus a persistent push subscription for session lifecycle
//! events, all over an authenticated channel (bearer credential attached by
//! the implementation).

pub mod auth;
#[cfg(test)]
pub(crate) mod testing;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("request rejected by engine: {0}")]
    Rejected(String),

    #[error("no credential established for engine API")]
    NotAuthenticated,
}

/// A session as the engine reports it. The id is engine-assigned and may be
/// reused across engine restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRef {
    pub id: i32,
}

/// Discriminant of a push event. Kinds the engine adds later arrive as
/// `Other` and are ignored by consumers rather than treated as fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEventKind {
    Added,
    Removed,
    Other(String),
}

#[derive(Debug, Clone)]
pub struct EngineEvent {
    pub session_id: i32,
    pub kind: EngineEventKind,
}

pub type EngineEvents = BoxStream<'static, EngineEvent>;

#[async_trait]
pub trait EngineApi: Send + Sync {
    /// Redeem a one-time secret for a durable token; the implementation
    /// attaches the token to every subsequent request.
    async fn exchange_token(&self, secret: &str) -> Result<String, ApiError>;

    /// Attach a previously issued durable token. Client-side only, no
    /// round trip.
    fn adopt_token(&self, token: &str);

    async fn api_version(&self) -> Result<String, ApiError>;

    async fn list_sessions(&self) -> Result<Vec<SessionRef>, ApiError>;

    /// Issue a credential for one plugin instance.
    async fn grant_plugin(&self, plugin_url: &str) -> Result<String, ApiError>;

    /// Revoke a previously issued plugin credential.
    async fn revoke_plugin(&self, api_token: &str) -> Result<bool, ApiError>;

    /// Open the session lifecycle subscription. Dropping the stream
    /// unsubscribes.
    async fn subscribe(&self) -> Result<EngineEvents, ApiError>;
}
