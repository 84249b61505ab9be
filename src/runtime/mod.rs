//! Boundary to the window layer.
//!
//! The store never talks to a window directly; mutations are announced as
//! [`UiEvent`]s through a [`UiRuntime`] implementation supplied by the
//! embedder. Rendering pulls everything else from the store's derived
//! getters on demand.

use serde::Serialize;
use tokio::sync::mpsc;

/// Events pushed across the UI boundary.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiEvent {
    /// The engine came up and its API is reachable.
    CoreReady { api_port: u16 },

    /// The engine has fully stopped (all shutdown signals observed).
    CoreStopped,

    /// A session appeared (snapshot or live).
    SessionAdded { unique_key: String, session_id: i32 },

    /// A session changed (currently: deactivation).
    SessionUpdated { unique_key: String },

    /// Sessions discarded by the retention policy.
    SessionsPruned { unique_keys: Vec<String> },

    /// A plugin was attached, provisioned, failed, or removed. The scope
    /// key is `"default"` for the defaults registry.
    PluginUpdated {
        unique_key: String,
        plugin_id: String,
    },
}

pub trait UiRuntime: Send + Sync {
    fn emit(&self, event: UiEvent);
}

/// Runtime for contexts with no window attached (tests, headless runs).
pub struct NoopRuntime;

impl UiRuntime for NoopRuntime {
    fn emit(&self, _event: UiEvent) {}
}

/// Buffers events on an unbounded channel for consumers that poll.
pub struct ChannelRuntime {
    tx: mpsc::UnboundedSender<UiEvent>,
}

impl ChannelRuntime {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<UiEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl UiRuntime for ChannelRuntime {
    fn emit(&self, event: UiEvent) {
        if self.tx.send(event).is_err() {
            tracing::debug!("UI event receiver dropped");
        }
    }
}
