//! In-memory fake of the engine API for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use super::{ApiError, EngineApi, EngineEvent, EngineEventKind, EngineEvents, SessionRef};

/// Scriptable fake: records every call, can delay or fail grants/revokes,
/// and pushes subscription events on demand.
pub struct FakeEngineApi {
    pub adopted: Mutex<Option<String>>,
    pub exchanges: Mutex<Vec<String>>,
    pub fail_exchange: Mutex<bool>,
    /// Snapshot returned by `list_sessions`.
    pub snapshot: Mutex<Vec<SessionRef>>,
    /// Interleaving record of grant/revoke calls, in completion-start order.
    pub ops: Mutex<Vec<String>>,
    pub revoked: Mutex<Vec<String>>,
    pub fail_grants_for: Mutex<HashSet<String>>,
    pub fail_revokes_for: Mutex<HashSet<String>>,
    pub grant_delay: Mutex<Option<Duration>>,
    token_counter: AtomicUsize,
    events_tx: Mutex<Option<mpsc::UnboundedSender<EngineEvent>>>,
}

impl FakeEngineApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            adopted: Mutex::new(None),
            exchanges: Mutex::new(Vec::new()),
            fail_exchange: Mutex::new(false),
            snapshot: Mutex::new(Vec::new()),
            ops: Mutex::new(Vec::new()),
            revoked: Mutex::new(Vec::new()),
            fail_grants_for: Mutex::new(HashSet::new()),
            fail_revokes_for: Mutex::new(HashSet::new()),
            grant_delay: Mutex::new(None),
            token_counter: AtomicUsize::new(0),
            events_tx: Mutex::new(None),
        })
    }

    pub fn push_added(&self, session_id: i32) {
        self.push_event(session_id, EngineEventKind::Added);
    }

    pub fn push_removed(&self, session_id: i32) {
        self.push_event(session_id, EngineEventKind::Removed);
    }

    pub fn push_event(&self, session_id: i32, kind: EngineEventKind) {
        let tx = self.events_tx.lock();
        let tx = tx.as_ref().expect("no active subscription");
        tx.send(EngineEvent { session_id, kind })
            .expect("subscriber dropped");
    }
}

#[async_trait]
impl EngineApi for FakeEngineApi {
    async fn exchange_token(&self, secret: &str) -> Result<String, ApiError> {
        if *self.fail_exchange.lock() {
            return Err(ApiError::Rejected("invalid one-time secret".into()));
        }
        self.exchanges.lock().push(secret.to_string());
        let token = "admin-token".to_string();
        *self.adopted.lock() = Some(token.clone());
        Ok(token)
    }

    fn adopt_token(&self, token: &str) {
        *self.adopted.lock() = Some(token.to_string());
    }

    async fn api_version(&self) -> Result<String, ApiError> {
        Ok("1.2.3".to_string())
    }

    async fn list_sessions(&self) -> Result<Vec<SessionRef>, ApiError> {
        Ok(self.snapshot.lock().clone())
    }

    async fn grant_plugin(&self, plugin_url: &str) -> Result<String, ApiError> {
        let delay = *self.grant_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.ops.lock().push(format!("grant {plugin_url}"));
        if self.fail_grants_for.lock().contains(plugin_url) {
            return Err(ApiError::Rejected(format!(
                "plugin registration refused: {plugin_url}"
            )));
        }
        let n = self.token_counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("plugin-token-{n}"))
    }

    async fn revoke_plugin(&self, api_token: &str) -> Result<bool, ApiError> {
        self.ops.lock().push(format!("revoke {api_token}"));
        if self.fail_revokes_for.lock().contains(api_token) {
            return Err(ApiError::Transport("connection reset".into()));
        }
        self.revoked.lock().push(api_token.to_string());
        Ok(true)
    }

    async fn subscribe(&self) -> Result<EngineEvents, ApiError> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.events_tx.lock() = Some(tx);
        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        });
        Ok(Box::pin(stream))
    }
}
