//! Per-plugin credential provisioning against the engine.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;

use crate::api::{ApiError, EngineApi};

/// Issues and revokes plugin credentials.
///
/// Calls for the same plugin instance are serialized through a per-id lock
/// so a revoke triggered by session removal cannot overtake a still
/// in-flight grant for that instance. Different plugins proceed
/// independently; there is no global lock and no local credential cache.
pub struct PluginProvisioner {
    api: Arc<dyn EngineApi>,
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PluginProvisioner {
    pub fn new(api: Arc<dyn EngineApi>) -> Self {
        Self {
            api,
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn lock_for(&self, plugin_id: &str) -> Arc<AsyncMutex<()>> {
        Arc::clone(
            self.locks
                .lock()
                .entry(plugin_id.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
        )
    }

    pub async fn grant(&self, plugin_id: &str, plugin_url: &str) -> Result<String, ApiError> {
        let lock = self.lock_for(plugin_id);
        let _guard = lock.lock().await;
        self.api.grant_plugin(plugin_url).await
    }

    pub async fn revoke(&self, plugin_id: &str, api_token: &str) -> Result<bool, ApiError> {
        let lock = self.lock_for(plugin_id);
        let _guard = lock.lock().await;
        self.api.revoke_plugin(api_token).await
    }
}
