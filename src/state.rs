use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::api::auth;
use crate::api::EngineApi;
use crate::config::CorePaths;
use crate::error::Result;
use crate::process::CoreSupervisor;
use crate::runtime::{UiEvent, UiRuntime};
use crate::settings::SettingsManager;
use crate::store::{Reconciler, SessionStore, SharedStore};

/// Application context: single owner of the supervisor, the settings
/// manager, and (once connected) the reconciler. Everything engine-facing
/// is constructor-injected; there is no module-level state.
pub struct AppState {
    pub settings: SettingsManager,
    pub supervisor: CoreSupervisor,
    store: SharedStore,
    runtime: Arc<dyn UiRuntime>,
    reconciler: Mutex<Option<Arc<Reconciler>>>,
}

impl AppState {
    pub async fn new(paths: CorePaths, runtime: Arc<dyn UiRuntime>) -> anyhow::Result<Self> {
        let settings = SettingsManager::new().await?;
        Ok(Self::with_settings(paths, runtime, settings))
    }

    pub fn with_settings(
        paths: CorePaths,
        runtime: Arc<dyn UiRuntime>,
        settings: SettingsManager,
    ) -> Self {
        Self {
            settings,
            supervisor: CoreSupervisor::new(paths),
            store: Arc::new(RwLock::new(SessionStore::new())),
            runtime,
            reconciler: Mutex::new(None),
        }
    }

    /// Launch the engine and start mirroring its state through `api`.
    ///
    /// Any failure in this sequence (readiness, credential exchange,
    /// snapshot) aborts startup; nothing is retried.
    pub async fn launch(&self, api: Arc<dyn EngineApi>) -> Result<()> {
        let api_port = self.supervisor.start().await?;
        self.store.write().api_port = api_port;

        let payload = self.supervisor.handoff();
        let token = auth::establish_credentials(api.as_ref(), &payload.credential).await?;
        self.supervisor.save_admin_token(&token);
        self.runtime.emit(UiEvent::CoreReady { api_port });

        let reconciler = Reconciler::new(api, Arc::clone(&self.store), Arc::clone(&self.runtime));
        let settings = self.settings.get().await;
        reconciler.init(&settings).await?;
        *self.reconciler.lock() = Some(reconciler);
        Ok(())
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn reconciler(&self) -> Option<Arc<Reconciler>> {
        self.reconciler.lock().clone()
    }

    /// Dispose the reconciler (revoking live plugin credentials), then stop
    /// the engine. The engine stop does not depend on reconciler state and
    /// runs even if no reconciler was ever connected.
    pub async fn shutdown(&self) -> Result<()> {
        let reconciler = self.reconciler.lock().take();
        if let Some(reconciler) = reconciler {
            reconciler.dispose().await;
        }
        self.supervisor.stop().await?;
        self.runtime.emit(UiEvent::CoreStopped);
        Ok(())
    }
}
