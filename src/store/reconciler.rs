//! Applies the engine's session lifecycle to the local store.
//!
//! One task consumes the push subscription and performs every map mutation,
//! so no handler ever observes a half-applied transition. Credential
//! provisioning and revocation are network calls and never run on that
//! path: they are spawned per plugin instance, serialized per instance by
//! the provisioner, and report back into the store when they land.

use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::api::{EngineApi, EngineEventKind};
use crate::error::Result;
use crate::runtime::{UiEvent, UiRuntime};
use crate::settings::AppSettings;

use super::plugin::{Plugin, PluginParams, PluginTemplate, DEFAULT_SCOPE};
use super::provisioner::PluginProvisioner;
use super::retention;
use super::session::Session;
use super::state::SharedStore;

/// Addresses one plugin entry for manual removal.
#[derive(Debug, Clone)]
pub struct PluginRef {
    pub id: String,
    pub scope_key: String,
}

pub struct Reconciler {
    api: Arc<dyn EngineApi>,
    provisioner: PluginProvisioner,
    store: SharedStore,
    runtime: Arc<dyn UiRuntime>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl Reconciler {
    pub fn new(
        api: Arc<dyn EngineApi>,
        store: SharedStore,
        runtime: Arc<dyn UiRuntime>,
    ) -> Arc<Self> {
        Arc::new(Self {
            provisioner: PluginProvisioner::new(Arc::clone(&api)),
            api,
            store,
            runtime,
            tasks: Mutex::new(Vec::new()),
            subscription: Mutex::new(None),
        })
    }

    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    /// Bootstrap from the snapshot, then follow the push stream.
    ///
    /// Snapshot entries are synthesized into added-events and handled
    /// identically to live ones.
    pub async fn init(self: &Arc<Self>, settings: &AppSettings) -> Result<()> {
        let version = self.api.api_version().await?;
        {
            let mut store = self.store.write();
            store.api_version = version;
            store.switch_to_new_session = settings.switch_to_new_session;
            store.retained_sessions = settings.retained_sessions;
            for template in &settings.default_plugins {
                store
                    .default_plugins
                    .insert(template.id(), template.clone());
            }
        }

        let snapshot = self.api.list_sessions().await?;
        tracing::info!(sessions = snapshot.len(), "bootstrapping from snapshot");
        for entry in snapshot {
            self.handle_added(entry.id);
        }

        let mut events = self.api.subscribe().await?;
        let this = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                match event.kind {
                    EngineEventKind::Added => this.handle_added(event.session_id),
                    EngineEventKind::Removed => this.handle_removed(event.session_id),
                    EngineEventKind::Other(kind) => {
                        tracing::debug!(
                            kind,
                            session_id = event.session_id,
                            "ignoring unrecognized session event"
                        );
                    }
                }
            }
            tracing::debug!("session event stream closed");
        });
        *self.subscription.lock() = Some(task);
        Ok(())
    }

    /// A new session: insert it (and its unprovisioned default plugin
    /// clones) before any credential work starts, so it is selectable
    /// immediately.
    fn handle_added(self: &Arc<Self>, session_id: i32) {
        tracing::info!(session_id, "session created");
        let mut session = Session::new(session_id);
        let unique_key = session.unique_key().to_string();

        let clones: Vec<(String, String)> = {
            let mut store = self.store.write();
            let templates: Vec<PluginTemplate> =
                store.default_plugins.values().cloned().collect();
            let mut clones = Vec::new();
            for template in templates {
                let plugin = template.instantiate(&unique_key);
                clones.push((plugin.id(), plugin.url.clone()));
                session.plugins.insert(plugin.id(), plugin);
            }
            store.sessions.insert(unique_key.clone(), session);
            if store.switch_to_new_session {
                store.select_session(&unique_key);
            }
            clones
        };
        self.runtime.emit(UiEvent::SessionAdded {
            unique_key: unique_key.clone(),
            session_id,
        });

        for (plugin_id, url) in clones {
            self.spawn_provision(unique_key.clone(), plugin_id, url, session_id);
        }
    }

    /// A removed session: deactivate every active session carrying the
    /// engine id (ids repeat across engine restarts, so more than one local
    /// session can match), revoke its plugin credentials, then let the
    /// retention policy sweep the map.
    fn handle_removed(self: &Arc<Self>, session_id: i32) {
        tracing::info!(session_id, "session removed");
        let (revokes, deactivated, pruned) = {
            let mut store = self.store.write();
            let mut revokes: Vec<(String, String)> = Vec::new();
            let mut deactivated: Vec<String> = Vec::new();

            let keys: Vec<String> = store.sessions.keys().cloned().collect();
            for key in keys {
                let Some(session) = store.sessions.get_mut(&key) else {
                    continue;
                };
                if session.id != session_id || !session.active {
                    continue;
                }
                session.active = false;
                deactivated.push(key.clone());
                for plugin in session.plugins.values() {
                    if let Some(token) = plugin.api_token() {
                        revokes.push((plugin.id(), token.to_string()));
                    }
                }
            }

            let keep = store.retained_sessions;
            let pruned = retention::prune_inactive(&mut store.sessions, keep);
            (revokes, deactivated, pruned)
        };

        for unique_key in deactivated {
            self.runtime.emit(UiEvent::SessionUpdated { unique_key });
        }
        if !pruned.is_empty() {
            self.runtime
                .emit(UiEvent::SessionsPruned { unique_keys: pruned });
        }
        for (plugin_id, token) in revokes {
            self.spawn_revoke(plugin_id, token);
        }
    }

    fn spawn_provision(
        self: &Arc<Self>,
        unique_key: String,
        plugin_id: String,
        url: String,
        session_id: i32,
    ) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let outcome = this.provisioner.grant(&plugin_id, &url).await;

            let mut orphaned_token = None;
            {
                let mut store = this.store.write();
                let api_url = store.api_url();
                match store
                    .sessions
                    .get_mut(&unique_key)
                    .and_then(|session| session.plugins.get_mut(&plugin_id))
                {
                    Some(plugin) => match outcome {
                        Ok(api_token) => plugin.mark_ready(PluginParams {
                            api_url,
                            api_token,
                            session_id,
                        }),
                        Err(e) => {
                            tracing::warn!(
                                plugin = %plugin_id,
                                error = %e,
                                "plugin credential grant failed"
                            );
                            plugin.mark_failed(e.to_string());
                        }
                    },
                    None => {
                        // session pruned while the grant was in flight
                        if let Ok(token) = outcome {
                            orphaned_token = Some(token);
                        }
                    }
                }
            }
            if let Some(token) = orphaned_token {
                if let Err(e) = this.provisioner.revoke(&plugin_id, &token).await {
                    tracing::warn!(plugin = %plugin_id, error = %e, "orphaned credential revoke failed");
                }
            }
            this.runtime.emit(UiEvent::PluginUpdated {
                unique_key,
                plugin_id,
            });
        });
        self.tasks.lock().push(handle);
    }

    fn spawn_revoke(self: &Arc<Self>, plugin_id: String, api_token: String) {
        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            if let Err(e) = this.provisioner.revoke(&plugin_id, &api_token).await {
                tracing::warn!(plugin = %plugin_id, error = %e, "plugin credential revoke failed");
            }
        });
        self.tasks.lock().push(handle);
    }

    /// Register a plugin by hand, either as a default template or on a live
    /// session (provisioned like any clone).
    pub fn add_plugin(self: &Arc<Self>, scope_key: &str, name: &str, url: &str) {
        if scope_key == DEFAULT_SCOPE {
            let template = PluginTemplate {
                name: name.to_string(),
                url: url.to_string(),
            };
            let plugin_id = template.id();
            self.store
                .write()
                .default_plugins
                .insert(plugin_id.clone(), template);
            self.runtime.emit(UiEvent::PluginUpdated {
                unique_key: DEFAULT_SCOPE.to_string(),
                plugin_id,
            });
            return;
        }

        let attached = {
            let mut store = self.store.write();
            let Some(session) = store.sessions.get_mut(scope_key) else {
                tracing::warn!(scope_key, "add_plugin for unknown session");
                return;
            };
            let plugin = Plugin::new(name, url, scope_key);
            let plugin_id = plugin.id();
            let session_id = session.id;
            session.plugins.insert(plugin_id.clone(), plugin);
            (plugin_id, session_id)
        };

        let (plugin_id, session_id) = attached;
        self.runtime.emit(UiEvent::PluginUpdated {
            unique_key: scope_key.to_string(),
            plugin_id: plugin_id.clone(),
        });
        self.spawn_provision(
            scope_key.to_string(),
            plugin_id,
            url.to_string(),
            session_id,
        );
    }

    /// Remove plugin entries; session-scoped entries holding a credential
    /// are revoked first.
    pub fn remove_plugins(self: &Arc<Self>, refs: &[PluginRef]) {
        for r in refs {
            let revoke = {
                let mut store = self.store.write();
                if r.scope_key == DEFAULT_SCOPE {
                    store.default_plugins.remove(&r.id);
                    None
                } else if let Some(session) = store.sessions.get_mut(&r.scope_key) {
                    session
                        .plugins
                        .remove(&r.id)
                        .and_then(|plugin| plugin.api_token().map(|t| (r.id.clone(), t.to_string())))
                } else {
                    None
                }
            };
            self.runtime.emit(UiEvent::PluginUpdated {
                unique_key: r.scope_key.clone(),
                plugin_id: r.id.clone(),
            });
            if let Some((plugin_id, token)) = revoke {
                self.spawn_revoke(plugin_id, token);
            }
        }
    }

    /// Tear down: drop the subscription, then revoke every live credential.
    /// Every revocation is attempted; failures are logged and swallowed.
    pub async fn dispose(&self) {
        if let Some(task) = self.subscription.lock().take() {
            task.abort();
        }

        let revokes: Vec<(String, String)> = {
            let store = self.store.read();
            store
                .sessions
                .values()
                .flat_map(|session| session.plugins.values())
                .filter_map(|plugin| {
                    plugin
                        .api_token()
                        .map(|token| (plugin.id(), token.to_string()))
                })
                .collect()
        };

        for (plugin_id, token) in revokes {
            if let Err(e) = self.provisioner.revoke(&plugin_id, &token).await {
                tracing::warn!(plugin = %plugin_id, error = %e, "revoke during teardown failed");
            }
        }
        self.wait_idle().await;
    }

    /// Wait for all spawned provisioning/revocation tasks to finish.
    pub async fn wait_idle(&self) {
        loop {
            let handles: Vec<JoinHandle<()>> = {
                let mut tasks = self.tasks.lock();
                tasks.drain(..).collect()
            };
            if handles.is_empty() {
                return;
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::api::testing::FakeEngineApi;
    use crate::api::SessionRef;
    use crate::runtime::NoopRuntime;
    use crate::store::plugin::PluginState;
    use crate::store::state::SessionStore;

    fn template(name: &str) -> PluginTemplate {
        PluginTemplate {
            name: name.to_string(),
            url: format!("https://plugins.example.com/{name}"),
        }
    }

    fn settings(templates: Vec<PluginTemplate>, retained: i64) -> AppSettings {
        AppSettings {
            default_plugins: templates,
            switch_to_new_session: true,
            retained_sessions: retained,
        }
    }

    async fn connect(
        api: &Arc<FakeEngineApi>,
        settings: &AppSettings,
    ) -> Arc<Reconciler> {
        let store = Arc::new(parking_lot::RwLock::new(SessionStore::new()));
        let reconciler = Reconciler::new(api.clone(), store, Arc::new(NoopRuntime));
        reconciler.init(settings).await.unwrap();
        reconciler
    }

    /// Poll until the store satisfies `predicate` (the event loop runs on
    /// its own task).
    async fn wait_for(
        reconciler: &Arc<Reconciler>,
        predicate: impl Fn(&SessionStore) -> bool,
    ) {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if predicate(&reconciler.store.read()) {
                return;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("store never reached expected state");
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    fn session_ids(store: &SessionStore) -> Vec<i32> {
        store.sessions.values().map(|s| s.id).collect()
    }

    #[tokio::test]
    async fn snapshot_entries_become_sessions() {
        let api = FakeEngineApi::new();
        *api.snapshot.lock() = vec![SessionRef { id: 1 }, SessionRef { id: 2 }];
        let reconciler = connect(&api, &settings(vec![], 1)).await;

        let store = reconciler.store();
        let store = store.read();
        assert_eq!(session_ids(&store), [1, 2]);
        assert!(store.sessions.values().all(|s| s.active));
        assert_eq!(store.api_version, "1.2.3");
    }

    #[tokio::test]
    async fn added_session_is_visible_before_provisioning_finishes() {
        let api = FakeEngineApi::new();
        *api.grant_delay.lock() = Some(Duration::from_millis(100));
        let reconciler = connect(&api, &settings(vec![template("overlay")], 1)).await;

        api.push_added(5);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;

        {
            let store = reconciler.store.read();
            let session = store.sessions.first().unwrap();
            assert_eq!(session.plugins.len(), 1);
            let plugin = session.plugins.first().unwrap();
            assert_eq!(plugin.state, PluginState::Provisioning);
        }

        reconciler.wait_idle().await;
        let store = reconciler.store.read();
        let plugin = store.sessions.first().unwrap().plugins.first().unwrap();
        assert!(matches!(plugin.state, PluginState::Ready { .. }));
    }

    #[tokio::test]
    async fn one_failed_grant_does_not_poison_siblings() {
        let api = FakeEngineApi::new();
        api.fail_grants_for
            .lock()
            .insert("https://plugins.example.com/map".to_string());
        let templates = vec![template("overlay"), template("map"), template("dps")];
        let reconciler = connect(&api, &settings(templates, 1)).await;

        api.push_added(9);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;
        reconciler.wait_idle().await;

        let store = reconciler.store.read();
        let session = store.sessions.first().unwrap();
        assert_eq!(session.plugins.len(), 3);

        let ready = session
            .plugins
            .values()
            .filter(|p| matches!(p.state, PluginState::Ready { .. }))
            .count();
        let failed: Vec<&Plugin> = session
            .plugins
            .values()
            .filter(|p| matches!(p.state, PluginState::Failed { .. }))
            .collect();
        assert_eq!(ready, 2);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].name, "map");
    }

    #[tokio::test]
    async fn retention_keeps_newest_inactive_sessions() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![], 2)).await;

        for id in 1..=4 {
            api.push_added(id);
            wait_for(&reconciler, move |store| {
                store.sessions.len() == id as usize
            })
            .await;
            // keep unique keys distinct for ids and start times alike
            tokio::time::sleep(Duration::from_millis(2)).await;
        }

        // removal arrival order is irrelevant to the outcome
        for id in [2, 3, 1] {
            api.push_removed(id);
        }
        wait_for(&reconciler, |store| store.sessions.len() == 3).await;

        let store = reconciler.store.read();
        assert_eq!(session_ids(&store), [2, 3, 4]);
        assert!(store.sessions.values().last().unwrap().active);
        assert!(store
            .sessions
            .values()
            .take(2)
            .all(|session| !session.active));
    }

    #[tokio::test]
    async fn negative_retention_accumulates_inactive_sessions() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![], -1)).await;

        for id in 1..=3 {
            api.push_added(id);
            wait_for(&reconciler, move |store| {
                store.sessions.len() == id as usize
            })
            .await;
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
        for id in 1..=3 {
            api.push_removed(id);
        }
        wait_for(&reconciler, |store| {
            store.sessions.values().all(|s| !s.active)
        })
        .await;

        assert_eq!(reconciler.store.read().sessions.len(), 3);
    }

    #[tokio::test]
    async fn zero_retention_discards_on_removal_and_revokes() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![template("overlay")], 0)).await;

        api.push_added(1);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;
        reconciler.wait_idle().await;

        let token = {
            let store = reconciler.store.read();
            let plugin = store.sessions.first().unwrap().plugins.first().unwrap();
            plugin.api_token().unwrap().to_string()
        };

        api.push_removed(1);
        wait_for(&reconciler, |store| store.sessions.is_empty()).await;
        reconciler.wait_idle().await;

        assert_eq!(api.revoked.lock().as_slice(), [token]);
    }

    #[tokio::test]
    async fn removal_deactivates_every_session_sharing_the_id() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![], -1)).await;

        api.push_added(7);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        api.push_added(7);
        wait_for(&reconciler, |store| store.sessions.len() == 2).await;

        api.push_removed(7);
        wait_for(&reconciler, |store| {
            store.sessions.values().all(|s| !s.active)
        })
        .await;
        assert_eq!(reconciler.store.read().sessions.len(), 2);
    }

    #[tokio::test]
    async fn unrecognized_event_kinds_are_ignored() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![], 1)).await;

        api.push_event(3, EngineEventKind::Other("Renamed".into()));
        api.push_added(3);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;

        assert_eq!(session_ids(&reconciler.store.read()), [3]);
    }

    #[tokio::test]
    async fn new_session_becomes_selection_when_enabled() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![], -1)).await;

        api.push_added(1);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        api.push_added(2);
        wait_for(&reconciler, |store| store.sessions.len() == 2).await;

        let store = reconciler.store.read();
        assert_eq!(store.selected_session().unwrap().id, 2);
    }

    #[tokio::test]
    async fn dispose_revokes_every_live_credential() {
        let api = FakeEngineApi::new();
        let templates = vec![template("overlay"), template("map")];
        let reconciler = connect(&api, &settings(templates, -1)).await;

        api.push_added(1);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        api.push_added(2);
        wait_for(&reconciler, |store| store.sessions.len() == 2).await;
        reconciler.wait_idle().await;

        // one revoke fails; the others must still be attempted
        api.fail_revokes_for
            .lock()
            .insert("plugin-token-0".to_string());

        reconciler.dispose().await;

        let attempts = api
            .ops
            .lock()
            .iter()
            .filter(|op| op.starts_with("revoke"))
            .count();
        assert_eq!(attempts, 4);
        assert_eq!(api.revoked.lock().len(), 3);
    }

    #[tokio::test]
    async fn manual_plugin_ops_update_defaults_and_sessions() {
        let api = FakeEngineApi::new();
        let reconciler = connect(&api, &settings(vec![], -1)).await;

        reconciler.add_plugin(DEFAULT_SCOPE, "overlay", "https://plugins.example.com/overlay");
        assert_eq!(reconciler.store.read().default_plugins.len(), 1);

        api.push_added(4);
        wait_for(&reconciler, |store| store.sessions.len() == 1).await;
        let key = {
            let store = reconciler.store.read();
            store.sessions.first().unwrap().unique_key().to_string()
        };

        reconciler.add_plugin(&key, "dps", "https://plugins.example.com/dps");
        reconciler.wait_idle().await;

        let plugin_id = {
            let store = reconciler.store.read();
            let session = store.sessions.first().unwrap();
            assert_eq!(session.plugins.len(), 1);
            let plugin = session.plugins.first().unwrap();
            assert!(matches!(plugin.state, PluginState::Ready { .. }));
            plugin.id()
        };

        reconciler.remove_plugins(&[PluginRef {
            id: plugin_id,
            scope_key: key,
        }]);
        reconciler.wait_idle().await;

        let store = reconciler.store.read();
        assert!(store.sessions.first().unwrap().plugins.is_empty());
        assert_eq!(api.revoked.lock().len(), 1);
    }
}
