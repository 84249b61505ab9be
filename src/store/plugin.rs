use serde::{Deserialize, Serialize};

/// Scope key used for the defaults registry, where templates live without
/// an owning session.
pub const DEFAULT_SCOPE: &str = "default";

/// A named, URL-addressed capability with no runtime credential. Templates
/// are cloned into every newly observed session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginTemplate {
    pub name: String,
    pub url: String,
}

impl PluginTemplate {
    pub fn id(&self) -> String {
        format!("plugin-{DEFAULT_SCOPE}-{}", self.name)
    }

    /// Clone this template into a session's scope. The instance starts out
    /// unprovisioned.
    pub fn instantiate(&self, scope_key: &str) -> Plugin {
        Plugin::new(&self.name, &self.url, scope_key)
    }
}

/// Connection parameters handed to a provisioned plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParams {
    pub api_url: String,
    pub api_token: String,
    pub session_id: i32,
}

/// Provisioning lifecycle of one plugin instance. A failed grant marks the
/// instance without affecting its siblings or the owning session; retrying
/// is a manual operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum PluginState {
    Provisioning,
    Ready { params: PluginParams },
    Failed { message: String },
}

/// A capability attached to one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plugin {
    pub name: String,
    pub url: String,
    pub icon: Option<String>,
    pub state: PluginState,
    scope_key: String,
}

impl Plugin {
    pub fn new(name: &str, url: &str, scope_key: &str) -> Self {
        Self {
            name: name.to_string(),
            url: url.to_string(),
            icon: None,
            state: PluginState::Provisioning,
            scope_key: scope_key.to_string(),
        }
    }

    /// Composite id, unique within the owning map: the scope key separates
    /// sessions, the name separates plugins within one session.
    pub fn id(&self) -> String {
        format!("plugin-{}-{}", self.scope_key, self.name)
    }

    pub fn scope_key(&self) -> &str {
        &self.scope_key
    }

    pub fn api_token(&self) -> Option<&str> {
        match &self.state {
            PluginState::Ready { params } => Some(&params.api_token),
            _ => None,
        }
    }

    pub fn mark_ready(&mut self, params: PluginParams) {
        self.state = PluginState::Ready { params };
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.state = PluginState::Failed {
            message: message.into(),
        };
    }

    pub fn set_icon(&mut self, icon: Option<String>) {
        self.icon = icon;
    }
}
