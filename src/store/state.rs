//! The authoritative session/plugin map plus everything derived from it.
//!
//! Mutation goes through the reconciler; reads recompute their answers from
//! the current map on every call, so there is no cached derived state to
//! fall out of sync.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::Serialize;

use super::ordered::OrderedMap;
use super::plugin::{Plugin, PluginTemplate};
use super::session::Session;

/// Navigation target for the settings pane.
pub const NAV_SETTINGS: &str = "nav-settings";

pub type SharedStore = Arc<RwLock<SessionStore>>;

pub struct SessionStore {
    /// Sessions keyed by unique key, in insertion order.
    pub sessions: OrderedMap<Session>,
    /// Default plugin templates, cloned into every new session.
    pub default_plugins: OrderedMap<PluginTemplate>,
    pub api_port: u16,
    pub api_version: String,
    /// Make a newly observed session the active selection.
    pub switch_to_new_session: bool,
    /// Retention count: negative keeps everything, zero discards inactive
    /// sessions immediately, positive keeps that many most-recent inactive.
    pub retained_sessions: i64,
    session_sel: Option<String>,
    nav_sel: Option<String>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: OrderedMap::new(),
            default_plugins: OrderedMap::new(),
            api_port: 0,
            api_version: String::new(),
            switch_to_new_session: true,
            retained_sessions: 1,
            session_sel: None,
            nav_sel: None,
        }
    }

    pub fn api_url(&self) -> String {
        format!("http://localhost:{}/query", self.api_port)
    }

    pub fn select_session(&mut self, unique_key: &str) {
        self.session_sel = Some(unique_key.to_string());
    }

    pub fn select_nav(&mut self, nav: &str) {
        self.nav_sel = Some(nav.to_string());
    }

    /// The session the window shows: the explicit selection while it still
    /// exists, else the first session by insertion order.
    pub fn selected_session(&self) -> Option<&Session> {
        if let Some(sel) = &self.session_sel {
            if let Some(session) = self.sessions.get(sel) {
                return Some(session);
            }
        }
        self.sessions.first()
    }

    pub fn selected_session_plugins(&self) -> Option<Vec<&Plugin>> {
        self.selected_session()
            .map(|session| session.plugins.values().collect())
    }

    /// Navigation target: explicit settings choice wins; otherwise stay on
    /// a plugin of the selected session if that is where we already are,
    /// else its first plugin; sessions without plugins land on settings.
    pub fn selected_nav(&self) -> String {
        if self.nav_sel.as_deref() == Some(NAV_SETTINGS) {
            return NAV_SETTINGS.to_string();
        }
        if let Some(session) = self.selected_session() {
            if !session.plugins.is_empty() {
                let scope_prefix = format!("plugin-{}", session.unique_key());
                if let Some(nav) = &self.nav_sel {
                    if nav.starts_with(&scope_prefix) {
                        return nav.clone();
                    }
                }
                if let Some(first) = session.plugins.first() {
                    return first.id();
                }
            }
        }
        NAV_SETTINGS.to_string()
    }

    /// Tree the window renders: one node per session with its plugins as
    /// children, plus a trailing node for the defaults registry.
    pub fn plugins_tree(&self) -> Vec<TreeNode> {
        let mut tree: Vec<TreeNode> = self
            .sessions
            .iter()
            .map(|(unique_key, session)| TreeNode {
                id: unique_key.clone(),
                name: session.display_name(),
                icon: None,
                children: session
                    .plugins
                    .values()
                    .map(|plugin| TreeNode {
                        id: plugin.id(),
                        name: format!("{} - {}", plugin.name, plugin.url),
                        icon: plugin.icon.clone(),
                        children: Vec::new(),
                    })
                    .collect(),
            })
            .collect();

        tree.push(TreeNode {
            id: super::plugin::DEFAULT_SCOPE.to_string(),
            name: "Default Plugins".to_string(),
            icon: None,
            children: self
                .default_plugins
                .values()
                .map(|template| TreeNode {
                    id: template.id(),
                    name: format!("{} - {}", template.name, template.url),
                    icon: None,
                    children: Vec::new(),
                })
                .collect(),
        });
        tree
    }

    pub fn display_retained_sessions(&self) -> String {
        if self.retained_sessions < 0 {
            "infinite".to_string()
        } else {
            self.retained_sessions.to_string()
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeNode {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub children: Vec<TreeNode>,
}
