//! In-memory mirror of the engine's session state.
//!
//! The [`reconciler::Reconciler`] owns all mutation: it bootstraps from a
//! snapshot, applies the push event stream, drives per-plugin credential
//! provisioning, and prunes inactive sessions through the retention policy.
//! Everything derived (selection, navigation, the tree the window renders)
//! is recomputed on read from the current map.

pub mod ordered;
pub mod plugin;
pub mod provisioner;
pub mod reconciler;
pub mod retention;
pub mod session;
pub mod state;

pub use ordered::OrderedMap;
pub use plugin::{Plugin, PluginParams, PluginState, PluginTemplate, DEFAULT_SCOPE};
pub use provisioner::PluginProvisioner;
pub use reconciler::{PluginRef, Reconciler};
pub use session::Session;
pub use state::{SessionStore, SharedStore, TreeNode, NAV_SETTINGS};
