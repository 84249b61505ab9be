//! Persisted user preferences.
//!
//! Loaded from `~/.coredeck/settings.toml`; a missing file means defaults.
//! Saves are atomic (temp file + rename). Only the fields the sync loop
//! consumes live here: the default plugin registry, the auto-select flag,
//! and the retention count.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::store::plugin::PluginTemplate;

/// Get the path to the global settings file.
pub fn settings_path() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".coredeck")
        .join("settings.toml")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    /// Templates cloned into every newly observed session.
    pub default_plugins: Vec<PluginTemplate>,

    /// Make a newly observed session the active selection.
    pub switch_to_new_session: bool,

    /// Inactive sessions to keep; negative means unlimited.
    pub retained_sessions: i64,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            default_plugins: Vec::new(),
            switch_to_new_session: true,
            retained_sessions: 1,
        }
    }
}

/// Manages settings loading and persistence.
pub struct SettingsManager {
    settings: RwLock<AppSettings>,
    path: PathBuf,
}

impl SettingsManager {
    pub async fn new() -> Result<Self> {
        Self::with_path(settings_path()).await
    }

    pub async fn with_path(path: PathBuf) -> Result<Self> {
        let settings = Self::load_from_path(&path).await?;
        Ok(Self {
            settings: RwLock::new(settings),
            path,
        })
    }

    async fn load_from_path(path: &Path) -> Result<AppSettings> {
        if !path.exists() {
            tracing::debug!("settings file not found at {:?}, using defaults", path);
            return Ok(AppSettings::default());
        }

        let contents = tokio::fs::read_to_string(path)
            .await
            .context("failed to read settings file")?;
        let settings: AppSettings =
            toml::from_str(&contents).context("failed to parse settings file")?;
        validate(&settings)?;

        tracing::info!("loaded settings from {:?}", path);
        Ok(settings)
    }

    pub async fn get(&self) -> AppSettings {
        self.settings.read().await.clone()
    }

    pub async fn update(&self, settings: AppSettings) -> Result<()> {
        validate(&settings)?;
        *self.settings.write().await = settings.clone();
        self.save(&settings).await
    }

    async fn save(&self, settings: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("failed to create settings directory")?;
        }
        let contents =
            toml::to_string_pretty(settings).context("failed to serialize settings")?;
        let tmp = self.path.with_extension("toml.tmp");
        tokio::fs::write(&tmp, &contents)
            .await
            .context("failed to write settings temp file")?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .context("failed to move settings file into place")?;
        Ok(())
    }
}

fn validate(settings: &AppSettings) -> Result<()> {
    for template in &settings.default_plugins {
        let valid = !template.name.is_empty()
            && template
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            bail!(
                "invalid plugin name {:?}: only alphanumerics, '-' and '_' are allowed",
                template.name
            );
        }
    }
    Ok(())
}
