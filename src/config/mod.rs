//! Startup configuration for the engine process.
//!
//! The engine reads an ordered TOML file at boot. Its parser is
//! order-sensitive for sectioned tables, so the file is rendered by hand in
//! a fixed declaration order rather than through a serializer: scalar keys
//! first, then `[maps]`, then `[adapters.hook]`. The exact key names are a
//! compatibility contract with the engine.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::error::{CoredeckError, Result};

/// Process name the hook adapter attaches to.
const HOOK_TARGET_PROCESS: &str = "ffxiv_dx11.exe";

/// Filesystem layout handed to the supervisor: where the engine binary
/// lives, where its config and logs go, and which directories it is told
/// about.
#[derive(Debug, Clone)]
pub struct CorePaths {
    pub config_path: PathBuf,
    pub out_log: PathBuf,
    pub err_log: PathBuf,
    pub datasheets_dir: PathBuf,
    pub map_cache_dir: PathBuf,
    pub hook_dll: PathBuf,
    pub core_bin: PathBuf,
    pub terminator_bin: PathBuf,
}

impl CorePaths {
    /// Lay out paths under explicit user-data, logs, and resources roots.
    pub fn new(user_data: &Path, logs_dir: &Path, resources_dir: &Path) -> Self {
        let bin_dir = resources_dir.join("bin");
        let core_bin = if cfg!(windows) { "core.exe" } else { "core" };
        Self {
            config_path: user_data.join("core-config.toml"),
            out_log: logs_dir.join("core.out.log"),
            err_log: logs_dir.join("core.err.log"),
            datasheets_dir: resources_dir.join("datasheets"),
            map_cache_dir: resources_dir.join("maps"),
            hook_dll: bin_dir.join("xivhook.dll"),
            core_bin: bin_dir.join(core_bin),
            terminator_bin: bin_dir.join("windows-kill.exe"),
        }
    }

    /// Standard layout rooted in the per-user data directory.
    pub fn discover(resources_dir: &Path) -> Self {
        let user_data = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("coredeck");
        let logs_dir = user_data.join("logs");
        Self::new(&user_data, &logs_dir, resources_dir)
    }
}

/// Render and write the engine configuration file.
///
/// Ensures the map cache directory exists first ("already exists" is
/// success, anything else aborts the write). The file itself is replaced
/// wholesale; the engine only reads it after `start` hands it the path.
pub async fn write_config(paths: &CorePaths, api_port: u16, admin_otp: &str) -> Result<PathBuf> {
    ensure_cache_dir(&paths.map_cache_dir)?;

    let mut out = String::new();
    out.push_str(&format!("api_port = {api_port}\n"));
    out.push_str(&format!(
        "data_path = \"{}\"\n",
        unix_path(&paths.datasheets_dir)
    ));
    out.push_str(&format!("admin_otp = \"{admin_otp}\"\n"));
    out.push_str("[maps]\n");
    out.push_str(&format!(
        "cache = \"{}\"\n",
        unix_path(&paths.map_cache_dir)
    ));
    out.push_str("[adapters.hook]\n");
    out.push_str("enabled = true\n");
    out.push_str(&format!("dll_path = \"{}\"\n", unix_path(&paths.hook_dll)));
    out.push_str(&format!("ffxiv_process = \"{HOOK_TARGET_PROCESS}\"\n"));

    tokio::fs::write(&paths.config_path, out).await?;
    tracing::debug!(path = %paths.config_path.display(), "wrote engine config");
    Ok(paths.config_path.clone())
}

fn ensure_cache_dir(dir: &Path) -> Result<()> {
    match std::fs::create_dir(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(()),
        Err(source) => Err(CoredeckError::CacheDir {
            path: dir.to_path_buf(),
            source,
        }),
    }
}

/// The engine expects forward slashes in path values on every platform.
fn unix_path(path: &Path) -> String {
    path.display().to_string().replace('\\', "/")
}
