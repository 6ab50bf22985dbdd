use std::path::PathBuf;
use std::time::Duration;

use log::{debug, info};
use serde::Deserialize;

use crate::viewer::ScrollUpPolicy;

// ---------------------------------------------------------------------------
// ConfigFile — deserialized from TOML (all fields optional)
// ---------------------------------------------------------------------------

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub zoom: Option<f64>,
    #[serde(default)]
    pub viewer: ViewerConfigFile,
    #[serde(default)]
    pub sync: SyncConfigFile,
    #[serde(default)]
    pub render: RenderConfigFile,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct ViewerConfigFile {
    pub scroll_step: Option<u32>,
    pub scroll_up: Option<ScrollUpPolicy>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct SyncConfigFile {
    pub socket: Option<PathBuf>,
    pub program: Option<String>,
    pub read_timeout_ms: Option<u64>,
    pub max_request_bytes: Option<usize>,
}

#[derive(Default, Deserialize)]
#[serde(default)]
pub struct RenderConfigFile {
    pub pdfinfo: Option<String>,
    pub pdftoppm: Option<String>,
}

// ---------------------------------------------------------------------------
// Config — resolved (all fields concrete)
// ---------------------------------------------------------------------------

pub struct Config {
    pub zoom: f64,
    pub viewer: ViewerConfig,
    pub sync: SyncConfig,
    pub render: RenderConfig,
}

pub struct ViewerConfig {
    pub scroll_step: u32,
    pub scroll_up: ScrollUpPolicy,
}

pub struct SyncConfig {
    pub socket: PathBuf,
    pub program: String,
    pub read_timeout: Duration,
    pub max_request_bytes: usize,
}

pub struct RenderConfig {
    pub pdfinfo: String,
    pub pdftoppm: String,
}

impl ConfigFile {
    /// Merge CLI values (overwrites non-None fields).
    pub fn merge_cli(&mut self, zoom: Option<f64>, socket: Option<PathBuf>) {
        if let Some(v) = zoom {
            debug!("config: CLI override zoom={v}");
            self.zoom = zoom;
        }
        if let Some(ref v) = socket {
            debug!("config: CLI override socket={}", v.display());
            self.sync.socket = socket;
        }
    }

    /// Resolve to a Config by applying defaults to missing fields.
    ///
    /// Fails on values no viewer could work with (non-positive zoom).
    pub fn resolve(self) -> anyhow::Result<Config> {
        let zoom = self.zoom.unwrap_or(1.5);
        if !(zoom.is_finite() && zoom > 0.0) {
            anyhow::bail!("zoom must be a positive number, got {zoom}");
        }
        let config = Config {
            zoom,
            viewer: ViewerConfig {
                scroll_step: self.viewer.scroll_step.unwrap_or(40),
                scroll_up: self.viewer.scroll_up.unwrap_or_default(),
            },
            sync: SyncConfig {
                socket: self.sync.socket.unwrap_or_else(default_socket_path),
                program: self.sync.program.unwrap_or_else(|| "synctex".into()),
                read_timeout: Duration::from_millis(self.sync.read_timeout_ms.unwrap_or(500)),
                max_request_bytes: self.sync.max_request_bytes.unwrap_or(4096),
            },
            render: RenderConfig {
                pdfinfo: self.render.pdfinfo.unwrap_or_else(|| "pdfinfo".into()),
                pdftoppm: self.render.pdftoppm.unwrap_or_else(|| "pdftoppm".into()),
            },
        };
        info!(
            "config: resolved zoom={}, scroll_step={}, scroll_up={:?}, socket={}, \
             sync_program={}, read_timeout={}ms, max_request_bytes={}, \
             pdfinfo={}, pdftoppm={}",
            config.zoom,
            config.viewer.scroll_step,
            config.viewer.scroll_up,
            config.sync.socket.display(),
            config.sync.program,
            config.sync.read_timeout.as_millis(),
            config.sync.max_request_bytes,
            config.render.pdfinfo,
            config.render.pdftoppm,
        );
        Ok(config)
    }
}

/// `$XDG_RUNTIME_DIR/syncview.sock`, else a per-user name in the temp dir.
pub fn default_socket_path() -> PathBuf {
    match std::env::var_os("XDG_RUNTIME_DIR") {
        Some(dir) if !dir.is_empty() => PathBuf::from(dir).join("syncview.sock"),
        _ => {
            // SAFETY: getuid has no preconditions and cannot fail.
            let uid = unsafe { libc::getuid() };
            std::env::temp_dir().join(format!("syncview-{uid}.sock"))
        }
    }
}

/// Resolve the XDG config path for syncview.
fn config_path() -> Option<PathBuf> {
    let config_dir = std::env::var_os("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var_os("HOME").map(|h| PathBuf::from(h).join(".config"))
        })?;
    Some(config_dir.join("syncview").join("config.toml"))
}

/// Load config file. Returns `ConfigFile::default()` if no file exists.
/// Returns an error if the file exists but cannot be parsed.
pub fn load_config() -> anyhow::Result<ConfigFile> {
    let path = match config_path() {
        Some(p) => p,
        None => {
            info!("config: no HOME or XDG_CONFIG_HOME set, using defaults");
            return Ok(ConfigFile::default());
        }
    };
    debug!("config: looking for {}", path.display());
    match std::fs::read_to_string(&path) {
        Ok(text) => {
            info!("config: loaded from {}", path.display());
            let cfg: ConfigFile = toml::from_str(&text)
                .map_err(|e| anyhow::anyhow!("failed to parse {}: {e}", path.display()))?;
            Ok(cfg)
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("config: {} not found, using defaults", path.display());
            Ok(ConfigFile::default())
        }
        Err(e) => Err(anyhow::anyhow!("failed to read {}: {e}", path.display())),
    }
}
