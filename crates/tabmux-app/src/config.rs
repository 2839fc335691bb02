//! `config.toml` loading.

use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tabmux_pty::ShellSpec;
use tabmux_vt::{CellMetrics, Viewport};

/// Which process layer tabs run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BackendChoice {
    /// Native PTYs; tabs whose shell cannot start run commands one-shot.
    #[default]
    Auto,
    /// Native PTYs only; failing to start the first shell is an error.
    Native,
    /// No PTYs at all.
    Fallback,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub backend: BackendChoice,
    pub shell: ShellConfig,
    pub surface: SurfaceConfig,
    pub window: WindowConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ShellConfig {
    /// Falls back to $SHELL, then /bin/sh.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub program: Option<String>,
    pub args: Vec<String>,
    pub term: String,
    /// Falls back to the home directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SurfaceConfig {
    /// Cell size in pixels.
    pub cell_width: u32,
    pub cell_height: u32,
    pub scrollback: usize,
}

/// Initial container size in pixels.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WindowConfig {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// `EnvFilter` directive, e.g. "info" or "tabmux_pty=debug".
    pub level: String,
}

impl Default for ShellConfig {
    fn default() -> Self {
        let spec = ShellSpec::default();
        Self {
            program: spec.program,
            args: spec.args,
            term: spec.term,
            working_dir: spec.working_dir,
        }
    }
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        let metrics = CellMetrics::default();
        Self {
            cell_width: metrics.width,
            cell_height: metrics.height,
            scrollback: 10_000,
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: 720,
            height: 432,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

impl ShellConfig {
    pub fn to_spec(&self) -> ShellSpec {
        ShellSpec {
            program: self.program.clone(),
            args: self.args.clone(),
            term: self.term.clone(),
            working_dir: self.working_dir.clone(),
        }
    }
}

impl SurfaceConfig {
    pub fn metrics(&self) -> CellMetrics {
        CellMetrics::new(self.cell_width, self.cell_height)
    }
}

impl WindowConfig {
    pub fn viewport(&self) -> Viewport {
        Viewport::new(self.width, self.height)
    }
}

/// Returns the config file path: ~/.config/tabmux/config.toml
pub fn default_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("tabmux")
        .join("config.toml")
}

/// Load the configuration.
///
/// An explicit path must exist. The default path is optional; without it the
/// defaults apply and no path is returned.
pub fn load(explicit: Option<&Path>) -> anyhow::Result<(Config, Option<PathBuf>)> {
    if let Some(path) = explicit {
        let config = load_from(path)?;
        return Ok((config, Some(path.to_path_buf())));
    }

    let path = default_path();
    if path.exists() {
        let config = load_from(&path)?;
        Ok((config, Some(path)))
    } else {
        Ok((Config::default(), None))
    }
}

fn load_from(path: &Path) -> anyhow::Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("invalid config file {}", path.display()))
}
