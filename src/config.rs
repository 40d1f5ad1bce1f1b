use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_RESOLUTION: &str = "110m";
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_OUTPUT_DPI: u32 = 100;

/// Application settings, read from an optional TOML file.
///
/// Everything has a default so an empty file (or no file) is valid.
#[derive(Debug, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Where downloaded geometry sources are kept.
    pub cache_dir: PathBuf,
    /// Extra directory searched for `<key>.yaml` before the built-in geographies.
    pub config_dir: Option<PathBuf>,
    /// Resolution used when a geography does not name one.
    pub default_resolution: String,
    pub http_timeout_secs: u64,
    /// Pixels per figure inch for raster output.
    pub output_dpi: u32,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            config_dir: None,
            default_resolution: DEFAULT_RESOLUTION.to_string(),
            http_timeout_secs: DEFAULT_HTTP_TIMEOUT_SECS,
            output_dpi: DEFAULT_OUTPUT_DPI,
        }
    }
}

impl Settings {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {:?}", path))?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings =
            toml::from_str(content).with_context(|| "Failed to parse TOML settings")?;
        Ok(settings)
    }

    /// Loads `path` if given, otherwise returns the defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load_from_file(p),
            None => Ok(Self::default()),
        }
    }
}

/// `~/.cache/clayplot`, or `./.clayplot-cache` when no cache directory is known.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .map(|d| d.join("clayplot"))
        .unwrap_or_else(|| PathBuf::from(".clayplot-cache"))
}
