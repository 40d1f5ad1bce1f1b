//! Geometry source resolution: download on cache miss, read from the local
//! cache otherwise, then filter to the layers a geography needs.

use crate::config::Settings;
use crate::data::read_source;
use crate::error::{PlotError, Result};
use crate::geography::{validate_resolution, GeographyConfig};
use crate::types::RegionRecord;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const NATURAL_EARTH_BASE: &str = "https://naturalearth.s3.amazonaws.com";
const USER_AGENT: &str = concat!("clayplot/", env!("CARGO_PKG_VERSION"));

/// Minimal HTTP GET, so tests can serve fixtures without a network.
pub trait HttpClient {
    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, String>;
}

/// Blocking reqwest client.
pub struct ReqwestClient {
    client: reqwest::blocking::Client,
}

impl ReqwestClient {
    pub fn with_timeout(timeout_secs: u64) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| {
                PlotError::DataUnavailable(format!("Failed to create HTTP client: {}", e))
            })?;
        Ok(Self { client })
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> std::result::Result<Vec<u8>, String> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| format!("Request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP {} from {}", response.status(), url));
        }

        response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| format!("Failed to read response: {}", e))
    }
}

/// Natural Earth layers used by a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    Admin1,
    Lakes,
    Countries,
}

impl Layer {
    /// Natural Earth download URL for `resolution`. Countries always use 50m.
    pub fn natural_earth_url(&self, resolution: &str) -> String {
        match self {
            Layer::Admin1 => format!(
                "{}/{}_cultural/ne_{}_admin_1_states_provinces.zip",
                NATURAL_EARTH_BASE, resolution, resolution
            ),
            Layer::Lakes => format!(
                "{}/{}_physical/ne_{}_lakes.zip",
                NATURAL_EARTH_BASE, resolution, resolution
            ),
            Layer::Countries => format!(
                "{}/50m_cultural/ne_50m_admin_0_countries.zip",
                NATURAL_EARTH_BASE
            ),
        }
    }
}

/// Target and neighbouring level-1 regions read from one admin-1 source.
#[derive(Debug, Clone, Default)]
pub struct Level1Layers {
    pub targets: Vec<RegionRecord>,
    pub neighbors: Vec<RegionRecord>,
}

pub struct GeoDataManager {
    cache_dir: PathBuf,
    client: Box<dyn HttpClient>,
    default_resolution: String,
}

impl GeoDataManager {
    /// Creates the cache directory if needed.
    pub fn new(cache_dir: impl Into<PathBuf>, client: Box<dyn HttpClient>) -> Result<Self> {
        let cache_dir = cache_dir.into();
        fs::create_dir_all(&cache_dir)?;
        info!(cache_dir = ?cache_dir, "Using geometry cache directory");
        Ok(Self {
            cache_dir,
            client,
            default_resolution: crate::config::DEFAULT_RESOLUTION.to_string(),
        })
    }

    pub fn from_settings(settings: &Settings) -> Result<Self> {
        validate_resolution(&settings.default_resolution)?;
        let client = ReqwestClient::with_timeout(settings.http_timeout_secs)?;
        Ok(Self::new(&settings.cache_dir, Box::new(client))?
            .with_default_resolution(&settings.default_resolution))
    }

    pub fn with_default_resolution(mut self, resolution: &str) -> Self {
        self.default_resolution = resolution.to_string();
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Local cache path for `url`: `<cache_dir>/<host>/<url path>`.
    pub fn cache_path(&self, url: &str) -> Result<PathBuf> {
        Ok(self.cache_dir.join(cache_key(url)?))
    }

    pub fn is_cached(&self, url: &str) -> bool {
        self.cache_path(url).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Returns the cached file for `url`, downloading it first on a miss.
    pub fn fetch(&self, url: &str) -> Result<PathBuf> {
        let local_path = self.cache_path(url)?;
        if local_path.is_file() {
            info!(path = ?local_path, "Cache hit");
            return Ok(local_path);
        }

        info!(url, path = ?local_path, "Cache miss, downloading");
        let bytes = self.client.get(url).map_err(|e| {
            error!(url, error = %e, "Download failed");
            PlotError::DataUnavailable(format!(
                "Failed to download {} and no cached copy exists: {}",
                url, e
            ))
        })?;

        // Write next to the target and rename so a failed write never
        // leaves a truncated file under the cache name.
        if let Some(parent) = local_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let partial = local_path.with_extension("part");
        if let Err(e) = fs::write(&partial, &bytes).and_then(|_| fs::rename(&partial, &local_path)) {
            if partial.exists() {
                if let Err(rm) = fs::remove_file(&partial) {
                    warn!(path = ?partial, error = %rm, "Could not remove incomplete file");
                }
            }
            return Err(PlotError::Io(e));
        }

        info!(path = ?local_path, bytes = bytes.len(), "Downloaded geometry source");
        Ok(local_path)
    }

    pub fn layer_url(&self, config: &GeographyConfig, layer: Layer) -> Result<String> {
        let hints = &config.data_hints;
        let override_url = match layer {
            Layer::Admin1 => hints.level1_source_url.as_ref(),
            Layer::Lakes => hints.lakes_source_url.as_ref(),
            Layer::Countries => hints.countries_source_url.as_ref(),
        };
        if let Some(url) = override_url {
            return Ok(url.clone());
        }
        let resolution = config.resolution(&self.default_resolution);
        validate_resolution(resolution)?;
        Ok(layer.natural_earth_url(resolution))
    }

    /// Makes sure every source `config` draws from is in the cache.
    pub fn prefetch(&self, config: &GeographyConfig) -> Result<Vec<PathBuf>> {
        let settings = &config.main_map_settings;
        let mut layers = vec![Layer::Admin1];
        if settings.include_lakes || config.inset_level1_regions.iter().any(|i| i.include_lakes) {
            layers.push(Layer::Lakes);
        }
        if settings.include_neighboring_countries {
            layers.push(Layer::Countries);
        }
        layers
            .into_iter()
            .map(|layer| self.fetch(&self.layer_url(config, layer)?))
            .collect()
    }

    /// Downloads (if necessary) and reads one layer, keeping `columns`.
    pub fn load_layer(
        &self,
        config: &GeographyConfig,
        layer: Layer,
        columns: &[String],
    ) -> Result<Vec<RegionRecord>> {
        let url = self.layer_url(config, layer)?;
        let path = self.fetch(&url)?;
        read_source(&path, columns)
    }

    /// Target and neighbouring admin-1 regions from a single read of the source.
    pub fn level1_layers(&self, config: &GeographyConfig) -> Result<Level1Layers> {
        let hints = &config.data_hints;
        let columns = unique_columns(&[
            config.level1_code_column(),
            &hints.level1_code_column,
            &hints.level1_name_column,
            &hints.geo_join_column,
            &hints.country_code_column,
        ]);
        let records = self.load_layer(config, Layer::Admin1, &columns)?;

        let country_col = &hints.country_code_column;
        if !records.is_empty() && !records.iter().any(|r| r.has_attribute(country_col)) {
            return Err(PlotError::config(format!(
                "Country code column '{}' not found in level-1 source",
                country_col
            )));
        }

        let in_set = |record: &RegionRecord, codes: &[String]| {
            record
                .attribute(country_col)
                .map(|c| codes.iter().any(|code| code.eq_ignore_ascii_case(c.trim())))
                .unwrap_or(false)
        };

        let neighbor_codes: Vec<String> = hints
            .neighbor_level1_country_codes
            .iter()
            .filter(|c| !config.country_codes.iter().any(|t| t.eq_ignore_ascii_case(c)))
            .cloned()
            .collect();

        let mut layers = Level1Layers::default();
        for record in records {
            if in_set(&record, &config.country_codes) {
                layers.targets.push(record);
            } else if in_set(&record, &neighbor_codes) {
                layers.neighbors.push(record);
            }
        }

        if layers.targets.is_empty() {
            return Err(PlotError::config(format!(
                "No regions found matching target country codes: {:?}",
                config.country_codes
            )));
        }
        info!(
            targets = layers.targets.len(),
            neighbors = layers.neighbors.len(),
            countries = ?config.country_codes,
            "Filtered level-1 regions"
        );
        Ok(layers)
    }

    /// Level-1 regions of the configured countries.
    pub fn regions(&self, config: &GeographyConfig) -> Result<Vec<RegionRecord>> {
        Ok(self.level1_layers(config)?.targets)
    }

    pub fn neighbor_regions(&self, config: &GeographyConfig) -> Result<Vec<RegionRecord>> {
        Ok(self.level1_layers(config)?.neighbors)
    }

    /// Countries named in `data_hints.neighboring_country_codes`.
    pub fn neighbor_countries(&self, config: &GeographyConfig) -> Result<Vec<RegionRecord>> {
        let hints = &config.data_hints;
        if hints.neighboring_country_codes.is_empty() {
            warn!("No 'neighboring_country_codes' defined in data_hints");
            return Ok(Vec::new());
        }
        let candidates = unique_columns(&[
            &hints.neighboring_country_name_column,
            "ADMIN",
            "NAME",
            "SOVEREIGNT",
            "name_en",
        ]);
        let records = self.load_layer(config, Layer::Countries, &candidates)?;
        Ok(filter_by_name(records, &candidates, &hints.neighboring_country_codes, "countries"))
    }

    /// Lakes whose names are listed in `names`.
    pub fn named_lakes(&self, config: &GeographyConfig, names: &[String]) -> Result<Vec<RegionRecord>> {
        if names.is_empty() {
            info!("'include_lake_names' is empty; no lakes will be plotted");
            return Ok(Vec::new());
        }
        let candidates = unique_columns(&[
            &config.data_hints.lake_name_column,
            "name_en",
            "gn_name",
            "NAME",
        ]);
        let records = self.load_layer(config, Layer::Lakes, &candidates)?;
        Ok(filter_by_name(records, &candidates, names, "lakes"))
    }
}

/// Keeps records whose first available name column is in `names`.
fn filter_by_name(
    records: Vec<RegionRecord>,
    candidates: &[String],
    names: &[String],
    what: &str,
) -> Vec<RegionRecord> {
    let Some(column) = candidates
        .iter()
        .find(|c| records.iter().any(|r| r.has_attribute(c)))
    else {
        warn!(?candidates, "No usable name column in {} source", what);
        return Vec::new();
    };

    let selected: Vec<RegionRecord> = records
        .into_iter()
        .filter(|r| {
            r.attribute(column)
                .map(|n| names.iter().any(|want| want.trim().eq_ignore_ascii_case(n)))
                .unwrap_or(false)
        })
        .collect();

    if selected.is_empty() {
        warn!(?names, column = %column, "No {} matched the configured names", what);
    } else {
        debug!(count = selected.len(), column = %column, "Selected {}", what);
    }
    selected
}

fn unique_columns(names: &[&str]) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for name in names {
        if !out.iter().any(|c| c.eq_ignore_ascii_case(name)) {
            out.push(name.to_string());
        }
    }
    out
}

/// Last path segment of `url`.
pub fn filename_from_url(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url)
        .map_err(|e| PlotError::config(format!("Invalid source URL '{}': {}", url, e)))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .ok_or_else(|| PlotError::config(format!("Could not determine filename from URL: {}", url)))
}

/// Relative cache location of `url`. Host and path segments become
/// directories so equal file names from different sources stay apart.
pub fn cache_key(url: &str) -> Result<PathBuf> {
    let file_name = filename_from_url(url)?;
    let parsed = url::Url::parse(url)
        .map_err(|e| PlotError::config(format!("Invalid source URL '{}': {}", url, e)))?;

    let mut key = PathBuf::from(match (parsed.host_str(), parsed.port()) {
        (Some(host), Some(port)) => format!("{}_{}", host, port),
        (Some(host), None) => host.to_string(),
        (None, _) => "local".to_string(),
    });
    if let Some(segments) = parsed.path_segments() {
        let segments: Vec<&str> = segments.collect();
        for dir in &segments[..segments.len().saturating_sub(1)] {
            if !dir.is_empty() && *dir != "." && *dir != ".." {
                key.push(dir);
            }
        }
    }
    key.push(file_name);
    Ok(key)
}
