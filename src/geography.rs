//! Per-geography configuration: which regions to draw, how to style them and
//! where their labels go.

use crate::colormap::{Color, Colormap};
use crate::error::{PlotError, Result};
use crate::projection::Projection;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, info};

pub const ALLOWED_RESOLUTIONS: &[&str] = &["10m", "50m", "110m"];

const BUILTIN_GEOGRAPHIES: &[(&str, &str)] = &[
    ("australia_states", include_str!("../resources/australia_states.yaml")),
    ("brazil_states", include_str!("../resources/brazil_states.yaml")),
    ("canada_provinces", include_str!("../resources/canada_provinces.yaml")),
    ("china_provinces", include_str!("../resources/china_provinces.yaml")),
    ("usa_states", include_str!("../resources/usa_states.yaml")),
];

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GeographyConfig {
    /// ISO A2 codes of the countries whose level-1 regions are plotted.
    pub country_codes: Vec<String>,
    /// `None` means every target region not assigned to an inset.
    #[serde(default)]
    pub main_level1_codes: Option<Vec<String>>,
    #[serde(default)]
    pub inset_level1_regions: Vec<InsetRegion>,
    #[serde(default)]
    pub main_map_settings: MainMapSettings,
    #[serde(default)]
    pub styling: Styling,
    #[serde(default)]
    pub label_settings: LabelSettings,
    #[serde(default)]
    pub figure: FigureSettings,
    #[serde(default)]
    pub data_hints: DataHints,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InsetRegion {
    pub codes: Vec<String>,
    #[serde(default)]
    pub location: InsetLocation,
    #[serde(default)]
    pub xlim: Option<[f64; 2]>,
    #[serde(default)]
    pub ylim: Option<[f64; 2]>,
    #[serde(default)]
    pub include_lakes: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct InsetLocation {
    pub width: SizeSpec,
    pub height: SizeSpec,
    pub loc: Anchor,
    /// (x, y, width, height) of the box the inset is anchored in.
    pub bbox_to_anchor: [f64; 4],
    pub bbox_transform: BboxTransform,
    /// Padding between the inset and its anchor box, in font-size units.
    pub borderpad: f64,
}

impl Default for InsetLocation {
    fn default() -> Self {
        Self {
            width: SizeSpec::Text("20%".to_string()),
            height: SizeSpec::Text("20%".to_string()),
            loc: Anchor::LowerLeft,
            bbox_to_anchor: [0.0, 0.0, 1.0, 1.0],
            bbox_transform: BboxTransform::Axes,
            borderpad: 0.0,
        }
    }
}

/// Inset size: a fraction (`0.2`) or a percentage string (`"20%"`).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SizeSpec {
    Fraction(f64),
    Text(String),
}

impl SizeSpec {
    pub fn fraction(&self) -> std::result::Result<f64, String> {
        let value = match self {
            SizeSpec::Fraction(f) => *f,
            SizeSpec::Text(t) => {
                let t = t.trim();
                match t.strip_suffix('%') {
                    Some(pct) => pct
                        .trim()
                        .parse::<f64>()
                        .map(|p| p / 100.0)
                        .map_err(|_| format!("invalid percentage '{}'", t))?,
                    None => t.parse::<f64>().map_err(|_| format!("invalid size '{}'", t))?,
                }
            }
        };
        if value > 0.0 && value <= 1.0 {
            Ok(value)
        } else {
            Err(format!("size {} must be within (0, 1]", value))
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum Anchor {
    #[serde(rename = "upper right")]
    UpperRight,
    #[serde(rename = "upper left")]
    UpperLeft,
    #[serde(rename = "lower left")]
    LowerLeft,
    #[serde(rename = "lower right")]
    LowerRight,
    #[serde(rename = "right", alias = "center right")]
    Right,
    #[serde(rename = "center left")]
    CenterLeft,
    #[serde(rename = "lower center")]
    LowerCenter,
    #[serde(rename = "upper center")]
    UpperCenter,
    #[serde(rename = "center")]
    Center,
}

impl Anchor {
    /// Horizontal and vertical position of the anchor within a box, each in [0, 1].
    pub fn factors(&self) -> (f64, f64) {
        match self {
            Anchor::UpperRight => (1.0, 1.0),
            Anchor::UpperLeft => (0.0, 1.0),
            Anchor::LowerLeft => (0.0, 0.0),
            Anchor::LowerRight => (1.0, 0.0),
            Anchor::Right => (1.0, 0.5),
            Anchor::CenterLeft => (0.0, 0.5),
            Anchor::LowerCenter => (0.5, 0.0),
            Anchor::UpperCenter => (0.5, 1.0),
            Anchor::Center => (0.5, 0.5),
        }
    }
}

/// Coordinate system of `bbox_to_anchor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum BboxTransform {
    #[default]
    #[serde(rename = "ax.transAxes", alias = "axes")]
    Axes,
    #[serde(rename = "fig.transFigure", alias = "figure")]
    Figure,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(default)]
pub struct MainMapSettings {
    /// Longitude range of the main view.
    pub xlim: Option<[f64; 2]>,
    /// Latitude range of the main view.
    pub ylim: Option<[f64; 2]>,
    pub projection: Projection,
    /// Natural Earth resolution; falls back to the application default.
    pub resolution: Option<String>,
    pub include_neighboring_countries: bool,
    pub include_neighboring_level1: bool,
    pub include_lakes: bool,
    pub include_lake_names: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    #[default]
    Vertical,
    Horizontal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
pub enum LineStyle {
    #[default]
    #[serde(rename = "-", alias = "solid")]
    Solid,
    #[serde(rename = "--", alias = "dashed")]
    Dashed,
    #[serde(rename = ":", alias = "dotted")]
    Dotted,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Styling {
    pub cmap: String,
    pub missing_color: Color,
    pub ocean_color: Color,
    pub level1_edge_color: Color,
    pub level1_linewidth: f64,
    pub country_color: Color,
    pub country_edge_color: Color,
    pub country_linewidth: f64,
    pub neighbor_l1_fill_color: Color,
    pub neighbor_l1_edgecolor: Color,
    pub neighbor_l1_linewidth: f64,
    pub neighbor_l1_linestyle: LineStyle,
    pub lake_color: Color,
    pub lake_edge_color: Color,
    pub lake_linewidth: f64,
    pub colorbar_orientation: Orientation,
    /// Share of the figure given to the colour bar.
    pub colorbar_fraction: f64,
    pub colorbar_pad: f64,
}

impl Default for Styling {
    fn default() -> Self {
        Self {
            cmap: "viridis".to_string(),
            missing_color: Color::rgb(0xd3, 0xd3, 0xd3),
            ocean_color: Color::rgb(0xf0, 0xf8, 0xff),
            level1_edge_color: Color::rgb(0, 0, 0),
            level1_linewidth: 0.5,
            country_color: Color::rgb(0xea, 0xea, 0xea),
            country_edge_color: Color::rgb(0xa9, 0xa9, 0xa9),
            country_linewidth: 0.5,
            neighbor_l1_fill_color: Color::rgb(0xd3, 0xd3, 0xd3),
            neighbor_l1_edgecolor: Color::rgb(0xa9, 0xa9, 0xa9),
            neighbor_l1_linewidth: 0.5,
            neighbor_l1_linestyle: LineStyle::Dashed,
            lake_color: Color::rgb(0xf0, 0xf8, 0xff),
            lake_edge_color: Color::rgb(0, 0, 0x8b),
            lake_linewidth: 0.3,
            colorbar_orientation: Orientation::Vertical,
            colorbar_fraction: 0.03,
            colorbar_pad: 0.02,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClipSide {
    Top,
    Bottom,
    Left,
    Right,
}

/// Background box behind a label.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BoxStyle {
    #[serde(default, alias = "fc")]
    pub facecolor: Option<Color>,
    #[serde(default, alias = "ec")]
    pub edgecolor: Option<Color>,
    #[serde(default)]
    pub alpha: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ArrowStyle {
    #[serde(default)]
    pub color: Option<Color>,
    #[serde(default, alias = "lw")]
    pub linewidth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Positioning {
    RelativeToLargestPolygon,
    GeometryCentroid,
    GeometryRepresentativePoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AnchorPointKind {
    #[default]
    Centroid,
    RepresentativePoint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum HAlign {
    Left,
    #[default]
    Center,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VAlign {
    Top,
    #[default]
    Center,
    Bottom,
}

/// A relative coordinate, or a keyword such as `centroid_y` meaning "keep
/// the anchor's own coordinate".
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RelCoord {
    Fraction(f64),
    Keyword(String),
}

impl RelCoord {
    pub fn fraction(&self) -> Option<f64> {
        match self {
            RelCoord::Fraction(f) => Some(*f),
            RelCoord::Keyword(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub ha: HAlign,
    pub va: VAlign,
    pub x_rel: Option<RelCoord>,
    pub y_rel: Option<RelCoord>,
    pub use_arrow: bool,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            ha: HAlign::Center,
            va: VAlign::Center,
            x_rel: None,
            y_rel: None,
            use_arrow: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct InsetLabelRule {
    pub positioning: Positioning,
    #[serde(default)]
    pub anchor_point: AnchorPointKind,
    #[serde(default)]
    pub placement: Placement,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LabelSettings {
    pub add_labels: bool,
    /// Overrides `data_hints.level1_code_column` for labelling and inset selection.
    pub level1_code_column: Option<String>,
    pub label_format: String,
    pub value_format: String,
    pub na_value_text: String,
    pub label_fontsize: f64,
    pub annotation_fontsize: f64,
    pub small_regions: Vec<String>,
    /// Label offset in degrees for small regions, keyed by region code.
    pub offsets: BTreeMap<String, [f64; 2]>,
    pub clipped_regions: BTreeMap<String, (ClipSide, f64)>,
    pub label_bbox_style: Option<BoxStyle>,
    pub annotation_bbox_style: Option<BoxStyle>,
    pub annotation_arrowprops: Option<ArrowStyle>,
    pub inset_label_handling: BTreeMap<String, InsetLabelRule>,
}

impl Default for LabelSettings {
    fn default() -> Self {
        Self {
            add_labels: false,
            level1_code_column: None,
            label_format: "{code} - {value}".to_string(),
            value_format: "{:.0f}".to_string(),
            na_value_text: "N/A".to_string(),
            label_fontsize: 7.0,
            annotation_fontsize: 6.0,
            small_regions: Vec::new(),
            offsets: BTreeMap::new(),
            clipped_regions: BTreeMap::new(),
            label_bbox_style: None,
            annotation_bbox_style: None,
            annotation_arrowprops: None,
            inset_label_handling: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FigureSettings {
    /// Width and height in inches.
    pub figsize: [f64; 2],
    pub title: String,
    /// (left, bottom, right, top) of the area the axes may occupy.
    pub tight_layout_rect: [f64; 4],
    pub output_dpi: Option<u32>,
}

impl Default for FigureSettings {
    fn default() -> Self {
        Self {
            figsize: [15.0, 10.0],
            title: "Choropleth Map".to_string(),
            tight_layout_rect: [0.0, 0.03, 1.0, 0.95],
            output_dpi: None,
        }
    }
}

/// Column names and source locations for the geometry layers.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DataHints {
    pub level1_code_column: String,
    pub level1_name_column: String,
    pub country_code_column: String,
    /// Geometry column user locations are matched against.
    pub geo_join_column: String,
    pub location_column: Option<String>,
    pub value_column: Option<String>,
    /// Names of neighbouring countries drawn as background.
    pub neighboring_country_codes: Vec<String>,
    pub neighboring_country_name_column: String,
    /// ISO A2 codes of countries whose level-1 regions are drawn as neighbours.
    pub neighbor_level1_country_codes: Vec<String>,
    pub lake_name_column: String,
    pub level1_source_url: Option<String>,
    pub lakes_source_url: Option<String>,
    pub countries_source_url: Option<String>,
}

impl Default for DataHints {
    fn default() -> Self {
        Self {
            level1_code_column: "postal".to_string(),
            level1_name_column: "name".to_string(),
            country_code_column: "iso_a2".to_string(),
            geo_join_column: "name".to_string(),
            location_column: None,
            value_column: None,
            neighboring_country_codes: Vec::new(),
            neighboring_country_name_column: "ADMIN".to_string(),
            neighbor_level1_country_codes: Vec::new(),
            lake_name_column: "name".to_string(),
            level1_source_url: None,
            lakes_source_url: None,
            countries_source_url: None,
        }
    }
}

impl GeographyConfig {
    /// Parses and validates a YAML document.
    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: GeographyConfig = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.country_codes.iter().all(|c| c.trim().is_empty()) {
            return Err(PlotError::config("'country_codes' must list at least one country"));
        }

        if let Some(res) = &self.main_map_settings.resolution {
            validate_resolution(res)?;
        }
        if Colormap::by_name(&self.styling.cmap).is_none() {
            return Err(PlotError::config(format!(
                "unknown colormap '{}' (known: {})",
                self.styling.cmap,
                Colormap::names().collect::<Vec<_>>().join(", ")
            )));
        }
        self.main_map_settings
            .projection
            .validate()
            .map_err(PlotError::config)?;

        check_limits("main_map_settings.xlim", self.main_map_settings.xlim)?;
        check_limits("main_map_settings.ylim", self.main_map_settings.ylim)?;

        for (i, inset) in self.inset_level1_regions.iter().enumerate() {
            if inset.codes.is_empty() {
                return Err(PlotError::config(format!(
                    "inset_level1_regions[{}] must list at least one code",
                    i
                )));
            }
            check_limits(&format!("inset_level1_regions[{}].xlim", i), inset.xlim)?;
            check_limits(&format!("inset_level1_regions[{}].ylim", i), inset.ylim)?;
            for (what, size) in [("width", &inset.location.width), ("height", &inset.location.height)] {
                size.fraction().map_err(|e| {
                    PlotError::config(format!("inset_level1_regions[{}].location.{}: {}", i, what, e))
                })?;
            }
        }

        for (code, (_, fraction)) in &self.label_settings.clipped_regions {
            if !(*fraction > 0.0 && *fraction <= 1.0) {
                return Err(PlotError::config(format!(
                    "clipped_regions.{}: fraction {} must be within (0, 1]",
                    code, fraction
                )));
            }
        }

        let [w, h] = self.figure.figsize;
        if w <= 0.0 || h <= 0.0 {
            return Err(PlotError::config("figure.figsize must be positive"));
        }
        if !(self.styling.colorbar_fraction > 0.0 && self.styling.colorbar_fraction < 0.5) {
            return Err(PlotError::config("styling.colorbar_fraction must be within (0, 0.5)"));
        }

        Ok(())
    }

    /// Column holding level-1 region codes.
    pub fn level1_code_column(&self) -> &str {
        self.label_settings
            .level1_code_column
            .as_deref()
            .unwrap_or(&self.data_hints.level1_code_column)
    }

    /// Location and value column names for user data. Explicit names win;
    /// otherwise `data_hints.location_column` / `value_column` are used.
    pub fn data_columns(&self, location: Option<&str>, value: Option<&str>) -> Result<(String, String)> {
        let pick = |explicit: Option<&str>, hint: &Option<String>, what: &str| {
            explicit
                .map(str::to_string)
                .or_else(|| hint.clone())
                .ok_or_else(|| {
                    PlotError::config(format!(
                        "No {0} column given and data_hints.{0}_column is not set",
                        what
                    ))
                })
        };
        Ok((
            pick(location, &self.data_hints.location_column, "location")?,
            pick(value, &self.data_hints.value_column, "value")?,
        ))
    }

    /// Codes assigned to any inset.
    pub fn inset_codes(&self) -> Vec<&str> {
        self.inset_level1_regions
            .iter()
            .flat_map(|i| i.codes.iter().map(String::as_str))
            .collect()
    }

    pub fn resolution<'a>(&'a self, default: &'a str) -> &'a str {
        self.main_map_settings.resolution.as_deref().unwrap_or(default)
    }
}

pub fn validate_resolution(resolution: &str) -> Result<()> {
    if ALLOWED_RESOLUTIONS.contains(&resolution) {
        Ok(())
    } else {
        Err(PlotError::config(format!(
            "Invalid resolution '{}'. Allowed values are: {:?}",
            resolution, ALLOWED_RESOLUTIONS
        )))
    }
}

fn check_limits(what: &str, limits: Option<[f64; 2]>) -> Result<()> {
    match limits {
        Some([lo, hi]) if !(lo < hi) => Err(PlotError::config(format!(
            "{} must be an increasing pair, got [{}, {}]",
            what, lo, hi
        ))),
        _ => Ok(()),
    }
}

/// Resolves geography keys to configurations: a user directory first, then
/// the built-in set. Parsed configurations are cached per key.
#[derive(Debug, Default)]
pub struct GeographyRegistry {
    config_dir: Option<PathBuf>,
    cache: HashMap<String, GeographyConfig>,
}

impl GeographyRegistry {
    pub fn new(config_dir: Option<PathBuf>) -> Self {
        Self {
            config_dir,
            cache: HashMap::new(),
        }
    }

    /// All keys that [`load`](Self::load) would accept, sorted.
    pub fn available(&self) -> Vec<String> {
        let mut keys: Vec<String> = BUILTIN_GEOGRAPHIES
            .iter()
            .map(|(k, _)| k.to_string())
            .collect();
        if let Some(dir) = &self.config_dir {
            if let Ok(entries) = fs::read_dir(dir) {
                for path in entries.filter_map(|e| e.ok().map(|e| e.path())) {
                    let is_yaml = path
                        .extension()
                        .and_then(|e| e.to_str())
                        .map(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"))
                        .unwrap_or(false);
                    if let (true, Some(stem)) = (is_yaml, path.file_stem().and_then(|s| s.to_str())) {
                        if is_valid_key(stem) {
                            keys.push(stem.to_string());
                        }
                    }
                }
            }
        }
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn load(&mut self, key: &str) -> Result<GeographyConfig> {
        if let Some(config) = self.cache.get(key) {
            debug!(key, "Using cached geography configuration");
            return Ok(config.clone());
        }
        if !is_valid_key(key) {
            return Err(PlotError::config(format!("Invalid geography key: '{}'", key)));
        }

        let content = self.read_document(key)?;
        let config = GeographyConfig::from_yaml_str(&content)
            .map_err(|e| PlotError::config(format!("{}: {}", key, strip_prefix(&e))))?;

        info!(key, "Loaded geography configuration");
        self.cache.insert(key.to_string(), config.clone());
        Ok(config)
    }

    fn read_document(&self, key: &str) -> Result<String> {
        if let Some(dir) = &self.config_dir {
            for ext in ["yaml", "yml"] {
                let path = dir.join(format!("{}.{}", key, ext));
                if path.is_file() {
                    debug!(path = ?path, "Reading geography configuration");
                    return Ok(fs::read_to_string(&path)?);
                }
            }
        }
        BUILTIN_GEOGRAPHIES
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, doc)| doc.to_string())
            .ok_or_else(|| {
                PlotError::config(format!(
                    "Invalid geography key: '{}'. Available keys are: {:?}",
                    key,
                    self.available()
                ))
            })
    }
}

fn strip_prefix(err: &PlotError) -> String {
    match err {
        PlotError::ConfigValidation(msg) => msg.clone(),
        other => other.to_string(),
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
