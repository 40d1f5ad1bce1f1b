//! End-to-end choropleth pipeline: geography lookup, geometry retrieval, data
//! binding, colour scale, layout of main and inset axes, labels.

use crate::binder::{BindOptions, BindReport, DataBinder, MergedDataset};
use crate::colormap::{Colormap, Normalize};
use crate::config::Settings;
use crate::dataset::{Table, UserDataset};
use crate::error::{PlotError, Result};
use crate::figure::{
    inset_rect, Axes, Colorbar, FigRect, Figure, Layer, LayerKind, LayerStyle,
};
use crate::geodata::GeoDataManager;
use crate::geography::{GeographyConfig, GeographyRegistry, InsetRegion, LineStyle, Orientation};
use crate::labels;
use crate::projection::Projection;
use crate::render;
use crate::types::MergedRecord;
use crate::viewport::BackgroundIndex;
use geo::{coord, BoundingRect, MultiPolygon, Rect};
use std::path::Path;
use tracing::{info, warn};

// Margin added around geometry bounds when a view has no explicit limits.
const AUTO_EXTENT_MARGIN: f64 = 0.05;

/// Result of a successful plot.
#[derive(Debug, Clone)]
pub struct PlotOutput {
    pub figure: Figure,
    pub report: BindReport,
}

impl PlotOutput {
    /// Writes the figure; the format follows the extension (`svg`, `png`, `jpg`).
    pub fn save(&self, path: &Path) -> Result<()> {
        render::save(&self.figure, path)
    }

    pub fn to_svg(&self) -> Result<String> {
        render::render_svg_string(&self.figure)
    }
}

pub struct ChoroplethPlotter {
    geography_key: String,
    dataset: UserDataset,
    settings: Settings,
    registry: GeographyRegistry,
    config: Option<GeographyConfig>,
    manager: Option<GeoDataManager>,
    bind_options: BindOptions,
}

impl ChoroplethPlotter {
    /// Validates that `location_col` and `value_col` exist in `data` and
    /// hold usable identifiers and numbers.
    pub fn new(
        geography_key: &str,
        data: &Table,
        location_col: &str,
        value_col: &str,
    ) -> Result<Self> {
        let dataset = UserDataset::from_table(data, location_col, value_col)?;
        Ok(Self::from_dataset(geography_key, dataset))
    }

    pub fn from_dataset(geography_key: &str, dataset: UserDataset) -> Self {
        let settings = Settings::default();
        Self {
            geography_key: geography_key.to_string(),
            dataset,
            registry: GeographyRegistry::new(settings.config_dir.clone()),
            settings,
            config: None,
            manager: None,
            bind_options: BindOptions::default(),
        }
    }

    /// Replaces the settings; the registry is rebuilt for the new config dir.
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.registry = GeographyRegistry::new(settings.config_dir.clone());
        self.settings = settings;
        self
    }

    pub fn with_registry(mut self, registry: GeographyRegistry) -> Self {
        self.registry = registry;
        self
    }

    /// Uses `config` instead of looking the geography key up.
    pub fn with_config(mut self, config: GeographyConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_manager(mut self, manager: GeoDataManager) -> Self {
        self.manager = Some(manager);
        self
    }

    pub fn with_bind_options(mut self, options: BindOptions) -> Self {
        self.bind_options = options;
        self
    }

    pub fn geography_key(&self) -> &str {
        &self.geography_key
    }

    pub fn dataset(&self) -> &UserDataset {
        &self.dataset
    }

    /// Resolved configuration for this plotter's geography.
    pub fn geography_config(&mut self) -> Result<GeographyConfig> {
        match &self.config {
            Some(config) => {
                config.validate()?;
                Ok(config.clone())
            }
            None => self.registry.load(&self.geography_key),
        }
    }

    /// Builds the figure. `title` overrides the configured title.
    pub fn plot(&mut self, title: Option<&str>) -> Result<PlotOutput> {
        let config = self.geography_config()?;
        let default_manager;
        let manager = match &self.manager {
            Some(manager) => manager,
            None => {
                default_manager = GeoDataManager::from_settings(&self.settings)?;
                &default_manager
            }
        };
        info!(geography = %self.geography_key, rows = self.dataset.len(), "Starting plot");

        let level1 = manager.level1_layers(&config)?;
        let hints = &config.data_hints;
        let merged = DataBinder::new(
            &hints.geo_join_column,
            config.level1_code_column(),
            &hints.level1_name_column,
        )
        .with_options(self.bind_options)
        .bind(&level1.targets, &self.dataset)?;

        let colormap = Colormap::by_name(&config.styling.cmap).ok_or_else(|| {
            PlotError::config(format!("unknown colormap '{}'", config.styling.cmap))
        })?;
        let norm = Normalize::from_values(merged.values());
        info!(vmin = norm.vmin, vmax = norm.vmax, cmap = %colormap.name(), "Colour scale");

        let builder = FigureBuilder {
            config: &config,
            projection: &config.main_map_settings.projection,
            colormap: &colormap,
            norm,
        };

        let main_records = main_view_records(&merged, &config);
        let (fig_w, fig_h) = (config.figure.figsize[0], config.figure.figsize[1]);
        let layout = layout_rect(config.figure.tight_layout_rect);
        let styling = &config.styling;
        let (main_box, bar, gap) = split_colorbar(
            layout,
            styling.colorbar_orientation,
            styling.colorbar_fraction,
            styling.colorbar_pad,
        );

        let main_extent = builder.main_extent(&main_records, &merged)?;
        let main_rect = main_box.fit_aspect(main_extent.height() / main_extent.width(), fig_w, fig_h);
        let mut main = Axes::new(main_rect, main_extent, styling.ocean_color);

        let wants_lakes = config.main_map_settings.include_lakes
            || config.inset_level1_regions.iter().any(|i| i.include_lakes);
        let lakes = if wants_lakes {
            optional_layer(
                "lakes",
                manager.named_lakes(&config, &config.main_map_settings.include_lake_names),
            )
        } else {
            Vec::new()
        };
        let lakes = BackgroundIndex::new(builder.project_all(lakes.iter().map(|r| &r.geometry)));

        if config.main_map_settings.include_neighboring_countries {
            let countries = optional_layer("neighbouring countries", manager.neighbor_countries(&config));
            let index = BackgroundIndex::new(builder.project_all(countries.iter().map(|r| &r.geometry)));
            main.layers.push(builder.background_layer(
                LayerKind::NeighborCountries,
                &index,
                main_extent,
            ));
        }
        if config.main_map_settings.include_neighboring_level1 {
            let index =
                BackgroundIndex::new(builder.project_all(level1.neighbors.iter().map(|r| &r.geometry)));
            main.layers.push(builder.background_layer(
                LayerKind::NeighborLevel1,
                &index,
                main_extent,
            ));
        }
        main.layers.extend(builder.region_layers(&main_records));
        if config.main_map_settings.include_lakes {
            main.layers
                .push(builder.background_layer(LayerKind::Lakes, &lakes, main_extent));
        }
        if config.label_settings.add_labels {
            main.labels = labels::main_labels(&main_records, &config.label_settings, builder.projection);
        }

        let mut insets = Vec::with_capacity(config.inset_level1_regions.len());
        for inset in &config.inset_level1_regions {
            if let Some(axes) = builder.inset_axes(inset, &merged, main_rect, &lakes, fig_w, fig_h)? {
                insets.push(axes);
            }
        }

        let colorbar = Colorbar {
            colormap: colormap.clone(),
            norm,
            label: title_case(self.dataset.value_column()),
            orientation: styling.colorbar_orientation,
            rect: colorbar_rect(main_rect, styling.colorbar_orientation, bar, gap),
        };

        let figure = Figure {
            width: fig_w,
            height: fig_h,
            dpi: config.figure.output_dpi.unwrap_or(self.settings.output_dpi),
            title: title.map(str::to_string).unwrap_or_else(|| config.figure.title.clone()),
            main,
            insets,
            colorbar,
        };

        for warning in merged.report.warnings() {
            warn!("{}", warning);
        }
        info!(
            main_regions = main_records.len(),
            insets = figure.insets.len(),
            "Plot complete"
        );

        Ok(PlotOutput {
            figure,
            report: merged.report,
        })
    }
}

struct FigureBuilder<'a> {
    config: &'a GeographyConfig,
    projection: &'a Projection,
    colormap: &'a Colormap,
    norm: Normalize,
}

impl FigureBuilder<'_> {
    fn project_all<'g>(&self, geometries: impl Iterator<Item = &'g MultiPolygon<f64>>) -> Vec<MultiPolygon<f64>> {
        geometries
            .map(|g| self.projection.project_geometry(g))
            .collect()
    }

    fn main_extent(&self, main: &[&MergedRecord], merged: &MergedDataset) -> Result<Rect<f64>> {
        let settings = &self.config.main_map_settings;
        if let (Some(xlim), Some(ylim)) = (settings.xlim, settings.ylim) {
            return Ok(self.projection.project_extent(xlim, ylim));
        }
        let fallback: Vec<&MergedRecord> = merged.records.iter().collect();
        let records = if main.is_empty() { &fallback[..] } else { main };
        self.bounds_of(records)
            .map(|r| with_margin(r, AUTO_EXTENT_MARGIN))
            .ok_or_else(|| PlotError::config("No regions to draw in the main view"))
    }

    fn bounds_of(&self, records: &[&MergedRecord]) -> Option<Rect<f64>> {
        records
            .iter()
            .filter_map(|r| self.projection.project_geometry(&r.geometry).bounding_rect())
            .reduce(union)
    }

    fn background_layer(&self, kind: LayerKind, index: &BackgroundIndex, extent: Rect<f64>) -> Layer {
        let s = &self.config.styling;
        let style = match kind {
            LayerKind::NeighborCountries => LayerStyle {
                fill: s.country_color,
                edge: s.country_edge_color,
                linewidth: s.country_linewidth,
                linestyle: LineStyle::Solid,
            },
            LayerKind::NeighborLevel1 => LayerStyle {
                fill: s.neighbor_l1_fill_color,
                edge: s.neighbor_l1_edgecolor,
                linewidth: s.neighbor_l1_linewidth,
                linestyle: s.neighbor_l1_linestyle,
            },
            _ => LayerStyle {
                fill: s.lake_color,
                edge: s.lake_edge_color,
                linewidth: s.lake_linewidth,
                linestyle: LineStyle::Solid,
            },
        };
        let mut layer = Layer::new(kind, style);
        for geometry in index.visible(extent) {
            layer.push_plain(geometry);
        }
        layer
    }

    /// Base layer (every region, missing colour) and data layer (regions
    /// with values, colormap colour).
    fn region_layers(&self, records: &[&MergedRecord]) -> [Layer; 2] {
        let s = &self.config.styling;
        let style = LayerStyle {
            fill: s.missing_color,
            edge: s.level1_edge_color,
            linewidth: s.level1_linewidth,
            linestyle: LineStyle::Solid,
        };
        let mut base = Layer::new(LayerKind::Base, style.clone());
        let mut data = Layer::new(LayerKind::Data, style);
        for record in records {
            let geometry = self.projection.project_geometry(&record.geometry);
            if let Some(value) = record.value.value() {
                let color = self.colormap.sample(self.norm.fraction(value));
                data.push(Some(record.code.clone()), geometry.clone(), color);
            }
            base.push(Some(record.code.clone()), geometry, s.missing_color);
        }
        [base, data]
    }

    fn inset_axes(
        &self,
        inset: &InsetRegion,
        merged: &MergedDataset,
        parent: FigRect,
        lakes: &BackgroundIndex,
        fig_w: f64,
        fig_h: f64,
    ) -> Result<Option<Axes>> {
        let records: Vec<&MergedRecord> = merged
            .records
            .iter()
            .filter(|r| inset.codes.iter().any(|c| c.eq_ignore_ascii_case(&r.code)))
            .collect();
        if records.is_empty() {
            warn!(codes = ?inset.codes, "No geometry found for inset regions, skipping inset");
            return Ok(None);
        }

        let extent = match (inset.xlim, inset.ylim) {
            (Some(xlim), Some(ylim)) => self.projection.project_extent(xlim, ylim),
            _ => match self.bounds_of(&records) {
                Some(bounds) => with_margin(bounds, AUTO_EXTENT_MARGIN),
                None => {
                    warn!(codes = ?inset.codes, "Inset geometry is empty, skipping inset");
                    return Ok(None);
                }
            },
        };
        let rect = inset_rect(&inset.location, parent, fig_w, fig_h)
            .map_err(|e| PlotError::config(format!("inset {:?}: {}", inset.codes, e)))?
            .fit_aspect(extent.height() / extent.width(), fig_w, fig_h);

        let mut axes = Axes::new(rect, extent, self.config.styling.ocean_color);
        axes.codes = inset.codes.clone();
        axes.layers.extend(self.region_layers(&records));
        if inset.include_lakes {
            axes.layers
                .push(self.background_layer(LayerKind::Lakes, lakes, extent));
        }
        if self.config.label_settings.add_labels {
            axes.labels =
                labels::inset_labels(&records, &self.config.label_settings, self.projection, extent);
        }
        info!(codes = ?inset.codes, regions = records.len(), "Created inset");
        Ok(Some(axes))
    }
}

/// Records drawn in the main view: the configured main codes, or everything
/// not assigned to an inset.
fn main_view_records<'a>(merged: &'a MergedDataset, config: &GeographyConfig) -> Vec<&'a MergedRecord> {
    let inset_codes = config.inset_codes();
    merged
        .records
        .iter()
        .filter(|r| match &config.main_level1_codes {
            Some(codes) => codes.iter().any(|c| c.eq_ignore_ascii_case(&r.code)),
            None => !inset_codes.iter().any(|c| c.eq_ignore_ascii_case(&r.code)),
        })
        .collect()
}

/// Background layers are optional: a source that cannot be loaded is
/// skipped with a warning.
fn optional_layer<T>(what: &str, result: Result<Vec<T>>) -> Vec<T> {
    result.unwrap_or_else(|e| {
        warn!(error = %e, "Could not load {}, skipping layer", what);
        Vec::new()
    })
}

fn layout_rect([left, bottom, right, top]: [f64; 4]) -> FigRect {
    FigRect::new(left, bottom, (right - left).max(0.01), (top - bottom).max(0.01))
}

/// Splits `layout` into the box available to the main axes, the colour bar
/// thickness and the gap between them (figure fractions).
fn split_colorbar(
    layout: FigRect,
    orientation: Orientation,
    fraction: f64,
    pad: f64,
) -> (FigRect, f64, f64) {
    match orientation {
        Orientation::Vertical => {
            let (bar, gap) = (fraction * layout.width, pad * layout.width);
            (
                FigRect::new(layout.left, layout.bottom, layout.width - bar - gap, layout.height),
                bar,
                gap,
            )
        }
        Orientation::Horizontal => {
            let (bar, gap) = (fraction * layout.height, pad * layout.height);
            (
                FigRect::new(
                    layout.left,
                    layout.bottom + bar + gap,
                    layout.width,
                    layout.height - bar - gap,
                ),
                bar,
                gap,
            )
        }
    }
}

fn colorbar_rect(main: FigRect, orientation: Orientation, thickness: f64, gap: f64) -> FigRect {
    match orientation {
        Orientation::Vertical => {
            FigRect::new(main.right() + gap, main.bottom, thickness, main.height)
        }
        Orientation::Horizontal => {
            FigRect::new(main.left, main.bottom - gap - thickness, main.width, thickness)
        }
    }
}

fn union(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        coord! { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        coord! { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}

/// Grows `rect` by `margin` of its size on each side; degenerate rectangles
/// get a unit-sized window.
fn with_margin(rect: Rect<f64>, margin: f64) -> Rect<f64> {
    let dx = if rect.width() > 0.0 { rect.width() * margin } else { 0.5 };
    let dy = if rect.height() > 0.0 { rect.height() * margin } else { 0.5 };
    Rect::new(
        coord! { x: rect.min().x - dx, y: rect.min().y - dy },
        coord! { x: rect.max().x + dx, y: rect.max().y + dy },
    )
}

/// `median_household_income` -> `Median Household Income`.
pub fn title_case(column: &str) -> String {
    column
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}
