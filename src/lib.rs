//! Configuration-driven choropleth maps of first-order administrative regions.
//!
//! A [`ChoroplethPlotter`] takes a geography key and a table of values,
//! resolves the geography's configuration and boundary data, joins the values
//! onto regions and produces a [`Figure`] that can be saved as SVG, PNG or JPEG.

pub mod binder;
pub mod colormap;
pub mod config;
pub mod data;
pub mod dataset;
pub mod error;
pub mod figure;
pub mod geodata;
pub mod geography;
pub mod labels;
pub mod plotter;
pub mod projection;
pub mod render;
pub mod types;
pub mod viewport;

pub use binder::{BindOptions, BindReport, DataBinder, MergedDataset};
pub use config::Settings;
pub use dataset::{Table, UserDataset};
pub use error::{PlotError, Result};
pub use figure::Figure;
pub use geodata::{GeoDataManager, HttpClient, ReqwestClient};
pub use geography::{GeographyConfig, GeographyRegistry};
pub use plotter::{ChoroplethPlotter, PlotOutput};
