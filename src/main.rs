use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use clayplot::{ChoroplethPlotter, GeoDataManager, GeographyRegistry, Settings, Table};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Optional TOML settings file
    #[arg(short, long, value_name = "FILE", global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render a choropleth map from a CSV file
    Plot {
        #[arg(short, long)]
        geography: String,
        #[arg(short, long, value_name = "FILE")]
        data: PathBuf,
        /// Defaults to the geography's `data_hints.location_column`
        #[arg(long)]
        location_col: Option<String>,
        /// Defaults to the geography's `data_hints.value_column`
        #[arg(long)]
        value_col: Option<String>,
        #[arg(short, long)]
        title: Option<String>,
        #[arg(short, long, value_name = "FILE", default_value = "map.svg")]
        output: PathBuf,
        /// Fail when no data row matches a region
        #[arg(long)]
        require_overlap: bool,
    },
    /// List available geography keys
    Geographies,
    /// Print the resolved configuration of a geography
    ShowConfig { key: String },
    /// Download the geometry sources of a geography into the cache
    Fetch { key: String },
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> Result<()> {
    init_logging();

    let cli = Cli::parse();
    let settings = Settings::load_or_default(cli.settings.as_deref())?;

    match cli.command {
        Commands::Plot {
            geography,
            data,
            location_col,
            value_col,
            title,
            output,
            require_overlap,
        } => {
            let mut registry = GeographyRegistry::new(settings.config_dir.clone());
            let config = registry
                .load(&geography)
                .with_context(|| format!("Failed to load geography '{}'", geography))?;
            let (location_col, value_col) = config
                .data_columns(location_col.as_deref(), value_col.as_deref())
                .context("Data columns not specified")?;

            let table = Table::from_csv_path(&data)
                .with_context(|| format!("Failed to read data file: {:?}", data))?;
            let mut plotter = ChoroplethPlotter::new(&geography, &table, &location_col, &value_col)
                .context("Invalid input data")?
                .with_settings(settings)
                .with_registry(registry)
                .with_bind_options(clayplot::BindOptions { require_overlap });

            let result = plotter
                .plot(title.as_deref())
                .with_context(|| format!("Failed to plot geography '{}'", geography))?;
            for warning in result.report.warnings() {
                eprintln!("warning: {}", warning);
            }
            result
                .save(&output)
                .with_context(|| format!("Failed to save figure to {:?}", output))?;
            info!(output = ?output, "Map written");
        }
        Commands::Geographies => {
            let registry = GeographyRegistry::new(settings.config_dir.clone());
            for key in registry.available() {
                println!("{}", key);
            }
        }
        Commands::ShowConfig { key } => {
            let mut registry = GeographyRegistry::new(settings.config_dir.clone());
            let config = registry
                .load(&key)
                .with_context(|| format!("Failed to load geography '{}'", key))?;
            println!("{:#?}", config);
        }
        Commands::Fetch { key } => {
            let mut registry = GeographyRegistry::new(settings.config_dir.clone());
            let config = registry
                .load(&key)
                .with_context(|| format!("Failed to load geography '{}'", key))?;
            let manager = GeoDataManager::from_settings(&settings)?;
            for path in manager
                .prefetch(&config)
                .with_context(|| format!("Failed to fetch sources for '{}'", key))?
            {
                println!("{}", path.display());
            }
        }
    }

    Ok(())
}
