use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use facility_atlas::config::AppConfig;
use facility_atlas::icons::IconLoader;
use facility_atlas::render::{ClickOutcome, MapView};
use facility_atlas::snapshot::SnapshotEngine;
use facility_atlas::state::{AtlasState, FeatureDetails, Status};
use facility_atlas::data;
use geo::Point;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Filter the facilities and write the map bundle
    Export {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        /// Only show these types (comma separated)
        #[arg(long, value_delimiter = ',')]
        types: Option<Vec<String>>,
        /// Case-insensitive name search
        #[arg(long, default_value = "")]
        search: String,
        /// Basemap name from the config, or a style url
        #[arg(long)]
        style: Option<String>,
    },
    /// Print legend rows with per-type counts
    Legend {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
    },
    /// Resolve a click at a position on the map
    Inspect {
        #[arg(short, long, value_name = "FILE", default_value = "config.toml")]
        config: PathBuf,
        #[arg(long, allow_hyphen_values = true)]
        lng: f64,
        #[arg(long, allow_hyphen_values = true)]
        lat: f64,
        #[arg(long)]
        zoom: Option<f64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Export { config, types, search, style } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let mut state = load_state(&app_config).await?;

            if let Some(types) = types {
                state.set_selected_types(types);
            }
            state.set_search(&search);
            if let Some(style) = style {
                state.set_map_style(&app_config.style_url(&style));
            }

            let loader = IconLoader::from_config(&app_config.icons);
            let [lng, lat] = app_config.map.center;
            let engine = SnapshotEngine::new(Point::new(lng, lat), app_config.map.zoom);
            let mut view = MapView::new(engine, &app_config);
            view.change_style(&loader, &state.selection().map_style).await;
            view.refresh(&loader, state.revision(), state.filtered()).await;

            view.engine().write_bundle(&app_config.output.dir)?;
            print_status(&state);
        }
        Commands::Legend { config } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let state = load_state(&app_config).await?;

            for item in state.legend(&app_config.preloaded_icons()) {
                println!("{:<24} {:<32} {:>6}", item.key, item.label, item.count);
            }
            println!("Total: {}", state.features().len());
        }
        Commands::Inspect { config, lng, lat, zoom } => {
            let app_config = AppConfig::load_from_file(&config)?;
            let state = load_state(&app_config).await?;

            let loader = IconLoader::from_config(&app_config.icons);
            let at = Point::new(lng, lat);
            let engine = SnapshotEngine::new(at, zoom.unwrap_or(app_config.map.zoom));
            let mut view = MapView::new(engine, &app_config);
            view.set_on_select(|record| print_details(&FeatureDetails::from_record(record)));
            view.change_style(&loader, &state.selection().map_style).await;
            view.refresh(&loader, state.revision(), state.filtered()).await;

            match view.handle_click(at) {
                ClickOutcome::Expanded { center, zoom } => {
                    println!("Cluster at {:.6}, {:.6} expands at zoom {}", center.y(), center.x(), zoom);
                }
                // details already printed by the selection callback
                ClickOutcome::Selected(_) => {}
                ClickOutcome::Ignored => println!("Nothing at {:.6}, {:.6}", lat, lng),
            }
            view.dispose();
        }
    }

    Ok(())
}

async fn load_state(config: &AppConfig) -> Result<AtlasState> {
    let mut state = AtlasState::new(config);
    let ticket = state.begin_load();
    let result = data::load_dataset(config.input.data_csv.clone()).await;
    state.finish_load(ticket, result);

    if let Status::Error(message) = state.status() {
        return Err(anyhow!("Could not load data: {}", message));
    }
    Ok(state)
}

fn print_status(state: &AtlasState) {
    match state.status() {
        Status::Loading => println!("Loading data..."),
        Status::Error(message) => println!("Could not load data: {}", message),
        Status::NoMatches => println!("No facilities match your filters"),
        Status::Showing { filtered, total } => println!("Showing {} / {}", filtered, total),
    }
}

fn print_details(details: &FeatureDetails) {
    println!("{}", details.title);
    println!("  Type:        {}", details.type_label);
    println!("  Coordinates: {}", details.coordinates);
    if details.tags.is_empty() {
        println!("  Tags:        none");
    } else {
        println!("  Tags:        {}", details.tags.join(", "));
    }
}
