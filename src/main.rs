use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::{error, info};
use tokio::sync::mpsc;

mod engine;
mod env;
mod loader;
mod networking;
mod storage;
mod updater;
mod util;

use crate::engine::Reconciler;
use crate::engine::state::{RunMode, RunReport};
use crate::loader::AssetLoader;
use crate::networking::NetworkClient;
use crate::storage::StorageManager;

const EXIT_FAULT: u8 = 1;
const EXIT_PARTIAL_FAILURE: u8 = 2;
const EXIT_UPDATES_AVAILABLE: u8 = 3;

#[derive(Parser, Debug)]
#[command(
    name = "lovelace-updater",
    author,
    version,
    about = "Keeps bundled Lovelace components in sync with their upstream releases"
)]
struct Cli {
    /// Print the tool version and exit.
    #[arg(long)]
    version_only: bool,

    /// Component configuration file.
    #[arg(long, global = true, default_value = env::DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Directory holding one folder per component (defaults to $LOVELACE_ROOT or `.`).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Report available updates without touching any file.
    Check {
        /// Print the available updates as JSON.
        #[arg(long)]
        json: bool,
    },
    /// Download newer versions and rewrite their version records.
    Update {
        /// Only update this component.
        #[arg(long)]
        component: Option<String>,

        /// Write a name -> {current, latest} summary here when something changed.
        #[arg(long)]
        summary: Option<PathBuf>,
    },
    /// Discover and load the components served next to the loader script.
    Discover {
        /// Home Assistant origin, e.g. http://homeassistant.local:8123
        #[arg(long)]
        origin: String,

        /// Script sources present on the page, used to locate the loader.
        #[arg(long = "script")]
        scripts: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if cli.version_only {
        println!("lovelace-updater {}", env!("CARGO_PKG_VERSION"));
        return ExitCode::SUCCESS;
    }

    let command = cli.command.unwrap_or(Command::Update {
        component: None,
        summary: None,
    });
    let code = match command {
        Command::Check { json } => match build_reconciler(&cli.config, cli.root).await {
            Ok(reconciler) => check(&reconciler, json).await,
            Err(code) => code,
        },
        Command::Update { component, summary } => {
            match build_reconciler(&cli.config, cli.root).await {
                Ok(reconciler) => update(&reconciler, component.as_deref(), summary).await,
                Err(code) => code,
            }
        }
        Command::Discover { origin, scripts } => discover(&origin, &scripts).await,
    };
    ExitCode::from(code)
}

async fn build_reconciler(config_path: &Path, root: Option<PathBuf>) -> Result<Reconciler, u8> {
    let config = Reconciler::load_config(config_path).await.map_err(|err| {
        error!("{err}");
        EXIT_FAULT
    })?;
    let root = root.unwrap_or_else(env::default_root_dir);
    info!(
        "reconciler: {} components configured, root {}",
        config.len(),
        root.display()
    );
    Ok(Reconciler::new(
        config,
        Arc::new(NetworkClient::new()),
        StorageManager::new(root),
    ))
}

async fn check(reconciler: &Reconciler, json: bool) -> u8 {
    let report = reconciler.run(RunMode::Check).await;
    if json {
        match serde_json::to_string_pretty(&report.summary()) {
            Ok(text) => println!("{text}"),
            Err(err) => {
                error!("failed to serialize updates: {err}");
                return EXIT_FAULT;
            }
        }
    } else if report.updates_available() {
        println!("Updates available:\n{report}");
    } else {
        println!("No updates available\n{report}");
    }
    exit_code(&report, RunMode::Check)
}

async fn update(reconciler: &Reconciler, component: Option<&str>, summary: Option<PathBuf>) -> u8 {
    let report = match component {
        Some(name) => match reconciler.run_one(name).await {
            Ok(report) => report,
            Err(err) => {
                error!("{err}");
                let known: Vec<&str> = reconciler.component_names().collect();
                eprintln!("Known components: {}", known.join(", "));
                return EXIT_FAULT;
            }
        },
        None => reconciler.run(RunMode::Apply).await,
    };
    println!("{report}");
    let failed = report.failed_names();
    if !failed.is_empty() {
        println!("Failed to update: {}", failed.join(", "));
    }
    if let Err(err) = write_summary(&report, summary.as_deref()).await {
        error!("summary: {err}");
        return EXIT_FAULT;
    }
    exit_code(&report, RunMode::Apply)
}

/// Write the summary artifact when `path` is set and something was updated.
async fn write_summary(report: &RunReport, path: Option<&Path>) -> Result<bool, String> {
    let Some(path) = path.filter(|_| report.any_updated()) else {
        return Ok(false);
    };
    storage::write_json_file(path, &report.summary()).await?;
    info!("summary: written to {}", path.display());
    Ok(true)
}

fn exit_code(report: &RunReport, mode: RunMode) -> u8 {
    // A pending update wins over partial failures so the scheduler can go ahead.
    if mode == RunMode::Check && report.updates_available() {
        EXIT_UPDATES_AVAILABLE
    } else if report.failed() > 0 {
        EXIT_PARTIAL_FAILURE
    } else {
        0
    }
}

async fn discover(origin: &str, scripts: &[String]) -> u8 {
    let base_path = loader::resolve_base_path(scripts, loader::LOADER_FILE);
    let asset_loader = AssetLoader::new(Arc::new(NetworkClient::new()), origin, &base_path);
    let (events, mut received) = mpsc::unbounded_channel();
    let result = asset_loader.run(&events).await;
    drop(events);

    while let Some(event) = received.recv().await {
        info!("loader: dispatched {}", event.name());
        match serde_json::to_string_pretty(&event) {
            Ok(text) => println!("{text}"),
            Err(err) => error!("failed to serialize {}: {err}", event.name()),
        }
    }
    match result {
        Ok(_) => 0,
        Err(_) => EXIT_FAULT,
    }
}
