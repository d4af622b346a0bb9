// ========================================================================================
//
//                        THE SERVICE ORCHESTRATOR: GENOCLASS
//
// ========================================================================================
//
// This module owns the application lifecycle: argument parsing, configuration,
// logging, model warm-up and the choice between serving HTTP, answering a single
// prediction, or only fetching models. The pipeline itself lives in the library.

use clap::{Parser, Subcommand};
use genoclass::api;
use genoclass::config::ServiceConfig;
use genoclass::memory;
use genoclass::pipeline::PredictionService;
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info};
use std::error::Error;
use std::fs;
use std::io::{self, Read};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ========================================================================================
//                         COMMAND-LINE INTERFACE DEFINITION
// ========================================================================================

#[derive(Parser, Debug)]
#[command(
    name = "genoclass",
    version,
    about = "Classifies patient records into genetic disorder categories and subclasses."
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to a TOML service configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for downloaded model artifacts (overrides the config file)
    #[arg(long, global = true)]
    cache_dir: Option<PathBuf>,

    /// Port to listen on (overrides the config file)
    #[arg(long, env = "PORT", global = true)]
    port: Option<u16>,

    /// Load models on the first request instead of at startup
    #[arg(long, global = true)]
    lazy: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve predictions over HTTP (default)
    Serve,
    /// Classify a JSON payload from a file, or from stdin when the path is "-"
    Predict { input: PathBuf },
    /// Download, load and validate every configured model, then exit
    Fetch,
}

// ========================================================================================
//                           THE MAIN ORCHESTRATION LOGIC
// ========================================================================================

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{e}");
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error + Send + Sync>> {
    let config = resolve_config(&cli)?;
    let store = config.build_store()?;
    let service = Arc::new(PredictionService::new(Arc::new(store)));

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(service, &config),
        Command::Predict { input } => run_predict(&service, &input),
        Command::Fetch => run_fetch(&service),
    }
}

fn resolve_config(cli: &Cli) -> Result<ServiceConfig, Box<dyn Error + Send + Sync>> {
    let mut config = match &cli.config {
        Some(path) => {
            info!("Reading configuration from {}", path.display());
            ServiceConfig::load(path)?
        }
        None => ServiceConfig::default(),
    };

    if let Some(dir) = &cli.cache_dir {
        config.cache_dir = dir.clone();
    }
    if let Some(port) = cli.port {
        config.port = port;
    }
    if cli.lazy {
        config.preload = false;
    }
    Ok(config)
}

fn run_server(
    service: Arc<PredictionService>,
    config: &ServiceConfig,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    if config.preload {
        let start = Instant::now();
        service.warm_up()?;
        info!("Models ready in {:.2?}", start.elapsed());
    } else {
        info!("Lazy loading enabled; models load on first request");
    }

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.port));
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(api::serve(service, addr))?;
    Ok(())
}

fn run_predict(
    service: &PredictionService,
    input: &Path,
) -> Result<(), Box<dyn Error + Send + Sync>> {
    let body = if input.as_os_str() == "-" {
        let mut buffer = Vec::new();
        io::stdin().read_to_end(&mut buffer)?;
        buffer
    } else {
        fs::read(input)?
    };

    let response = service.predict_body(&body)?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(())
}

fn run_fetch(service: &PredictionService) -> Result<(), Box<dyn Error + Send + Sync>> {
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")?
        .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏ ");

    for role in service.roles() {
        let spinner = ProgressBar::new_spinner().with_style(style.clone());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner.set_message(format!("Fetching {}", role.model_id));

        match service.load_role(role) {
            Ok(model) => spinner.finish_with_message(format!(
                "{} ready ({} classes)",
                role.model_id,
                model.classes.len()
            )),
            Err(e) => {
                spinner.abandon_with_message(format!("{} failed", role.model_id));
                return Err(e.into());
            }
        }
    }

    memory::log_memory_usage("after fetching models");
    Ok(())
}
