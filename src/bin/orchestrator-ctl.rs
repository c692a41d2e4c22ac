//! # Orchestrator Control
//!
//! Operator tool: validates configuration and runs a create/delete round
//! against the simulated platform to exercise a configured engine end to end.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use tracing::info;

use resource_orchestrator::config::{ConfigManager, OrchestratorConfig};
use resource_orchestrator::container::Container;
use resource_orchestrator::engine::CheckpointStore;
use resource_orchestrator::logging;
use resource_orchestrator::models::ResourceKind;
use resource_orchestrator::remote::{SimulatedConnector, SimulatedPlatform};
use resource_orchestrator::store::{InMemoryStore, PgStore, ResourceStore};
use resource_orchestrator::tree::{render, ResourceTreeBuilder};
use resource_orchestrator::workflow::{CreateRequest, Orchestrator};

#[derive(Parser)]
#[command(name = "orchestrator-ctl")]
#[command(about = "Inspect and exercise the resource orchestrator")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Environment to load (development, test, production, ...)
    #[arg(short, long)]
    environment: Option<String>,

    /// Configuration directory path (default: config)
    #[arg(short, long)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Load and validate configuration, then print it with secrets masked
    ValidateConfig,

    /// Create and delete a volume on the simulated platform
    Demo {
        /// Volume size in GB
        #[arg(long, default_value_t = 10)]
        size: u64,

        /// Poll interval override in milliseconds
        #[arg(long, default_value_t = 10)]
        poll_interval_ms: u64,

        /// Persist to the configured Postgres database instead of memory
        #[arg(long)]
        use_database: bool,
    },
}

impl Commands {
    fn name(&self) -> &'static str {
        match self {
            Self::ValidateConfig => "validate-config",
            Self::Demo { .. } => "demo",
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match &cli.command {
        Commands::ValidateConfig => validate_config(&cli),
        Commands::Demo {
            size,
            poll_interval_ms,
            use_database,
        } => demo(&cli, *size, *poll_interval_ms, *use_database).await,
    };

    if let Err(e) = result {
        logging::log_error("orchestrator-ctl", cli.command.name(), &format!("{e:#}"), None);
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

fn load(cli: &Cli) -> Result<Arc<ConfigManager>> {
    let environment = cli
        .environment
        .clone()
        .unwrap_or_else(ConfigManager::detect_environment);
    let manager = ConfigManager::load_from_directory_with_env(cli.config_dir.clone(), &environment)
        .context("loading configuration")?;
    logging::init_with_config(&manager.config().logging);
    Ok(manager)
}

fn validate_config(cli: &Cli) -> Result<()> {
    let manager = load(cli)?;
    println!("🔧 Validating orchestrator configuration");
    println!("Environment: {}", manager.environment());
    println!("Config Directory: {}", manager.config_directory().display());
    println!();
    println!("✅ Configuration loaded and validated");
    println!("{}", serde_json::to_string_pretty(&manager.debug_config())?);
    Ok(())
}

async fn demo(cli: &Cli, size: u64, poll_interval_ms: u64, use_database: bool) -> Result<()> {
    let manager = load(cli)?;
    let mut config: OrchestratorConfig = manager.config().clone();
    config.polling.interval_ms = poll_interval_ms;

    let (store, checkpoints): (Arc<dyn ResourceStore>, Arc<dyn CheckpointStore>) = if use_database {
        let store = Arc::new(
            PgStore::connect(&config.database)
                .await
                .context("connecting to the resource database")?,
        );
        store.migrate().await.context("applying migrations")?;
        let resources: Arc<dyn ResourceStore> = store.clone();
        let checkpoints: Arc<dyn CheckpointStore> = store;
        (resources, checkpoints)
    } else {
        let store = Arc::new(InMemoryStore::new());
        let resources: Arc<dyn ResourceStore> = store.clone();
        let checkpoints: Arc<dyn CheckpointStore> = store;
        (resources, checkpoints)
    };

    let platform = SimulatedPlatform::openstack();
    platform.script_next_create(ResourceKind::Volume, &[None, Some("creating"), Some("available")]);
    platform.script_delete(ResourceKind::Volume, &[Some("deleting"), None]);

    let container = Arc::new(Container::new(
        1,
        "openstack-demo",
        store,
        Arc::new(SimulatedConnector::new(Arc::clone(&platform))),
        config.connection.clone(),
    ));
    let orchestrator = Orchestrator::builder(config)
        .checkpoint_store(checkpoints)
        .build();

    let project = orchestrator
        .create_resource(&container, CreateRequest::new(ResourceKind::Project, "demo"))
        .await
        .context("creating project")?;
    let volume = orchestrator
        .create_resource(
            &container,
            CreateRequest::new(ResourceKind::Volume, "demo-data")
                .with_parent(project.resource.id)
                .with_attrib(json!({ "size": size })),
        )
        .await
        .context("creating volume")?;
    info!(
        resource_id = volume.resource.id,
        ext_id = ?volume.resource.ext_id,
        steps = volume.outcome.executed_steps().len(),
        "Volume created"
    );

    println!("After create:");
    print!("{}", render(&ResourceTreeBuilder::new().build(&container).await?));

    orchestrator
        .delete_resource(&container, volume.resource.id)
        .await
        .context("deleting volume")?;

    println!("After delete:");
    let tree = ResourceTreeBuilder::new()
        .include_expunged(true)
        .build(&container)
        .await?;
    print!("{}", render(&tree));
    Ok(())
}
