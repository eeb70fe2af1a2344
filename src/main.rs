//! plugin-store - install, update and remove wheel-packaged plugins

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::fs;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use plugin_store::config::{self, StoreConfig};
use plugin_store::index_url::IndexResolver;
use plugin_store::installer::PipInstaller;
use plugin_store::staging;
use plugin_store::{ListOutcome, ListQuery, PluginRow, SortField, StoreManager};

#[derive(Parser)]
#[command(name = "plugin-store")]
#[command(author, version, about = "Install, update and remove wheel-packaged plugins")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Plugin directory (overrides config)
    #[arg(long, global = true)]
    plugins_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// List catalog plugins, one page at a time
    List {
        /// Page number, starting at 1
        #[arg(short, long, default_value = "1")]
        page: usize,

        /// Rows per page
        #[arg(long, default_value = "20")]
        page_size: usize,

        /// Sort field: time, name, author, module or version
        #[arg(short, long, default_value = "time")]
        order_by: SortField,

        /// Only rows whose name, author or description contains this
        #[arg(short, long)]
        query: Option<String>,

        /// Only installed plugins with a newer catalog version
        #[arg(short, long)]
        updates: bool,
    },

    /// Search the catalog by name, author or description
    Search { query: String },

    /// Install a plugin by package, display or module name
    Add { identifier: String },

    /// Delete an installed plugin's directory
    Remove { identifier: String },

    /// Reinstall a plugin when the catalog has a different version
    Update { identifier: String },

    /// Update every outdated installed plugin
    UpdateAll,

    /// Show current configuration
    Config,

    /// Check index, catalog, registry and installer
    Doctor,

    /// Write a default configuration in the current directory
    Init {
        /// Force overwrite existing configuration
        #[arg(short, long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "plugin_store=debug"
    } else {
        "plugin_store=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(force),
        Commands::Config => cmd_config(),
        command => {
            let mut config = config::load_config().context("Failed to load configuration")?;
            if let Some(dir) = cli.plugins_dir {
                config.set_plugins_dir(dir);
            }
            run(command, config).await
        }
    }
}

async fn run(command: Commands, config: StoreConfig) -> anyhow::Result<()> {
    if let Commands::Doctor = command {
        return cmd_doctor(config).await;
    }
    let store = StoreManager::from_config(config)?;

    match command {
        Commands::List {
            page,
            page_size,
            order_by,
            query,
            updates,
        } => {
            let query = ListQuery {
                page,
                page_size,
                order_by,
                filter: query,
                only_show_update: updates,
            };
            match store.list(&query).await? {
                ListOutcome::Page(page) => {
                    print_rows(&page.rows);
                    println!(
                        "\nPage {}/{} ({} plugins), pass --page to see more",
                        page.page, page.total_pages, page.total_items
                    );
                }
                ListOutcome::OutOfRange { .. } => println!("No more data..."),
            }
        }
        Commands::Search { query } => {
            let rows = store.search(&query).await?;
            if rows.is_empty() {
                println!("No plugins match '{}'", query);
            } else {
                print_rows(&rows);
            }
        }
        Commands::Add { identifier } => println!("{}", store.add(&identifier).await?),
        Commands::Remove { identifier } => println!("{}", store.remove(&identifier).await?),
        Commands::Update { identifier } => println!("{}", store.update(&identifier).await?),
        Commands::UpdateAll => println!("{}", store.update_all().await?),
        Commands::Config | Commands::Doctor | Commands::Init { .. } => {}
    }
    Ok(())
}

fn print_rows(rows: &[PluginRow]) {
    println!(
        "{:<3} {:<5} {:<36} {:<24} {:<20} {:<28} {}",
        "-", "valid", "package", "name", "author", "version", "updated"
    );
    for row in rows {
        let plugin = &row.plugin;
        println!(
            "{:<3} {:<5} {:<36} {:<24} {:<20} {:<28} {}",
            if row.is_installed() { "*" } else { "" },
            plugin.valid,
            plugin.project_link,
            plugin.name,
            plugin.author,
            row.version_label(),
            plugin
                .updated_at()
                .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
                .unwrap_or_default(),
        );
        if !plugin.desc.is_empty() {
            println!("    {}", plugin.desc);
        }
    }
}

/// Write the default configuration
fn cmd_init(force: bool) -> anyhow::Result<()> {
    let config_file = config::project_config_path();

    if config_file.exists() && !force {
        error!("Configuration already exists. Use --force to overwrite.");
        return Ok(());
    }
    if let Some(parent) = config_file.parent() {
        fs::create_dir_all(parent)?;
    }

    let defaults = StoreConfig::default();
    let yaml = serde_yaml::to_string(&defaults)?;
    let content = format!(
        "# plugin-store configuration\n\
         # Environment overrides: PLUGIN_STORE__<SECTION>__<KEY>, e.g. PLUGIN_STORE__PLUGINS__DIR\n\
         # Set index.url to pin a package index instead of asking pip.\n\n{}",
        yaml
    );
    fs::write(&config_file, content)?;
    fs::create_dir_all(&defaults.plugins.dir)?;

    info!("Initialized plugin-store configuration in {}", config_file.display());
    info!("  plugins/     - Plugin directory");
    info!("");
    info!("Browse the catalog:");
    info!("  plugin-store list");

    Ok(())
}

/// Show current configuration
fn cmd_config() -> anyhow::Result<()> {
    match config::load_config() {
        Ok(config) => {
            println!("plugin-store Configuration\n");
            println!("Catalog:");
            println!("  URL: {}", config.catalog.url);
            println!("  Cache TTL: {}s", config.catalog.cache_ttl_secs);
            println!("  Timeout: {}s", config.catalog.timeout_secs);
            println!();
            println!("Index:");
            println!(
                "  URL: {}",
                config.index.url.as_deref().unwrap_or("(from pip config)")
            );
            println!("  Fallback: {}", config.index.default_url);
            println!("  User agent: {}", config.index.user_agent);
            println!();
            println!("Plugins:");
            println!("  Directory: {:?}", config.plugins.dir);
            println!("  Verify hashes: {}", config.plugins.verify_hashes);
            println!("  Registry: {:?}", config.registry.file);
            println!();
            println!("Installer:");
            println!("  Command: {}", config.installer.command);
            println!("  Python: {}", config.installer.python);
        }
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            info!("Run 'plugin-store init' to create a configuration file.");
        }
    }
    Ok(())
}

/// Check each collaborator the store depends on
async fn cmd_doctor(config: StoreConfig) -> anyhow::Result<()> {
    println!("plugin-store Doctor\n");

    print!("Package index... ");
    let index_url = IndexResolver::from_config(&config).resolve().await;
    println!("{}", index_url);

    print!("Installer... ");
    match PipInstaller::from_config(&config.installer) {
        Ok(installer) => println!("{} {}", installer.program(), installer.args().join(" ")),
        Err(e) => println!("INVALID ({})", e),
    }

    print!("Plugin directory... ");
    if config.plugins.dir.is_dir() {
        println!("{:?}", config.plugins.dir);
    } else {
        println!("{:?} (will be created)", config.plugins.dir);
    }

    print!("Interrupted installs... ");
    match staging::leftover_staging_dirs(&config.plugins.dir) {
        Ok(dirs) if dirs.is_empty() => println!("none"),
        Ok(dirs) => {
            println!("{} found, safe to delete when no install is running:", dirs.len());
            for dir in dirs {
                println!("  {}", dir.display());
            }
        }
        Err(e) => println!("FAILED ({})", e),
    }

    let store = StoreManager::from_config(config)?;

    print!("Catalog... ");
    match store.catalog().plugins().await {
        Ok(plugins) => println!("OK ({} plugins)", plugins.len()),
        Err(e) => println!("FAILED ({})", e),
    }

    print!("Installed registry... ");
    match store.installed().get().await {
        Ok(installed) => println!("OK ({} installed)", installed.len()),
        Err(e) => println!("FAILED ({})", e),
    }

    Ok(())
}
