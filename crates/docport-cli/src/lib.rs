//! Operator CLI for the docport document-registry client.
//!
//! Covers the auth flow, document listings, and a transport doctor that
//! probes both channels directly. Connection settings come from flags,
//! `DOCPORT_*` environment variables, or a `docport.toml` config file.

use clap::Parser;
use tracing_subscriber::EnvFilter;

mod commands;
mod progress;
mod settings;

pub use progress::SpinnerProgress;
pub use settings::{CLI_DEFAULT_TIMEOUT_MS, Overrides, Settings};

#[derive(Parser)]
#[command(name = "docport")]
#[command(about = "Client for script-hosted document-registry endpoints")]
pub struct DocportCli {
    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Probe the endpoint with a health call.
    Health,
    /// Authenticate and prime the session cache.
    Login {
        #[arg(long)]
        username: String,
        /// Read from DOCPORT_PASSWORD when omitted.
        #[arg(long)]
        password: Option<String>,
    },
    /// End the session and drop cached user data.
    Logout,
    /// Show the signed-in user, served from cache when fresh.
    Me {
        /// Skip the cache and ask the endpoint.
        #[arg(long)]
        refresh: bool,
    },
    /// Document listings.
    Docs {
        #[command(subcommand)]
        command: DocsCommands,
    },
    /// Single-document lookups.
    Doc {
        #[command(subcommand)]
        command: DocCommands,
    },
    /// Probe both transports and report which answered.
    Doctor,
}

#[derive(clap::Subcommand)]
pub enum DocsCommands {
    /// Page through the registry.
    List {
        #[arg(long, default_value_t = 1)]
        page: u32,
        #[arg(long = "per-page", default_value_t = 20)]
        per_page: u32,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value = "all")]
        status: String,
    },
}

#[derive(clap::Subcommand)]
pub enum DocCommands {
    /// Fetch one document with its activity log.
    Detail { id: String },
}

pub async fn run() -> anyhow::Result<()> {
    init_tracing();
    let cli = DocportCli::parse();
    let settings = Settings::resolve(&cli.overrides)?;

    match cli.command {
        Commands::Health => commands::health(&settings).await,
        Commands::Login { username, password } => {
            commands::login(&settings, &username, password).await
        }
        Commands::Logout => commands::logout(&settings).await,
        Commands::Me { refresh } => commands::me(&settings, refresh).await,
        Commands::Docs { command } => match command {
            DocsCommands::List {
                page,
                per_page,
                search,
                status,
            } => commands::docs_list(&settings, page, per_page, &search, &status).await,
        },
        Commands::Doc { command } => match command {
            DocCommands::Detail { id } => commands::doc_detail(&settings, &id).await,
        },
        Commands::Doctor => commands::doctor(&settings).await,
    }
}

/// Logs go to stderr so stdout stays parseable JSON.
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
