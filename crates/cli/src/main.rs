mod config_commands;
mod demo_commands;
mod project_commands;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing::info,
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "quill", about = "Quill: keeps a project's working copy in sync with its store")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,

    /// Custom config directory (overrides default ~/.config/quill/).
    #[arg(long, global = true, env = "QUILL_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Remote store base URL (overrides config and QUILL_REMOTE_URL).
    #[arg(long, global = true)]
    remote_url: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// List projects in the remote store.
    List,
    /// Create a project and make it the current one.
    Create {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Initial file, repeatable.
        #[arg(long = "file", value_name = "PATH=CONTENT")]
        files: Vec<String>,
    },
    /// Open a project and remember it for the next run.
    Open { id: String },
    /// Delete a project.
    Delete { id: String },
    /// Copy a project under a new name.
    Duplicate {
        id: String,
        #[arg(long)]
        name: Option<String>,
    },
    /// Restore the last project and print the session state as JSON.
    Status,
    /// Run the engine against an in-memory store.
    Demo,
    /// Configuration management.
    Config {
        #[command(subcommand)]
        action: config_commands::ConfigAction,
    },
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr)
                    .with_ansi(true),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "quill starting");

    let mut config = quill_config::discover_and_load(cli.config_dir.as_deref());
    quill_config::apply_env_overrides(&mut config);
    if let Some(url) = cli.remote_url {
        config.remote.base_url = url;
    }

    match cli.command {
        Commands::List => project_commands::list(&config).await,
        Commands::Create {
            name,
            description,
            files,
        } => project_commands::create(&config, name, description, &files).await,
        Commands::Open { id } => project_commands::open(&config, &id).await,
        Commands::Delete { id } => project_commands::delete(&config, &id).await,
        Commands::Duplicate { id, name } => {
            project_commands::duplicate(&config, &id, name.as_deref()).await
        },
        Commands::Status => project_commands::status(&config).await,
        Commands::Demo => demo_commands::run(&config).await,
        Commands::Config { action } => {
            config_commands::handle_config(action, &config, cli.config_dir.as_deref())
        },
    }
}
