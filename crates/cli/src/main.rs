use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "chatbridge")]
#[command(about = "Chatbridge CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config.json.
    Init {
        /// Config file path (default: CHATBRIDGE_CONFIG_PATH or ~/.chatbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Run the bot: long-poll Telegram and answer commands. Config edits are picked up without a restart.
    Run {
        /// Config file path (default: CHATBRIDGE_CONFIG_PATH or ~/.chatbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },

    /// Check that the active AI backend answers a test prompt.
    Probe {
        /// Config file path (default: CHATBRIDGE_CONFIG_PATH or ~/.chatbridge/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("chatbridge {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run(config).await {
                log::error!("run failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Probe { config }) => {
            if let Err(e) = run_probe(config).await {
                log::error!("probe failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let store = lib::config::ConfigStore::load(config_path)?;
    log::info!("using config {}", store.path().display());
    lib::bridge::run_bridge(store).await
}

async fn run_probe(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    use lib::llm::BackendProvider;

    let (config, _) = lib::config::load_config(config_path)?;
    let backend = lib::llm::HttpBackends::new().backend(&config);
    let answer = tokio::time::timeout(config.ask_timeout(), lib::llm::probe(backend.as_ref()))
        .await
        .map_err(|_| anyhow::anyhow!("{} did not answer within {:?}", backend.name(), config.ask_timeout()))??;
    println!("{}: valid ({})", backend.name(), answer.trim());
    Ok(())
}
