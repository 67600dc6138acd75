use anyhow::Result;
use chatrelay_common::ConversationId;
use chatrelay_config::ConfigLoader;
use chatrelay_db::TurnStore;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "chatrelay",
    version,
    about = "chatrelay - chat gateway with persisted conversation history"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the gateway server
    Start {
        /// Host to bind to (overrides gateway.host)
        #[arg(long)]
        host: Option<String>,

        /// Port to listen on (overrides gateway.port)
        #[arg(long)]
        port: Option<u16>,
    },

    /// Show current status
    Status,

    /// Create the config directory and a starter config.yml
    Init,

    /// Print the stored turns of a conversation
    History {
        /// Conversation identifier
        id: String,

        /// Print the turns as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Err(e) = dotenvy::dotenv() {
        if !e.not_found() {
            eprintln!("warning: failed to read .env: {e}");
        }
    }

    let config_loader = ConfigLoader::new()?;
    let config = config_loader.load()?;

    let log_level = cli
        .log_level
        .clone()
        .or_else(|| config.log_level.clone())
        .unwrap_or_else(|| "info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_level)),
        )
        .init();
    debug!("config directory: {}", config_loader.config_dir().display());

    match cli.command {
        Commands::Start { host, port } => {
            config_loader.ensure_dirs()?;
            let mut config = config;
            if let Some(host) = host {
                config.gateway.host = host;
            }
            if let Some(port) = port {
                config.gateway.port = port;
            }

            let store_path = config_loader.store_path(&config);
            let server = chatrelay_gateway::GatewayServer::new(config).with_store_path(store_path);
            server.run().await?;
        }
        Commands::Status => {
            println!("chatrelay status: checking gateway...");
            let client = reqwest::Client::new();
            let mut request = client.get(format!(
                "http://{}:{}/api/status",
                config.gateway.host, config.gateway.port
            ));

            if let Some(api_key) = config.gateway.api_key.as_deref() {
                request = request.bearer_auth(api_key);
            }

            let resp = request.send().await.map_err(|_| {
                anyhow::anyhow!(
                    "Gateway is not running at {}:{}",
                    config.gateway.host,
                    config.gateway.port
                )
            })?;

            if resp.status() == reqwest::StatusCode::UNAUTHORIZED {
                anyhow::bail!("Unauthorized. Please check your api_key in config.yml.");
            }

            let body = resp.json::<serde_json::Value>().await?;
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Commands::Init => {
            config_loader.ensure_dirs()?;
            let written = config_loader.write_default_config()?;
            println!("Config directory: {}", config_loader.config_dir().display());
            if written {
                println!("Wrote config.yml. Set OPENAI_API_KEY or edit it to get started.");
            } else {
                println!("Existing config left untouched.");
            }
        }
        Commands::History { id, json } => {
            let conversation = ConversationId::from_str(id);
            if conversation.is_blank() {
                anyhow::bail!("Conversation ID is required");
            }

            let store_path = config_loader.store_path(&config);
            let store = chatrelay_gateway::bootstrap::build_store(&config, &store_path)?;
            let turns = store.load(&conversation).await?;

            if json {
                println!("{}", serde_json::to_string_pretty(&turns)?);
            } else if turns.is_empty() {
                println!("No turns stored for conversation {conversation}.");
            } else {
                for turn in &turns {
                    println!("[{}] {}: {}", turn.id, turn.role, turn.text_content());
                }
            }
        }
    }

    Ok(())
}
