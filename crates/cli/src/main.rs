mod client;

use std::path::PathBuf;

use {
    clap::{Parser, Subcommand},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "larkin", about = "Larkin: Feishu bridge for local coding-agent permissions")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the backend beside the agent (socket broker + /cb surface).
    Backend,
    /// Run the Internet-facing gateway (Feishu events + /gw surface).
    Gateway,
    /// Hook-side socket client: reads a request from stdin, prints the
    /// decision to stdout.
    Client {
        /// Socket path override (defaults to PERMISSION_SOCKET_PATH).
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}

fn init_tracing(level: &str, json: bool) {
    // Logs go to stderr: in client mode stdout carries the decision payload.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("larkin={level},larkin_backend={level},larkin_gateway={level},larkin_broker={level},larkin_feishu={level},larkin_store={level},tower_http=warn")));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let config = larkin_config::from_env();
    match cli.command {
        Commands::Backend => larkin_backend::run(config).await,
        Commands::Gateway => larkin_gateway::run(config).await,
        Commands::Client { socket } => {
            let code = client::run(&config, socket).await;
            std::process::exit(code);
        },
    }
}
