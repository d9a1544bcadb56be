//! GraphFusion server - HTTP front end for the retrieval engine
//!
//! Usage:
//!   graphfusion-server [OPTIONS]
//!
//! Options:
//!   --config <PATH>      Path to configuration file (json/toml/yaml)
//!   --host <HOST>        API server host (default: 127.0.0.1)
//!   --port <PORT>        API server port (default: 8080)
//!
//! Exit codes:
//!   0  clean shutdown
//!   2  invalid arguments or configuration
//!   3  a backing store failed its startup health check
//!   1  unexpected error

use graphfusion::api::{start_server, AppState};
use graphfusion::config::EngineConfig;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

struct ServerArgs {
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
}

fn parse_args() -> Result<ServerArgs, String> {
    let mut parsed = ServerArgs {
        config_path: None,
        host: None,
        port: None,
    };
    let mut args = std::env::args().skip(1);

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                parsed.config_path = Some(PathBuf::from(
                    args.next().ok_or("--config requires a path")?,
                ));
            }
            "--host" => {
                parsed.host = Some(args.next().ok_or("--host requires a value")?);
            }
            "--port" => {
                let value = args.next().ok_or("--port requires a value")?;
                parsed.port = Some(value.parse().map_err(|_| format!("bad port: {}", value))?);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(parsed)
}

fn print_help() {
    println!("GraphFusion server - hybrid GraphRAG retrieval engine");
    println!();
    println!("USAGE:");
    println!("    graphfusion-server [OPTIONS]");
    println!();
    println!("OPTIONS:");
    println!("    --config <PATH>      Path to configuration file (json/toml/yaml)");
    println!("    --host <HOST>        API server host (default: 127.0.0.1)");
    println!("    --port <PORT>        API server port (default: 8080)");
    println!("    --help, -h           Print this help message");
    println!();
    println!("ENVIRONMENT:");
    println!("    GRAPHFUSION_*        Overrides for every config field, e.g.");
    println!("    GRAPHFUSION_LLM_URL, GRAPHFUSION_NER_URL, GRAPHFUSION_LOG_LEVEL,");
    println!("    GRAPHFUSION_DISABLE_LLM_FALLBACK, GRAPHFUSION_VECTOR_DATABASE_URL");
}

#[tokio::main]
async fn main() {
    let args = match parse_args() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{}", message);
            print_help();
            std::process::exit(2);
        }
    };

    let mut config = match &args.config_path {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("failed to load config {}: {}", path.display(), e);
                std::process::exit(2);
            }
        },
        None => EngineConfig::default(),
    };
    config.apply_env();
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone())),
        )
        .init();

    if let Err(e) = config.validate() {
        error!("invalid configuration: {}", e);
        std::process::exit(2);
    }

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            error!("failed to initialize engine: {}", e);
            std::process::exit(3);
        }
    };

    if let Err(e) = state.health_check().await {
        error!("store health check failed: {}", e);
        std::process::exit(3);
    }
    info!("stores healthy, llm available: {}", state.llm.is_available());

    let host = config.server.host.clone();
    let port = config.server.port;
    if let Err(e) = start_server(state, &host, port).await {
        error!("server terminated: {}", e);
        std::process::exit(1);
    }
}
