use anyhow::Context;
use clap::Parser;
use pushmock_server::admin_api::AdminApiServer;
use pushmock_server::config::ServerConfig;
use pushmock_server::engine::PushEngine;
use pushmock_server::mock::FileMockStore;
use pushmock_server::push_api::PushApiServer;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pushmock-server")]
#[command(author, version, about = "Server-push (SSE) mock server with scheduled delivery")]
struct Args {
    /// Port for the push stream endpoints (/sse, /sse/event, /sse/mock)
    #[arg(long, default_value = "8009")]
    push_port: u16,

    /// Port for the mock CRUD API (/api/mocks, /api/connections)
    #[arg(long, default_value = "8010")]
    admin_port: u16,

    /// Root folder holding mock documents (Domains/<domain>/SSE/*.json)
    #[arg(long, env = "PUSHMOCK_FOLDER")]
    mock_path: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = ServerConfig::new(args.push_port, args.admin_port, args.mock_path);

    let store = Arc::new(FileMockStore::new(&config.mock_root));
    store
        .ensure_layout()
        .with_context(|| format!("Failed to create mock folder {:?}", config.mock_root))?;
    info!("Mock folder: {}", config.mock_root.display());

    let engine = PushEngine::new(store);

    let push_server = PushApiServer::new(config.push_addr(), Arc::clone(&engine));
    let admin_server = AdminApiServer::new(config.admin_addr(), Arc::clone(&engine));

    tokio::select! {
        result = push_server.run() => {
            result.context("Push API server failed")?;
        }
        result = admin_server.run() => {
            result.context("Admin API server failed")?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down...");
            engine.shutdown();
        }
    }

    Ok(())
}
