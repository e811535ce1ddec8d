use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use prose_config::Loader;
use prose_lsp::{DefaultEngineProvider, ProseLanguageServer};
use tokio::io::{stdin, stdout};
use tower_lsp::{LspService, Server};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "prose-lsp", version, about = "Language server checking prose")]
struct Args {
    /// TOML settings file layered over the built-in defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace); overrides the configured one
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let mut loader = Loader::new();
    if let Some(path) = &args.config {
        loader = loader.with_file(path);
    }
    let configured_level = match loader.clone().build() {
        Ok(config) => config.log_level,
        Err(err) => {
            eprintln!("prose-lsp: {err}");
            std::process::exit(1);
        }
    };
    init_tracing(args.log_level.as_deref().unwrap_or(&configured_level));
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "starting prose-lsp");

    let engines = Arc::new(DefaultEngineProvider::new());
    let (service, socket) = LspService::new(move |client| {
        ProseLanguageServer::with_engines(client, engines.clone(), loader.clone())
    });
    Server::new(stdin(), stdout(), socket).serve(service).await;
}
