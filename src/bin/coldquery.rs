use coldquery::config::resolve_config;
use coldquery::core::{ActionContext, Result};
use coldquery::server::Server;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: coldquery [--config <path>]

Reads one JSON request per line on stdin and writes one JSON response per
line on stdout. Logs go to stderr; set RUST_LOG to adjust verbosity.";

enum Command {
    Serve { config: Option<PathBuf> },
    Help,
}

fn parse_args(args: &[String]) -> std::result::Result<Command, String> {
    let mut config = None;
    let mut iter = args.iter();
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "-c" | "--config" => {
                let path = iter.next().ok_or_else(|| format!("{} needs a path", arg))?;
                config = Some(PathBuf::from(path));
            }
            other => return Err(format!("unexpected argument '{}'", other)),
        }
    }
    Ok(Command::Serve { config })
}

async fn run(config_path: Option<PathBuf>) -> Result<()> {
    let config = resolve_config(config_path.as_deref())?;
    info!(path = %config.database.path, pool_size = config.database.pool_size, "starting coldquery");

    let ctx = ActionContext::connect(&config).await?;
    let server = Server::new(ctx.clone(), config.auth.clone());
    let served = server.serve(tokio::io::stdin(), tokio::io::stdout()).await;
    ctx.shutdown().await?;
    served
}

#[tokio::main]
async fn main() {
    // stdout carries the protocol, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config_path = match parse_args(&args) {
        Ok(Command::Help) => {
            println!("{}", USAGE);
            return;
        }
        Ok(Command::Serve { config }) => config,
        Err(message) => {
            eprintln!("coldquery: {}\n\n{}", message, USAGE);
            std::process::exit(2);
        }
    };

    if let Err(e) = run(config_path).await {
        error!(error = %e, "fatal");
        eprintln!("coldquery: {}", e);
        std::process::exit(1);
    }
}
